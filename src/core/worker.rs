use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use super::errors::QueueError;
use super::manager::Shared;
use super::progress::ProgressRange;
use super::task::UploadTask;
use super::traits::ProgressFn;
use super::types::{NewRecord, QueueEvent, RecordId, TaskId, TaskStatus};

enum WorkerOutcome {
    Completed(RecordId),
    Failed(String),
    Cancelled,
}

/// Runs one claimed task: byte transfer, then record creation.
pub(crate) struct UploadWorker {
    shared: Arc<Shared>,
    task: UploadTask,
    cancellation_token: CancellationToken,
}

impl UploadWorker {
    pub(crate) fn new(shared: Arc<Shared>, task: UploadTask, cancellation_token: CancellationToken) -> Self {
        Self {
            shared,
            task,
            cancellation_token,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        let shared = self.shared.clone();
        let task_id = self.task.id();

        tokio::spawn(async move {
            // 内层任务 panic 时转换为 Failed，调度循环不受影响
            let outcome = match tokio::spawn(self.run()).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(task_id = %task_id, error = %err, "Upload worker crashed");
                    WorkerOutcome::Failed(format!("worker panicked: {err}"))
                }
            };

            shared.finish_worker(task_id, outcome);
        })
    }

    async fn run(self) -> WorkerOutcome {
        let task_id = self.task.id();
        let Some(owner_id) = self.shared.owner() else {
            return WorkerOutcome::Failed(QueueError::NotAuthenticated.to_string());
        };

        let range = ProgressRange::transfer(self.shared.config.transfer_share);
        let on_progress: ProgressFn = {
            let shared = self.shared.clone();
            Arc::new(move |fraction: f64| {
                shared.transition(task_id, TaskStatus::uploading(range.map(fraction)));
            })
        };

        let payload = self.task.payload();
        let urls = tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => return WorkerOutcome::Cancelled,
            result = self.shared.transfer.transfer(
                task_id,
                payload.full_image.clone(),
                payload.thumbnail.clone(),
                &owner_id,
                on_progress,
            ) => match result {
                Ok(urls) => urls,
                Err(err) => return WorkerOutcome::Failed(err.to_string()),
            },
        };

        self.shared.transition_exact(task_id, TaskStatus::uploading(range.end()));

        let mut tags: Vec<String> = payload.tags.iter().cloned().collect();
        tags.sort();
        let record = NewRecord {
            owner_id,
            full_url: urls.full_url,
            thumbnail_url: urls.thumbnail_url,
            dimensions: payload.dimensions,
            title: payload.title.clone(),
            description: payload.description.clone(),
            tags,
        };

        tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => WorkerOutcome::Cancelled,
            result = self.shared.records.create_record(record) => match result {
                Ok(record_id) => WorkerOutcome::Completed(record_id),
                Err(err) => WorkerOutcome::Failed(err.to_string()),
            },
        }
    }
}

impl Shared {
    fn finish_worker(self: &Arc<Self>, task_id: TaskId, outcome: WorkerOutcome) {
        match outcome {
            WorkerOutcome::Completed(record_id) => {
                info!(task_id = %task_id, record_id = %record_id, "Upload completed");
                if self.transition(task_id, TaskStatus::Completed).is_applied() {
                    self.schedule_eviction(task_id);
                }
            }
            WorkerOutcome::Failed(message) => {
                warn!(task_id = %task_id, error = %message, "Upload failed");
                self.transition(task_id, TaskStatus::failed(message));
            }
            WorkerOutcome::Cancelled => {
                info!(task_id = %task_id, "Upload cancelled");
            }
        }

        self.capacity.release(&task_id);
        self.guard.after_worker(self.has_outstanding());

        if self.has_dispatchable_work() {
            self.trigger();
        }
    }

    /// Drop the on-disk unit now, the in-memory task after the grace delay.
    fn schedule_eviction(self: &Arc<Self>, task_id: TaskId) {
        let shared = self.clone();
        let grace = self.config.completion_grace;

        tokio::spawn(async move {
            if let Some(persister) = &shared.persister {
                if let Err(err) = persister.remove(task_id).await {
                    warn!(task_id = %task_id, error = %err, "Failed to remove completed task unit");
                }
            }

            tokio::time::sleep(grace).await;

            let mut store = shared.store.lock();
            if store
                .remove_if(&task_id, |task| task.status() == &TaskStatus::Completed)
                .is_some()
            {
                shared.emit(QueueEvent::Removed { task_id });
            }
        });
    }
}
