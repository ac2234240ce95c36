use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use super::errors::Result;
use super::task::UploadTask;
use super::traits::StorageAdapter;
use super::types::TaskId;

/// Debounced writer in front of a [`StorageAdapter`].
///
/// Saves are cancel-and-reschedule: every `schedule` call drops the previous
/// pending fire, so a burst of mutations inside the window costs one write.
/// Removals go straight to storage. All storage I/O is serialized so a
/// removal can never be overtaken by a stale save of the same task.
pub struct Persister {
    storage: Arc<dyn StorageAdapter>,
    debounce: Duration,
    pending: Mutex<Option<CancellationToken>>,
    io_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Persister {
    pub fn new(storage: Arc<dyn StorageAdapter>, debounce: Duration) -> Self {
        Self {
            storage,
            debounce,
            pending: Mutex::new(None),
            io_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Queue a save. `snapshot` runs when the timer fires, not now.
    pub fn schedule<F>(&self, snapshot: F)
    where
        F: FnOnce() -> Vec<UploadTask> + Send + 'static,
    {
        let token = CancellationToken::new();
        if let Some(previous) = self.pending.lock().replace(token.clone()) {
            previous.cancel();
        }

        let storage = self.storage.clone();
        let io_lock = self.io_lock.clone();
        let debounce = self.debounce;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(debounce) => {}
            }

            let _guard = io_lock.lock().await;
            let tasks = persistable(snapshot());
            match storage.save_tasks(&tasks).await {
                Ok(()) => debug!(count = tasks.len(), "Persisted task queue"),
                Err(err) => error!(error = %err, "Failed to persist task queue"),
            }
        });
    }

    /// Write immediately, dropping any pending debounced save.
    pub async fn flush<F>(&self, snapshot: F) -> Result<()>
    where
        F: FnOnce() -> Vec<UploadTask>,
    {
        if let Some(previous) = self.pending.lock().take() {
            previous.cancel();
        }

        let _guard = self.io_lock.lock().await;
        let tasks = persistable(snapshot());
        self.storage.save_tasks(&tasks).await
    }

    pub async fn remove(&self, task_id: TaskId) -> Result<()> {
        let _guard = self.io_lock.lock().await;
        self.storage.delete_task(task_id).await
    }

    /// Every recoverable task, reset to `Pending` whatever status was saved.
    pub async fn load_all(&self) -> Result<Vec<UploadTask>> {
        let _guard = self.io_lock.lock().await;
        let mut tasks = self.storage.list_tasks().await?;
        for task in tasks.iter_mut() {
            task.reset_for_recovery();
        }

        Ok(tasks)
    }
}

fn persistable(tasks: Vec<UploadTask>) -> Vec<UploadTask> {
    tasks.iter().filter_map(UploadTask::to_persisted).collect()
}
