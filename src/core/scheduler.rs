use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use super::manager::Shared;
use super::types::{QueueEvent, TaskStatus};
use super::worker::UploadWorker;

impl Shared {
    /// Start the scheduler loop unless one is already running.
    pub(crate) fn trigger(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let shared = self.clone();
        tokio::spawn(async move {
            shared.run_loop().await;
        });
    }

    async fn run_loop(self: Arc<Self>) {
        debug!("Scheduler loop started");
        let mut idle_rounds = 0u32;

        loop {
            if self.dispatch_ready() > 0 {
                idle_rounds = 0;
                continue;
            }

            // 有等待中的任务但没有空位时继续轮询，不计入空闲
            if self.store.lock().has_pending() {
                idle_rounds = 0;
            } else {
                idle_rounds += 1;
            }

            if idle_rounds >= self.config.idle_exit_after {
                break;
            }

            tokio::time::sleep(self.config.idle_poll_interval).await;
        }

        self.running.store(false, Ordering::Release);
        debug!("Scheduler loop idle, exiting");

        // Work may have arrived between the last poll and clearing the flag.
        if self.has_dispatchable_work() {
            self.trigger();
        }
    }

    /// Claim and dispatch pending tasks, oldest first, until capacity runs out.
    pub(crate) fn dispatch_ready(self: &Arc<Self>) -> usize {
        let mut dispatched = 0;

        while self.capacity.has_capacity() {
            let (task, cancellation_token) = {
                let mut store = self.store.lock();
                let Some(task_id) = store.next_pending().map(|task| task.id()) else {
                    break;
                };

                if !self.capacity.try_admit(task_id) {
                    break;
                }

                let cancellation_token = CancellationToken::new();
                let Some(task) = store.begin_upload(&task_id, cancellation_token.clone()) else {
                    self.capacity.release(&task_id);
                    break;
                };

                self.emit(QueueEvent::StatusChanged {
                    task_id,
                    old_status: TaskStatus::Pending,
                    new_status: task.status().clone(),
                });
                (task, cancellation_token)
            };

            info!(task_id = %task.id(), "Dispatching upload");
            UploadWorker::new(self.clone(), task, cancellation_token).spawn();
            dispatched += 1;
        }

        dispatched
    }

    pub(crate) fn has_dispatchable_work(&self) -> bool {
        self.capacity.has_capacity() && self.store.lock().has_pending()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}
