use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use crate::config::SchedulerConfig;
use crate::storage::DiskStorage;
use super::capacity::CapacityLimiter;
use super::errors::{QueueError, Result};
use super::guard::{ExtensionGuard, NoopExtension};
use super::persistence::Persister;
use super::store::{TaskStore, TransitionOutcome};
use super::task::UploadTask;
use super::traits::{ExecutionExtension, RecordCreator, StorageAdapter, UploadTransfer};
use super::types::{QueueEvent, TaskId, TaskStatus, UploadPayload};

/// State shared by the manager handle, the scheduler loop and every worker.
pub(crate) struct Shared {
    pub(crate) config: SchedulerConfig,
    pub(crate) store: Mutex<TaskStore>,
    pub(crate) capacity: CapacityLimiter,
    pub(crate) persister: Option<Persister>,
    pub(crate) guard: ExtensionGuard,
    pub(crate) transfer: Arc<dyn UploadTransfer>,
    pub(crate) records: Arc<dyn RecordCreator>,
    pub(crate) running: AtomicBool,
    session: RwLock<Option<String>>,
    event_tx: broadcast::Sender<QueueEvent>,
}

impl Shared {
    pub(crate) fn emit(&self, event: QueueEvent) {
        // 没有订阅者时发送失败，忽略即可
        let _ = self.event_tx.send(event);
    }

    /// Apply a status change, publish it, and queue a save when the new
    /// status is one that lives on disk.
    pub(crate) fn transition(self: &Arc<Self>, task_id: TaskId, status: TaskStatus) -> TransitionOutcome {
        self.apply_transition(task_id, status, true)
    }

    /// Progress milestones, such as the end of a range, are always published.
    pub(crate) fn transition_exact(self: &Arc<Self>, task_id: TaskId, status: TaskStatus) -> TransitionOutcome {
        self.apply_transition(task_id, status, false)
    }

    fn apply_transition(self: &Arc<Self>, task_id: TaskId, status: TaskStatus, coalesce: bool) -> TransitionOutcome {
        let persist = status.is_persistable();

        let outcome = {
            let mut store = self.store.lock();
            let outcome = if coalesce {
                store.transition(&task_id, status.clone())
            } else {
                store.transition_exact(&task_id, status.clone())
            };
            if let TransitionOutcome::Applied { old_status } = &outcome {
                self.emit(QueueEvent::StatusChanged {
                    task_id,
                    old_status: old_status.clone(),
                    new_status: status.clone(),
                });
            }
            outcome
        };

        match &outcome {
            TransitionOutcome::Applied { old_status } => {
                debug!(task_id = %task_id, from = old_status.label(), to = status.label(), "Task status changed");
                if persist {
                    self.schedule_persist();
                }
            }
            TransitionOutcome::Rejected { current } => {
                debug!(task_id = %task_id, from = current.label(), to = status.label(), "Ignoring invalid transition");
            }
            TransitionOutcome::Unknown => {
                debug!(task_id = %task_id, "Ignoring update for removed task");
            }
            TransitionOutcome::Coalesced => {}
        }

        outcome
    }

    pub(crate) fn schedule_persist(self: &Arc<Self>) {
        if let Some(persister) = &self.persister {
            let shared = Arc::downgrade(self);
            persister.schedule(move || {
                shared
                    .upgrade()
                    .map(|shared| shared.store.lock().persistable())
                    .unwrap_or_default()
            });
        }
    }

    pub(crate) fn owner(&self) -> Option<String> {
        self.session.read().clone()
    }

    pub(crate) fn has_outstanding(&self) -> bool {
        self.store.lock().has_outstanding()
    }
}

/// Caller-facing handle to the upload scheduler. Cheap to clone.
///
/// Must be used from inside a tokio runtime: enqueueing spawns the
/// scheduler loop.
#[derive(Clone)]
pub struct UploadManager {
    shared: Arc<Shared>,
}

impl UploadManager {
    pub fn builder() -> UploadManagerBuilder {
        UploadManagerBuilder::new()
    }

    /// Add one task per payload, all `Pending`, and wake the scheduler.
    pub fn enqueue(&self, payloads: Vec<UploadPayload>) -> Vec<TaskId> {
        if payloads.is_empty() {
            return Vec::new();
        }

        let ids = {
            let mut store = self.shared.store.lock();
            let ids = store.enqueue(payloads);
            for task_id in &ids {
                self.shared.emit(QueueEvent::Added { task_id: *task_id });
            }
            ids
        };

        info!(count = ids.len(), "Enqueued uploads");
        self.shared.schedule_persist();
        self.shared.trigger();
        ids
    }

    /// Remove a task whatever its status, aborting its transfer if one is running.
    pub async fn remove(&self, task_id: TaskId) -> Result<()> {
        let removed = {
            let mut store = self.shared.store.lock();
            let removed = store.remove(&task_id);
            if removed.is_some() {
                self.shared.emit(QueueEvent::Removed { task_id });
            }
            removed
        };

        let task = removed.ok_or(QueueError::TaskNotFound(task_id))?;
        if task.status().is_uploading() {
            info!(task_id = %task_id, "Cancelling in-flight upload");
            self.shared.transfer.cancel(task_id).await;
        }

        let removed = match &self.shared.persister {
            Some(persister) => persister.remove(task_id).await,
            None => Ok(()),
        };

        self.shared.guard.after_worker(self.shared.has_outstanding());
        removed
    }

    /// Remove every task. Returns how many were removed.
    pub async fn cancel_all(&self) -> Result<usize> {
        let ids = self.shared.store.lock().ids();
        let mut removed = 0;

        for task_id in ids {
            match self.remove(task_id).await {
                Ok(()) => removed += 1,
                Err(QueueError::TaskNotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }

        Ok(removed)
    }

    /// Move a `Failed` task back to `Pending` and wake the scheduler.
    pub fn retry(&self, task_id: TaskId) -> Result<()> {
        match self.shared.transition(task_id, TaskStatus::Pending) {
            TransitionOutcome::Applied { .. } | TransitionOutcome::Coalesced => {
                self.shared.trigger();
                Ok(())
            }
            TransitionOutcome::Rejected { current } => Err(QueueError::InvalidTransition {
                from: current.label(),
                to: TaskStatus::Pending.label(),
            }),
            TransitionOutcome::Unknown => Err(QueueError::TaskNotFound(task_id)),
        }
    }

    pub fn retry_all_failed(&self) -> usize {
        let failed = self.shared.store.lock().failed_ids();
        failed
            .into_iter()
            .filter(|task_id| self.retry(*task_id).is_ok())
            .count()
    }

    pub fn snapshot(&self) -> Vec<UploadTask> {
        self.shared.store.lock().snapshot()
    }

    pub fn get_task(&self, task_id: TaskId) -> Option<UploadTask> {
        self.shared.store.lock().get(&task_id).cloned()
    }

    /// Slots currently held by running workers.
    pub fn active_uploads(&self) -> usize {
        self.shared.capacity.in_use()
    }

    pub fn is_scheduling(&self) -> bool {
        self.shared.is_running()
    }

    pub fn sign_in(&self, owner_id: impl Into<String>) {
        *self.shared.session.write() = Some(owner_id.into());
    }

    pub fn sign_out(&self) {
        *self.shared.session.write() = None;
    }

    pub fn is_signed_in(&self) -> bool {
        self.shared.session.read().is_some()
    }

    /// Reload recoverable tasks from disk, all as `Pending`, and start scheduling.
    pub async fn restore(&self) -> Result<usize> {
        let Some(persister) = &self.shared.persister else {
            return Ok(0);
        };

        let tasks = persister.load_all().await?;
        let restored = {
            let mut store = self.shared.store.lock();
            let mut restored = 0;
            for task in tasks {
                let task_id = task.id();
                if store.insert_recovered(task) {
                    self.shared.emit(QueueEvent::Added { task_id });
                    restored += 1;
                }
            }
            restored
        };

        info!(restored, "Restored upload queue");
        if restored > 0 {
            self.shared.schedule_persist();
            self.shared.trigger();
        }

        Ok(restored)
    }

    /// Write the recoverable tasks now instead of waiting for the debounce.
    pub async fn flush(&self) -> Result<()> {
        match &self.shared.persister {
            Some(persister) => {
                let shared = self.shared.clone();
                persister.flush(move || shared.store.lock().persistable()).await
            }
            None => Ok(()),
        }
    }

    /// Host is about to suspend. Returns whether an extension is now held.
    pub fn notify_suspending(&self) -> bool {
        self.shared.guard.on_suspend(self.shared.has_outstanding())
    }

    /// Host is back in the foreground.
    pub fn notify_resumed(&self) {
        self.shared.guard.release();
        self.shared.trigger();
    }

    pub fn holds_extension(&self) -> bool {
        self.shared.guard.is_held()
    }

    /// 订阅事件
    ///
    /// 注意：接收速度跟不上发送速度时会丢失事件（lagged error）
    pub fn subscribe_events(&self) -> broadcast::Receiver<QueueEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredEventReceiver<F>
    where
        F: Fn(&QueueEvent) -> bool,
    {
        FilteredEventReceiver {
            receiver: self.shared.event_tx.subscribe(),
            filter,
        }
    }

    /// Invoke `callback` for every store mutation until the manager is dropped.
    pub fn on_event<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(QueueEvent) + Send + 'static,
    {
        let mut receiver = self.shared.event_tx.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => callback(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// 过滤的事件接收器
pub struct FilteredEventReceiver<F> {
    receiver: broadcast::Receiver<QueueEvent>,
    filter: F,
}

impl<F> FilteredEventReceiver<F>
where
    F: Fn(&QueueEvent) -> bool,
{
    pub async fn recv(&mut self) -> Result<QueueEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if (self.filter)(&event) {
                return Ok(event);
            }
        }
    }
}

#[derive(Default)]
pub struct UploadManagerBuilder {
    config: SchedulerConfig,
    transfer: Option<Arc<dyn UploadTransfer>>,
    records: Option<Arc<dyn RecordCreator>>,
    extension: Option<Arc<dyn ExecutionExtension>>,
    storage: Option<Arc<dyn StorageAdapter>>,
}

impl UploadManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transfer(mut self, transfer: Arc<dyn UploadTransfer>) -> Self {
        self.transfer = Some(transfer);
        self
    }

    pub fn records(mut self, records: Arc<dyn RecordCreator>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn extension(mut self, extension: Arc<dyn ExecutionExtension>) -> Self {
        self.extension = Some(extension);
        self
    }

    /// Overrides the disk storage that `state_dir` would otherwise open.
    pub fn storage(mut self, storage: Arc<dyn StorageAdapter>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub async fn build(self) -> Result<UploadManager> {
        self.config.validate()?;

        let transfer = self
            .transfer
            .ok_or_else(|| QueueError::Config("no transfer collaborator registered".to_string()))?;
        let records = self
            .records
            .ok_or_else(|| QueueError::Config("no record collaborator registered".to_string()))?;
        let extension: Arc<dyn ExecutionExtension> = match self.extension {
            Some(extension) => extension,
            None => Arc::new(NoopExtension::default()),
        };

        let storage: Option<Arc<dyn StorageAdapter>> = match (self.storage, &self.config.state_dir) {
            (Some(storage), _) => Some(storage),
            (None, Some(dir)) => Some(Arc::new(DiskStorage::open(dir.clone()).await?)),
            (None, None) => None,
        };
        let persister = storage.map(|storage| Persister::new(storage, self.config.persist_debounce));

        let (event_tx, _) = broadcast::channel(self.config.event_capacity);
        let shared = Shared {
            store: Mutex::new(TaskStore::new(self.config.progress_threshold)),
            capacity: CapacityLimiter::new(self.config.max_concurrent),
            persister,
            guard: ExtensionGuard::new(extension),
            transfer,
            records,
            running: AtomicBool::new(false),
            session: RwLock::new(None),
            event_tx,
            config: self.config,
        };

        Ok(UploadManager {
            shared: Arc::new(shared),
        })
    }
}
