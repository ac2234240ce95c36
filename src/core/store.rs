use tokio_util::sync::CancellationToken;
use super::progress::should_publish;
use super::task::UploadTask;
use super::types::{TaskId, TaskStatus, UploadPayload};

struct TaskEntry {
    task: UploadTask,
    cancellation_token: Option<CancellationToken>,
}

/// Result of a status update against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied { old_status: TaskStatus },
    /// Progress delta below threshold, nothing changed
    Coalesced,
    /// Not a legal move from the current status
    Rejected { current: TaskStatus },
    /// Unknown id, usually a stale update for a removed task
    Unknown,
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }
}

/// Ordered task collection, oldest first.
pub struct TaskStore {
    entries: Vec<TaskEntry>,
    progress_threshold: f64,
}

impl TaskStore {
    pub fn new(progress_threshold: f64) -> Self {
        Self {
            entries: Vec::new(),
            progress_threshold,
        }
    }

    pub fn enqueue(&mut self, payloads: Vec<UploadPayload>) -> Vec<TaskId> {
        payloads
            .into_iter()
            .map(|payload| {
                let task = UploadTask::new(payload);
                let id = task.id();
                self.entries.push(TaskEntry { task, cancellation_token: None });
                id
            })
            .collect()
    }

    /// Append a task loaded from disk. Returns false if the id is already present.
    pub fn insert_recovered(&mut self, task: UploadTask) -> bool {
        if self.position(&task.id()).is_some() {
            return false;
        }

        self.entries.push(TaskEntry { task, cancellation_token: None });
        true
    }

    pub fn transition(&mut self, id: &TaskId, status: TaskStatus) -> TransitionOutcome {
        self.apply(id, status, true)
    }

    /// Like [`transition`](Self::transition), but an `Uploading` update is
    /// applied whatever the delta, unless the progress is unchanged.
    pub fn transition_exact(&mut self, id: &TaskId, status: TaskStatus) -> TransitionOutcome {
        self.apply(id, status, false)
    }

    fn apply(&mut self, id: &TaskId, status: TaskStatus, coalesce: bool) -> TransitionOutcome {
        let threshold = self.progress_threshold;
        let Some(entry) = self.entries.iter_mut().find(|e| e.task.id() == *id) else {
            return TransitionOutcome::Unknown;
        };

        let current = entry.task.status();
        if !UploadTask::is_valid_transition(current, &status) {
            return TransitionOutcome::Rejected { current: current.clone() };
        }

        if let (TaskStatus::Uploading { progress: old }, TaskStatus::Uploading { progress: new }) = (current, &status) {
            let unchanged = if coalesce { !should_publish(*old, *new, threshold) } else { old == new };
            if unchanged {
                return TransitionOutcome::Coalesced;
            }
        }

        if !status.is_uploading() {
            entry.cancellation_token = None;
        }

        let old_status = entry.task.set_status(status);
        TransitionOutcome::Applied { old_status }
    }

    /// Claim a pending task: move it to `Uploading(0.0)` and attach the token
    /// the worker listens on. Caller must hold the store exclusively.
    pub fn begin_upload(&mut self, id: &TaskId, cancellation_token: CancellationToken) -> Option<UploadTask> {
        let entry = self.entries.iter_mut().find(|e| e.task.id() == *id)?;
        if !entry.task.status().is_pending() {
            return None;
        }

        entry.task.set_status(TaskStatus::uploading(0.0));
        entry.cancellation_token = Some(cancellation_token);
        Some(entry.task.clone())
    }

    /// Delete a task, signalling its in-flight transfer first.
    pub fn remove(&mut self, id: &TaskId) -> Option<UploadTask> {
        self.remove_if(id, |_| true)
    }

    pub fn remove_if<F>(&mut self, id: &TaskId, predicate: F) -> Option<UploadTask>
    where
        F: FnOnce(&UploadTask) -> bool,
    {
        let index = self.position(id)?;
        if !predicate(&self.entries[index].task) {
            return None;
        }

        let entry = self.entries.remove(index);
        if let Some(token) = entry.cancellation_token {
            token.cancel();
        }

        Some(entry.task)
    }

    /// Oldest task still waiting. Does not claim it.
    pub fn next_pending(&self) -> Option<&UploadTask> {
        self.entries
            .iter()
            .map(|e| &e.task)
            .find(|task| task.status().is_pending())
    }

    pub fn get(&self, id: &TaskId) -> Option<&UploadTask> {
        self.entries.iter().map(|e| &e.task).find(|task| task.id() == *id)
    }

    pub fn snapshot(&self) -> Vec<UploadTask> {
        self.entries.iter().map(|e| e.task.clone()).collect()
    }

    pub fn ids(&self) -> Vec<TaskId> {
        self.entries.iter().map(|e| e.task.id()).collect()
    }

    pub fn failed_ids(&self) -> Vec<TaskId> {
        self.entries
            .iter()
            .filter(|e| e.task.status().is_failed())
            .map(|e| e.task.id())
            .collect()
    }

    /// Every task that must survive a restart, in-flight ones as `Pending`.
    pub fn persistable(&self) -> Vec<UploadTask> {
        self.entries.iter().filter_map(|e| e.task.to_persisted()).collect()
    }

    pub fn has_pending(&self) -> bool {
        self.next_pending().is_some()
    }

    /// Any task still Pending or Uploading.
    pub fn has_outstanding(&self) -> bool {
        self.entries.iter().any(|e| e.task.status().is_outstanding())
    }

    pub fn uploading_count(&self) -> usize {
        self.entries.iter().filter(|e| e.task.status().is_uploading()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, id: &TaskId) -> Option<usize> {
        self.entries.iter().position(|e| e.task.id() == *id)
    }
}
