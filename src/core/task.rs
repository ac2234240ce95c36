use super::types::{TaskId, TaskStatus, UploadPayload};

/// One queued upload. Identity and payload are fixed at creation; only the
/// status moves afterwards.
#[derive(Debug, Clone)]
pub struct UploadTask {
    id: TaskId,
    payload: UploadPayload,
    status: TaskStatus,
}

impl UploadTask {
    pub(crate) fn new(payload: UploadPayload) -> Self {
        Self {
            id: TaskId::new(),
            payload,
            status: TaskStatus::Pending,
        }
    }

    pub(crate) fn from_parts(id: TaskId, payload: UploadPayload, status: TaskStatus) -> Self {
        Self { id, payload, status }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn payload(&self) -> &UploadPayload {
        &self.payload
    }

    pub fn status(&self) -> &TaskStatus {
        &self.status
    }

    /// Error text, only present while `Failed`.
    pub fn error(&self) -> Option<&str> {
        match &self.status {
            TaskStatus::Failed { message } => Some(message),
            _ => None,
        }
    }

    pub fn progress(&self) -> Option<f64> {
        self.status.progress()
    }

    pub(crate) fn set_status(&mut self, status: TaskStatus) -> TaskStatus {
        std::mem::replace(&mut self.status, status)
    }

    /// A recovered task always restarts from scratch.
    pub(crate) fn reset_for_recovery(&mut self) {
        self.status = TaskStatus::Pending;
    }

    /// What goes to disk for this task. An in-flight upload is written as
    /// `Pending`, a completed one not at all.
    pub(crate) fn to_persisted(&self) -> Option<UploadTask> {
        match &self.status {
            TaskStatus::Pending | TaskStatus::Failed { .. } => Some(self.clone()),
            TaskStatus::Uploading { .. } => {
                let mut task = self.clone();
                task.reset_for_recovery();
                Some(task)
            }
            TaskStatus::Completed => None,
        }
    }

    /// 状态机：Pending -> Uploading -> Completed | Failed，Failed -> Pending（显式重试）
    pub fn is_valid_transition(from: &TaskStatus, to: &TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (from, to),
            (Pending, Uploading { .. })
                | (Uploading { .. }, Uploading { .. })
                | (Uploading { .. }, Completed)
                | (Uploading { .. }, Failed { .. })
                | (Failed { .. }, Pending)
        )
    }
}
