use std::collections::HashSet;
use std::str::FromStr;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 上传任务唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifier returned by the record-creation service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct RecordId(pub String);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Everything a worker needs to upload one image.
///
/// Media bytes are held as [`Bytes`], so the task owns an immutable buffer
/// that outlives whatever copy the caller kept.
#[derive(Debug, Clone)]
pub struct UploadPayload {
    pub full_image: Bytes,
    pub thumbnail: Bytes,
    pub dimensions: Dimensions,
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: HashSet<String>,
    pub created_at: DateTime<Utc>,
}

impl UploadPayload {
    pub fn new(full_image: impl Into<Bytes>, thumbnail: impl Into<Bytes>, dimensions: Dimensions) -> Self {
        Self {
            full_image: full_image.into(),
            thumbnail: thumbnail.into(),
            dimensions,
            title: None,
            description: None,
            tags: HashSet::new(),
            created_at: Utc::now(),
        }
    }

    /// Copies borrowed media into a payload.
    pub fn from_slices(full_image: &[u8], thumbnail: &[u8], dimensions: Dimensions) -> Self {
        Self::new(
            Bytes::copy_from_slice(full_image),
            Bytes::copy_from_slice(thumbnail),
            dimensions,
        )
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn total_bytes(&self) -> usize {
        self.full_image.len() + self.thumbnail.len()
    }
}

/// 任务状态
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskStatus {
    /// 等待中（在队列中）
    Pending,
    /// 上传中，progress 取值 0.0 ~ 1.0
    Uploading { progress: f64 },
    /// 已完成
    Completed,
    /// 失败
    Failed { message: String },
}

impl TaskStatus {
    pub fn uploading(progress: f64) -> Self {
        Self::Uploading { progress: progress.clamp(0.0, 1.0) }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed { message: message.into() }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Uploading { .. } => "uploading",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed { .. } => "failed",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, TaskStatus::Pending)
    }

    pub fn is_uploading(&self) -> bool {
        matches!(self, TaskStatus::Uploading { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TaskStatus::Failed { .. })
    }

    /// Pending or Failed. Moving into one of these schedules a save.
    pub fn is_persistable(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Failed { .. })
    }

    /// Work that still needs run time from the host process.
    pub fn is_outstanding(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Uploading { .. })
    }

    pub fn progress(&self) -> Option<f64> {
        match self {
            TaskStatus::Uploading { progress } => Some(*progress),
            _ => None,
        }
    }
}

/// URLs returned by the object storage once both blobs are uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransferUrls {
    pub full_url: String,
    pub thumbnail_url: String,
}

/// Request sent to the record-creation service.
#[derive(Debug, Clone, Serialize)]
pub struct NewRecord {
    pub owner_id: String,
    pub full_url: String,
    pub thumbnail_url: String,
    pub dimensions: Dimensions,
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

/// Store mutation broadcast to subscribers.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// 任务已添加
    Added {
        task_id: TaskId,
    },

    /// 状态变更
    StatusChanged {
        task_id: TaskId,
        old_status: TaskStatus,
        new_status: TaskStatus,
    },

    /// 任务已移除
    Removed {
        task_id: TaskId,
    },
}

impl QueueEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            QueueEvent::Added { task_id }
            | QueueEvent::StatusChanged { task_id, .. }
            | QueueEvent::Removed { task_id } => *task_id,
        }
    }
}

// 静态断言确保类型是 Send 的
const _: () = {
    fn assert_send<T: Send + Sync>() {}
    fn assert_types() {
        assert_send::<UploadPayload>();
        assert_send::<QueueEvent>();
        assert_send::<TaskStatus>();
    }
};
