use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use super::errors::Result;
use super::task::UploadTask;
use super::types::{NewRecord, RecordId, TaskId, TransferUrls};

/// Transfer progress callback, fraction in 0.0 ~ 1.0
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Object-storage transfer - moves the raw image bytes off the device
#[async_trait]
pub trait UploadTransfer: Send + Sync {
    /// Upload the full image and its thumbnail, returning both public URLs.
    async fn transfer(
        &self,
        task_id: TaskId,
        full_image: Bytes,
        thumbnail: Bytes,
        owner_id: &str,
        on_progress: ProgressFn,
    ) -> Result<TransferUrls>;

    /// Abort the in-flight transfer for `task_id`, if any.
    async fn cancel(&self, task_id: TaskId);
}

/// Turns uploaded media into a persisted content record
#[async_trait]
pub trait RecordCreator: Send + Sync {
    async fn create_record(&self, record: NewRecord) -> Result<RecordId>;
}

/// 存储适配器 trait - 用于保存和恢复上传任务
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Write every given task as its own self-contained unit.
    async fn save_tasks(&self, tasks: &[UploadTask]) -> Result<()>;

    /// Delete the unit for `task_id`. Missing units are not an error.
    async fn delete_task(&self, task_id: TaskId) -> Result<()>;

    /// Load every readable unit, oldest first. Unreadable units are skipped.
    async fn list_tasks(&self) -> Result<Vec<UploadTask>>;
}

/// Opaque handle to an OS-granted run-time extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtensionHandle(pub u64);

pub type ExpiryFn = Box<dyn FnOnce() + Send>;

/// Host hook for "finish what you started" background execution.
pub trait ExecutionExtension: Send + Sync {
    /// Ask for extra run time. `on_expire` runs if the grant runs out first.
    fn request_extension(&self, on_expire: ExpiryFn) -> Option<ExtensionHandle>;

    fn release(&self, handle: ExtensionHandle);
}
