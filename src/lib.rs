pub mod config;
pub mod core;
pub mod records;
pub mod storage;
pub mod uploaders;
pub mod utils;

// 重新导出核心类型
pub use crate::core::{
    Dimensions,
    QueueError,
    QueueEvent,
    RecordId,
    Result,
    TaskId,
    TaskStatus,
    UploadManager,
    UploadManagerBuilder,
    UploadPayload,
    UploadTask,
};

pub use config::{AppConfig, SchedulerConfig};
pub use records::HttpRecordCreator;
pub use storage::DiskStorage;
pub use uploaders::{SimpleConfig, SimpleUploader};
