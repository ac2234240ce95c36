mod capacity;
mod errors;
mod guard;
mod manager;
mod persistence;
mod progress;
mod scheduler;
mod store;
mod task;
mod traits;
mod types;
mod worker;


pub use capacity::CapacityLimiter;
pub use errors::{QueueError, Result};
pub use guard::{ExtensionGuard, NoopExtension};
pub use manager::{FilteredEventReceiver, UploadManager, UploadManagerBuilder};
pub use persistence::Persister;
pub use progress::{ProgressRange, should_publish};
pub use store::{TaskStore, TransitionOutcome};
pub use task::UploadTask;
pub use traits::{
    ExecutionExtension,
    ExpiryFn,
    ExtensionHandle,
    ProgressFn,
    RecordCreator,
    StorageAdapter,
    UploadTransfer,
};
pub use types::{
    Dimensions,
    NewRecord,
    QueueEvent,
    RecordId,
    TaskId,
    TaskStatus,
    TransferUrls,
    UploadPayload,
};
