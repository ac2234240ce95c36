pub mod progress_stream;
pub mod simple;

pub use progress_stream::{ProgressStream, chunked};
pub use simple::{SimpleConfig, SimpleUploader};
