//! Data layer: immutable configuration and progress types.

mod options;
mod progress;

pub use options::{SchedulerOptions, StreamUploadOptions, TransferOptions};
pub use progress::{Progress, ProgressCallback};
