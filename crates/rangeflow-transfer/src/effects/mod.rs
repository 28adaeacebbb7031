//! Asynchronous orchestration and I/O.
//!
//! Everything that suspends lives here: the bounded executors, the resumable
//! download stream, the transport and source traits, and the transfer
//! orchestrators built from them. The pure chunk arithmetic they rely on is
//! in [`core`](crate::core).

mod batch;
mod memory;
mod resumable;
mod scheduler;
mod source;
mod transfer;
mod transport;

pub use batch::{Batch, Operation, run_batch};
pub use memory::{CallCounts, MemoryTransport};
pub use resumable::{Reopen, ResumableRangeStream, open_resumable_download};
pub use scheduler::{BufferScheduler, ScheduleReport, schedule_stream};
pub use source::{FileSource, Seekable};
pub use transfer::FileTransfer;
pub use transport::{BoxStream, ByteStream, RangeResponse, RangeTransport};
