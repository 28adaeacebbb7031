//! Chunked, concurrent transfers of large objects through a range-addressable
//! transport.
//!
//! # Architecture
//!
//! This crate follows the three-layer pattern:
//! - [`data`] - Immutable configuration and progress types
//! - [`core`] - Pure chunk planning and parameter validation
//! - [`effects`] - Asynchronous orchestration behind the [`RangeTransport`] trait
//!
//! # Key Features
//!
//! - **Bounded Concurrency**: [`Batch`] runs independent range operations with
//!   a fixed limit, failing fast and draining what already started
//! - **Bounded Memory**: [`BufferScheduler`] stages an unbounded stream through
//!   a fixed pool of buffers and stops reading while the pool is exhausted
//! - **Silent Truncation Recovery**: [`ResumableRangeStream`] re-opens a range
//!   at the first missing byte when a download ends early without an error
//! - **Mechanism-Only**: No wire protocol; callers supply the transport and
//!   handle progress UI

pub mod core;
pub mod data;
pub mod effects;
mod error;

pub use data::{Progress, ProgressCallback, SchedulerOptions, StreamUploadOptions, TransferOptions};
pub use effects::{
    Batch, BoxStream, BufferScheduler, ByteStream, CallCounts, FileSource, FileTransfer,
    MemoryTransport, Operation, RangeResponse, RangeTransport, Reopen, ResumableRangeStream,
    ScheduleReport, Seekable, open_resumable_download, run_batch, schedule_stream,
};
pub use error::{BoxError, Error, Result, TransportErrorKind};
