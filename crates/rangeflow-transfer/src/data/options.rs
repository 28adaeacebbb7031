use std::fmt;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::progress::ProgressCallback;
use crate::core::{
    DEFAULT_MAX_RETRIES_PER_RANGE, DEFAULT_PARALLELISM, RANGE_MAX_SIZE,
    default_dispatch_concurrency,
};

/// Configuration for chunked transfers over a seekable source or into a buffer.
///
/// The tunables deserialize with defaults for missing fields, so a host
/// application can embed them in its own configuration file.
///
/// # Examples
///
/// ```
/// use rangeflow_transfer::TransferOptions;
/// use std::sync::Arc;
///
/// let options = TransferOptions::default()
///     .range_size(1024 * 1024)
///     .parallelism(8)
///     .on_progress(Arc::new(|p| println!("{} bytes", p.bytes_transferred)));
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferOptions {
    /// Size of each range operation in bytes.
    ///
    /// Must not exceed the transport's maximum range size.
    ///
    /// Default: 4 MiB
    pub range_size: u64,

    /// Maximum number of range operations in flight at once.
    ///
    /// Default: 5
    pub parallelism: usize,

    /// How many times a silently truncated download range is re-opened
    /// before the transfer fails.
    ///
    /// Default: 5
    pub max_retries_per_range: u32,

    /// Progress callback invoked after each range completes.
    ///
    /// Default: None
    #[serde(skip)]
    pub on_progress: Option<ProgressCallback>,

    /// Cancellation signal observed at every suspension point.
    ///
    /// Default: a token nobody cancels
    #[serde(skip)]
    pub cancel: CancellationToken,
}

impl fmt::Debug for TransferOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferOptions")
            .field("range_size", &self.range_size)
            .field("parallelism", &self.parallelism)
            .field("max_retries_per_range", &self.max_retries_per_range)
            .field("on_progress", &self.on_progress.as_ref().map(|_| "{ ... }"))
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            range_size:            RANGE_MAX_SIZE,
            parallelism:           DEFAULT_PARALLELISM,
            max_retries_per_range: DEFAULT_MAX_RETRIES_PER_RANGE,
            on_progress:           None,
            cancel:                CancellationToken::new(),
        }
    }
}

impl TransferOptions {
    #[must_use]
    pub fn range_size(mut self, range_size: u64) -> Self {
        self.range_size = range_size;
        self
    }

    #[must_use]
    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    #[must_use]
    pub fn max_retries_per_range(mut self, max_retries_per_range: u32) -> Self {
        self.max_retries_per_range = max_retries_per_range;
        self
    }

    #[must_use]
    pub fn on_progress(mut self, on_progress: ProgressCallback) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    #[must_use]
    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Shape of a [`BufferScheduler`](crate::BufferScheduler) buffer pool.
///
/// When deserialized without `concurrency`, the dispatch concurrency is
/// derived from the configured `max_buffers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SchedulerConfig")]
pub struct SchedulerOptions {
    /// Capacity of each pooled buffer; also the size of every dispatched
    /// buffer except possibly the last.
    pub buffer_size: usize,

    /// Upper bound on buffers that exist at once.
    pub max_buffers: usize,

    /// Maximum number of outgoing handlers running at once.
    ///
    /// Should be lower than `max_buffers` so reading can continue while
    /// handlers run; values at or above it are clamped.
    pub concurrency: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self { Self::new(RANGE_MAX_SIZE as usize, 8) }
}

impl SchedulerOptions {
    /// Pool of `max_buffers` buffers of `buffer_size` bytes with the default
    /// dispatch concurrency.
    pub fn new(buffer_size: usize, max_buffers: usize) -> Self {
        Self {
            buffer_size,
            max_buffers,
            concurrency: default_dispatch_concurrency(max_buffers),
        }
    }

    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct SchedulerConfig {
    buffer_size: usize,
    max_buffers: usize,
    concurrency: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let defaults = SchedulerOptions::default();
        Self {
            buffer_size: defaults.buffer_size,
            max_buffers: defaults.max_buffers,
            concurrency: None,
        }
    }
}

impl From<SchedulerConfig> for SchedulerOptions {
    fn from(config: SchedulerConfig) -> Self {
        let options = Self::new(config.buffer_size, config.max_buffers);
        match config.concurrency {
            Some(concurrency) => options.concurrency(concurrency),
            None => options,
        }
    }
}

/// Configuration for uploading an unbounded stream.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamUploadOptions {
    /// Buffer pool used to stage the stream.
    ///
    /// Default: eight 4 MiB buffers, six dispatched at once
    pub scheduler: SchedulerOptions,

    /// Progress callback invoked after each buffer is uploaded.
    #[serde(skip)]
    pub on_progress: Option<ProgressCallback>,

    #[serde(skip)]
    pub cancel: CancellationToken,
}

impl fmt::Debug for StreamUploadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamUploadOptions")
            .field("scheduler", &self.scheduler)
            .field("on_progress", &self.on_progress.as_ref().map(|_| "{ ... }"))
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Default for StreamUploadOptions {
    fn default() -> Self {
        Self {
            scheduler:   SchedulerOptions::default(),
            on_progress: None,
            cancel:      CancellationToken::new(),
        }
    }
}

impl StreamUploadOptions {
    /// Stage the stream in `max_buffers` buffers of `buffer_size` bytes.
    pub fn new(buffer_size: usize, max_buffers: usize) -> Self {
        Self {
            scheduler: SchedulerOptions::new(buffer_size, max_buffers),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.scheduler.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn on_progress(mut self, on_progress: ProgressCallback) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    #[must_use]
    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_options_default() {
        let options = TransferOptions::default();
        assert_eq!(options.range_size, RANGE_MAX_SIZE);
        assert_eq!(options.parallelism, 5);
        assert_eq!(options.max_retries_per_range, 5);
        assert!(options.on_progress.is_none());
        assert!(!options.cancel.is_cancelled());
    }

    #[test]
    fn test_transfer_options_partial_config() {
        let options: TransferOptions =
            serde_json::from_str(r#"{ "parallelism": 3, "range_size": 1048576 }"#).unwrap();
        assert_eq!(options.parallelism, 3);
        assert_eq!(options.range_size, 1024 * 1024);
        assert_eq!(options.max_retries_per_range, 5);
    }

    #[test]
    fn test_transfer_options_serialize_skips_callbacks() {
        let options = TransferOptions::default().on_progress(std::sync::Arc::new(|_| {}));
        let json = serde_json::to_value(&options).unwrap();
        assert!(json.get("on_progress").is_none());
        assert!(json.get("cancel").is_none());
        assert_eq!(json["parallelism"], 5);
    }

    #[test]
    fn test_scheduler_options_defaults() {
        let options = SchedulerOptions::new(1024, 4);
        assert_eq!(options.concurrency, 3);
        assert_eq!(SchedulerOptions::default().max_buffers, 8);
        assert_eq!(SchedulerOptions::default().concurrency, 6);
    }

    #[test]
    fn test_stream_upload_options_from_config() {
        let options: StreamUploadOptions = serde_json::from_str(
            r#"{ "scheduler": { "buffer_size": 2048, "max_buffers": 4, "concurrency": 2 } }"#,
        )
        .unwrap();
        assert_eq!(options.scheduler, SchedulerOptions::new(2048, 4).concurrency(2));
    }

    #[test]
    fn test_scheduler_concurrency_follows_configured_pool() {
        let options: SchedulerOptions =
            serde_json::from_str(r#"{ "buffer_size": 2048, "max_buffers": 4 }"#).unwrap();
        assert_eq!(options, SchedulerOptions::new(2048, 4));
        assert_eq!(options.concurrency, 3);

        let options: SchedulerOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, SchedulerOptions::default());
    }

    #[test]
    fn test_debug_hides_callback() {
        let options = TransferOptions::default().on_progress(std::sync::Arc::new(|_| {}));
        let rendered = format!("{options:?}");
        assert!(rendered.contains("{ ... }"));
    }
}
