use std::sync::Arc;

/// Callback invoked with the cumulative transfer state after each chunk settles.
///
/// Chunks may finish out of order and the callback may be invoked from any of
/// them, but `bytes_transferred` never decreases between invocations.
pub type ProgressCallback = Arc<dyn Fn(&Progress) + Send + Sync>;

/// Snapshot of a running transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes confirmed by the transport so far.
    pub bytes_transferred: u64,

    /// Total bytes the transfer will move, when known up front.
    ///
    /// Streaming uploads only know their declared upper bound, so this may be
    /// larger than the final `bytes_transferred`.
    pub total_bytes: Option<u64>,
}

impl Progress {
    pub fn new(bytes_transferred: u64, total_bytes: Option<u64>) -> Self {
        Self {
            bytes_transferred,
            total_bytes,
        }
    }

    /// Calculate the percentage of completion.
    ///
    /// Returns `None` if `total_bytes` is unknown.
    #[must_use]
    pub fn percentage(&self) -> Option<f64> {
        self.total_bytes.map(|total| {
            if total == 0 {
                100.0
            } else {
                (self.bytes_transferred as f64 / total as f64) * 100.0
            }
        })
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.total_bytes
            .is_some_and(|total| self.bytes_transferred >= total)
    }
}
