//! In-process [`RangeTransport`] backed by a byte vector.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream;
use tracing::trace;

use super::transport::{RangeResponse, RangeTransport};
use crate::core::{OBJECT_MAX_SIZE, RANGE_MAX_SIZE};
use crate::error::{Error, Result};

/// Number of calls made to each transport method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create:   usize,
    pub upload:   usize,
    pub download: usize,
    pub size:     usize,
}

impl CallCounts {
    pub fn total(&self) -> usize { self.create + self.upload + self.download + self.size }
}

#[derive(Debug, Default)]
struct Faults {
    truncate_after:   u64,
    truncations_left: usize,
    fail_upload_at:   Option<u64>,
}

#[derive(Debug, Default)]
struct Counters {
    create:         AtomicUsize,
    upload:         AtomicUsize,
    download:       AtomicUsize,
    size:           AtomicUsize,
    active_uploads: AtomicUsize,
    peak_uploads:   AtomicUsize,
}

/// A remote object simulated in memory.
///
/// Useful for tests and for local pipelines that want the engine's chunking
/// without a network. Downloads are served in pieces of `piece_size` bytes,
/// and faults can be injected to exercise truncation and failure handling.
///
/// # Examples
///
/// ```
/// use rangeflow_transfer::{FileTransfer, MemoryTransport, TransferOptions};
///
/// # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
/// # rt.block_on(async {
/// let transfer = FileTransfer::new(MemoryTransport::with_object(vec![7u8; 100]));
/// let mut buffer = vec![0u8; 100];
/// let read = transfer
///     .download_to_buffer(&mut buffer, 0, None, &TransferOptions::default())
///     .await
///     .unwrap();
/// assert_eq!(read, 100);
/// # });
/// ```
pub struct MemoryTransport {
    object:          Mutex<Option<Vec<u8>>>,
    uploads:         Mutex<Vec<(u64, u64)>>,
    faults:          Mutex<Faults>,
    counters:        Counters,
    max_range_size:  u64,
    max_object_size: u64,
    piece_size:      usize,
    latency:         Option<Duration>,
}

impl Default for MemoryTransport {
    fn default() -> Self { Self::new() }
}

impl MemoryTransport {
    /// A transport whose object does not exist yet.
    pub fn new() -> Self {
        Self {
            object:          Mutex::new(None),
            uploads:         Mutex::new(Vec::new()),
            faults:          Mutex::new(Faults::default()),
            counters:        Counters::default(),
            max_range_size:  RANGE_MAX_SIZE,
            max_object_size: OBJECT_MAX_SIZE,
            piece_size:      64 * 1024,
            latency:         None,
        }
    }

    /// A transport whose object already holds `data`.
    pub fn with_object(data: impl Into<Vec<u8>>) -> Self {
        let transport = Self::new();
        *lock(&transport.object) = Some(data.into());
        transport
    }

    #[must_use]
    pub fn with_max_range_size(mut self, max_range_size: u64) -> Self {
        self.max_range_size = max_range_size;
        self
    }

    #[must_use]
    pub fn with_max_object_size(mut self, max_object_size: u64) -> Self {
        self.max_object_size = max_object_size;
        self
    }

    /// Largest piece a download body yields at once.
    #[must_use]
    pub fn piece_size(mut self, piece_size: usize) -> Self {
        self.piece_size = piece_size.max(1);
        self
    }

    /// Delay every call by `latency`.
    #[must_use]
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// End the next `times` download bodies cleanly after `after_bytes` bytes.
    pub fn truncate_downloads(&self, after_bytes: u64, times: usize) {
        let mut faults = lock(&self.faults);
        faults.truncate_after = after_bytes;
        faults.truncations_left = times;
    }

    /// Reject every upload that starts at `offset`.
    pub fn fail_uploads_at(&self, offset: u64) { lock(&self.faults).fail_upload_at = Some(offset); }

    /// Current object contents, or `None` if it was never created.
    pub fn contents(&self) -> Option<Vec<u8>> { lock(&self.object).clone() }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            create:   self.counters.create.load(Ordering::SeqCst),
            upload:   self.counters.upload.load(Ordering::SeqCst),
            download: self.counters.download.load(Ordering::SeqCst),
            size:     self.counters.size.load(Ordering::SeqCst),
        }
    }

    /// Successful uploads as `(offset, length)`, sorted by offset.
    pub fn uploads(&self) -> Vec<(u64, u64)> {
        let mut uploads = lock(&self.uploads).clone();
        uploads.sort_unstable();
        uploads
    }

    /// Most uploads observed in flight at once.
    pub fn peak_concurrent_uploads(&self) -> usize { self.counters.peak_uploads.load(Ordering::SeqCst) }

    async fn delay(&self) {
        match self.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        if lock(&self.faults).fail_upload_at == Some(offset) {
            return Err(Error::rejected(format!("injected failure at offset {offset}")));
        }
        if data.len() as u64 > self.max_range_size {
            return Err(Error::rejected(format!(
                "range of {} bytes exceeds the limit of {}",
                data.len(),
                self.max_range_size
            )));
        }

        let mut object = lock(&self.object);
        let object = object
            .as_mut()
            .ok_or_else(|| Error::rejected("object does not exist"))?;
        let end = offset + data.len() as u64;
        if end > object.len() as u64 {
            return Err(Error::rejected(format!(
                "range {offset}..{end} exceeds object size {}",
                object.len()
            )));
        }
        object[offset as usize..end as usize].copy_from_slice(data);
        lock(&self.uploads).push((offset, data.len() as u64));
        Ok(())
    }
}

impl RangeTransport for MemoryTransport {
    async fn create_object(&self, size: u64) -> Result<()> {
        self.counters.create.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if size > self.max_object_size {
            return Err(Error::rejected(format!(
                "object size {size} exceeds the limit of {}",
                self.max_object_size
            )));
        }
        let len = usize::try_from(size)
            .map_err(|_| Error::rejected(format!("object size {size} does not fit in memory")))?;
        *lock(&self.object) = Some(vec![0; len]);
        trace!(size, "memory object created");
        Ok(())
    }

    async fn upload_range(&self, offset: u64, data: Bytes) -> Result<()> {
        self.counters.upload.fetch_add(1, Ordering::SeqCst);
        let active = self.counters.active_uploads.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak_uploads.fetch_max(active, Ordering::SeqCst);

        self.delay().await;
        let outcome = self.write(offset, &data);

        self.counters.active_uploads.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn download_range(&self, offset: u64, length: u64) -> Result<RangeResponse<'_>> {
        self.counters.download.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let data = {
            let object = lock(&self.object);
            let object = object
                .as_ref()
                .ok_or_else(|| Error::rejected("object does not exist"))?;
            let size = object.len() as u64;
            if offset > size || (offset == size && length > 0) {
                return Err(Error::rejected(format!(
                    "range at {offset} is not satisfiable for object size {size}"
                )));
            }
            let end = offset.saturating_add(length).min(size);
            Bytes::copy_from_slice(&object[offset as usize..end as usize])
        };
        let declared = data.len() as u64;

        let delivered = {
            let mut faults = lock(&self.faults);
            if faults.truncations_left > 0 {
                faults.truncations_left -= 1;
                trace!(offset, length, after = faults.truncate_after, "truncating download");
                data.slice(..(faults.truncate_after.min(declared) as usize))
            } else {
                data
            }
        };

        let piece_size = self.piece_size;
        let pieces: Vec<Result<Bytes>> = (0..delivered.len())
            .step_by(piece_size)
            .map(|at| Ok(delivered.slice(at..(at + piece_size).min(delivered.len()))))
            .collect();

        Ok(RangeResponse {
            body:           Box::pin(stream::iter(pieces)),
            content_length: declared,
        })
    }

    async fn object_size(&self) -> Result<u64> {
        self.counters.size.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        lock(&self.object)
            .as_ref()
            .map(|object| object.len() as u64)
            .ok_or_else(|| Error::rejected("object does not exist"))
    }

    fn max_range_size(&self) -> u64 { self.max_range_size }

    fn max_object_size(&self) -> u64 { self.max_object_size }
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("size", &lock(&self.object).as_ref().map(Vec::len))
            .field("max_range_size", &self.max_range_size)
            .field("max_object_size", &self.max_object_size)
            .field("calls", &self.calls())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> { mutex.lock().unwrap_or_else(PoisonError::into_inner) }
