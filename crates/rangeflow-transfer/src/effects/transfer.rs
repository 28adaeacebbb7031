//! Transfer orchestrators: chunked upload, chunked download and stream upload.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, Stream, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::batch::Batch;
use super::resumable::ResumableRangeStream;
use super::scheduler::{BufferScheduler, ScheduleReport};
use super::source::{Seekable, collect_exact};
use super::transport::{ByteStream, RangeTransport};
use crate::core::{
    ChunkPlan, validate_buffer_pool, validate_destination, validate_object_size,
    validate_parallelism, validate_range, validate_range_size,
};
use crate::data::{Progress, ProgressCallback, StreamUploadOptions, TransferOptions};
use crate::error::{Error, Result};

/// Moves whole objects through a [`RangeTransport`] one range at a time.
///
/// Every operation validates its parameters before the first transport call,
/// runs its ranges concurrently up to the configured limit, and reports the
/// first failure. Bytes already written before a failure are not rolled back.
#[derive(Debug, Clone)]
pub struct FileTransfer<T> {
    transport: T,
}

impl<T: RangeTransport> FileTransfer<T> {
    pub fn new(transport: T) -> Self { Self { transport } }

    pub fn transport(&self) -> &T { &self.transport }

    pub fn into_inner(self) -> T { self.transport }

    pub async fn object_size(&self) -> Result<u64> { self.transport.object_size().await }

    /// Upload `size` bytes from a seekable source.
    ///
    /// The object is created at `size` bytes first, then each range of
    /// `options.range_size` bytes is read from the source and uploaded at its
    /// offset. Progress is reported after every range with the cumulative
    /// byte count.
    pub async fn upload_seekable<S>(&self, source: &S, size: u64, options: &TransferOptions) -> Result<()>
    where
        S: Seekable + ?Sized,
    {
        validate_range_size(options.range_size, self.transport.max_range_size())?;
        validate_parallelism(options.parallelism)?;
        validate_object_size(size, self.transport.max_object_size())?;
        let plan = ChunkPlan::new(size, options.range_size)?;

        debug!(
            size,
            ranges = plan.len(),
            parallelism = options.parallelism,
            "uploading seekable source"
        );
        cancellable(&options.cancel, self.transport.create_object(size)).await?;

        let transport = &self.transport;
        let progress = Tracker::new(Some(size), options.on_progress.as_ref());
        let progress = &progress;

        let mut batch = Batch::new(options.parallelism).with_cancellation(options.cancel.clone());
        for chunk in &plan {
            batch.add_operation(async move {
                let body = source.open_at(chunk.offset, chunk.length).await?;
                let data = collect_exact(body, chunk.length).await?;
                trace!(index = chunk.index, offset = chunk.offset, len = chunk.length, "uploading range");
                transport.upload_range(chunk.offset, data).await?;
                progress.advance(chunk.length);
                Ok(())
            });
        }
        batch.run().await?;

        debug!(size, "seekable upload finished");
        Ok(())
    }

    /// Download into `buffer`, starting at `offset` of the object.
    ///
    /// With `count` unset, the object size is queried and everything from
    /// `offset` to the end is downloaded. Returns the number of bytes written
    /// to the front of `buffer`. Each range is read through a
    /// [`ResumableRangeStream`], so silent truncations are re-opened up to
    /// `options.max_retries_per_range` times.
    pub async fn download_to_buffer(
        &self,
        buffer: &mut [u8],
        offset: u64,
        count: Option<u64>,
        options: &TransferOptions,
    ) -> Result<u64> {
        validate_range_size(options.range_size, self.transport.max_range_size())?;
        validate_parallelism(options.parallelism)?;
        if let Some(count) = count {
            validate_destination(buffer.len(), count)?;
        }

        let count = match count {
            Some(count) => count,
            None => {
                let size = cancellable(&options.cancel, self.transport.object_size()).await?;
                if offset > size {
                    return Err(Error::invalid(
                        "offset",
                        format!("{offset} is past the end of a {size}-byte object"),
                    ));
                }
                let count = size - offset;
                validate_destination(buffer.len(), count)?;
                count
            }
        };
        validate_range(offset, count)?;
        if count == 0 {
            return Ok(0);
        }

        let plan = ChunkPlan::new(count, options.range_size)?;
        let range_size = usize::try_from(options.range_size)
            .map_err(|_| Error::invalid("range_size", "does not fit in memory"))?;
        debug!(
            offset,
            count,
            ranges = plan.len(),
            parallelism = options.parallelism,
            "downloading to buffer"
        );

        let transport = &self.transport;
        let progress = Tracker::new(Some(count), options.on_progress.as_ref());
        let progress = &progress;
        let max_retries = options.max_retries_per_range;
        let cancel = &options.cancel;

        // `count` fits in `buffer`, so it fits in usize.
        let destination = &mut buffer[..count as usize];
        let mut batch = Batch::new(options.parallelism).with_cancellation(cancel.clone());
        for (slot, chunk) in destination.chunks_mut(range_size).zip(&plan) {
            batch.add_operation(async move {
                let start = offset + chunk.offset;
                let mut body =
                    open_resumable(transport, start, chunk.length, Extent::Exact, max_retries, cancel).await?;
                let mut filled = 0;
                while let Some(bytes) = body.try_next().await? {
                    slot[filled..filled + bytes.len()].copy_from_slice(&bytes);
                    filled += bytes.len();
                }
                debug_assert_eq!(filled, slot.len());
                trace!(index = chunk.index, offset = start, retries = body.retries_used(), "range downloaded");
                progress.advance(chunk.length);
                Ok(())
            });
        }
        batch.run().await?;

        debug!(count, "download finished");
        Ok(count)
    }

    /// Upload a stream of unknown length that will not exceed `size` bytes.
    ///
    /// The object is created at `size` bytes, then the stream is staged
    /// through a [`BufferScheduler`] and each buffer is uploaded at its offset.
    /// A stream longer than `size` fails with [`Error::SourceTooLarge`].
    pub async fn upload_stream<S>(
        &self,
        source: S,
        size: u64,
        options: &StreamUploadOptions,
    ) -> Result<ScheduleReport>
    where
        S: Stream<Item = Result<Bytes>> + Send,
    {
        let scheduler = options.scheduler;
        validate_buffer_pool(
            scheduler.buffer_size,
            scheduler.max_buffers,
            self.transport.max_range_size(),
        )?;
        validate_parallelism(scheduler.concurrency)?;
        validate_object_size(size, self.transport.max_object_size())?;

        debug!(
            size,
            buffer_size = scheduler.buffer_size,
            max_buffers = scheduler.max_buffers,
            "uploading stream"
        );
        cancellable(&options.cancel, self.transport.create_object(size)).await?;

        let transport = &self.transport;
        let progress = Tracker::new(Some(size), options.on_progress.as_ref());
        let progress = &progress;
        let handler = move |data: Bytes, offset: u64| async move {
            let len = data.len() as u64;
            if offset + len > size {
                return Err(Error::SourceTooLarge { size });
            }
            transport.upload_range(offset, data).await?;
            progress.advance(len);
            Ok(())
        };

        let report = BufferScheduler::new(source, handler, scheduler)?
            .with_cancellation(options.cancel.clone())
            .run()
            .await?;
        debug!(bytes = report.bytes_read, buffers = report.buffers_dispatched, "stream upload finished");
        Ok(report)
    }

    /// Open one resumable stream over at most `count` bytes from `offset`.
    ///
    /// The stream's end is derived from the length the transport declares
    /// for the first response, so a `count` running past the end of the
    /// object yields just the available tail.
    pub async fn open_range(
        &self,
        offset: u64,
        count: u64,
        options: &TransferOptions,
    ) -> Result<ResumableRangeStream<'_>> {
        let max = self.transport.max_range_size();
        if count == 0 || count > max {
            return Err(Error::invalid("count", format!("{count} is outside 1..={max}")));
        }
        validate_range(offset, count)?;

        open_resumable(
            &self.transport,
            offset,
            count,
            Extent::UpTo,
            options.max_retries_per_range,
            &options.cancel,
        )
        .await
    }
}

/// How the first response's declared length bounds a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extent {
    /// The transport must declare exactly the requested length.
    Exact,
    /// The transport may declare a shorter tail; the range ends there.
    UpTo,
}

async fn open_resumable<'t, T: RangeTransport>(
    transport: &'t T,
    start: u64,
    requested: u64,
    extent: Extent,
    max_retries: u32,
    cancel: &CancellationToken,
) -> Result<ResumableRangeStream<'t>> {
    let response = cancellable(cancel, transport.download_range(start, requested)).await?;
    let declared = response.content_length;
    if declared > requested {
        return Err(Error::UnexpectedData {
            position: start.saturating_add(declared),
            end:      start.saturating_add(requested),
        });
    }
    if declared < requested && extent == Extent::Exact {
        return Err(Error::rejected(format!(
            "declared {declared} bytes for a {requested}-byte range at {start}"
        )));
    }

    let end = validate_range(start, declared)?;
    let reopen = move |from: u64| -> BoxFuture<'t, Result<ByteStream<'t>>> {
        async move { Ok(transport.download_range(from, end - from).await?.body) }.boxed()
    };
    Ok(ResumableRangeStream::new(response.body, start, declared, reopen, max_retries)?
        .with_cancellation(cancel.clone()))
}

async fn cancellable<F, R>(cancel: &CancellationToken, call: F) -> Result<R>
where
    F: Future<Output = Result<R>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        outcome = call => outcome,
    }
}

/// Cumulative byte counter shared by the ranges of one transfer.
struct Tracker<'a> {
    transferred: AtomicU64,
    total:       Option<u64>,
    callback:    Option<&'a ProgressCallback>,
}

impl<'a> Tracker<'a> {
    fn new(total: Option<u64>, callback: Option<&'a ProgressCallback>) -> Self {
        Self {
            transferred: AtomicU64::new(0),
            total,
            callback,
        }
    }

    fn advance(&self, bytes: u64) {
        let transferred = self.transferred.fetch_add(bytes, Ordering::SeqCst) + bytes;
        if let Some(callback) = self.callback {
            callback(&Progress::new(transferred, self.total));
        }
    }
}
