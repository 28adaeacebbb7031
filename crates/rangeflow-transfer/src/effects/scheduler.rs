//! Streaming producer/consumer pipeline over a fixed pool of buffers.
//!
//! The scheduler pulls chunks from a source stream of unknown length, packs
//! them into pooled buffers of `buffer_size` bytes and hands every full buffer
//! (plus the final short one) to an outgoing handler together with its
//! destination offset. Each buffer moves through
//! `FREE -> FILLING -> FULL -> DISPATCHED -> FREE`.
//!
//! At most `max_buffers` buffers ever exist. When all of them are filling,
//! full or dispatched the source is not polled, which bounds memory to
//! `max_buffers * buffer_size` no matter how fast the source produces.

use std::collections::VecDeque;
use std::future::Future;

use bytes::{Bytes, BytesMut};
use futures_util::stream::{FuturesUnordered, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::data::SchedulerOptions;
use crate::error::{Error, Result};

/// Summary of a completed schedule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    /// Bytes consumed from the source and handed to the handler.
    pub bytes_read:         u64,
    /// Number of handler invocations.
    pub buffers_dispatched: usize,
    /// Buffers allocated over the whole run; never above `max_buffers`.
    pub buffers_allocated:  usize,
    /// Most buffers simultaneously filling, full or dispatched.
    pub peak_outstanding:   usize,
}

struct Slot {
    id:  usize,
    buf: BytesMut,
}

struct Pool {
    free:        Vec<Slot>,
    allocated:   usize,
    max:         usize,
    buffer_size: usize,
    peak:        usize,
}

impl Pool {
    fn new(max: usize, buffer_size: usize) -> Self {
        Self {
            free: Vec::with_capacity(max),
            allocated: 0,
            max,
            buffer_size,
            peak: 0,
        }
    }

    fn available(&self) -> bool { !self.free.is_empty() || self.allocated < self.max }

    fn acquire(&mut self) -> Option<Slot> {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None if self.allocated < self.max => {
                self.allocated += 1;
                Slot {
                    id:  self.allocated - 1,
                    buf: BytesMut::with_capacity(self.buffer_size),
                }
            }
            None => return None,
        };
        self.peak = self.peak.max(self.outstanding());
        Some(slot)
    }

    /// Return a slot once its handler settled. The split-off payload was
    /// dropped by then, so `reserve` reclaims the original allocation.
    fn release(&mut self, mut slot: Slot) {
        slot.buf.clear();
        slot.buf.reserve(self.buffer_size);
        self.free.push(slot);
    }

    fn outstanding(&self) -> usize { self.allocated - self.free.len() }
}

async fn settle<F>(slot: Slot, handler: F) -> (Slot, Result<()>)
where
    F: Future<Output = Result<()>>,
{
    let outcome = handler.await;
    (slot, outcome)
}

/// Bounded-memory pipeline from a byte stream to an outgoing handler.
///
/// The handler receives each buffer's contents and the offset of its first
/// byte, counted from the start of the source. Handlers may complete in any
/// order.
pub struct BufferScheduler<S, H> {
    source:  S,
    handler: H,
    options: SchedulerOptions,
    cancel:  CancellationToken,
}

impl<S, H, Fut> BufferScheduler<S, H>
where
    S: Stream<Item = Result<Bytes>>,
    H: Fn(Bytes, u64) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    /// Validate `options` and build a scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `buffer_size`, `max_buffers` or
    /// `concurrency` is zero.
    pub fn new(source: S, handler: H, options: SchedulerOptions) -> Result<Self> {
        crate::core::validate_buffer_pool(options.buffer_size, options.max_buffers, u64::MAX)?;
        if options.concurrency == 0 {
            return Err(Error::invalid("concurrency", "must be at least 1"));
        }
        Ok(Self {
            source,
            handler,
            options,
            cancel: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Drive the source to exhaustion through the handler.
    ///
    /// Succeeds once the source ended and every dispatched buffer was handled.
    /// On the first handler or source error, reading and dispatching stop,
    /// in-flight handlers are drained, and that first error is returned.
    pub async fn run(self) -> Result<ScheduleReport> {
        let Self {
            source,
            handler,
            options,
            cancel,
        } = self;
        let SchedulerOptions {
            buffer_size,
            max_buffers,
            concurrency,
        } = options;

        if concurrency >= max_buffers {
            warn!(
                concurrency,
                max_buffers, "dispatch concurrency should be lower than max_buffers"
            );
        }
        let concurrency = concurrency.min(max_buffers);

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut source = std::pin::pin!(source);
        let mut pool = Pool::new(max_buffers, buffer_size);
        let mut filling: Option<(Slot, u64)> = None;
        let mut full: VecDeque<(Slot, u64)> = VecDeque::new();
        let mut pending: Option<Bytes> = None;
        let mut in_flight = FuturesUnordered::new();

        let mut consumed = 0u64;
        let mut dispatched = 0usize;
        let mut source_done = false;
        let mut failure: Option<Error> = None;

        loop {
            if failure.is_none() {
                // FREE/FILLING -> FULL: pack buffered input into slots.
                while let Some(mut input) = pending.take() {
                    let (mut slot, offset) = match filling.take() {
                        Some(filling) => filling,
                        None => match pool.acquire() {
                            Some(slot) => (slot, consumed),
                            None => {
                                pending = Some(input);
                                break;
                            }
                        },
                    };
                    let take = (buffer_size - slot.buf.len()).min(input.len());
                    slot.buf.extend_from_slice(&input.split_to(take));
                    consumed += take as u64;

                    if slot.buf.len() == buffer_size {
                        full.push_back((slot, offset));
                    } else {
                        filling = Some((slot, offset));
                    }
                    if !input.is_empty() {
                        pending = Some(input);
                    }
                }

                if source_done && pending.is_none() {
                    if let Some(last) = filling.take() {
                        full.push_back(last);
                    }
                }

                // FULL -> DISPATCHED
                while in_flight.len() < concurrency {
                    let Some((mut slot, offset)) = full.pop_front() else {
                        break;
                    };
                    let data = slot.buf.split().freeze();
                    trace!(slot = slot.id, offset, len = data.len(), "dispatching buffer");
                    dispatched += 1;
                    in_flight.push(settle(slot, handler(data, offset)));
                }
            }

            let can_read = failure.is_none()
                && !source_done
                && pending.is_none()
                && (filling.is_some() || pool.available());

            if !can_read && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(in_flight = in_flight.len(), "buffer scheduler cancelled");
                    return Err(Error::Cancelled);
                }
                // DISPATCHED -> FREE
                Some((slot, outcome)) = in_flight.next(), if !in_flight.is_empty() => {
                    trace!(slot = slot.id, "buffer handled");
                    pool.release(slot);
                    if let Err(err) = outcome {
                        if failure.is_none() {
                            debug!(error = %err, in_flight = in_flight.len(), "outgoing handler failed, draining");
                            failure = Some(err);
                        } else {
                            debug!(error = %err, "discarding handler error after first failure");
                        }
                    }
                }
                item = source.next(), if can_read => match item {
                    Some(Ok(chunk)) => {
                        if !chunk.is_empty() {
                            pending = Some(chunk);
                        }
                    }
                    Some(Err(err)) => {
                        debug!(error = %err, in_flight = in_flight.len(), "source failed, draining");
                        failure = Some(err);
                    }
                    None => source_done = true,
                },
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }
        debug_assert!(source_done && pending.is_none() && filling.is_none() && full.is_empty());

        let report = ScheduleReport {
            bytes_read:         consumed,
            buffers_dispatched: dispatched,
            buffers_allocated:  pool.allocated,
            peak_outstanding:   pool.peak,
        };
        debug!(
            bytes = report.bytes_read,
            buffers = report.buffers_dispatched,
            allocated = report.buffers_allocated,
            "buffer scheduler finished"
        );
        Ok(report)
    }
}

/// Pipe `source` through `handler` using `max_buffers` buffers of
/// `buffer_size` bytes and at most `concurrency` handlers at once.
pub async fn schedule_stream<S, H, Fut>(
    source: S,
    buffer_size: usize,
    max_buffers: usize,
    handler: H,
    concurrency: usize,
) -> Result<ScheduleReport>
where
    S: Stream<Item = Result<Bytes>>,
    H: Fn(Bytes, u64) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let options = SchedulerOptions::new(buffer_size, max_buffers).concurrency(concurrency);
    BufferScheduler::new(source, handler, options)?.run().await
}
