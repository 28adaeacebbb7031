//! Download streams that survive silent truncation.
//!
//! A range download can end cleanly before delivering its declared length,
//! for example when an intermediary closes the connection early. The
//! transport cannot tell that apart from success, so [`ResumableRangeStream`]
//! checks the delivered byte count and re-opens the range at the first
//! missing byte until the range is complete or the retry budget runs out.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures_util::Stream;
use futures_util::future::BoxFuture;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{trace, warn};

use super::transport::ByteStream;
use crate::core::validate_range;
use crate::error::{Error, Result};

/// Factory re-opening the range at an absolute offset.
///
/// The returned stream must cover `[from, end)` of the original range.
pub type Reopen<'a> = Box<dyn FnMut(u64) -> BoxFuture<'a, Result<ByteStream<'a>>> + Send + 'a>;

enum State<'a> {
    Streaming(ByteStream<'a>),
    Reopening(BoxFuture<'a, Result<ByteStream<'a>>>),
    Finished,
}

/// One continuous byte stream over `[start, start + length)` of a remote
/// object, stitched together from as many underlying streams as needed.
///
/// Bytes are yielded in strictly increasing offset order with no gaps or
/// duplicates. A genuine transport error from the underlying stream or from
/// the reopen call is yielded as-is without consuming the retry budget.
pub struct ResumableRangeStream<'a> {
    state:             State<'a>,
    reopen:            Reopen<'a>,
    position:          u64,
    end:               u64,
    retries_remaining: u32,
    retries_used:      u32,
    cancelled:         Option<Pin<Box<WaitForCancellationFutureOwned>>>,
}

impl<'a> ResumableRangeStream<'a> {
    /// Wrap `initial`, which starts at `start`, so that it delivers exactly
    /// `length` bytes, calling `reopen` at most `max_retries` times.
    ///
    /// Fails with [`Error::InvalidArgument`] if the range end overflows `u64`.
    pub fn new<F>(
        initial: ByteStream<'a>,
        start: u64,
        length: u64,
        reopen: F,
        max_retries: u32,
    ) -> Result<Self>
    where
        F: FnMut(u64) -> BoxFuture<'a, Result<ByteStream<'a>>> + Send + 'a,
    {
        let end = validate_range(start, length)?;
        let state = if length == 0 {
            State::Finished
        } else {
            State::Streaming(initial)
        };
        Ok(Self {
            state,
            reopen: Box::new(reopen),
            position: start,
            end,
            retries_remaining: max_retries,
            retries_used: 0,
            cancelled: None,
        })
    }

    /// Fail with [`Error::Cancelled`] as soon as `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancelled = Some(Box::pin(cancel.cancelled_owned()));
        self
    }

    /// Absolute offset of the next byte to deliver.
    pub fn position(&self) -> u64 { self.position }

    /// Absolute offset one past the last byte of the range.
    pub fn end(&self) -> u64 { self.end }

    pub fn retries_remaining(&self) -> u32 { self.retries_remaining }

    pub fn retries_used(&self) -> u32 { self.retries_used }

    fn fail(&mut self, err: Error) -> Poll<Option<Result<Bytes>>> {
        self.state = State::Finished;
        self.cancelled = None;
        Poll::Ready(Some(Err(err)))
    }
}

impl Stream for ResumableRangeStream<'_> {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if matches!(this.state, State::Finished) {
            return Poll::Ready(None);
        }
        if let Some(cancelled) = this.cancelled.as_mut() {
            if cancelled.as_mut().poll(cx).is_ready() {
                trace!(position = this.position, "resumable download cancelled");
                return this.fail(Error::Cancelled);
            }
        }

        loop {
            match &mut this.state {
                State::Finished => return Poll::Ready(None),
                State::Reopening(reopening) => match ready!(reopening.as_mut().poll(cx)) {
                    Ok(body) => this.state = State::Streaming(body),
                    Err(err) => return this.fail(err),
                },
                State::Streaming(body) => match ready!(body.as_mut().poll_next(cx)) {
                    Some(Ok(chunk)) => {
                        let len = chunk.len() as u64;
                        if len > this.end - this.position {
                            let err = Error::UnexpectedData {
                                position: this.position + len,
                                end:      this.end,
                            };
                            return this.fail(err);
                        }
                        if len == 0 {
                            continue;
                        }
                        this.position += len;
                        if this.position == this.end {
                            this.state = State::Finished;
                            this.cancelled = None;
                        }
                        return Poll::Ready(Some(Ok(chunk)));
                    }
                    Some(Err(err)) => return this.fail(err),
                    None => {
                        if this.retries_remaining == 0 {
                            let err = Error::Truncated {
                                position: this.position,
                                end:      this.end,
                            };
                            return this.fail(err);
                        }
                        this.retries_remaining -= 1;
                        this.retries_used += 1;
                        warn!(
                            position = this.position,
                            end = this.end,
                            retries_remaining = this.retries_remaining,
                            "range stream ended early, re-opening"
                        );
                        this.state = State::Reopening((this.reopen)(this.position));
                    }
                },
            }
        }
    }
}

impl fmt::Debug for ResumableRangeStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::Streaming(_) => "streaming",
            State::Reopening(_) => "reopening",
            State::Finished => "finished",
        };
        f.debug_struct("ResumableRangeStream")
            .field("state", &state)
            .field("position", &self.position)
            .field("end", &self.end)
            .field("retries_remaining", &self.retries_remaining)
            .finish()
    }
}

/// Present `[start, start + length)` as one stream starting from `initial`.
pub fn open_resumable_download<'a, F>(
    start: u64,
    length: u64,
    initial: ByteStream<'a>,
    reopen: F,
    max_retries: u32,
) -> Result<ResumableRangeStream<'a>>
where
    F: FnMut(u64) -> BoxFuture<'a, Result<ByteStream<'a>>> + Send + 'a,
{
    ResumableRangeStream::new(initial, start, length, reopen, max_retries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{FutureExt, StreamExt, TryStreamExt, stream};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pattern(len: usize) -> Bytes { (0..len).map(|i| (i % 241) as u8).collect::<Vec<_>>().into() }

    /// Stream over `data[from..until]` in 64-byte pieces, where `data[0]`
    /// sits at absolute offset `base`.
    fn body(data: &Bytes, base: u64, from: u64, until: u64) -> ByteStream<'static> {
        let slice = data.slice((from - base) as usize..(until - base) as usize);
        let pieces: Vec<Result<Bytes>> = (0..slice.len())
            .step_by(64)
            .map(|at| Ok(slice.slice(at..(at + 64).min(slice.len()))))
            .collect();
        Box::pin(stream::iter(pieces))
    }

    fn resuming(data: Bytes, base: u64, end: u64, calls: Arc<AtomicUsize>) -> impl FnMut(u64) -> BoxFuture<'static, Result<ByteStream<'static>>> + Send {
        move |from| {
            calls.fetch_add(1, Ordering::SeqCst);
            let data = data.clone();
            async move { Ok(body(&data, base, from, end)) }.boxed()
        }
    }

    async fn collect(stream: ResumableRangeStream<'_>) -> Result<Vec<u8>> {
        stream
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok::<_, Error>(acc)
            })
            .await
    }

    #[tokio::test]
    async fn test_complete_stream_needs_no_retry() {
        let data = pattern(1000);
        let calls = Arc::new(AtomicUsize::new(0));
        let stream = open_resumable_download(
            0,
            1000,
            body(&data, 0, 0, 1000),
            resuming(data.clone(), 0, 1000, calls.clone()),
            3,
        ).unwrap();
        assert_eq!(collect(stream).await.unwrap(), data.to_vec());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resumes_after_silent_truncation() {
        let data = pattern(1000);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let reopen = {
            let data = data.clone();
            let calls = calls.clone();
            let seen = seen.clone();
            move |from: u64| -> BoxFuture<'static, Result<ByteStream<'static>>> {
                calls.fetch_add(1, Ordering::SeqCst);
                seen.lock().unwrap().push(from);
                let data = data.clone();
                async move { Ok(body(&data, 0, from, 1000)) }.boxed()
            }
        };

        let mut stream = open_resumable_download(0, 1000, body(&data, 0, 0, 500), reopen, 5).unwrap();
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }

        assert_eq!(out, data.to_vec());
        assert_eq!(stream.retries_used(), 1);
        assert_eq!(stream.retries_remaining(), 4);
        assert_eq!(*seen.lock().unwrap(), vec![500]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_absolute_offsets_survive_reopen() {
        let data = pattern(300);
        let calls = Arc::new(AtomicUsize::new(0));
        let stream = ResumableRangeStream::new(
            body(&data, 7_000, 7_000, 7_100),
            7_000,
            300,
            resuming(data.clone(), 7_000, 7_300, calls.clone()),
            1,
        ).unwrap();
        assert_eq!(collect(stream).await.unwrap(), data.to_vec());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_budget_reports_truncation_position() {
        let data = pattern(1000);
        let calls = Arc::new(AtomicUsize::new(0));
        let stream = open_resumable_download(
            0,
            1000,
            body(&data, 0, 0, 500),
            resuming(data.clone(), 0, 1000, calls.clone()),
            0,
        ).unwrap();

        let err = collect(stream).await.unwrap_err();
        assert!(matches!(err, Error::Truncated {
            position: 500,
            end:      1000,
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_budget_exhausted_after_repeated_truncation() {
        let data = pattern(1000);
        // Every re-open delivers only 100 more bytes.
        let reopen = {
            let data = data.clone();
            move |from: u64| -> BoxFuture<'static, Result<ByteStream<'static>>> {
                let data = data.clone();
                async move { Ok(body(&data, 0, from, (from + 100).min(1000))) }.boxed()
            }
        };
        let stream = open_resumable_download(0, 1000, body(&data, 0, 0, 100), reopen, 2).unwrap();

        let err = collect(stream).await.unwrap_err();
        assert!(matches!(err, Error::Truncated { position: 300, .. }));
    }

    #[tokio::test]
    async fn test_transport_error_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let initial: ByteStream<'static> = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"abcd")),
            Err(Error::connectivity("connection reset")),
        ]));
        let data = pattern(10);
        let stream = open_resumable_download(0, 10, initial, resuming(data, 0, 10, calls.clone()), 5)
            .unwrap();

        let err = collect(stream).await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reopen_failure_propagates() {
        let data = pattern(100);
        let reopen = |_from: u64| -> BoxFuture<'static, Result<ByteStream<'static>>> {
            async { Err(Error::rejected("range not satisfiable")) }.boxed()
        };
        let mut stream = open_resumable_download(0, 100, body(&data, 0, 0, 50), reopen, 3).unwrap();

        let mut delivered = 0;
        let err = loop {
            match stream.next().await {
                Some(Ok(chunk)) => delivered += chunk.len(),
                Some(Err(err)) => break err,
                None => panic!("stream ended without error"),
            }
        };
        assert_eq!(delivered, 50);
        assert!(matches!(err, Error::Transport { .. }));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_over_delivery_is_rejected() {
        let initial: ByteStream<'static> =
            Box::pin(stream::iter(vec![Ok::<_, Error>(Bytes::from(vec![0u8; 12]))]));
        let reopen = |_from: u64| -> BoxFuture<'static, Result<ByteStream<'static>>> {
            async {
                let empty: ByteStream<'static> = Box::pin(stream::empty::<Result<Bytes>>());
                Ok(empty)
            }
            .boxed()
        };
        let stream = open_resumable_download(0, 10, initial, reopen, 1).unwrap();
        assert!(matches!(
            collect(stream).await,
            Err(Error::UnexpectedData { position: 12, end: 10 })
        ));
    }

    #[tokio::test]
    async fn test_zero_length_range_is_empty() {
        let initial: ByteStream<'static> = Box::pin(stream::pending::<Result<Bytes>>());
        let reopen = |_from: u64| -> BoxFuture<'static, Result<ByteStream<'static>>> {
            async { Err(Error::rejected("unused")) }.boxed()
        };
        let stream = open_resumable_download(42, 0, initial, reopen, 0).unwrap();
        assert!(collect(stream).await.unwrap().is_empty());
    }

    #[test]
    fn test_overflowing_range_rejected() {
        let initial: ByteStream<'static> = Box::pin(stream::empty::<Result<Bytes>>());
        let reopen = |_from: u64| -> BoxFuture<'static, Result<ByteStream<'static>>> {
            async { Err(Error::rejected("unused")) }.boxed()
        };
        let err = ResumableRangeStream::new(initial, u64::MAX - 5, 10, reopen, 1).unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_cancellation_ends_stream() {
        let cancel = CancellationToken::new();
        let initial: ByteStream<'static> = Box::pin(
            stream::iter(vec![Ok::<_, Error>(Bytes::from_static(b"first"))]).chain(stream::pending()),
        );
        let reopen = |_from: u64| -> BoxFuture<'static, Result<ByteStream<'static>>> {
            async { Err(Error::rejected("unused")) }.boxed()
        };
        let mut stream = open_resumable_download(0, 100, initial, reopen, 1)
            .unwrap()
            .with_cancellation(cancel.clone());

        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"first"));
        cancel.cancel();
        assert!(matches!(stream.next().await, Some(Err(Error::Cancelled))));
        assert!(stream.next().await.is_none());
        assert_eq!(stream.position(), 5);
    }
}
