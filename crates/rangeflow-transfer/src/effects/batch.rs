//! Bounded-concurrency execution of independent operations.
//!
//! A [`Batch`] holds a FIFO queue of not-yet-started futures and drives at
//! most `concurrency` of them at a time on the calling task. The first error
//! stops new operations from starting; operations already running are
//! drained before the error is returned.

use std::collections::VecDeque;
use std::future::Future;

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

/// An asynchronous unit of work with nothing to report beyond success or failure.
pub type Operation<'a> = BoxFuture<'a, Result<()>>;

/// Bounded-concurrency executor.
///
/// Operations are futures, so nothing runs until [`Batch::run`] polls them.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// use rangeflow_transfer::Batch;
///
/// # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
/// # rt.block_on(async {
/// let total = AtomicU64::new(0);
/// let mut batch = Batch::new(2);
/// for i in 1..=4 {
///     let total = &total;
///     batch.add_operation(async move {
///         total.fetch_add(i, Ordering::SeqCst);
///         Ok(())
///     });
/// }
/// batch.run().await.unwrap();
/// assert_eq!(total.into_inner(), 10);
/// # });
/// ```
pub struct Batch<'a> {
    concurrency: usize,
    queue:       VecDeque<Operation<'a>>,
    cancel:      CancellationToken,
}

impl<'a> Batch<'a> {
    /// Create an empty batch running at most `concurrency` operations at once.
    ///
    /// A concurrency of 0 behaves as 1.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            queue: VecDeque::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Abort the batch when `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Enqueue an operation. It starts once a slot is free during [`run`](Self::run).
    pub fn add_operation<F>(&mut self, operation: F)
    where
        F: Future<Output = Result<()>> + Send + 'a,
    {
        self.queue.push_back(Box::pin(operation));
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize { self.queue.len() }

    pub fn is_empty(&self) -> bool { self.queue.is_empty() }

    /// Run every queued operation and report the outcome.
    ///
    /// Succeeds when all operations succeed. Otherwise returns the first error
    /// in completion order, after every already-started operation has settled;
    /// queued operations that never started are dropped. If the cancellation
    /// token fires, running operations are dropped and [`Error::Cancelled`] is
    /// returned regardless of any recorded error.
    pub async fn run(mut self) -> Result<()> {
        let limit = self.concurrency.max(1);
        let total = self.queue.len();
        debug!(operations = total, concurrency = limit, "batch starting");

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut active = FuturesUnordered::new();
        let mut first_error: Option<Error> = None;
        let mut completed = 0usize;

        loop {
            if first_error.is_none() {
                while active.len() < limit {
                    match self.queue.pop_front() {
                        Some(operation) => active.push(operation),
                        None => break,
                    }
                }
            }

            if active.is_empty() {
                break;
            }

            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    debug!(in_flight = active.len(), "batch cancelled");
                    return Err(Error::Cancelled);
                }
                Some(outcome) = active.next() => outcome,
            };

            completed += 1;
            if let Err(err) = outcome {
                if first_error.is_none() {
                    debug!(error = %err, in_flight = active.len(), "batch operation failed, draining");
                    first_error = Some(err);
                } else {
                    debug!(error = %err, "discarding error after first failure");
                }
            }
        }

        match first_error {
            Some(err) => {
                debug!(
                    completed,
                    skipped = self.queue.len(),
                    "batch failed"
                );
                Err(err)
            }
            None => {
                debug!(completed, "batch finished");
                Ok(())
            }
        }
    }
}

/// Run `operations` with at most `concurrency` active at once.
///
/// Shorthand for filling a [`Batch`] and calling [`Batch::run`].
pub async fn run_batch<'a, I, F>(operations: I, concurrency: usize) -> Result<()>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<()>> + Send + 'a,
{
    let mut batch = Batch::new(concurrency);
    for operation in operations {
        batch.add_operation(operation);
    }
    batch.run().await
}
