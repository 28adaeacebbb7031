use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;

use crate::core::{OBJECT_MAX_SIZE, RANGE_MAX_SIZE};
use crate::error::Result;

/// A boxed stream type for network and source bodies.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// A stream of byte chunks, the body type of every range download and source.
pub type ByteStream<'a> = BoxStream<'a, Result<Bytes>>;

/// Response to a single range download.
pub struct RangeResponse<'a> {
    /// Body of the response.
    ///
    /// The stream may end before `content_length` bytes were delivered
    /// without reporting an error.
    pub body: ByteStream<'a>,

    /// Number of bytes the remote end declared for this range.
    pub content_length: u64,
}

impl fmt::Debug for RangeResponse<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeResponse")
            .field("body", &"{ ... }")
            .field("content_length", &self.content_length)
            .finish()
    }
}

/// Range-addressable remote object.
///
/// This trait is the whole interface the transfer engine needs from the
/// network. Implementations own request construction, authentication and
/// connection-level retry; the engine never retries a failed call itself.
///
/// # Implementations
///
/// - [`MemoryTransport`](crate::MemoryTransport): in-process object used for
///   tests and local pipelines
pub trait RangeTransport: Send + Sync {
    /// Create (or truncate) the object with a fixed size of `size` bytes.
    fn create_object(&self, size: u64) -> impl Future<Output = Result<()>> + Send;

    /// Write `data` at `offset`. `data.len()` never exceeds
    /// [`max_range_size`](Self::max_range_size).
    fn upload_range(&self, offset: u64, data: Bytes) -> impl Future<Output = Result<()>> + Send;

    /// Open a stream over `[offset, offset + length)`.
    ///
    /// A range running past the end of the object may be served with only
    /// the available tail, declaring the shorter length.
    fn download_range(
        &self,
        offset: u64,
        length: u64,
    ) -> impl Future<Output = Result<RangeResponse<'_>>> + Send;

    /// Current size of the object in bytes.
    fn object_size(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Largest range a single upload may carry.
    fn max_range_size(&self) -> u64 { RANGE_MAX_SIZE }

    /// Largest object the remote store accepts.
    fn max_object_size(&self) -> u64 { OBJECT_MAX_SIZE }
}

impl<T: RangeTransport + ?Sized> RangeTransport for &T {
    fn create_object(&self, size: u64) -> impl Future<Output = Result<()>> + Send {
        (**self).create_object(size)
    }

    fn upload_range(&self, offset: u64, data: Bytes) -> impl Future<Output = Result<()>> + Send {
        (**self).upload_range(offset, data)
    }

    fn download_range(
        &self,
        offset: u64,
        length: u64,
    ) -> impl Future<Output = Result<RangeResponse<'_>>> + Send {
        (**self).download_range(offset, length)
    }

    fn object_size(&self) -> impl Future<Output = Result<u64>> + Send { (**self).object_size() }

    fn max_range_size(&self) -> u64 { (**self).max_range_size() }

    fn max_object_size(&self) -> u64 { (**self).max_object_size() }
}
