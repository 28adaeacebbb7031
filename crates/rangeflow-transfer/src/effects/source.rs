//! Re-openable upload sources.

use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use futures_util::{TryStreamExt, stream};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use super::transport::ByteStream;
use crate::error::{Error, Result};

/// A source that can be read from an arbitrary offset any number of times.
///
/// Chunked uploads open one independent stream per chunk, so the same source
/// is read concurrently at different offsets.
pub trait Seekable: Send + Sync {
    /// Stream up to `length` bytes starting at `offset`.
    ///
    /// A stream that ends early means the source is shorter than the caller
    /// assumed; the transfer reports it as [`Error::SourceTooShort`].
    fn open_at(
        &self,
        offset: u64,
        length: u64,
    ) -> impl Future<Output = Result<ByteStream<'_>>> + Send;
}

impl Seekable for Bytes {
    async fn open_at(&self, offset: u64, length: u64) -> Result<ByteStream<'_>> {
        let len = self.len() as u64;
        let start = offset.min(len);
        let end = offset.saturating_add(length).min(len);
        let chunk = self.slice(start as usize..end as usize);
        Ok(Box::pin(stream::iter([Ok::<_, Error>(chunk)])))
    }
}

impl Seekable for Vec<u8> {
    async fn open_at(&self, offset: u64, length: u64) -> Result<ByteStream<'_>> {
        let len = self.len() as u64;
        let start = offset.min(len) as usize;
        let end = offset.saturating_add(length).min(len) as usize;
        let chunk = Bytes::copy_from_slice(&self[start..end]);
        Ok(Box::pin(stream::iter([Ok::<_, Error>(chunk)])))
    }
}

/// A local file opened afresh for every range.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }

    pub fn path(&self) -> &Path { &self.path }

    /// Current length of the file on disk.
    pub async fn len(&self) -> Result<u64> { Ok(tokio::fs::metadata(&self.path).await?.len()) }
}

impl Seekable for FileSource {
    async fn open_at(&self, offset: u64, length: u64) -> Result<ByteStream<'_>> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let body = ReaderStream::new(file.take(length)).map_err(Error::from);
        Ok(Box::pin(body))
    }
}

/// Drain `body` into one contiguous buffer of exactly `length` bytes.
///
/// Bytes past `length` are dropped.
pub(crate) async fn collect_exact(mut body: ByteStream<'_>, length: u64) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(length as usize);
    while let Some(chunk) = body.try_next().await? {
        let room = length as usize - buf.len();
        if chunk.len() >= room {
            buf.extend_from_slice(&chunk[..room]);
            return Ok(buf.freeze());
        }
        buf.extend_from_slice(&chunk);
    }
    if (buf.len() as u64) < length {
        return Err(Error::SourceTooShort {
            expected: length,
            actual:   buf.len() as u64,
        });
    }
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_bytes_open_at() {
        let source = Bytes::from_static(b"hello world");
        let body = source.open_at(6, 5).await.unwrap();
        assert_eq!(collect_exact(body, 5).await.unwrap(), Bytes::from_static(b"world"));
    }

    #[tokio::test]
    async fn test_vec_open_at_past_end_is_short() {
        let source = b"abc".to_vec();
        let body = source.open_at(1, 10).await.unwrap();
        let err = collect_exact(body, 10).await.unwrap_err();
        assert!(matches!(err, Error::SourceTooShort {
            expected: 10,
            actual:   2,
        }));
    }

    #[tokio::test]
    async fn test_collect_exact_drops_excess() {
        let body: ByteStream<'static> = Box::pin(stream::iter([
            Ok::<_, Error>(Bytes::from_static(b"abc")),
            Ok::<_, Error>(Bytes::from_static(b"defgh")),
        ]));
        assert_eq!(collect_exact(body, 5).await.unwrap(), Bytes::from_static(b"abcde"));
    }

    #[tokio::test]
    async fn test_collect_exact_zero_length() {
        let body: ByteStream<'static> = Box::pin(stream::empty::<Result<Bytes>>());
        assert!(collect_exact(body, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_source_ranges() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        let source = FileSource::new(file.path());
        assert_eq!(source.len().await.unwrap(), 10_000);

        let body = source.open_at(4_000, 3_000).await.unwrap();
        let chunk = collect_exact(body, 3_000).await.unwrap();
        assert_eq!(&chunk[..], &data[4_000..7_000]);
    }

    #[tokio::test]
    async fn test_file_source_missing_file() {
        let source = FileSource::new("/definitely/not/here.bin");
        assert!(matches!(source.open_at(0, 1).await, Err(Error::Io(_))));
    }
}
