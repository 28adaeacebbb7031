use crate::error::{Error, Result};

/// One range-sized window of a larger transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk index (0-based)
    pub index:  u64,
    /// Starting byte offset
    pub offset: u64,
    /// Number of bytes in the chunk
    pub length: u64,
}

impl Chunk {
    /// Ending byte offset (exclusive).
    pub fn end(&self) -> u64 { self.offset + self.length }
}

/// Division of `[0, size)` into contiguous windows of at most `chunk_size` bytes.
///
/// The plan is derived on demand and never stored: iterating it yields chunks
/// in offset order, every one of them `chunk_size` long except the last, which
/// holds the remainder.
///
/// # Examples
///
/// ```
/// use rangeflow_transfer::core::ChunkPlan;
///
/// let plan = ChunkPlan::new(10, 4).unwrap();
/// let lengths: Vec<u64> = plan.iter().map(|c| c.length).collect();
/// assert_eq!(lengths, vec![4, 4, 2]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    size:       u64,
    chunk_size: u64,
}

impl ChunkPlan {
    /// Create a plan covering `size` bytes in windows of `chunk_size`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `chunk_size` is zero.
    pub fn new(size: u64, chunk_size: u64) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::invalid("chunk_size", "must be greater than 0"));
        }
        Ok(Self { size, chunk_size })
    }

    pub fn size(&self) -> u64 { self.size }

    pub fn chunk_size(&self) -> u64 { self.chunk_size }

    /// Number of chunks, `ceil(size / chunk_size)`.
    pub fn len(&self) -> u64 { self.size.div_ceil(self.chunk_size) }

    pub fn is_empty(&self) -> bool { self.size == 0 }

    /// Chunk at `index`, or `None` past the end of the plan.
    pub fn get(&self, index: u64) -> Option<Chunk> {
        if index >= self.len() {
            return None;
        }
        let offset = index * self.chunk_size;
        Some(Chunk {
            index,
            offset,
            length: self.chunk_size.min(self.size - offset),
        })
    }

    pub fn iter(&self) -> Chunks {
        Chunks {
            plan: *self,
            next: 0,
        }
    }
}

impl IntoIterator for ChunkPlan {
    type IntoIter = Chunks;
    type Item = Chunk;

    fn into_iter(self) -> Chunks { self.iter() }
}

impl IntoIterator for &ChunkPlan {
    type IntoIter = Chunks;
    type Item = Chunk;

    fn into_iter(self) -> Chunks { self.iter() }
}

/// Iterator over the chunks of a [`ChunkPlan`].
#[derive(Debug, Clone)]
pub struct Chunks {
    plan: ChunkPlan,
    next: u64,
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let chunk = self.plan.get(self.next)?;
        self.next += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.plan.len() - self.next).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks {}
