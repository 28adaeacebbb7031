//! Up-front parameter checks.
//!
//! Every transfer validates its inputs here before touching the transport, so
//! a bad argument never costs a network round trip.

use crate::error::{Error, Result};

/// Largest single range accepted by the remote store (4 MiB).
pub const RANGE_MAX_SIZE: u64 = 4 * 1024 * 1024;

/// Largest object accepted by the remote store (4 TiB).
pub const OBJECT_MAX_SIZE: u64 = 4 * 1024 * 1024 * 1024 * 1024;

/// Default number of range operations in flight per transfer.
pub const DEFAULT_PARALLELISM: usize = 5;

/// Default re-open budget for each downloaded range.
pub const DEFAULT_MAX_RETRIES_PER_RANGE: u32 = 5;

/// Ensure `range_size` is in `1..=max`.
///
/// # Examples
///
/// ```
/// use rangeflow_transfer::core::{validate_range_size, RANGE_MAX_SIZE};
///
/// assert!(validate_range_size(1024, RANGE_MAX_SIZE).is_ok());
/// assert!(validate_range_size(0, RANGE_MAX_SIZE).is_err());
/// assert!(validate_range_size(RANGE_MAX_SIZE + 1, RANGE_MAX_SIZE).is_err());
/// ```
pub fn validate_range_size(range_size: u64, max: u64) -> Result<()> {
    if range_size == 0 {
        return Err(Error::invalid("range_size", "must be greater than 0"));
    }
    if range_size > max {
        return Err(Error::invalid(
            "range_size",
            format!("{range_size} exceeds the maximum range size of {max}"),
        ));
    }
    Ok(())
}

pub fn validate_parallelism(parallelism: usize) -> Result<()> {
    if parallelism == 0 {
        return Err(Error::invalid("parallelism", "must be at least 1"));
    }
    Ok(())
}

pub fn validate_object_size(size: u64, max: u64) -> Result<()> {
    if size > max {
        return Err(Error::invalid(
            "size",
            format!("{size} exceeds the maximum object size of {max}"),
        ));
    }
    Ok(())
}

/// Check the buffer-pool shape of a streaming upload.
///
/// `buffer_size` bounds a single outgoing range, so it is also held to
/// `max_range_size`.
pub fn validate_buffer_pool(
    buffer_size: usize,
    max_buffers: usize,
    max_range_size: u64,
) -> Result<()> {
    if buffer_size == 0 {
        return Err(Error::invalid("buffer_size", "must be greater than 0"));
    }
    if buffer_size as u64 > max_range_size {
        return Err(Error::invalid(
            "buffer_size",
            format!("{buffer_size} exceeds the maximum range size of {max_range_size}"),
        ));
    }
    if max_buffers == 0 {
        return Err(Error::invalid("max_buffers", "must be at least 1"));
    }
    Ok(())
}

/// Ensure a caller-provided destination can hold `count` bytes.
pub fn validate_destination(capacity: usize, count: u64) -> Result<()> {
    if (capacity as u64) < count {
        return Err(Error::invalid(
            "buffer",
            format!("capacity {capacity} is smaller than the requested {count} bytes"),
        ));
    }
    Ok(())
}

/// Ensure `[offset, offset + count)` is addressable, returning its end.
pub fn validate_range(offset: u64, count: u64) -> Result<u64> {
    offset.checked_add(count).ok_or_else(|| {
        Error::invalid(
            "offset",
            format!("range of {count} bytes at {offset} overflows the object address space"),
        )
    })
}

/// Outgoing concurrency used for a pool of `max_buffers` buffers when the
/// caller does not pick one: three quarters of the pool, rounded up.
pub fn default_dispatch_concurrency(max_buffers: usize) -> usize {
    (max_buffers * 3).div_ceil(4).max(1)
}
