//! Pure transformations: chunk planning and parameter validation.
//!
//! Nothing in this module performs I/O.

mod segment;
mod validation;

pub use segment::{Chunk, ChunkPlan, Chunks};
pub use validation::{
    DEFAULT_MAX_RETRIES_PER_RANGE, DEFAULT_PARALLELISM, OBJECT_MAX_SIZE, RANGE_MAX_SIZE,
    default_dispatch_concurrency, validate_buffer_pool, validate_destination,
    validate_object_size, validate_parallelism, validate_range, validate_range_size,
};
