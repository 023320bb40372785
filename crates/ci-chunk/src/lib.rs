//! Request-ID pool and multi-chunk PE reply assembler.

pub mod assembler;
pub mod request_id;

pub use assembler::{AssembleOutcome, ChunkAssembler, ChunkError, DEFAULT_ASSEMBLY_DEADLINE, DEFAULT_MAX_BODY_BYTES};
pub use request_id::{PoolError, RequestIdPool, DEFAULT_COOLDOWN, POOL_SIZE};
