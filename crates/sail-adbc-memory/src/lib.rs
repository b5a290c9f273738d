//! An in-memory backend for `sail-adbc`, with queries answered by DataFusion.

mod backend;
mod cursor;
mod database;
mod error;
mod scalar;
mod session;
mod ticket;

pub use backend::{MemoryBackend, MEMORY_TARGET_PREFIX, TARGET_PARTITIONS_OPTION};
pub use database::MemoryDatabase;
