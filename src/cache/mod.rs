//! Partitioned response cache for offline support.
//!
//! This module provides the storage side of the proxy:
//! - Named partitions holding snapshots of same-origin 200 responses
//! - A bounded dynamic partition with oldest-first eviction
//! - The five request strategies run against the current generation
//! - Synthesized offline responses when nothing else can answer

mod fallback;
mod layer;
mod partition;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use partition::{Generation, Partition};
pub use storage::SqliteStorage;
pub use traits::{CacheResult, CacheSource, CacheStorage};
