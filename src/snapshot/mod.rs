//! Latest-forecast cache for low-latency reads
//!
//! One value per entity, overwritten on every successful recompute. There is
//! no TTL and no versioning: the last write wins.

use async_trait::async_trait;
use thiserror::Error;

use crate::event::Snapshot;

pub mod memory;
pub mod redis_cache;

pub use memory::InMemorySnapshotCache;
pub use redis_cache::RedisSnapshotCache;

/// Default key prefix for cached snapshots
pub const DEFAULT_KEY_PREFIX: &str = "forecast_snapshot:";

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache error types
#[derive(Error, Debug)]
pub enum CacheError {
    /// Redis client errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Snapshot (de)serialisation errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Cache temporarily unreachable
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// Build the cache key for `entity_id`
pub fn snapshot_key(prefix: &str, entity_id: &str) -> String {
    format!("{prefix}{entity_id}")
}

/// Key-value store holding one [`Snapshot`] per entity
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotCache: Send + Sync {
    /// Overwrite the snapshot for `snapshot.entity_id`
    async fn set(&self, snapshot: &Snapshot) -> CacheResult<()>;

    /// Current snapshot for `entity_id`, if any
    async fn get(&self, entity_id: &str) -> CacheResult<Option<Snapshot>>;
}
