//! Redis-backed snapshot cache
//!
//! Values are JSON-encoded [`Snapshot`] records stored under
//! `prefix + entity_id` with plain `SET`/`GET`.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::{debug, info};

use super::{snapshot_key, CacheResult, SnapshotCache, DEFAULT_KEY_PREFIX};
use crate::event::Snapshot;

/// Snapshot cache stored in Redis
#[derive(Clone)]
pub struct RedisSnapshotCache {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisSnapshotCache {
    /// Connect to `url` using the default key prefix
    pub async fn connect(url: &str) -> CacheResult<Self> {
        Self::connect_with_prefix(url, DEFAULT_KEY_PREFIX).await
    }

    pub async fn connect_with_prefix(url: &str, key_prefix: &str) -> CacheResult<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(url = %url, prefix = %key_prefix, "connected snapshot cache");
        Ok(Self::from_manager(conn, key_prefix))
    }

    /// Share an existing connection manager
    pub fn from_manager(conn: ConnectionManager, key_prefix: &str) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.to_string(),
        }
    }

    pub fn key_for(&self, entity_id: &str) -> String {
        snapshot_key(&self.key_prefix, entity_id)
    }
}

#[async_trait]
impl SnapshotCache for RedisSnapshotCache {
    async fn set(&self, snapshot: &Snapshot) -> CacheResult<()> {
        let key = self.key_for(&snapshot.entity_id);
        let payload = serde_json::to_string(snapshot)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(&key, payload).await?;
        debug!(key = %key, "wrote snapshot");
        Ok(())
    }

    async fn get(&self, entity_id: &str) -> CacheResult<Option<Snapshot>> {
        let key = self.key_for(entity_id);
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(&key).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
