use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{CacheResult, SnapshotCache};
use crate::event::Snapshot;

/// Snapshot cache held in a process-local map
#[derive(Debug, Default)]
pub struct InMemorySnapshotCache {
    entries: RwLock<HashMap<String, Snapshot>>,
}

impl InMemorySnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl SnapshotCache for InMemorySnapshotCache {
    async fn set(&self, snapshot: &Snapshot) -> CacheResult<()> {
        self.entries
            .write()
            .insert(snapshot.entity_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn get(&self, entity_id: &str) -> CacheResult<Option<Snapshot>> {
        Ok(self.entries.read().get(entity_id).cloned())
    }
}
