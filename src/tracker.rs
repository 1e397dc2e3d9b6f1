//! Per-entity arrival counters
//!
//! Each entity moves `Idle(0) -> Accumulating(n) -> [recompute] -> Idle(0)`.
//! There is no failed state: the counter resets whatever the recompute
//! outcome. Counts live only in memory and are lost on restart.

use std::collections::HashMap;

/// Counts events per entity since that entity's last trigger
#[derive(Debug, Clone)]
pub struct BatchTracker {
    threshold: u32,
    counts: HashMap<String, u32>,
}

impl BatchTracker {
    /// Create a tracker firing after `threshold` events per entity
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            counts: HashMap::new(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Count one event for `entity_id`, returning the new pending count
    pub fn record(&mut self, entity_id: &str) -> u32 {
        let count = self.counts.entry(entity_id.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Whether `entity_id` has reached the threshold
    pub fn is_due(&self, entity_id: &str) -> bool {
        self.pending(entity_id) >= self.threshold
    }

    /// Return `entity_id` to `Idle(0)`
    pub fn reset(&mut self, entity_id: &str) {
        if let Some(count) = self.counts.get_mut(entity_id) {
            *count = 0;
        }
    }

    pub fn pending(&self, entity_id: &str) -> u32 {
        self.counts.get(entity_id).copied().unwrap_or(0)
    }

    pub fn tracked_entities(&self) -> usize {
        self.counts.len()
    }
}
