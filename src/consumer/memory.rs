//! In-process stream with consumer-group delivery rules
//!
//! Models a single consumer of a single group: entries move from the log
//! to the pending list when read with [`ReadCursor::New`], stay there until
//! acknowledged, and are handed out again by [`ReadCursor::Pending`]. Clones
//! share the same stream, so a test can keep a handle after moving one into
//! a consumer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::error::{ConsumerError, ConsumerResult, NOGROUP};
use super::stream::{EventStream, GroupStatus, ReadCursor, StreamMessage};
use crate::event::Event;

#[derive(Debug, Default)]
struct State {
    log: Vec<StreamMessage>,
    next_seq: u64,
    group_created: bool,
    groups_created: u32,
    /// Index into `log` of the next undelivered entry
    delivered_up_to: usize,
    /// Delivered but unacknowledged ids, in delivery order
    pending: Vec<String>,
    delivery_counts: HashMap<String, u32>,
    acked: Vec<String>,
    failing_group_creations: u32,
    failing_polls: u32,
    failing_acks: u32,
}

impl State {
    fn entry(&self, id: &str) -> Option<&StreamMessage> {
        self.log.iter().find(|m| m.id == id)
    }

    fn deliver(&mut self, message: StreamMessage) -> StreamMessage {
        *self.delivery_counts.entry(message.id.clone()).or_insert(0) += 1;
        message
    }
}

/// Stream held entirely in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStream {
    state: Arc<Mutex<State>>,
    published: Arc<Notify>,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return its id
    pub fn publish<K, V>(&self, fields: impl IntoIterator<Item = (K, V)>) -> String
    where
        K: Into<String>,
        V: Into<String>,
    {
        let id = {
            let mut state = self.state.lock();
            state.next_seq += 1;
            let id = format!("{}-0", state.next_seq);
            state.log.push(StreamMessage::new(id.clone(), fields));
            id
        };
        self.published.notify_one();
        id
    }

    /// Append an event in wire format
    pub fn publish_event(&self, event: &Event) -> String {
        self.publish(event.to_fields())
    }

    /// Entries delivered but not acknowledged
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Acknowledged ids in acknowledgement order
    pub fn acked_ids(&self) -> Vec<String> {
        self.state.lock().acked.clone()
    }

    /// Times `id` has been handed to the consumer
    pub fn delivery_count(&self, id: &str) -> u32 {
        self.state.lock().delivery_counts.get(id).copied().unwrap_or(0)
    }

    /// Entries not yet delivered to the group
    pub fn undelivered_count(&self) -> usize {
        let state = self.state.lock();
        state.log.len() - state.delivered_up_to
    }

    pub fn len(&self) -> usize {
        self.state.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroy the consumer group, as `XGROUP DESTROY` would
    ///
    /// Pending entries are forgotten and a re-created group starts reading
    /// from the beginning of the log again.
    pub fn destroy_group(&self) {
        let mut state = self.state.lock();
        state.group_created = false;
        state.delivered_up_to = 0;
        state.pending.clear();
    }

    /// Group creations that succeeded, including re-creations
    pub fn groups_created(&self) -> u32 {
        self.state.lock().groups_created
    }

    /// Make the next `n` group creations fail with a transport error
    pub fn fail_next_group_creations(&self, n: u32) {
        self.state.lock().failing_group_creations = n;
    }

    /// Make the next `n` polls fail with a transport error
    pub fn fail_next_polls(&self, n: u32) {
        self.state.lock().failing_polls = n;
    }

    /// Make the next `n` acknowledgements fail with a transport error
    pub fn fail_next_acks(&self, n: u32) {
        self.state.lock().failing_acks = n;
    }

    fn take_batch(&self, cursor: ReadCursor, count: usize) -> ConsumerResult<Vec<StreamMessage>> {
        let mut state = self.state.lock();
        if !state.group_created {
            return Err(ConsumerError::Transport(format!(
                "{NOGROUP} no such consumer group"
            )));
        }

        match cursor {
            ReadCursor::Pending => {
                let ids: Vec<String> = state.pending.iter().take(count).cloned().collect();
                let mut batch = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(message) = state.entry(&id).cloned() {
                        batch.push(state.deliver(message));
                    }
                }
                Ok(batch)
            }
            ReadCursor::New => {
                let start = state.delivered_up_to;
                let end = (start + count).min(state.log.len());
                let messages: Vec<StreamMessage> = state.log[start..end].to_vec();
                state.delivered_up_to = end;
                let mut batch = Vec::with_capacity(messages.len());
                for message in messages {
                    state.pending.push(message.id.clone());
                    batch.push(state.deliver(message));
                }
                Ok(batch)
            }
        }
    }
}

fn injected_failure(counter: &mut u32, what: &str) -> Option<ConsumerError> {
    if *counter == 0 {
        return None;
    }
    *counter -= 1;
    Some(ConsumerError::Transport(format!("injected {what} failure")))
}

#[async_trait]
impl EventStream for MemoryStream {
    async fn ensure_group(&self) -> ConsumerResult<GroupStatus> {
        let mut state = self.state.lock();
        if let Some(err) = injected_failure(&mut state.failing_group_creations, "group creation") {
            return Err(err);
        }
        if state.group_created {
            Ok(GroupStatus::AlreadyExists)
        } else {
            state.group_created = true;
            state.groups_created += 1;
            Ok(GroupStatus::Created)
        }
    }

    async fn poll(
        &self,
        cursor: ReadCursor,
        count: usize,
        block: Duration,
    ) -> ConsumerResult<Vec<StreamMessage>> {
        let injected = {
            let mut state = self.state.lock();
            injected_failure(&mut state.failing_polls, "poll")
        };
        if let Some(err) = injected {
            return Err(err);
        }

        let batch = self.take_batch(cursor, count)?;
        if !batch.is_empty() || cursor == ReadCursor::Pending {
            return Ok(batch);
        }

        // Publish stores a permit if it races ahead of this wait
        let _ = tokio::time::timeout(block, self.published.notified()).await;
        self.take_batch(cursor, count)
    }

    async fn ack(&self, message_id: &str) -> ConsumerResult<()> {
        let mut state = self.state.lock();
        if let Some(err) = injected_failure(&mut state.failing_acks, "ack") {
            return Err(err);
        }
        if let Some(pos) = state.pending.iter().position(|id| id == message_id) {
            state.pending.remove(pos);
            state.acked.push(message_id.to_string());
        }
        Ok(())
    }
}
