//! Consumer-group stream abstraction

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use super::error::ConsumerResult;

/// Which entries a poll asks the group for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCursor {
    /// Entries never delivered to any consumer in the group
    New,
    /// Entries delivered to this consumer and not yet acknowledged
    Pending,
}

impl ReadCursor {
    /// Stream id argument for `XREADGROUP`
    pub fn as_stream_id(&self) -> &'static str {
        match self {
            ReadCursor::New => ">",
            ReadCursor::Pending => "0",
        }
    }
}

/// Result of [`EventStream::ensure_group`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    Created,
    AlreadyExists,
}

/// One stream entry as a flat string map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl StreamMessage {
    pub fn new<K, V>(id: impl Into<String>, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            id: id.into(),
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A stream read through one consumer of one consumer group
#[async_trait]
pub trait EventStream: Send + Sync {
    /// Create the group at the start of the stream unless it exists
    async fn ensure_group(&self) -> ConsumerResult<GroupStatus>;

    /// Read up to `count` entries, blocking up to `block` for new ones.
    /// A timeout yields an empty batch.
    async fn poll(
        &self,
        cursor: ReadCursor,
        count: usize,
        block: Duration,
    ) -> ConsumerResult<Vec<StreamMessage>>;

    /// Acknowledge one entry for the group
    async fn ack(&self, message_id: &str) -> ConsumerResult<()>;
}
