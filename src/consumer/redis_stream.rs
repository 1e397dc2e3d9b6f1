//! Redis Streams adapter
//!
//! `XGROUP CREATE <key> <group> 0 MKSTREAM` on start-up, `XREADGROUP` for
//! polling and `XACK` after a message is handled.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client, RedisResult, Value};
use tracing::{debug, info};

use super::config::ConsumerConfig;
use super::error::ConsumerResult;
use super::stream::{EventStream, GroupStatus, ReadCursor, StreamMessage};

/// Error code Redis returns when the group already exists
const BUSYGROUP: &str = "BUSYGROUP";

/// One consumer of one group on a Redis stream
#[derive(Clone)]
pub struct RedisEventStream {
    conn: ConnectionManager,
    stream_key: String,
    group_name: String,
    consumer_name: String,
}

impl RedisEventStream {
    /// Connect using the endpoint and identity in `config`
    pub async fn connect(config: &ConsumerConfig) -> ConsumerResult<Self> {
        let client = Client::open(config.redis_url())?;
        let conn = ConnectionManager::new(client).await?;
        info!(
            url = %config.redis_url(),
            stream = %config.stream_key,
            group = %config.group_name,
            consumer = %config.consumer_name,
            "connected to stream"
        );
        Ok(Self::from_manager(conn, config))
    }

    /// Share an existing connection manager
    pub fn from_manager(conn: ConnectionManager, config: &ConsumerConfig) -> Self {
        Self {
            conn,
            stream_key: config.stream_key.clone(),
            group_name: config.group_name.clone(),
            consumer_name: config.consumer_name.clone(),
        }
    }

    /// `XADD` one entry with an auto-generated id
    pub async fn publish(&self, fields: &[(&str, String)]) -> ConsumerResult<String> {
        let mut conn = self.conn.clone();
        let id: String = conn.xadd(&self.stream_key, "*", fields).await?;
        debug!(stream = %self.stream_key, id = %id, "published entry");
        Ok(id)
    }
}

/// Decode one field value; binary data is decoded lossily
fn field_value(value: &Value) -> String {
    match value {
        Value::Data(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        other => redis::from_redis_value::<String>(other).unwrap_or_default(),
    }
}

fn to_message(entry: StreamId) -> StreamMessage {
    let fields: HashMap<String, String> = entry
        .map
        .iter()
        .map(|(k, v)| (k.clone(), field_value(v)))
        .collect();
    StreamMessage {
        id: entry.id,
        fields,
    }
}

#[async_trait]
impl EventStream for RedisEventStream {
    async fn ensure_group(&self) -> ConsumerResult<GroupStatus> {
        let mut conn = self.conn.clone();
        let created: RedisResult<()> = conn
            .xgroup_create_mkstream(&self.stream_key, &self.group_name, "0")
            .await;
        match created {
            Ok(()) => Ok(GroupStatus::Created),
            Err(e) if e.code() == Some(BUSYGROUP) => Ok(GroupStatus::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    async fn poll(
        &self,
        cursor: ReadCursor,
        count: usize,
        block: Duration,
    ) -> ConsumerResult<Vec<StreamMessage>> {
        let block_ms = usize::try_from(block.as_millis()).unwrap_or(usize::MAX).max(1);
        let opts = StreamReadOptions::default()
            .group(&self.group_name, &self.consumer_name)
            .count(count)
            .block(block_ms);

        let mut conn = self.conn.clone();
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream_key], &[cursor.as_stream_id()], &opts)
            .await?;

        let messages: Vec<StreamMessage> = reply
            .map(|r| r.keys)
            .unwrap_or_default()
            .into_iter()
            .flat_map(|key| key.ids)
            .map(to_message)
            .collect();

        if !messages.is_empty() {
            debug!(count = messages.len(), cursor = ?cursor, "polled entries");
        }
        Ok(messages)
    }

    async fn ack(&self, message_id: &str) -> ConsumerResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(&self.stream_key, &self.group_name, &[message_id])
            .await?;
        Ok(())
    }
}
