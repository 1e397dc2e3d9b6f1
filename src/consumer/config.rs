//! Consumer configuration structures

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consumer::retry::RetryPolicy;
use crate::recompute::DEFAULT_HORIZON_DAYS;
use crate::snapshot::DEFAULT_KEY_PREFIX;

/// Redis Streams consumer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Redis host
    pub redis_host: String,

    /// Redis port
    pub redis_port: u16,

    /// Stream key to consume from
    pub stream_key: String,

    /// Consumer group name
    pub group_name: String,

    /// Consumer name within the group
    pub consumer_name: String,

    /// Events per entity before a recompute fires
    pub batch_threshold: u32,

    /// Days forecast on each recompute
    pub forecast_horizon_days: u32,

    /// Maximum messages per poll
    pub poll_batch_size: usize,

    /// How long a poll blocks waiting for messages
    pub poll_block_timeout: Duration,

    /// Backoff applied to transport failures
    pub transport_retry: RetryPolicy,

    /// Drain this consumer's unacknowledged entries before reading new ones
    pub replay_pending_on_start: bool,

    /// Skip measurements whose dedup key is already stored
    pub deduplicate: bool,

    /// Key prefix for cached snapshots
    pub snapshot_key_prefix: String,

    /// Metrics reporting interval
    pub metrics_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            redis_host: "127.0.0.1".to_string(),
            redis_port: 6379,
            stream_key: "visits".to_string(),
            group_name: "worker_group".to_string(),
            consumer_name: "worker_1".to_string(),
            batch_threshold: 20,
            forecast_horizon_days: DEFAULT_HORIZON_DAYS,
            poll_batch_size: 10,
            poll_block_timeout: Duration::from_secs(5),
            transport_retry: RetryPolicy::default(),
            replay_pending_on_start: true,
            deduplicate: false,
            snapshot_key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            metrics_interval: Duration::from_secs(60),
        }
    }
}

/// Builder for ConsumerConfig
pub struct ConsumerConfigBuilder {
    config: ConsumerConfig,
}

impl ConsumerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ConsumerConfig::default(),
        }
    }

    pub fn redis_host(mut self, host: impl Into<String>) -> Self {
        self.config.redis_host = host.into();
        self
    }

    pub fn redis_port(mut self, port: u16) -> Self {
        self.config.redis_port = port;
        self
    }

    /// Set the stream key
    pub fn stream_key(mut self, key: impl Into<String>) -> Self {
        self.config.stream_key = key.into();
        self
    }

    /// Set the consumer group name
    pub fn group_name(mut self, group: impl Into<String>) -> Self {
        self.config.group_name = group.into();
        self
    }

    pub fn consumer_name(mut self, name: impl Into<String>) -> Self {
        self.config.consumer_name = name.into();
        self
    }

    /// Set the per-entity recompute threshold
    pub fn batch_threshold(mut self, threshold: u32) -> Self {
        self.config.batch_threshold = threshold;
        self
    }

    pub fn forecast_horizon_days(mut self, days: u32) -> Self {
        self.config.forecast_horizon_days = days;
        self
    }

    pub fn poll_batch_size(mut self, size: usize) -> Self {
        self.config.poll_batch_size = size;
        self
    }

    pub fn poll_block_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_block_timeout = timeout;
        self
    }

    /// Set the transport retry policy
    pub fn transport_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.transport_retry = policy;
        self
    }

    pub fn replay_pending_on_start(mut self, replay: bool) -> Self {
        self.config.replay_pending_on_start = replay;
        self
    }

    pub fn deduplicate(mut self, deduplicate: bool) -> Self {
        self.config.deduplicate = deduplicate;
        self
    }

    pub fn snapshot_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.snapshot_key_prefix = prefix.into();
        self
    }

    /// Set the metrics reporting interval
    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.config.metrics_interval = interval;
        self
    }

    pub fn build(self) -> ConsumerConfig {
        self.config
    }
}

impl Default for ConsumerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerConfig {
    pub fn builder() -> ConsumerConfigBuilder {
        ConsumerConfigBuilder::new()
    }

    /// Connection URL for the configured host and port
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/", self.redis_host, self.redis_port)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.redis_host.is_empty() {
            return Err("Redis host cannot be empty".to_string());
        }

        if self.stream_key.is_empty() {
            return Err("Stream key cannot be empty".to_string());
        }

        if self.group_name.is_empty() {
            return Err("Group name cannot be empty".to_string());
        }

        if self.consumer_name.is_empty() {
            return Err("Consumer name cannot be empty".to_string());
        }

        if self.batch_threshold == 0 {
            return Err("Batch threshold must be greater than 0".to_string());
        }

        if self.forecast_horizon_days == 0 {
            return Err("Forecast horizon must be greater than 0".to_string());
        }

        if self.poll_batch_size == 0 {
            return Err("Poll batch size must be greater than 0".to_string());
        }

        if self.poll_block_timeout.is_zero() {
            return Err("Poll block timeout must be greater than 0".to_string());
        }

        if self.metrics_interval.is_zero() {
            return Err("Metrics interval must be greater than 0".to_string());
        }

        self.transport_retry.validate()
    }
}
