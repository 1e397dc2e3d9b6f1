//! Sequential poll, process, ack loop over an [`EventStream`]

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::consumer::{
    config::ConsumerConfig,
    error::{ConsumerError, ConsumerResult, ErrorSeverity},
    metrics::{ConsumerMetrics, MetricsSnapshot},
    processor::{Disposition, MessageProcessor},
    retry::{RetryExecutor, RetryResult},
    stream::{EventStream, GroupStatus, ReadCursor, StreamMessage},
};

/// Final counters returned when the loop stops
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerReport {
    pub metrics: MetricsSnapshot,
    pub uptime: Duration,
}

#[derive(Debug, Default, Clone, Copy)]
struct BatchSummary {
    handled: usize,
    unacknowledged: usize,
}

/// Owns the stream cursor and drives the processor one message at a time
pub struct StreamConsumer<S: EventStream, P: MessageProcessor> {
    config: ConsumerConfig,
    stream: S,
    processor: P,
    shutdown: CancellationToken,
    metrics: ConsumerMetrics,
    cursor: ReadCursor,
    started_at: Instant,
}

impl<S: EventStream, P: MessageProcessor> StreamConsumer<S, P> {
    pub fn new(config: ConsumerConfig, stream: S, processor: P, shutdown: CancellationToken) -> Self {
        let cursor = if config.replay_pending_on_start {
            ReadCursor::Pending
        } else {
            ReadCursor::New
        };
        Self {
            config,
            stream,
            processor,
            shutdown,
            metrics: ConsumerMetrics::new(),
            cursor,
            started_at: Instant::now(),
        }
    }

    pub fn metrics(&self) -> &ConsumerMetrics {
        &self.metrics
    }

    /// Cursor the next poll will use
    pub fn cursor(&self) -> ReadCursor {
        self.cursor
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn report(&self) -> ConsumerReport {
        ConsumerReport {
            metrics: self.metrics.snapshot(),
            uptime: self.started_at.elapsed(),
        }
    }

    /// Create the group, retrying transport failures until cancelled
    pub async fn ensure_group(&self) -> ConsumerResult<Option<GroupStatus>> {
        let executor = RetryExecutor::new(self.config.transport_retry.clone());
        let result = executor
            .execute_with_predicate(
                || self.stream.ensure_group(),
                |e: &ConsumerError| e.is_retryable(),
                &self.shutdown,
            )
            .await;

        match result {
            RetryResult::Success { value, attempts } => {
                match value {
                    GroupStatus::Created => info!(
                        "Created consumer group {} on {}",
                        self.config.group_name, self.config.stream_key
                    ),
                    GroupStatus::AlreadyExists => info!(
                        "Consumer group {} already exists on {}",
                        self.config.group_name, self.config.stream_key
                    ),
                }
                if attempts > 0 {
                    info!("Consumer group ready after {} retries", attempts);
                }
                Ok(Some(value))
            }
            RetryResult::Failed { error, .. } => Err(error),
            RetryResult::Cancelled { .. } => Ok(None),
        }
    }

    /// Run until the shutdown token is cancelled
    pub async fn run(&mut self) -> ConsumerResult<ConsumerReport> {
        self.config.validate().map_err(ConsumerError::Config)?;
        info!(
            processor = self.processor.name(),
            stream = %self.config.stream_key,
            group = %self.config.group_name,
            consumer = %self.config.consumer_name,
            threshold = self.config.batch_threshold,
            "Starting stream consumer"
        );

        if self.ensure_group().await?.is_none() {
            return Ok(self.shutdown_report());
        }

        let shutdown = self.shutdown.clone();
        let retry = self.config.transport_retry.clone();
        let mut transport_failures: u32 = 0;
        let mut processing_failures: u32 = 0;
        let mut last_report = Instant::now();

        loop {
            if last_report.elapsed() >= self.config.metrics_interval {
                self.log_metrics();
                last_report = Instant::now();
            }

            let cursor = self.cursor;
            // The blocking poll is the only point where shutdown interrupts
            let polled = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = self.stream.poll(
                    cursor,
                    self.config.poll_batch_size,
                    self.config.poll_block_timeout,
                ) => result,
            };

            let backoff = match polled {
                Ok(messages) => {
                    transport_failures = 0;
                    let summary = self.handle_batch(cursor, messages).await;
                    if summary.unacknowledged > 0 {
                        processing_failures += 1;
                        Some(retry.next_backoff(processing_failures))
                    } else {
                        processing_failures = 0;
                        None
                    }
                }
                Err(e) => {
                    self.metrics.increment_transport_error();
                    if e.is_missing_group() {
                        warn!(
                            error = %e,
                            group = %self.config.group_name,
                            "Consumer group is gone, re-creating it"
                        );
                        if self.ensure_group().await?.is_none() {
                            break;
                        }
                        transport_failures = 0;
                        continue;
                    }
                    if !e.is_retryable() || e.severity() == ErrorSeverity::Fatal {
                        error!(error = %e, "Stream failure is not retryable, stopping consumer");
                        return Err(e);
                    }
                    transport_failures += 1;
                    let backoff = retry.next_backoff(transport_failures);
                    warn!(
                        error = %e,
                        attempt = transport_failures,
                        "Stream poll failed, retrying in {:?}",
                        backoff
                    );
                    Some(backoff)
                }
            };

            if let Some(delay) = backoff {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Ok(self.shutdown_report())
    }

    /// One poll and the processing of whatever it returned
    ///
    /// Returns the number of messages polled. Does not back off.
    pub async fn run_once(&mut self) -> ConsumerResult<usize> {
        let cursor = self.cursor;
        let messages = match self
            .stream
            .poll(cursor, self.config.poll_batch_size, self.config.poll_block_timeout)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                self.metrics.increment_transport_error();
                return Err(e);
            }
        };
        Ok(self.handle_batch(cursor, messages).await.handled)
    }

    async fn handle_batch(&mut self, cursor: ReadCursor, messages: Vec<StreamMessage>) -> BatchSummary {
        if messages.is_empty() {
            if cursor == ReadCursor::Pending {
                debug!("No pending entries left, reading new entries");
                self.cursor = ReadCursor::New;
            }
            return BatchSummary::default();
        }

        let mut summary = BatchSummary::default();
        for message in &messages {
            summary.handled += 1;
            if !self.handle_message(message).await {
                summary.unacknowledged += 1;
            }
        }

        if summary.unacknowledged > 0 {
            self.cursor = ReadCursor::Pending;
        }
        summary
    }

    /// Returns false if the message stays unacknowledged
    async fn handle_message(&mut self, message: &StreamMessage) -> bool {
        self.metrics.increment_consumed();
        let started = Instant::now();

        let disposition = match self.processor.process(message).await {
            Ok(disposition) => disposition,
            Err(e) => {
                if matches!(e, ConsumerError::Persistence(_)) {
                    self.metrics.increment_persistence_failure();
                }
                error!(
                    message_id = %message.id,
                    error = %e,
                    "Failed to process message, leaving it unacknowledged"
                );
                self.metrics.record_processing_duration(started.elapsed());
                return false;
            }
        };

        match &disposition {
            Disposition::Persisted { .. } => self.metrics.increment_persisted(),
            Disposition::Dropped { .. } => self.metrics.increment_dropped(),
            Disposition::Duplicate { .. } => self.metrics.increment_duplicate(),
        }

        let acked = match self.stream.ack(&message.id).await {
            Ok(()) => {
                self.metrics.increment_acked();
                true
            }
            Err(e) => {
                self.metrics.increment_ack_failure();
                warn!(
                    message_id = %message.id,
                    error = %e,
                    "Failed to acknowledge message, it will be delivered again"
                );
                false
            }
        };

        // The measurement is stored either way, so the count stands
        if let Some(outcome) = self.processor.after_ack(&disposition).await {
            self.metrics.record_recompute(outcome.is_published());
        }

        self.metrics.record_processing_duration(started.elapsed());
        acked
    }

    fn log_metrics(&self) {
        let m = self.metrics.snapshot();
        info!(
            consumed = m.consumed,
            persisted = m.persisted,
            dropped = m.dropped,
            duplicates = m.duplicates,
            acked = m.acked,
            persistence_failures = m.persistence_failures,
            transport_errors = m.transport_errors,
            recomputes = m.recomputes,
            recompute_failures = m.recompute_failures,
            "Consumer metrics"
        );
    }

    fn shutdown_report(&self) -> ConsumerReport {
        let report = self.report();
        self.log_metrics();
        info!("Stream consumer stopped after {:?}", report.uptime);
        report
    }
}
