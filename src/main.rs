//! forecast-worker: ingestion worker and operator commands

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use forecast_stream::clock::{Clock, SystemClock};
use forecast_stream::consumer::{
    cancel_on_signal, ConsumerConfig, ForecastProcessor, RedisEventStream, StreamConsumer,
};
use forecast_stream::event::Event;
use forecast_stream::forecast::{
    latest_generation, EngineKind, ForecastEngine, DEFAULT_INTERVAL_WIDTH,
};
use forecast_stream::recompute::Recomputer;
use forecast_stream::repository::{DateRange, Repository, SqliteRepository};
use forecast_stream::snapshot::{RedisSnapshotCache, SnapshotCache, DEFAULT_KEY_PREFIX};
use forecast_stream::telemetry::{init_tracing, LogConfig, LogFormat};

#[derive(Parser)]
#[command(name = "forecast-worker")]
#[command(about = "Stream ingestion worker with batch-triggered forecasting", version)]
struct Cli {
    /// Redis host for the stream and snapshot cache
    #[arg(long, global = true, env = "FORECAST_REDIS_HOST", default_value = "127.0.0.1")]
    redis_host: String,

    /// Redis port
    #[arg(long, global = true, env = "FORECAST_REDIS_PORT", default_value_t = 6379)]
    redis_port: u16,

    /// SQLite database path
    #[arg(long, global = true, env = "FORECAST_DATABASE", default_value = "data.db")]
    database: PathBuf,

    /// Default log filter (RUST_LOG overrides it)
    #[arg(long, global = true, env = "FORECAST_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, env = "FORECAST_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Consume the stream until interrupted
    Run(RunArgs),

    /// Print the cached snapshot for an entity
    Snapshot {
        entity: String,

        /// Snapshot key prefix
        #[arg(long, env = "FORECAST_SNAPSHOT_PREFIX", default_value = DEFAULT_KEY_PREFIX)]
        snapshot_prefix: String,
    },

    /// Print the latest forecast rows for an entity
    Forecasts {
        entity: String,

        /// Days after today to include
        #[arg(long, default_value_t = 14)]
        days: u32,
    },

    /// Print stored measurements for an entity
    History { entity: String },

    /// Append one event to the stream
    Publish(PublishArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, env = "FORECAST_STREAM_KEY", default_value = "visits")]
    stream_key: String,

    #[arg(long, env = "FORECAST_GROUP", default_value = "worker_group")]
    group: String,

    #[arg(long, env = "FORECAST_CONSUMER", default_value = "worker_1")]
    consumer: String,

    /// Events per entity before recomputing
    #[arg(long, env = "FORECAST_BATCH_THRESHOLD", default_value_t = 20)]
    batch_threshold: u32,

    #[arg(long, env = "FORECAST_HORIZON_DAYS", default_value_t = 14)]
    horizon_days: u32,

    #[arg(long, env = "FORECAST_POLL_BATCH_SIZE", default_value_t = 10)]
    poll_batch_size: usize,

    #[arg(long, env = "FORECAST_POLL_TIMEOUT_MS", default_value_t = 5000)]
    poll_timeout_ms: u64,

    /// Forecast engine (moving-average or seasonal-naive)
    #[arg(long, env = "FORECAST_ENGINE", default_value_t = EngineKind::MovingAverage)]
    engine: EngineKind,

    /// Central prediction interval width
    #[arg(long, env = "FORECAST_INTERVAL_WIDTH", default_value_t = DEFAULT_INTERVAL_WIDTH)]
    interval_width: f64,

    /// Skip measurements already stored with the same entity, date and value
    #[arg(long, env = "FORECAST_DEDUPLICATE")]
    deduplicate: bool,

    /// Start with new entries instead of this consumer's pending ones
    #[arg(long)]
    no_replay_pending: bool,

    #[arg(long, env = "FORECAST_SNAPSHOT_PREFIX", default_value = DEFAULT_KEY_PREFIX)]
    snapshot_prefix: String,

    /// Seconds between metrics log lines
    #[arg(long, env = "FORECAST_METRICS_INTERVAL_SECS", default_value_t = 60)]
    metrics_interval_secs: u64,
}

#[derive(Args)]
struct PublishArgs {
    #[arg(long)]
    entity: String,

    #[arg(long)]
    value: u64,

    /// Measurement date (YYYY-MM-DD), defaults to today
    #[arg(long)]
    date: Option<chrono::NaiveDate>,

    #[arg(long, default_value_t = forecast_stream::event::DEFAULT_CAPACITY)]
    capacity: u32,

    #[arg(long, default_value_t = forecast_stream::event::DEFAULT_DISTANCE)]
    distance: f64,

    #[arg(long, env = "FORECAST_STREAM_KEY", default_value = "visits")]
    stream_key: String,
}

impl Cli {
    fn base_config(&self) -> ConsumerConfig {
        ConsumerConfig::builder()
            .redis_host(self.redis_host.clone())
            .redis_port(self.redis_port)
            .build()
    }

    fn open_repository(&self) -> Result<SqliteRepository> {
        SqliteRepository::open(&self.database)
            .with_context(|| format!("opening database {}", self.database.display()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&LogConfig {
        level: cli.log_level.clone(),
        format: cli.log_format,
    })?;

    match &cli.command {
        Command::Run(args) => run(&cli, args).await,
        Command::Snapshot {
            entity,
            snapshot_prefix,
        } => show_snapshot(&cli, entity, snapshot_prefix).await,
        Command::Forecasts { entity, days } => show_forecasts(&cli, entity, *days).await,
        Command::History { entity } => show_history(&cli, entity).await,
        Command::Publish(args) => publish(&cli, args).await,
    }
}

async fn run(cli: &Cli, args: &RunArgs) -> Result<()> {
    let mut config = cli.base_config();
    config.stream_key = args.stream_key.clone();
    config.group_name = args.group.clone();
    config.consumer_name = args.consumer.clone();
    config.batch_threshold = args.batch_threshold;
    config.forecast_horizon_days = args.horizon_days;
    config.poll_batch_size = args.poll_batch_size;
    config.poll_block_timeout = Duration::from_millis(args.poll_timeout_ms);
    config.deduplicate = args.deduplicate;
    config.replay_pending_on_start = !args.no_replay_pending;
    config.snapshot_key_prefix = args.snapshot_prefix.clone();
    config.metrics_interval = Duration::from_secs(args.metrics_interval_secs);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    let repository = Arc::new(cli.open_repository()?);
    let cache = Arc::new(
        RedisSnapshotCache::connect_with_prefix(&config.redis_url(), &config.snapshot_key_prefix)
            .await
            .context("connecting snapshot cache")?,
    );
    let stream = RedisEventStream::connect(&config)
        .await
        .context("connecting to stream")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine: Arc<dyn ForecastEngine> = Arc::from(args.engine.build(args.interval_width));
    let recomputer = Recomputer::new(
        repository.clone(),
        cache,
        engine,
        clock.clone(),
        config.forecast_horizon_days,
    );
    let processor = ForecastProcessor::new(repository, recomputer, clock, config.batch_threshold)
        .with_deduplication(config.deduplicate);

    info!(engine = %args.engine, database = %cli.database.display(), "starting worker");

    let shutdown = CancellationToken::new();
    let signals = cancel_on_signal(shutdown.clone());
    let mut consumer = StreamConsumer::new(config, stream, processor, shutdown.clone());
    let result = consumer.run().await;

    shutdown.cancel();
    let _ = signals.await;

    let report = result.context("consumer stopped with an error")?;
    info!(report = %serde_json::to_string(&report)?, "worker stopped");
    Ok(())
}

async fn show_snapshot(cli: &Cli, entity: &str, prefix: &str) -> Result<()> {
    let url = cli.base_config().redis_url();
    let cache = RedisSnapshotCache::connect_with_prefix(&url, prefix)
        .await
        .context("connecting snapshot cache")?;

    match cache.get(entity).await? {
        Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        None => println!("no snapshot for {entity}"),
    }
    Ok(())
}

async fn show_forecasts(cli: &Cli, entity: &str, days: u32) -> Result<()> {
    let repository = cli.open_repository()?;
    let range = DateRange::starting_at(SystemClock.today(), days);
    let rows = repository.query_forecasts(entity, range).await?;

    let latest = latest_generation(&rows);
    if latest.is_empty() {
        println!("no forecasts yet for {entity}");
        return Ok(());
    }
    for point in latest {
        println!("{}", serde_json::to_string(&point)?);
    }
    Ok(())
}

async fn show_history(cli: &Cli, entity: &str) -> Result<()> {
    let repository = cli.open_repository()?;
    let history = repository.query_history(entity).await?;
    if history.is_empty() {
        println!("no measurements for {entity}");
        return Ok(());
    }
    for row in history {
        println!("{}", serde_json::to_string(&row)?);
    }
    Ok(())
}

async fn publish(cli: &Cli, args: &PublishArgs) -> Result<()> {
    let mut config = cli.base_config();
    config.stream_key = args.stream_key.clone();
    let stream = RedisEventStream::connect(&config)
        .await
        .context("connecting to stream")?;

    let event = Event {
        entity_id: args.entity.clone(),
        timestamp: args.date.unwrap_or_else(|| SystemClock.today()),
        value: args.value,
        capacity: args.capacity,
        distance: args.distance,
    };
    let id = stream.publish(&event.to_fields()).await?;
    println!("{id}");
    Ok(())
}
