//! CLI entry point for the taxi stream aggregator.
//!
//! Provides subcommands for folding T-Drive ping files into per-taxi speed,
//! distance and average-speed metrics, and for inspecting committed state.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use taxi_stream::aggregators::{AverageSpeedState, DistanceState, PositionState};
use taxi_stream::config::PipelineConfig;
use taxi_stream::engine::Engine;
use taxi_stream::notify::{BasicClient, Bearer};
use taxi_stream::output::{CsvSink, HttpSink, LogSink};
use taxi_stream::pipeline::Pipeline;
use taxi_stream::reading::TaxiId;
use taxi_stream::source::{into_batches, read_all};
use taxi_stream::state::{BatchId, FileStore, MemoryStore, StateAdapter, StateStore};
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "taxi_stream")]
#[command(about = "Per-taxi speed, distance and average speed from GPS pings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fold one or more T-Drive ping files into per-taxi metrics
    Process {
        /// Ping files (`id,timestamp,longitude,latitude`, no header)
        #[arg(value_name = "FILES", required = true)]
        files: Vec<PathBuf>,

        /// JSON config file; flags below override its values
        #[arg(short, long)]
        config: Option<String>,

        /// Readings per batch
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Maximum number of taxis folded concurrently
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Directory for durable state (in-memory when omitted)
        #[arg(short, long)]
        state_dir: Option<PathBuf>,

        /// Directory for speed/distance/average_speed CSV files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Dashboard base URL; emissions are posted to <URL>/stats
        #[arg(long)]
        dashboard_url: Option<String>,

        /// Id of the first batch; defaults to one past the highest committed id
        #[arg(long)]
        first_batch_id: Option<u64>,

        /// Log every emission
        #[arg(long, default_value_t = false)]
        log_emissions: bool,
    },
    /// Show the committed state of one taxi
    Inspect {
        /// Directory holding durable state
        #[arg(short, long, default_value = "state")]
        state_dir: PathBuf,

        #[arg(value_name = "TAXI_ID")]
        taxi_id: TaxiId,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/taxi_stream.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("taxi_stream.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            files,
            config,
            batch_size,
            concurrency,
            state_dir,
            output_dir,
            dashboard_url,
            first_batch_id,
            log_emissions,
        } => {
            let mut cfg = match config {
                Some(path) => PipelineConfig::load(&path)?,
                None => PipelineConfig::default(),
            };
            if let Some(v) = batch_size {
                cfg.batch_size = v;
            }
            if let Some(v) = concurrency {
                cfg.concurrency = v;
            }
            cfg.first_batch_id = first_batch_id.or(cfg.first_batch_id);
            cfg.state_dir = state_dir.or(cfg.state_dir);
            cfg.output_dir = output_dir.or(cfg.output_dir);
            cfg.dashboard_url = dashboard_url
                .or(cfg.dashboard_url)
                .or_else(|| std::env::var("DASHBOARD_URL").ok());
            cfg.log_emissions |= log_emissions;

            match cfg.state_dir.clone() {
                Some(dir) => {
                    let store = FileStore::open(&dir).await?;
                    info!(state_dir = %dir.display(), "Using file state store");
                    process(Arc::new(store), &cfg, &files).await?;
                }
                None => {
                    warn!("No state dir configured, state is lost on exit");
                    process(Arc::new(MemoryStore::new()), &cfg, &files).await?;
                }
            }
        }
        Commands::Inspect { state_dir, taxi_id } => {
            inspect(&state_dir, taxi_id).await?;
        }
    }

    Ok(())
}

/// Reads the ping files, batches them and runs them through the pipeline.
#[tracing::instrument(skip_all, fields(files = files.len(), batch_size = cfg.batch_size, concurrency = cfg.concurrency))]
async fn process<S: StateStore>(store: Arc<S>, cfg: &PipelineConfig, files: &[PathBuf]) -> Result<()> {
    let pings = read_all(files)?;

    let first_batch = match cfg.first_batch_id {
        Some(id) => BatchId(id),
        None => StateAdapter::new(store.clone()).next_batch().await?,
    };
    info!(first_batch = %first_batch, "Numbering batches");
    let batches = into_batches(pings.readings, cfg.batch_size, first_batch.0);

    let engine = Engine::new(store, cfg.concurrency);
    let mut pipeline = Pipeline::new(
        engine,
        cfg.max_retries,
        Duration::from_millis(cfg.retry_backoff_ms),
    );

    if let Some(dir) = &cfg.output_dir {
        info!(output_dir = %dir.display(), "CSV output enabled");
        pipeline = pipeline.with_sink(CsvSink::new(dir)?);
    }
    if let Some(url) = &cfg.dashboard_url {
        let client = BasicClient::new()?;
        pipeline = match std::env::var("DASHBOARD_TOKEN") {
            Ok(token) => pipeline.with_sink(HttpSink::new(Bearer::new(client, &token)?, url)),
            Err(_) => pipeline.with_sink(HttpSink::new(client, url)),
        };
        info!(dashboard_url = %url, "Dashboard output enabled");
    }
    if cfg.log_emissions {
        pipeline = pipeline.with_sink(LogSink);
    }

    let summary = pipeline.run(batches).await?;

    info!(
        malformed_lines = pings.rejected.len(),
        summary = %serde_json::to_string(&summary)?,
        "Finished processing ping files"
    );
    Ok(())
}

/// Logs the committed slices of one taxi.
async fn inspect(state_dir: &Path, taxi_id: TaxiId) -> Result<()> {
    let store = FileStore::open(state_dir).await?;
    let state = StateAdapter::new(Arc::new(store));

    match state.load::<PositionState>(taxi_id).await? {
        Some(p) => info!(
            taxi_id,
            batch = %p.batch,
            last_timestamp = %p.state.last_timestamp,
            latitude = p.state.last_latitude,
            longitude = p.state.last_longitude,
            "Position"
        ),
        None => info!(taxi_id, "No position state"),
    }

    match state.load::<DistanceState>(taxi_id).await? {
        Some(d) => info!(
            taxi_id,
            batch = %d.batch,
            cumulative_distance = d.state.cumulative_distance,
            "Distance"
        ),
        None => info!(taxi_id, "No distance state"),
    }

    match state.load::<AverageSpeedState>(taxi_id).await? {
        Some(a) => info!(
            taxi_id,
            batch = %a.batch,
            last_timestamp = %a.state.last_timestamp,
            average_speed = a.state.average_speed,
            total_hours = a.state.total_hours,
            "Average speed"
        ),
        None => info!(taxi_id, "No average speed state"),
    }

    Ok(())
}
