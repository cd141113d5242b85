//! Tally CLI
//!
//! Tracks a single event and waits for it to leave the queue.
//!
//! ## Usage
//!
//! ```bash
//! # Send a page view
//! tally --collector collector.example.com pageView '{"pageUrl": "/home"}'
//!
//! # Keep undelivered events across runs
//! TALLY_STORAGE_DIR=/var/lib/tally tally --collector localhost:8080 --unsecure signup
//!
//! # Attach extra metadata groups
//! tally --collector c.example.com --metadata '{"userInfo": {"guid": "u-1"}}' pageView
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde_json::Value;
use tally_tracker::{
    DurableStorage, FileStorage, HttpTransport, InMemoryStorage, NullTransport, SharedContext, Tracker,
    TrackerConfig, TrackerError, TrackerResult, Transport,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tally", version, about = "Send one telemetry event to a Tally collector")]
struct Cli {
    /// Collector host, with or without scheme
    #[arg(long, env = "TALLY_COLLECTOR")]
    collector: Option<String>,

    /// JSON tracker configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tracker namespace
    #[arg(long)]
    namespace: Option<String>,

    /// Deployment environment
    #[arg(long = "env")]
    environment: Option<String>,

    /// Send plain JSON instead of base64
    #[arg(long)]
    no_base64: bool,

    /// Use http for the collector
    #[arg(long)]
    unsecure: bool,

    /// Directory for the durable queue; in-memory when unset
    #[arg(long, env = "TALLY_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Extra metadata tree merged into the event (repeatable)
    #[arg(long, value_name = "JSON")]
    metadata: Vec<String>,

    /// Accept every send without touching the network
    #[arg(long)]
    dry_run: bool,

    /// Event type, e.g. pageView
    event_type: String,

    /// Event context as a JSON object
    ctx: Option<String>,
}

fn parse_json(label: &str, text: &str) -> TrackerResult<Value> {
    serde_json::from_str(text).map_err(|e| TrackerError::Config(format!("invalid {} JSON: {}", label, e)))
}

fn build_config(cli: &Cli) -> TrackerResult<TrackerConfig> {
    let mut config = match &cli.config {
        Some(path) => TrackerConfig::from_file(path)?,
        None => TrackerConfig::default(),
    };
    if let Some(namespace) = &cli.namespace {
        config = config.with_namespace(namespace);
    }
    if let Some(environment) = &cli.environment {
        config = config.with_environment(environment);
    }
    if cli.no_base64 {
        config = config.with_base64(false);
    }
    if cli.unsecure {
        config.force_secure_tracker = false;
        config.force_unsecure_tracker = true;
    }
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> TrackerResult<usize> {
    let config = build_config(&cli)?;

    let ctx = match &cli.ctx {
        Some(text) => parse_json("context", text)?,
        None => Value::Object(Default::default()),
    };
    let metadata = cli
        .metadata
        .iter()
        .map(|text| parse_json("metadata", text))
        .collect::<TrackerResult<Vec<Value>>>()?;

    let storage: Arc<dyn DurableStorage> = match &cli.storage_dir {
        Some(dir) => Arc::new(FileStorage::new(dir)?),
        None => Arc::new(InMemoryStorage::new()),
    };
    let transport: Arc<dyn Transport> = if cli.dry_run {
        Arc::new(NullTransport)
    } else {
        Arc::new(HttpTransport::new()?)
    };

    let context = SharedContext::new();
    let mut tracker = Tracker::new(config, &context, storage, transport)?;
    if let Some(collector) = &cli.collector {
        tracker.set_collector_url(collector);
    }

    tracing::info!(
        event_type = %cli.event_type,
        collector = tracker.collector_url().unwrap_or("<unset>"),
        restored = tracker.queue().pending_count(),
        "Tracking event"
    );

    if !tracker.track(&cli.event_type, ctx, &metadata, None)? {
        tracing::info!("Do-not-track is set; nothing sent");
    }

    let pending = context.unload_guard().await;
    let stats = tracker.queue_stats();
    tracing::info!(
        delivered = stats.total_delivered,
        failed_sends = stats.total_failed_sends,
        pending,
        "Done"
    );
    Ok(pending)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tally_tracker=info,tally=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(pending) => {
            println!("{} event(s) still queued", pending);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Tracking failed");
            eprintln!("error: {}", e);
            ExitCode::from(2)
        }
    }
}
