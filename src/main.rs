use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fleetwatch::data::{layout, Channel, FleetView, StatsSnapshot};
use fleetwatch::{
    FileSource, HttpSource, Overrides, PollSource, PushStream, Session, Settings, TelemetryStore,
};

#[derive(Parser, Debug)]
#[command(name = "fleetwatch")]
#[command(about = "Live telemetry client for a load-balanced server fleet")]
struct Args {
    /// Backend base URL (e.g., "http://localhost:5000")
    #[arg(short, long, conflicts_with = "file")]
    endpoint: Option<String>,

    /// Push stream address (host:port, newline-delimited JSON)
    #[arg(short, long)]
    push: Option<String>,

    /// Read /stats-shaped JSON from a file instead of polling the backend
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Poll interval (e.g., "5s", "500ms")
    #[arg(long)]
    poll_interval: Option<String>,

    /// Seed for traffic-event target selection
    #[arg(long)]
    seed: Option<u64>,

    /// Switch the backend to this routing algorithm on startup
    #[arg(short, long)]
    algorithm: Option<String>,

    /// Poll once, write the fleet state to a JSON file and exit
    #[arg(long, conflicts_with = "push")]
    export: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fleetwatch=info")),
        )
        .init();

    let args = Args::parse();
    let overrides = Overrides {
        endpoint: args.endpoint.clone(),
        push_addr: args.push.clone(),
        file: args.file.clone(),
        poll_interval: args.poll_interval.clone(),
        seed: args.seed,
    };
    let settings = Settings::load(args.config.as_deref(), &overrides)?;
    let source = build_source(&settings)?;

    // Handle export mode (non-interactive)
    if let Some(export_path) = args.export {
        return export_to_file(source.as_ref(), &settings, &export_path).await;
    }

    run_session(source, &settings, args.algorithm.as_deref()).await
}

/// Pick the poll source: a file in offline mode, the backend otherwise.
fn build_source(settings: &Settings) -> Result<Arc<dyn PollSource>> {
    if let Some(ref path) = settings.file {
        return Ok(Arc::new(FileSource::new(path)));
    }

    let source = HttpSource::builder(settings.endpoint.clone())
        .timeout(settings.request_timeout)
        .merge_servers(settings.merge_servers)
        .build()
        .with_context(|| format!("Failed to create HTTP client for {}", settings.endpoint))?;
    Ok(Arc::new(source))
}

/// Run a live session until Ctrl-C.
async fn run_session(
    source: Arc<dyn PollSource>,
    settings: &Settings,
    algorithm: Option<&str>,
) -> Result<()> {
    let mut session = Session::new(source, settings.session_options());
    if let Some(ref addr) = settings.push_addr {
        session = session.with_push(PushStream::connect_tcp(addr.clone(), settings.max_backoff));
    }
    let handle = session.start();
    info!("Watching {}", handle.description());

    if let Some(name) = algorithm {
        match handle.set_algorithm(name).await {
            Ok(active) => info!("Active algorithm: {}", active),
            Err(e) => warn!("Could not switch algorithm to {}: {}", name, e),
        }
    }

    // Log at most once per stats tick, and only when something changed
    let mut views = handle.subscribe();
    let mut ticker = tokio::time::interval(settings.stats_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if views.has_changed().unwrap_or(false) {
                    let view = views.borrow_and_update().clone();
                    info!("{}", view.headline());
                }
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                break;
            }
        }
    }

    let store = handle.stop().await?;
    print_store(&store);
    Ok(())
}

/// Print the last-known state of every server.
fn print_store(store: &TelemetryStore) {
    println!(
        "{:<24} {:>6} {:>7} {:>7} {:>6} {:>9}  {}",
        "SERVER", "STATUS", "CPU%", "MEM%", "CONNS", "RESP(ms)", "NOTE"
    );
    for view in store.entity_views() {
        let entity = &view.entity;
        let note = if view.stale { "stale" } else { "" };
        println!(
            "{:<24} {:>6} {:>7.1} {:>7.1} {:>6} {:>9.1}  {}",
            entity.name,
            view.status.symbol(),
            entity.cpu_usage,
            entity.memory_usage,
            entity.connections,
            entity.avg_response_time_ms,
            note
        );
    }
    if let Some(algorithm) = store.algorithm() {
        println!("algorithm: {}", algorithm);
    }
}

/// Export current fleet state to a JSON file
async fn export_to_file(
    source: &dyn PollSource,
    settings: &Settings,
    export_path: &Path,
) -> Result<()> {
    let batch = source
        .fetch()
        .await
        .with_context(|| format!("Failed to poll {}", source.description()))?;

    let now = Instant::now();
    let mut store = TelemetryStore::new(settings.session_options().store);
    store.apply_snapshot(&batch.entities, now);
    store.apply_summary(&batch.summary, Channel::Poll, now);
    if batch.dropped > 0 {
        warn!("Dropped {} malformed server records", batch.dropped);
    }

    let view = FleetView::build(&store, StatsSnapshot::default(), Vec::new(), now);

    // Build export structure
    let mut export = serde_json::Map::new();
    export.insert("source".to_string(), serde_json::json!(source.description()));
    export.insert(
        "summary".to_string(),
        serde_json::json!({
            "total_servers": view.counts.total(),
            "healthy": view.counts.healthy,
            "warning": view.counts.warning,
            "unhealthy": view.counts.unhealthy,
            "total_requests": view.summary.total_requests,
            "algorithm": view.algorithm,
        }),
    );
    export.insert("servers".to_string(), serde_json::to_value(&view.entities)?);
    export.insert(
        "topology".to_string(),
        serde_json::to_value(layout(&view.names(), 1.0, 1.0))?,
    );

    let json = serde_json::to_string_pretty(&serde_json::Value::Object(export))?;
    tokio::fs::write(export_path, json)
        .await
        .with_context(|| format!("Failed to write {}", export_path.display()))?;

    println!("Exported fleet state to: {}", export_path.display());
    Ok(())
}
