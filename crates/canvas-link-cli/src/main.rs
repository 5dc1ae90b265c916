use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use canvas_link_core::config::{Config, LoggingConfig};
use canvas_link_core::protocol::DatabaseStats;
use canvas_link_sync::{CanvasStore, HttpCanvasRemote, ReconcileOutcome, Reconciler, SyncQueue};
use canvas_link_transport::endpoint::resolve_ws_url;
use canvas_link_transport::{ConnectionManager, LogNotifier, Router};

mod startup;

#[derive(Parser)]
#[command(
    name = "canvas-link",
    about = "Realtime link between a local canvas and its backend",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the local canvas, connect, and stay connected until Ctrl-C
    Run,

    /// Show derived endpoints and local sync state
    Status,

    /// Configuration inspection
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Outbound sync queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a config value by dotted path
    Get { key: String },
}

#[derive(Subcommand)]
enum QueueAction {
    /// List queued operations
    List,
    /// Send queued operations to the backend
    Flush,
}

fn init_logging(verbose: bool, logging: Option<&LoggingConfig>) {
    let level = if verbose {
        "debug"
    } else {
        logging.and_then(|l| l.level.as_deref()).unwrap_or("info")
    };
    let mut directives = vec![level.to_string()];
    if let Some(logging) = logging {
        directives.extend(logging.filters.iter().cloned());
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives.join(",")));

    let json = logging.is_some_and(|l| l.format == "json");
    let stdout = logging.is_some_and(|l| l.output == "stdout");
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match (json, stdout) {
        (true, true) => builder.json().with_writer(std::io::stdout).init(),
        (true, false) => builder.json().with_writer(std::io::stderr).init(),
        (false, true) => builder.with_writer(std::io::stdout).init(),
        (false, false) => builder.with_writer(std::io::stderr).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)?;

    init_logging(cli.verbose, config.logging.as_ref());

    match cli.command {
        Commands::Run => run(&config).await?,
        Commands::Status => status(&config, &config_path).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => println!("{key}: not set"),
            },
        },
        Commands::Queue { action } => {
            let mut queue = SyncQueue::open(config.sync_dir()).await?;
            match action {
                QueueAction::List => {
                    if queue.is_empty() {
                        println!("Sync queue is empty");
                    }
                    for entry in queue.entries() {
                        let (kind, id) = entry.operation.key();
                        println!("{}  {kind:<20} {id}", entry.enqueued_at.to_rfc3339());
                    }
                }
                QueueAction::Flush => {
                    let remote = HttpCanvasRemote::from_config(&config)?;
                    let report = queue.drain(&remote).await?;
                    println!("Sent {}, {} remaining", report.sent, report.remaining);
                    if let Some(failure) = report.failure {
                        anyhow::bail!("Flush stopped: {failure}");
                    }
                }
            }
        }
    }

    Ok(())
}

async fn status(config: &Config, config_path: &std::path::Path) -> anyhow::Result<()> {
    println!("canvas-link v{}", env!("CARGO_PKG_VERSION"));
    println!("Config: {}", config_path.display());
    println!("Backend: {}", config.backend_url().unwrap_or("(page origin)"));
    println!("HTTP origin: {}", config.http_origin());
    match resolve_ws_url(config.backend_url(), config.page_origin()) {
        Ok(url) => println!("Socket: {url}"),
        Err(e) => println!("Socket: invalid ({e})"),
    }

    let sync_dir = config.sync_dir();
    let local = CanvasStore::new(&sync_dir).load().await?;
    let queue = SyncQueue::open(&sync_dir).await?;
    println!("Sync dir: {}", sync_dir.display());
    println!(
        "Local canvas: {} glyphs, {} compositions, {} minimized windows",
        local.glyphs.len(),
        local.compositions.len(),
        local.minimized.len()
    );
    println!("Queued operations: {}", queue.len());

    let (warnings, errors) = config.validate();
    for w in &warnings {
        println!("Warning: {w}");
    }
    for e in &errors {
        println!("Error: {e}");
    }
    Ok(())
}

async fn run(config: &Config) -> anyhow::Result<()> {
    let (warnings, errors) = config.validate();
    for w in &warnings {
        warn!("{w}");
    }
    if !errors.is_empty() {
        anyhow::bail!("Invalid config:\n  {}", errors.join("\n  "));
    }

    let sync_dir = config.sync_dir();
    let store = CanvasStore::new(&sync_dir);
    let mut local = store.load().await?;
    let mut queue = SyncQueue::open(&sync_dir).await?;
    let remote = Arc::new(HttpCanvasRemote::from_config(config)?);
    let reconciler = Reconciler::new(remote.clone(), config.snapshot_timeout());

    let router = Router::new(Arc::new(LogNotifier));
    let mut daemon = router.subscribe_daemon();
    let (router, router_task) = router.spawn();
    router.register(|stats: DatabaseStats| {
        info!(
            path = %stats.path,
            attestations = stats.total_attestations,
            actors = stats.unique_actors,
            "Database stats"
        );
    });
    router.set_fallback(|frame| debug!(kind = %frame.kind, "Unhandled message"));

    let mut connection = ConnectionManager::from_config(config);
    let (outcome, mut status) = startup::start(
        &mut connection,
        router.clone(),
        &reconciler,
        &mut local,
        &mut queue,
    )
    .await?;

    if let ReconcileOutcome::Enqueued { entities, reason, .. } = &outcome {
        info!(entities, %reason, queued = queue.len(), "Working from local canvas");
    }
    if outcome.adopted_any() {
        if let Err(e) = store.save(&local).await {
            warn!(error = %e, "Failed to save merged canvas");
        }
    }

    let current = *status.borrow_and_update();
    startup::flush_if_open(current, &mut queue, remote.as_ref()).await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                info!(status = ?current, "Connection status");
                startup::flush_if_open(current, &mut queue, remote.as_ref()).await;
            }
            changed = daemon.changed() => {
                if changed.is_err() {
                    warn!("Router stopped");
                    break;
                }
                if let Some(d) = daemon.borrow_and_update().as_ref() {
                    info!(running = d.running, active_jobs = d.active_jobs, "Daemon status");
                }
            }
        }
    }

    info!("Shutting down");
    connection.cleanup().await;
    drop(router);
    router_task.await?;
    Ok(())
}
