//! Tillsync CLI - Command line interface for the offline-first sync stack.
//!
//! This tool drives the same local cache, operation log, and sync engine
//! the terminals use: documents can be read and written while the API is
//! unreachable, and the queue can be inspected, drained, and settled.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use tillsync_cache::{LocalStore, OpStatus};
use tillsync_common::{ConflictStrategy, Owner};
use tillsync_net::{ConnectivityMonitor, MonitorConfig, MonitorRunner, ReachabilityProbe};
use tillsync_remote::RestStore;
use tillsync_sync::{
    DrainLoop, DrainOutcome, OfflineStore, StatusHub, StoreProbe, SyncConfig, SyncEngine,
    WriteOutcome,
};

#[derive(Parser)]
#[command(name = "tillsync")]
#[command(about = "Tillsync - offline-first document sync for the store back office")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Base URL of the document API.
    #[arg(long, default_value = "http://localhost:8080/v1")]
    api: String,

    /// Directory holding the local cache and operation log.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// User queued writes are attributed to.
    #[arg(long, default_value = "cli")]
    user: String,

    /// Tenant scope for queued writes.
    #[arg(long, default_value = "default")]
    tenant: String,

    /// Store location scope for queued writes.
    #[arg(long, default_value = "main")]
    store: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show connectivity and queue state.
    Status,

    /// List queued operations.
    Pending {
        /// Only show operations with this status:
        /// pending, in_progress, completed, failed, or conflict.
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Replay queued operations against the remote store now.
    Drain,

    /// Settle a parked conflict.
    Resolve {
        /// Operation id, as shown by `pending --status conflict`.
        op_id: String,

        /// Settlement: "client-wins" or "server-wins".
        #[arg(short = 's', long, default_value = "server-wins")]
        strategy: String,
    },

    /// Show the recent sync journal.
    Log {
        /// Number of entries to show.
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Prune completed operations from the log.
    Compact,

    /// Run the monitor and auto-sync loops until interrupted.
    Watch,

    /// Create a document.
    Create {
        /// Collection the document belongs to.
        collection: String,

        /// Document id.
        id: String,

        /// Document fields as a JSON object.
        data: String,
    },

    /// Update fields of a document.
    Update {
        /// Collection the document belongs to.
        collection: String,

        /// Document id.
        id: String,

        /// Changed fields as a JSON object.
        patch: String,
    },

    /// Delete a document.
    Delete {
        /// Collection the document belongs to.
        collection: String,

        /// Document id.
        id: String,
    },

    /// Read one document.
    Get {
        /// Collection the document belongs to.
        collection: String,

        /// Document id.
        id: String,
    },

    /// List documents in a collection.
    List {
        /// Collection to list.
        collection: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let rt = open_runtime(&cli).await?;

    match cli.command {
        Commands::Status => cmd_status(&rt).await,

        Commands::Pending { status } => cmd_pending(&rt, status.as_deref()).await,

        Commands::Drain => cmd_drain(&rt).await,

        Commands::Resolve { op_id, strategy } => cmd_resolve(&rt, &op_id, &strategy).await,

        Commands::Log { limit } => cmd_log(&rt, limit).await,

        Commands::Compact => cmd_compact(&rt).await,

        Commands::Watch => cmd_watch(&rt).await,

        Commands::Create {
            collection,
            id,
            data,
        } => cmd_create(&rt, &collection, &id, &data).await,

        Commands::Update {
            collection,
            id,
            patch,
        } => cmd_update(&rt, &collection, &id, &patch).await,

        Commands::Delete { collection, id } => cmd_delete(&rt, &collection, &id).await,

        Commands::Get { collection, id } => cmd_get(&rt, &collection, &id).await,

        Commands::List { collection } => cmd_list(&rt, &collection).await,
    }
}

/// Shared handles behind every subcommand.
struct Runtime {
    local: Arc<LocalStore>,
    monitor: Arc<ConnectivityMonitor>,
    engine: Arc<SyncEngine<RestStore>>,
    store: OfflineStore<RestStore>,
}

/// Wire up the remote client, local store, monitor, and engine.
async fn open_runtime(cli: &Cli) -> Result<Runtime> {
    let data_dir = match &cli.data_dir {
        Some(dir) => dir.clone(),
        None => default_data_dir()?,
    };

    let config = load_config(&data_dir).await?;

    let remote = Arc::new(RestStore::new(&cli.api).context("Failed to create API client")?);
    let local = Arc::new(
        LocalStore::open(&data_dir, config.priorities())
            .await
            .context("Failed to open local store")?,
    );

    let probe: Arc<dyn ReachabilityProbe> = Arc::new(StoreProbe::new(remote.clone()));
    let monitor = Arc::new(ConnectivityMonitor::new(probe, MonitorConfig::default()));
    // One real probe up front, so write routing reflects the actual
    // API rather than the assumed startup status.
    monitor.manual_check().await;

    let status = Arc::new(StatusHub::new());
    let owner = Owner::new(&cli.user, &cli.tenant, &cli.store);

    let engine = Arc::new(
        SyncEngine::new(
            remote.clone(),
            local.clone(),
            monitor.clone(),
            status.clone(),
            config,
        )
        .await,
    );
    let store = OfflineStore::new(remote, local.clone(), monitor.clone(), status, owner);

    Ok(Runtime {
        local,
        monitor,
        engine,
        store,
    })
}

/// Platform data directory for the local store.
fn default_data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("No data directory available on this platform")?;
    Ok(base.join("tillsync"))
}

/// Load sync settings from `config.json` in the data directory.
///
/// A missing file, or missing fields in a present one, fall back to
/// the defaults.
async fn load_config(data_dir: &Path) -> Result<SyncConfig> {
    let path = data_dir.join("config.json");
    match tokio::fs::read_to_string(&path).await {
        Ok(raw) => serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file: {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SyncConfig::default()),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

fn parse_status(s: &str) -> Result<OpStatus> {
    match s {
        "pending" => Ok(OpStatus::Pending),
        "in_progress" => Ok(OpStatus::InProgress),
        "completed" => Ok(OpStatus::Completed),
        "failed" => Ok(OpStatus::Failed),
        "conflict" => Ok(OpStatus::Conflict),
        _ => {
            anyhow::bail!(
                "Invalid status. Use: pending, in_progress, completed, failed, or conflict"
            );
        }
    }
}

fn parse_strategy(s: &str) -> Result<ConflictStrategy> {
    let strategy: ConflictStrategy = s
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid strategy. Use: client-wins or server-wins"))?;
    if strategy == ConflictStrategy::Manual {
        anyhow::bail!("Manual settles nothing. Use: client-wins or server-wins");
    }
    Ok(strategy)
}

/// Show connectivity and queue state.
async fn cmd_status(rt: &Runtime) -> Result<()> {
    let counts = rt.local.counts_by_status().await;
    let count = |s: OpStatus| counts.get(&s).copied().unwrap_or(0);

    let reachable = if rt.monitor.is_online() {
        "reachable"
    } else {
        "unreachable"
    };

    println!("Remote store: {}", reachable);
    println!("Operation queue:");
    println!("  pending:     {}", count(OpStatus::Pending));
    println!("  in progress: {}", count(OpStatus::InProgress));
    println!("  failed:      {}", count(OpStatus::Failed));
    println!("  conflicts:   {}", count(OpStatus::Conflict));
    println!("  completed:   {}", count(OpStatus::Completed));

    let conflicts = rt.engine.pending_conflicts().await;
    if !conflicts.is_empty() {
        println!("\nParked conflicts (settle with `tillsync resolve`):");
        for op in conflicts {
            println!(
                "  {}  {} {}/{}",
                op.id,
                op.kind,
                op.key.collection(),
                op.key.id()
            );
        }
    }

    Ok(())
}

/// List queued operations.
async fn cmd_pending(rt: &Runtime, status: Option<&str>) -> Result<()> {
    let filter = status.map(parse_status).transpose()?;
    let ops = rt.local.pending_operations(filter).await;

    if ops.is_empty() {
        println!("No queued operations.");
        return Ok(());
    }

    for op in ops {
        println!(
            "{}  [{}] {} {}/{} (queued {}, retries {})",
            op.id,
            op.status,
            op.kind,
            op.key.collection(),
            op.key.id(),
            op.queued_at.format("%Y-%m-%d %H:%M:%S"),
            op.retry_count
        );
        if let Some(err) = &op.last_error {
            println!("    last error: {}", err);
        }
    }

    Ok(())
}

/// Replay the queue against the remote store.
async fn cmd_drain(rt: &Runtime) -> Result<()> {
    info!("Draining operation queue");

    // Requeue timers from earlier runs died with their process; put
    // retryable failures back in the queue before draining.
    let max_retries = rt.engine.config().max_retry_count;
    for op in rt.local.pending_operations(Some(OpStatus::Failed)).await {
        if op.retry_count < max_retries {
            rt.local
                .update_operation_status(&op.id, OpStatus::Pending, None)
                .await
                .context("Failed to requeue operation")?;
        }
    }

    match rt.engine.drain().await.context("Drain failed")? {
        DrainOutcome::Ran(summary) => {
            if summary.total == 0 {
                println!("Queue is empty; nothing to sync.");
            } else {
                println!(
                    "Drained {} operation(s) in {:?}:",
                    summary.total, summary.duration
                );
                println!("  completed: {}", summary.completed);
                println!("  failed:    {}", summary.failed);
                println!("  conflicts: {}", summary.conflicts);
            }
        }
        DrainOutcome::Offline => {
            println!("Remote store is unreachable; queued operations were left untouched.");
        }
        DrainOutcome::AlreadyRunning => {
            println!("A drain is already running.");
        }
    }

    Ok(())
}

/// Settle one parked conflict.
async fn cmd_resolve(rt: &Runtime, op_id: &str, strategy: &str) -> Result<()> {
    let strategy = parse_strategy(strategy)?;

    match rt.local.operation(op_id).await {
        Some(op) if op.status == OpStatus::Conflict => {}
        Some(op) => {
            anyhow::bail!("Operation {} is {}, not a parked conflict", op_id, op.status);
        }
        None => {
            anyhow::bail!("No operation with id {}", op_id);
        }
    }

    rt.engine
        .resolve_conflict(op_id, strategy)
        .await
        .context("Failed to settle conflict")?;

    println!("Conflict settled: {} ({})", op_id, strategy);

    Ok(())
}

/// Show recent sync journal entries, oldest first.
async fn cmd_log(rt: &Runtime, limit: usize) -> Result<()> {
    let entries = rt
        .local
        .recent_sync_log(limit)
        .await
        .context("Failed to read sync journal")?;

    if entries.is_empty() {
        println!("Sync journal is empty.");
        return Ok(());
    }

    for entry in entries {
        let outcome = match &entry.error {
            Some(err) => format!("{} ({})", entry.status, err),
            None => entry.status.to_string(),
        };
        println!(
            "{}  {} {}/{}  {}  {}ms",
            entry.logged_at.format("%Y-%m-%d %H:%M:%S"),
            entry.kind,
            entry.collection,
            entry.doc_id,
            outcome,
            entry.duration_ms
        );
    }

    Ok(())
}

/// Drop completed operations from the log.
async fn cmd_compact(rt: &Runtime) -> Result<()> {
    let removed = rt
        .local
        .compact_completed()
        .await
        .context("Failed to compact operation log")?;

    println!("Removed {} completed operation(s).", removed);

    Ok(())
}

/// Run the monitor and drain loops until Ctrl-C.
async fn cmd_watch(rt: &Runtime) -> Result<()> {
    let (runner, runner_handle) = MonitorRunner::new(rt.monitor.clone());
    let (drain_loop, drain_handle) = DrainLoop::new(rt.engine.clone());
    let reconnect_subscription = drain_handle.attach_monitor(&rt.monitor);

    let runner_task = tokio::spawn(runner.run());
    let drain_task = tokio::spawn(drain_loop.run());

    println!("Syncing in the background; press Ctrl-C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    rt.monitor.unsubscribe(reconnect_subscription);
    drain_handle.shutdown().await;
    runner_handle.shutdown().await;
    let _ = drain_task.await;
    let _ = runner_task.await;

    println!("Stopped.");

    Ok(())
}

/// Create a document through the offline-aware store.
async fn cmd_create(rt: &Runtime, collection: &str, id: &str, data: &str) -> Result<()> {
    let data: Value = serde_json::from_str(data).context("Document data is not valid JSON")?;

    let outcome = rt
        .store
        .create(collection, id, data)
        .await
        .context("Create failed")?;

    report_write(&outcome);
    Ok(())
}

/// Update a document through the offline-aware store.
async fn cmd_update(rt: &Runtime, collection: &str, id: &str, patch: &str) -> Result<()> {
    let patch: Value = serde_json::from_str(patch).context("Patch is not valid JSON")?;

    let outcome = rt
        .store
        .update(collection, id, patch)
        .await
        .context("Update failed")?;

    report_write(&outcome);
    Ok(())
}

/// Delete a document through the offline-aware store.
async fn cmd_delete(rt: &Runtime, collection: &str, id: &str) -> Result<()> {
    let outcome = rt
        .store
        .delete(collection, id)
        .await
        .context("Delete failed")?;

    report_write(&outcome);
    Ok(())
}

fn report_write(outcome: &WriteOutcome) {
    match outcome {
        WriteOutcome::Applied => println!("Confirmed by the remote store."),
        WriteOutcome::Queued { op_id } => {
            println!("Recorded locally; queued for sync as operation {}.", op_id);
        }
    }
}

/// Read one document, serving the freshest copy available.
async fn cmd_get(rt: &Runtime, collection: &str, id: &str) -> Result<()> {
    match rt.store.get(collection, id).await.context("Read failed")? {
        Some(data) => println!("{}", serde_json::to_string_pretty(&data)?),
        None => println!("Document not found: {}/{}", collection, id),
    }

    Ok(())
}

/// List a collection, overlaying writes not yet confirmed remotely.
async fn cmd_list(rt: &Runtime, collection: &str) -> Result<()> {
    let docs = rt.store.list(collection).await.context("Listing failed")?;

    if docs.is_empty() {
        println!("Collection is empty.");
        return Ok(());
    }

    for (id, data) in docs {
        println!("{}  {}", id, serde_json::to_string(&data)?);
    }

    Ok(())
}
