// ABOUTME: CLI entry point for plant-sync-reconciler
// ABOUTME: Parses commands and routes to appropriate handlers

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use plant_sync_reconciler::commands::{self, Settings};
use plant_sync_reconciler::config::{
    default_lock_path, CentralConfig, FileConfig, ReconcileConfig, DEFAULT_MYSQL_PORT,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "plant-sync-reconciler")]
#[command(about = "Detects and repairs stalled plant-to-central sync channels", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(flatten)]
    central: CentralArgs,
    #[command(flatten)]
    engine: EngineArgs,
    /// Path to a TOML file with plant profiles, routes, column and sink names
    #[arg(long = "config", global = true)]
    config_path: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CentralArgs {
    /// Central store host
    #[arg(long, env = "DB_HOST", global = true, default_value = "localhost")]
    db_host: String,
    #[arg(long, env = "DB_PORT", global = true, default_value_t = DEFAULT_MYSQL_PORT)]
    db_port: u16,
    #[arg(long, env = "DB_USER", global = true, default_value = "root")]
    db_user: String,
    #[arg(long, env = "DB_PASS", global = true, default_value = "", hide_env_values = true)]
    db_pass: String,
    /// Schema holding the per-device measurement tables
    #[arg(long, env = "DB_NAME", global = true, default_value = "datos_base_plantas")]
    db_name: String,
    /// Schema holding the audit, error and connection-problem tables
    #[arg(long, env = "DB_NAME_SUPPORT", global = true, default_value = "soporte_tensor")]
    support_db: String,
}

#[derive(Args)]
struct EngineArgs {
    /// Minutes of lag beyond which a table is a stale candidate
    #[arg(long, env = "STALE_THRESHOLD_MIN", global = true, default_value_t = 3)]
    threshold_minutes: i64,
    /// Tables never reconciled (comma-separated)
    #[arg(long, env = "EXCLUDED_TABLES", global = true, value_delimiter = ',')]
    exclude_tables: Vec<String>,
    /// Rows deleted from the tail of a table per purge
    #[arg(long, env = "PURGE_BATCH_SIZE", global = true, default_value_t = 30)]
    purge_batch: u32,
    /// Stale tables (or plants) handled concurrently
    #[arg(long, global = true, default_value_t = 8)]
    concurrency: usize,
    /// Append-only log of purges, outages and connection problems
    #[arg(long, global = true, default_value = "log_sincronizacion.log")]
    log_file: PathBuf,
    /// PID lock file guarding reconciliation passes
    #[arg(long, global = true)]
    lock_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a reconciliation pass over every stale table
    Reconcile {
        /// Repeat passes every N seconds until Ctrl+C
        #[arg(long)]
        interval: Option<u64>,
        /// Compute and log verdicts without purging
        #[arg(long)]
        dry_run: bool,
    },
    /// Ping every configured plant and record unreachable ones
    CheckConnections,
    /// Show freshness of every monitored table without contacting plants
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // We need to parse CLI args early to get the log level
    let cli = Cli::parse();

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    // 3. Default to "info" if neither are provided
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let file = match &cli.config_path {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let central = CentralConfig {
        host: cli.central.db_host,
        port: cli.central.db_port,
        user: cli.central.db_user,
        password: cli.central.db_pass,
        database: cli.central.db_name,
        support_database: cli.central.support_db,
    };
    let lock_file = match cli.engine.lock_file {
        Some(path) => path,
        None => default_lock_path().context("Use --lock-file to choose a lock location")?,
    };
    let mut engine = ReconcileConfig {
        threshold_minutes: cli.engine.threshold_minutes,
        excluded_tables: cli
            .engine
            .exclude_tables
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        purge_batch: cli.engine.purge_batch,
        concurrency: cli.engine.concurrency,
        log_file: cli.engine.log_file,
        lock_file: Some(lock_file),
        ..ReconcileConfig::default()
    };

    match cli.command {
        Commands::Reconcile { interval, dry_run } => {
            engine.dry_run = dry_run;
            commands::reconcile(Settings::new(central, engine, file), interval).await
        }
        Commands::CheckConnections => {
            commands::check_connections(Settings::new(central, engine, file)).await
        }
        Commands::Status => commands::status(Settings::new(central, engine, file)).await,
    }
}
