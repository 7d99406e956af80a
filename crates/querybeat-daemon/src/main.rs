use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use querybeat_core::{ExecutionStatus, QuerybeatConfig, TaskId};
use querybeat_daemon::{open_db, Engine};
use querybeat_executor::PgConnector;
use querybeat_ledger::{ExecutionLedger, LedgerFilter};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "querybeat",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("QUERYBEAT_GIT_SHA"), ")"),
    about = "Cron-scheduled read-only query runner"
)]
struct Cli {
    /// Config file (default: $QUERYBEAT_CONFIG, then ~/.querybeat/querybeat.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the dispatcher and workers until Ctrl-C.
    Serve,
    /// Execute a task now and print the finished record.
    Run {
        task_id: TaskId,
        /// Give up waiting after this many seconds.
        #[arg(long, default_value_t = 300)]
        wait_secs: u64,
    },
    /// List execution records, newest first.
    History {
        #[arg(long)]
        task_id: Option<TaskId>,
        /// PENDING, RETRY, SUCCESS or FAILURE
        #[arg(long)]
        status: Option<ExecutionStatus>,
        #[arg(long, default_value_t = LedgerFilter::DEFAULT_LIMIT)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "querybeat=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // config: --config > QUERYBEAT_CONFIG env > ~/.querybeat/querybeat.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("QUERYBEAT_CONFIG").ok());
    let config = QuerybeatConfig::load(config_path.as_deref())?;

    if let Command::History {
        task_id,
        status,
        limit,
    } = cli.command
    {
        // read-only: no dispatcher, no workers
        let ledger = ExecutionLedger::new(open_db(&config.database.path)?)?;
        let filter = LedgerFilter {
            task_id,
            status,
            limit: Some(limit),
        };
        println!("{}", serde_json::to_string_pretty(&ledger.list(&filter)?)?);
        return Ok(());
    }

    let connector = Arc::new(PgConnector::new(Duration::from_secs(
        config.workers.connect_timeout_secs,
    )));
    let engine = Engine::start(config, connector).await?;

    match cli.command {
        Command::Serve => {
            info!("querybeat serving; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
        }
        Command::Run { task_id, wait_secs } => {
            let token = engine.run(task_id).await?;
            let record = engine
                .wait_for(&token, Duration::from_secs(wait_secs))
                .await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::History { .. } => unreachable!("handled above"),
    }

    engine.shutdown().await;
    Ok(())
}
