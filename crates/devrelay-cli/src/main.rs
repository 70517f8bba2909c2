mod config;
mod report_cmd;
mod retry_cmd;
mod serve_cmd;
mod status_cmd;
mod validations_cmd;
mod worker_cmd;

#[cfg(test)]
mod test_util;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use devrelay_core::collaborators::synthetic::StubNotifier;
use devrelay_core::engine::Engine;
use devrelay_core::ratelimit::TokenBucket;
use devrelay_core::webhook::WebhookSecret;
use devrelay_core::worker::Worker;
use devrelay_core::workspace::WorkspaceAllocator;
use devrelay_db::pool;

use config::DevrelayConfig;

#[derive(Parser)]
#[command(name = "devrelay", about = "Autonomous tracker-to-PR relay")]
struct Cli {
    /// Database URL (overrides DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a devrelay config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/devrelay")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the devrelay database (requires config file or env vars)
    DbInit,
    /// Run the HTTP server: webhook ingress (C1) and the admin/status API
    Serve {
        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        /// Port to bind
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Run the worker loop: lease queue entries and drive them through the
    /// workflow engine (C2 + C3)
    Worker {
        /// Identifier recorded as the lease/lock owner (defaults to hostname)
        #[arg(long)]
        executor_id: Option<String>,
        /// Seconds to sleep between polls when the queue is empty
        #[arg(long, default_value_t = 2)]
        poll_interval: u64,
    },
    /// Show task progress (omit task_id to list all tasks)
    Status {
        /// Task ID to show status for (omit to list all tasks)
        task_id: Option<i64>,
    },
    /// Human validation gate (C4)
    Validations {
        #[command(subcommand)]
        command: ValidationCommands,
    },
    /// Operator-forced retry of a failed task, bypassing the automatic
    /// cooldown window and reactivation attempt cap
    Retry {
        /// Task ID to retry
        task_id: i64,
    },
    /// Show cost and duration report for a task
    Report {
        /// Task ID to report on
        task_id: i64,
    },
}

#[derive(Subcommand)]
enum ValidationCommands {
    /// List pending validations
    List,
    /// Approve a pending validation
    Approve {
        /// Validation ID to approve
        validation_id: i64,
        /// Merge the resulting pull request once checks pass
        #[arg(long)]
        merge: bool,
        /// Email of the authorized responder
        #[arg(long)]
        responder: String,
    },
    /// Reject a pending validation
    Reject {
        /// Validation ID to reject
        validation_id: i64,
        /// Instructions folded into the next implementation attempt
        #[arg(long)]
        instructions: Option<String>,
        /// Email of the authorized responder
        #[arg(long)]
        responder: String,
    },
    /// Cancel a pending validation without recording a response
    Cancel {
        /// Validation ID to cancel
        validation_id: i64,
    },
}

/// Execute the `devrelay init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!("config file already exists at {}\nUse --force to overwrite.", path.display());
    }

    let webhook_secret = config::generate_webhook_secret();

    let cfg = config::ConfigFile {
        database: config::DatabaseSection { url: db_url.to_string() },
        webhook: config::WebhookSection { secret: webhook_secret.clone() },
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!("  webhook.secret = {}...{}", &webhook_secret[..8], &webhook_secret[56..]);
    println!();
    println!("Next: run `devrelay db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `devrelay db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = DevrelayConfig::resolve(cli_db_url)?;

    println!("Initializing devrelay database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    let migrations_path = pool::default_migrations_path();
    pool::run_migrations(&db_pool, migrations_path).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("devrelay db-init complete.");
    Ok(())
}

/// Build a worker for the `validations` and `retry` commands, which need
/// the engine to resume a paused run but never lease new queue entries
/// themselves.
fn build_worker(pool: sqlx::PgPool) -> Worker {
    use devrelay_core::collaborators::synthetic::{ScriptedTestRunner, StubCodeGenClient, StubTrackerClient, StubVcsClient};
    use devrelay_core::collaborators::ChecksStatus;

    let engine = Engine {
        codegen: Arc::new(StubCodeGenClient::default()),
        tests: Arc::new(ScriptedTestRunner::new(Vec::new())),
        vcs: Arc::new(StubVcsClient::new(ChecksStatus::Passed)),
        tracker: Arc::new(StubTrackerClient::default()),
        notifier: Arc::new(StubNotifier::default()),
        workspace: WorkspaceAllocator::from_env(),
        rate_limiter: Arc::new(TokenBucket::new(4.0, 1.0)),
    };

    Worker { pool, engine, executor_id: "devrelay-cli".to_string() }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Serve { bind, port } => {
            let resolved = DevrelayConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let webhook_secret = WebhookSecret::new(resolved.webhook_secret);
            let result = serve_cmd::run_serve(db_pool.clone(), webhook_secret, &bind, port).await;
            db_pool.close().await;
            result?;
        }
        Commands::Worker { executor_id, poll_interval } => {
            let resolved = DevrelayConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let executor_id = executor_id.unwrap_or_else(default_executor_id);
            let result = worker_cmd::run_worker(db_pool.clone(), executor_id, poll_interval).await;
            db_pool.close().await;
            result?;
        }
        Commands::Status { task_id } => {
            let resolved = DevrelayConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = status_cmd::run_status(&db_pool, task_id).await;
            db_pool.close().await;
            result?;
        }
        Commands::Validations { command } => {
            let resolved = DevrelayConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = run_validations_command(command, db_pool.clone()).await;
            db_pool.close().await;
            result?;
        }
        Commands::Retry { task_id } => {
            let resolved = DevrelayConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = retry_cmd::run_retry(&db_pool, task_id).await;
            db_pool.close().await;
            result?;
        }
        Commands::Report { task_id } => {
            let resolved = DevrelayConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = report_cmd::run_report(&db_pool, task_id).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}

async fn run_validations_command(command: ValidationCommands, pool: sqlx::PgPool) -> anyhow::Result<()> {
    match command {
        ValidationCommands::List => validations_cmd::run_list(&pool).await,
        ValidationCommands::Approve { validation_id, merge, responder } => {
            let worker = build_worker(pool.clone());
            validations_cmd::run_approve(&pool, &worker, validation_id, merge, &responder).await
        }
        ValidationCommands::Reject { validation_id, instructions, responder } => {
            let worker = build_worker(pool.clone());
            validations_cmd::run_reject(&pool, &worker, validation_id, instructions.as_deref(), &responder).await
        }
        ValidationCommands::Cancel { validation_id } => validations_cmd::run_cancel(&pool, validation_id).await,
    }
}

fn default_executor_id() -> String {
    hostname_or_pid()
}

fn hostname_or_pid() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| format!("devrelay-worker-{}", std::process::id()))
}
