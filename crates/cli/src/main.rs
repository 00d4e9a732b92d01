//! `planner-notify` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`    — start the API server (and the cron runner, unless disabled).
//! - `worker`   — run scheduled notifications without the API.
//! - `migrate`  — run pending database migrations.
//! - `seed`     — install the default workflows once.
//! - `validate` — validate a workflow JSON file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use channels::email::EmailChannel;
use channels::Channel;
use engine::defaults::seed_default_workflows;
use engine::filters::validate_workflow;
use engine::host::InMemoryDirectory;
use engine::{AppContext, NotificationsConfig, SendNotificationHandler, WorkflowDraft, SEND_NOTIFICATION_HOOK};
use queue::CronRunner;

#[derive(Parser)]
#[command(
    name = "planner-notify",
    about = "Editorial notification workflows: events in, notifications out",
    version
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalArgs {
    #[arg(long, global = true, env = "DATABASE_URL", default_value = "sqlite://planner.db")]
    database_url: String,

    /// TOML file with notification settings.
    #[arg(long, global = true, env = "PLANNER_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server.
    Serve {
        #[arg(long, env = "PLANNER_BIND", default_value = "127.0.0.1:8080")]
        bind: String,

        /// Secret used to sign request nonces.
        #[arg(long, env = "PLANNER_NONCE_SECRET", hide_env_values = true)]
        nonce_secret: String,

        /// Poll interval of the in-process cron runner.
        #[arg(long, default_value_t = 10)]
        interval_secs: u64,

        /// Do not run scheduled notifications in this process.
        #[arg(long)]
        no_worker: bool,
    },
    /// Run scheduled notifications.
    Worker {
        #[arg(long, default_value_t = 10)]
        interval_secs: u64,

        /// Run one pass and exit.
        #[arg(long)]
        once: bool,
    },
    /// Run pending database migrations.
    Migrate,
    /// Install the default workflows unless they were installed before.
    Seed,
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let global = cli.global;

    match cli.command {
        Command::Serve { bind, nonce_secret, interval_secs, no_worker } => {
            let (ctx, directory) = build_context(&global).await?;
            let nonces = api::NonceSigner::new(&nonce_secret).map_err(|e| anyhow!("invalid nonce secret: {e}"))?;
            let state = api::AppState::new(ctx.clone(), directory, nonces);

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let worker = (!no_worker).then(|| {
                let runner = cron_runner(&ctx);
                let rx = shutdown_rx.clone();
                info!("Starting in-process cron runner (every {interval_secs}s)");
                tokio::spawn(async move { runner.run(Duration::from_secs(interval_secs), rx).await })
            });

            info!("Starting API server on {bind}");
            api::serve(&bind, state, async move {
                shutdown_signal().await;
                let _ = shutdown_tx.send(true);
            })
            .await
            .with_context(|| format!("server on {bind} failed"))?;

            if let Some(worker) = worker {
                worker.await.context("cron runner panicked")?;
            }
        }
        Command::Worker { interval_secs, once } => {
            let (ctx, _) = build_context(&global).await?;
            let runner = cron_runner(&ctx);

            if once {
                let summary = runner.run_due(chrono::Utc::now()).await?;
                println!(
                    "{} completed, {} failed, {} dropped",
                    summary.completed, summary.failed, summary.dropped
                );
                return Ok(());
            }

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                shutdown_signal().await;
                let _ = shutdown_tx.send(true);
            });
            info!("Starting background worker (every {interval_secs}s)");
            runner.run(Duration::from_secs(interval_secs), shutdown_rx).await;
        }
        Command::Migrate => {
            info!("Running migrations against {}", global.database_url);
            connect(&global.database_url).await?;
            info!("Migrations applied successfully");
        }
        Command::Seed => {
            let pool = connect(&global.database_url).await?;
            let seeded = seed_default_workflows(&pool).await?;
            if seeded == 0 {
                println!("Default workflows were already installed.");
            } else {
                println!("Installed {seeded} default workflows.");
            }
        }
        Command::Validate { path } => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read file {}", path.display()))?;
            let draft: WorkflowDraft = serde_json::from_str(&content).context("invalid JSON")?;

            match validate_workflow(&draft, None) {
                Ok(()) => {
                    let events: Vec<&str> = draft.events.iter().map(|e| e.name()).collect();
                    println!("✅ Workflow \"{}\" is valid. Events: {events:?}", draft.title.trim());
                }
                Err(e) => {
                    eprintln!("❌ Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<NotificationsConfig> {
    match path {
        Some(path) => NotificationsConfig::load(path)
            .with_context(|| format!("cannot load configuration from {}", path.display())),
        None => Ok(NotificationsConfig::default()),
    }
}

async fn connect(database_url: &str) -> Result<db::DbPool> {
    let pool = db::pool::create_pool(database_url, 5)
        .await
        .context("failed to connect to database")?;
    db::pool::run_migrations(&pool).await.context("migration failed")?;
    Ok(pool)
}

async fn build_context(global: &GlobalArgs) -> Result<(Arc<AppContext>, Arc<InMemoryDirectory>)> {
    let config = load_config(global.config.as_deref())?;
    let pool = connect(&global.database_url).await?;
    let directory = Arc::new(InMemoryDirectory::new());
    let email: Arc<dyn Channel> = Arc::new(EmailChannel::smtp(config.email.clone()));

    let ctx = AppContext::builder(pool, directory.clone(), config).channel(email).build();
    Ok((ctx, directory))
}

fn cron_runner(ctx: &Arc<AppContext>) -> CronRunner {
    let mut runner = CronRunner::new(ctx.queue.clone());
    runner.register(SEND_NOTIFICATION_HOOK, Arc::new(SendNotificationHandler::new(ctx.clone())));
    runner
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("cannot listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
