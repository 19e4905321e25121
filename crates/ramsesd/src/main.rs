//! ramsesd: the RAMSES Plan daemon.
//!
//! Loads a system architecture into an in-memory Knowledge, queues any
//! proposed adaptation options and runs the Plan stage:
//! - Planner (weight optimizer + option evaluator)
//! - Trigger loop standing in for the Analyse stage
//! - Execute stand-in that archives the chosen options
//!
//! # Usage
//!
//! ```text
//! ramsesd --architecture config/architecture.json --proposals config/proposals.json --once
//! ramsesd --architecture config/architecture.json --config config/plan.toml --trigger-interval 30
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use ramses_knowledge::{AdaptationOption, InMemoryKnowledge, Knowledge, SystemArchitecture};
use ramses_plan::{ChannelExecute, PlanConfig, PlanRunner, Planner};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ramsesd", about = "RAMSES Plan daemon")]
struct Cli {
    /// Architecture description of the managed system (JSON).
    #[arg(long)]
    architecture: PathBuf,

    /// Plan configuration (TOML). Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Adaptation options to propose before the first iteration (JSON array).
    #[arg(long)]
    proposals: Option<PathBuf>,

    /// Run a single iteration, print its outcome as JSON and exit.
    #[arg(long)]
    once: bool,

    /// Seconds between planning triggers.
    #[arg(long, default_value = "30")]
    trigger_interval: u64,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    let config = match &cli.config {
        Some(path) => PlanConfig::from_file(path)
            .with_context(|| format!("failed to load plan config {}", path.display()))?,
        None => PlanConfig::default(),
    };

    let architecture = SystemArchitecture::from_file(&cli.architecture)
        .with_context(|| format!("failed to load architecture {}", cli.architecture.display()))?;
    let knowledge = Arc::new(InMemoryKnowledge::with_services(architecture.services)?);
    info!(path = ?cli.architecture, "architecture loaded");

    if let Some(path) = &cli.proposals {
        let proposed = propose_options(&knowledge, path)?;
        info!(proposed, "adaptation options queued");
    }

    let (execute, execute_rx) = ChannelExecute::channel();
    let shared: Arc<dyn Knowledge> = knowledge.clone();
    let planner = Planner::from_config(&config, shared, Arc::new(execute));

    if cli.once {
        run_once(planner, &knowledge, execute_rx).await
    } else {
        run_daemon(planner, knowledge, execute_rx, cli.trigger_interval).await
    }
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,ramsesd=debug,ramses_plan=debug"))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn propose_options(knowledge: &InMemoryKnowledge, path: &Path) -> anyhow::Result<usize> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read proposals {}", path.display()))?;
    let options: Vec<AdaptationOption> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse proposals {}", path.display()))?;
    let count = options.len();
    for option in options {
        knowledge.propose_option(option)?;
    }
    Ok(count)
}

/// Drain Execute signals, applying the committed options by archiving them.
fn archive_signalled(knowledge: &InMemoryKnowledge, execute_rx: &mut mpsc::Receiver<()>) {
    while execute_rx.try_recv().is_ok() {
        for option in knowledge.archive_chosen_options() {
            info!(service = %option.service_id, option = %option.description(), "option applied");
        }
    }
}

async fn run_once(
    mut planner: Planner,
    knowledge: &InMemoryKnowledge,
    mut execute_rx: mpsc::Receiver<()>,
) -> anyhow::Result<()> {
    let outcome = planner.run_iteration().await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    archive_signalled(knowledge, &mut execute_rx);
    Ok(())
}

async fn run_daemon(
    planner: Planner,
    knowledge: Arc<InMemoryKnowledge>,
    mut execute_rx: mpsc::Receiver<()>,
    trigger_interval: u64,
) -> anyhow::Result<()> {
    info!(interval = trigger_interval, "ramses plan daemon starting");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut trigger_shutdown = shutdown_rx.clone();
    let mut execute_shutdown = shutdown_rx.clone();
    let (trigger_tx, trigger_rx) = mpsc::channel(1);

    // ── Start background tasks ─────────────────────────────────

    // Analyse stand-in: one trigger per interval.
    let trigger_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(trigger_interval.max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if trigger_tx.try_send(()).is_err() {
                        warn!("previous plan iteration still running, trigger dropped");
                    }
                }
                _ = trigger_shutdown.changed() => break,
            }
        }
    });

    // Plan loop.
    let plan_handle = tokio::spawn(async move {
        let mut runner = PlanRunner::new(planner);
        runner.run(trigger_rx, shutdown_rx).await
    });

    // Execute stand-in.
    let execute_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                signal = execute_rx.recv() => {
                    if signal.is_none() {
                        break;
                    }
                    for option in knowledge.archive_chosen_options() {
                        info!(service = %option.service_id, option = %option.description(), "option applied");
                    }
                }
                _ = execute_shutdown.changed() => break,
            }
        }
    });

    // ── Wait for shutdown ──────────────────────────────────────

    tokio::signal::ctrl_c()
        .await
        .context("failed to install CTRL+C handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = trigger_handle.await;
    let iterations = plan_handle.await.unwrap_or_default();
    let _ = execute_handle.await;

    info!(iterations, "ramses plan daemon stopped");
    Ok(())
}
