//! steward - recurring on-chain task scheduler.
//!
//! `steward run` drives the configured tasks against an in-memory simulated
//! chain (dry run); `steward check` validates a configuration file.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use steward_core::app::SchedulerBuilder;
use steward_core::config::StewardConfig;
use steward_core::impls::{ScriptedAction, SimulatedChain};
use steward_core::ports::TaskAction;

#[derive(Parser)]
#[command(
    name = "steward",
    about = "Recurring on-chain task scheduler with single-flight operation tracking",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler against a simulated chain
    Run {
        /// Configuration file (JSON)
        #[arg(long, env = "STEWARD_CONFIG")]
        config: PathBuf,

        /// Seconds between simulated blocks (0 = chain never advances)
        #[arg(long, default_value_t = 15)]
        simulate_block_secs: u64,

        /// Blocks until a simulated operation confirms
        #[arg(long, default_value_t = 2)]
        confirm_after_blocks: u64,

        /// Heartbeat metric name, overrides `health.metric_name`
        #[arg(long, env = "STEWARD_METRIC_NAME")]
        metric_name: Option<String>,
    },

    /// Validate a configuration file
    Check {
        /// Configuration file (JSON)
        #[arg(long, env = "STEWARD_CONFIG")]
        config: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check { config } => check(&config),
        Commands::Run {
            config,
            simulate_block_secs,
            confirm_after_blocks,
            metric_name,
        } => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("starting tokio runtime")
            .and_then(|runtime| {
                runtime.block_on(run(
                    &config,
                    simulate_block_secs,
                    confirm_after_blocks,
                    metric_name,
                ))
            }),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load(path: &Path) -> Result<StewardConfig> {
    StewardConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

fn simulated_builder(config: &StewardConfig, chain: &SimulatedChain) -> SchedulerBuilder {
    config.apply(
        SchedulerBuilder::new().collaborators(chain.clone()),
        |_, task| -> Arc<dyn TaskAction> {
            Arc::new(ScriptedAction::new(chain.clone(), task.identity.clone()))
        },
    )
}

fn check(path: &Path) -> Result<ExitCode> {
    let config = load(path)?;

    // the builder catches cross-task problems (duplicate key writers)
    let chain = SimulatedChain::new(1);
    let scheduler = simulated_builder(&config, &chain)
        .build()
        .context("validating task wiring")?;

    for (name, task) in &config.tasks {
        println!(
            "{name}: every {}s, timeout {}s, identity {}",
            task.interval, task.timeout, task.identity
        );
    }
    println!(
        "ok: {} tasks, {} workers",
        scheduler.task_names().len(),
        scheduler.workers()
    );
    Ok(ExitCode::SUCCESS)
}

async fn run(
    path: &Path,
    block_secs: u64,
    confirm_after_blocks: u64,
    metric_name: Option<String>,
) -> Result<ExitCode> {
    let config = load(path)?;

    let chain = SimulatedChain::new(1).with_auto_confirm(confirm_after_blocks);
    let scheduler = simulated_builder(&config, &chain)
        .health_sink(config.health.sink(metric_name))
        .build()
        .context("building scheduler")?;

    let producer = (block_secs > 0).then(|| {
        let chain = chain.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(block_secs));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                chain.advance(1);
            }
        })
    });

    let handle = scheduler.start();

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for ctrl-c")?;
            info!("ctrl-c received");
            handle.stop();
        }
        _ = handle.stopped() => {}
    }

    let status = handle.status();
    let reason = handle.join().await;
    if let Some(producer) = producer {
        producer.abort();
    }

    for view in status {
        println!("{}", serde_json::to_string(&view)?);
    }

    if reason.is_fatal() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
