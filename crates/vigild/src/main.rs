//! Vigil Daemon - predictive failure detection and auto-remediation
//!
//! Samples the host, forecasts failures and capacity exhaustion, and runs
//! remediation rules when live metrics cross their thresholds.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use vigil_common::remediation::TokioCommandRunner;
use vigil_common::{TracingSink, VigilConfig};
use vigild::{Agent, SharedCollector, Sinks, SystemCollector};

#[derive(Parser, Debug)]
#[command(name = "vigild")]
#[command(version, about = "Vigil - predictive monitoring and auto-remediation daemon")]
struct Args {
    /// Config file (defaults to /etc/vigil/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log remediation actions instead of running them
    #[arg(long)]
    dry_run: bool,

    /// Collect one snapshot, print the status report and exit
    #[arg(long)]
    once: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    info!("[BOOT] Vigil Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => VigilConfig::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => VigilConfig::load(),
    };
    if args.dry_run {
        config.remediation.dry_run = true;
    }

    let collector: SharedCollector = Arc::new(Mutex::new(SystemCollector::new()));
    let sink = Arc::new(TracingSink);
    let sinks = Sinks {
        alerts: sink.clone(),
        metrics: sink,
    };
    let runner = Arc::new(TokioCommandRunner);

    let agent = Arc::new(
        Agent::new(config, collector, sinks, runner)
            .await
            .context("Failed to initialize agent")?,
    );

    if args.once {
        let outcome = agent.collect_once().await?;
        for remediation in outcome.remediations {
            if let Err(e) = remediation.await {
                warn!("Remediation task failed: {}", e);
            }
        }
        agent.refresh().await;
        let status = agent.status().await;
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let handle = tokio::spawn(Arc::clone(&agent).run());
    info!("[BOOT] Vigil Daemon ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down gracefully");
    agent.shutdown();

    match handle.await {
        Ok(result) => result?,
        Err(e) => warn!("Agent task ended abnormally: {}", e),
    }

    Ok(())
}
