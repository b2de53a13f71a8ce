//! Standalone agent entry point: loads `config.yaml`, `nodes.yaml`, and
//! `gpu_inventory.yaml`, then drives the poll-snapshot-heuristics-actions
//! loop at `poll_interval_seconds` until a shutdown signal arrives.

use anyhow::{Context, Result};
use clap::Parser;
use fleetwatch::agent::AgentLoop;
use fleetwatch::config;
use fleetwatch::remote::{SshConfig, SshExecutor};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "fleetwatch-agent",
    version = env!("CARGO_PKG_VERSION"),
    about = "Scheduler driving poll -> snapshot -> heuristics -> actions"
)]
struct AgentCli {
    /// Node inventory path
    #[arg(long, default_value = "config/nodes.yaml")]
    nodes: String,

    /// GPU inventory path
    #[arg(long, default_value = "config/gpu_inventory.yaml")]
    gpu_inventory: String,

    /// Agent configuration path
    #[arg(long, default_value = "config.yaml")]
    config: String,

    /// Run a single tick and exit, ignoring poll_interval_seconds
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    let cli = AgentCli::parse();
    init_logging()?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow::anyhow!("failed to create tokio runtime: {}", e))?;

    match rt.block_on(run(cli)) {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    Ok(())
}

async fn run(cli: AgentCli) -> Result<()> {
    let nodes = config::load_nodes(&cli.nodes).context("failed to load node inventory")?;
    let inventory = config::load_inventory(&cli.gpu_inventory).context("failed to load GPU inventory")?;
    let agent_config = config::load_agent_config(&cli.config).context("failed to load agent config")?;

    info!(
        mode = ?agent_config.agent.mode,
        dry_run = agent_config.agent.dry_run,
        interval = agent_config.agent.poll_interval_seconds,
        "agent configured"
    );

    let mut ssh_configs = HashMap::new();
    for node in &nodes {
        ssh_configs.insert(
            node.name.clone(),
            SshConfig::new(node.host.clone(), node.port, node.user.clone()),
        );
    }
    let executor = Arc::new(SshExecutor::new(ssh_configs));

    let agent_loop = AgentLoop::new(executor, nodes, inventory, agent_config);

    if cli.once {
        agent_loop.run_tick().await;
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(());
    });

    agent_loop.run_forever(shutdown_rx).await;
    Ok(())
}
