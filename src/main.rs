use anyhow::{Context, Result};
use fleetwatch::agent::AgentLoop;
use fleetwatch::args::Cli;
use fleetwatch::config::{self, AgentConfig};
use fleetwatch::errors::ConfigError;
use fleetwatch::remote::{SshConfig, SshExecutor};
use std::collections::HashMap;
use std::process;
use std::sync::Arc;
use tracing::{error, info};

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level.to_string())?;

    info!("starting fleetwatch {}", env!("CARGO_PKG_VERSION"));

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow::anyhow!("failed to create tokio runtime: {}", e))?;

    match rt.block_on(run(cli)) {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("{}", e);
            let exit_code = if e.downcast_ref::<ConfigError>().is_some() {
                1
            } else {
                2
            };
            process::exit(exit_code);
        }
    }
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let nodes = config::load_nodes(&cli.config).context("failed to load node inventory")?;
    let inventory = match &cli.gpu_inventory {
        Some(path) => config::load_inventory(path).context("failed to load GPU inventory")?,
        None => Default::default(),
    };

    let mut agent_config = AgentConfig::default();
    agent_config.paths.metrics_file = cli.output.clone();
    agent_config.paths.jobs_file = cli.jobs_output.clone();
    agent_config.agent.max_concurrent_nodes = cli.max_concurrent;
    if let Some(interval) = cli.interval {
        agent_config.agent.poll_interval_seconds = interval;
    }

    let mut ssh_configs = HashMap::new();
    for node in &nodes {
        ssh_configs.insert(
            node.name.clone(),
            SshConfig::new(node.host.clone(), node.port, node.user.clone()),
        );
    }
    let executor = Arc::new(SshExecutor::new(ssh_configs));

    let agent = AgentLoop::new(executor, nodes, inventory, agent_config);

    if cli.once {
        agent.run_tick().await;
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(());
    });

    agent.run_forever(shutdown_rx).await;
    Ok(())
}
