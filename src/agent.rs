//! Agent loop: drives poller -> snapshot builder -> heuristic engine ->
//! action manager at a fixed interval, with fault isolation between ticks.

use crate::actions::ActionManager;
use crate::config::{AgentConfig, Inventory, NodeDescriptor};
use crate::remote::RemoteExecutor;
use crate::{heuristics, poller, snapshot};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

pub struct AgentLoop {
    executor: Arc<dyn RemoteExecutor>,
    nodes: Vec<NodeDescriptor>,
    inventory: Inventory,
    config: AgentConfig,
    metrics_path: PathBuf,
    jobs_path: PathBuf,
    snapshot_path: PathBuf,
    data_dir: String,
    action_manager: ActionManager,
}

impl AgentLoop {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        nodes: Vec<NodeDescriptor>,
        inventory: Inventory,
        config: AgentConfig,
    ) -> Self {
        let metrics_path = PathBuf::from(&config.paths.metrics_file);
        let jobs_path = PathBuf::from(&config.paths.jobs_file);
        let snapshot_path = PathBuf::from(&config.paths.snapshot_file);
        let data_dir = metrics_path
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "data".to_string());
        let action_manager = ActionManager::new(config.agent.mode, config.agent.dry_run);

        Self {
            executor,
            nodes,
            inventory,
            config,
            metrics_path,
            jobs_path,
            snapshot_path,
            data_dir,
            action_manager,
        }
    }

    /// Run a single tick: poll -> snapshot -> heuristics -> actions
    /// Does not handle interval sleeping; that's the caller's job so
    /// `--once` can skip it entirely.
    pub async fn run_tick(&self) {
        poller::run_tick(
            Arc::clone(&self.executor),
            &self.nodes,
            self.config.agent.max_concurrent_nodes,
            &self.metrics_path,
            &self.jobs_path,
            &self.data_dir,
        )
        .await;

        let latest = snapshot::latest_per_gpu(&self.metrics_path);
        let display_zone = crate::util::parse_zone(&self.config.agent.display_timezone);
        let cluster_snapshot = snapshot::build_snapshot(&latest, &self.inventory, display_zone);

        if let Err(err) = snapshot::write_snapshot_atomic(&self.snapshot_path, &cluster_snapshot) {
            tracing::error!(error = %err, "failed to write cluster snapshot");
        }

        let jobs = read_jobs(&self.jobs_path);
        let recommendations = heuristics::evaluate(&cluster_snapshot, &jobs, &self.config.thresholds);
        self.action_manager.execute(&recommendations);
    }

    /// Drive ticks at `poll_interval_seconds` until `shutdown` resolves.
    /// A shutdown signal is only honored between ticks, never mid-tick,
    /// so an in-flight tick always finishes. If a tick overruns the
    /// interval, logs a warning and starts the next tick immediately
    /// without queueing.
    pub async fn run_forever(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let interval = Duration::from_secs(self.config.agent.poll_interval_seconds);

        loop {
            let tick_start = Instant::now();

            // Never race the tick itself against shutdown: a dropped
            // `run_tick()` future would abort its JoinSet and cancel
            // every in-flight per-node poll instead of letting them
            // finish, so the tick always runs to completion first.
            self.run_tick().await;

            match shutdown.try_recv() {
                Ok(()) | Err(tokio::sync::oneshot::error::TryRecvError::Closed) => {
                    tracing::info!("shutdown signal received, exiting after in-flight tick");
                    return;
                }
                Err(tokio::sync::oneshot::error::TryRecvError::Empty) => {}
            }

            let elapsed = tick_start.elapsed();
            if elapsed < interval {
                tokio::select! {
                    _ = tokio::time::sleep(interval - elapsed) => {}
                    _ = &mut shutdown => {
                        tracing::info!("shutdown signal received during sleep");
                        return;
                    }
                }
            } else {
                warn!(
                    elapsed_secs = elapsed.as_secs_f64(),
                    interval_secs = interval.as_secs_f64(),
                    "tick exceeded interval, starting next tick immediately"
                );
            }
        }
    }
}

fn read_jobs(path: &std::path::Path) -> Vec<crate::jobs::JobDescriptor> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return Vec::new(),
    };

    content
        .lines()
        .filter_map(|line| serde_json::from_str(line.trim()).ok())
        .collect()
}
