//! The poller: fans out across nodes on a bounded worker pool, parses
//! telemetry, and appends/rewrites the two log files.

use crate::config::NodeDescriptor;
use crate::errors::IoAppendError;
use crate::jobs::{self, JobDescriptor};
use crate::metrics::{self, MetricsRecord};
use crate::remote::RemoteExecutor;
use crate::util;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const GPU_QUERY_CMD: &str = "nvidia-smi --query-gpu=utilization.gpu,memory.used,memory.total,temperature.gpu,power.draw --format=csv,noheader,nounits";
const HOST_STATS_CMD: &str = "top -bn1 | grep '%Cpu(s)' | awk '{print 100 - $8}'; free -m | grep Mem | awk '{print $3, $2}'";
const JOB_SEARCH_CMD: &str = "pgrep -af 'python3.*dummy_train.py'";

const GPU_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
const HOST_STATS_TIMEOUT: Duration = Duration::from_secs(10);
const JOB_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
const FOLLOWUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of polling a single node for one tick.
struct NodePollResult {
    node: String,
    metrics: Vec<MetricsRecord>,
    jobs: Vec<JobDescriptor>,
}

/// Poll GPU telemetry and host stats for one node, composing metrics
/// records that all share the tick's `ts`.
async fn poll_metrics(
    executor: &dyn RemoteExecutor,
    node: &str,
    ts: &str,
) -> Vec<MetricsRecord> {
    let gpu_output = match executor.execute(node, GPU_QUERY_CMD, GPU_QUERY_TIMEOUT).await {
        Ok(out) if out.success() => out.stdout,
        Ok(out) => {
            tracing::error!(node, stderr = %out.stderr, "GPU query returned non-zero exit");
            return Vec::new();
        }
        Err(err) => {
            tracing::error!(node, error = %err, "GPU query failed");
            return Vec::new();
        }
    };

    let host_stats = match executor.execute(node, HOST_STATS_CMD, HOST_STATS_TIMEOUT).await {
        Ok(out) if out.success() => match metrics::parse_host_stats(&out.stdout) {
            Ok(stats) => Some(stats),
            Err(err) => {
                tracing::warn!(node, error = %err, "dropping malformed host stats");
                None
            }
        },
        Ok(out) => {
            tracing::warn!(node, stderr = %out.stderr, "host stats query returned non-zero exit");
            None
        }
        Err(err) => {
            tracing::warn!(node, error = %err, "host stats query failed");
            None
        }
    };

    metrics::parse_gpu_records(node, &gpu_output, ts, host_stats)
}

/// Discover training jobs on one node, issuing the two follow-up calls
/// (uptime, log tail) per matched process.
async fn poll_jobs(executor: &dyn RemoteExecutor, node: &str, data_dir: &str) -> Vec<JobDescriptor> {
    let search_output = match executor
        .execute(node, JOB_SEARCH_CMD, JOB_DISCOVERY_TIMEOUT)
        .await
    {
        Ok(out) if out.success() => out.stdout,
        Ok(_) => return Vec::new(),
        Err(err) => {
            tracing::warn!(node, error = %err, "job discovery query failed");
            return Vec::new();
        }
    };

    let mut descriptors = Vec::new();
    for line in search_output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (pid, session) = match jobs::parse_job_line(line) {
            Some(parsed) => parsed,
            None => continue,
        };

        let uptime_cmd = format!("ps -p {} -o etime=", pid);
        let uptime = match executor.execute(node, &uptime_cmd, FOLLOWUP_TIMEOUT).await {
            Ok(out) => out.stdout,
            Err(err) => {
                tracing::warn!(node, pid, error = %err, "uptime query failed");
                String::new()
            }
        };

        let log_file = jobs::log_file_path(data_dir, &session);
        let tail_cmd = format!("tail -n 5 {} 2>/dev/null || true", log_file);
        let log_tail = match executor.execute(node, &tail_cmd, FOLLOWUP_TIMEOUT).await {
            Ok(out) => out.stdout,
            Err(err) => {
                tracing::warn!(node, pid, error = %err, "log tail query failed (best-effort)");
                String::new()
            }
        };

        if let Some(descriptor) =
            jobs::build_job_descriptor(node, line, &uptime, log_file, &log_tail)
        {
            descriptors.push(descriptor);
        }
    }

    descriptors
}

/// Append metrics records to the metrics log with a flush after every
/// line, with an explicit flush after every line.
fn append_metrics(path: &Path, records: &[MetricsRecord]) -> Result<(), IoAppendError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| IoAppendError {
            path: path.display().to_string(),
            source,
        })?;
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| IoAppendError {
            path: path.display().to_string(),
            source,
        })?;

    for record in records {
        let line = serde_json::to_string(record).expect("MetricsRecord always serializes");
        writeln!(file, "{}", line).map_err(|source| IoAppendError {
            path: path.display().to_string(),
            source,
        })?;
    }
    file.flush().map_err(|source| IoAppendError {
        path: path.display().to_string(),
        source,
    })?;

    Ok(())
}

/// Rewrite the jobs log from scratch with this tick's descriptors
/// The jobs log is rewritten wholesale every tick, not append-only.
fn rewrite_jobs(path: &Path, jobs: &[JobDescriptor]) -> Result<(), IoAppendError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| IoAppendError {
            path: path.display().to_string(),
            source,
        })?;
    }

    let mut file = std::fs::File::create(path).map_err(|source| IoAppendError {
        path: path.display().to_string(),
        source,
    })?;

    for job in jobs {
        let line = serde_json::to_string(job).expect("JobDescriptor always serializes");
        writeln!(file, "{}", line).map_err(|source| IoAppendError {
            path: path.display().to_string(),
            source,
        })?;
    }
    file.flush().map_err(|source| IoAppendError {
        path: path.display().to_string(),
        source,
    })?;

    Ok(())
}

/// Run a single poll tick across all nodes, bounded by `max_concurrent`
/// in-flight remote sessions.
///
/// Per-node failures are logged and never abort the tick; the metrics
/// log is appended to and the jobs log is rewritten once per tick with
/// the union of all nodes' discovered jobs.
pub async fn run_tick(
    executor: Arc<dyn RemoteExecutor>,
    nodes: &[NodeDescriptor],
    max_concurrent: usize,
    metrics_path: &Path,
    jobs_path: &Path,
    data_dir: &str,
) {
    let ts = util::now_ts_utc();
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut set: JoinSet<NodePollResult> = JoinSet::new();

    for node in nodes {
        let executor = Arc::clone(&executor);
        let semaphore = Arc::clone(&semaphore);
        let node_name = node.name.clone();
        let expected_gpu_count = node.gpu_count;
        let ts = ts.clone();
        let data_dir = data_dir.to_string();

        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            let metrics = poll_metrics(executor.as_ref(), &node_name, &ts).await;

            if expected_gpu_count > 0 && metrics.len() as u32 != expected_gpu_count {
                tracing::warn!(
                    node = %node_name,
                    expected = expected_gpu_count,
                    actual = metrics.len(),
                    "parsed GPU count does not match inventory"
                );
            }

            let jobs = poll_jobs(executor.as_ref(), &node_name, &data_dir).await;

            NodePollResult {
                node: node_name,
                metrics,
                jobs,
            }
        });
    }

    let mut all_metrics = Vec::new();
    let mut all_jobs = Vec::new();

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(result) => {
                all_metrics.extend(result.metrics);
                all_jobs.extend(result.jobs);
            }
            Err(err) => {
                tracing::error!(error = %err, "poll task panicked");
            }
        }
    }

    if let Err(err) = append_metrics(metrics_path, &all_metrics) {
        tracing::error!(error = %err, "failed to append metrics log this tick");
    }

    if let Err(err) = rewrite_jobs(jobs_path, &all_jobs) {
        tracing::error!(error = %err, "failed to rewrite jobs log this tick");
    }
}
