use async_trait::async_trait;
use fleetwatch::agent::AgentLoop;
use fleetwatch::config::{AgentConfig, GpuInventoryEntry, Inventory, NodeDescriptor};
use fleetwatch::errors::RemoteError;
use fleetwatch::remote::{CommandOutput, RemoteExecutor};
use fleetwatch::snapshot::ClusterSnapshot;
use fleetwatch::{heuristics, jobs, metrics, snapshot};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A scripted `RemoteExecutor`: returns a canned response per
/// `(node, command-prefix)`, or a `RemoteError` for nodes configured to
/// fail outright.
struct FakeExecutor {
    responses: HashMap<(String, String), String>,
    unreachable: Mutex<Vec<String>>,
}

impl FakeExecutor {
    fn new() -> Self {
        Self {
            responses: HashMap::new(),
            unreachable: Mutex::new(Vec::new()),
        }
    }

    fn with_response(mut self, node: &str, command_prefix: &str, output: &str) -> Self {
        self.responses
            .insert((node.to_string(), command_prefix.to_string()), output.to_string());
        self
    }

    fn with_unreachable(self, node: &str) -> Self {
        self.unreachable.lock().unwrap().push(node.to_string());
        self
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn execute(
        &self,
        node: &str,
        command: &str,
        _timeout: Duration,
    ) -> Result<CommandOutput, RemoteError> {
        if self.unreachable.lock().unwrap().contains(&node.to_string()) {
            return Err(RemoteError::Timeout {
                node: node.to_string(),
                timeout_secs: 10,
            });
        }

        for ((resp_node, prefix), output) in &self.responses {
            if resp_node == node && command.starts_with(prefix.as_str()) {
                return Ok(CommandOutput {
                    exit_code: 0,
                    stdout: output.clone(),
                    stderr: String::new(),
                });
            }
        }

        Ok(CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "no response scripted".to_string(),
        })
    }
}

// Single-node happy path: telemetry parses and rolls into a snapshot.
#[test]
fn single_node_happy_path() {
    let ts = "2026-01-01T00:00:00.000Z";
    let csv = "10, 2048, 16384, 55, 120\n20, 4096, 16384, 60, 150";
    let host = metrics::parse_host_stats("5.0\n8192 65536").ok();

    let records = metrics::parse_gpu_records("n1", csv, ts, host);
    assert_eq!(records.len(), 2);

    let mut latest = std::collections::BTreeMap::new();
    for r in records {
        latest.insert((r.node.clone(), r.gpu_index), r);
    }

    let mut nodes_map = HashMap::new();
    nodes_map.insert(
        "n1".to_string(),
        GpuInventoryEntry {
            gpu_name: Some("GPU-X".to_string()),
            cores_total: Some(16),
            mem_total_gb: Some(64),
            power_limit_watts: Some(300),
        },
    );
    let inventory = build_inventory(nodes_map);

    let cluster_snapshot = snapshot::build_snapshot(&latest, &inventory, chrono_tz::UTC);
    assert_eq!(cluster_snapshot.total_power_consumption_watts, 270);
    let gpu_node = &cluster_snapshot.gpu_nodes[0];
    assert_eq!(gpu_node.gpu_summary_name, "2x GPU-X");
    assert_eq!(gpu_node.gpus[0].utilization_percent, 10);
    assert_eq!(gpu_node.gpus[0].memory_util_percent, 13);
}

// One malformed GPU line is dropped, sibling survives.
#[test]
fn malformed_gpu_line_is_dropped() {
    let csv = "10, 2048, 16384, 55, 120\n20, 4096, 16384, 60"; // missing power column
    let records = metrics::parse_gpu_records("n1", csv, "2026-01-01T00:00:00.000Z", None);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].util_pct, 10);
}

// Scenario 3: a node that never responds contributes nothing, others still
// produce a snapshot.
#[tokio::test]
async fn unreachable_node_does_not_block_others() {
    let executor = FakeExecutor::new()
        .with_response(
            "n1",
            "nvidia-smi",
            "10, 2048, 16384, 55, 120",
        )
        .with_response("n1", "top", "5.0\n8192 65536")
        .with_unreachable("n2");

    let out_n1 = executor
        .execute("n1", "nvidia-smi --query-gpu=...", Duration::from_secs(10))
        .await
        .unwrap();
    assert!(out_n1.success());

    let err_n2 = executor
        .execute("n2", "nvidia-smi --query-gpu=...", Duration::from_secs(10))
        .await
        .unwrap_err();
    assert!(matches!(err_n2, RemoteError::Timeout { .. }));
}

// Idle GPU recommendation.
#[test]
fn idle_gpu_recommendation() {
    let mut latest = std::collections::BTreeMap::new();
    let record = metrics_record("n1", 0, 3);
    latest.insert(("n1".to_string(), 0), record);

    let inventory = build_inventory(HashMap::new());
    let cluster_snapshot = snapshot::build_snapshot(&latest, &inventory, chrono_tz::UTC);
    let recs = heuristics::evaluate(
        &cluster_snapshot,
        &[],
        &fleetwatch::config::Thresholds::default(),
    );

    let idle: Vec<_> = recs.iter().filter(|r| r.kind == "IDLE_GPU").collect();
    assert_eq!(idle.len(), 1);
    assert_eq!(idle[0].node.as_deref(), Some("n1"));
    assert_eq!(idle[0].gpu_id, Some(0));
}

// Low utilization recommendation with mean in the message.
#[test]
fn low_utilization_recommendation_reports_mean() {
    let mut latest = std::collections::BTreeMap::new();
    latest.insert(("n1".to_string(), 0), metrics_record_with_host("n1", 0, 90, 20));
    latest.insert(("n2".to_string(), 0), metrics_record_with_host("n2", 0, 90, 30));

    let inventory = build_inventory(HashMap::new());
    let cluster_snapshot = snapshot::build_snapshot(&latest, &inventory, chrono_tz::UTC);
    let recs = heuristics::evaluate(
        &cluster_snapshot,
        &[],
        &fleetwatch::config::Thresholds::default(),
    );

    let low: Vec<_> = recs.iter().filter(|r| r.kind == "LOW_UTILIZATION").collect();
    assert_eq!(low.len(), 1);
    assert!(low[0].message.contains("25.0%"));
}

// Job discovery from a single pgrep line.
#[test]
fn job_discovery_single_process() {
    let line = "4321 python3 -u /opt/neurocore/dummy_train.py --owner alice --project proj --mode lora";
    let descriptor = jobs::build_job_descriptor(
        "n1",
        line,
        "00:05:00",
        "data/logs/train_alice_proj_lora.log".to_string(),
        "log line 1\nlog line 2",
    )
    .unwrap();

    assert_eq!(descriptor.session, "train:alice:proj:lora");
    assert_eq!(descriptor.pid, 4321);
    assert_eq!(descriptor.log_preview.len(), 2);
}

// Full pipeline: a fake SSH backend drives one AgentLoop tick end to end
// (poll -> snapshot -> heuristics -> actions) and the on-disk metrics,
// jobs, and snapshot files are checked for their actual contents. n2 is
// unreachable and must not keep n1's results out of any of the three
// files.
#[tokio::test]
async fn agent_tick_writes_metrics_jobs_and_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let metrics_path = dir.path().join("metrics.jsonl");
    let jobs_path = dir.path().join("jobs.jsonl");
    let snapshot_path = dir.path().join("cluster_snapshot.json");

    let executor = FakeExecutor::new()
        .with_response("n1", "nvidia-smi", "3, 2048, 16384, 55, 120")
        .with_response("n1", "top", "5.0\n8192 65536")
        .with_response(
            "n1",
            "pgrep",
            "4321 python3 -u /opt/neurocore/dummy_train.py --owner alice --project proj --mode lora",
        )
        .with_response("n1", "ps -p", "00:05:00")
        .with_response("n1", "tail -n 5", "line one\nline two")
        .with_unreachable("n2");

    let nodes = vec![
        NodeDescriptor {
            name: "n1".to_string(),
            host: "10.0.0.1".to_string(),
            port: 22,
            user: "cluster".to_string(),
            gpu_count: 1,
        },
        NodeDescriptor {
            name: "n2".to_string(),
            host: "10.0.0.2".to_string(),
            port: 22,
            user: "cluster".to_string(),
            gpu_count: 1,
        },
    ];

    let mut config = AgentConfig::default();
    config.paths.metrics_file = metrics_path.display().to_string();
    config.paths.jobs_file = jobs_path.display().to_string();
    config.paths.snapshot_file = snapshot_path.display().to_string();

    let agent = AgentLoop::new(Arc::new(executor), nodes, Inventory::default(), config);
    agent.run_tick().await;

    let metrics_content = std::fs::read_to_string(&metrics_path).unwrap();
    let metrics_lines: Vec<&str> = metrics_content.lines().collect();
    assert_eq!(metrics_lines.len(), 1, "n2 is unreachable, only n1 polls");
    let record: fleetwatch::metrics::MetricsRecord = serde_json::from_str(metrics_lines[0]).unwrap();
    assert_eq!(record.node, "n1");
    assert_eq!(record.util_pct, 3);

    let jobs_content = std::fs::read_to_string(&jobs_path).unwrap();
    assert!(jobs_content.contains("train:alice:proj:lora"));
    assert!(jobs_content.contains("4321"));

    let snapshot_content = std::fs::read_to_string(&snapshot_path).unwrap();
    let snapshot: ClusterSnapshot = serde_json::from_str(&snapshot_content).unwrap();
    assert_eq!(snapshot.gpu_nodes.len(), 1);
    assert_eq!(snapshot.gpu_nodes[0].node_name, "n1");
    assert_eq!(snapshot.gpu_nodes[0].gpus[0].utilization_percent, 3);
}

fn metrics_record(node: &str, gpu_index: u32, util_pct: u8) -> fleetwatch::metrics::MetricsRecord {
    fleetwatch::metrics::MetricsRecord {
        schema: fleetwatch::metrics::SCHEMA_METRICS_V1.to_string(),
        ts: "2026-01-01T00:00:00.000Z".to_string(),
        node: node.to_string(),
        gpu_index,
        util_pct,
        mem_used_mb: 1024,
        mem_total_mb: 16384,
        temp_c: 50,
        power_w: 100,
        host: None,
    }
}

fn metrics_record_with_host(
    node: &str,
    gpu_index: u32,
    util_pct: u8,
    cpu_pct: u8,
) -> fleetwatch::metrics::MetricsRecord {
    let mut record = metrics_record(node, gpu_index, util_pct);
    record.host = Some(fleetwatch::metrics::HostStats {
        cpu_pct,
        ram_used_mb: 8192,
    });
    record
}

fn build_inventory(nodes: HashMap<String, GpuInventoryEntry>) -> fleetwatch::config::Inventory {
    let mut yaml = String::from("defaults: {}\nnodes:\n");
    for (name, entry) in &nodes {
        yaml.push_str(&format!("  {}:\n", name));
        if let Some(v) = &entry.gpu_name {
            yaml.push_str(&format!("    gpu_name: \"{}\"\n", v));
        }
        if let Some(v) = entry.cores_total {
            yaml.push_str(&format!("    cores_total: {}\n", v));
        }
        if let Some(v) = entry.mem_total_gb {
            yaml.push_str(&format!("    mem_total_gb: {}\n", v));
        }
        if let Some(v) = entry.power_limit_watts {
            yaml.push_str(&format!("    power_limit_watts: {}\n", v));
        }
    }
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), yaml).unwrap();
    fleetwatch::config::load_inventory(file.path()).unwrap()
}

