//! Snapshot builder: reads the metrics log, keeps the latest record per
//! `(node, gpu_index)`, and joins it with the static inventory into a
//! single cluster snapshot document.

use crate::config::Inventory;
use crate::metrics::{MetricsRecord, SCHEMA_METRICS_V1};
use crate::util;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuSummary {
    pub gpu_id: u32,
    pub gpu_name: String,
    pub utilization_percent: u8,
    pub memory_util_percent: u8,
    pub memory_used_mib: u64,
    pub memory_total_mib: u64,
    pub temperature_celsius: u32,
    pub power_watts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_limit_watts: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuNodeSummary {
    pub node_name: String,
    pub cores_total: u32,
    pub mem_total_gb: u32,
    pub cpu_util_percent: u8,
    pub mem_util_percent: u8,
    pub gpu_summary_name: String,
    pub gpus: Vec<GpuSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub last_updated_timestamp: String,
    pub total_power_consumption_watts: u64,
    pub login_nodes: Vec<serde_json::Value>,
    pub gpu_nodes: Vec<GpuNodeSummary>,
}

/// Read the metrics log linearly and keep the latest record per
/// `(node, gpu_index)` — last-write-wins on equal `ts`.
pub fn latest_per_gpu(metrics_path: &Path) -> BTreeMap<(String, u32), MetricsRecord> {
    let mut latest: BTreeMap<(String, u32), MetricsRecord> = BTreeMap::new();

    let content = match std::fs::read_to_string(metrics_path) {
        Ok(content) => content,
        Err(_) => return latest,
    };

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: MetricsRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(_) => continue,
        };
        if record.schema != SCHEMA_METRICS_V1 {
            continue;
        }

        let key = (record.node.clone(), record.gpu_index);
        match latest.get(&key) {
            Some(existing) if existing.ts > record.ts => {}
            _ => {
                latest.insert(key, record);
            }
        }
    }

    latest
}

fn round_pct(used: f64, total: f64) -> u8 {
    if total <= 0.0 {
        return 0;
    }
    let pct = (100.0 * used / total).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Build the cluster snapshot from the latest-per-GPU index and the
/// static inventory. Static inventory wins for `gpu_name`,
/// `cores_total`, `mem_total_gb`, `power_limit_watts`; telemetry wins
/// for everything dynamic.
pub fn build_snapshot(
    latest: &BTreeMap<(String, u32), MetricsRecord>,
    inventory: &Inventory,
    display_zone: Tz,
) -> ClusterSnapshot {
    let mut by_node: BTreeMap<String, Vec<&MetricsRecord>> = BTreeMap::new();
    let mut max_ts: Option<String> = None;
    let mut total_power: u64 = 0;

    for record in latest.values() {
        by_node.entry(record.node.clone()).or_default().push(record);
        total_power += record.power_w as u64;
        max_ts = match max_ts {
            Some(current) if current >= record.ts => Some(current),
            _ => Some(record.ts.clone()),
        };
    }

    let mut gpu_nodes = Vec::with_capacity(by_node.len());
    for (node_name, mut records) in by_node {
        records.sort_by_key(|r| r.gpu_index);

        let inv = inventory.for_node(&node_name);
        let gpu_name = inv.gpu_name.clone().unwrap_or_else(|| "Simulated GPU".to_string());
        let cores_total = inv.cores_total.unwrap_or(8);
        let mem_total_gb = inv.mem_total_gb.unwrap_or(16);
        let power_limit_watts = inv.power_limit_watts;

        let cpu_vals: Vec<u8> = records
            .iter()
            .filter_map(|r| r.host.as_ref().map(|h| h.cpu_pct))
            .collect();
        let cpu_util_percent = if cpu_vals.is_empty() {
            0
        } else {
            let sum: u32 = cpu_vals.iter().map(|&v| v as u32).sum();
            let mean = sum as f64 / cpu_vals.len() as f64;
            round_pct(mean, 100.0)
        };

        let ram_used_max = records
            .iter()
            .filter_map(|r| r.host.as_ref().map(|h| h.ram_used_mb))
            .max()
            .unwrap_or(0);
        let mem_util_percent = round_pct(ram_used_max as f64, (mem_total_gb as u64 * 1024) as f64);

        let gpus: Vec<GpuSummary> = records
            .iter()
            .map(|r| GpuSummary {
                gpu_id: r.gpu_index,
                gpu_name: gpu_name.clone(),
                utilization_percent: r.util_pct,
                memory_util_percent: round_pct(r.mem_used_mb as f64, r.mem_total_mb.max(1) as f64),
                memory_used_mib: r.mem_used_mb,
                memory_total_mib: r.mem_total_mb,
                temperature_celsius: r.temp_c,
                power_watts: r.power_w,
                power_limit_watts,
            })
            .collect();

        gpu_nodes.push(GpuNodeSummary {
            node_name,
            cores_total,
            mem_total_gb,
            cpu_util_percent,
            mem_util_percent,
            gpu_summary_name: format!("{}x {}", gpus.len(), gpu_name),
            gpus,
        });
    }

    let last_updated_timestamp = match max_ts.and_then(|ts| util::parse_ts_utc(&ts)) {
        Some(ts) => util::render_in_zone(ts, display_zone),
        None => util::render_in_zone(chrono::Utc::now(), display_zone),
    };

    ClusterSnapshot {
        last_updated_timestamp,
        total_power_consumption_watts: total_power,
        login_nodes: Vec::new(),
        gpu_nodes,
    }
}

/// Write the snapshot atomically: a temp sibling file, then rename
/// the temp file lives alongside the final path so the rename stays
/// on the same filesystem.
pub fn write_snapshot_atomic(path: &Path, snapshot: &ClusterSnapshot) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(snapshot).expect("ClusterSnapshot always serializes");

    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.flush()?;
    }

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GpuInventoryEntry;
    use std::collections::HashMap as StdHashMap;

    fn record(node: &str, gpu_index: u32, ts: &str, util_pct: u8, power_w: u32) -> MetricsRecord {
        MetricsRecord {
            schema: SCHEMA_METRICS_V1.to_string(),
            ts: ts.to_string(),
            node: node.to_string(),
            gpu_index,
            util_pct,
            mem_used_mb: 2048,
            mem_total_mb: 16384,
            temp_c: 55,
            power_w,
            host: Some(crate::metrics::HostStats {
                cpu_pct: 5,
                ram_used_mb: 8192,
            }),
        }
    }

    fn inventory_with(node: &str, entry: GpuInventoryEntry) -> Inventory {
        let mut nodes = StdHashMap::new();
        nodes.insert(node.to_string(), entry);
        build_test_inventory(nodes)
    }

    fn build_test_inventory(nodes: StdHashMap<String, GpuInventoryEntry>) -> Inventory {
        // Exercises the same merge path as load_inventory by round-tripping through YAML.
        let mut yaml = String::from("defaults: {}\nnodes:\n");
        for (name, entry) in &nodes {
            yaml.push_str(&format!("  {}:\n", name));
            if let Some(gpu_name) = &entry.gpu_name {
                yaml.push_str(&format!("    gpu_name: \"{}\"\n", gpu_name));
            }
            if let Some(cores) = entry.cores_total {
                yaml.push_str(&format!("    cores_total: {}\n", cores));
            }
            if let Some(mem) = entry.mem_total_gb {
                yaml.push_str(&format!("    mem_total_gb: {}\n", mem));
            }
            if let Some(power) = entry.power_limit_watts {
                yaml.push_str(&format!("    power_limit_watts: {}\n", power));
            }
        }
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), yaml).unwrap();
        crate::config::load_inventory(file.path()).unwrap()
    }

    #[test]
    fn latest_wins_on_duplicate_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let lines = vec![
            serde_json::to_string(&record("n1", 0, "2026-01-01T00:00:00.000Z", 10, 100)).unwrap(),
            serde_json::to_string(&record("n1", 0, "2026-01-01T00:01:00.000Z", 90, 200)).unwrap(),
        ];
        std::fs::write(&path, lines.join("\n")).unwrap();

        let latest = latest_per_gpu(&path);
        let rec = latest.get(&("n1".to_string(), 0)).unwrap();
        assert_eq!(rec.util_pct, 90);
        assert_eq!(rec.power_w, 200);
    }

    #[test]
    fn build_snapshot_computes_expected_fields() {
        let mut latest = BTreeMap::new();
        latest.insert(
            ("n1".to_string(), 0),
            record("n1", 0, "2026-01-01T00:00:00.000Z", 10, 120),
        );
        latest.insert(
            ("n1".to_string(), 1),
            record("n1", 1, "2026-01-01T00:00:00.000Z", 20, 150),
        );

        let inventory = inventory_with(
            "n1",
            GpuInventoryEntry {
                gpu_name: Some("GPU-X".to_string()),
                cores_total: Some(16),
                mem_total_gb: Some(64),
                power_limit_watts: Some(300),
            },
        );

        let snapshot = build_snapshot(&latest, &inventory, chrono_tz::UTC);
        assert_eq!(snapshot.total_power_consumption_watts, 270);
        assert_eq!(snapshot.gpu_nodes.len(), 1);
        let node = &snapshot.gpu_nodes[0];
        assert_eq!(node.gpu_summary_name, "2x GPU-X");
        assert_eq!(node.gpus[0].utilization_percent, 10);
        assert_eq!(node.gpus[0].memory_util_percent, 13);
    }

    #[test]
    fn write_snapshot_atomic_produces_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster_snapshot.json");
        let snapshot = ClusterSnapshot {
            last_updated_timestamp: "2026-01-01T00:00:00.000Z".to_string(),
            total_power_consumption_watts: 100,
            login_nodes: Vec::new(),
            gpu_nodes: Vec::new(),
        };
        write_snapshot_atomic(&path, &snapshot).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: ClusterSnapshot = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.total_power_consumption_watts, 100);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
