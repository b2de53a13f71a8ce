//! Heuristic engine: pure functions of a snapshot plus the job list,
//! emitting recommendations. Rules are configurable via
//! [`crate::config::Thresholds`].

use crate::config::Thresholds;
use crate::jobs::JobDescriptor;
use crate::snapshot::ClusterSnapshot;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_id: Option<u32>,
    pub message: String,
}

/// A GPU whose `utilization_percent < (100 - gpu_idle_percent)` is idle
/// (default threshold 95, i.e. `< 5%`).
fn check_idle_gpus(snapshot: &ClusterSnapshot, thresholds: &Thresholds) -> Vec<Recommendation> {
    let idle_ceiling = 100.0 - thresholds.gpu_idle_percent;
    let mut recs = Vec::new();

    for node in &snapshot.gpu_nodes {
        for gpu in &node.gpus {
            if (gpu.utilization_percent as f64) < idle_ceiling {
                recs.push(Recommendation {
                    kind: "IDLE_GPU".to_string(),
                    severity: Severity::Medium,
                    node: Some(node.node_name.clone()),
                    gpu_id: Some(gpu.gpu_id),
                    message: format!(
                        "GPU {} on {} is idle (util: {}%). Consider scheduling pending jobs.",
                        gpu.gpu_id, node.node_name, gpu.utilization_percent
                    ),
                });
            }
        }
    }

    recs
}

/// Mean per-node `cpu_util_percent`; if below `min_utilization_percent`,
/// emit a single cluster-wide recommendation.
fn check_low_utilization(snapshot: &ClusterSnapshot, thresholds: &Thresholds) -> Option<Recommendation> {
    if snapshot.gpu_nodes.is_empty() {
        return None;
    }

    let total: u32 = snapshot.gpu_nodes.iter().map(|n| n.cpu_util_percent as u32).sum();
    let mean = total as f64 / snapshot.gpu_nodes.len() as f64;

    if mean < thresholds.min_utilization_percent {
        Some(Recommendation {
            kind: "LOW_UTILIZATION".to_string(),
            severity: Severity::Info,
            node: None,
            gpu_id: None,
            message: format!(
                "Cluster average CPU utilization is low ({:.1}%). You have capacity for more jobs.",
                mean
            ),
        })
    } else {
        None
    }
}

/// Evaluate all built-in rules. Evaluation order is stable (idle GPUs,
/// then low utilization) but callers must not rely on it.
///
/// `jobs` is accepted as an extension point for rules that attribute
/// idleness to specific sessions; no built-in rule inspects it yet.
pub fn evaluate(
    snapshot: &ClusterSnapshot,
    _jobs: &[JobDescriptor],
    thresholds: &Thresholds,
) -> Vec<Recommendation> {
    let mut recs = check_idle_gpus(snapshot, thresholds);
    if let Some(rec) = check_low_utilization(snapshot, thresholds) {
        recs.push(rec);
    }
    recs
}
