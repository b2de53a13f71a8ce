//! Config loader: parses the node inventory, the static GPU inventory,
//! and the agent's own settings from on-disk YAML.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// A single entry from `nodes.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub gpu_count: u32,
}

#[derive(Debug, Deserialize)]
struct NodesDoc {
    #[serde(default)]
    nodes: Vec<serde_yaml::Value>,
}

/// Load `nodes.yaml`, dropping entries missing a required key.
///
/// Fails the process start-up (non-zero exit, via the returned
/// `ConfigError`) if the file is unreadable/unparseable or the resulting
/// node list is empty.
pub fn load_nodes<P: AsRef<Path>>(path: P) -> Result<Vec<NodeDescriptor>, ConfigError> {
    let path_ref = path.as_ref();
    let path_str = path_ref.display().to_string();

    let content = fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
        path: path_str.clone(),
        source,
    })?;

    let doc: NodesDoc = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path_str.clone(),
        source,
    })?;

    let mut nodes = Vec::with_capacity(doc.nodes.len());
    for (idx, raw) in doc.nodes.into_iter().enumerate() {
        match serde_yaml::from_value::<NodeDescriptor>(raw) {
            Ok(node) => nodes.push(node),
            Err(err) => {
                tracing::warn!(index = idx, error = %err, "dropping node entry missing required keys");
            }
        }
    }

    if nodes.is_empty() {
        return Err(ConfigError::EmptyNodeList { path: path_str });
    }

    Ok(nodes)
}

/// A single node's static GPU facts, after merging `defaults` underneath
/// any per-node override.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GpuInventoryEntry {
    #[serde(default)]
    pub gpu_name: Option<String>,
    #[serde(default)]
    pub cores_total: Option<u32>,
    #[serde(default)]
    pub mem_total_gb: Option<u32>,
    #[serde(default)]
    pub power_limit_watts: Option<u32>,
}

impl GpuInventoryEntry {
    fn merge_over(defaults: &GpuInventoryEntry, override_: &GpuInventoryEntry) -> GpuInventoryEntry {
        GpuInventoryEntry {
            gpu_name: override_.gpu_name.clone().or_else(|| defaults.gpu_name.clone()),
            cores_total: override_.cores_total.or(defaults.cores_total),
            mem_total_gb: override_.mem_total_gb.or(defaults.mem_total_gb),
            power_limit_watts: override_.power_limit_watts.or(defaults.power_limit_watts),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct InventoryDoc {
    #[serde(default)]
    defaults: GpuInventoryEntry,
    #[serde(default)]
    nodes: HashMap<String, GpuInventoryEntry>,
}

/// `node -> merged GPU inventory entry` lookup.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    defaults: GpuInventoryEntry,
    nodes: HashMap<String, GpuInventoryEntry>,
}

impl Inventory {
    /// The inventory for a given node, with `defaults` applied underneath
    /// any per-node override. Missing entirely when neither `defaults`
    /// nor the node has ever set a field.
    pub fn for_node(&self, node: &str) -> GpuInventoryEntry {
        match self.nodes.get(node) {
            Some(entry) => GpuInventoryEntry::merge_over(&self.defaults, entry),
            None => self.defaults.clone(),
        }
    }
}

/// Load `gpu_inventory.yaml`. Optional: a missing file yields an empty
/// inventory: the GPU inventory is optional.
pub fn load_inventory<P: AsRef<Path>>(path: P) -> Result<Inventory, ConfigError> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        tracing::debug!(path = %path_ref.display(), "no GPU inventory file, using empty inventory");
        return Ok(Inventory::default());
    }

    let path_str = path_ref.display().to_string();
    let content = fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
        path: path_str.clone(),
        source,
    })?;

    let doc: InventoryDoc = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path_str,
        source,
    })?;

    Ok(Inventory {
        defaults: doc.defaults,
        nodes: doc.nodes,
    })
}

/// Agent operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentMode {
    Recommendation,
    AutoAction,
}

impl Default for AgentMode {
    fn default() -> Self {
        AgentMode::Recommendation
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default)]
    pub mode: AgentMode,
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_display_timezone")]
    pub display_timezone: String,
    #[serde(default = "default_max_concurrent_nodes")]
    pub max_concurrent_nodes: usize,
}

fn default_dry_run() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    30
}

fn default_display_timezone() -> String {
    "UTC".to_string()
}

fn default_max_concurrent_nodes() -> usize {
    8
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            mode: AgentMode::default(),
            dry_run: default_dry_run(),
            poll_interval_seconds: default_poll_interval(),
            display_timezone: default_display_timezone(),
            max_concurrent_nodes: default_max_concurrent_nodes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_gpu_idle_percent")]
    pub gpu_idle_percent: f64,
    #[serde(default = "default_min_utilization_percent")]
    pub min_utilization_percent: f64,
}

fn default_gpu_idle_percent() -> f64 {
    95.0
}

fn default_min_utilization_percent() -> f64 {
    40.0
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            gpu_idle_percent: default_gpu_idle_percent(),
            min_utilization_percent: default_min_utilization_percent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    #[serde(default = "default_metrics_file")]
    pub metrics_file: String,
    #[serde(default = "default_jobs_file")]
    pub jobs_file: String,
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,
}

fn default_metrics_file() -> String {
    "data/metrics.jsonl".to_string()
}

fn default_jobs_file() -> String {
    "data/jobs.jsonl".to_string()
}

fn default_snapshot_file() -> String {
    "data/cluster_snapshot.json".to_string()
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            metrics_file: default_metrics_file(),
            jobs_file: default_jobs_file(),
            snapshot_file: default_snapshot_file(),
        }
    }
}

/// Top-level `config.yaml` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub paths: Paths,
}

/// Load `config.yaml`. A missing file yields all-defaults rather than
/// failing start-up.
pub fn load_agent_config<P: AsRef<Path>>(path: P) -> Result<AgentConfig, ConfigError> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        tracing::debug!(path = %path_ref.display(), "no agent config file, using defaults");
        return Ok(AgentConfig::default());
    }

    let path_str = path_ref.display().to_string();
    let content = fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
        path: path_str.clone(),
        source,
    })?;

    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path_str,
        source,
    })
}
