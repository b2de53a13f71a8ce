//! Error taxonomy shared across the observer pipeline.
//!
//! Each kind below is a per-component error type rather than one giant
//! enum, so that call sites can match on exactly the failures relevant to
//! them. `main.rs`/`bin/agent.rs` wrap these in `anyhow::Error` at the
//! process boundary.

use thiserror::Error;

/// Fatal at start-up: missing/unparseable configuration, empty node list.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("node inventory in {path} is empty")]
    EmptyNodeList { path: String },
}

/// Per-node, per-tick. Logged at WARN/ERROR; the node is skipped until
/// the next tick.
#[derive(Debug, Error, Clone)]
pub enum RemoteError {
    #[error("authentication to {node} failed")]
    AuthFailure { node: String },

    #[error("could not connect to {node}: {detail}")]
    ConnectFailure { node: String, detail: String },

    #[error("command on {node} timed out after {timeout_secs}s")]
    Timeout { node: String, timeout_secs: u64 },

    #[error("transport error talking to {node}: {detail}")]
    TransportError { node: String, detail: String },
}

/// Per-record. The offending line is dropped; siblings are kept.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed GPU telemetry line: {line}")]
    MalformedGpuLine { line: String },

    #[error("malformed host stats: {detail}")]
    MalformedHostStats { detail: String },

    #[error("process line missing required field {field}: {line}")]
    IncompleteJobLine { field: &'static str, line: String },
}

/// Per-node, per-tick file-append failure. Treated as a poll failure for
/// that node; never crashes the loop.
#[derive(Debug, Error)]
#[error("failed to append to {path}: {source}")]
pub struct IoAppendError {
    pub path: String,
    #[source]
    pub source: std::io::Error,
}
