//! Telemetry parsing: turns raw `nvidia-smi`-style CSV and a two-line
//! host-stats blob into typed, schema-tagged records.

use crate::errors::ParseError;
use crate::util;
use serde::{Deserialize, Serialize};

pub const SCHEMA_METRICS_V1: &str = "metrics/v1";

/// Optional host CPU/RAM snapshot attached to a GPU record. Absent
/// entirely (not zero-filled) if either host line failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HostStats {
    pub cpu_pct: u8,
    pub ram_used_mb: u64,
}

/// A single `(node, gpu_index)` telemetry sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub schema: String,
    pub ts: String,
    pub node: String,
    pub gpu_index: u32,
    pub util_pct: u8,
    pub mem_used_mb: u64,
    pub mem_total_mb: u64,
    pub temp_c: u32,
    pub power_w: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<HostStats>,
}

/// Parse one `nvidia-smi --query-gpu=...` CSV line:
/// `util,memused,memtotal,temp,power`.
///
/// Malformed lines are dropped with a warning by the caller; this
/// function reports the failure via `ParseError` and keeps parsing
/// siblings.
fn parse_gpu_line(line: &str) -> Result<(u8, u64, u64, u32, u32), ParseError> {
    let fields: Vec<&str> = line.split(',').map(|f| f.trim()).collect();
    if fields.len() != 5 {
        return Err(ParseError::MalformedGpuLine {
            line: line.to_string(),
        });
    }

    let parse_u64 = |s: &str| s.parse::<u64>().ok();
    let parse_u32 = |s: &str| s.parse::<u32>().ok();

    let util_raw = parse_u64(fields[0]);
    let mem_used = parse_u64(fields[1]);
    let mem_total = parse_u64(fields[2]);
    let temp = parse_u32(fields[3]);
    let power = parse_u32(fields[4]);

    match (util_raw, mem_used, mem_total, temp, power) {
        (Some(util_raw), Some(mem_used), Some(mem_total), Some(temp), Some(power)) => {
            let util_pct = util::clamp_pct(util_raw as i64, "util_pct", line);
            Ok((util_pct, mem_used, mem_total, temp, power))
        }
        _ => Err(ParseError::MalformedGpuLine {
            line: line.to_string(),
        }),
    }
}

/// Parse all GPU telemetry lines for a single node, composing one
/// `MetricsRecord` per successfully-parsed line. `host` is attached to
/// every record (the schema ties host stats to the GPU record).
///
/// A line that fails to parse is dropped with a WARN log; the node is
/// still emitted for the lines that did parse.
pub fn parse_gpu_records(
    node: &str,
    csv_output: &str,
    ts: &str,
    host: Option<HostStats>,
) -> Vec<MetricsRecord> {
    let mut records = Vec::new();
    for (gpu_index, line) in csv_output.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_gpu_line(line) {
            Ok((util_pct, mem_used_mb, mem_total_mb, temp_c, power_w)) => {
                records.push(MetricsRecord {
                    schema: SCHEMA_METRICS_V1.to_string(),
                    ts: ts.to_string(),
                    node: node.to_string(),
                    gpu_index: gpu_index as u32,
                    util_pct,
                    mem_used_mb,
                    mem_total_mb,
                    temp_c,
                    power_w,
                    host: host.clone(),
                });
            }
            Err(err) => {
                tracing::warn!(node, error = %err, "dropping malformed GPU telemetry line");
            }
        }
    }
    records
}

/// Parse the two-line host-stats blob: a floating-point CPU-busy
/// percentage, then `<ram_used_mb> <ram_total_mb>`.
///
/// Returns `ParseError::MalformedHostStats` (the host stats are not
/// zero-substituted) if either line fails to parse; the caller discards
/// the error and treats it the same as an absent `host` field.
pub fn parse_host_stats(output: &str) -> Result<HostStats, ParseError> {
    let malformed = || ParseError::MalformedHostStats {
        detail: output.to_string(),
    };

    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    let cpu_line = lines.next().ok_or_else(malformed)?;
    let mem_line = lines.next().ok_or_else(malformed)?;

    let cpu_raw: f64 = cpu_line.parse().map_err(|_| malformed())?;
    let cpu_pct = util::clamp_pct(cpu_raw.round() as i64, "cpu_pct", cpu_line);

    let mut mem_fields = mem_line.split_whitespace();
    let ram_used_mb: u64 = mem_fields
        .next()
        .ok_or_else(malformed)?
        .parse()
        .map_err(|_| malformed())?;
    let _ram_total_mb: u64 = mem_fields
        .next()
        .ok_or_else(malformed)?
        .parse()
        .map_err(|_| malformed())?;

    Ok(HostStats { cpu_pct, ram_used_mb })
}
