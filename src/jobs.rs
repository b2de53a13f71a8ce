//! Job discovery: turns `pgrep -af` output into training job descriptors
//! keyed by a derived session name.

use crate::errors::ParseError;
use serde::{Deserialize, Serialize};

/// The path segment identifying a training process among all of a
/// node's running processes.
pub const TRAINING_PROCESS_MARKER: &str = "dummy_train.py";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub node: String,
    pub session: String,
    pub pid: u32,
    pub uptime: String,
    pub log_file: String,
    pub log_preview: Vec<String>,
}

struct JobArgs {
    owner: String,
    project: String,
    mode: String,
}

/// Positional scan for `--owner`, `--project`, `--mode` after the marker.
/// Returns `ParseError::IncompleteJobLine` naming the first missing field
/// (caller discards the line with a warning), rather than falling back to
/// default values.
fn scan_job_args(args_str: &str, line: &str) -> Result<JobArgs, ParseError> {
    let tokens = shell_words(args_str);
    let mut owner = None;
    let mut project = None;
    let mut mode = None;

    let mut i = 0;
    while i < tokens.len() {
        match tokens[i].as_str() {
            "--owner" if i + 1 < tokens.len() => owner = Some(tokens[i + 1].clone()),
            "--project" if i + 1 < tokens.len() => project = Some(tokens[i + 1].clone()),
            "--mode" if i + 1 < tokens.len() => mode = Some(tokens[i + 1].clone()),
            _ => {}
        }
        i += 1;
    }

    let incomplete = |field| ParseError::IncompleteJobLine {
        field,
        line: line.to_string(),
    };

    Ok(JobArgs {
        owner: owner.ok_or_else(|| incomplete("owner"))?,
        project: project.ok_or_else(|| incomplete("project"))?,
        mode: mode.ok_or_else(|| incomplete("mode"))?,
    })
}

/// Minimal shell-word tokenizer: splits on whitespace, honoring single
/// and double quoted spans. Sufficient for the argument strings this
/// parser ever sees (no escape sequences).
fn shell_words(input: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_word = false;

    for c in input.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                    in_word = true;
                } else if c.is_whitespace() {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                } else {
                    current.push(c);
                    in_word = true;
                }
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

/// Parse one `pgrep -af` line: `<pid> <full command line>`.
///
/// Returns `Ok(None)` if the line is empty or doesn't carry the training
/// marker at all (it simply isn't a training process line, not an
/// error). Returns `Err(ParseError::IncompleteJobLine)` naming the
/// offending field if the pid or any of `--owner`/`--project`/`--mode`
/// is missing.
fn parse_pgrep_line(line: &str) -> Result<Option<(u32, String, String, String)>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let mut parts = line.splitn(2, ' ');
    let pid_str = parts.next().unwrap_or("");
    let full_cmd = parts.next().unwrap_or("").trim();

    if !full_cmd.contains(TRAINING_PROCESS_MARKER) {
        return Ok(None);
    }

    let pid: u32 = pid_str.parse().map_err(|_| ParseError::IncompleteJobLine {
        field: "pid",
        line: line.to_string(),
    })?;

    let after_marker = full_cmd
        .split_once(TRAINING_PROCESS_MARKER)
        .map(|(_, rest)| rest)
        .unwrap_or("");
    let job_args = scan_job_args(after_marker, line)?;

    Ok(Some((pid, job_args.owner, job_args.project, job_args.mode)))
}

/// Parse a matched `pgrep` line down to its pid and derived session
/// name, without issuing the follow-up remote calls yet. Lets a poller
/// decide the log file path (which depends on the session) before
/// running the `tail` command.
///
/// Returns `None` both for lines that aren't training processes and for
/// ones that are but are missing a required field; the latter is logged
/// here since callers only care about the resulting pid/session pair.
pub fn parse_job_line(pgrep_line: &str) -> Option<(u32, String)> {
    match parse_pgrep_line(pgrep_line) {
        Ok(Some((pid, owner, project, mode))) => {
            Some((pid, format!("train:{owner}:{project}:{mode}")))
        }
        Ok(None) => None,
        Err(err) => {
            tracing::warn!(error = %err, "dropping incomplete training job line");
            None
        }
    }
}

/// Build one job descriptor from a matched `pgrep` line plus the
/// results of the two follow-up remote calls (`ps -o etime=`, `tail`).
pub fn build_job_descriptor(
    node: &str,
    pgrep_line: &str,
    uptime_output: &str,
    log_file: String,
    log_tail_output: &str,
) -> Option<JobDescriptor> {
    let (pid, session) = parse_job_line(pgrep_line)?;

    Some(JobDescriptor {
        node: node.to_string(),
        session,
        pid,
        uptime: uptime_output.trim().to_string(),
        log_file,
        log_preview: log_tail_output
            .lines()
            .map(str::to_string)
            .filter(|l| !l.is_empty())
            .collect(),
    })
}

/// Derive the per-node log file path for a session.
pub fn log_file_path(data_dir: &str, session: &str) -> String {
    format!("{}/logs/{}.log", data_dir, session.replace(':', "_"))
}
