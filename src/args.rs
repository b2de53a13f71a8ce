use clap::{Parser, ValueEnum};

/// Poll a fleet of GPU training nodes over SSH and maintain the metrics,
/// jobs, and snapshot logs.
#[derive(Parser)]
#[command(
    name = "fleetwatch",
    version = env!("CARGO_PKG_VERSION"),
    about = "Remote-shell poller for a simulated GPU training fleet",
    long_about = "fleetwatch fans out to configured nodes over SSH on a fixed cadence, \
parses GPU telemetry and host stats, and maintains an append-only metrics log."
)]
pub struct Cli {
    /// Node inventory path
    #[arg(long, default_value = "config/nodes.yaml")]
    pub config: String,

    /// GPU inventory path (optional; empty inventory if absent)
    #[arg(long)]
    pub gpu_inventory: Option<String>,

    /// Metrics log output path
    #[arg(long, default_value = "data/metrics.jsonl")]
    pub output: String,

    /// Jobs log output path
    #[arg(long, default_value = "data/jobs.jsonl")]
    pub jobs_output: String,

    /// Run a single tick and exit
    #[arg(long)]
    pub once: bool,

    /// Poll interval in seconds; required unless --once is set
    #[arg(long)]
    pub interval: Option<u64>,

    /// Maximum number of nodes polled concurrently
    #[arg(long, default_value = "8")]
    pub max_concurrent: usize,

    /// Log verbosity
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(ValueEnum, Clone, Debug)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

impl Cli {
    /// Parse command line arguments with validation, exiting with a
    /// non-zero status on invalid flag combinations.
    pub fn parse() -> Self {
        let cli = Self::parse_from(std::env::args());
        cli.validate();
        cli
    }

    fn validate(&self) {
        if !self.once && self.interval.is_none() {
            eprintln!("Error: --interval is required unless --once is set");
            std::process::exit(2);
        }

        if let Some(interval) = self.interval {
            if interval == 0 {
                eprintln!("Error: --interval must be a positive integer");
                std::process::exit(2);
            }
        }

        if self.max_concurrent == 0 {
            eprintln!("Error: --max-concurrent must be greater than 0");
            std::process::exit(2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_once_without_interval() {
        let cli = Cli::try_parse_from(["fleetwatch", "--once"]).unwrap();
        assert!(cli.once);
        assert!(cli.interval.is_none());
    }

    #[test]
    fn parses_interval_flag() {
        let cli = Cli::try_parse_from(["fleetwatch", "--interval", "30"]).unwrap();
        assert_eq!(cli.interval, Some(30));
        assert!(!cli.once);
    }

    #[test]
    fn defaults_match_spec() {
        let cli = Cli::try_parse_from(["fleetwatch", "--once"]).unwrap();
        assert_eq!(cli.config, "config/nodes.yaml");
        assert_eq!(cli.output, "data/metrics.jsonl");
        assert_eq!(cli.max_concurrent, 8);
    }
}
