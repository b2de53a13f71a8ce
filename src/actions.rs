//! Action manager: translates recommendations into log lines, gated by
//! mode and `dry_run`. The catalog of real remediation actions is out of
//! scope; this only implements the mode contract.

use crate::config::AgentMode;
use crate::heuristics::Recommendation;
use tracing::info;

pub struct ActionManager {
    mode: AgentMode,
    dry_run: bool,
}

impl ActionManager {
    pub fn new(mode: AgentMode, dry_run: bool) -> Self {
        Self { mode, dry_run }
    }

    /// Process recommendations in order. `recommendation` mode always
    /// just logs; `auto-action` mode would invoke a remediation
    /// callback, but `dry_run` replaces it with a log line describing
    /// the intended action.
    pub fn execute(&self, recommendations: &[Recommendation]) {
        for rec in recommendations {
            self.handle(rec);
        }
    }

    fn handle(&self, rec: &Recommendation) {
        let msg = format!("[{:?}] {}", rec.severity, rec.message);

        match self.mode {
            AgentMode::Recommendation => {
                info!(kind = %rec.kind, "RECOMMENDATION: {}", msg);
            }
            AgentMode::AutoAction => {
                if self.dry_run {
                    info!(kind = %rec.kind, "DRY-RUN ACTION: would address: {}", msg);
                } else {
                    info!(kind = %rec.kind, "EXECUTING ACTION: addressing: {}", msg);
                }
            }
        }
    }
}
