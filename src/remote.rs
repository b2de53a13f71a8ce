use crate::errors::RemoteError;
use async_trait::async_trait;
use shell_escape::escape;
use std::borrow::Cow;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Result of a single remote command invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// SSH connection facts for a single node.
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
}

impl SshConfig {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    fn is_local(&self) -> bool {
        self.host == "localhost" || self.host == "127.0.0.1"
    }
}

/// `execute(node, command, timeout) -> CommandOutput`.
///
/// Implementations must map connection/auth/transport failures onto
/// [`RemoteError`] and never log credentials.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(
        &self,
        node: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteError>;
}

/// `RemoteExecutor` backed by the system `ssh`/`sshpass` binaries.
///
/// One connection attempt per call; callers retry at the next tick. Host
/// key checking is disabled to match the simulated fleet and MUST become
/// a toggle before this runs against real infrastructure.
pub struct SshExecutor {
    configs: std::collections::HashMap<String, SshConfig>,
}

impl SshExecutor {
    pub fn new(configs: std::collections::HashMap<String, SshConfig>) -> Self {
        Self { configs }
    }

    fn config_for<'a>(&'a self, node: &str) -> Result<&'a SshConfig, RemoteError> {
        self.configs.get(node).ok_or_else(|| RemoteError::ConnectFailure {
            node: node.to_string(),
            detail: "no SSH configuration for node".to_string(),
        })
    }

    fn build_command(config: &SshConfig, command: &str) -> Command {
        if config.is_local() {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            return cmd;
        }

        let host_spec = format!("{}@{}", config.user, config.host);
        let escaped_command = escape(Cow::Borrowed(command));

        if let Some(password) = &config.password {
            let mut cmd = Command::new("sshpass");
            cmd.arg("-p")
                .arg(password)
                .arg("ssh")
                .arg("-o")
                .arg("StrictHostKeyChecking=no")
                .arg("-o")
                .arg("UserKnownHostsFile=/dev/null")
                .arg("-p")
                .arg(config.port.to_string())
                .arg(&host_spec)
                .arg(escaped_command.as_ref());
            cmd
        } else {
            let mut cmd = Command::new("ssh");
            cmd.arg("-o")
                .arg("StrictHostKeyChecking=no")
                .arg("-o")
                .arg("UserKnownHostsFile=/dev/null")
                .arg("-p")
                .arg(config.port.to_string())
                .arg(&host_spec)
                .arg(escaped_command.as_ref());
            cmd
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(
        &self,
        node: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteError> {
        let config = self.config_for(node)?;
        debug!(node, command, "executing remote command");

        let mut cmd = Self::build_command(config, command);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(RemoteError::TransportError {
                    node: node.to_string(),
                    detail: err.to_string(),
                })
            }
            Err(_) => {
                return Err(RemoteError::Timeout {
                    node: node.to_string(),
                    timeout_secs: timeout.as_secs(),
                })
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        // sshpass exits 5 for a rejected password; ssh itself (and sshpass
        // falling through to it) prints "Permission denied" on stderr and
        // exits 255. Either way that's an auth failure, not a transport one.
        if exit_code == 5 || (exit_code == 255 && stderr.contains("Permission denied")) {
            return Err(RemoteError::AuthFailure {
                node: node.to_string(),
            });
        }

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }
}
