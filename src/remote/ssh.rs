//! SSH Command Executor
//!
//! Runs commands on cluster hosts through the system `ssh` binary.

use crate::config::SshConfig;
use crate::domain::ports::{ExecOutput, RemoteExecutor};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Exit status `ssh` reserves for its own failures
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// [`RemoteExecutor`] backed by `ssh`
pub struct SshExecutor {
    binary_path: String,
    config: SshConfig,
}

impl SshExecutor {
    pub fn new(config: SshConfig) -> Self {
        Self {
            binary_path: "ssh".to_string(),
            config,
        }
    }

    /// Use a different ssh binary
    pub fn with_binary(mut self, binary_path: impl Into<String>) -> Self {
        self.binary_path = binary_path.into();
        self
    }

    fn args(&self, host: &str, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_secs),
            "-p".to_string(),
            self.config.port.to_string(),
        ];
        if let Some(identity) = &self.config.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        for option in &self.config.extra_options {
            args.push("-o".to_string());
            args.push(option.clone());
        }

        let target = match &self.config.user {
            Some(user) => format!("{}@{}", user, host),
            None => host.to_string(),
        };
        args.push(target);
        args.push("--".to_string());
        args.push(command.to_string());
        args
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, host: &str, command: &str) -> Result<ExecOutput> {
        debug!("[{}] $ {}", host, command);

        let output = Command::new(&self.binary_path)
            .args(self.args(host, command))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::RemoteUnreachable {
                host: host.to_string(),
                reason: format!("failed to run {}: {}", self.binary_path, e),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code == SSH_TRANSPORT_FAILURE {
            return Err(Error::RemoteUnreachable {
                host: host.to_string(),
                reason: stderr.trim().to_string(),
            });
        }

        Ok(ExecOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
        })
    }
}
