//! Remote Chunkfile Formatter
//!
//! Launches the formatter on the host owning the device and reads back its
//! progress. The status command prints `current/target` on its first line and
//! a `finished` marker once the pool is complete.

use super::shell_quote;
use crate::config::FormatConfig;
use crate::domain::ports::{FormatReport, FormatRequest, FormatSubsystem, RemoteExecutorRef};
use crate::error::Result;
use async_trait::async_trait;
use tracing::{debug, info};

/// [`FormatSubsystem`] running configured commands over a remote executor
pub struct RemoteFormatter {
    executor: RemoteExecutorRef,
    config: FormatConfig,
}

impl RemoteFormatter {
    pub fn new(executor: RemoteExecutorRef, config: FormatConfig) -> Self {
        Self { executor, config }
    }
}

fn parse_status(stdout: &str) -> FormatReport {
    let mut report = FormatReport::default();
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.eq_ignore_ascii_case("finished") || line.eq_ignore_ascii_case("done") {
            report.finished = true;
        } else if report.progress.is_none() && line.contains('/') {
            report.progress = Some(line.to_string());
        }
    }
    report
}

#[async_trait]
impl FormatSubsystem for RemoteFormatter {
    async fn start(&self, request: &FormatRequest) -> Result<()> {
        let command = FormatConfig::render(
            &self.config.start_command,
            &shell_quote(&request.device),
            &shell_quote(&request.mount_point),
            request.percent,
        );
        self.executor
            .run(&request.host, &command)
            .await?
            .into_stdout(&request.host, &command)?;
        info!(
            "Formatting {}:{} to {}% at {}",
            request.host, request.device, request.percent, request.mount_point
        );
        Ok(())
    }

    async fn status(&self, host: &str, device: &str) -> Result<Option<FormatReport>> {
        let command = FormatConfig::render(&self.config.status_command, &shell_quote(device), "", 0);
        let output = self.executor.run(host, &command).await?;
        if !output.success() {
            debug!("No format job known for {}:{}: {}", host, device, output.stderr.trim());
            return Ok(None);
        }
        Ok(Some(parse_status(&output.stdout)))
    }
}
