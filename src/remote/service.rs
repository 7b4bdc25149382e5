//! Chunkserver Container Control
//!
//! Chunkservers run as containers named after their service id. Health is
//! read from the container state and, when the image defines one, its
//! health check.

use super::shell_quote;
use crate::config::ServiceConfig;
use crate::domain::ports::{RemoteExecutorRef, ServiceController, ServiceHealth};
use crate::error::Result;
use async_trait::async_trait;
use tracing::info;

const INSPECT_FORMAT: &str = "{{.State.Status}} {{if .State.Health}}{{.State.Health.Status}}{{end}}";

/// [`ServiceController`] driving a container runtime over a remote executor
pub struct ContainerServiceController {
    executor: RemoteExecutorRef,
    config: ServiceConfig,
}

impl ContainerServiceController {
    pub fn new(executor: RemoteExecutorRef, config: ServiceConfig) -> Self {
        Self { executor, config }
    }

    async fn container_command(&self, host: &str, action: &str, service_id: &str) -> Result<()> {
        let command = format!(
            "{} {} {}",
            self.config.runtime,
            action,
            shell_quote(&self.config.container_name(service_id))
        );
        self.executor
            .run(host, &command)
            .await?
            .into_stdout(host, &command)?;
        Ok(())
    }
}

/// Interpret `<state> [<health>]` as printed by the inspect template
fn parse_inspect(output: &str) -> ServiceHealth {
    let mut fields = output.split_whitespace();
    let state = fields.next().unwrap_or("");
    let health = fields.next();

    if state.is_empty() {
        return ServiceHealth::Unhealthy("container state unknown".to_string());
    }
    if state != "running" {
        return ServiceHealth::Unhealthy(format!("container is {}", state));
    }
    match health {
        None | Some("healthy") => ServiceHealth::Healthy,
        Some(other) => ServiceHealth::Unhealthy(format!("health check reports {}", other)),
    }
}

#[async_trait]
impl ServiceController for ContainerServiceController {
    async fn probe(&self, host: &str, service_id: &str) -> Result<ServiceHealth> {
        let command = format!(
            "{} inspect -f {} {}",
            self.config.runtime,
            shell_quote(INSPECT_FORMAT),
            shell_quote(&self.config.container_name(service_id))
        );
        let output = self.executor.run(host, &command).await?;
        if !output.success() {
            return Ok(ServiceHealth::Unhealthy(format!(
                "inspect failed: {}",
                output.stderr.trim()
            )));
        }
        Ok(parse_inspect(&output.stdout))
    }

    async fn stop(&self, host: &str, service_id: &str) -> Result<()> {
        self.container_command(host, "stop", service_id).await?;
        info!("Stopped chunkserver {} on {}", service_id, host);
        Ok(())
    }

    async fn start(&self, host: &str, service_id: &str) -> Result<()> {
        self.container_command(host, "start", service_id).await?;
        info!("Started chunkserver {} on {}", service_id, host);
        Ok(())
    }
}
