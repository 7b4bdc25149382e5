//! Tool Configuration
//!
//! Settings loaded from an optional YAML file. Every section has defaults so
//! an empty or absent file yields a working configuration.
//!
//! - `state_dir`: where the disks document, records and tickets live
//! - `ssh`: how remote hosts are reached
//! - `service`: container runtime and naming of chunkserver containers
//! - `format`: command templates for the formatter and the UUID rewrite tool
//! - `restart_service`: whether a replaced chunkserver is started again

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

const DEFAULT_SYSTEM_STATE_DIR: &str = "/var/lib/csdr";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    /// Directory of the state file and topology lock
    pub state_dir: PathBuf,
    pub ssh: SshConfig,
    pub service: ServiceConfig,
    pub format: FormatConfig,
    /// Start the chunkserver again once the new disk is committed
    pub restart_service: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            ssh: SshConfig::default(),
            service: ServiceConfig::default(),
            format: FormatConfig::default(),
            restart_service: true,
        }
    }
}

fn default_state_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".csdr"))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SYSTEM_STATE_DIR))
}

/// SSH connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SshConfig {
    /// Remote user, `None` for the ssh default
    pub user: Option<String>,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    /// Extra `-o` options passed verbatim
    pub extra_options: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: None,
            port: 22,
            identity_file: None,
            connect_timeout_secs: 10,
            extra_options: vec!["BatchMode=yes".to_string()],
        }
    }
}

/// Chunkserver container settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Container name template, `{id}` is the chunkserver id
    pub container_name: String,
    /// Container runtime binary on the hosts
    pub runtime: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            container_name: "chunkserver-{id}".to_string(),
            runtime: "docker".to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn container_name(&self, service_id: &str) -> String {
        self.container_name.replace("{id}", service_id)
    }
}

/// Disk formatting settings
///
/// Command templates may use `{device}`, `{mount}` and `{percent}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FormatConfig {
    /// Starts formatting in the background
    pub start_command: String,
    /// Prints `current/target` then, on a second line, `finished` once done.
    /// Exits non-zero when no job is known for the device.
    pub status_command: String,
    /// Tool rewriting a filesystem UUID
    pub uuid_rewrite: String,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            start_command: "curve-format --device {device} --mount {mount} --percent {percent} --daemon"
                .to_string(),
            status_command: "curve-format --device {device} --status".to_string(),
            uuid_rewrite: "tune2fs".to_string(),
        }
    }
}

impl FormatConfig {
    pub fn render(template: &str, device: &str, mount: &str, percent: u32) -> String {
        template
            .replace("{device}", device)
            .replace("{mount}", mount)
            .replace("{percent}", &percent.to_string())
    }
}

impl ToolConfig {
    /// Load from `path`, or defaults when no path is given
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Configuration(format!("cannot read config {:?}: {}", path, e))
        })?;
        let config = Self::from_yaml(&raw)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(raw)
            .map_err(|e| Error::Configuration(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.service.container_name.contains("{id}") {
            return Err(Error::Configuration(
                "service.container_name must contain {id}".to_string(),
            ));
        }
        if !self.format.start_command.contains("{device}") {
            return Err(Error::Configuration(
                "format.start_command must contain {device}".to_string(),
            ));
        }
        Ok(())
    }
}
