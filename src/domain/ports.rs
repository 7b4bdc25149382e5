//! Domain Ports - Core trait definitions for the disk replacement workflow
//!
//! These traits define the boundaries between the replacement logic and the
//! systems it drives: remote hosts, chunkserver containers, the chunkfile
//! formatter and durable state. Adapters implement these traits to provide
//! concrete functionality; tests substitute scripted fakes.

use crate::error::{Error, Result};
use crate::records::{DiskFilter, DiskRecord, Replacement, ReplacementFilter};
use crate::storage::TopologyLock;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Remote Execution
// =============================================================================

/// Output of a command that ran on a remote host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stdout, or a [`Error::RemoteCommand`] if the command failed
    pub fn into_stdout(self, host: &str, command: &str) -> Result<String> {
        if !self.success() {
            return Err(Error::RemoteCommand {
                host: host.to_string(),
                command: command.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            });
        }
        Ok(self.stdout.trim().to_string())
    }
}

/// Port for running shell commands on cluster hosts
///
/// An `Err` means the command could not be executed at all (host
/// unreachable, transport failure). A command that ran and exited non-zero
/// is an `Ok` with a non-zero [`ExecOutput::exit_code`].
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn run(&self, host: &str, command: &str) -> Result<ExecOutput>;
}

// =============================================================================
// Chunkserver Services
// =============================================================================

/// Result of a health probe against one chunkserver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceHealth {
    Healthy,
    /// The service explicitly reported itself unhealthy
    Unhealthy(String),
}

/// Port for controlling chunkserver processes
#[async_trait]
pub trait ServiceController: Send + Sync {
    /// Probe one chunkserver; `Err` when the probe itself could not run
    async fn probe(&self, host: &str, service_id: &str) -> Result<ServiceHealth>;

    /// Stop a chunkserver
    async fn stop(&self, host: &str, service_id: &str) -> Result<()>;

    /// Start a chunkserver
    async fn start(&self, host: &str, service_id: &str) -> Result<()>;
}

// =============================================================================
// Chunkfile Formatting
// =============================================================================

/// Request to format a device into a chunkfile pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatRequest {
    pub host: String,
    pub device: String,
    pub mount_point: String,
    /// Percentage of the device to fill with chunkfiles
    pub percent: u32,
}

/// Snapshot of a running format job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatReport {
    /// `current/target` formatted units, absent until the job reports
    pub progress: Option<String>,
    /// The job reported completion
    pub finished: bool,
}

/// Port for the asynchronous chunkfile formatter
#[async_trait]
pub trait FormatSubsystem: Send + Sync {
    /// Begin formatting; returns once the job is launched
    async fn start(&self, request: &FormatRequest) -> Result<()>;

    /// Current status of the job for (host, device), `None` if unknown
    async fn status(&self, host: &str, device: &str) -> Result<Option<FormatReport>>;
}

// =============================================================================
// Durable State
// =============================================================================

/// Port for durable state
///
/// Each call is atomic on its own; callers order their writes so an
/// interrupted sequence can be recovered with `stop`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// The committed disks document, empty if none was committed
    async fn disks_document(&self) -> Result<String>;

    /// Overwrite the disks document
    async fn set_disks_document(&self, raw: &str) -> Result<()>;

    async fn get_disks(&self, filter: &DiskFilter) -> Result<Vec<DiskRecord>>;

    /// Insert or replace the record keyed by (host, device)
    async fn upsert_disk(&self, record: DiskRecord) -> Result<()>;

    /// Delete matching records, returning how many were removed
    async fn delete_disks(&self, filter: &DiskFilter) -> Result<usize>;

    async fn get_replacements(&self, filter: &ReplacementFilter) -> Result<Vec<Replacement>>;

    /// Insert or replace the ticket keyed by service id
    async fn upsert_replacement(&self, ticket: Replacement) -> Result<()>;

    /// Delete the ticket of a service, returning whether one existed
    async fn delete_replacement(&self, service_id: &str) -> Result<bool>;

    /// Acquire the exclusive topology lock
    ///
    /// Fails with [`Error::TopologyLocked`] when another holder has it.
    async fn lock(&self, holder: &str) -> Result<TopologyLock>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type RemoteExecutorRef = Arc<dyn RemoteExecutor>;
pub type ServiceControllerRef = Arc<dyn ServiceController>;
pub type FormatSubsystemRef = Arc<dyn FormatSubsystem>;
pub type StorageRef = Arc<dyn Storage>;
