//! Error types for the disk replacement tool
//!
//! Provides structured error types for topology parsing, record bookkeeping,
//! validation checks, remote execution and persistence. Every variant carries
//! the identifiers (host, device, service id) an operator needs to act on it.

use thiserror::Error;

/// Unified error type for the tool
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Parse disks failed: {0}")]
    ParseDisks(String),

    #[error("Unsupported disks configure item: {location} = {value}")]
    UnsupportedItem { location: String, value: String },

    #[error("Invalid value for {location}: {reason}")]
    InvalidItem { location: String, reason: String },

    #[error("Missing field: {location} = nil")]
    MissingField { location: String },

    #[error("Format percent out of range: {location} = {value}")]
    FormatPercentOutOfRange { location: String, value: i64 },

    #[error("Conflict fields in disk[{index}]: exclude {exclude:?} and host {only:?}")]
    ConflictingHostFilters {
        index: usize,
        exclude: Vec<String>,
        only: Vec<String>,
    },

    #[error("Duplicate disk device: disk[{index}].device = {device} (already used by disk[{first}])")]
    DuplicateDevice {
        index: usize,
        first: usize,
        device: String,
    },

    #[error("Duplicate disk mount point: disk[{index}].mount = {mount} (already used by disk[{first}])")]
    DuplicateMountPoint {
        index: usize,
        first: usize,
        mount: String,
    },

    #[error("Invalid disk URI for disk[{host}:{device}]: {uri}")]
    InvalidDiskUri {
        host: String,
        device: String,
        uri: String,
    },

    // =========================================================================
    // Precondition Errors
    // =========================================================================
    #[error("No disk records found: replace disk relies on the chunkserver and disk relationship being committed first")]
    EmptyDisks,

    #[error("No hosts declared in the disks document")]
    EmptyHosts,

    #[error("Chunkserver id is required")]
    ChunkserverIdRequired,

    #[error("Disk device path is required")]
    DevicePathRequired,

    #[error("Disk of chunkserver[ID: {service_id}] was not found")]
    ServiceDiskNotFound { service_id: String },

    #[error("Disk replacement for chunkserver[ID: {service_id}] already completed on {host}:{device}")]
    ReplacementCompleted {
        service_id: String,
        host: String,
        device: String,
    },

    #[error("Disks file not found: {path}")]
    DisksFileNotFound { path: String },

    #[error("The {field} of the former disk[{host}:{device}] is unknown: {reason}")]
    OldDiskUnknown {
        host: String,
        device: String,
        field: &'static str,
        reason: String,
    },

    // =========================================================================
    // Concurrency Errors
    // =========================================================================
    #[error("Disk replacement already in progress for chunkserver[ID: {service_id}] on {host}:{device}")]
    ReplacementInProgress {
        service_id: String,
        host: String,
        device: String,
    },

    #[error("Topology lock is held by {holder}")]
    TopologyLocked { holder: String },

    // =========================================================================
    // Validation Policy Rejections
    // =========================================================================
    #[error("Disk[{host}:{device}] size[{new_size}] is smaller than the former disk[{old_device}] size[{old_size}]")]
    DiskTooSmall {
        host: String,
        device: String,
        new_size: u64,
        old_device: String,
        old_size: u64,
    },

    #[error("The disk[{host}:{device}] is being used by chunkserver {service_id}")]
    DiskInUse {
        host: String,
        device: String,
        service_id: String,
    },

    #[error("The disk[{host}:{device}] and the former disk have the same UUID[{uuid}]")]
    SamePhysicalDisk {
        host: String,
        device: String,
        uuid: String,
    },

    #[error("The disk[{host}:{device}] is not empty: has {fs_type} filesystem")]
    DiskNotEmpty {
        host: String,
        device: String,
        fs_type: String,
    },

    #[error("Chunkserver[ID: {service_id}] on {host} is unhealthy: {reason}")]
    ClusterUnhealthy {
        host: String,
        service_id: String,
        reason: String,
    },

    // =========================================================================
    // Remote Execution Errors
    // =========================================================================
    #[error("Remote command failed on {host}: `{command}` exited with {exit_code}: {stderr}")]
    RemoteCommand {
        host: String,
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Remote host {host} unreachable: {reason}")]
    RemoteUnreachable { host: String, reason: String },

    #[error("List block device failed: {0}")]
    ListBlockDevice(String),

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    #[error("State store error: {0}")]
    Store(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Operator Decisions
    // =========================================================================
    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

/// Category of an error, following the failure taxonomy of the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed topology document or tool configuration
    Configuration,
    /// Missing input, unknown service, nothing registered
    Precondition,
    /// Another replacement holds the cluster
    Concurrency,
    /// Candidate device rejected by a validation check
    Policy,
    /// Remote probe or command failed to execute
    Remote,
    /// Durable state could not be read or written
    Persistence,
    /// Operator declined the confirmation prompt
    Cancelled,
}

impl ErrorKind {
    /// Process exit code the CLI reports for this category
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Configuration => 2,
            ErrorKind::Precondition => 3,
            ErrorKind::Concurrency => 4,
            ErrorKind::Policy => 5,
            ErrorKind::Remote => 6,
            ErrorKind::Persistence => 7,
            ErrorKind::Cancelled => 130,
        }
    }
}

impl Error {
    /// Determine which category this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_)
            | Error::ParseDisks(_)
            | Error::UnsupportedItem { .. }
            | Error::InvalidItem { .. }
            | Error::MissingField { .. }
            | Error::FormatPercentOutOfRange { .. }
            | Error::ConflictingHostFilters { .. }
            | Error::DuplicateDevice { .. }
            | Error::DuplicateMountPoint { .. }
            | Error::InvalidDiskUri { .. }
            | Error::Yaml(_) => ErrorKind::Configuration,

            Error::EmptyDisks
            | Error::EmptyHosts
            | Error::ChunkserverIdRequired
            | Error::DevicePathRequired
            | Error::ServiceDiskNotFound { .. }
            | Error::ReplacementCompleted { .. }
            | Error::DisksFileNotFound { .. }
            | Error::OldDiskUnknown { .. } => ErrorKind::Precondition,

            Error::ReplacementInProgress { .. } | Error::TopologyLocked { .. } => {
                ErrorKind::Concurrency
            }

            Error::DiskTooSmall { .. }
            | Error::DiskInUse { .. }
            | Error::SamePhysicalDisk { .. }
            | Error::DiskNotEmpty { .. }
            | Error::ClusterUnhealthy { .. } => ErrorKind::Policy,

            Error::RemoteCommand { .. }
            | Error::RemoteUnreachable { .. }
            | Error::ListBlockDevice(_) => ErrorKind::Remote,

            Error::Store(_) | Error::Json(_) | Error::Io(_) => ErrorKind::Persistence,

            Error::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// A rejection of the candidate device rather than a system fault
    pub fn is_policy_rejection(&self) -> bool {
        self.kind() == ErrorKind::Policy
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }
}

/// Result type alias for the tool
pub type Result<T> = std::result::Result<T, Error>;
