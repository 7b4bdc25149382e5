//! Chunkserver Disk Replacement
//!
//! Swaps the block device under a chunkserver of a distributed block storage
//! cluster while keeping the cluster's disk bookkeeping consistent.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Replacement Orchestrator                        │
//! │        replace ─── status ─── stop          (one ticket at a time)   │
//! ├──────────────────────┬───────────────────────┬──────────────────────┤
//! │  Validation Pipeline │   Topology Store      │  Replacement Tickets │
//! │  health · size ·     │   parse · validate ·  │  pending → running   │
//! │  in-use · same-disk  │   reconcile           │         → done       │
//! │  · empty · unmount   │                       │                      │
//! ├──────────────────────┴───────────────────────┴──────────────────────┤
//! │                State Store (disks document, disk records,           │
//! │                         tickets, topology lock)                      │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │            Remote Adapters (ssh · lsblk · container · format)        │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`topology`]: Disks document parsing, validation and reconciliation
//! - [`records`]: Disk records and replacement tickets
//! - [`storage`]: Durable state and the topology lock
//! - [`validation`]: Checks a new device must pass
//! - [`replace`]: The replace / status / stop workflow
//! - [`remote`]: SSH, block device, container and formatter adapters
//! - [`commit`]: Installing a new disks document
//! - [`domain`]: Ports between the workflow and the outside world
//! - [`error`]: Error types and handling

pub mod commit;
pub mod config;
pub mod domain;
pub mod error;
pub mod records;
pub mod remote;
pub mod replace;
pub mod report;
pub mod storage;
pub mod topology;
pub mod validation;

// Re-export commonly used types
pub use commit::{commit_disks, CommitSummary};

pub use config::ToolConfig;

pub use domain::ports::{
    ExecOutput, FormatReport, FormatRequest, FormatSubsystem, RemoteExecutor, ServiceController,
    ServiceHealth, Storage,
};

pub use error::{Error, ErrorKind, Result};

pub use records::{
    DiskFilter, DiskRecord, DiskUri, Replacement, ReplacementFilter, ReplacementStatus,
};

pub use replace::{ReplaceOrchestrator, ReplaceRequest, StopOutcome};

pub use storage::{FileStore, MemoryStore, TopologyLock};

pub use topology::{parse_disks, DiskConfig, DisksDocument};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
