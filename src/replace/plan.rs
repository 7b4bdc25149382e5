//! Replacement Steps
//!
//! A replacement is a fixed sequence of steps. Each step reads and writes
//! only the [`StepContext`] it is handed.

use crate::records::{DiskRecord, DiskUri, Replacement};
use std::fmt;

/// One stage of a replacement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceStep {
    /// Run the validation checks against the candidate
    Validate,
    /// Stop the chunkserver being moved
    StopService,
    /// Launch formatting of the candidate to the old disk's percentage
    Format,
    /// Reconcile the topology and move the disk record
    Commit,
    /// Start the chunkserver again
    StartService,
}

impl ReplaceStep {
    /// Steps of a replacement, in order
    pub fn sequence(restart_service: bool) -> Vec<ReplaceStep> {
        let mut steps = vec![
            ReplaceStep::Validate,
            ReplaceStep::StopService,
            ReplaceStep::Format,
            ReplaceStep::Commit,
        ];
        if restart_service {
            steps.push(ReplaceStep::StartService);
        }
        steps
    }

    /// Whether the step changes anything outside the ticket
    pub fn mutates(&self) -> bool {
        !matches!(self, ReplaceStep::Validate)
    }
}

impl fmt::Display for ReplaceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplaceStep::Validate => write!(f, "validate new disk"),
            ReplaceStep::StopService => write!(f, "stop chunkserver"),
            ReplaceStep::Format => write!(f, "format new disk"),
            ReplaceStep::Commit => write!(f, "commit disk change"),
            ReplaceStep::StartService => write!(f, "start chunkserver"),
        }
    }
}

/// State threaded through the steps of one replacement
#[derive(Debug, Clone)]
pub struct StepContext {
    pub ticket: Replacement,
    /// Disk records on the ticket's host when the replacement began
    pub host_records: Vec<DiskRecord>,
    /// Candidate size, learned during validation
    pub new_size: Option<u64>,
    /// Candidate filesystem UUID, learned after formatting started
    pub new_uuid: Option<String>,
}

impl StepContext {
    pub fn new(ticket: Replacement, host_records: Vec<DiskRecord>) -> Self {
        Self {
            ticket,
            host_records,
            new_size: None,
            new_uuid: None,
        }
    }

    /// Record of the replacement disk as it will be committed
    pub fn new_record(&self) -> DiskRecord {
        DiskRecord {
            device: self.ticket.new_device.clone(),
            uri: self.new_uuid.as_ref().map(|uuid| DiskUri::fs_uuid(uuid.clone())),
            size: self.new_size,
            ..self.ticket.previous.clone()
        }
    }
}
