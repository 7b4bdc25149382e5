//! State Storage Backends
//!
//! Durable home of the disks document, disk records and replacement
//! tickets, plus the exclusive lock serializing topology mutations.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::records::{DiskFilter, DiskRecord, Replacement, ReplacementFilter};
use nix::fcntl::Flock;
use parking_lot::Mutex;
use std::fs::File;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

// =============================================================================
// Topology Lock
// =============================================================================

enum LockRelease {
    Slot(Arc<Mutex<Option<String>>>),
    File(PathBuf, Flock<File>),
}

/// Exclusive right to read-modify-write the topology
///
/// Held from before a replacement's validation until its last write;
/// released when dropped.
pub struct TopologyLock {
    holder: String,
    release: Option<LockRelease>,
}

impl TopologyLock {
    fn slot(holder: String, slot: Arc<Mutex<Option<String>>>) -> Self {
        Self {
            holder,
            release: Some(LockRelease::Slot(slot)),
        }
    }

    fn file(holder: String, path: PathBuf, flock: Flock<File>) -> Self {
        Self {
            holder,
            release: Some(LockRelease::File(path, flock)),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }
}

impl std::fmt::Debug for TopologyLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyLock")
            .field("holder", &self.holder)
            .finish()
    }
}

impl Drop for TopologyLock {
    fn drop(&mut self) {
        match self.release.take() {
            Some(LockRelease::Slot(slot)) => {
                *slot.lock() = None;
            }
            Some(LockRelease::File(path, flock)) => {
                // the flock itself is released when `flock` drops
                if let Err(e) = flock.set_len(0) {
                    warn!("Failed to clear topology lock {:?}: {}", path, e);
                }
            }
            None => {}
        }
        debug!("Topology lock released by {}", self.holder);
    }
}

// =============================================================================
// Stored State
// =============================================================================

/// Everything the tool persists
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StoreState {
    #[serde(default)]
    pub disks_document: String,
    #[serde(default)]
    pub disks: Vec<DiskRecord>,
    #[serde(default)]
    pub replacements: Vec<Replacement>,
}

impl StoreState {
    pub fn get_disks(&self, filter: &DiskFilter) -> Vec<DiskRecord> {
        self.disks
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }

    pub fn upsert_disk(&mut self, record: DiskRecord) {
        match self
            .disks
            .iter_mut()
            .find(|r| r.host == record.host && r.device == record.device)
        {
            Some(existing) => *existing = record,
            None => self.disks.push(record),
        }
    }

    pub fn delete_disks(&mut self, filter: &DiskFilter) -> usize {
        let before = self.disks.len();
        self.disks.retain(|r| !filter.matches(r));
        before - self.disks.len()
    }

    pub fn get_replacements(&self, filter: &ReplacementFilter) -> Vec<Replacement> {
        self.replacements
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect()
    }

    pub fn upsert_replacement(&mut self, ticket: Replacement) {
        match self
            .replacements
            .iter_mut()
            .find(|t| t.service_id == ticket.service_id)
        {
            Some(existing) => *existing = ticket,
            None => self.replacements.push(ticket),
        }
    }

    pub fn delete_replacement(&mut self, service_id: &str) -> bool {
        let before = self.replacements.len();
        self.replacements.retain(|t| t.service_id != service_id);
        before != self.replacements.len()
    }
}
