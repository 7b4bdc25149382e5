//! Disk Topology Module
//!
//! Parsing, validation, serialization and reconciliation of the declarative
//! disks document.

pub mod document;
pub mod items;
pub mod reconcile;

pub use document::{parse_disks, DiskConfig, Disks, DisksDocument, GlobalConfig};
pub use items::{ConfigItem, ItemKind, ItemValue, Scope};
pub use reconcile::{
    reconcile, reconcile_replacement, NewEntryChange, OldEntryChange, ReconcileOutcome,
    ReconcileRequest,
};
