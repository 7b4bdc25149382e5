//! Disks Commit
//!
//! Installs a new disks document and expands it into one disk record per
//! (host, disk) pair it provisions. Records the document no longer produces
//! are dropped unless a chunkserver still owns them.

use crate::domain::ports::Storage;
use crate::error::{Error, Result};
use crate::records::{DiskFilter, DiskRecord, ReplacementFilter};
use crate::topology::{Disks, DisksDocument};
use indexmap::IndexMap;
use tracing::{info, warn};

/// What a commit changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// Obsolete records kept because a chunkserver owns them
    pub kept_owned: Vec<DiskRecord>,
}

/// Records a validated document produces, keyed by (host, device)
fn expand(disks: &Disks) -> IndexMap<(String, String), DiskRecord> {
    let mut records = IndexMap::new();
    for host in &disks.global.hosts {
        for dc in disks.disks.iter().filter(|dc| dc.applies_to(host)) {
            let mut record = DiskRecord::new(
                host.as_str(),
                dc.device.as_str(),
                dc.mount_point.as_str(),
                dc.container_image.as_str(),
                dc.format_percent,
            );
            record.service_mount_device = disks.global.service_mount_device;
            records.insert((host.clone(), dc.device.clone()), record);
        }
    }
    records
}

/// Validate `raw`, persist it, and sync the disk records with it
pub async fn commit_disks(store: &dyn Storage, raw: &str) -> Result<CommitSummary> {
    let disks = DisksDocument::parse(raw)?.build()?;
    if disks.global.hosts.is_empty() {
        return Err(Error::EmptyHosts);
    }

    let _lock = store.lock("disks commit").await?;
    if let Some(active) = store
        .get_replacements(&ReplacementFilter::InFlight)
        .await?
        .into_iter()
        .next()
    {
        return Err(Error::ReplacementInProgress {
            service_id: active.service_id,
            host: active.host,
            device: active.new_device,
        });
    }

    let mut records = expand(&disks);
    let mut summary = CommitSummary::default();
    let mut matched = 0;

    for existing in store.get_disks(&DiskFilter::All).await? {
        let key = (existing.host.clone(), existing.device.clone());
        match records.get_mut(&key) {
            Some(record) => {
                matched += 1;
                record.service_id = existing.service_id.clone();
                record.uri = existing.uri.clone();
                record.size = existing.size;
                if *record != existing {
                    summary.updated += 1;
                }
            }
            None if existing.is_owned() => {
                warn!(
                    "Disk {}:{} is no longer declared but still owned by chunkserver {}",
                    existing.host,
                    existing.device,
                    existing.service_id.as_deref().unwrap_or_default()
                );
                summary.kept_owned.push(existing);
            }
            None => {
                store
                    .delete_disks(&DiskFilter::device(&existing.host, &existing.device))
                    .await?;
                summary.removed += 1;
            }
        }
    }
    summary.added = records.len() - matched;

    for (_, record) in records {
        store.upsert_disk(record).await?;
    }
    store.set_disks_document(raw).await?;

    info!(
        "Committed disks: {} added, {} updated, {} removed",
        summary.added, summary.updated, summary.removed
    );
    Ok(summary)
}
