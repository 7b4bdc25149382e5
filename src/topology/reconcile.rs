//! Topology Reconciliation
//!
//! Patches the disks document so a host stops provisioning the device being
//! replaced and starts provisioning its replacement. Host filters are edited
//! incrementally so other hosts keep exactly the disks they had.

use crate::domain::ports::Storage;
use crate::error::Result;
use crate::records::{DiskFilter, DiskRecord};
use crate::topology::document::{list, set_list, DisksDocument};
use crate::topology::items::{KEY_DEVICE, KEY_EXCLUDE, KEY_HOST, KEY_MOUNT};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

// =============================================================================
// Request / Outcome
// =============================================================================

/// Inputs of one reconciliation
#[derive(Debug, Clone)]
pub struct ReconcileRequest<'a> {
    /// Host whose disks change
    pub host: &'a str,
    /// Device the host provisions from now on
    pub new_device: &'a str,
    /// Record of the device the host gives up
    pub old: &'a DiskRecord,
    /// A disk record for (host, new_device) already exists
    pub new_record_exists: bool,
    /// Withdraw the host from the old device's entry
    pub withdraw_old: bool,
}

/// How the old device's entry was patched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OldEntryChange {
    /// No entry for the old device, or not withdrawn
    None,
    /// Host added to the entry's exclusion list
    Excluded,
    /// Host removed from the entry's hosts-only list
    RemovedFromOnly,
    /// Host was the last in the hosts-only list; entry removed
    Dropped,
}

/// How the new device's entry was patched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewEntryChange {
    /// A record for the new device already exists; nothing to change
    AlreadyTracked,
    /// Host removed from the entry's exclusion list
    Unexcluded,
    /// Host added to the entry's hosts-only list
    AddedToOnly,
    /// Host added and the hosts-only list now covers every host
    Collapsed,
    /// The entry already applies to the host
    Unchanged,
    /// No entry existed; one restricted to the host was appended
    Appended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub old_entry: OldEntryChange,
    pub new_entry: NewEntryChange,
}

// =============================================================================
// Reconciliation
// =============================================================================

/// Patch `doc` in memory
///
/// Replacing a device with itself (same path, new hardware) leaves the
/// document untouched.
pub fn reconcile(doc: &mut DisksDocument, req: &ReconcileRequest<'_>) -> ReconcileOutcome {
    if req.new_device == req.old.device {
        return ReconcileOutcome {
            old_entry: OldEntryChange::None,
            new_entry: NewEntryChange::Unchanged,
        };
    }

    let all_hosts = doc.global_hosts();

    let old_entry = match doc.position_of(&req.old.device) {
        Some(i) if req.withdraw_old => withdraw_host(doc, i, req.host),
        _ => OldEntryChange::None,
    };

    let new_entry = if req.new_record_exists {
        NewEntryChange::AlreadyTracked
    } else {
        match doc.position_of(req.new_device) {
            Some(i) => include_host(&mut doc.disks[i], req.host, &all_hosts),
            None => {
                let mut entry = Mapping::new();
                entry.insert(Value::from(KEY_DEVICE), Value::from(req.new_device));
                entry.insert(
                    Value::from(KEY_MOUNT),
                    Value::from(req.old.mount_point.as_str()),
                );
                set_list(&mut entry, KEY_HOST, vec![req.host.to_string()]);
                doc.disks.push(entry);
                NewEntryChange::Appended
            }
        }
    };

    debug!(
        "Reconciled {}: {} -> {} (old entry {:?}, new entry {:?})",
        req.host, req.old.device, req.new_device, old_entry, new_entry
    );
    ReconcileOutcome {
        old_entry,
        new_entry,
    }
}

fn withdraw_host(doc: &mut DisksDocument, index: usize, host: &str) -> OldEntryChange {
    let entry = &mut doc.disks[index];

    let mut only = list(entry, KEY_HOST);
    if !only.is_empty() {
        if !only.iter().any(|h| h == host) {
            return OldEntryChange::None;
        }
        only.retain(|h| h != host);
        if only.is_empty() {
            doc.disks.remove(index);
            return OldEntryChange::Dropped;
        }
        set_list(entry, KEY_HOST, only);
        return OldEntryChange::RemovedFromOnly;
    }

    let mut exclude = list(entry, KEY_EXCLUDE);
    if !exclude.iter().any(|h| h == host) {
        exclude.push(host.to_string());
        set_list(entry, KEY_EXCLUDE, exclude);
    }
    OldEntryChange::Excluded
}

fn include_host(entry: &mut Mapping, host: &str, all_hosts: &[String]) -> NewEntryChange {
    let mut exclude = list(entry, KEY_EXCLUDE);
    if exclude.iter().any(|h| h == host) {
        exclude.retain(|h| h != host);
        set_list(entry, KEY_EXCLUDE, exclude);
        return NewEntryChange::Unexcluded;
    }

    let mut only = list(entry, KEY_HOST);
    if only.is_empty() {
        return NewEntryChange::Unchanged;
    }
    if only.iter().any(|h| h == host) {
        return NewEntryChange::Unchanged;
    }
    only.push(host.to_string());

    let covers_all = !all_hosts.is_empty() && all_hosts.iter().all(|h| only.contains(h));
    if covers_all {
        set_list(entry, KEY_HOST, Vec::new());
        NewEntryChange::Collapsed
    } else {
        set_list(entry, KEY_HOST, only);
        NewEntryChange::AddedToOnly
    }
}

/// Reconcile the committed document for a device swap on `host`
///
/// Deletes the old disk record, validates the patched document and persists
/// it. Returns the new document text.
pub async fn reconcile_replacement(
    store: &dyn Storage,
    host: &str,
    new_device: &str,
    old: &DiskRecord,
) -> Result<String> {
    let raw = store.disks_document().await?;
    let mut doc = DisksDocument::parse(&raw)?;

    let new_record_exists = !store
        .get_disks(&DiskFilter::device(host, new_device))
        .await?
        .is_empty();

    let outcome = reconcile(
        &mut doc,
        &ReconcileRequest {
            host,
            new_device,
            old,
            new_record_exists,
            withdraw_old: true,
        },
    );
    doc.build()?;

    store
        .delete_disks(&DiskFilter::device(host, &old.device))
        .await?;

    let new_raw = doc.to_yaml()?;
    store.set_disks_document(&new_raw).await?;

    info!(
        "Disks document updated for {}: {} -> {} ({:?})",
        host, old.device, new_device, outcome
    );
    Ok(new_raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::topology::document::parse_disks;

    const DOC: &str = r#"
global:
  host: [h1, h2, h3]
disk:
  - device: /dev/sdb
    mount: /data/chunkserver0
  - device: /dev/sdc
    mount: /data/chunkserver1
    host: [h2]
  - device: /dev/sdd
    mount: /data/chunkserver2
    exclude: [h1]
"#;

    fn old_record(device: &str, mount: &str) -> DiskRecord {
        let mut r = DiskRecord::new("h1", device, mount, "img", 90);
        r.service_id = Some("cs-1".into());
        r
    }

    fn run(doc: &mut DisksDocument, new_device: &str, old: &DiskRecord, exists: bool) -> ReconcileOutcome {
        reconcile(
            doc,
            &ReconcileRequest {
                host: "h1",
                new_device,
                old,
                new_record_exists: exists,
                withdraw_old: true,
            },
        )
    }

    #[test]
    fn test_append_entry_for_unknown_device() {
        let mut doc = DisksDocument::parse(DOC).unwrap();
        let old = old_record("/dev/sdb", "/data/chunkserver0");

        let outcome = run(&mut doc, "/dev/sde", &old, false);
        assert_eq!(outcome.old_entry, OldEntryChange::Excluded);
        assert_eq!(outcome.new_entry, NewEntryChange::Appended);

        let disks = doc.build().unwrap().disks;
        assert_eq!(disks[0].hosts_exclude, vec!["h1"]);
        let new = disks.iter().find(|d| d.device == "/dev/sde").unwrap();
        assert_eq!(new.mount_point, "/data/chunkserver0");
        assert_eq!(new.hosts_only, vec!["h1"]);
        assert!(!disks[0].applies_to("h1"));
        assert!(disks[0].applies_to("h2"));
    }

    #[test]
    fn test_include_via_hosts_only() {
        let mut doc = DisksDocument::parse(DOC).unwrap();
        let old = old_record("/dev/sdb", "/data/chunkserver0");

        let outcome = run(&mut doc, "/dev/sdc", &old, false);
        assert_eq!(outcome.new_entry, NewEntryChange::AddedToOnly);
        let disks = doc.build().unwrap().disks;
        assert_eq!(disks[1].hosts_only, vec!["h2", "h1"]);
    }

    #[test]
    fn test_include_removes_exclusion() {
        let mut doc = DisksDocument::parse(DOC).unwrap();
        let old = old_record("/dev/sdb", "/data/chunkserver0");

        let outcome = run(&mut doc, "/dev/sdd", &old, false);
        assert_eq!(outcome.new_entry, NewEntryChange::Unexcluded);
        let disks = doc.build().unwrap().disks;
        assert!(disks[2].hosts_exclude.is_empty());
        assert!(disks[2].hosts_only.is_empty());
    }

    #[test]
    fn test_hosts_only_collapses_when_covering_all_hosts() {
        let raw = r#"
global:
  host: [h1, h2]
disk:
  - device: /dev/sdb
    mount: /m0
  - device: /dev/sdc
    mount: /m1
    host: [h2]
"#;
        let mut doc = DisksDocument::parse(raw).unwrap();
        let old = old_record("/dev/sdb", "/m0");
        let outcome = run(&mut doc, "/dev/sdc", &old, false);
        assert_eq!(outcome.new_entry, NewEntryChange::Collapsed);
        assert!(doc.disks[1].get(KEY_HOST).is_none());
        assert!(doc.build().unwrap().disks[1].applies_to("h1"));
    }

    #[test]
    fn test_already_tracked_leaves_new_entry() {
        let mut doc = DisksDocument::parse(DOC).unwrap();
        let before = doc.disks[1].clone();
        let old = old_record("/dev/sdb", "/data/chunkserver0");

        let outcome = run(&mut doc, "/dev/sdc", &old, true);
        assert_eq!(outcome.new_entry, NewEntryChange::AlreadyTracked);
        assert_eq!(doc.disks[1], before);
        assert_eq!(outcome.old_entry, OldEntryChange::Excluded);
    }

    #[test]
    fn test_withdraw_from_hosts_only_never_creates_conflict() {
        let raw = r#"
global:
  host: [h1, h2]
disk:
  - device: /dev/sdb
    mount: /m0
    host: [h1, h2]
  - device: /dev/sdc
    mount: /m1
    host: [h1]
"#;
        let mut doc = DisksDocument::parse(raw).unwrap();
        let old = old_record("/dev/sdb", "/m0");
        let outcome = run(&mut doc, "/dev/sdd", &old, false);
        assert_eq!(outcome.old_entry, OldEntryChange::RemovedFromOnly);
        let disks = doc.build().unwrap().disks;
        assert_eq!(disks[0].hosts_only, vec!["h2"]);
        assert!(disks[0].hosts_exclude.is_empty());

        let old = old_record("/dev/sdc", "/m1");
        let outcome = run(&mut doc, "/dev/sde", &old, false);
        assert_eq!(outcome.old_entry, OldEntryChange::Dropped);
        assert!(doc.position_of("/dev/sdc").is_none());
        assert!(doc.build().is_ok());
    }

    #[test]
    fn test_same_device_is_noop() {
        let mut doc = DisksDocument::parse(DOC).unwrap();
        let before = doc.clone();
        let old = old_record("/dev/sdb", "/data/chunkserver0");
        run(&mut doc, "/dev/sdb", &old, true);
        assert_eq!(doc, before);
    }

    #[test]
    fn test_reverse_restores_visibility() {
        let mut doc = DisksDocument::parse(DOC).unwrap();
        let old = old_record("/dev/sdb", "/data/chunkserver0");
        run(&mut doc, "/dev/sde", &old, false);

        let current = old_record("/dev/sde", "/data/chunkserver0");
        run(&mut doc, "/dev/sdb", &current, false);

        let disks = doc.build().unwrap().disks;
        let sdb = disks.iter().find(|d| d.device == "/dev/sdb").unwrap();
        assert!(sdb.applies_to("h1"));
        assert!(disks.iter().all(|d| d.device != "/dev/sde"));
    }

    #[tokio::test]
    async fn test_reconcile_replacement_persists() {
        let store = MemoryStore::new();
        store.set_disks_document(DOC).await.unwrap();
        let old = old_record("/dev/sdb", "/data/chunkserver0");
        store.upsert_disk(old.clone()).await.unwrap();

        let raw = reconcile_replacement(&store, "h1", "/dev/sde", &old).await.unwrap();

        assert_eq!(store.disks_document().await.unwrap(), raw);
        assert!(store
            .get_disks(&DiskFilter::device("h1", "/dev/sdb"))
            .await
            .unwrap()
            .is_empty());
        let disks = parse_disks(&raw).unwrap();
        assert!(disks.iter().any(|d| d.device == "/dev/sde" && d.hosts_only == vec!["h1"]));
    }
}
