//! Disks Document
//!
//! The declarative disk topology: a `global` block of defaults and an ordered
//! `disk` list of per-device entries, each optionally restricted to some
//! hosts (`host`) or excluding some hosts (`exclude`).
//!
//! ```yaml
//! global:
//!   format_percent: 90
//!   container_image: opencurvedocker/curvebs:v1.2
//!   host: [curve-1, curve-2, curve-3]
//! disk:
//!   - device: /dev/sdb
//!     mount: /data/chunkserver0
//!   - device: /dev/sdc
//!     mount: /data/chunkserver1
//!     exclude: [curve-3]
//! ```
//!
//! [`DisksDocument`] keeps exactly what the operator wrote so it can be
//! patched and re-serialized without materializing defaults; [`Disks`] is
//! the validated, typed view.

use crate::error::{Error, Result};
use crate::topology::items::{
    self, ItemValue, KEY_CONTAINER_IMAGE, KEY_DEVICE, KEY_EXCLUDE, KEY_FORMAT_PERCENT, KEY_HOST,
    KEY_MOUNT, KEY_SERVICE_MOUNT_DEVICE,
};
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

const SECTION_GLOBAL: &str = "global";
const SECTION_DISK: &str = "disk";

// =============================================================================
// Typed Configuration
// =============================================================================

/// Validated global block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalConfig {
    /// Every host the document provisions
    pub hosts: Vec<String>,
    pub container_image: String,
    pub format_percent: u32,
    pub service_mount_device: bool,
}

/// Validated disk entry with global defaults applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskConfig {
    /// Position in the document
    pub index: usize,
    pub device: String,
    pub mount_point: String,
    pub format_percent: u32,
    pub container_image: String,
    /// Only these hosts provision the disk, empty for no restriction
    pub hosts_only: Vec<String>,
    /// These hosts do not provision the disk
    pub hosts_exclude: Vec<String>,
}

impl DiskConfig {
    /// Whether `host` provisions this disk
    pub fn applies_to(&self, host: &str) -> bool {
        if !self.hosts_only.is_empty() {
            return self.hosts_only.iter().any(|h| h == host);
        }
        !self.hosts_exclude.iter().any(|h| h == host)
    }

    /// The hosts of `all_hosts` that provision this disk
    pub fn hosts<'a>(&self, all_hosts: &'a [String]) -> Vec<&'a str> {
        all_hosts
            .iter()
            .filter(|h| self.applies_to(h))
            .map(String::as_str)
            .collect()
    }

    /// Whether some host would provision both entries
    ///
    /// With no global host list the host universe is open, so two entries
    /// without a hosts-only list always overlap.
    fn overlaps(&self, other: &DiskConfig, all_hosts: &[String]) -> bool {
        let resolve = |dc: &DiskConfig| -> Option<Vec<String>> {
            if !dc.hosts_only.is_empty() {
                Some(dc.hosts_only.clone())
            } else if !all_hosts.is_empty() {
                Some(dc.hosts(all_hosts).into_iter().map(str::to_string).collect())
            } else {
                None
            }
        };

        match (resolve(self), resolve(other)) {
            (Some(a), Some(b)) => a.iter().any(|h| b.contains(h)),
            (Some(a), None) => a.iter().any(|h| other.applies_to(h)),
            (None, Some(b)) => b.iter().any(|h| self.applies_to(h)),
            (None, None) => true,
        }
    }
}

/// Validated document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disks {
    pub global: GlobalConfig,
    pub disks: Vec<DiskConfig>,
}

// =============================================================================
// Raw Document
// =============================================================================

/// Disks document as written, keys in their original order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisksDocument {
    pub global: Mapping,
    pub disks: Vec<Mapping>,
}

impl DisksDocument {
    /// Read the YAML structure without validating items
    pub fn parse(raw: &str) -> Result<Self> {
        let root: Value =
            serde_yaml::from_str(raw).map_err(|e| Error::ParseDisks(e.to_string()))?;

        let root = match root {
            Value::Null => return Ok(Self::default()),
            Value::Mapping(m) => m,
            _ => return Err(Error::ParseDisks("document must be a mapping".into())),
        };

        let mut doc = Self::default();
        for (key, value) in root {
            let key = key_str(&key, "document")?;
            match (key.as_str(), value) {
                (SECTION_GLOBAL, Value::Mapping(m)) => doc.global = m,
                (SECTION_GLOBAL, Value::Null) => {}
                (SECTION_DISK, Value::Sequence(seq)) => {
                    for (i, entry) in seq.into_iter().enumerate() {
                        match entry {
                            Value::Mapping(m) => doc.disks.push(m),
                            Value::Null => doc.disks.push(Mapping::new()),
                            _ => {
                                return Err(Error::ParseDisks(format!(
                                    "disk[{}] must be a mapping",
                                    i
                                )))
                            }
                        }
                    }
                }
                (SECTION_DISK, Value::Null) => {}
                (SECTION_GLOBAL, _) | (SECTION_DISK, _) => {
                    return Err(Error::ParseDisks(format!("invalid `{}` section", key)));
                }
                (other, value) => {
                    return Err(Error::UnsupportedItem {
                        location: other.to_string(),
                        value: render(&value),
                    });
                }
            }
        }
        Ok(doc)
    }

    /// Serialize back to YAML
    pub fn to_yaml(&self) -> Result<String> {
        let mut root = Mapping::new();
        if !self.global.is_empty() {
            root.insert(
                Value::from(SECTION_GLOBAL),
                Value::Mapping(self.global.clone()),
            );
        }
        root.insert(
            Value::from(SECTION_DISK),
            Value::Sequence(self.disks.iter().cloned().map(Value::Mapping).collect()),
        );
        Ok(serde_yaml::to_string(&Value::Mapping(root))?)
    }

    /// Validate every item and build the typed view
    ///
    /// Fails on the first violation, naming the entry index and key.
    pub fn build(&self) -> Result<Disks> {
        let global_values = check_section(&self.global, "global", true)?;
        let global = build_global(&global_values)?;

        let mut disks: Vec<DiskConfig> = Vec::with_capacity(self.disks.len());
        let mut devices: HashMap<String, usize> = HashMap::new();

        for (index, entry) in self.disks.iter().enumerate() {
            let location = format!("disk[{}]", index);
            let mut values = check_section(entry, &location, false)?;

            // merge global defaults into keys the entry leaves unset
            for item in items::ITEMS.iter().filter(|i| i.inherited && i.scope.allows_disk()) {
                if values.contains_key(item.key) {
                    continue;
                }
                if let Some(v) = global_values.get(item.key) {
                    values.insert(item.key, v.clone());
                }
            }

            let dc = build_disk(index, &values)?;

            if let Some(&first) = devices.get(&dc.device) {
                return Err(Error::DuplicateDevice {
                    index,
                    first,
                    device: dc.device,
                });
            }
            if let Some(first) = disks
                .iter()
                .position(|other| other.mount_point == dc.mount_point && other.overlaps(&dc, &global.hosts))
            {
                return Err(Error::DuplicateMountPoint {
                    index,
                    first,
                    mount: dc.mount_point,
                });
            }
            devices.insert(dc.device.clone(), index);
            disks.push(dc);
        }

        debug!("Parsed disks document: {} entries, {} hosts", disks.len(), global.hosts.len());
        Ok(Disks { global, disks })
    }

    /// Global host list as written
    pub fn global_hosts(&self) -> Vec<String> {
        list(&self.global, KEY_HOST)
    }

    /// Index of the entry for a device
    pub fn position_of(&self, device: &str) -> Option<usize> {
        self.disks
            .iter()
            .position(|entry| entry.get(KEY_DEVICE).and_then(Value::as_str) == Some(device))
    }
}

/// Parse and validate a disks document
pub fn parse_disks(raw: &str) -> Result<Vec<DiskConfig>> {
    Ok(DisksDocument::parse(raw)?.build()?.disks)
}

// =============================================================================
// Helpers
// =============================================================================

/// String list stored under `key`, empty when absent
pub(crate) fn list(entry: &Mapping, key: &str) -> Vec<String> {
    match entry.get(key) {
        Some(Value::Sequence(seq)) => seq
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Store a string list under `key`, removing the key when the list is empty
pub(crate) fn set_list(entry: &mut Mapping, key: &str, values: Vec<String>) {
    if values.is_empty() {
        entry.remove(key);
    } else {
        entry.insert(
            Value::from(key),
            Value::Sequence(values.into_iter().map(Value::String).collect()),
        );
    }
}

fn key_str(key: &Value, location: &str) -> Result<String> {
    key.as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::ParseDisks(format!("non-string key in {}", location)))
}

fn render(value: &Value) -> String {
    serde_yaml::to_string(value)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| format!("{:?}", value))
}

fn check_section(
    section: &Mapping,
    location: &str,
    global: bool,
) -> Result<BTreeMap<&'static str, ItemValue>> {
    let mut values = BTreeMap::new();
    for (key, value) in section {
        let key = key_str(key, location)?;
        let item_location = format!("{}.{}", location, key);
        let item = items::lookup(&key)
            .filter(|item| {
                if global {
                    item.scope.allows_global()
                } else {
                    item.scope.allows_disk()
                }
            })
            .ok_or_else(|| Error::UnsupportedItem {
                location: item_location.clone(),
                value: render(value),
            })?;
        values.insert(item.key, item.check(&item_location, value)?);
    }
    Ok(values)
}

fn value_or_default(values: &BTreeMap<&'static str, ItemValue>, key: &str) -> Option<ItemValue> {
    values
        .get(key)
        .cloned()
        .or_else(|| items::lookup(key).and_then(|item| item.default_value()))
}

fn format_percent(values: &BTreeMap<&'static str, ItemValue>, location: &str) -> Result<u32> {
    let percent = value_or_default(values, KEY_FORMAT_PERCENT)
        .and_then(|v| v.as_int())
        .unwrap_or(items::DEFAULT_FORMAT_PERCENT);
    if percent <= 0 || percent > 100 {
        return Err(Error::FormatPercentOutOfRange {
            location: format!("{}.{}", location, KEY_FORMAT_PERCENT),
            value: percent,
        });
    }
    Ok(percent as u32)
}

fn build_global(values: &BTreeMap<&'static str, ItemValue>) -> Result<GlobalConfig> {
    Ok(GlobalConfig {
        hosts: values
            .get(KEY_HOST)
            .and_then(|v| v.as_list())
            .map(<[String]>::to_vec)
            .unwrap_or_default(),
        container_image: value_or_default(values, KEY_CONTAINER_IMAGE)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default(),
        format_percent: format_percent(values, "global")?,
        service_mount_device: value_or_default(values, KEY_SERVICE_MOUNT_DEVICE)
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    })
}

fn build_disk(index: usize, values: &BTreeMap<&'static str, ItemValue>) -> Result<DiskConfig> {
    let location = format!("disk[{}]", index);
    let required = |key: &str| -> Result<String> {
        values
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::MissingField {
                location: format!("{}.{}", location, key),
            })
    };
    let filter = |key: &str| -> Vec<String> {
        values
            .get(key)
            .and_then(|v| v.as_list())
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    };

    let device = required(KEY_DEVICE)?;
    let mount_point = required(KEY_MOUNT)?;
    let format_percent = format_percent(values, &location)?;
    let hosts_only = filter(KEY_HOST);
    let hosts_exclude = filter(KEY_EXCLUDE);

    if !hosts_only.is_empty() && !hosts_exclude.is_empty() {
        return Err(Error::ConflictingHostFilters {
            index,
            exclude: hosts_exclude,
            only: hosts_only,
        });
    }

    Ok(DiskConfig {
        index,
        device,
        mount_point,
        format_percent,
        container_image: value_or_default(values, KEY_CONTAINER_IMAGE)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default(),
        hosts_only,
        hosts_exclude,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const DOC: &str = r#"
global:
  format_percent: 95
  container_image: opencurvedocker/curvebs:v1.2
  host:
    - h1
    - h2
    - h3
disk:
  - device: /dev/sdb
    mount: /data/chunkserver0
  - device: /dev/sdc
    mount: /data/chunkserver1
    format_percent: 80
    exclude:
      - h3
  - device: /dev/sdd
    mount: /data/chunkserver2
    host:
      - h1
"#;

    #[test]
    fn test_parse_merges_global_defaults() {
        let disks = parse_disks(DOC).unwrap();
        assert_eq!(disks.len(), 3);

        assert_eq!(disks[0].device, "/dev/sdb");
        assert_eq!(disks[0].format_percent, 95);
        assert_eq!(disks[0].container_image, "opencurvedocker/curvebs:v1.2");
        assert!(disks[0].hosts_only.is_empty());

        assert_eq!(disks[1].format_percent, 80);
        assert_eq!(disks[1].hosts_exclude, vec!["h3".to_string()]);
        assert_eq!(disks[2].hosts_only, vec!["h1".to_string()]);
    }

    #[test]
    fn test_entries_do_not_inherit_global_hosts() {
        let disks = parse_disks(DOC).unwrap();
        assert!(disks[0].hosts_only.is_empty());
        assert!(disks[0].applies_to("h3"));
        assert!(!disks[1].applies_to("h3"));
        assert!(!disks[2].applies_to("h2"));
    }

    #[test]
    fn test_defaults_without_global() {
        let disks = parse_disks("disk:\n  - device: /dev/sdb\n    mount: /data/cs0\n").unwrap();
        assert_eq!(disks[0].format_percent, items::DEFAULT_FORMAT_PERCENT as u32);
        assert_eq!(disks[0].container_image, items::DEFAULT_CONTAINER_IMAGE);
    }

    #[test]
    fn test_missing_fields() {
        let err = parse_disks("disk:\n  - mount: /data/cs0\n").unwrap_err();
        assert_matches!(err, Error::MissingField { ref location } if location == "disk[0].device");

        let err = parse_disks("disk:\n  - device: /dev/sdb\n  - device: /dev/sdc\n").unwrap_err();
        assert_matches!(err, Error::MissingField { ref location } if location == "disk[0].mount");
    }

    #[test]
    fn test_format_percent_bounds() {
        let err = parse_disks("disk:\n  - device: /dev/sdb\n    mount: /m\n    format_percent: 101\n")
            .unwrap_err();
        assert_matches!(err, Error::FormatPercentOutOfRange { value: 101, .. });

        let err = parse_disks("disk:\n  - device: /dev/sdb\n    mount: /m\n    format_percent: 0\n")
            .unwrap_err();
        assert_matches!(err, Error::FormatPercentOutOfRange { value: 0, .. });

        assert!(parse_disks("disk:\n  - device: /dev/sdb\n    mount: /m\n    format_percent: 100\n").is_ok());
    }

    #[test]
    fn test_conflicting_host_filters() {
        let raw = "disk:\n  - device: /dev/sdb\n    mount: /m\n    host: [h1]\n    exclude: [h2]\n";
        let err = parse_disks(raw).unwrap_err();
        assert_matches!(err, Error::ConflictingHostFilters { index: 0, .. });
    }

    #[test]
    fn test_duplicates() {
        let raw = "disk:\n  - device: /dev/sdb\n    mount: /m0\n  - device: /dev/sdc\n    mount: /m1\n  - device: /dev/sdb\n    mount: /m2\n";
        let err = parse_disks(raw).unwrap_err();
        assert_matches!(err, Error::DuplicateDevice { index: 2, first: 0, ref device } if device == "/dev/sdb");
        assert!(err.to_string().contains("disk[2].device"));

        let raw = "disk:\n  - device: /dev/sdb\n    mount: /m0\n  - device: /dev/sdc\n    mount: /m0\n";
        let err = parse_disks(raw).unwrap_err();
        assert_matches!(err, Error::DuplicateMountPoint { index: 1, first: 0, ref mount } if mount == "/m0");
        assert!(err.to_string().contains("disk[1].mount"));
    }

    #[test]
    fn test_shared_mount_point_on_disjoint_hosts() {
        let raw = r#"
global:
  host: [h1, h2]
disk:
  - device: /dev/sdb
    mount: /data/chunkserver0
    exclude: [h1]
  - device: /dev/sdc
    mount: /data/chunkserver0
    host: [h1]
"#;
        assert_eq!(parse_disks(raw).unwrap().len(), 2);
    }

    #[test]
    fn test_unsupported_items() {
        let err = parse_disks("disk:\n  - device: /dev/sdb\n    mount: /m\n    color: red\n").unwrap_err();
        assert_matches!(err, Error::UnsupportedItem { ref location, .. } if location == "disk[0].color");

        let err = parse_disks("global:\n  device: /dev/sdb\n").unwrap_err();
        assert_matches!(err, Error::UnsupportedItem { ref location, .. } if location == "global.device");

        let err = parse_disks("disk:\n  - device: /dev/sdb\n    mount: /m\n    service_mount_device: true\n")
            .unwrap_err();
        assert_matches!(err, Error::UnsupportedItem { .. });

        let err = parse_disks("hosts: []\n").unwrap_err();
        assert_matches!(err, Error::UnsupportedItem { .. });
    }

    #[test]
    fn test_malformed_yaml() {
        assert_matches!(parse_disks("disk: [").unwrap_err(), Error::ParseDisks(_));
        assert_matches!(parse_disks("- a\n- b\n").unwrap_err(), Error::ParseDisks(_));
    }

    #[test]
    fn test_round_trip_is_semantically_equal() {
        let doc = DisksDocument::parse(DOC).unwrap();
        let yaml = doc.to_yaml().unwrap();
        let again = DisksDocument::parse(&yaml).unwrap();

        assert_eq!(again, doc);
        assert_eq!(again.build().unwrap(), doc.build().unwrap());
    }

    #[test]
    fn test_empty_document() {
        let doc = DisksDocument::parse("").unwrap();
        assert!(doc.disks.is_empty());
        assert!(doc.build().unwrap().disks.is_empty());
    }

    #[test]
    fn test_position_and_lists() {
        let mut doc = DisksDocument::parse(DOC).unwrap();
        assert_eq!(doc.position_of("/dev/sdc"), Some(1));
        assert_eq!(doc.position_of("/dev/sdz"), None);
        assert_eq!(doc.global_hosts(), vec!["h1", "h2", "h3"]);

        set_list(&mut doc.disks[1], KEY_EXCLUDE, Vec::new());
        assert!(doc.disks[1].get(KEY_EXCLUDE).is_none());
        set_list(&mut doc.disks[0], KEY_HOST, vec!["h2".into()]);
        assert_eq!(list(&doc.disks[0], KEY_HOST), vec!["h2"]);
    }
}
