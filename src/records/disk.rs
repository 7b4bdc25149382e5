//! Disk Records
//!
//! One row per physical device mounted for a chunkserver on a host. The
//! physical identity of the device is kept as a typed [`DiskUri`] that is
//! parsed once when it enters the system.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Constants
// =============================================================================

/// Separator between scheme and identifier in a disk URI
const URI_SEPARATOR: &str = "//";

/// Scheme of URIs identifying a disk by filesystem UUID
pub const FS_UUID_SCHEME: &str = "fs:uuid";

// =============================================================================
// Disk URI
// =============================================================================

/// Scheme of a physical-disk URI
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DiskUriScheme {
    /// Filesystem UUID (`fs:uuid`)
    FsUuid,
    /// Any scheme this tool does not interpret
    Other(String),
}

impl fmt::Display for DiskUriScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskUriScheme::FsUuid => write!(f, "{}", FS_UUID_SCHEME),
            DiskUriScheme::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Physical-disk identity, encoded as `<scheme>//<id>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DiskUri {
    pub scheme: DiskUriScheme,
    pub id: String,
}

impl DiskUri {
    /// URI for a filesystem UUID
    pub fn fs_uuid(uuid: impl Into<String>) -> Self {
        Self {
            scheme: DiskUriScheme::FsUuid,
            id: uuid.into(),
        }
    }

    /// Parse a `<scheme>//<id>` string
    pub fn parse(raw: &str) -> Option<Self> {
        let (scheme, id) = raw.split_once(URI_SEPARATOR)?;
        if scheme.is_empty() {
            return None;
        }
        let scheme = match scheme {
            FS_UUID_SCHEME => DiskUriScheme::FsUuid,
            other => DiskUriScheme::Other(other.to_string()),
        };
        Some(Self {
            scheme,
            id: id.to_string(),
        })
    }

    /// The filesystem UUID, when the URI uses the `fs:uuid` scheme
    pub fn fs_uuid_id(&self) -> Option<&str> {
        match self.scheme {
            DiskUriScheme::FsUuid => Some(&self.id),
            DiskUriScheme::Other(_) => None,
        }
    }
}

impl fmt::Display for DiskUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.scheme, URI_SEPARATOR, self.id)
    }
}

impl TryFrom<String> for DiskUri {
    type Error = String;

    fn try_from(raw: String) -> std::result::Result<Self, Self::Error> {
        DiskUri::parse(&raw).ok_or_else(|| format!("invalid disk URI: {}", raw))
    }
}

impl From<DiskUri> for String {
    fn from(uri: DiskUri) -> Self {
        uri.to_string()
    }
}

// =============================================================================
// Disk Record
// =============================================================================

/// A device mounted for a service on one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskRecord {
    /// Host the device is attached to
    pub host: String,
    /// Device path (e.g. /dev/sdb)
    pub device: String,
    /// Mount point of the device on the host
    pub mount_point: String,
    /// Container image the owning service runs
    pub container_image: String,
    /// Owning chunkserver, `None` while the device is unowned
    #[serde(default)]
    pub service_id: Option<String>,
    /// Physical-disk identity
    #[serde(default)]
    pub uri: Option<DiskUri>,
    /// Percentage of the device the chunkfile pool is formatted to
    pub format_percent: u32,
    /// Whether the device itself (rather than the mount point) is handed to the service
    #[serde(default)]
    pub service_mount_device: bool,
    /// Raw size in bytes, when known
    #[serde(default)]
    pub size: Option<u64>,
}

impl DiskRecord {
    /// Create an unowned record
    pub fn new(
        host: impl Into<String>,
        device: impl Into<String>,
        mount_point: impl Into<String>,
        container_image: impl Into<String>,
        format_percent: u32,
    ) -> Self {
        Self {
            host: host.into(),
            device: device.into(),
            mount_point: mount_point.into(),
            container_image: container_image.into(),
            service_id: None,
            uri: None,
            format_percent,
            service_mount_device: false,
            size: None,
        }
    }

    /// Whether the device is owned by any service
    pub fn is_owned(&self) -> bool {
        self.service_id.is_some()
    }

    /// Whether the device is owned by the given service
    pub fn is_owned_by(&self, service_id: &str) -> bool {
        self.service_id.as_deref() == Some(service_id)
    }

    /// Physical-disk id of this record
    ///
    /// `None` when no URI is recorded or its scheme is not
    /// `fs:uuid`.
    pub fn disk_id(&self) -> Option<&str> {
        self.uri.as_ref().and_then(|uri| uri.fs_uuid_id())
    }

    /// Record a filesystem UUID read from the device as its physical identity
    pub fn set_fs_uuid(&mut self, uuid: &str) -> Result<()> {
        let uuid = uuid.trim();
        if uuid.is_empty() || uuid.contains(char::is_whitespace) || uuid.contains(URI_SEPARATOR) {
            return Err(Error::InvalidDiskUri {
                host: self.host.clone(),
                device: self.device.clone(),
                uri: DiskUri::fs_uuid(uuid).to_string(),
            });
        }
        self.uri = Some(DiskUri::fs_uuid(uuid));
        Ok(())
    }
}

/// Query over disk records
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskFilter {
    /// Every record
    All,
    /// Records on one host
    Host(String),
    /// The record for one device on one host
    Device { host: String, device: String },
    /// Records owned by a service
    Service(String),
}

impl DiskFilter {
    /// Device filter helper
    pub fn device(host: impl Into<String>, device: impl Into<String>) -> Self {
        DiskFilter::Device {
            host: host.into(),
            device: device.into(),
        }
    }

    /// Whether a record satisfies this filter
    pub fn matches(&self, record: &DiskRecord) -> bool {
        match self {
            DiskFilter::All => true,
            DiskFilter::Host(host) => &record.host == host,
            DiskFilter::Device { host, device } => {
                &record.host == host && &record.device == device
            }
            DiskFilter::Service(id) => record.is_owned_by(id),
        }
    }
}
