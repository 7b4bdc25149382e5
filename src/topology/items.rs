//! Configuration Items
//!
//! Registry of every key a disks document may contain. Each item declares
//! its value type, where it may appear, whether disk entries inherit it from
//! the global block, and its default. Values are checked against the
//! registry as soon as they are read.

use crate::error::{Error, Result};
use serde_yaml::Value;

// =============================================================================
// Keys
// =============================================================================

pub const KEY_HOST: &str = "host";
pub const KEY_EXCLUDE: &str = "exclude";
pub const KEY_DEVICE: &str = "device";
pub const KEY_MOUNT: &str = "mount";
pub const KEY_FORMAT_PERCENT: &str = "format_percent";
pub const KEY_CONTAINER_IMAGE: &str = "container_image";
pub const KEY_SERVICE_MOUNT_DEVICE: &str = "service_mount_device";

pub const DEFAULT_FORMAT_PERCENT: i64 = 90;
pub const DEFAULT_CONTAINER_IMAGE: &str = "opencurvedocker/curvebs:latest";

// =============================================================================
// Item Types
// =============================================================================

/// Declared type of an item's value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    String,
    Int,
    Bool,
    StringList,
}

/// Where an item may appear
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    Disk,
    Both,
}

impl Scope {
    pub fn allows_global(&self) -> bool {
        matches!(self, Scope::Global | Scope::Both)
    }

    pub fn allows_disk(&self) -> bool {
        matches!(self, Scope::Disk | Scope::Both)
    }
}

/// Default of an item when neither the entry nor the global block sets it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemDefault {
    /// Absence is a validation error
    Required,
    /// Absent means unset
    Unset,
    Int(i64),
    Bool(bool),
    Str(&'static str),
}

/// A value that passed its item's type check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemValue {
    String(String),
    Int(i64),
    Bool(bool),
    StringList(Vec<String>),
}

impl ItemValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ItemValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ItemValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ItemValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            ItemValue::StringList(l) => Some(l),
            _ => None,
        }
    }
}

/// One recognized key
#[derive(Debug, Clone, Copy)]
pub struct ConfigItem {
    pub key: &'static str,
    pub kind: ItemKind,
    pub scope: Scope,
    /// Disk entries take the global value when they do not set it
    pub inherited: bool,
    pub default: ItemDefault,
}

// =============================================================================
// Registry
// =============================================================================

/// All recognized items
///
/// `host` is the full host set in the global block and the hosts-only
/// filter in a disk entry, so entries never inherit it.
pub static ITEMS: &[ConfigItem] = &[
    ConfigItem {
        key: KEY_HOST,
        kind: ItemKind::StringList,
        scope: Scope::Both,
        inherited: false,
        default: ItemDefault::Unset,
    },
    ConfigItem {
        key: KEY_EXCLUDE,
        kind: ItemKind::StringList,
        scope: Scope::Disk,
        inherited: false,
        default: ItemDefault::Unset,
    },
    ConfigItem {
        key: KEY_DEVICE,
        kind: ItemKind::String,
        scope: Scope::Disk,
        inherited: false,
        default: ItemDefault::Required,
    },
    ConfigItem {
        key: KEY_MOUNT,
        kind: ItemKind::String,
        scope: Scope::Disk,
        inherited: false,
        default: ItemDefault::Required,
    },
    ConfigItem {
        key: KEY_FORMAT_PERCENT,
        kind: ItemKind::Int,
        scope: Scope::Both,
        inherited: true,
        default: ItemDefault::Int(DEFAULT_FORMAT_PERCENT),
    },
    ConfigItem {
        key: KEY_CONTAINER_IMAGE,
        kind: ItemKind::String,
        scope: Scope::Both,
        inherited: true,
        default: ItemDefault::Str(DEFAULT_CONTAINER_IMAGE),
    },
    ConfigItem {
        key: KEY_SERVICE_MOUNT_DEVICE,
        kind: ItemKind::Bool,
        scope: Scope::Global,
        inherited: false,
        default: ItemDefault::Bool(false),
    },
];

/// Look up an item by key
pub fn lookup(key: &str) -> Option<&'static ConfigItem> {
    ITEMS.iter().find(|item| item.key == key)
}

impl ConfigItem {
    /// Check a raw value against this item's declared type
    ///
    /// Numbers are accepted for string items and a single string is accepted
    /// where a list is expected.
    pub fn check(&self, location: &str, value: &Value) -> Result<ItemValue> {
        let invalid = |reason: &str| Error::InvalidItem {
            location: location.to_string(),
            reason: reason.to_string(),
        };

        match self.kind {
            ItemKind::String => match value {
                Value::String(s) => Ok(ItemValue::String(s.clone())),
                Value::Number(n) => Ok(ItemValue::String(n.to_string())),
                _ => Err(invalid("expected a string")),
            },
            ItemKind::Int => match value {
                Value::Number(n) => n
                    .as_i64()
                    .map(ItemValue::Int)
                    .ok_or_else(|| invalid("expected an integer")),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(ItemValue::Int)
                    .map_err(|_| invalid("expected an integer")),
                _ => Err(invalid("expected an integer")),
            },
            ItemKind::Bool => match value {
                Value::Bool(b) => Ok(ItemValue::Bool(*b)),
                Value::String(s) => match s.trim() {
                    "true" => Ok(ItemValue::Bool(true)),
                    "false" => Ok(ItemValue::Bool(false)),
                    _ => Err(invalid("expected true or false")),
                },
                _ => Err(invalid("expected true or false")),
            },
            ItemKind::StringList => match value {
                Value::Sequence(seq) => seq
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => Ok(s.clone()),
                        _ => Err(invalid("expected a list of strings")),
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(ItemValue::StringList),
                Value::String(s) => Ok(ItemValue::StringList(vec![s.clone()])),
                Value::Null => Ok(ItemValue::StringList(Vec::new())),
                _ => Err(invalid("expected a list of strings")),
            },
        }
    }

    /// The default value, `None` for required and unset items
    pub fn default_value(&self) -> Option<ItemValue> {
        match self.default {
            ItemDefault::Required | ItemDefault::Unset => None,
            ItemDefault::Int(i) => Some(ItemValue::Int(i)),
            ItemDefault::Bool(b) => Some(ItemValue::Bool(b)),
            ItemDefault::Str(s) => Some(ItemValue::String(s.to_string())),
        }
    }
}
