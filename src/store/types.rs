//! Pending change types

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::leaf::{ChangeType, LeafKey};

/// Identity of a pending change within a device
///
/// The leaf carries the per-type addressing (variant or channel index);
/// `field_path` narrows it to one field, or is `None` for a whole-leaf edit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "KeyRepr", try_from = "KeyRepr")]
pub struct ChangeKey {
    pub leaf: LeafKey,
    pub field_path: Option<String>,
}

impl ChangeKey {
    /// Key for an edit replacing the whole leaf
    pub fn whole(leaf: LeafKey) -> Self {
        Self {
            leaf,
            field_path: None,
        }
    }

    /// Key for an edit to one dotted field path; an empty path means the whole leaf
    pub fn field(leaf: LeafKey, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            leaf,
            field_path: if path.is_empty() { None } else { Some(path) },
        }
    }

    /// Storage columns, with `''` / `-1` standing in for missing components
    pub(crate) fn columns(&self) -> KeyColumns<'_> {
        KeyColumns {
            change_type: self.leaf.change_type().as_str(),
            variant: self.leaf.variant().unwrap_or(""),
            channel_index: self
                .leaf
                .channel_index()
                .map(|i| i64::from(i.get()))
                .unwrap_or(-1),
            field_path: self.field_path.as_deref().unwrap_or(""),
        }
    }

    pub(crate) fn from_columns(
        change_type: &str,
        variant: &str,
        channel_index: i64,
        field_path: &str,
    ) -> Result<Self> {
        let change_type: ChangeType = change_type.parse()?;
        let variant = (!variant.is_empty()).then_some(variant);
        let channel_index = (channel_index >= 0).then_some(channel_index);

        Ok(ChangeKey::field(
            LeafKey::from_parts(change_type, variant, channel_index)?,
            field_path,
        ))
    }
}

impl fmt::Display for ChangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field_path {
            Some(path) => write!(f, "{}.{}", self.leaf, path),
            None => write!(f, "{}", self.leaf),
        }
    }
}

pub(crate) struct KeyColumns<'a> {
    pub change_type: &'static str,
    pub variant: &'static str,
    pub channel_index: i64,
    pub field_path: &'a str,
}

/// Outbound shape: `changeType`, `variant?`, `channelIndex?`, `fieldPath?`
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyRepr {
    change_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    field_path: Option<String>,
}

impl From<ChangeKey> for KeyRepr {
    fn from(key: ChangeKey) -> Self {
        KeyRepr {
            change_type: key.leaf.change_type(),
            variant: key.leaf.variant().map(str::to_string),
            channel_index: key.leaf.channel_index().map(|i| i64::from(i.get())),
            field_path: key.field_path,
        }
    }
}

impl TryFrom<KeyRepr> for ChangeKey {
    type Error = SyncError;

    fn try_from(repr: KeyRepr) -> Result<Self> {
        let leaf = LeafKey::from_parts(repr.change_type, repr.variant.as_deref(), repr.channel_index)?;
        Ok(ChangeKey::field(leaf, repr.field_path.unwrap_or_default()))
    }
}

/// An unsaved local edit to one field of a device's configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    pub id: String,
    pub device_id: String,
    #[serde(flatten)]
    pub key: ChangeKey,
    /// Local value to push on the next save
    pub value: Value,
    /// Value the edit was derived from, `None` when the field did not exist
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_value: Option<Value>,
    pub has_conflict: bool,
    /// Device value that superseded `original_value`; set iff `has_conflict`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_value: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingChange {
    pub fn leaf(&self) -> LeafKey {
        self.key.leaf
    }

    pub fn field_path(&self) -> Option<&str> {
        self.key.field_path.as_deref()
    }
}
