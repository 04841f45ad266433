//! Sync engine types

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::leaf::{ChannelIndex, ConfigVariant, LeafKey, ModuleConfigVariant};
use crate::store::ChangeKey;

/// Which side wins a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Keep the local edit; it is pushed on the next save
    Local,
    /// Discard the local edit in favor of the device value
    Remote,
}

impl std::str::FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Resolution::Local),
            "remote" => Ok(Resolution::Remote),
            other => Err(format!("Unknown resolution: {}", other)),
        }
    }
}

/// A decoded configuration section pushed by the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSection {
    pub leaf: LeafKey,
    pub value: Value,
}

impl DeviceSection {
    pub fn config(variant: ConfigVariant, value: Value) -> Self {
        Self {
            leaf: LeafKey::Config(variant),
            value,
        }
    }

    pub fn module_config(variant: ModuleConfigVariant, value: Value) -> Self {
        Self {
            leaf: LeafKey::ModuleConfig(variant),
            value,
        }
    }

    pub fn channel(index: ChannelIndex, value: Value) -> Self {
        Self {
            leaf: LeafKey::Channel(index),
            value,
        }
    }

    pub fn user(value: Value) -> Self {
        Self {
            leaf: LeafKey::User,
            value,
        }
    }
}

/// Outcome of applying one device section
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionApplied {
    pub leaf: LeafKey,
    /// Whether the base hash of the leaf moved
    pub base_changed: bool,
    /// Pending changes now in conflict with the device value
    pub conflicts: Vec<ChangeKey>,
    /// Pending changes dropped because the device already holds their value
    pub auto_cleared: Vec<ChangeKey>,
    /// Conflicts cleared because the device went back to the original value
    pub conflicts_cleared: Vec<ChangeKey>,
}

/// Per-leaf editing state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeafState {
    /// No pending change
    Clean,
    /// Local edits awaiting a save
    Dirty,
    /// At least one local edit superseded by a device value
    Conflicted,
}

/// Sync status for one device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub device_id: String,
    /// Root hash over base hashes, when all 30 are known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_root: Option<String>,
    /// Root hash over working hashes, when all 30 are known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_root: Option<String>,
    /// Leaves whose working hash differs from the base hash
    pub dirty_leaves: Vec<LeafKey>,
    pub pending_changes: usize,
    pub conflicts: usize,
    pub base_complete: bool,
    /// Whether the engine holds a base document for the device
    pub session_open: bool,
}

impl SyncStatus {
    /// Nothing to save and nothing to resolve
    pub fn is_clean(&self) -> bool {
        self.pending_changes == 0 && self.conflicts == 0 && self.dirty_leaves.is_empty()
    }
}
