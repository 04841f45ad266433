//! Persisted per-device state
//!
//! Provides:
//! - Base hashes: leaf digests last confirmed from the device
//! - Working hashes: leaf digests including unsaved local edits
//! - Pending changes: field-level local edits awaiting a device save
//!
//! Every operation is keyed and idempotent, so a failed call can be retried
//! as-is. SQLite implementations back the application; in-memory ones serve
//! tests and embedders without a database.

mod hashes;
mod memory;
mod pending;
mod types;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::leaf::{HashSnapshot, LeafKey};

pub use hashes::{HashTable, SqliteHashStore};
pub use memory::{MemoryHashStore, MemoryPendingChangeStore};
pub use pending::SqlitePendingChangeStore;
pub use types::{ChangeKey, PendingChange};

/// Per-device map of leaf to digest
#[async_trait]
pub trait HashStore: Send + Sync {
    /// All digests stored for a device (possibly fewer than 30)
    async fn get_all(&self, device_id: &str) -> Result<HashSnapshot>;

    async fn get(&self, device_id: &str, leaf: LeafKey) -> Result<Option<String>>;

    /// Upsert every digest of a snapshot in one transaction
    async fn upsert_all(&self, device_id: &str, snapshot: &HashSnapshot) -> Result<()>;

    async fn upsert(&self, device_id: &str, leaf: LeafKey, digest: &str) -> Result<()>;

    /// Remove all digests for a device, returning how many were removed
    async fn delete_all(&self, device_id: &str) -> Result<u64>;

    async fn delete(&self, device_id: &str, leaf: LeafKey) -> Result<bool>;

    /// Whether any digest is stored for the device
    async fn exists(&self, device_id: &str) -> Result<bool>;

    /// Whether all 30 leaves have a digest
    async fn is_complete(&self, device_id: &str) -> Result<bool>;

    /// Replace everything stored for a device with `snapshot`, atomically
    ///
    /// Used to seed working hashes from base hashes when an editing session
    /// opens.
    async fn initialize_from_base(&self, device_id: &str, base: &HashSnapshot) -> Result<()>;
}

/// Field-granular local edits not yet confirmed by the device
#[async_trait]
pub trait PendingChangeStore: Send + Sync {
    /// All pending changes of a device, oldest first
    async fn list(&self, device_id: &str) -> Result<Vec<PendingChange>>;

    /// Pending changes addressing one leaf (config/module variant, channel or user)
    async fn list_for_leaf(&self, device_id: &str, leaf: LeafKey) -> Result<Vec<PendingChange>>;

    async fn get(&self, device_id: &str, key: &ChangeKey) -> Result<Option<PendingChange>>;

    /// Insert a change, or update `value` of the existing one
    ///
    /// On update `original_value`, the conflict flag and `remote_value` are
    /// preserved; `original_value` is only used on insert.
    async fn upsert(
        &self,
        device_id: &str,
        key: &ChangeKey,
        value: &Value,
        original_value: Option<&Value>,
    ) -> Result<PendingChange>;

    async fn clear(&self, device_id: &str, key: &ChangeKey) -> Result<bool>;

    async fn clear_all(&self, device_id: &str) -> Result<u64>;

    /// Drop every change of one leaf, e.g. after the device confirmed a save
    async fn clear_for_leaf(&self, device_id: &str, leaf: LeafKey) -> Result<u64>;

    /// Existence check that materializes no rows
    async fn has_changes_for_leaf(&self, device_id: &str, leaf: LeafKey) -> Result<bool>;

    /// Flag a change as conflicting with `remote_value`; `value` is untouched
    async fn set_conflict(&self, device_id: &str, key: &ChangeKey, remote_value: &Value) -> Result<bool>;

    /// Clear the conflict flag and remote value, keeping the local value
    async fn clear_conflict(&self, device_id: &str, key: &ChangeKey) -> Result<bool>;

    async fn list_conflicts(&self, device_id: &str) -> Result<Vec<PendingChange>>;

    async fn has_conflicts(&self, device_id: &str) -> Result<bool>;

    /// Delete every conflicted change of a device in one pass
    async fn clear_conflicted(&self, device_id: &str) -> Result<u64>;

    /// Clear the conflict state of every conflicted change in one pass
    async fn clear_all_conflicts(&self, device_id: &str) -> Result<u64>;
}
