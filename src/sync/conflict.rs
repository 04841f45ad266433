//! Conflict detection and resolution
//!
//! A pending change conflicts when the device delivers a value for its field
//! that is neither the value the edit started from nor the edit itself.

use std::sync::Arc;

use serde_json::Value;

use super::types::Resolution;
use crate::error::Result;
use crate::hashing::same_value;
use crate::store::{ChangeKey, PendingChange, PendingChangeStore};

/// How a device value relates to a pending change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictCheck {
    /// Device still holds the value the edit was derived from
    Unchanged,
    /// Device already holds the edited value
    AlreadyApplied,
    /// Device moved to some other value
    Diverged,
}

/// Conflict resolver over the pending change store
pub struct ConflictResolver {
    pending: Arc<dyn PendingChangeStore>,
}

impl ConflictResolver {
    pub fn new(pending: Arc<dyn PendingChangeStore>) -> Self {
        Self { pending }
    }

    /// Classify the device value at a change's field path
    pub fn detect(change: &PendingChange, remote: Option<&Value>) -> ConflictCheck {
        if same_value(remote, Some(&change.value)) {
            ConflictCheck::AlreadyApplied
        } else if same_value(remote, change.original_value.as_ref()) {
            ConflictCheck::Unchanged
        } else {
            ConflictCheck::Diverged
        }
    }

    /// Flag a pending change as conflicting; the local value is untouched
    pub async fn mark_conflict(&self, device_id: &str, key: &ChangeKey, remote_value: &Value) -> Result<bool> {
        let marked = self.pending.set_conflict(device_id, key, remote_value).await?;

        if marked {
            tracing::info!(device_id = %device_id, key = %key, "Conflict recorded");
        } else {
            tracing::debug!(device_id = %device_id, key = %key, "No pending change to mark");
        }

        Ok(marked)
    }

    /// Resolve one conflict
    ///
    /// Returns `false` without touching anything when the key has no
    /// conflicted pending change.
    pub async fn resolve_conflict(
        &self,
        device_id: &str,
        key: &ChangeKey,
        resolution: Resolution,
    ) -> Result<bool> {
        let conflicted = self
            .pending
            .get(device_id, key)
            .await?
            .is_some_and(|c| c.has_conflict);

        if !conflicted {
            tracing::debug!(device_id = %device_id, key = %key, "No conflict to resolve");
            return Ok(false);
        }

        match resolution {
            Resolution::Remote => self.pending.clear(device_id, key).await?,
            Resolution::Local => self.pending.clear_conflict(device_id, key).await?,
        };

        tracing::info!(
            device_id = %device_id,
            key = %key,
            resolution = ?resolution,
            "Conflict resolved"
        );

        Ok(true)
    }

    /// Resolve every conflict of a device the same way
    ///
    /// Returns the keys that were conflicted. Non-conflicted changes are
    /// never touched.
    pub async fn resolve_all_conflicts(
        &self,
        device_id: &str,
        resolution: Resolution,
    ) -> Result<Vec<ChangeKey>> {
        let keys: Vec<ChangeKey> = self
            .pending
            .list_conflicts(device_id)
            .await?
            .into_iter()
            .map(|c| c.key)
            .collect();

        if keys.is_empty() {
            return Ok(keys);
        }

        let affected = match resolution {
            Resolution::Remote => self.pending.clear_conflicted(device_id).await?,
            Resolution::Local => self.pending.clear_all_conflicts(device_id).await?,
        };

        tracing::info!(
            device_id = %device_id,
            resolution = ?resolution,
            affected = affected,
            "Resolved all conflicts"
        );

        Ok(keys)
    }

    pub async fn get_conflicts(&self, device_id: &str) -> Result<Vec<PendingChange>> {
        self.pending.list_conflicts(device_id).await
    }

    pub async fn has_conflicts(&self, device_id: &str) -> Result<bool> {
        self.pending.has_conflicts(device_id).await
    }
}
