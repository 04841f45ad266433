//! In-memory store implementations
//!
//! Same semantics as the SQLite stores, held behind async locks. Nothing
//! survives the process.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ChangeKey, HashStore, PendingChange, PendingChangeStore};
use crate::error::Result;
use crate::leaf::{HashSnapshot, LeafKey};

/// In-memory leaf hash table
#[derive(Default)]
pub struct MemoryHashStore {
    devices: RwLock<HashMap<String, HashSnapshot>>,
}

impl MemoryHashStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HashStore for MemoryHashStore {
    async fn get_all(&self, device_id: &str) -> Result<HashSnapshot> {
        let devices = self.devices.read().await;
        Ok(devices.get(device_id).cloned().unwrap_or_default())
    }

    async fn get(&self, device_id: &str, leaf: LeafKey) -> Result<Option<String>> {
        let devices = self.devices.read().await;
        Ok(devices
            .get(device_id)
            .and_then(|s| s.get(leaf))
            .map(str::to_string))
    }

    async fn upsert_all(&self, device_id: &str, snapshot: &HashSnapshot) -> Result<()> {
        let mut devices = self.devices.write().await;
        let stored = devices.entry(device_id.to_string()).or_default();
        for (key, digest) in snapshot.iter() {
            stored.insert(key, digest.to_string());
        }
        Ok(())
    }

    async fn upsert(&self, device_id: &str, leaf: LeafKey, digest: &str) -> Result<()> {
        let mut devices = self.devices.write().await;
        devices
            .entry(device_id.to_string())
            .or_default()
            .insert(leaf, digest.to_string());
        Ok(())
    }

    async fn delete_all(&self, device_id: &str) -> Result<u64> {
        let mut devices = self.devices.write().await;
        Ok(devices.remove(device_id).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn delete(&self, device_id: &str, leaf: LeafKey) -> Result<bool> {
        let mut devices = self.devices.write().await;
        let Some(stored) = devices.get_mut(device_id) else {
            return Ok(false);
        };

        let removed = stored.remove(leaf).is_some();
        if stored.is_empty() {
            devices.remove(device_id);
        }
        Ok(removed)
    }

    async fn exists(&self, device_id: &str) -> Result<bool> {
        let devices = self.devices.read().await;
        Ok(devices.get(device_id).is_some_and(|s| !s.is_empty()))
    }

    async fn is_complete(&self, device_id: &str) -> Result<bool> {
        let devices = self.devices.read().await;
        Ok(devices.get(device_id).is_some_and(HashSnapshot::is_complete))
    }

    async fn initialize_from_base(&self, device_id: &str, base: &HashSnapshot) -> Result<()> {
        let mut devices = self.devices.write().await;
        devices.insert(device_id.to_string(), base.clone());
        Ok(())
    }
}

/// In-memory pending change table, rows kept in creation order
#[derive(Default)]
pub struct MemoryPendingChangeStore {
    devices: RwLock<HashMap<String, Vec<PendingChange>>>,
}

impl MemoryPendingChangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn filtered<F>(&self, device_id: &str, predicate: F) -> Vec<PendingChange>
    where
        F: Fn(&PendingChange) -> bool + Send,
    {
        let devices = self.devices.read().await;
        devices
            .get(device_id)
            .map(|rows| rows.iter().filter(|c| predicate(*c)).cloned().collect())
            .unwrap_or_default()
    }

    async fn remove_where<F>(&self, device_id: &str, predicate: F) -> u64
    where
        F: Fn(&PendingChange) -> bool + Send,
    {
        let mut devices = self.devices.write().await;
        let Some(rows) = devices.get_mut(device_id) else {
            return 0;
        };
        let before = rows.len();
        rows.retain(|c| !predicate(c));
        (before - rows.len()) as u64
    }

    async fn update_where<F, U>(&self, device_id: &str, predicate: F, update: U) -> u64
    where
        F: Fn(&PendingChange) -> bool + Send,
        U: Fn(&mut PendingChange) + Send,
    {
        let mut devices = self.devices.write().await;
        let Some(rows) = devices.get_mut(device_id) else {
            return 0;
        };
        let mut count = 0;
        for row in rows.iter_mut().filter(|c| predicate(&**c)) {
            update(row);
            row.updated_at = Utc::now();
            count += 1;
        }
        count
    }
}

#[async_trait]
impl PendingChangeStore for MemoryPendingChangeStore {
    async fn list(&self, device_id: &str) -> Result<Vec<PendingChange>> {
        Ok(self.filtered(device_id, |_| true).await)
    }

    async fn list_for_leaf(&self, device_id: &str, leaf: LeafKey) -> Result<Vec<PendingChange>> {
        Ok(self.filtered(device_id, |c| c.key.leaf == leaf).await)
    }

    async fn get(&self, device_id: &str, key: &ChangeKey) -> Result<Option<PendingChange>> {
        Ok(self.filtered(device_id, |c| &c.key == key).await.into_iter().next())
    }

    async fn upsert(
        &self,
        device_id: &str,
        key: &ChangeKey,
        value: &Value,
        original_value: Option<&Value>,
    ) -> Result<PendingChange> {
        let mut devices = self.devices.write().await;
        let rows = devices.entry(device_id.to_string()).or_default();
        let now = Utc::now();

        if let Some(existing) = rows.iter_mut().find(|c| &c.key == key) {
            existing.value = value.clone();
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let change = PendingChange {
            id: Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            key: key.clone(),
            value: value.clone(),
            original_value: original_value.cloned(),
            has_conflict: false,
            remote_value: None,
            created_at: now,
            updated_at: now,
        };
        rows.push(change.clone());
        Ok(change)
    }

    async fn clear(&self, device_id: &str, key: &ChangeKey) -> Result<bool> {
        Ok(self.remove_where(device_id, |c| &c.key == key).await > 0)
    }

    async fn clear_all(&self, device_id: &str) -> Result<u64> {
        let mut devices = self.devices.write().await;
        Ok(devices.remove(device_id).map(|rows| rows.len() as u64).unwrap_or(0))
    }

    async fn clear_for_leaf(&self, device_id: &str, leaf: LeafKey) -> Result<u64> {
        Ok(self.remove_where(device_id, |c| c.key.leaf == leaf).await)
    }

    async fn has_changes_for_leaf(&self, device_id: &str, leaf: LeafKey) -> Result<bool> {
        let devices = self.devices.read().await;
        Ok(devices
            .get(device_id)
            .is_some_and(|rows| rows.iter().any(|c| c.key.leaf == leaf)))
    }

    async fn set_conflict(&self, device_id: &str, key: &ChangeKey, remote_value: &Value) -> Result<bool> {
        let count = self
            .update_where(
                device_id,
                |c| &c.key == key,
                |c| {
                    c.has_conflict = true;
                    c.remote_value = Some(remote_value.clone());
                },
            )
            .await;
        Ok(count > 0)
    }

    async fn clear_conflict(&self, device_id: &str, key: &ChangeKey) -> Result<bool> {
        let count = self
            .update_where(
                device_id,
                |c| &c.key == key,
                |c| {
                    c.has_conflict = false;
                    c.remote_value = None;
                },
            )
            .await;
        Ok(count > 0)
    }

    async fn list_conflicts(&self, device_id: &str) -> Result<Vec<PendingChange>> {
        Ok(self.filtered(device_id, |c| c.has_conflict).await)
    }

    async fn has_conflicts(&self, device_id: &str) -> Result<bool> {
        let devices = self.devices.read().await;
        Ok(devices
            .get(device_id)
            .is_some_and(|rows| rows.iter().any(|c| c.has_conflict)))
    }

    async fn clear_conflicted(&self, device_id: &str) -> Result<u64> {
        Ok(self.remove_where(device_id, |c| c.has_conflict).await)
    }

    async fn clear_all_conflicts(&self, device_id: &str) -> Result<u64> {
        Ok(self
            .update_where(
                device_id,
                |c| c.has_conflict,
                |c| {
                    c.has_conflict = false;
                    c.remote_value = None;
                },
            )
            .await)
    }
}
