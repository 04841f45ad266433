//! Configuration sync engine
//!
//! Keeps, per device:
//! - the base document last delivered by the device (in memory)
//! - base and working leaf hashes (persisted)
//! - field-level pending edits and their conflict state (persisted)
//!
//! Every operation on a device runs under that device's async lock, so a
//! device push and a local edit can never interleave. The cached base
//! document is only replaced after the stores accepted the new state; a
//! failed call leaves it untouched and can be retried.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::{Map, Value};
use sqlx::SqlitePool;
use tokio::sync::Mutex as AsyncMutex;

use super::conflict::{ConflictCheck, ConflictResolver};
use super::field_path::{get_at_path, overlay};
use super::types::{DeviceSection, LeafState, Resolution, SectionApplied, SyncStatus};
use crate::error::{Result, SyncError};
use crate::hashing::same_value;
use crate::leaf::{
    compute_leaf_hashes, compute_root_hash, get_changed_leaves, leaf_hash, ConfigDocument,
    HashSnapshot, LeafKey,
};
use crate::store::{
    ChangeKey, HashStore, MemoryHashStore, MemoryPendingChangeStore, PendingChange,
    PendingChangeStore, SqliteHashStore, SqlitePendingChangeStore,
};

type DeviceSlot = Arc<AsyncMutex<Option<ConfigDocument>>>;

/// Orchestrates hashing, pending edits and conflicts for every device
pub struct ConfigSyncEngine {
    base_hashes: Arc<dyn HashStore>,
    working_hashes: Arc<dyn HashStore>,
    pending: Arc<dyn PendingChangeStore>,
    resolver: ConflictResolver,
    devices: parking_lot::Mutex<HashMap<String, DeviceSlot>>,
}

impl ConfigSyncEngine {
    pub fn new(
        base_hashes: Arc<dyn HashStore>,
        working_hashes: Arc<dyn HashStore>,
        pending: Arc<dyn PendingChangeStore>,
    ) -> Self {
        Self {
            base_hashes,
            working_hashes,
            resolver: ConflictResolver::new(pending.clone()),
            pending,
            devices: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Engine backed by the SQLite stores sharing one pool
    pub fn with_sqlite(pool: SqlitePool) -> Self {
        Self::new(
            Arc::new(SqliteHashStore::base(pool.clone())),
            Arc::new(SqliteHashStore::working(pool.clone())),
            Arc::new(SqlitePendingChangeStore::new(pool)),
        )
    }

    /// Engine that keeps everything in memory
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryHashStore::new()),
            Arc::new(MemoryHashStore::new()),
            Arc::new(MemoryPendingChangeStore::new()),
        )
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    fn slot(&self, device_id: &str) -> DeviceSlot {
        self.devices
            .lock()
            .entry(device_id.to_string())
            .or_default()
            .clone()
    }

    /// Start editing a device from a freshly read configuration
    ///
    /// Base hashes are replaced, working hashes are re-seeded from them and
    /// pending edits that survived from an earlier session are laid back on
    /// top, checked against the new base like any device push.
    pub async fn open_session(&self, device_id: &str, base: ConfigDocument) -> Result<SyncStatus> {
        let slot = self.slot(device_id);
        let mut cached = slot.lock().await;

        let snapshot = compute_leaf_hashes(&base);
        self.base_hashes.upsert_all(device_id, &snapshot).await?;
        self.working_hashes
            .initialize_from_base(device_id, &snapshot)
            .await?;

        let leaves: BTreeSet<LeafKey> = self
            .pending
            .list(device_id)
            .await?
            .iter()
            .map(PendingChange::leaf)
            .collect();

        for leaf in leaves {
            let report = self.reconcile_leaf(device_id, leaf, &base).await?;
            if !report.conflicts.is_empty() {
                tracing::warn!(
                    device_id = %device_id,
                    leaf = %leaf,
                    conflicts = report.conflicts.len(),
                    "Pending edits conflict with device configuration"
                );
            }
            self.refresh_working(device_id, leaf, Some(&base)).await?;
        }

        *cached = Some(base);
        drop(cached);

        tracing::info!(
            device_id = %device_id,
            root = %compute_root_hash(&snapshot),
            "Config session opened"
        );

        self.status(device_id).await
    }

    /// Record a local edit
    ///
    /// `field_path` of `None` replaces the whole leaf. The value the edit
    /// starts from is captured from the base document on the first edit of
    /// a field. Editing a field back to that value drops the pending change,
    /// in which case `None` is returned.
    pub async fn stage_edit(
        &self,
        device_id: &str,
        leaf: LeafKey,
        field_path: Option<&str>,
        value: Value,
    ) -> Result<Option<PendingChange>> {
        let slot = self.slot(device_id);
        let cached = slot.lock().await;
        let base = cached
            .as_ref()
            .ok_or_else(|| SyncError::SessionNotOpen(device_id.to_string()))?;

        let key = ChangeKey::field(leaf, field_path.unwrap_or_default());
        let leaf_value = leaf_or_empty(base, leaf);
        let current = get_at_path(Some(&leaf_value), key.field_path.as_deref());
        let existing = self.pending.get(device_id, &key).await?;

        let original = match &existing {
            Some(change) => change.original_value.as_ref(),
            None => current,
        };
        let reverted = same_value(Some(&value), original)
            && !existing.as_ref().is_some_and(|c| c.has_conflict);

        let staged = if reverted {
            if existing.is_some() {
                self.pending.clear(device_id, &key).await?;
                tracing::debug!(device_id = %device_id, key = %key, "Edit reverted to original");
            }
            None
        } else {
            let change = self.pending.upsert(device_id, &key, &value, current).await?;
            tracing::debug!(device_id = %device_id, key = %key, "Edit staged");
            Some(change)
        };

        self.refresh_working(device_id, leaf, Some(base)).await?;
        Ok(staged)
    }

    /// Drop one pending change, conflicted or not
    pub async fn discard_edit(&self, device_id: &str, key: &ChangeKey) -> Result<bool> {
        let slot = self.slot(device_id);
        let cached = slot.lock().await;

        let removed = self.pending.clear(device_id, key).await?;
        if removed {
            self.refresh_working(device_id, key.leaf, cached.as_ref()).await?;
        }
        Ok(removed)
    }

    /// Drop every pending change of a device; working hashes fall back to base
    pub async fn discard_all(&self, device_id: &str) -> Result<u64> {
        let slot = self.slot(device_id);
        let _cached = slot.lock().await;

        let removed = self.pending.clear_all(device_id).await?;
        let base = self.base_hashes.get_all(device_id).await?;
        self.working_hashes
            .initialize_from_base(device_id, &base)
            .await?;

        tracing::info!(device_id = %device_id, removed = removed, "Discarded all pending changes");
        Ok(removed)
    }

    /// Take a section pushed by the device as the new base for its leaf
    ///
    /// Each pending change of the leaf is compared with the device value at
    /// its field: a change the device already holds is dropped, a change
    /// whose original value still holds is kept, anything else becomes a
    /// conflict.
    pub async fn apply_device_section(&self, device_id: &str, section: DeviceSection) -> Result<SectionApplied> {
        let slot = self.slot(device_id);
        let mut cached = slot.lock().await;

        let leaf = section.leaf;
        let mut base = cached.clone().unwrap_or_default();
        base.set_leaf(leaf, Some(section.value));

        let digest = leaf_hash(base.leaf(leaf));
        let previous = self.base_hashes.get(device_id, leaf).await?;
        self.base_hashes.upsert(device_id, leaf, &digest).await?;

        let mut report = self.reconcile_leaf(device_id, leaf, &base).await?;
        report.base_changed = previous.as_deref() != Some(digest.as_str());

        self.refresh_working(device_id, leaf, Some(&base)).await?;
        *cached = Some(base);

        tracing::debug!(
            device_id = %device_id,
            leaf = %leaf,
            base_changed = report.base_changed,
            conflicts = report.conflicts.len(),
            auto_cleared = report.auto_cleared.len(),
            "Device section applied"
        );

        Ok(report)
    }

    /// The device confirmed a save of a leaf
    ///
    /// Non-conflicted edits are folded into the base and cleared. Conflicted
    /// edits were not pushed and stay pending. Returns the new base hash.
    pub async fn confirm_saved(&self, device_id: &str, leaf: LeafKey) -> Result<String> {
        let slot = self.slot(device_id);
        let mut cached = slot.lock().await;
        let mut base = cached
            .clone()
            .ok_or_else(|| SyncError::SessionNotOpen(device_id.to_string()))?;

        let changes = self.pending.list_for_leaf(device_id, leaf).await?;
        if let Some(saved) = overlay(base.leaf(leaf), &changes) {
            base.set_leaf(leaf, Some(saved));
        }

        let digest = leaf_hash(base.leaf(leaf));
        self.base_hashes.upsert(device_id, leaf, &digest).await?;

        if changes.iter().any(|c| c.has_conflict) {
            for change in changes.iter().filter(|c| !c.has_conflict) {
                self.pending.clear(device_id, &change.key).await?;
            }
        } else {
            self.pending.clear_for_leaf(device_id, leaf).await?;
        }

        self.working_hashes.upsert(device_id, leaf, &digest).await?;
        *cached = Some(base);

        tracing::info!(device_id = %device_id, leaf = %leaf, "Save confirmed");
        Ok(digest)
    }

    /// Resolve one conflict; `false` when the key holds no conflict
    pub async fn resolve_conflict(
        &self,
        device_id: &str,
        key: &ChangeKey,
        resolution: Resolution,
    ) -> Result<bool> {
        let slot = self.slot(device_id);
        let cached = slot.lock().await;

        let resolved = self
            .resolver
            .resolve_conflict(device_id, key, resolution)
            .await?;
        if resolved {
            self.refresh_working(device_id, key.leaf, cached.as_ref()).await?;
        }
        Ok(resolved)
    }

    /// Resolve every conflict of a device, returning the affected keys
    pub async fn resolve_all_conflicts(&self, device_id: &str, resolution: Resolution) -> Result<Vec<ChangeKey>> {
        let slot = self.slot(device_id);
        let cached = slot.lock().await;

        let keys = self
            .resolver
            .resolve_all_conflicts(device_id, resolution)
            .await?;

        let leaves: BTreeSet<LeafKey> = keys.iter().map(|k| k.leaf).collect();
        for leaf in leaves {
            self.refresh_working(device_id, leaf, cached.as_ref()).await?;
        }
        Ok(keys)
    }

    /// Base value of a leaf with non-conflicted pending edits applied
    pub async fn effective_section(&self, device_id: &str, leaf: LeafKey) -> Result<Option<Value>> {
        let slot = self.slot(device_id);
        let cached = slot.lock().await;
        let base = cached
            .as_ref()
            .ok_or_else(|| SyncError::SessionNotOpen(device_id.to_string()))?;

        let changes = self.pending.list_for_leaf(device_id, leaf).await?;
        Ok(overlay(base.leaf(leaf), &changes).or_else(|| base.leaf(leaf).cloned()))
    }

    /// The whole base document with non-conflicted pending edits applied
    pub async fn effective_document(&self, device_id: &str) -> Result<ConfigDocument> {
        let slot = self.slot(device_id);
        let cached = slot.lock().await;
        let base = cached
            .as_ref()
            .ok_or_else(|| SyncError::SessionNotOpen(device_id.to_string()))?;

        let mut by_leaf: BTreeMap<LeafKey, Vec<PendingChange>> = BTreeMap::new();
        for change in self.pending.list(device_id).await? {
            by_leaf.entry(change.leaf()).or_default().push(change);
        }

        let mut effective = base.clone();
        for (leaf, changes) in by_leaf {
            if let Some(value) = overlay(base.leaf(leaf), &changes) {
                effective.set_leaf(leaf, Some(value));
            }
        }
        Ok(effective)
    }

    /// Pending changes to push on the next save, oldest first
    pub async fn pending_changes(&self, device_id: &str) -> Result<Vec<PendingChange>> {
        self.pending.list(device_id).await
    }

    pub async fn conflicts(&self, device_id: &str) -> Result<Vec<PendingChange>> {
        self.resolver.get_conflicts(device_id).await
    }

    /// State of all 30 leaves
    pub async fn leaf_states(&self, device_id: &str) -> Result<BTreeMap<LeafKey, LeafState>> {
        let mut states: BTreeMap<LeafKey, LeafState> =
            LeafKey::all().map(|leaf| (leaf, LeafState::Clean)).collect();

        for change in self.pending.list(device_id).await? {
            let state = if change.has_conflict {
                LeafState::Conflicted
            } else {
                LeafState::Dirty
            };
            states
                .entry(change.leaf())
                .and_modify(|s| {
                    if *s != LeafState::Conflicted {
                        *s = state;
                    }
                })
                .or_insert(state);
        }

        Ok(states)
    }

    /// Leaves whose working hash differs from the base hash
    pub async fn dirty_leaves(&self, device_id: &str) -> Result<Vec<LeafKey>> {
        let base = self.base_hashes.get_all(device_id).await?;
        let working = self.working_hashes.get_all(device_id).await?;
        Ok(get_changed_leaves(&base, &working))
    }

    pub async fn status(&self, device_id: &str) -> Result<SyncStatus> {
        let base = self.base_hashes.get_all(device_id).await?;
        let working = self.working_hashes.get_all(device_id).await?;
        let pending = self.pending.list(device_id).await?;
        let slot = self.devices.lock().get(device_id).cloned();
        let session_open = match slot {
            Some(slot) => slot.lock().await.is_some(),
            None => false,
        };

        Ok(SyncStatus {
            device_id: device_id.to_string(),
            base_root: root_if_complete(&base),
            working_root: root_if_complete(&working),
            dirty_leaves: get_changed_leaves(&base, &working),
            pending_changes: pending.len(),
            conflicts: pending.iter().filter(|c| c.has_conflict).count(),
            base_complete: base.is_complete(),
            session_open,
        })
    }

    /// Delete everything known about a device
    ///
    /// The device keeps its lock slot, so callers already waiting on it stay
    /// serialized with later ones.
    pub async fn forget_device(&self, device_id: &str) -> Result<()> {
        let slot = self.slot(device_id);
        let mut cached = slot.lock().await;

        let pending = self.pending.clear_all(device_id).await?;
        self.working_hashes.delete_all(device_id).await?;
        self.base_hashes.delete_all(device_id).await?;
        *cached = None;

        tracing::info!(device_id = %device_id, pending = pending, "Device forgotten");
        Ok(())
    }

    /// Compare pending changes of a leaf with a new base value
    async fn reconcile_leaf(&self, device_id: &str, leaf: LeafKey, base: &ConfigDocument) -> Result<SectionApplied> {
        let mut report = SectionApplied {
            leaf,
            base_changed: false,
            conflicts: Vec::new(),
            auto_cleared: Vec::new(),
            conflicts_cleared: Vec::new(),
        };

        let leaf_value = leaf_or_empty(base, leaf);
        for change in self.pending.list_for_leaf(device_id, leaf).await? {
            let remote = get_at_path(Some(&leaf_value), change.field_path());

            match ConflictResolver::detect(&change, remote) {
                ConflictCheck::AlreadyApplied => {
                    self.pending.clear(device_id, &change.key).await?;
                    report.auto_cleared.push(change.key);
                }
                ConflictCheck::Unchanged if change.has_conflict => {
                    self.pending.clear_conflict(device_id, &change.key).await?;
                    report.conflicts_cleared.push(change.key);
                }
                ConflictCheck::Unchanged => {}
                ConflictCheck::Diverged => {
                    let remote = remote.cloned().unwrap_or(Value::Null);
                    if !change.has_conflict || !same_value(change.remote_value.as_ref(), Some(&remote)) {
                        self.resolver
                            .mark_conflict(device_id, &change.key, &remote)
                            .await?;
                    }
                    report.conflicts.push(change.key);
                }
            }
        }

        Ok(report)
    }

    /// Recompute the working hash of one leaf
    ///
    /// Without a cached base the working hash can only be brought back to
    /// the base hash, and only when no edit applies to the leaf.
    async fn refresh_working(&self, device_id: &str, leaf: LeafKey, base: Option<&ConfigDocument>) -> Result<()> {
        let changes = self.pending.list_for_leaf(device_id, leaf).await?;

        let digest = match base {
            Some(doc) => leaf_hash(overlay(doc.leaf(leaf), &changes).as_ref().or(doc.leaf(leaf))),
            None if changes.iter().all(|c| c.has_conflict) => {
                match self.base_hashes.get(device_id, leaf).await? {
                    Some(digest) => digest,
                    None => return Ok(()),
                }
            }
            None => {
                tracing::debug!(device_id = %device_id, leaf = %leaf, "No base document, working hash kept");
                return Ok(());
            }
        };

        self.working_hashes.upsert(device_id, leaf, &digest).await
    }
}

/// Leaf value as compared against edits; an absent leaf is an empty record,
/// the same as for hashing
fn leaf_or_empty(base: &ConfigDocument, leaf: LeafKey) -> Value {
    base.leaf(leaf)
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()))
}

fn root_if_complete(snapshot: &HashSnapshot) -> Option<String> {
    snapshot.is_complete().then(|| compute_root_hash(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;
    use crate::leaf::{ChannelIndex, ConfigVariant, ModuleConfigVariant};
    use serde_json::json;

    const NODE: &str = "node-1";

    fn lora() -> LeafKey {
        LeafKey::Config(ConfigVariant::Lora)
    }

    fn doc(value: Value) -> ConfigDocument {
        serde_json::from_value(value).unwrap()
    }

    fn base_doc() -> ConfigDocument {
        doc(json!({
            "config": {"lora": {"region": 0, "hopLimit": 3}, "device": {"role": 1}},
            "moduleConfig": {"mqtt": {"enabled": false}},
            "channels": [{"index": 0, "name": "Primary"}],
            "user": {"longName": "Base camp"}
        }))
    }

    async fn sqlite_engine() -> ConfigSyncEngine {
        ConfigSyncEngine::with_sqlite(create_memory_pool().await.unwrap())
    }

    #[tokio::test]
    async fn test_open_session_seeds_hashes() {
        let engine = sqlite_engine().await;
        let status = engine.open_session(NODE, base_doc()).await.unwrap();

        assert!(status.base_complete);
        assert!(status.session_open);
        assert!(status.is_clean());
        assert_eq!(status.base_root, status.working_root);
        assert_eq!(
            status.base_root,
            Some(compute_root_hash(&compute_leaf_hashes(&base_doc())))
        );
    }

    #[tokio::test]
    async fn test_stage_edit_marks_leaf_dirty() {
        let engine = sqlite_engine().await;
        engine.open_session(NODE, base_doc()).await.unwrap();

        let change = engine
            .stage_edit(NODE, lora(), Some("region"), json!(3))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.original_value, Some(json!(0)));

        assert_eq!(engine.dirty_leaves(NODE).await.unwrap(), vec![lora()]);
        let states = engine.leaf_states(NODE).await.unwrap();
        assert_eq!(states.len(), 30);
        assert_eq!(states[&lora()], LeafState::Dirty);
        assert_eq!(states[&LeafKey::User], LeafState::Clean);

        assert_eq!(
            engine.effective_section(NODE, lora()).await.unwrap(),
            Some(json!({"region": 3, "hopLimit": 3}))
        );
    }

    #[tokio::test]
    async fn test_editing_back_to_original_clears_change() {
        let engine = ConfigSyncEngine::in_memory();
        engine.open_session(NODE, base_doc()).await.unwrap();

        engine.stage_edit(NODE, lora(), Some("region"), json!(3)).await.unwrap();
        engine.stage_edit(NODE, lora(), Some("region"), json!(4)).await.unwrap();
        let reverted = engine.stage_edit(NODE, lora(), Some("region"), json!(0)).await.unwrap();

        assert!(reverted.is_none());
        assert!(engine.pending_changes(NODE).await.unwrap().is_empty());
        assert!(engine.dirty_leaves(NODE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stage_edit_requires_session() {
        let engine = ConfigSyncEngine::in_memory();
        let err = engine
            .stage_edit(NODE, lora(), Some("region"), json!(3))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SessionNotOpen(_)));
    }

    #[tokio::test]
    async fn test_device_push_conflicts_with_pending_edit() {
        let engine = sqlite_engine().await;
        engine
            .open_session(NODE, doc(json!({"config": {"lora": {"region": 0}}})))
            .await
            .unwrap();
        engine
            .stage_edit(NODE, lora(), None, json!({"region": 3}))
            .await
            .unwrap();

        let report = engine
            .apply_device_section(NODE, DeviceSection::config(ConfigVariant::Lora, json!({"region": 5})))
            .await
            .unwrap();

        assert!(report.base_changed);
        assert_eq!(report.conflicts, vec![ChangeKey::whole(lora())]);

        let conflicts = engine.conflicts(NODE).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].has_conflict);
        assert_eq!(conflicts[0].remote_value, Some(json!({"region": 5})));
        assert_eq!(conflicts[0].value, json!({"region": 3}));
        assert_eq!(engine.leaf_states(NODE).await.unwrap()[&lora()], LeafState::Conflicted);

        // conflicted edits are not shown, so working equals base again
        assert!(engine.dirty_leaves(NODE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_device_push_of_same_value_clears_edit() {
        let engine = ConfigSyncEngine::in_memory();
        engine.open_session(NODE, base_doc()).await.unwrap();
        engine.stage_edit(NODE, lora(), Some("region"), json!(3)).await.unwrap();

        let report = engine
            .apply_device_section(
                NODE,
                DeviceSection::config(ConfigVariant::Lora, json!({"region": 3, "hopLimit": 3})),
            )
            .await
            .unwrap();

        assert_eq!(report.auto_cleared, vec![ChangeKey::field(lora(), "region")]);
        assert!(report.conflicts.is_empty());
        assert!(engine.pending_changes(NODE).await.unwrap().is_empty());
        assert!(engine.dirty_leaves(NODE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unrelated_device_push_keeps_edit() {
        let engine = ConfigSyncEngine::in_memory();
        engine.open_session(NODE, base_doc()).await.unwrap();
        engine.stage_edit(NODE, lora(), Some("region"), json!(3)).await.unwrap();

        let report = engine
            .apply_device_section(
                NODE,
                DeviceSection::config(ConfigVariant::Lora, json!({"region": 0, "hopLimit": 7})),
            )
            .await
            .unwrap();

        assert!(report.base_changed);
        assert!(report.conflicts.is_empty());
        assert_eq!(
            engine.effective_section(NODE, lora()).await.unwrap(),
            Some(json!({"region": 3, "hopLimit": 7}))
        );
    }

    #[tokio::test]
    async fn test_resolve_conflict_remote_and_local() {
        let engine = sqlite_engine().await;
        engine.open_session(NODE, base_doc()).await.unwrap();
        engine.stage_edit(NODE, lora(), Some("region"), json!(3)).await.unwrap();
        engine.stage_edit(NODE, lora(), Some("hopLimit"), json!(5)).await.unwrap();

        engine
            .apply_device_section(
                NODE,
                DeviceSection::config(ConfigVariant::Lora, json!({"region": 8, "hopLimit": 6})),
            )
            .await
            .unwrap();
        assert_eq!(engine.conflicts(NODE).await.unwrap().len(), 2);

        let region = ChangeKey::field(lora(), "region");
        let hop = ChangeKey::field(lora(), "hopLimit");

        assert!(engine.resolve_conflict(NODE, &region, Resolution::Remote).await.unwrap());
        assert!(engine.resolve_conflict(NODE, &hop, Resolution::Local).await.unwrap());
        assert!(!engine.resolve_conflict(NODE, &hop, Resolution::Local).await.unwrap());

        let pending = engine.pending_changes(NODE).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, hop);
        assert_eq!(
            engine.effective_section(NODE, lora()).await.unwrap(),
            Some(json!({"region": 8, "hopLimit": 5}))
        );
        assert_eq!(engine.dirty_leaves(NODE).await.unwrap(), vec![lora()]);
    }

    #[tokio::test]
    async fn test_resolve_all_remote_keeps_clean_edits() {
        let engine = ConfigSyncEngine::in_memory();
        engine.open_session(NODE, base_doc()).await.unwrap();

        let mqtt = LeafKey::ModuleConfig(ModuleConfigVariant::Mqtt);
        engine.stage_edit(NODE, lora(), Some("region"), json!(3)).await.unwrap();
        engine.stage_edit(NODE, mqtt, Some("enabled"), json!(true)).await.unwrap();
        engine
            .apply_device_section(NODE, DeviceSection::config(ConfigVariant::Lora, json!({"region": 9})))
            .await
            .unwrap();

        let resolved = engine.resolve_all_conflicts(NODE, Resolution::Remote).await.unwrap();
        assert_eq!(resolved, vec![ChangeKey::field(lora(), "region")]);

        let pending = engine.pending_changes(NODE).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].leaf(), mqtt);
        assert_eq!(engine.dirty_leaves(NODE).await.unwrap(), vec![mqtt]);
    }

    #[tokio::test]
    async fn test_confirm_saved_folds_edits_into_base() {
        let engine = sqlite_engine().await;
        engine.open_session(NODE, base_doc()).await.unwrap();
        engine.stage_edit(NODE, lora(), Some("region"), json!(3)).await.unwrap();

        let digest = engine.confirm_saved(NODE, lora()).await.unwrap();
        assert_eq!(digest, leaf_hash(Some(&json!({"region": 3, "hopLimit": 3}))));

        let status = engine.status(NODE).await.unwrap();
        assert!(status.is_clean());
        assert_eq!(status.base_root, status.working_root);
        assert_eq!(
            engine.effective_section(NODE, lora()).await.unwrap(),
            Some(json!({"region": 3, "hopLimit": 3}))
        );
    }

    #[tokio::test]
    async fn test_confirm_saved_keeps_conflicted_edits() {
        let engine = ConfigSyncEngine::in_memory();
        engine.open_session(NODE, base_doc()).await.unwrap();
        engine.stage_edit(NODE, lora(), Some("region"), json!(3)).await.unwrap();
        engine
            .apply_device_section(
                NODE,
                DeviceSection::config(ConfigVariant::Lora, json!({"region": 5, "hopLimit": 3})),
            )
            .await
            .unwrap();
        engine.stage_edit(NODE, lora(), Some("hopLimit"), json!(4)).await.unwrap();

        engine.confirm_saved(NODE, lora()).await.unwrap();

        let pending = engine.pending_changes(NODE).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].has_conflict);
        assert_eq!(
            engine.effective_section(NODE, lora()).await.unwrap(),
            Some(json!({"region": 5, "hopLimit": 4}))
        );
    }

    #[tokio::test]
    async fn test_effective_document_overlays_every_leaf() {
        let engine = ConfigSyncEngine::in_memory();
        engine.open_session(NODE, base_doc()).await.unwrap();

        let slot = LeafKey::Channel(ChannelIndex::new(2).unwrap());
        engine.stage_edit(NODE, slot, Some("name"), json!("Ops")).await.unwrap();
        engine.stage_edit(NODE, LeafKey::User, Some("shortName"), json!("BC")).await.unwrap();

        let effective = engine.effective_document(NODE).await.unwrap();
        assert_eq!(effective.leaf(slot), Some(&json!({"name": "Ops"})));
        assert_eq!(
            effective.leaf(LeafKey::User),
            Some(&json!({"longName": "Base camp", "shortName": "BC"}))
        );
        assert_eq!(effective.config, base_doc().config);
    }

    #[tokio::test]
    async fn test_reopened_session_reapplies_pending_edits() {
        let pool = create_memory_pool().await.unwrap();
        let engine = ConfigSyncEngine::with_sqlite(pool.clone());
        engine.open_session(NODE, base_doc()).await.unwrap();
        engine.stage_edit(NODE, lora(), Some("region"), json!(3)).await.unwrap();
        drop(engine);

        let engine = ConfigSyncEngine::with_sqlite(pool);
        let status = engine.open_session(NODE, base_doc()).await.unwrap();
        assert_eq!(status.pending_changes, 1);
        assert_eq!(status.dirty_leaves, vec![lora()]);
        assert_eq!(status.conflicts, 0);
    }

    #[tokio::test]
    async fn test_discard_edit_and_discard_all() {
        let engine = ConfigSyncEngine::in_memory();
        engine.open_session(NODE, base_doc()).await.unwrap();
        engine.stage_edit(NODE, lora(), Some("region"), json!(3)).await.unwrap();
        engine.stage_edit(NODE, LeafKey::User, Some("longName"), json!("Ridge")).await.unwrap();

        assert!(engine.discard_edit(NODE, &ChangeKey::field(lora(), "region")).await.unwrap());
        assert_eq!(engine.dirty_leaves(NODE).await.unwrap(), vec![LeafKey::User]);

        assert_eq!(engine.discard_all(NODE).await.unwrap(), 1);
        assert!(engine.status(NODE).await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_forget_device() {
        let engine = sqlite_engine().await;
        engine.open_session(NODE, base_doc()).await.unwrap();
        engine.stage_edit(NODE, lora(), Some("region"), json!(3)).await.unwrap();

        engine.forget_device(NODE).await.unwrap();

        let status = engine.status(NODE).await.unwrap();
        assert!(!status.session_open);
        assert!(!status.base_complete);
        assert_eq!(status.pending_changes, 0);
        assert!(status.base_root.is_none());
    }

    #[tokio::test]
    async fn test_forget_device_keeps_device_lock() {
        let engine = ConfigSyncEngine::in_memory();
        engine.open_session(NODE, base_doc()).await.unwrap();

        let before = engine.slot(NODE);
        engine.forget_device(NODE).await.unwrap();
        let after = engine.slot(NODE);
        assert!(Arc::ptr_eq(&before, &after));

        let _held = before.try_lock().unwrap();
        assert!(after.try_lock().is_err());
    }

    #[tokio::test]
    async fn test_array_element_edit_past_end_extends_array() {
        let engine = ConfigSyncEngine::in_memory();
        engine
            .open_session(NODE, doc(json!({"channels": [{"name": "Primary", "psk": [1, 2]}]})))
            .await
            .unwrap();

        let primary = LeafKey::Channel(ChannelIndex::new(0).unwrap());
        engine.stage_edit(NODE, primary, Some("psk.2"), json!(3)).await.unwrap();

        assert_eq!(
            engine.effective_section(NODE, primary).await.unwrap(),
            Some(json!({"name": "Primary", "psk": [1, 2, 3]}))
        );

        engine.confirm_saved(NODE, primary).await.unwrap();
        assert_eq!(
            engine.effective_document(NODE).await.unwrap().leaf(primary),
            Some(&json!({"name": "Primary", "psk": [1, 2, 3]}))
        );
    }

    #[tokio::test]
    async fn test_absent_leaf_compares_as_empty_record() {
        let engine = ConfigSyncEngine::in_memory();
        engine.open_session(NODE, ConfigDocument::default()).await.unwrap();

        let change = engine
            .stage_edit(NODE, LeafKey::User, None, json!({"longName": "Ridge"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.original_value, Some(json!({})));

        let report = engine
            .apply_device_section(NODE, DeviceSection::user(json!({})))
            .await
            .unwrap();
        assert!(!report.base_changed);
        assert!(report.conflicts.is_empty());
        assert_eq!(engine.pending_changes(NODE).await.unwrap().len(), 1);

        // staging an empty record on an absent leaf is no edit at all
        let slot = LeafKey::Channel(ChannelIndex::new(4).unwrap());
        assert!(engine.stage_edit(NODE, slot, None, json!({})).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_edits_and_pushes_settle() {
        let engine = Arc::new(ConfigSyncEngine::in_memory());
        engine.open_session(NODE, base_doc()).await.unwrap();

        let editor = {
            let engine = engine.clone();
            tokio::spawn(async move {
                for hop in 4..10 {
                    engine
                        .stage_edit(NODE, lora(), Some("hopLimit"), json!(hop))
                        .await
                        .unwrap();
                }
            })
        };
        let device = {
            let engine = engine.clone();
            tokio::spawn(async move {
                for role in 2..8 {
                    engine
                        .apply_device_section(NODE, DeviceSection::config(ConfigVariant::Device, json!({"role": role})))
                        .await
                        .unwrap();
                }
            })
        };
        editor.await.unwrap();
        device.await.unwrap();

        let pending = engine.pending_changes(NODE).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].value, json!(9));
        assert_eq!(pending[0].original_value, Some(json!(3)));
        assert_eq!(engine.dirty_leaves(NODE).await.unwrap(), vec![lora()]);
    }
}
