//! Leaf hash tree
//!
//! Splits a configuration document into its 30 leaves, hashes each one,
//! and diffs snapshots leaf by leaf instead of deep-comparing documents.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::key::{ChannelIndex, ConfigVariant, LeafKey, ModuleConfigVariant, LEAF_COUNT};
use crate::hashing::{hash, hash_value, LEAF_SEED};

/// A full device configuration as delivered by the connection layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub module_config: Map<String, Value>,
    /// Channel records by slot; `null` entries are empty slots
    #[serde(default)]
    pub channels: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
}

impl ConfigDocument {
    /// Sub-document addressed by a leaf, `None` when absent or null
    pub fn leaf(&self, key: LeafKey) -> Option<&Value> {
        let value = match key {
            LeafKey::Config(v) => self.config.get(v.as_str()),
            LeafKey::ModuleConfig(v) => self.module_config.get(v.as_str()),
            LeafKey::Channel(index) => self.channels.get(usize::from(index.get())),
            LeafKey::User => self.user.as_ref(),
        };
        value.filter(|v| !v.is_null())
    }

    /// Replace (or with `None`, remove) the sub-document for a leaf
    pub fn set_leaf(&mut self, key: LeafKey, value: Option<Value>) {
        match key {
            LeafKey::Config(v) => set_entry(&mut self.config, v.as_str(), value),
            LeafKey::ModuleConfig(v) => set_entry(&mut self.module_config, v.as_str(), value),
            LeafKey::Channel(index) => {
                let slot = usize::from(index.get());
                if self.channels.len() <= slot {
                    if value.is_none() {
                        return;
                    }
                    self.channels.resize(slot + 1, Value::Null);
                }
                self.channels[slot] = value.unwrap_or(Value::Null);
            }
            LeafKey::User => self.user = value,
        }
    }
}

fn set_entry(map: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    match value {
        Some(value) => {
            map.insert(key.to_string(), value);
        }
        None => {
            map.remove(key);
        }
    }
}

/// Hash of a single leaf value
///
/// An absent leaf hashes as an empty record, so every absent leaf has the
/// same digest.
pub fn leaf_hash(value: Option<&Value>) -> String {
    match value {
        Some(value) if !value.is_null() => hash_value(value),
        _ => hash_value(&Map::new()),
    }
}

/// Mapping of leaf to digest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashSnapshot(BTreeMap<LeafKey, String>);

impl HashSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a document with no data: 30 identical digests
    pub fn empty() -> Self {
        let digest = leaf_hash(None);
        LeafKey::all().map(|key| (key, digest.clone())).collect()
    }

    pub fn get(&self, key: LeafKey) -> Option<&str> {
        self.0.get(&key).map(String::as_str)
    }

    pub fn insert(&mut self, key: LeafKey, digest: String) -> Option<String> {
        self.0.insert(key, digest)
    }

    pub fn remove(&mut self, key: LeafKey) -> Option<String> {
        self.0.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every leaf has a digest
    pub fn is_complete(&self) -> bool {
        self.0.len() == LEAF_COUNT
    }

    /// Iterate in canonical leaf order
    pub fn iter(&self) -> impl Iterator<Item = (LeafKey, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = LeafKey> + '_ {
        self.0.keys().copied()
    }
}

impl FromIterator<(LeafKey, String)> for HashSnapshot {
    fn from_iter<I: IntoIterator<Item = (LeafKey, String)>>(iter: I) -> Self {
        HashSnapshot(iter.into_iter().collect())
    }
}

impl IntoIterator for HashSnapshot {
    type Item = (LeafKey, String);
    type IntoIter = std::collections::btree_map::IntoIter<LeafKey, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Hash every leaf of a document
///
/// Always yields exactly 30 entries.
pub fn compute_leaf_hashes(doc: &ConfigDocument) -> HashSnapshot {
    LeafKey::all()
        .map(|key| (key, leaf_hash(doc.leaf(key))))
        .collect()
}

/// Aggregate digest over all leaves
///
/// Leaf digests are concatenated in canonical order and hashed once; a leaf
/// missing from the snapshot contributes nothing.
pub fn compute_root_hash(snapshot: &HashSnapshot) -> String {
    let concatenated: String = LeafKey::all()
        .filter_map(|key| snapshot.get(key))
        .collect();
    hash(&concatenated, LEAF_SEED)
}

/// Leaves whose digests differ between two snapshots
///
/// A leaf present in only one snapshot counts as changed. Result is in
/// canonical leaf order.
pub fn get_changed_leaves(a: &HashSnapshot, b: &HashSnapshot) -> Vec<LeafKey> {
    let keys: BTreeSet<LeafKey> = a.keys().chain(b.keys()).collect();
    keys.into_iter()
        .filter(|key| a.get(*key) != b.get(*key))
        .collect()
}

/// Changed leaves grouped by section kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedLeafGroups {
    pub config_changes: Vec<ConfigVariant>,
    pub module_config_changes: Vec<ModuleConfigVariant>,
    pub channel_changes: Vec<ChannelIndex>,
    pub has_user_change: bool,
}

impl ChangedLeafGroups {
    pub fn is_empty(&self) -> bool {
        self.config_changes.is_empty()
            && self.module_config_changes.is_empty()
            && self.channel_changes.is_empty()
            && !self.has_user_change
    }
}

pub fn group_changed_leaves<I: IntoIterator<Item = LeafKey>>(keys: I) -> ChangedLeafGroups {
    let mut groups = ChangedLeafGroups::default();
    for key in keys {
        match key {
            LeafKey::Config(v) => groups.config_changes.push(v),
            LeafKey::ModuleConfig(v) => groups.module_config_changes.push(v),
            LeafKey::Channel(index) => groups.channel_changes.push(index),
            LeafKey::User => groups.has_user_change = true,
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> ConfigDocument {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_empty_document_has_thirty_identical_hashes() {
        let hashes = compute_leaf_hashes(&ConfigDocument::default());
        assert_eq!(hashes.len(), LEAF_COUNT);

        let first = hashes.get(LeafKey::User).unwrap().to_string();
        assert!(hashes.iter().all(|(_, h)| h == first));
        assert_eq!(hashes, HashSnapshot::empty());
    }

    #[test]
    fn test_deterministic() {
        let d = doc(json!({
            "config": {"lora": {"region": 3, "hopLimit": 3}},
            "channels": [{"index": 0, "name": "Primary"}],
            "user": {"longName": "Base camp"}
        }));
        assert_eq!(compute_leaf_hashes(&d), compute_leaf_hashes(&d.clone()));
    }

    #[test]
    fn test_single_field_change_touches_one_leaf() {
        let a = doc(json!({"config": {"device": {"role": 1}}}));
        let b = doc(json!({"config": {"device": {"role": 2}}}));

        let changed = get_changed_leaves(&compute_leaf_hashes(&a), &compute_leaf_hashes(&b));
        assert_eq!(changed, vec![LeafKey::Config(ConfigVariant::Device)]);
    }

    #[test]
    fn test_channel_change_touches_only_that_channel() {
        let baseline = compute_leaf_hashes(&ConfigDocument::default());
        let with_channel = compute_leaf_hashes(&doc(json!({
            "channels": [{"index": 0, "name": "Primary"}]
        })));

        let changed = get_changed_leaves(&baseline, &with_channel);
        assert_eq!(changed, vec![LeafKey::Channel(ChannelIndex::new(0).unwrap())]);
    }

    #[test]
    fn test_null_and_missing_leaves_hash_alike() {
        let a = doc(json!({"channels": [null, {"name": "B"}], "user": null}));
        let b = doc(json!({"channels": [{}, {"name": "B"}]}));
        assert_eq!(compute_leaf_hashes(&a), compute_leaf_hashes(&b));
    }

    #[test]
    fn test_no_changes_against_self() {
        let snapshot = compute_leaf_hashes(&doc(json!({"user": {"shortName": "BC"}})));
        assert!(get_changed_leaves(&snapshot, &snapshot).is_empty());
    }

    #[test]
    fn test_one_sided_keys_count_as_changed() {
        let full = HashSnapshot::empty();
        let mut partial = HashSnapshot::new();
        partial.insert(LeafKey::User, full.get(LeafKey::User).unwrap().to_string());

        let changed = get_changed_leaves(&full, &partial);
        assert_eq!(changed.len(), LEAF_COUNT - 1);
        assert!(!changed.contains(&LeafKey::User));
    }

    #[test]
    fn test_root_hash_tracks_any_leaf() {
        let a = compute_leaf_hashes(&ConfigDocument::default());
        let b = compute_leaf_hashes(&doc(json!({"moduleConfig": {"mqtt": {"enabled": true}}})));

        assert_eq!(compute_root_hash(&a), compute_root_hash(&a.clone()));
        assert_ne!(compute_root_hash(&a), compute_root_hash(&b));
    }

    #[test]
    fn test_group_changed_leaves() {
        let keys = vec![
            "config:lora".parse().unwrap(),
            "moduleConfig:telemetry".parse().unwrap(),
            "channel:2".parse().unwrap(),
            "config:power".parse().unwrap(),
            LeafKey::User,
        ];

        let groups = group_changed_leaves(keys);
        assert_eq!(groups.config_changes, vec![ConfigVariant::Lora, ConfigVariant::Power]);
        assert_eq!(groups.module_config_changes, vec![ModuleConfigVariant::Telemetry]);
        assert_eq!(groups.channel_changes, vec![ChannelIndex::new(2).unwrap()]);
        assert!(groups.has_user_change);
        assert!(group_changed_leaves(Vec::new()).is_empty());
    }

    #[test]
    fn test_set_leaf() {
        let mut d = ConfigDocument::default();
        let slot = LeafKey::Channel(ChannelIndex::new(3).unwrap());

        d.set_leaf(slot, Some(json!({"name": "Ops"})));
        assert_eq!(d.channels.len(), 4);
        assert_eq!(d.leaf(slot), Some(&json!({"name": "Ops"})));
        assert_eq!(d.leaf(LeafKey::Channel(ChannelIndex::new(1).unwrap())), None);

        d.set_leaf(slot, None);
        assert_eq!(d.leaf(slot), None);

        let lora = LeafKey::Config(ConfigVariant::Lora);
        d.set_leaf(lora, Some(json!({"region": 1})));
        d.set_leaf(lora, None);
        assert!(d.config.is_empty());
    }
}
