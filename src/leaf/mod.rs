//! Leaf hash tree
//!
//! Provides:
//! - The fixed set of 30 leaf keys and their string grammar
//! - Per-leaf hashing of a configuration document
//! - Root hash, leaf-level diffs and grouping of changed leaves

mod key;
mod tree;

pub use key::{
    parse_leaf_key, ChangeType, ChannelIndex, ConfigVariant, LeafKey, ModuleConfigVariant,
    CHANNEL_COUNT, LEAF_COUNT,
};
pub use tree::{
    compute_leaf_hashes, compute_root_hash, get_changed_leaves, group_changed_leaves, leaf_hash,
    ChangedLeafGroups, ConfigDocument, HashSnapshot,
};
