//! Mesh Config Sync
//!
//! Tracks a mesh radio's configuration against local edits: per-leaf hashes
//! of the last device state, field-level pending changes and the conflicts
//! that arise when the device moves under an unsaved edit.
//!
//! # Modules
//!
//! - `hashing`: canonical serialization and the 53-bit string hash
//! - `leaf`: the 30 leaf keys, leaf hashing and diffs
//! - `store`: base/working hash and pending change stores
//! - `sync`: conflict resolution and the sync engine

pub mod config;
pub mod db;
pub mod error;
pub mod hashing;
pub mod leaf;
pub mod store;
pub mod sync;

pub use error::{Result, SyncError};
pub use sync::ConfigSyncEngine;
