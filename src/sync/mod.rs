//! Configuration sync
//!
//! Provides:
//! - Field path access and overlay of pending edits onto base values
//! - Conflict detection and resolution
//! - The per-device sync engine tying hashes, edits and conflicts together

mod conflict;
mod engine;
mod field_path;
mod types;

pub use conflict::{ConflictCheck, ConflictResolver};
pub use engine::ConfigSyncEngine;
pub use field_path::{get_at_path, overlay, set_at_path};
pub use types::{DeviceSection, LeafState, Resolution, SectionApplied, SyncStatus};
