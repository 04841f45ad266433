//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL).execute(pool).await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Leaf hashes as last confirmed from the device
CREATE TABLE IF NOT EXISTS base_hashes (
    device_id TEXT NOT NULL,
    leaf_key TEXT NOT NULL,
    hash TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),

    PRIMARY KEY (device_id, leaf_key)
);

-- Leaf hashes including unsaved local edits
CREATE TABLE IF NOT EXISTS working_hashes (
    device_id TEXT NOT NULL,
    leaf_key TEXT NOT NULL,
    hash TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),

    PRIMARY KEY (device_id, leaf_key)
);

-- Field-level local edits not yet confirmed by the device.
-- Missing key components use '' / -1 so UNIQUE treats them as one value.
CREATE TABLE IF NOT EXISTS pending_changes (
    id TEXT PRIMARY KEY,
    device_id TEXT NOT NULL,
    -- 'config', 'moduleConfig', 'channel' or 'user'
    change_type TEXT NOT NULL,
    variant TEXT NOT NULL DEFAULT '',
    channel_index INTEGER NOT NULL DEFAULT -1,
    field_path TEXT NOT NULL DEFAULT '',
    -- JSON encoded values
    value TEXT NOT NULL,
    original_value TEXT,
    has_conflict INTEGER NOT NULL DEFAULT 0,
    remote_value TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    UNIQUE(device_id, change_type, variant, channel_index, field_path),
    CHECK (has_conflict = 0 OR remote_value IS NOT NULL)
);

CREATE INDEX IF NOT EXISTS idx_pending_device ON pending_changes(device_id);
CREATE INDEX IF NOT EXISTS idx_pending_conflict ON pending_changes(device_id, has_conflict);
"#;
