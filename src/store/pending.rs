//! SQLite storage for pending changes
//!
//! Optional key components are stored as `''` / `-1` so that the UNIQUE
//! constraint treats "no value" as one stable marker (SQLite considers NULLs
//! distinct).

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::types::ChangeKey;
use super::{PendingChange, PendingChangeStore};
use crate::error::Result;
use crate::leaf::LeafKey;

const PENDING_COLUMNS: &str = "id, device_id, change_type, variant, channel_index, field_path, \
     value, original_value, has_conflict, remote_value, created_at, updated_at";

/// Repository for pending change persistence
#[derive(Clone)]
pub struct SqlitePendingChangeStore {
    pool: SqlitePool,
}

impl SqlitePendingChangeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_where(&self, filter: &str, device_id: &str) -> Result<Vec<PendingChange>> {
        let rows = sqlx::query_as::<_, PendingChangeRow>(&format!(
            "SELECT {} FROM pending_changes WHERE device_id = ? {} ORDER BY created_at ASC, rowid ASC",
            PENDING_COLUMNS, filter
        ))
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_change()).collect()
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl PendingChangeStore for SqlitePendingChangeStore {
    async fn list(&self, device_id: &str) -> Result<Vec<PendingChange>> {
        self.fetch_where("", device_id).await
    }

    async fn list_for_leaf(&self, device_id: &str, leaf: LeafKey) -> Result<Vec<PendingChange>> {
        let whole = ChangeKey::whole(leaf);
        let cols = whole.columns();

        let rows = sqlx::query_as::<_, PendingChangeRow>(&format!(
            r#"
            SELECT {}
            FROM pending_changes
            WHERE device_id = ? AND change_type = ? AND variant = ? AND channel_index = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
            PENDING_COLUMNS
        ))
        .bind(device_id)
        .bind(cols.change_type)
        .bind(cols.variant)
        .bind(cols.channel_index)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_change()).collect()
    }

    async fn get(&self, device_id: &str, key: &ChangeKey) -> Result<Option<PendingChange>> {
        let cols = key.columns();

        let row = sqlx::query_as::<_, PendingChangeRow>(&format!(
            r#"
            SELECT {}
            FROM pending_changes
            WHERE device_id = ? AND change_type = ? AND variant = ?
              AND channel_index = ? AND field_path = ?
            "#,
            PENDING_COLUMNS
        ))
        .bind(device_id)
        .bind(cols.change_type)
        .bind(cols.variant)
        .bind(cols.channel_index)
        .bind(cols.field_path)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_change()).transpose()
    }

    async fn upsert(
        &self,
        device_id: &str,
        key: &ChangeKey,
        value: &Value,
        original_value: Option<&Value>,
    ) -> Result<PendingChange> {
        let cols = key.columns();
        let now = timestamp();
        let value_json = serde_json::to_string(value)?;
        let original_json = original_value.map(serde_json::to_string).transpose()?;

        let row = sqlx::query_as::<_, PendingChangeRow>(&format!(
            r#"
            INSERT INTO pending_changes (
                id, device_id, change_type, variant, channel_index, field_path,
                value, original_value, has_conflict, remote_value, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, NULL, ?, ?)
            ON CONFLICT(device_id, change_type, variant, channel_index, field_path) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            RETURNING {}
            "#,
            PENDING_COLUMNS
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(device_id)
        .bind(cols.change_type)
        .bind(cols.variant)
        .bind(cols.channel_index)
        .bind(cols.field_path)
        .bind(&value_json)
        .bind(&original_json)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(device_id = %device_id, key = %key, "Upserted pending change");

        row.into_change()
    }

    async fn clear(&self, device_id: &str, key: &ChangeKey) -> Result<bool> {
        let cols = key.columns();

        let result = sqlx::query(
            r#"
            DELETE FROM pending_changes
            WHERE device_id = ? AND change_type = ? AND variant = ?
              AND channel_index = ? AND field_path = ?
            "#,
        )
        .bind(device_id)
        .bind(cols.change_type)
        .bind(cols.variant)
        .bind(cols.channel_index)
        .bind(cols.field_path)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear_all(&self, device_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM pending_changes WHERE device_id = ?")
            .bind(device_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn clear_for_leaf(&self, device_id: &str, leaf: LeafKey) -> Result<u64> {
        let whole = ChangeKey::whole(leaf);
        let cols = whole.columns();

        let result = sqlx::query(
            r#"
            DELETE FROM pending_changes
            WHERE device_id = ? AND change_type = ? AND variant = ? AND channel_index = ?
            "#,
        )
        .bind(device_id)
        .bind(cols.change_type)
        .bind(cols.variant)
        .bind(cols.channel_index)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn has_changes_for_leaf(&self, device_id: &str, leaf: LeafKey) -> Result<bool> {
        let whole = ChangeKey::whole(leaf);
        let cols = whole.columns();

        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT 1 FROM pending_changes
            WHERE device_id = ? AND change_type = ? AND variant = ? AND channel_index = ?
            LIMIT 1
            "#,
        )
        .bind(device_id)
        .bind(cols.change_type)
        .bind(cols.variant)
        .bind(cols.channel_index)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn set_conflict(&self, device_id: &str, key: &ChangeKey, remote_value: &Value) -> Result<bool> {
        let cols = key.columns();
        let remote_json = serde_json::to_string(remote_value)?;

        let result = sqlx::query(
            r#"
            UPDATE pending_changes
            SET has_conflict = 1, remote_value = ?, updated_at = ?
            WHERE device_id = ? AND change_type = ? AND variant = ?
              AND channel_index = ? AND field_path = ?
            "#,
        )
        .bind(&remote_json)
        .bind(timestamp())
        .bind(device_id)
        .bind(cols.change_type)
        .bind(cols.variant)
        .bind(cols.channel_index)
        .bind(cols.field_path)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear_conflict(&self, device_id: &str, key: &ChangeKey) -> Result<bool> {
        let cols = key.columns();

        let result = sqlx::query(
            r#"
            UPDATE pending_changes
            SET has_conflict = 0, remote_value = NULL, updated_at = ?
            WHERE device_id = ? AND change_type = ? AND variant = ?
              AND channel_index = ? AND field_path = ?
            "#,
        )
        .bind(timestamp())
        .bind(device_id)
        .bind(cols.change_type)
        .bind(cols.variant)
        .bind(cols.channel_index)
        .bind(cols.field_path)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_conflicts(&self, device_id: &str) -> Result<Vec<PendingChange>> {
        self.fetch_where("AND has_conflict = 1", device_id).await
    }

    async fn has_conflicts(&self, device_id: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM pending_changes WHERE device_id = ? AND has_conflict = 1 LIMIT 1",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn clear_conflicted(&self, device_id: &str) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM pending_changes WHERE device_id = ? AND has_conflict = 1")
                .bind(device_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    async fn clear_all_conflicts(&self, device_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE pending_changes
            SET has_conflict = 0, remote_value = NULL, updated_at = ?
            WHERE device_id = ? AND has_conflict = 1
            "#,
        )
        .bind(timestamp())
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct PendingChangeRow {
    id: String,
    device_id: String,
    change_type: String,
    variant: String,
    channel_index: i64,
    field_path: String,
    value: String,
    original_value: Option<String>,
    has_conflict: i64,
    remote_value: Option<String>,
    created_at: String,
    updated_at: String,
}

impl PendingChangeRow {
    fn into_change(self) -> Result<PendingChange> {
        let key = ChangeKey::from_columns(
            &self.change_type,
            &self.variant,
            self.channel_index,
            &self.field_path,
        )?;

        let original_value = self
            .original_value
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let remote_value = self
            .remote_value
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(PendingChange {
            id: self.id,
            device_id: self.device_id,
            key,
            value: serde_json::from_str(&self.value)?,
            original_value,
            has_conflict: self.has_conflict != 0,
            remote_value,
            created_at: DateTime::parse_from_rfc3339(&self.created_at)?.with_timezone(&Utc),
            updated_at: DateTime::parse_from_rfc3339(&self.updated_at)?.with_timezone(&Utc),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;
    use crate::leaf::{ChannelIndex, ConfigVariant, ModuleConfigVariant};
    use serde_json::json;

    async fn setup_store() -> SqlitePendingChangeStore {
        let pool = create_memory_pool().await.unwrap();
        SqlitePendingChangeStore::new(pool)
    }

    fn lora(field: &str) -> ChangeKey {
        ChangeKey::field(LeafKey::Config(ConfigVariant::Lora), field)
    }

    #[tokio::test]
    async fn test_upsert_preserves_original_value() {
        let store = setup_store().await;
        let key = lora("region");

        let first = store.upsert("node-1", &key, &json!(3), Some(&json!(0))).await.unwrap();
        assert_eq!(first.original_value, Some(json!(0)));
        assert!(!first.has_conflict);

        let second = store.upsert("node-1", &key, &json!(5), Some(&json!(3))).await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.value, json!(5));
        assert_eq!(second.original_value, Some(json!(0)));
        assert_eq!(second.created_at, first.created_at);

        assert_eq!(store.list("node-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_components_are_unique() {
        let store = setup_store().await;
        let user = ChangeKey::whole(LeafKey::User);

        store.upsert("node-1", &user, &json!({"longName": "A"}), None).await.unwrap();
        store.upsert("node-1", &user, &json!({"longName": "B"}), None).await.unwrap();

        let rows = store.list("node-1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, json!({"longName": "B"}));
        assert_eq!(rows[0].original_value, None);
    }

    #[tokio::test]
    async fn test_leaf_scoped_list_clear_and_exists() {
        let store = setup_store().await;
        let channel = LeafKey::Channel(ChannelIndex::new(1).unwrap());
        let mqtt = LeafKey::ModuleConfig(ModuleConfigVariant::Mqtt);

        store.upsert("node-1", &ChangeKey::field(channel, "name"), &json!("Ops"), None).await.unwrap();
        store.upsert("node-1", &ChangeKey::field(channel, "psk"), &json!([1, 2]), None).await.unwrap();
        store.upsert("node-1", &ChangeKey::field(mqtt, "enabled"), &json!(true), Some(&json!(false))).await.unwrap();
        store.upsert("node-2", &ChangeKey::field(channel, "name"), &json!("Other"), None).await.unwrap();

        let rows = store.list_for_leaf("node-1", channel).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].field_path(), Some("name"));
        assert_eq!(rows[1].field_path(), Some("psk"));

        assert!(store.has_changes_for_leaf("node-1", mqtt).await.unwrap());
        assert!(!store.has_changes_for_leaf("node-2", mqtt).await.unwrap());

        assert_eq!(store.clear_for_leaf("node-1", channel).await.unwrap(), 2);
        assert_eq!(store.list("node-1").await.unwrap().len(), 1);
        assert_eq!(store.list("node-2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_conflict_flags() {
        let store = setup_store().await;
        let key = lora("region");

        store.upsert("node-1", &key, &json!(3), Some(&json!(0))).await.unwrap();
        assert!(!store.has_conflicts("node-1").await.unwrap());

        assert!(store.set_conflict("node-1", &key, &json!(5)).await.unwrap());
        let row = store.get("node-1", &key).await.unwrap().unwrap();
        assert!(row.has_conflict);
        assert_eq!(row.remote_value, Some(json!(5)));
        assert_eq!(row.value, json!(3));

        // a further local edit keeps the conflict
        store.upsert("node-1", &key, &json!(4), None).await.unwrap();
        let row = store.get("node-1", &key).await.unwrap().unwrap();
        assert!(row.has_conflict);
        assert_eq!(row.value, json!(4));

        assert!(store.clear_conflict("node-1", &key).await.unwrap());
        let row = store.get("node-1", &key).await.unwrap().unwrap();
        assert!(!row.has_conflict);
        assert_eq!(row.remote_value, None);
        assert_eq!(row.value, json!(4));
    }

    #[tokio::test]
    async fn test_conflict_on_missing_row_is_noop() {
        let store = setup_store().await;
        assert!(!store.set_conflict("node-1", &lora("region"), &json!(1)).await.unwrap());
        assert!(!store.clear_conflict("node-1", &lora("region")).await.unwrap());
        assert!(!store.clear("node-1", &lora("region")).await.unwrap());
    }

    #[tokio::test]
    async fn test_bulk_conflict_operations() {
        let store = setup_store().await;

        store.upsert("node-1", &lora("region"), &json!(3), Some(&json!(0))).await.unwrap();
        store.upsert("node-1", &lora("hopLimit"), &json!(5), Some(&json!(3))).await.unwrap();
        store.upsert("node-1", &lora("txPower"), &json!(20), Some(&json!(17))).await.unwrap();
        store.set_conflict("node-1", &lora("region"), &json!(1)).await.unwrap();
        store.set_conflict("node-1", &lora("hopLimit"), &json!(7)).await.unwrap();

        assert_eq!(store.list_conflicts("node-1").await.unwrap().len(), 2);
        assert_eq!(store.clear_all_conflicts("node-1").await.unwrap(), 2);
        assert!(!store.has_conflicts("node-1").await.unwrap());

        store.set_conflict("node-1", &lora("region"), &json!(1)).await.unwrap();
        assert_eq!(store.clear_conflicted("node-1").await.unwrap(), 1);

        let remaining: Vec<_> = store
            .list("node-1")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.key)
            .collect();
        assert_eq!(remaining, vec![lora("hopLimit"), lora("txPower")]);
    }

    #[tokio::test]
    async fn test_conflict_requires_remote_value() {
        let store = setup_store().await;
        store.upsert("node-1", &lora("region"), &json!(3), None).await.unwrap();

        let result = sqlx::query("UPDATE pending_changes SET has_conflict = 1")
            .execute(&store.pool)
            .await;
        assert!(result.is_err());
    }
}
