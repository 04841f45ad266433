//! SQLite storage for base and working leaf hashes

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use super::HashStore;
use crate::error::Result;
use crate::leaf::{HashSnapshot, LeafKey};

/// Which hash table a store reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashTable {
    Base,
    Working,
}

impl HashTable {
    fn name(&self) -> &'static str {
        match self {
            HashTable::Base => "base_hashes",
            HashTable::Working => "working_hashes",
        }
    }
}

/// Repository for leaf hash persistence
#[derive(Clone)]
pub struct SqliteHashStore {
    pool: SqlitePool,
    table: HashTable,
}

impl SqliteHashStore {
    pub fn new(pool: SqlitePool, table: HashTable) -> Self {
        Self { pool, table }
    }

    /// Store for hashes last confirmed from the device
    pub fn base(pool: SqlitePool) -> Self {
        Self::new(pool, HashTable::Base)
    }

    /// Store for hashes including unsaved local edits
    pub fn working(pool: SqlitePool) -> Self {
        Self::new(pool, HashTable::Working)
    }

    pub fn table(&self) -> HashTable {
        self.table
    }

    fn upsert_sql(&self) -> String {
        format!(
            r#"
            INSERT INTO {} (device_id, leaf_key, hash, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(device_id, leaf_key) DO UPDATE SET
                hash = excluded.hash,
                updated_at = excluded.updated_at
            "#,
            self.table.name()
        )
    }
}

#[async_trait]
impl HashStore for SqliteHashStore {
    async fn get_all(&self, device_id: &str) -> Result<HashSnapshot> {
        let rows: Vec<(String, String)> = sqlx::query_as(&format!(
            "SELECT leaf_key, hash FROM {} WHERE device_id = ?",
            self.table.name()
        ))
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshot = HashSnapshot::new();
        for (leaf_key, digest) in rows {
            match leaf_key.parse::<LeafKey>() {
                Ok(key) => {
                    snapshot.insert(key, digest);
                }
                Err(e) => {
                    tracing::warn!(
                        device_id = %device_id,
                        table = self.table.name(),
                        error = %e,
                        "Skipping unknown leaf key"
                    );
                }
            }
        }

        Ok(snapshot)
    }

    async fn get(&self, device_id: &str, leaf: LeafKey) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(&format!(
            "SELECT hash FROM {} WHERE device_id = ? AND leaf_key = ?",
            self.table.name()
        ))
        .bind(device_id)
        .bind(leaf.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(digest,)| digest))
    }

    async fn upsert_all(&self, device_id: &str, snapshot: &HashSnapshot) -> Result<()> {
        let sql = self.upsert_sql();
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;
        for (key, digest) in snapshot.iter() {
            sqlx::query(&sql)
                .bind(device_id)
                .bind(key.to_string())
                .bind(digest)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        tracing::debug!(
            device_id = %device_id,
            table = self.table.name(),
            leaves = snapshot.len(),
            "Upserted leaf hashes"
        );

        Ok(())
    }

    async fn upsert(&self, device_id: &str, leaf: LeafKey, digest: &str) -> Result<()> {
        sqlx::query(&self.upsert_sql())
            .bind(device_id)
            .bind(leaf.to_string())
            .bind(digest)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete_all(&self, device_id: &str) -> Result<u64> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE device_id = ?",
            self.table.name()
        ))
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete(&self, device_id: &str, leaf: LeafKey) -> Result<bool> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE device_id = ? AND leaf_key = ?",
            self.table.name()
        ))
        .bind(device_id)
        .bind(leaf.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn exists(&self, device_id: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(&format!(
            "SELECT 1 FROM {} WHERE device_id = ? LIMIT 1",
            self.table.name()
        ))
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn is_complete(&self, device_id: &str) -> Result<bool> {
        // Rows with unknown leaf keys do not count towards completeness
        Ok(self.get_all(device_id).await?.is_complete())
    }

    async fn initialize_from_base(&self, device_id: &str, base: &HashSnapshot) -> Result<()> {
        let sql = self.upsert_sql();
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "DELETE FROM {} WHERE device_id = ?",
            self.table.name()
        ))
        .bind(device_id)
        .execute(&mut *tx)
        .await?;

        for (key, digest) in base.iter() {
            sqlx::query(&sql)
                .bind(device_id)
                .bind(key.to_string())
                .bind(digest)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        tracing::debug!(
            device_id = %device_id,
            table = self.table.name(),
            "Initialized leaf hashes from base"
        );

        Ok(())
    }
}
