//! PostgreSQL storage for the records table.

use async_trait::async_trait;
use gridsync_engine::{Fields, Record, RecordSchema};
use sqlx::types::Json;
use sqlx::Row;

use super::{fields_from_payload, merge_patch, Pool, RecordChange, RecordRepository};
use crate::error::Result;

/// A stored record row from the database.
#[derive(Debug)]
pub struct StoredRecord {
    pub id: i64,
    pub payload: serde_json::Value,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredRecord {
            id: row.try_get("id")?,
            payload: row.try_get("payload")?,
        })
    }
}

impl StoredRecord {
    /// Convert a database row to an engine record.
    pub fn into_record(self) -> Record {
        Record::new(self.id, fields_from_payload(self.payload))
    }
}

/// Repository over the `records` table, scoped to one collection.
#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: Pool,
    collection: String,
}

impl PgRepository {
    pub fn new(pool: Pool, collection: impl Into<String>) -> Self {
        Self {
            pool,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

#[async_trait]
impl RecordRepository for PgRepository {
    async fn list(&self) -> Result<Vec<Record>> {
        let rows = sqlx::query_as::<_, StoredRecord>(
            r#"
            SELECT id, payload
            FROM records
            WHERE collection = $1
            ORDER BY id
            "#,
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StoredRecord::into_record).collect())
    }

    async fn insert(&self, fields: &Fields) -> Result<Record> {
        let row = sqlx::query_as::<_, StoredRecord>(
            r#"
            INSERT INTO records (collection, payload)
            VALUES ($1, $2)
            RETURNING id, payload
            "#,
        )
        .bind(&self.collection)
        .bind(Json(fields))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_record())
    }

    async fn update(
        &self,
        id: i64,
        patch: &Fields,
        schema: &RecordSchema,
    ) -> Result<Option<RecordChange>> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, StoredRecord>(
            r#"
            SELECT id, payload
            FROM records
            WHERE collection = $1 AND id = $2
            FOR UPDATE
            "#,
        )
        .bind(&self.collection)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            return Ok(None);
        };
        let old = current.into_record();
        let merged = merge_patch(&old.fields, patch, schema)?;

        let row = sqlx::query_as::<_, StoredRecord>(
            r#"
            UPDATE records
            SET payload = $3, updated_at = now()
            WHERE collection = $1 AND id = $2
            RETURNING id, payload
            "#,
        )
        .bind(&self.collection)
        .bind(id)
        .bind(Json(&merged))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(RecordChange {
            old,
            new: row.into_record(),
        }))
    }

    async fn delete(&self, id: i64) -> Result<Option<Record>> {
        let row = sqlx::query_as::<_, StoredRecord>(
            r#"
            DELETE FROM records
            WHERE collection = $1 AND id = $2
            RETURNING id, payload
            "#,
        )
        .bind(&self.collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(StoredRecord::into_record))
    }
}
