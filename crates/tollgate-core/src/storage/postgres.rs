//! PostgreSQL datastore.
//!
//! Every collection lives in one `records` table keyed by `(collection, key)`
//! with the document in a JSONB column. The primary key makes
//! `INSERT ... ON CONFLICT DO NOTHING RETURNING` the atomic check-and-insert.

use serde_json::Value;
use sqlx::{types::Json, PgPool};

use super::{Datastore, Filter, InsertOutcome, Page};
use crate::error::{CoreError, Result};

/// Upper bound on rows returned by a single `query`.
pub const MAX_QUERY_ROWS: i64 = 10_000;

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "records table",
        r#"
        CREATE TABLE IF NOT EXISTS records (
            collection TEXT NOT NULL,
            key TEXT NOT NULL,
            data JSONB NOT NULL,
            seq BIGSERIAL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (collection, key)
        )
        "#,
    ),
    (
        "records ordering index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_records_collection_seq
        ON records (collection, seq)
        "#,
    ),
    (
        "records document index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_records_data
        ON records USING GIN (data jsonb_path_ops)
        "#,
    ),
];

/// Datastore backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgDatastore {
    pool: PgPool,
}

impl PgDatastore {
    /// Wraps an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the `records` table and its indexes if missing.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` naming the step that failed.
    pub async fn migrate(&self) -> Result<()> {
        for (step, sql) in MIGRATIONS {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| CoreError::Database(format!("migration '{step}' failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Datastore for PgDatastore {
    async fn insert_if_absent(
        &self,
        collection: &str,
        key: &str,
        record: Value,
    ) -> Result<InsertOutcome> {
        let inserted: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO records (collection, key, data)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, key) DO NOTHING
            RETURNING key
            "#,
        )
        .bind(collection)
        .bind(key)
        .bind(Json(record))
        .fetch_optional(&self.pool)
        .await?;

        Ok(if inserted.is_some() { InsertOutcome::Inserted } else { InsertOutcome::AlreadyExists })
    }

    async fn update(&self, collection: &str, key: &str, patch: Value) -> Result<bool> {
        if !patch.is_object() {
            return Err(CoreError::InvalidInput("update patch must be a JSON object".to_string()));
        }

        let result = sqlx::query(
            r#"
            UPDATE records
            SET data = data || $3, updated_at = NOW()
            WHERE collection = $1 AND key = $2
            "#,
        )
        .bind(collection)
        .bind(key)
        .bind(Json(patch))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn query(&self, collection: &str, filter: &Filter, page: Page) -> Result<Vec<Value>> {
        let limit = i64::try_from(page.limit).map_or(MAX_QUERY_ROWS, |l| l.min(MAX_QUERY_ROWS));
        let offset = i64::try_from(page.offset).unwrap_or(i64::MAX);

        let rows: Vec<Json<Value>> = sqlx::query_scalar(
            r#"
            SELECT data FROM records
            WHERE collection = $1 AND data @> $2
            ORDER BY seq ASC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(collection)
        .bind(Json(Value::Object(filter.clone())))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|Json(data)| data).collect())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        let row: Option<Json<Value>> =
            sqlx::query_scalar("SELECT data FROM records WHERE collection = $1 AND key = $2")
                .bind(collection)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|Json(data)| data))
    }

    async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
