//! SQLite key-value backend
//!
//! Keys are scoped by origin so several host sites can share one database
//! file without seeing each other's staged records.

use super::KeyValueStore;
use crate::Result;
use futures::future::{BoxFuture, FutureExt};
use sqlx::SqlitePool;
use std::path::Path;

/// Origin-scoped store persisted in a SQLite table
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    origin: String,
}

impl SqliteStore {
    /// Open (or create) the database file and ensure the table exists
    pub async fn open(db_path: &Path, origin: &str) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // mode=rwc: read, write, create
        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        tracing::debug!("Connecting to staging database: {}", db_url);

        let pool = SqlitePool::connect(&db_url).await?;
        Self::from_pool(pool, origin).await
    }

    /// Use an existing pool (e.g. `sqlite::memory:` in tests)
    pub async fn from_pool(pool: SqlitePool, origin: &str) -> Result<Self> {
        init_tables(&pool).await?;
        Ok(Self {
            pool,
            origin: origin.to_string(),
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }
}

async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS staging_store (
            origin TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (origin, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

impl KeyValueStore for SqliteStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        async move {
            let value: Option<String> = sqlx::query_scalar(
                "SELECT value FROM staging_store WHERE origin = ? AND key = ?",
            )
            .bind(&self.origin)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
            Ok(value)
        }
        .boxed()
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>> {
        async move {
            sqlx::query(
                r#"
                INSERT INTO staging_store (origin, key, value, updated_at)
                VALUES (?, ?, ?, CURRENT_TIMESTAMP)
                ON CONFLICT(origin, key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&self.origin)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
            Ok(())
        }
        .boxed()
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            sqlx::query("DELETE FROM staging_store WHERE origin = ? AND key = ?")
                .bind(&self.origin)
                .bind(key)
                .execute(&self.pool)
                .await?;
            Ok(())
        }
        .boxed()
    }

    fn keys<'a>(&'a self) -> BoxFuture<'a, Result<Vec<String>>> {
        async move {
            let keys: Vec<String> =
                sqlx::query_scalar("SELECT key FROM staging_store WHERE origin = ? ORDER BY key")
                    .bind(&self.origin)
                    .fetch_all(&self.pool)
                    .await?;
            Ok(keys)
        }
        .boxed()
    }
}
