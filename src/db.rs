use crate::kv::KvStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{query, Executor, Row, SqlitePool};

pub const DB_CONN: &str = "sqlite::memory:";

/// Key-value table in SQLite, for clients that keep history on disk.
pub struct SqliteKv {
    connection: SqlitePool,
}
impl SqliteKv {
    pub async fn new(db_conn: Option<&str>) -> Result<Self> {
        let url = db_conn.unwrap_or(DB_CONN);
        // A single connection keeps every query on the same in-memory database.
        let connection = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .with_context(|| format!("couldn't open {}", url))?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS kv (\
                key TEXT PRIMARY KEY,\
                value TEXT NOT NULL\
                )",
            )
            .await?;
        Ok(Self { connection })
    }
}
#[async_trait]
impl KvStore for SqliteKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = self
            .connection
            .fetch_optional(query("SELECT value FROM kv WHERE key = ?").bind(key))
            .await
            .with_context(|| format!("couldn't read {}", key))?;
        Ok(row.map(|row| row.get("value")))
    }
    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.connection
            .execute(
                query(
                    "INSERT INTO kv (key, value) VALUES (?, ?) \
                ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                )
                .bind(key)
                .bind(value),
            )
            .await
            .with_context(|| format!("couldn't write {}", key))?;
        Ok(())
    }
    async fn remove(&self, key: &str) -> Result<()> {
        self.connection
            .execute(query("DELETE FROM kv WHERE key = ?").bind(key))
            .await?;
        Ok(())
    }
}
