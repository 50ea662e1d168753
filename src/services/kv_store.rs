//! Key-value collaborator behind the bundle index.
//!
//! Every entry carries a time-to-live. Expired entries are invisible to
//! `get` immediately; `purge_expired` reclaims their space.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::sync::RwLock;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum KeyValueError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("key-value backend unavailable: {0}")]
    Unavailable(String),
}

pub type KeyValueResult<T> = Result<T, KeyValueError>;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Insert or replace `key`, visible for `ttl` from now.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> KeyValueResult<()>;

    /// Fetch a live entry. Expired and missing keys both yield `None`.
    async fn get(&self, key: &str) -> KeyValueResult<Option<Vec<u8>>>;

    async fn ping(&self) -> KeyValueResult<()>;

    /// Drop expired entries, returning how many were removed.
    async fn purge_expired(&self) -> KeyValueResult<u64>;
}

/// SQLite-backed store. Expiry is stored as unix milliseconds.
#[derive(Clone)]
pub struct SqliteKvStore {
    db: Arc<SqlitePool>,
}

impl SqliteKvStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Safe to run on every start.
    pub async fn migrate(&self) -> KeyValueResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());
        for stmt in statements {
            tracing::debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }
}

fn expiry_millis(ttl: Duration) -> i64 {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_add_signed(ttl)
        .map(|t| t.timestamp_millis())
        .unwrap_or(i64::MAX)
}

#[async_trait]
impl KeyValueStore for SqliteKvStore {
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> KeyValueResult<()> {
        sqlx::query(
            "INSERT INTO kv_entries (key, value, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expiry_millis(ttl))
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> KeyValueResult<Option<Vec<u8>>> {
        let value = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT value FROM kv_entries WHERE key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(Utc::now().timestamp_millis())
        .fetch_optional(&*self.db)
        .await?;
        Ok(value)
    }

    async fn ping(&self) -> KeyValueResult<()> {
        match sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?
        {
            1 => Ok(()),
            other => Err(KeyValueError::Unavailable(format!("unexpected result: {}", other))),
        }
    }

    async fn purge_expired(&self) -> KeyValueResult<u64> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE expires_at <= ?")
            .bind(Utc::now().timestamp_millis())
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

/// In-process store with the same expiry contract, for tests and local runs.
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<RwLock<HashMap<String, (Vec<u8>, Instant)>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> KeyValueResult<()> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(u32::MAX as u64));
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value.to_vec(), expires_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> KeyValueResult<Option<Vec<u8>>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    async fn ping(&self) -> KeyValueResult<()> {
        Ok(())
    }

    async fn purge_expired(&self) -> KeyValueResult<u64> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
pub(crate) async fn memory_sqlite() -> SqliteKvStore {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = SqliteKvStore::new(Arc::new(pool));
    store.migrate().await.unwrap();
    store
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise_ttl_contract(store: &dyn KeyValueStore) {
        store
            .set("logBundles:a", b"payload", Duration::from_secs(60))
            .await
            .unwrap();
        store
            .set("logBundles:b", b"gone", Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(
            store.get("logBundles:a").await.unwrap().as_deref(),
            Some(&b"payload"[..])
        );
        assert_eq!(store.get("logBundles:b").await.unwrap(), None);
        assert_eq!(store.get("logBundles:missing").await.unwrap(), None);

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.get("logBundles:a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn memory_store_honours_ttl() {
        exercise_ttl_contract(&MemoryKvStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_store_honours_ttl() {
        let store = memory_sqlite().await;
        store.ping().await.unwrap();
        exercise_ttl_contract(&store).await;
    }

    #[tokio::test]
    async fn set_replaces_existing_value() {
        let store = memory_sqlite().await;
        let ttl = Duration::from_secs(60);
        store.set("stagedLogs:x", b"first", ttl).await.unwrap();
        store.set("stagedLogs:x", b"second", ttl).await.unwrap();
        assert_eq!(
            store.get("stagedLogs:x").await.unwrap().as_deref(),
            Some(&b"second"[..])
        );
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let store = memory_sqlite().await;
        store.migrate().await.unwrap();
    }
}
