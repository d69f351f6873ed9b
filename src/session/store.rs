//! Pluggable key-value storage for session data
//!
//! Session components never hold their maps directly. They go through
//! [`KeyValueStore`], so retention policies can change without touching the
//! locking or trimming logic.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::conversation::ConversationKey;

/// Errors from session storage
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Storage for one kind of per-conversation value
///
/// `get` must hand back an owned copy; callers are free to mutate it.
#[async_trait]
pub trait KeyValueStore<V>: Send + Sync
where
    V: Send + 'static,
{
    async fn get(&self, key: &ConversationKey) -> Result<Option<V>, StoreError>;

    async fn set(&self, key: &ConversationKey, value: V) -> Result<(), StoreError>;

    async fn delete(&self, key: &ConversationKey) -> Result<(), StoreError>;
}

/// Process-lifetime storage backed by a hash map
pub struct InMemoryStore<V> {
    entries: Mutex<HashMap<ConversationKey, V>>,
}

impl<V> InMemoryStore<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<V> Default for InMemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> KeyValueStore<V> for InMemoryStore<V>
where
    V: Clone + Send + 'static,
{
    async fn get(&self, key: &ConversationKey) -> Result<Option<V>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &ConversationKey, value: V) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.clone(), value);
        Ok(())
    }

    async fn delete(&self, key: &ConversationKey) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Open (or create) the SQLite database used for session storage
pub async fn connect_sqlite(db_path: &Path) -> Result<SqlitePool, StoreError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;
    Ok(pool)
}

/// Open an in-memory SQLite database (single connection, lost on drop)
#[cfg(test)]
pub async fn connect_sqlite_in_memory() -> Result<SqlitePool, StoreError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    init_schema(&pool).await?;
    Ok(pool)
}

async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS session_entries (
            namespace TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (namespace, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// SQLite-backed storage; values are kept as JSON, one namespace per value kind
pub struct SqliteStore<V> {
    pool: SqlitePool,
    namespace: &'static str,
    _value: PhantomData<fn() -> V>,
}

impl<V> SqliteStore<V> {
    pub fn new(pool: SqlitePool, namespace: &'static str) -> Self {
        Self {
            pool,
            namespace,
            _value: PhantomData,
        }
    }
}

#[async_trait]
impl<V> KeyValueStore<V> for SqliteStore<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &ConversationKey) -> Result<Option<V>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT value FROM session_entries
            WHERE namespace = ? AND key = ?
            "#,
        )
        .bind(self.namespace)
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((value,)) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &ConversationKey, value: V) -> Result<(), StoreError> {
        let value = serde_json::to_string(&value)?;

        sqlx::query(
            r#"
            INSERT INTO session_entries (namespace, key, value)
            VALUES (?, ?, ?)
            ON CONFLICT (namespace, key)
            DO UPDATE SET value = excluded.value, updated_at = datetime('now')
            "#,
        )
        .bind(self.namespace)
        .bind(key.as_str())
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &ConversationKey) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM session_entries WHERE namespace = ? AND key = ?")
            .bind(self.namespace)
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
