use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, PoisonError},
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use shared::domain::{NodeId, NodeStateEntry, StateKey, StateValue};

/// Authoritative node state, one row per `(node_id, state_key)`.
///
/// Writes for the same key are serialized through a fair per-key lock, so they
/// land in the order callers reached the store. Different keys never contend.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
    locks: Arc<KeyLocks>,
}

#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub entry: NodeStateEntry,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct KeyLocks {
    inner: std::sync::Mutex<HashMap<(NodeId, StateKey), Arc<Mutex<()>>>>,
}

impl KeyLocks {
    async fn acquire(&self, node_id: &NodeId, state_key: StateKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            guard
                .entry((node_id.clone(), state_key))
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drops the node's idle locks. A lock that is held or awaited stays, so
    /// queued writers and newcomers keep sharing one FIFO queue.
    fn forget(&self, node_id: &NodeId) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.retain(|(id, _), lock| id != node_id || Arc::strong_count(lock) > 1);
    }
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to an in-memory database opens its own empty copy,
        // so those pools are pinned to a single connection that never idles out.
        let pool_options = if is_memory_url(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(connect_options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            locks: Arc::new(KeyLocks::default()),
        })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Latest value for the key. A key the node never wrote reads as its
    /// default at version 0, and a removed key as its default at the
    /// tombstone version.
    pub async fn get(&self, node_id: &NodeId, state_key: StateKey) -> Result<NodeStateEntry> {
        let row = sqlx::query(
            "SELECT counter_value, text_value, version FROM node_state
             WHERE node_id = ? AND state_key = ?",
        )
        .bind(node_id.as_str())
        .bind(state_key.as_str())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to read {state_key} for node {node_id}"))?;

        if let Some(row) = row {
            return entry_from_row(node_id.clone(), state_key, &row);
        }

        let tombstone: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM node_state_tombstone WHERE node_id = ? AND state_key = ?",
        )
        .bind(node_id.as_str())
        .bind(state_key.as_str())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to read tombstone for {state_key} of node {node_id}"))?;
        let mut entry = NodeStateEntry::uninitialized(node_id.clone(), state_key);
        entry.version = tombstone.unwrap_or_default() as u64;
        Ok(entry)
    }

    /// Last-write-wins overwrite. Returns the new version.
    pub async fn set(&self, node_id: &NodeId, value: StateValue) -> Result<u64> {
        let state_key = value.key();
        let _guard = self.locks.acquire(node_id, state_key).await;
        self.write_locked(node_id, &value).await
    }

    /// Read-modify-write of a counter under the key lock. `step` sees the
    /// current value and is invoked exactly once.
    pub async fn update_counter<F>(&self, node_id: &NodeId, step: F) -> Result<NodeStateEntry>
    where
        F: FnOnce(u32) -> u32,
    {
        let _guard = self.locks.acquire(node_id, StateKey::Counter).await;
        let current = self
            .get(node_id, StateKey::Counter)
            .await?
            .value
            .as_counter()
            .ok_or_else(|| anyhow!("counter entry for node {node_id} holds text"))?;
        let next = StateValue::Counter(step(current));
        let version = self.write_locked(node_id, &next).await?;
        Ok(NodeStateEntry {
            node_id: node_id.clone(),
            state_key: StateKey::Counter,
            value: next,
            version,
        })
    }

    /// Drops every entry owned by the node, leaving a tombstone one version
    /// past the last write. Returns the reset entries, one per removed key.
    pub async fn remove_node(&self, node_id: &NodeId) -> Result<Vec<NodeStateEntry>> {
        let mut guards = Vec::with_capacity(StateKey::ALL.len());
        for state_key in StateKey::ALL {
            guards.push(self.locks.acquire(node_id, state_key).await);
        }

        let removed = self.tombstone_locked(node_id).await;
        drop(guards);
        self.locks.forget(node_id);
        removed
    }

    pub async fn list_node_entries(&self, node_id: &NodeId) -> Result<Vec<StoredEntry>> {
        let rows = sqlx::query(
            "SELECT state_key, counter_value, text_value, version, updated_at FROM node_state
             WHERE node_id = ?
             ORDER BY state_key",
        )
        .bind(node_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let state_key = StateKey::from_str(&row.try_get::<String, _>("state_key")?)?;
                Ok(StoredEntry {
                    entry: entry_from_row(node_id.clone(), state_key, row)?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }

    async fn tombstone_locked(&self, node_id: &NodeId) -> Result<Vec<NodeStateEntry>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin node removal")?;
        let rows = sqlx::query(
            "INSERT INTO node_state_tombstone (node_id, state_key, version)
             SELECT node_id, state_key, version + 1 FROM node_state WHERE node_id = ?
             ON CONFLICT(node_id, state_key) DO UPDATE SET version = excluded.version
             RETURNING state_key, version",
        )
        .bind(node_id.as_str())
        .fetch_all(&mut *tx)
        .await
        .with_context(|| format!("failed to tombstone state for node {node_id}"))?;
        sqlx::query("DELETE FROM node_state WHERE node_id = ?")
            .bind(node_id.as_str())
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to remove state for node {node_id}"))?;
        tx.commit()
            .await
            .with_context(|| format!("failed to commit removal of node {node_id}"))?;

        let mut removed = rows
            .iter()
            .map(|row| {
                let state_key = StateKey::from_str(&row.try_get::<String, _>("state_key")?)?;
                let version: i64 = row.try_get("version")?;
                let mut entry = NodeStateEntry::uninitialized(node_id.clone(), state_key);
                entry.version = version as u64;
                Ok(entry)
            })
            .collect::<Result<Vec<_>>>()?;
        removed.sort_by_key(|entry| entry.state_key.as_str());
        debug!(node_id = %node_id, removed = removed.len(), "node state tombstoned");
        Ok(removed)
    }

    async fn write_locked(&self, node_id: &NodeId, value: &StateValue) -> Result<u64> {
        let (counter_value, text_value) = match value {
            StateValue::Counter(counter) => (Some(i64::from(*counter)), None),
            StateValue::Text(text) => (None, Some(text.as_str())),
        };
        let state_key = value.key();
        let version: i64 = sqlx::query_scalar(
            "INSERT INTO node_state (node_id, state_key, counter_value, text_value, version, updated_at)
             VALUES (?, ?, ?, ?,
                     COALESCE((SELECT version FROM node_state_tombstone
                               WHERE node_id = ? AND state_key = ?), 0) + 1,
                     ?)
             ON CONFLICT(node_id, state_key) DO UPDATE SET
                counter_value = excluded.counter_value,
                text_value = excluded.text_value,
                version = node_state.version + 1,
                updated_at = excluded.updated_at
             RETURNING version",
        )
        .bind(node_id.as_str())
        .bind(state_key.as_str())
        .bind(counter_value)
        .bind(text_value)
        .bind(node_id.as_str())
        .bind(state_key.as_str())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to write {state_key} for node {node_id}"))?;

        debug!(node_id = %node_id, %state_key, version, "state entry written");
        Ok(version as u64)
    }
}

fn entry_from_row(node_id: NodeId, state_key: StateKey, row: &SqliteRow) -> Result<NodeStateEntry> {
    let value = match state_key {
        StateKey::Counter => {
            let raw: Option<i64> = row.try_get("counter_value")?;
            StateValue::Counter(shared::domain::clamp_counter(raw.unwrap_or_default()))
        }
        StateKey::CacheText => {
            let raw: Option<String> = row.try_get("text_value")?;
            StateValue::Text(raw.unwrap_or_default())
        }
    };
    let version: i64 = row.try_get("version")?;
    Ok(NodeStateEntry {
        node_id,
        state_key,
        value,
        version: version as u64,
    })
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
