//! Flat key/value persistence for assignment state.
//!
//! Every piece of assignment state lives under a `{assignment_id}-{suffix}`
//! key holding one JSON document. The Postgres backend keeps them in the
//! `kv_entries` table; the in-memory backend exists for tests and needs no
//! database.

use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::Mutex;

pub mod assignments;

#[derive(Clone)]
pub enum KvStore {
    Postgres(PgPool),
    Memory(Arc<Mutex<HashMap<String, Value>>>),
}

impl KvStore {
    pub fn postgres(pool: PgPool) -> Self {
        KvStore::Postgres(pool)
    }

    pub fn memory() -> Self {
        KvStore::Memory(Arc::new(Mutex::new(HashMap::new())))
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        match self {
            KvStore::Postgres(pool) => {
                let value = sqlx::query_scalar::<_, Value>(
                    "SELECT value FROM kv_entries WHERE store_key = $1",
                )
                .bind(key)
                .fetch_optional(pool)
                .await
                .with_context(|| format!("failed to read store key {key}"))?;
                Ok(value)
            }
            KvStore::Memory(map) => Ok(map.lock().await.get(key).cloned()),
        }
    }

    pub async fn put(&self, key: &str, value: Value) -> Result<()> {
        match self {
            KvStore::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO kv_entries (store_key, value) VALUES ($1, $2)
                     ON CONFLICT (store_key) DO UPDATE SET value = $2, updated_at = NOW()",
                )
                .bind(key)
                .bind(&value)
                .execute(pool)
                .await
                .with_context(|| format!("failed to write store key {key}"))?;
                Ok(())
            }
            KvStore::Memory(map) => {
                map.lock().await.insert(key.to_string(), value);
                Ok(())
            }
        }
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        match self {
            KvStore::Postgres(pool) => {
                sqlx::query("DELETE FROM kv_entries WHERE store_key = $1")
                    .bind(key)
                    .execute(pool)
                    .await
                    .with_context(|| format!("failed to delete store key {key}"))?;
                Ok(())
            }
            KvStore::Memory(map) => {
                map.lock().await.remove(key);
                Ok(())
            }
        }
    }

    /// Deletes every key under the given prefix. Used to drop an assignment
    /// and all of its satellite entries in one sweep.
    pub async fn remove_prefix(&self, prefix: &str) -> Result<()> {
        match self {
            KvStore::Postgres(pool) => {
                let pattern = format!("{}%", like_escape(prefix));
                sqlx::query("DELETE FROM kv_entries WHERE store_key LIKE $1")
                    .bind(pattern)
                    .execute(pool)
                    .await
                    .with_context(|| format!("failed to delete store prefix {prefix}"))?;
                Ok(())
            }
            KvStore::Memory(map) => {
                map.lock().await.retain(|key, _| !key.starts_with(prefix));
                Ok(())
            }
        }
    }

    pub async fn keys_with_suffix(&self, suffix: &str) -> Result<Vec<String>> {
        match self {
            KvStore::Postgres(pool) => {
                let pattern = format!("%{}", like_escape(suffix));
                let keys = sqlx::query_scalar::<_, String>(
                    "SELECT store_key FROM kv_entries WHERE store_key LIKE $1",
                )
                .bind(pattern)
                .fetch_all(pool)
                .await
                .with_context(|| format!("failed to scan store keys ending in {suffix}"))?;
                Ok(keys)
            }
            KvStore::Memory(map) => Ok(map
                .lock()
                .await
                .keys()
                .filter(|key| key.ends_with(suffix))
                .cloned()
                .collect()),
        }
    }
}

fn like_escape(fragment: &str) -> String {
    fragment
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_round_trips_values() {
        let store = KvStore::memory();
        assert!(store.get("asg-1-name").await.unwrap().is_none());

        store.put("asg-1-name", json!("Biology quiz")).await.unwrap();
        assert_eq!(
            store.get("asg-1-name").await.unwrap(),
            Some(json!("Biology quiz"))
        );

        store.put("asg-1-name", json!("Renamed")).await.unwrap();
        assert_eq!(
            store.get("asg-1-name").await.unwrap(),
            Some(json!("Renamed"))
        );

        store.remove("asg-1-name").await.unwrap();
        assert!(store.get("asg-1-name").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn prefix_removal_only_touches_the_prefix() {
        let store = KvStore::memory();
        store.put("asg-1-name", json!("a")).await.unwrap();
        store.put("asg-1-questions", json!([])).await.unwrap();
        store.put("asg-10-name", json!("b")).await.unwrap();

        store.remove_prefix("asg-1-").await.unwrap();
        assert!(store.get("asg-1-name").await.unwrap().is_none());
        assert!(store.get("asg-1-questions").await.unwrap().is_none());
        assert!(store.get("asg-10-name").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn suffix_scan_finds_matching_keys() {
        let store = KvStore::memory();
        store.put("asg-1-name", json!("a")).await.unwrap();
        store.put("asg-2-name", json!("b")).await.unwrap();
        store.put("asg-2-results", json!({})).await.unwrap();

        let mut keys = store.keys_with_suffix("-name").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["asg-1-name", "asg-2-name"]);
    }

    #[test]
    fn like_patterns_are_escaped() {
        assert_eq!(like_escape("100%_done"), "100\\%\\_done");
    }
}
