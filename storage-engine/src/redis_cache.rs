use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recall::domain::{BackendCounts, EntryRecord};
use recall::ports::ContextBackend;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use shared::{BackendKind, Error, Result};
use tracing::debug;

use crate::codec;

const KEY_PREFIX: &str = "recall";

/// Networked backend over a shared redis instance, for contexts that
/// multiple processes read and write.
///
/// Expiry is delegated to the server: entries are written with `PSETEX`
/// so redis drops them on its own clock and `purge_expired` has nothing
/// to do. Keys are laid out as `recall:<namespace>:<key>`; the namespace
/// charset cannot contain `:` or glob characters, which keeps both the
/// layout and the scan patterns unambiguous.
pub struct RedisBackend {
    manager: ConnectionManager,
}

impl RedisBackend {
    pub async fn open(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| {
            Error::InvalidArgument(format!("Failed to parse redis url '{}': {}", url, e))
        })?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Unavailable(format!("Failed to connect to redis: {}", e)))?;
        debug!("redis backend connected to {}", url);
        Ok(Self { manager })
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        let mut iter: redis::AsyncIter<'_, String> = conn
            .scan_match(pattern)
            .await
            .map_err(|e| Error::Unavailable(format!("Failed to scan keys: {}", e)))?;

        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }
}

fn scoped(namespace: &str, key: &str) -> String {
    format!("{}:{}:{}", KEY_PREFIX, namespace, key)
}

fn namespace_pattern(namespace: &str) -> String {
    format!("{}:{}:*", KEY_PREFIX, namespace)
}

/// Key part of a scoped redis key. Keys may themselves contain `:`, so
/// only the first two separators are structural.
fn key_part(redis_key: &str) -> Option<&str> {
    redis_key.splitn(3, ':').nth(2)
}

fn namespace_part(redis_key: &str) -> Option<&str> {
    redis_key.splitn(3, ':').nth(1)
}

#[async_trait]
impl ContextBackend for RedisBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Redis
    }

    async fn put(&self, namespace: &str, key: &str, record: EntryRecord) -> Result<()> {
        let redis_key = scoped(namespace, key);
        let value = codec::to_json(&record)?;
        let mut conn = self.manager.clone();

        match record.expires_at {
            Some(at) => {
                // PSETEX rejects non-positive TTLs; an already-expired
                // record still lands, then vanishes a moment later.
                let ttl_ms = (at - Utc::now()).num_milliseconds().max(1) as u64;
                let _: () = conn
                    .pset_ex(&redis_key, value, ttl_ms)
                    .await
                    .map_err(|e| Error::Unavailable(format!("Failed to write entry: {}", e)))?;
            }
            None => {
                let _: () = conn
                    .set(&redis_key, value)
                    .await
                    .map_err(|e| Error::Unavailable(format!("Failed to write entry: {}", e)))?;
            }
        }
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<EntryRecord>> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn
            .get(scoped(namespace, key))
            .await
            .map_err(|e| Error::Unavailable(format!("Failed to read entry: {}", e)))?;
        raw.as_deref().map(codec::from_json).transpose()
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let removed: i64 = conn
            .del(scoped(namespace, key))
            .await
            .map_err(|e| Error::Unavailable(format!("Failed to delete entry: {}", e)))?;
        Ok(removed > 0)
    }

    async fn list_keys(&self, namespace: &str, now: DateTime<Utc>) -> Result<Vec<String>> {
        // Server-side expiry can lag the stored deadline by a moment, so
        // filter on the deadline rather than trusting the scan alone.
        let entries = self.snapshot(namespace).await?;
        Ok(entries
            .into_iter()
            .filter(|(_, record)| !record.is_expired_at(now))
            .map(|(key, _)| key)
            .collect())
    }

    async fn snapshot(&self, namespace: &str) -> Result<Vec<(String, EntryRecord)>> {
        let redis_keys = self.keys_matching(&namespace_pattern(namespace)).await?;
        if redis_keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.manager.clone();
        let values: Vec<Option<String>> = conn
            .mget(&redis_keys)
            .await
            .map_err(|e| Error::Unavailable(format!("Failed to read namespace: {}", e)))?;

        let mut entries = Vec::with_capacity(values.len());
        for (redis_key, raw) in redis_keys.iter().zip(values) {
            // A key can expire between the scan and the fetch.
            let (Some(key), Some(raw)) = (key_part(redis_key), raw) else {
                continue;
            };
            entries.push((key.to_string(), codec::from_json(&raw)?));
        }
        Ok(entries)
    }

    async fn clear(&self, namespace: &str) -> Result<u64> {
        let redis_keys = self.keys_matching(&namespace_pattern(namespace)).await?;
        if redis_keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.manager.clone();
        let removed: i64 = conn
            .del(&redis_keys)
            .await
            .map_err(|e| Error::Unavailable(format!("Failed to clear namespace: {}", e)))?;
        Ok(removed as u64)
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64> {
        // Native TTLs mean there is never anything to purge client-side.
        Ok(0)
    }

    async fn count(&self, _now: DateTime<Utc>) -> Result<BackendCounts> {
        let redis_keys = self
            .keys_matching(&format!("{}:*", KEY_PREFIX))
            .await?;

        let mut namespaces = HashSet::new();
        for redis_key in &redis_keys {
            if let Some(namespace) = namespace_part(redis_key) {
                namespaces.insert(namespace.to_string());
            }
        }
        Ok(BackendCounts {
            entries: redis_keys.len() as u64,
            namespaces: namespaces.len() as u64,
        })
    }
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Duration;
    use std::time::Duration as StdDuration;

    fn server_url() -> String {
        std::env::var("RECALL_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    fn test_namespace(tag: &str) -> String {
        format!(
            "it-{}-{}-{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_millis()
        )
    }

    fn live_record(value: &str) -> EntryRecord {
        EntryRecord::new(Bytes::from(format!("\"{}\"", value)), None)
    }

    #[test]
    fn test_scoped_keys_parse_back() {
        let redis_key = scoped("pipeline", "step:one");
        assert_eq!(redis_key, "recall:pipeline:step:one");
        assert_eq!(namespace_part(&redis_key), Some("pipeline"));
        assert_eq!(key_part(&redis_key), Some("step:one"));
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn test_redis_put_and_get() {
        let backend = RedisBackend::open(&server_url()).await.unwrap();
        let ns = test_namespace("roundtrip");

        backend.put(&ns, "greeting", live_record("hello")).await.unwrap();
        let record = backend.get(&ns, "greeting").await.unwrap().unwrap();
        assert_eq!(record.payload, Bytes::from_static(b"\"hello\""));
        assert!(backend.get(&ns, "missing").await.unwrap().is_none());

        backend.clear(&ns).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn test_redis_native_ttl_drops_entries() {
        let backend = RedisBackend::open(&server_url()).await.unwrap();
        let ns = test_namespace("ttl");

        let record = EntryRecord::new(
            Bytes::from_static(b"\"soon gone\""),
            Some(Utc::now() + Duration::milliseconds(150)),
        );
        backend.put(&ns, "short", record).await.unwrap();
        assert!(backend.get(&ns, "short").await.unwrap().is_some());

        tokio::time::sleep(StdDuration::from_millis(400)).await;
        assert!(backend.get(&ns, "short").await.unwrap().is_none());
        assert!(backend.list_keys(&ns, Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn test_redis_clear_is_scoped_to_namespace() {
        let backend = RedisBackend::open(&server_url()).await.unwrap();
        let ns_a = test_namespace("clear-a");
        let ns_b = test_namespace("clear-b");

        backend.put(&ns_a, "k1", live_record("1")).await.unwrap();
        backend.put(&ns_a, "k2", live_record("2")).await.unwrap();
        backend.put(&ns_b, "k1", live_record("3")).await.unwrap();

        assert_eq!(backend.clear(&ns_a).await.unwrap(), 2);
        assert!(backend.get(&ns_b, "k1").await.unwrap().is_some());

        backend.clear(&ns_b).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn test_redis_delete_and_keys() {
        let backend = RedisBackend::open(&server_url()).await.unwrap();
        let ns = test_namespace("delete");

        backend.put(&ns, "colon:key", live_record("v")).await.unwrap();
        assert_eq!(
            backend.list_keys(&ns, Utc::now()).await.unwrap(),
            vec!["colon:key"]
        );
        assert!(backend.delete(&ns, "colon:key").await.unwrap());
        assert!(!backend.delete(&ns, "colon:key").await.unwrap());
    }
}
