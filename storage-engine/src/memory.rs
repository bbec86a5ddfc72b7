use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use recall::domain::{BackendCounts, EntryRecord};
use recall::ports::ContextBackend;
use shared::{BackendKind, Result};

/// Composite map key. All namespaces share one map so store-wide passes
/// (purge, count) stay a single iteration.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct ScopedKey {
    namespace: String,
    key: String,
}

impl ScopedKey {
    fn new(namespace: &str, key: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            key: key.to_string(),
        }
    }
}

/// In-process backend over a sharded concurrent map.
/// Fastest of the engines; contents vanish with the process.
#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<ScopedKey, EntryRecord>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn put(&self, namespace: &str, key: &str, record: EntryRecord) -> Result<()> {
        self.entries.insert(ScopedKey::new(namespace, key), record);
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<EntryRecord>> {
        Ok(self
            .entries
            .get(&ScopedKey::new(namespace, key))
            .map(|entry| entry.value().clone()))
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        Ok(self.entries.remove(&ScopedKey::new(namespace, key)).is_some())
    }

    async fn list_keys(&self, namespace: &str, now: DateTime<Utc>) -> Result<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .filter(|entry| {
                entry.key().namespace == namespace && !entry.value().is_expired_at(now)
            })
            .map(|entry| entry.key().key.clone())
            .collect())
    }

    async fn snapshot(&self, namespace: &str) -> Result<Vec<(String, EntryRecord)>> {
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.key().namespace == namespace)
            .map(|entry| (entry.key().key.clone(), entry.value().clone()))
            .collect())
    }

    async fn clear(&self, namespace: &str) -> Result<u64> {
        let mut removed = 0u64;
        self.entries.retain(|scoped, _| {
            if scoped.namespace == namespace {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut removed = 0u64;
        self.entries.retain(|_, record| {
            if record.is_expired_at(now) {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn count(&self, now: DateTime<Utc>) -> Result<BackendCounts> {
        let mut counts = BackendCounts::default();
        let mut seen = HashSet::new();
        for entry in self.entries.iter() {
            if entry.value().is_expired_at(now) {
                continue;
            }
            counts.entries += 1;
            if seen.insert(entry.key().namespace.clone()) {
                counts.namespaces += 1;
            }
        }
        Ok(counts)
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("entry_count", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Duration;

    fn live_record(value: &str) -> EntryRecord {
        EntryRecord::new(Bytes::from(format!("\"{}\"", value)), None)
    }

    fn expired_record(value: &str) -> EntryRecord {
        let now = Utc::now();
        EntryRecord {
            payload: Bytes::from(format!("\"{}\"", value)),
            created_at: now - Duration::seconds(10),
            expires_at: Some(now - Duration::seconds(5)),
        }
    }

    #[tokio::test]
    async fn test_memory_put_and_get() {
        let backend = MemoryBackend::new();

        backend.put("ns", "greeting", live_record("hello")).await.unwrap();
        let record = backend.get("ns", "greeting").await.unwrap().unwrap();
        assert_eq!(record.payload, Bytes::from_static(b"\"hello\""));

        assert!(backend.get("ns", "missing").await.unwrap().is_none());
        assert!(backend.get("other", "greeting").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_delete() {
        let backend = MemoryBackend::new();

        backend.put("ns", "k", live_record("v")).await.unwrap();
        assert!(backend.delete("ns", "k").await.unwrap());
        assert!(!backend.delete("ns", "k").await.unwrap());
        assert!(backend.get("ns", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_get_returns_expired_record_raw() {
        let backend = MemoryBackend::new();

        backend.put("ns", "stale", expired_record("old")).await.unwrap();
        // The raw record stays visible to the port; filtering happens above it.
        let record = backend.get("ns", "stale").await.unwrap().unwrap();
        assert!(record.is_expired_at(Utc::now()));
    }

    #[tokio::test]
    async fn test_memory_list_keys_excludes_expired() {
        let backend = MemoryBackend::new();

        backend.put("ns", "live", live_record("1")).await.unwrap();
        backend.put("ns", "stale", expired_record("2")).await.unwrap();
        backend.put("other", "live", live_record("3")).await.unwrap();

        let keys = backend.list_keys("ns", Utc::now()).await.unwrap();
        assert_eq!(keys, vec!["live"]);
    }

    #[tokio::test]
    async fn test_memory_snapshot_keeps_expired() {
        let backend = MemoryBackend::new();

        backend.put("ns", "live", live_record("1")).await.unwrap();
        backend.put("ns", "stale", expired_record("2")).await.unwrap();

        let snapshot = backend.snapshot("ns").await.unwrap();
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_clear_is_scoped_to_namespace() {
        let backend = MemoryBackend::new();

        backend.put("a", "k1", live_record("1")).await.unwrap();
        backend.put("a", "k2", live_record("2")).await.unwrap();
        backend.put("b", "k1", live_record("3")).await.unwrap();

        assert_eq!(backend.clear("a").await.unwrap(), 2);
        assert_eq!(backend.clear("a").await.unwrap(), 0);
        assert!(backend.get("b", "k1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_memory_purge_removes_only_expired() {
        let backend = MemoryBackend::new();

        backend.put("a", "live", live_record("1")).await.unwrap();
        backend.put("a", "stale", expired_record("2")).await.unwrap();
        backend.put("b", "stale", expired_record("3")).await.unwrap();

        assert_eq!(backend.purge_expired(Utc::now()).await.unwrap(), 2);
        assert_eq!(backend.purge_expired(Utc::now()).await.unwrap(), 0);
        assert!(backend.get("a", "live").await.unwrap().is_some());
        assert!(backend.get("a", "stale").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_count_live_entries_and_namespaces() {
        let backend = MemoryBackend::new();

        backend.put("a", "k1", live_record("1")).await.unwrap();
        backend.put("a", "k2", live_record("2")).await.unwrap();
        backend.put("b", "k1", live_record("3")).await.unwrap();
        backend.put("c", "stale", expired_record("4")).await.unwrap();

        let counts = backend.count(Utc::now()).await.unwrap();
        assert_eq!(counts.entries, 3);
        assert_eq!(counts.namespaces, 2);
    }

    #[tokio::test]
    async fn test_memory_handles_many_keys() {
        let backend = MemoryBackend::new();

        for i in 0..1000 {
            backend
                .put("bulk", &format!("key-{:04}", i), live_record(&i.to_string()))
                .await
                .unwrap();
        }

        let keys = backend.list_keys("bulk", Utc::now()).await.unwrap();
        assert_eq!(keys.len(), 1000);
        let counts = backend.count(Utc::now()).await.unwrap();
        assert_eq!(counts.entries, 1000);
        assert_eq!(backend.clear("bulk").await.unwrap(), 1000);
    }
}
