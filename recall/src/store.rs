use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::config::StoreConfig;
use shared::{BackendKind, Error, Result};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cleanup;
use crate::domain::{DEFAULT_NAMESPACE, EntryRecord, StoreStats};
use crate::ports::ContextBackend;
use crate::validate;

struct StoreInner {
    backend: Arc<dyn ContextBackend>,
    default_ttl: Option<Duration>,
    op_timeout: Duration,
    reaper_shutdown: Option<watch::Sender<bool>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        // Stop the reaper when the last store handle goes away.
        if let Some(tx) = &self.reaper_shutdown {
            let _ = tx.send(true);
        }
    }
}

/// Service front of the context store.
///
/// Owns the value codec (serde_json), argument validation, TTL application,
/// expiry filtering and the per-call timeout; everything below the
/// [`ContextBackend`] port is interchangeable storage. Cloning is cheap and
/// every clone shares the same backend and reaper.
///
/// # Example
///
/// ```rust,no_run
/// use recall::ContextStore;
/// use shared::config::StoreConfig;
///
/// # async fn example(store: ContextStore) -> shared::Result<()> {
/// let ctx = store.context("content_pipeline")?;
/// ctx.store("condensed_content", "shorter text").await?;
/// let back: Option<String> = ctx.get("condensed_content").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ContextStore {
    inner: Arc<StoreInner>,
}

impl ContextStore {
    /// Wraps a backend with the service layer.
    ///
    /// Spawns the periodic expiry reaper when `config.enable_cleanup` is
    /// set, which requires a running tokio runtime.
    pub fn new(backend: Arc<dyn ContextBackend>, config: &StoreConfig) -> Self {
        let reaper_shutdown = if config.enable_cleanup {
            Some(cleanup::spawn_reaper(
                Arc::clone(&backend),
                config.cleanup_interval,
                config.op_timeout,
            ))
        } else {
            None
        };

        Self {
            inner: Arc::new(StoreInner {
                backend,
                default_ttl: config.default_ttl,
                op_timeout: config.op_timeout,
                reaper_shutdown,
            }),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.inner.backend.kind()
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.inner.default_ttl
    }

    /// A handle scoped to one namespace, the shape pipeline helpers hold.
    /// The namespace is validated here so a bad name fails at creation
    /// rather than on first use.
    pub fn context(&self, namespace: impl Into<String>) -> Result<Context> {
        let namespace = namespace.into();
        validate::validate_namespace(&namespace)?;
        Ok(Context {
            store: self.clone(),
            namespace,
        })
    }

    /// Handle for the shared default namespace.
    pub fn default_context(&self) -> Context {
        Context {
            store: self.clone(),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Creates or overwrites an entry, applying the configured default TTL
    /// (if any). `created_at` and `expires_at` are always replaced along
    /// with the value.
    pub async fn store<T>(&self, namespace: &str, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.store_with_ttl(namespace, key, value, self.inner.default_ttl)
            .await
    }

    /// Creates or overwrites an entry with an explicit TTL. `None` means
    /// the entry never expires; a zero TTL is legal and expires at once.
    pub async fn store_with_ttl<T>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        validate::validate_namespace(namespace)?;
        validate::validate_key(key)?;

        let payload = serde_json::to_vec(value).map_err(|e| {
            Error::Serialization(format!("Failed to encode value for key '{}': {}", key, e))
        })?;

        let now = Utc::now();
        let record = EntryRecord {
            payload: Bytes::from(payload),
            created_at: now,
            expires_at: ttl.and_then(|ttl| expiry_for(now, ttl)),
        };

        debug!("store: namespace={}, key={}, ttl={:?}", namespace, key, ttl);
        self.call("store", self.inner.backend.put(namespace, key, record))
            .await
    }

    /// Fetches and decodes an entry. Absent and expired both come back as
    /// `Ok(None)`; reading never mutates backend state, expired entries are
    /// left for cleanup.
    pub async fn get<T>(&self, namespace: &str, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        validate::validate_namespace(namespace)?;
        validate::validate_key(key)?;

        let record = self
            .call("get", self.inner.backend.get(namespace, key))
            .await?;
        let Some(record) = record else {
            return Ok(None);
        };
        if record.is_expired_at(Utc::now()) {
            debug!("get: namespace={}, key={} is expired", namespace, key);
            return Ok(None);
        }

        let value = serde_json::from_slice(&record.payload).map_err(|e| {
            Error::Serialization(format!("Failed to decode value for key '{}': {}", key, e))
        })?;
        Ok(Some(value))
    }

    /// Removes an entry. Returns whether one was present; a missing key is
    /// not an error.
    pub async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        validate::validate_namespace(namespace)?;
        validate::validate_key(key)?;

        self.call("delete", self.inner.backend.delete(namespace, key))
            .await
    }

    /// Whether a live (non-expired) entry exists for the key.
    pub async fn contains(&self, namespace: &str, key: &str) -> Result<bool> {
        validate::validate_namespace(namespace)?;
        validate::validate_key(key)?;

        let record = self
            .call("get", self.inner.backend.get(namespace, key))
            .await?;
        Ok(record.is_some_and(|r| !r.is_expired_at(Utc::now())))
    }

    /// Live keys in the namespace, sorted for stable iteration.
    pub async fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        validate::validate_namespace(namespace)?;

        let mut keys = self
            .call(
                "list_keys",
                self.inner.backend.list_keys(namespace, Utc::now()),
            )
            .await?;
        keys.sort();
        Ok(keys)
    }

    /// Every live entry in the namespace as raw JSON values, keyed and
    /// sorted by key. Values are heterogeneous, so no single `T` applies.
    pub async fn get_all(&self, namespace: &str) -> Result<BTreeMap<String, serde_json::Value>> {
        validate::validate_namespace(namespace)?;

        let now = Utc::now();
        let entries = self
            .call("snapshot", self.inner.backend.snapshot(namespace))
            .await?;

        let mut map = BTreeMap::new();
        for (key, record) in entries {
            if record.is_expired_at(now) {
                continue;
            }
            let value = serde_json::from_slice(&record.payload).map_err(|e| {
                Error::Serialization(format!("Failed to decode value for key '{}': {}", key, e))
            })?;
            map.insert(key, value);
        }
        Ok(map)
    }

    /// Removes every entry in the namespace, returning how many went away.
    pub async fn clear(&self, namespace: &str) -> Result<u64> {
        validate::validate_namespace(namespace)?;

        let removed = self
            .call("clear", self.inner.backend.clear(namespace))
            .await?;
        info!("clear: namespace={}, removed={}", namespace, removed);
        Ok(removed)
    }

    /// Purges expired entries across all namespaces, returning how many
    /// were removed. Failures are logged, never raised: cleanup is
    /// maintenance with no caller waiting on a result.
    pub async fn cleanup(&self) -> u64 {
        match self
            .call("cleanup", self.inner.backend.purge_expired(Utc::now()))
            .await
        {
            Ok(removed) => {
                if removed > 0 {
                    debug!("cleanup removed {} expired entries", removed);
                }
                removed
            }
            Err(e) => {
                warn!("cleanup pass failed, will retry on the next run: {}", e);
                0
            }
        }
    }

    /// Diagnostic snapshot: backend kind plus live entry and namespace
    /// counts. Best-effort under concurrent mutation.
    pub async fn stats(&self) -> Result<StoreStats> {
        let counts = self
            .call("count", self.inner.backend.count(Utc::now()))
            .await?;
        Ok(StoreStats {
            backend: self.inner.backend.kind(),
            entries: counts.entries,
            namespaces: counts.namespaces,
        })
    }

    /// Stops the background reaper. Also happens automatically when the
    /// last clone of the store is dropped.
    pub fn shutdown(&self) {
        if let Some(tx) = &self.inner.reaper_shutdown {
            let _ = tx.send(true);
        }
    }

    /// Applies the per-call timeout so no backend call can hang the caller.
    async fn call<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.inner.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Unavailable(format!(
                "{} timed out after {:?}",
                op, self.inner.op_timeout
            ))),
        }
    }
}

impl std::fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStore")
            .field("backend", &self.inner.backend.kind())
            .field("default_ttl", &self.inner.default_ttl)
            .finish()
    }
}

/// Absolute expiry deadline for a TTL starting at `now`. A TTL too large to
/// represent on the calendar means the entry effectively never expires.
fn expiry_for(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    let delta = ChronoDuration::from_std(ttl).ok()?;
    now.checked_add_signed(delta)
}

/// Namespace-bound view over a store.
///
/// Mirrors how pipeline helpers use their working memory: create one
/// context per workflow, then store and fetch by bare key.
#[derive(Clone)]
pub struct Context {
    store: ContextStore,
    namespace: String,
}

impl Context {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn store<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.store.store(&self.namespace, key, value).await
    }

    pub async fn store_with_ttl<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.store
            .store_with_ttl(&self.namespace, key, value, ttl)
            .await
    }

    pub async fn get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        self.store.get(&self.namespace, key).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.store.delete(&self.namespace, key).await
    }

    pub async fn contains(&self, key: &str) -> Result<bool> {
        self.store.contains(&self.namespace, key).await
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        self.store.keys(&self.namespace).await
    }

    pub async fn get_all(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        self.store.get_all(&self.namespace).await
    }

    pub async fn clear(&self) -> Result<u64> {
        self.store.clear(&self.namespace).await
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("namespace", &self.namespace)
            .finish()
    }
}
