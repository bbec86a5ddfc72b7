use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::config::StoreConfig;
use shared::{BackendKind, Result};

use crate::domain::{BackendCounts, EntryRecord};

// Ports are the pluggable extension points for storage backends.

/// Capability set every concrete backend provides.
///
/// Records cross this boundary whole: a put stores payload and timestamps as
/// one unit, a get returns them as one unit. Namespaces come into existence
/// on first write; a backend never needs to pre-create them.
#[async_trait]
pub trait ContextBackend: Send + Sync + 'static {
    fn kind(&self) -> BackendKind;

    /// Creates or overwrites the entry. Last writer wins per the backend's
    /// own serialization order.
    async fn put(&self, namespace: &str, key: &str, record: EntryRecord) -> Result<()>;

    /// Raw lookup. May return an expired record; expiry is enforced above
    /// this boundary so that all backends behave identically.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<EntryRecord>>;

    /// Returns whether an entry was physically present.
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool>;

    /// Keys with a live entry at `now`, in no particular order.
    async fn list_keys(&self, namespace: &str, now: DateTime<Utc>) -> Result<Vec<String>>;

    /// Every record in the namespace, expired ones included.
    async fn snapshot(&self, namespace: &str) -> Result<Vec<(String, EntryRecord)>>;

    /// Removes all entries in the namespace, returning how many went away.
    async fn clear(&self, namespace: &str) -> Result<u64>;

    /// Physically removes entries expired at `now`, across all namespaces.
    /// Must never remove a live entry; backends with native expiry may
    /// report 0. A partial failure leaves the remaining entries untouched.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Live-entry and namespace totals at `now`. Best-effort accuracy.
    async fn count(&self, now: DateTime<Utc>) -> Result<BackendCounts>;
}

/// Port for building a backend from configuration.
///
/// Selection happens once, at construction time, keyed on
/// `config.backend`. Alternative engines plug in here without the store
/// knowing about them.
#[async_trait]
pub trait StorageFactory: Send + Sync {
    async fn create_backend(&self, config: &StoreConfig) -> Result<Arc<dyn ContextBackend>>;
}
