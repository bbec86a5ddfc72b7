//! Storage engines behind the context store.
//!
//! Four interchangeable backends sit below the [`ContextBackend`] port:
//! an in-process map, JSON documents on disk, an embedded sqlite database
//! and a shared redis cache. [`open`] reads the configured kind and hands
//! back a ready [`ContextStore`]; callers never touch an engine directly.

use std::sync::Arc;

use async_trait::async_trait;
use recall::ContextStore;
use recall::ports::{ContextBackend, StorageFactory};
use shared::config::StoreConfig;
use shared::{BackendKind, Result};
use tracing::info;

mod codec;
mod file;
mod memory;
mod redis_cache;
mod sqlite;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use redis_cache::RedisBackend;
pub use sqlite::SqliteBackend;

/// Factory that knows how to build every backend kind from configuration.
pub struct UnifiedBackendFactory;

#[async_trait]
impl StorageFactory for UnifiedBackendFactory {
    async fn create_backend(&self, config: &StoreConfig) -> Result<Arc<dyn ContextBackend>> {
        let backend: Arc<dyn ContextBackend> = match config.backend {
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
            BackendKind::File => Arc::new(FileBackend::open(config.file_dir()).await?),
            BackendKind::Sqlite => Arc::new(SqliteBackend::open(config.sqlite_file()).await?),
            BackendKind::Redis => Arc::new(RedisBackend::open(&config.redis_url).await?),
        };
        info!("storage backend ready: {}", backend.kind());
        Ok(backend)
    }
}

/// Builds the configured backend and wires it into a [`ContextStore`].
pub async fn open(config: &StoreConfig) -> Result<ContextStore> {
    let backend = UnifiedBackendFactory.create_backend(config).await?;
    Ok(ContextStore::new(backend, config))
}

/// [`open`] with configuration resolved from `RECALL_*` environment
/// variables.
pub async fn open_from_env() -> Result<ContextStore> {
    open(&StoreConfig::from_env()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_factory_builds_each_local_kind() {
        let dir = tempdir().unwrap();
        let base = StoreConfig::default()
            .with_data_dir(dir.path())
            .without_cleanup();

        for kind in [BackendKind::Memory, BackendKind::File, BackendKind::Sqlite] {
            let backend = UnifiedBackendFactory
                .create_backend(&base.clone().with_backend(kind))
                .await
                .unwrap();
            assert_eq!(backend.kind(), kind);
        }
    }

    #[tokio::test]
    async fn test_open_reports_configured_backend() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::default()
            .with_backend(BackendKind::Sqlite)
            .with_data_dir(dir.path())
            .without_cleanup();

        let store = open(&config).await.unwrap();
        assert_eq!(store.backend_kind(), BackendKind::Sqlite);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.backend, BackendKind::Sqlite);
        assert_eq!(stats.entries, 0);
    }

    /// The same workflow against every engine; backends must be
    /// interchangeable below the service layer. Purge counts differ by
    /// engine (redis expires server-side), so only observable state is
    /// asserted here.
    async fn exercise_workflow(store: &ContextStore) {
        let ctx = store.context("content_pipeline").unwrap();

        ctx.store("condensed", "a much shorter text").await.unwrap();
        ctx.store_with_ttl("scratch", &42u32, Some(Duration::ZERO))
            .await
            .unwrap();

        let back: Option<String> = ctx.get("condensed").await.unwrap();
        assert_eq!(back, Some("a much shorter text".to_string()));
        let gone: Option<u32> = ctx.get("scratch").await.unwrap();
        assert_eq!(gone, None);

        assert_eq!(ctx.keys().await.unwrap(), vec!["condensed"]);
        store.cleanup().await;
        assert_eq!(ctx.keys().await.unwrap(), vec!["condensed"]);

        assert!(ctx.delete("condensed").await.unwrap());
        assert!(!ctx.contains("condensed").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_and_disk_backends_run_same_workflow() {
        let dir = tempdir().unwrap();
        let base = StoreConfig::default()
            .with_data_dir(dir.path())
            .without_cleanup();

        for kind in [BackendKind::Memory, BackendKind::File, BackendKind::Sqlite] {
            let store = open(&base.clone().with_backend(kind)).await.unwrap();
            exercise_workflow(&store).await;

            // Everything written above is gone again.
            let stats = store.stats().await.unwrap();
            assert_eq!(stats.backend, kind);
            assert_eq!(stats.entries, 0);
            assert_eq!(stats.namespaces, 0);
        }
    }

    #[tokio::test]
    async fn test_thousand_keys_fill_and_clear() {
        let config = StoreConfig::default().without_cleanup();
        assert!(config.default_ttl.is_none());
        let store = open(&config).await.unwrap();

        for i in 0..1000 {
            store
                .store("bulk", &format!("key-{:04}", i), &i)
                .await
                .unwrap();
        }

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.entries, 1000);
        assert_eq!(stats.namespaces, 1);

        assert_eq!(store.clear("bulk").await.unwrap(), 1000);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.entries, 0);
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn test_redis_backend_runs_same_workflow() {
        let config = StoreConfig::default()
            .with_backend(BackendKind::Redis)
            .without_cleanup();

        let store = open(&config).await.unwrap();
        store.clear("content_pipeline").await.unwrap();
        exercise_workflow(&store).await;
    }
}
