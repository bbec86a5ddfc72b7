use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::BackendKind;

/// Store configuration, resolved once at construction time.
///
/// Every field can come from the environment (`RECALL_*` variables) or be set
/// programmatically through the `with_*` builders. Unset or unparseable
/// values fall back to defaults so a bare `StoreConfig::from_env()` always
/// yields something usable.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Which storage backend to construct.
    pub backend: BackendKind,
    /// TTL applied when `store` is called without an explicit TTL.
    /// `None` means entries never expire unless a TTL is passed per call.
    pub default_ttl: Option<Duration>,
    /// Upper bound for a single backend call before it fails as unavailable.
    pub op_timeout: Duration,
    /// Base directory for on-disk backends.
    pub data_dir: PathBuf,
    /// Directory holding one JSON document per namespace (file backend).
    /// Defaults to `<data_dir>/contexts`.
    pub file_path: Option<PathBuf>,
    /// Database file for the sqlite backend. Defaults to `<data_dir>/recall.db`.
    pub sqlite_path: Option<PathBuf>,
    /// Connection URL for the redis backend.
    pub redis_url: String,
    /// Whether the store spawns a periodic expiry reaper.
    pub enable_cleanup: bool,
    /// Interval between reaper passes when cleanup is enabled.
    pub cleanup_interval: Duration,
}

impl StoreConfig {
    const DEFAULT_DATA_DIR: &str = "./data";
    const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
    const DEFAULT_OP_TIMEOUT_MS: u64 = 5_000;
    const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

    pub fn from_env() -> Self {
        let backend = match std::env::var("RECALL_BACKEND") {
            Ok(raw) => raw.parse::<BackendKind>().unwrap_or_else(|_| {
                warn!(
                    "RECALL_BACKEND '{}' is not a recognized backend, falling back to memory",
                    raw
                );
                BackendKind::Memory
            }),
            Err(_) => BackendKind::Memory,
        };

        // 0 (or unset) disables the default TTL entirely.
        let default_ttl = std::env::var("RECALL_DEFAULT_TTL_SECS")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let op_timeout_ms = std::env::var("RECALL_OP_TIMEOUT_MS")
            .unwrap_or_else(|_| Self::DEFAULT_OP_TIMEOUT_MS.to_string())
            .parse::<u64>()
            .unwrap_or(Self::DEFAULT_OP_TIMEOUT_MS);

        let cleanup_interval_secs = std::env::var("RECALL_CLEANUP_INTERVAL_SECS")
            .unwrap_or_else(|_| Self::DEFAULT_CLEANUP_INTERVAL_SECS.to_string())
            .parse::<u64>()
            .unwrap_or(Self::DEFAULT_CLEANUP_INTERVAL_SECS)
            .max(1);

        Self {
            backend,
            default_ttl,
            op_timeout: Duration::from_millis(op_timeout_ms.max(1)),
            data_dir: std::env::var("RECALL_DATA_DIR")
                .unwrap_or_else(|_| Self::DEFAULT_DATA_DIR.to_string())
                .into(),
            file_path: std::env::var("RECALL_FILE_PATH").ok().map(PathBuf::from),
            sqlite_path: std::env::var("RECALL_SQLITE_PATH").ok().map(PathBuf::from),
            redis_url: std::env::var("RECALL_REDIS_URL")
                .unwrap_or_else(|_| Self::DEFAULT_REDIS_URL.to_string()),
            enable_cleanup: std::env::var("RECALL_CLEANUP_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse::<bool>()
                .unwrap_or(true),
            cleanup_interval: Duration::from_secs(cleanup_interval_secs),
        }
    }

    /// Directory for the file backend, derived from `data_dir` unless
    /// overridden.
    pub fn file_dir(&self) -> PathBuf {
        self.file_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("contexts"))
    }

    /// Database file for the sqlite backend, derived from `data_dir` unless
    /// overridden.
    pub fn sqlite_file(&self) -> PathBuf {
        self.sqlite_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("recall.db"))
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.data_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_file_path(mut self, path: impl AsRef<Path>) -> Self {
        self.file_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_sqlite_path(mut self, path: impl AsRef<Path>) -> Self {
        self.sqlite_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        // A zero interval would panic inside the reaper's timer.
        self.cleanup_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn without_cleanup(mut self) -> Self {
        self.enable_cleanup = false;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            default_ttl: None,
            op_timeout: Duration::from_millis(Self::DEFAULT_OP_TIMEOUT_MS),
            data_dir: PathBuf::from(Self::DEFAULT_DATA_DIR),
            file_path: None,
            sqlite_path: None,
            redis_url: Self::DEFAULT_REDIS_URL.to_string(),
            enable_cleanup: true,
            cleanup_interval: Duration::from_secs(Self::DEFAULT_CLEANUP_INTERVAL_SECS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_targets_memory() {
        let config = StoreConfig::default();
        assert_eq!(config.backend, BackendKind::Memory);
        assert!(config.default_ttl.is_none());
        assert!(config.enable_cleanup);
        assert_eq!(config.cleanup_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_builders_override_defaults() {
        let config = StoreConfig::default()
            .with_backend(BackendKind::Sqlite)
            .with_default_ttl(Some(Duration::from_secs(300)))
            .with_data_dir("/tmp/recall-test")
            .with_cleanup_interval(Duration::from_secs(5));

        assert_eq!(config.backend, BackendKind::Sqlite);
        assert_eq!(config.default_ttl, Some(Duration::from_secs(300)));
        assert_eq!(config.sqlite_file(), PathBuf::from("/tmp/recall-test/recall.db"));
        assert_eq!(config.cleanup_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_derived_paths_honor_explicit_overrides() {
        let config = StoreConfig::default()
            .with_file_path("/var/lib/recall/namespaces")
            .with_sqlite_path("/var/lib/recall/store.db");

        assert_eq!(
            config.file_dir(),
            PathBuf::from("/var/lib/recall/namespaces")
        );
        assert_eq!(config.sqlite_file(), PathBuf::from("/var/lib/recall/store.db"));
    }

    #[test]
    fn test_without_cleanup_disables_the_reaper() {
        let config = StoreConfig::default().without_cleanup();
        assert!(!config.enable_cleanup);
    }

    #[test]
    fn test_zero_cleanup_interval_is_clamped() {
        let config = StoreConfig::default().with_cleanup_interval(Duration::ZERO);
        assert!(config.cleanup_interval > Duration::ZERO);
        // Sub-second intervals pass through untouched.
        let config = StoreConfig::default().with_cleanup_interval(Duration::from_millis(20));
        assert_eq!(config.cleanup_interval, Duration::from_millis(20));
    }
}
