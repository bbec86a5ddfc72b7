// shared/src/lib.rs

use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Caller-side mistake (empty key, malformed namespace). Raised before
    /// any backend I/O happens.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Backend unreachable, I/O failure or timed-out call. Retryable at the
    /// caller's discretion; the store never retries on its own.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// Value could not be encoded on store or decoded on get.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Storage technology behind a store instance.
///
/// `sqlite` covers the embedded-sql backend, `redis` the networked cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Memory,
    File,
    Sqlite,
    Redis,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::File => "file",
            BackendKind::Sqlite => "sqlite",
            BackendKind::Redis => "redis",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(BackendKind::Memory),
            "file" => Ok(BackendKind::File),
            "sqlite" | "embedded-sql" | "sql" => Ok(BackendKind::Sqlite),
            "redis" | "networked-cache" => Ok(BackendKind::Redis),
            other => Err(Error::InvalidArgument(format!(
                "unknown storage backend '{}'",
                other
            ))),
        }
    }
}

pub mod config;
