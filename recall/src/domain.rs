use bytes::Bytes;
use chrono::{DateTime, Utc};
use shared::BackendKind;

/// Namespace used when callers do not name one explicitly.
pub const DEFAULT_NAMESPACE: &str = "default";

/// One stored item, the unit every backend moves around.
///
/// The payload is opaque below the service layer; backends persist and
/// return it byte-for-byte. Timestamps are wall clock so durable backends
/// keep their expiry semantics across process restarts.
#[derive(Clone, Debug, PartialEq)]
pub struct EntryRecord {
    pub payload: Bytes,
    pub created_at: DateTime<Utc>,
    /// `None` means the entry never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl EntryRecord {
    pub fn new(payload: Bytes, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            payload,
            created_at: Utc::now(),
            expires_at,
        }
    }

    /// Whether the entry is logically absent at `now`. An entry expiring
    /// exactly at `now` is already gone.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Entry and namespace totals as a backend sees them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackendCounts {
    pub entries: u64,
    pub namespaces: u64,
}

/// Read-only diagnostic snapshot. Counts are best-effort under concurrent
/// mutation and exclude entries that are expired but not yet purged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreStats {
    pub backend: BackendKind,
    pub entries: u64,
    pub namespaces: u64,
}
