use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use recall::domain::EntryRecord;
use serde::{Deserialize, Serialize};
use shared::{Error, Result};

/// Stored form of an entry, shared by the file and redis engines. The
/// payload is base64 so namespace documents stay valid JSON no matter what
/// bytes the encoded value holds.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoredRecord {
    pub payload: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredRecord {
    pub(crate) fn encode(record: &EntryRecord) -> Self {
        Self {
            payload: STANDARD.encode(&record.payload),
            created_at: record.created_at,
            expires_at: record.expires_at,
        }
    }

    pub(crate) fn decode(self) -> Result<EntryRecord> {
        let payload = STANDARD
            .decode(&self.payload)
            .map_err(|e| Error::Serialization(format!("Failed to decode stored payload: {}", e)))?;
        Ok(EntryRecord {
            payload: Bytes::from(payload),
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }
}

/// One record as a standalone JSON string, the shape the redis engine
/// stores under each key.
pub(crate) fn to_json(record: &EntryRecord) -> Result<String> {
    serde_json::to_string(&StoredRecord::encode(record))
        .map_err(|e| Error::Serialization(format!("Failed to encode stored record: {}", e)))
}

pub(crate) fn from_json(raw: &str) -> Result<EntryRecord> {
    let stored: StoredRecord = serde_json::from_str(raw)
        .map_err(|e| Error::Serialization(format!("Failed to parse stored record: {}", e)))?;
    stored.decode()
}
