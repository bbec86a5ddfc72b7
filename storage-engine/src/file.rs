use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use recall::domain::{BackendCounts, EntryRecord};
use recall::ports::ContextBackend;
use shared::{BackendKind, Error, Result};
use tokio::sync::Mutex;
use tracing::debug;

use crate::codec::StoredRecord;

/// In-file form of one namespace: key to stored record, sorted so the
/// documents diff cleanly.
type NamespaceDocument = BTreeMap<String, StoredRecord>;

/// Backend keeping each namespace as a `<name>.json` document under one
/// directory. Writes land in a `.tmp` sibling first and replace the
/// document with a rename, so readers only ever see a complete file.
///
/// Mutations serialize per namespace through an async lock; reads go
/// straight to disk and never block writers on other namespaces.
pub struct FileBackend {
    dir: PathBuf,
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileBackend {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            Error::Unavailable(format!(
                "Failed to create context directory '{}': {}",
                dir.display(),
                e
            ))
        })?;
        debug!("file backend ready at {}", dir.display());
        Ok(Self {
            dir,
            write_locks: DashMap::new(),
        })
    }

    fn document_path(&self, namespace: &str) -> PathBuf {
        // The namespace charset is restricted upstream, so it is safe as a
        // file name.
        self.dir.join(format!("{}.json", namespace))
    }

    fn write_lock(&self, namespace: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(namespace.to_string())
            .or_default()
            .value()
            .clone()
    }

    async fn load(&self, namespace: &str) -> Result<NamespaceDocument> {
        let path = self.document_path(namespace);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(NamespaceDocument::new()),
            Err(e) => {
                return Err(Error::Unavailable(format!(
                    "Failed to read namespace document '{}': {}",
                    path.display(),
                    e
                )));
            }
        };
        serde_json::from_slice(&raw).map_err(|e| {
            Error::Serialization(format!(
                "Failed to parse namespace document '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Replaces the namespace document, or removes it when the last entry
    /// is gone so empty namespaces leave no residue.
    async fn persist(&self, namespace: &str, document: &NamespaceDocument) -> Result<()> {
        let path = self.document_path(namespace);
        if document.is_empty() {
            return match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::Unavailable(format!(
                    "Failed to remove namespace document '{}': {}",
                    path.display(),
                    e
                ))),
            };
        }

        let raw = serde_json::to_vec_pretty(document).map_err(|e| {
            Error::Serialization(format!(
                "Failed to encode namespace document '{}': {}",
                namespace, e
            ))
        })?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &raw).await.map_err(|e| {
            Error::Unavailable(format!(
                "Failed to write namespace document '{}': {}",
                tmp.display(),
                e
            ))
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            Error::Unavailable(format!(
                "Failed to replace namespace document '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Namespaces currently present on disk, from the document file names.
    async fn namespaces_on_disk(&self) -> Result<Vec<String>> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::Unavailable(format!(
                    "Failed to list context directory '{}': {}",
                    self.dir.display(),
                    e
                )));
            }
        };

        let mut namespaces = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| {
            Error::Unavailable(format!(
                "Failed to list context directory '{}': {}",
                self.dir.display(),
                e
            ))
        })? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(namespace) = path.file_stem().and_then(|stem| stem.to_str()) {
                namespaces.push(namespace.to_string());
            }
        }
        Ok(namespaces)
    }
}

#[async_trait]
impl ContextBackend for FileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    async fn put(&self, namespace: &str, key: &str, record: EntryRecord) -> Result<()> {
        let lock = self.write_lock(namespace);
        let _guard = lock.lock().await;

        let mut document = self.load(namespace).await?;
        document.insert(key.to_string(), StoredRecord::encode(&record));
        self.persist(namespace, &document).await
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<EntryRecord>> {
        let mut document = self.load(namespace).await?;
        document.remove(key).map(StoredRecord::decode).transpose()
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let lock = self.write_lock(namespace);
        let _guard = lock.lock().await;

        let mut document = self.load(namespace).await?;
        if document.remove(key).is_none() {
            return Ok(false);
        }
        self.persist(namespace, &document).await?;
        Ok(true)
    }

    async fn list_keys(&self, namespace: &str, now: DateTime<Utc>) -> Result<Vec<String>> {
        let document = self.load(namespace).await?;
        let mut keys = Vec::with_capacity(document.len());
        for (key, stored) in document {
            if stored.expires_at.is_none_or(|at| at > now) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    async fn snapshot(&self, namespace: &str) -> Result<Vec<(String, EntryRecord)>> {
        let document = self.load(namespace).await?;
        document
            .into_iter()
            .map(|(key, stored)| Ok((key, stored.decode()?)))
            .collect()
    }

    async fn clear(&self, namespace: &str) -> Result<u64> {
        let lock = self.write_lock(namespace);
        let _guard = lock.lock().await;

        let document = self.load(namespace).await?;
        let removed = document.len() as u64;
        self.persist(namespace, &NamespaceDocument::new()).await?;
        Ok(removed)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut removed = 0u64;
        for namespace in self.namespaces_on_disk().await? {
            let lock = self.write_lock(&namespace);
            let _guard = lock.lock().await;

            let mut document = self.load(&namespace).await?;
            let before = document.len();
            document.retain(|_, stored| stored.expires_at.is_none_or(|at| at > now));
            if document.len() < before {
                removed += (before - document.len()) as u64;
                self.persist(&namespace, &document).await?;
            }
        }
        Ok(removed)
    }

    async fn count(&self, now: DateTime<Utc>) -> Result<BackendCounts> {
        let mut counts = BackendCounts::default();
        for namespace in self.namespaces_on_disk().await? {
            let document = self.load(&namespace).await?;
            let live = document
                .values()
                .filter(|stored| stored.expires_at.is_none_or(|at| at > now))
                .count() as u64;
            if live > 0 {
                counts.entries += live;
                counts.namespaces += 1;
            }
        }
        Ok(counts)
    }
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("dir", &self.dir)
            .finish()
    }
}
