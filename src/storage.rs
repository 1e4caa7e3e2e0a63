//! Local store for generated output files served over `/files`.
//!
//! Entries expire after a TTL; expired files report as missing. Uploads to
//! object storage happen elsewhere; this only backs the read-only file
//! routes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct FileEntry {
    path: PathBuf,
    job_id: String,
    filename: String,
    created_at: DateTime<Utc>,
}

/// Metadata returned by `/files/{file_id}/info`.
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub file_id: String,
    pub created_at: DateTime<Utc>,
    pub job_id: String,
    pub filename: String,
    pub expires_at: DateTime<Utc>,
}

/// In-memory index of generated files with TTL expiry.
pub struct FileStore {
    root: PathBuf,
    ttl: Duration,
    entries: RwLock<HashMap<String, FileEntry>>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            root: root.into(),
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register a generated file and return its id.
    pub async fn register(
        &self,
        job_id: impl Into<String>,
        filename: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> String {
        let file_id = Uuid::new_v4().to_string();
        let entry = FileEntry {
            path: path.into(),
            job_id: job_id.into(),
            filename: filename.into(),
            created_at: Utc::now(),
        };
        self.entries.write().await.insert(file_id.clone(), entry);
        file_id
    }

    /// Write bytes under the store root and register the result.
    pub async fn store_bytes(
        &self,
        job_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> std::io::Result<String> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(filename);
        tokio::fs::write(&path, bytes).await?;
        Ok(self.register(job_id, filename, path).await)
    }

    /// Path for a file id, or None when unknown or TTL-expired. Expired
    /// entries are dropped from the index.
    pub async fn path(&self, file_id: &str) -> Option<PathBuf> {
        let expired = {
            let entries = self.entries.read().await;
            let entry = entries.get(file_id)?;
            if self.is_expired(entry) {
                true
            } else {
                return Some(entry.path.clone());
            }
        };

        if expired {
            tracing::info!(file_id = %file_id, "File expired, dropping from index");
            self.entries.write().await.remove(file_id);
        }
        None
    }

    pub async fn info(&self, file_id: &str) -> Option<FileInfo> {
        let entries = self.entries.read().await;
        let entry = entries.get(file_id)?;
        if self.is_expired(entry) {
            return None;
        }
        Some(FileInfo {
            file_id: file_id.to_string(),
            created_at: entry.created_at,
            job_id: entry.job_id.clone(),
            filename: entry.filename.clone(),
            expires_at: entry.created_at + self.chrono_ttl(),
        })
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let ttl = self.chrono_ttl();
        let now = Utc::now();
        entries.retain(|_, entry| entry.created_at + ttl > now);
        before - entries.len()
    }

    fn is_expired(&self, entry: &FileEntry) -> bool {
        entry.created_at + self.chrono_ttl() <= Utc::now()
    }

    fn chrono_ttl(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::from_std(self.ttl).unwrap_or(chrono::TimeDelta::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registered_file_is_served_until_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), Duration::from_secs(3600));

        let file_id = store
            .store_bytes("job-1", "out.mp4", b"video-bytes")
            .await
            .unwrap();

        let path = store.path(&file_id).await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"video-bytes");

        let info = store.info(&file_id).await.unwrap();
        assert_eq!(info.job_id, "job-1");
        assert_eq!(info.filename, "out.mp4");
        assert!(info.expires_at > info.created_at);
    }

    #[tokio::test]
    async fn expired_file_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), Duration::from_millis(10));

        let file_id = store.store_bytes("job-1", "x.bin", b"x").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.path(&file_id).await.is_none());
        assert!(store.info(&file_id).await.is_none());
    }

    #[tokio::test]
    async fn unknown_id_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), Duration::from_secs(60));
        assert!(store.path("ghost").await.is_none());
    }

    #[tokio::test]
    async fn sweep_drops_expired_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), Duration::from_millis(10));
        store.store_bytes("job-1", "a.bin", b"a").await.unwrap();
        store.store_bytes("job-2", "b.bin", b"b").await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.sweep().await, 2);
    }
}
