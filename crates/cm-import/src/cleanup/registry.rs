//! File backed registry of pending cleanup requests.
//!
//! Each request lives in its own `<job id>.cleanup` JSON file so a crash never
//! loses more than the request being written, and several processes can share
//! one registry directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::Result;

/// Extension of request records.
pub const RECORD_EXTENSION: &str = "cleanup";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CleanupRecord {
    job_id: String,
    job_file: PathBuf,
}

/// Registry directory holding one record per pending request.
#[derive(Debug, Clone)]
pub struct CleanupRegistry {
    root: PathBuf,
}

impl CleanupRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record for `job_id`.
    ///
    /// Characters outside `[A-Za-z0-9_.-]` are replaced so an id can never
    /// point outside the registry.
    pub fn record_path(&self, job_id: &str) -> PathBuf {
        let key: String = job_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{key}.{RECORD_EXTENSION}"))
    }

    /// Register `job_file` for deletion once `job_id` is done.
    ///
    /// A request already registered for the same job is replaced. The record
    /// is written to a temporary file, synced and renamed into place.
    pub async fn add_request(&self, job_id: &str, job_file: &Path) -> Result<()> {
        fs::create_dir_all(&self.root).await?;

        let record = CleanupRecord {
            job_id: job_id.to_string(),
            job_file: job_file.to_path_buf(),
        };
        let data = serde_json::to_vec(&record)?;

        let target = self.record_path(job_id);
        let mut tmp_name = target.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = self.root.join(tmp_name);

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, &target).await?;

        debug!(job_id, file = %job_file.display(), "Registered cleanup request");
        Ok(())
    }

    /// Every pending request, in no particular order.
    ///
    /// Records that cannot be read or decoded are logged and skipped.
    pub async fn get_requests(&self) -> Result<Vec<CleanupRequest>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut requests = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }

            let data = match fs::read(&path).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(record = %path.display(), error = %e, "Failed to read cleanup record");
                    continue;
                }
            };
            match serde_json::from_slice::<CleanupRecord>(&data) {
                Ok(record) => requests.push(CleanupRequest {
                    record_file: path,
                    record,
                }),
                Err(e) => {
                    warn!(record = %path.display(), error = %e, "Malformed cleanup record");
                }
            }
        }

        Ok(requests)
    }
}

/// A pending cleanup request loaded from the registry.
#[derive(Debug, Clone)]
pub struct CleanupRequest {
    record_file: PathBuf,
    record: CleanupRecord,
}

impl CleanupRequest {
    pub fn job_id(&self) -> &str {
        &self.record.job_id
    }

    pub fn job_file(&self) -> &Path {
        &self.record.job_file
    }

    pub fn record_file(&self) -> &Path {
        &self.record_file
    }

    /// Drop the request without touching the import file.
    pub async fn cancel(&self) {
        match fs::remove_file(&self.record_file).await {
            Ok(()) => info!(job_id = %self.job_id(), "Cleanup request canceled"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(job_id = %self.job_id(), "Cleanup request already gone");
            }
            Err(e) => {
                error!(
                    record = %self.record_file.display(),
                    error = %e,
                    "Failed to remove cleanup record"
                );
            }
        }
    }

    /// Delete the import file, then drop the request.
    ///
    /// The request is dropped even when the delete fails.
    pub async fn delete_and_cancel(&self) {
        let file = self.job_file();
        match fs::remove_file(file).await {
            Ok(()) => info!(file = %file.display(), "Import file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(file = %file.display(), "Import file not found, nothing to do");
            }
            Err(e) => {
                error!(file = %file.display(), error = %e, "Failed to remove import file");
            }
        }
        self.cancel().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn add_and_list_requests() {
        let dir = TempDir::new().unwrap();
        let registry = CleanupRegistry::new(dir.path());

        registry.add_request("1", Path::new("/tmp/a.txt")).await.unwrap();
        registry.add_request("2", Path::new("/tmp/b.txt")).await.unwrap();

        let mut requests = registry.get_requests().await.unwrap();
        requests.sort_by(|a, b| a.job_id().cmp(b.job_id()));
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].job_id(), "1");
        assert_eq!(requests[0].job_file(), Path::new("/tmp/a.txt"));
        assert_eq!(requests[1].record_file(), dir.path().join("2.cleanup"));
    }

    #[tokio::test]
    async fn re_adding_overwrites_the_record() {
        let dir = TempDir::new().unwrap();
        let registry = CleanupRegistry::new(dir.path());

        registry.add_request("7", Path::new("old.txt")).await.unwrap();
        registry.add_request("7", Path::new("new.txt")).await.unwrap();

        let requests = registry.get_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].job_file(), Path::new("new.txt"));
    }

    #[tokio::test]
    async fn record_is_plain_json() {
        let dir = TempDir::new().unwrap();
        let registry = CleanupRegistry::new(dir.path());
        registry.add_request("3", Path::new("c.txt")).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("3.cleanup")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["job_id"], "3");
        assert_eq!(value["job_file"], "c.txt");
    }

    #[test]
    fn record_key_is_sanitized() {
        let registry = CleanupRegistry::new("/registry");
        assert_eq!(
            registry.record_path("../../etc/passwd"),
            PathBuf::from("/registry/.._.._etc_passwd.cleanup")
        );
    }

    #[tokio::test]
    async fn skips_foreign_and_malformed_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        std::fs::write(dir.path().join("broken.cleanup"), "{not json").unwrap();
        std::fs::write(dir.path().join(".c_lock"), "").unwrap();

        let registry = CleanupRegistry::new(dir.path());
        assert!(registry.get_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_registry_has_no_requests() {
        let dir = TempDir::new().unwrap();
        let registry = CleanupRegistry::new(dir.path().join("missing"));
        assert!(registry.get_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_and_cancel_always_drops_the_record() {
        let dir = TempDir::new().unwrap();
        let registry = CleanupRegistry::new(dir.path());
        let import_file = dir.path().join("import.txt");
        std::fs::write(&import_file, "data").unwrap();

        registry.add_request("9", &import_file).await.unwrap();
        registry.add_request("10", &dir.path().join("gone.txt")).await.unwrap();

        for request in registry.get_requests().await.unwrap() {
            request.delete_and_cancel().await;
        }

        assert!(!import_file.exists());
        assert!(registry.get_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_keeps_the_import_file() {
        let dir = TempDir::new().unwrap();
        let registry = CleanupRegistry::new(dir.path());
        let import_file = dir.path().join("keep.txt");
        std::fs::write(&import_file, "data").unwrap();
        registry.add_request("11", &import_file).await.unwrap();

        let requests = registry.get_requests().await.unwrap();
        requests[0].cancel().await;

        assert!(import_file.exists());
        assert!(registry.get_requests().await.unwrap().is_empty());
    }
}
