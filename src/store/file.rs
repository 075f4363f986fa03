//! Durable file-backed provision store
//!
//! Each claim's record is a JSON document named after the hex encoding of
//! its `namespace/name` key. Writes go to a temp file which is synced and
//! then renamed over the target, so readers only ever see whole records.
//! With `sync_writes` the directory is synced after each rename and unlink
//! so the new directory entry survives a power loss too.

use crate::domain::ports::{ClaimId, ProvisionRecord, ProvisionStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const RECORD_EXTENSION: &str = "json";
const TEMP_MARKER: &str = ".tmp-";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the file store
#[derive(Debug, Clone)]
pub struct FileStoreConfig {
    /// Directory holding record files
    pub root_path: PathBuf,
    /// Whether to fsync records before renaming them into place
    pub sync_writes: bool,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("/var/lib/fss-provisioner"),
            sync_writes: true,
        }
    }
}

// =============================================================================
// File Store
// =============================================================================

/// Provision store persisting records as files
pub struct FileStore {
    root_path: PathBuf,
    sync_writes: bool,
    /// Distinguishes temp files of concurrent writers
    write_seq: AtomicU64,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `config.root_path`
    pub async fn open(config: FileStoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.root_path).await?;

        let store = Self {
            root_path: config.root_path,
            sync_writes: config.sync_writes,
            write_seq: AtomicU64::new(0),
        };

        let removed = store.remove_stale_temp_files().await?;
        info!(
            path = %store.root_path.display(),
            stale_temp_files = removed,
            "Opened provision file store"
        );

        Ok(store)
    }

    /// Path of the record file for a claim
    fn record_path(&self, claim: &ClaimId) -> PathBuf {
        self.root_path
            .join(format!("{}.{}", encode_key(claim), RECORD_EXTENSION))
    }

    /// Flush directory entries of the root
    async fn sync_dir(&self) -> Result<()> {
        fs::File::open(&self.root_path).await?.sync_all().await?;
        Ok(())
    }

    /// Temp files left behind by an interrupted write are never valid records
    async fn remove_stale_temp_files(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.root_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.contains(TEMP_MARKER))
                .unwrap_or(false);
            if is_temp {
                debug!(path = %path.display(), "Removing stale temp file");
                fs::remove_file(&path).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn read_record(path: &Path) -> Result<Option<ProvisionRecord>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ProvisionStore for FileStore {
    async fn put(&self, claim: &ClaimId, record: &ProvisionRecord) -> Result<()> {
        let target = self.record_path(claim);
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let temp = target.with_file_name(format!(
            "{}.{}{}{}",
            encode_key(claim),
            RECORD_EXTENSION,
            TEMP_MARKER,
            seq
        ));

        let bytes = serde_json::to_vec_pretty(record)?;
        let mut file = fs::File::create(&temp).await?;
        file.write_all(&bytes).await?;
        if self.sync_writes {
            file.sync_all().await?;
        }
        drop(file);

        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(Error::Store(format!(
                "failed to replace record for {}: {}",
                claim, e
            )));
        }
        if self.sync_writes {
            self.sync_dir().await?;
        }

        debug!(claim = %claim, phase = %record.phase, "Persisted provision record");
        Ok(())
    }

    async fn get(&self, claim: &ClaimId) -> Result<ProvisionRecord> {
        Self::read_record(&self.record_path(claim))
            .await?
            .ok_or_else(|| Error::not_found("ProvisionRecord", claim.to_string()))
    }

    async fn delete(&self, claim: &ClaimId) -> Result<()> {
        match fs::remove_file(self.record_path(claim)).await {
            Ok(()) if self.sync_writes => self.sync_dir().await,
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<ProvisionRecord>> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.root_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e != RECORD_EXTENSION).unwrap_or(true) {
                continue;
            }

            match Self::read_record(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable record"),
            }
        }

        records.sort_by(|a, b| a.claim.cmp(&b.claim));
        Ok(records)
    }
}

/// Hex-encode a claim key into a file-name-safe string
fn encode_key(claim: &ClaimId) -> String {
    claim
        .to_string()
        .bytes()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::ProvisionPhase;
    use crate::store::tests::test_record;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    async fn open(dir: &TempDir) -> FileStore {
        FileStore::open(FileStoreConfig {
            root_path: dir.path().to_path_buf(),
            sync_writes: true,
        })
        .await
        .unwrap()
    }

    #[test]
    fn test_encode_key() {
        assert_eq!(encode_key(&ClaimId::new("a", "b")), "612f62");
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let record = test_record("default", "data");
        let claim = record.claim.clone();

        assert_matches!(store.get(&claim).await, Err(Error::NotFound { .. }));

        store.put(&claim, &record).await.unwrap();
        assert_eq!(store.get(&claim).await.unwrap(), record);

        store.delete(&claim).await.unwrap();
        store.delete(&claim).await.unwrap();
        assert!(store.find(&claim).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let mut record = test_record("team-a", "logs");
        record.transition(ProvisionPhase::Creating);
        record.mount_target_id = Some("ocid1.mounttarget.oc1.phx.xyz".into());

        {
            let store = open(&dir).await;
            store.put(&record.claim, &record).await.unwrap();
        }

        let store = open(&dir).await;
        let restored = store.get(&record.claim).await.unwrap();
        assert_eq!(restored.phase, ProvisionPhase::Creating);
        assert_eq!(restored, record);
    }

    #[tokio::test]
    async fn test_synced_replace_and_delete_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let kept = test_record("team-a", "kept");
        let mut replaced = test_record("team-a", "replaced");
        let removed = test_record("team-a", "removed");

        {
            let store = open(&dir).await;
            assert!(store.sync_writes);
            store.put(&kept.claim, &kept).await.unwrap();
            store.put(&replaced.claim, &replaced).await.unwrap();
            replaced.transition(ProvisionPhase::Creating);
            replaced.file_system_id = Some("ocid1.filesystem.oc1.phx.abc".into());
            store.put(&replaced.claim, &replaced).await.unwrap();
            store.put(&removed.claim, &removed).await.unwrap();
            store.delete(&removed.claim).await.unwrap();
        }

        let store = open(&dir).await;
        let names: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.claim.name)
            .collect();
        assert_eq!(names, vec!["kept", "replaced"]);
        assert_eq!(store.get(&replaced.claim).await.unwrap(), replaced);
        tokio_test::assert_ok!(store.sync_dir().await);
    }

    #[tokio::test]
    async fn test_replace_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let mut record = test_record("default", "data");

        for attempt in 0..5 {
            record.retry_count = attempt;
            store.put(&record.claim, &record).await.unwrap();
        }

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        assert_eq!(store.get(&record.claim).await.unwrap().retry_count, 4);
    }

    #[tokio::test]
    async fn test_stale_temp_files_ignored() {
        let dir = TempDir::new().unwrap();
        let record = test_record("default", "data");
        {
            let store = open(&dir).await;
            store.put(&record.claim, &record).await.unwrap();
        }

        let stale = dir
            .path()
            .join(format!("{}.json.tmp-7", encode_key(&record.claim)));
        std::fs::write(&stale, b"{ partial").unwrap();

        let store = open(&dir).await;
        assert!(!stale.exists());
        assert_eq!(store.list().await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn test_list_skips_corrupt_records() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let record = test_record("default", "good");
        store.put(&record.claim, &record).await.unwrap();

        std::fs::write(dir.path().join("bad.json"), b"not json").unwrap();

        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].claim.name, "good");
    }
}
