//! Local filesystem storage implementation.
//!
//! Keeps one JSON document per feed for history and a directory of lease
//! generations per claimed feed. This backend is safe for any number of
//! workers sharing one filesystem; workers on several hosts should use a
//! shared backend such as S3Storage.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── config.toml           # Monitor configuration
//! ├── feeds.toml            # Feed catalog
//! ├── history/              # One HistoryRecord per feed
//! │   └── {key}.json
//! └── leases/               # One directory per claimed feed
//!     └── {key}/
//!         └── {generation}.json   # Lease, or empty once purged
//! ```
//!
//! ## Atomicity
//!
//! - **Records**: written to a unique temp file, then renamed over the target.
//! - **Leases**: the newest generation file is the feed's lease slot. A claim
//!   writes a temp file and hard-links it as the next generation; `link(2)`
//!   fails if that generation exists, so only one claimant per generation
//!   succeeds. A purge claims the next generation with an empty file instead
//!   of deleting the expired lease, which leaves no window in which a live
//!   lease could be removed. Older generations are pruned by the winner.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{HistoryRecord, Lease};
use crate::storage::{HISTORY_DIR, HistoryStore, LEASES_DIR, LeaseStore, document_key, history_key};

/// Distinguishes temp files written concurrently by one process.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// A temp path next to `path` that no other writer uses.
    fn tmp_path(path: &Path) -> PathBuf {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        path.with_extension(format!("{}.{}.tmp", std::process::id(), n))
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes to a fresh temp file next to `path`.
    async fn write_tmp(&self, path: &Path, bytes: &[u8]) -> Result<PathBuf> {
        self.ensure_dir(path).await?;

        let tmp = Self::tmp_path(path);
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        Ok(tmp)
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        let tmp = self.write_tmp(&path, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        read_optional(&self.path(key)).await
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Directory holding the lease generations of one resource.
    fn lease_dir(&self, resource_id: &str) -> PathBuf {
        self.path(LEASES_DIR).join(document_key(resource_id))
    }

    /// Link `bytes` in as `generation` of a lease directory.
    ///
    /// Returns `true` only when this call created the file and it is still
    /// the newest generation afterwards.
    async fn claim_generation(&self, dir: &Path, generation: u64, bytes: &[u8]) -> Result<bool> {
        let target = generation_path(dir, generation);
        let tmp = self.write_tmp(&target, bytes).await?;

        let linked = tokio::fs::hard_link(&tmp, &target).await;
        remove_if_present(&tmp).await?;

        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(AppError::Io(e)),
        }

        // A newer generation means this one was pruned before and is stale.
        if generations(dir).await?.last() != Some(&generation) {
            remove_if_present(&target).await?;
            return Ok(false);
        }

        for old in generations(dir).await? {
            if old < generation {
                remove_if_present(&generation_path(dir, old)).await?;
            }
        }
        Ok(true)
    }

    /// Paths of all `.json` documents in a directory.
    async fn list_documents(&self, dir: &str) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(self.path(dir)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AppError::Io(e)),
    }
}

/// Content of a lease generation file.
enum Slot {
    /// Released by a purge.
    Free,
    Held(Lease),
    Unreadable(serde_json::Error),
}

fn generation_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("{generation:020}.json"))
}

/// Generation numbers present in a lease directory, ascending.
async fn generations(dir: &Path) -> Result<Vec<u64>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(AppError::Io(e)),
    };

    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        if let Some(generation) = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<u64>().ok())
        {
            found.push(generation);
        }
    }
    found.sort_unstable();
    Ok(found)
}

/// The newest generation of a lease directory and what it holds.
async fn current_slot(dir: &Path) -> Result<Option<(u64, Slot)>> {
    loop {
        let Some(&generation) = generations(dir).await?.last() else {
            return Ok(None);
        };

        let Some(bytes) = read_optional(&generation_path(dir, generation)).await? else {
            // Pruned between listing and reading; a newer one exists.
            continue;
        };

        let slot = if bytes.is_empty() {
            Slot::Free
        } else {
            match serde_json::from_slice(&bytes) {
                Ok(lease) => Slot::Held(lease),
                Err(e) => Slot::Unreadable(e),
            }
        };
        return Ok(Some((generation, slot)));
    }
}

/// Subdirectories of `dir`, sorted.
async fn list_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(AppError::Io(e)),
    };

    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

async fn remove_if_present(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(AppError::Io(e)),
    }
}

#[async_trait]
impl HistoryStore for LocalStorage {
    async fn ping(&self) -> Result<()> {
        for dir in [HISTORY_DIR, LEASES_DIR] {
            tokio::fs::create_dir_all(self.path(dir)).await?;
        }

        let probe = self.write_tmp(&self.path(".ping"), b"ok").await?;
        tokio::fs::remove_file(&probe).await?;
        Ok(())
    }

    async fn find_record(&self, feed_id: &str) -> Result<Option<HistoryRecord>> {
        self.read_json(&history_key(feed_id)).await
    }

    async fn save_record(&self, record: &HistoryRecord) -> Result<()> {
        self.write_json(&history_key(&record.id), record).await
    }

    async fn list_records(&self) -> Result<Vec<HistoryRecord>> {
        let mut records = Vec::new();
        for path in self.list_documents(HISTORY_DIR).await? {
            if let Some(bytes) = read_optional(&path).await? {
                records.push(serde_json::from_slice::<HistoryRecord>(&bytes)?);
            }
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}

#[async_trait]
impl LeaseStore for LocalStorage {
    async fn purge_expired(&self, now: DateTime<Utc>, ttl: Duration) -> Result<usize> {
        let mut removed = 0;

        for dir in list_dirs(&self.path(LEASES_DIR)).await? {
            let Some((generation, slot)) = current_slot(&dir).await? else {
                continue;
            };

            let expired = match slot {
                Slot::Free => false,
                Slot::Held(lease) => lease.is_expired(now, ttl),
                Slot::Unreadable(e) => {
                    log::warn!("Releasing unreadable lease in {}: {}", dir.display(), e);
                    true
                }
            };

            // Never delete: the slot may already hold a newer claim.
            if expired && self.claim_generation(&dir, generation + 1, b"").await? {
                removed += 1;
            }
        }

        if removed > 0 {
            log::debug!("Purged {} expired lease(s)", removed);
        }
        Ok(removed)
    }

    async fn insert_lease_if_absent(&self, lease: &Lease) -> Result<Option<Lease>> {
        let dir = self.lease_dir(&lease.resource_id);

        let next = match current_slot(&dir).await? {
            None => 0,
            Some((generation, Slot::Free)) => generation + 1,
            Some((_, Slot::Held(existing))) => return Ok(Some(existing)),
            // Held until a purge releases it.
            Some((_, Slot::Unreadable(_))) => return Ok(Some(lease.clone())),
        };

        let bytes = serde_json::to_vec_pretty(lease)?;
        if self.claim_generation(&dir, next, &bytes).await? {
            return Ok(None);
        }

        match current_slot(&dir).await? {
            Some((_, Slot::Held(existing))) => Ok(Some(existing)),
            // The winner's lease was already purged again; it still held the slot.
            _ => Ok(Some(lease.clone())),
        }
    }

    async fn list_leases(&self) -> Result<Vec<Lease>> {
        let mut leases = Vec::new();
        for dir in list_dirs(&self.path(LEASES_DIR)).await? {
            match current_slot(&dir).await? {
                Some((_, Slot::Held(lease))) => leases.push(lease),
                Some((_, Slot::Unreadable(e))) => {
                    log::warn!("Skipping unreadable lease in {}: {}", dir.display(), e)
                }
                Some((_, Slot::Free)) | None => {}
            }
        }
        leases.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        Ok(leases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeedSource;
    use chrono::TimeZone;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage.write_bytes("test.txt", b"hello").await.unwrap();
        let data = storage.read_bytes("test.txt").await.unwrap();
        assert_eq!(data, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        assert!(storage.read_bytes("nope.txt").await.unwrap().is_none());
        assert!(storage.find_record("nope").await.unwrap().is_none());
        assert!(storage.list_records().await.unwrap().is_empty());
        assert!(storage.list_leases().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ping_creates_layout() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path().join("nested"));

        storage.ping().await.unwrap();
        assert!(tmp.path().join("nested/history").is_dir());
        assert!(tmp.path().join("nested/leases").is_dir());
    }

    #[tokio::test]
    async fn test_record_replace() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let feed = FeedSource::new("acme/jobs", "Acme", "https://acme.example/jobs.xml");

        let mut record = HistoryRecord::first_observation(&feed, t0(), t0(), None);
        storage.save_record(&record).await.unwrap();

        record.append_refresh(t0() + Duration::hours(1), t0() + Duration::hours(2), None);
        storage.save_record(&record).await.unwrap();

        let loaded = storage.find_record("acme/jobs").await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(storage.list_records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lease_insert_if_absent() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let first = Lease::new("feed", t0(), t0());

        assert_eq!(storage.insert_lease_if_absent(&first).await.unwrap(), None);
        let again = Lease::new("feed", t0() + Duration::seconds(1), t0());
        assert_eq!(
            storage.insert_lease_if_absent(&again).await.unwrap(),
            Some(first)
        );

        // No temp files left behind.
        let mut entries = std::fs::read_dir(storage.lease_dir("feed")).unwrap();
        assert!(entries.all(|e| e.unwrap().path().extension().unwrap() == "json"));
    }

    #[tokio::test]
    async fn test_concurrent_lease_inserts_grant_once() {
        let tmp = TempDir::new().unwrap();
        let storage = Arc::new(LocalStorage::new(tmp.path()));

        for trial in 0..20 {
            let resource = format!("feed-{trial}");
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let storage = Arc::clone(&storage);
                    let lease = Lease::new(resource.clone(), t0(), t0());
                    tokio::spawn(async move { storage.insert_lease_if_absent(&lease).await })
                })
                .collect();

            let mut granted = 0;
            for handle in handles {
                if handle.await.unwrap().unwrap().is_none() {
                    granted += 1;
                }
            }
            assert_eq!(granted, 1, "trial {trial}");
        }
    }

    #[tokio::test]
    async fn test_purge_expired_and_unreadable() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let ttl = Duration::minutes(10);

        storage
            .insert_lease_if_absent(&Lease::new("stale", t0(), t0()))
            .await
            .unwrap();
        storage
            .insert_lease_if_absent(&Lease::new("fresh", t0() + Duration::minutes(9), t0()))
            .await
            .unwrap();
        let broken = storage.lease_dir("broken");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(generation_path(&broken, 0), b"{").unwrap();

        let removed = storage
            .purge_expired(t0() + Duration::minutes(15), ttl)
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let leases = storage.list_leases().await.unwrap();
        assert_eq!(leases.len(), 1);
        assert_eq!(leases[0].resource_id, "fresh");
    }

    #[tokio::test]
    async fn test_purge_supersedes_and_prunes() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let ttl = Duration::minutes(10);
        let later = t0() + Duration::minutes(11);

        storage
            .insert_lease_if_absent(&Lease::new("feed", t0(), t0()))
            .await
            .unwrap();
        assert_eq!(storage.purge_expired(later, ttl).await.unwrap(), 1);
        // Already free: nothing more to purge.
        assert_eq!(storage.purge_expired(later, ttl).await.unwrap(), 0);
        assert!(storage.list_leases().await.unwrap().is_empty());

        let next = Lease::new("feed", later, later);
        assert_eq!(storage.insert_lease_if_absent(&next).await.unwrap(), None);
        assert_eq!(storage.list_leases().await.unwrap(), vec![next]);

        let dir = storage.lease_dir("feed");
        assert_eq!(generations(&dir).await.unwrap(), vec![2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stale_slot_race_grants_once() {
        let ttl = Duration::minutes(10);
        let later = t0() + Duration::minutes(11);

        for trial in 0..40 {
            let tmp = TempDir::new().unwrap();
            let storage = Arc::new(LocalStorage::new(tmp.path()));
            storage
                .insert_lease_if_absent(&Lease::new("feed", t0(), t0()))
                .await
                .unwrap();

            let handles: Vec<_> = (0..12)
                .map(|_| {
                    let storage = Arc::clone(&storage);
                    tokio::spawn(async move {
                        storage.purge_expired(later, ttl).await?;
                        storage
                            .insert_lease_if_absent(&Lease::new("feed", later, later))
                            .await
                    })
                })
                .collect();

            let mut granted = 0;
            for handle in handles {
                if handle.await.unwrap().unwrap().is_none() {
                    granted += 1;
                }
            }
            assert_eq!(granted, 1, "trial {trial}");
        }
    }
}
