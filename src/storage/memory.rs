//! In-process storage backend.
//!
//! Holds records and leases in memory for tests and dry runs. A single
//! mutex guards each map, so the lease check-and-insert is atomic across
//! every task sharing the store.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::models::{HistoryRecord, Lease};
use crate::storage::{HistoryStore, LeaseStore};

/// Memory-backed history and lease store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, HistoryRecord>>,
    leases: Mutex<HashMap<String, Lease>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing records.
    pub fn with_records(records: impl IntoIterator<Item = HistoryRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        Self {
            records: Mutex::new(records),
            leases: Mutex::default(),
        }
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn find_record(&self, feed_id: &str) -> Result<Option<HistoryRecord>> {
        Ok(self.records.lock().await.get(feed_id).cloned())
    }

    async fn save_record(&self, record: &HistoryRecord) -> Result<()> {
        self.records
            .lock()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn list_records(&self) -> Result<Vec<HistoryRecord>> {
        let mut records: Vec<_> = self.records.lock().await.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn purge_expired(&self, now: DateTime<Utc>, ttl: Duration) -> Result<usize> {
        let mut leases = self.leases.lock().await;
        let before = leases.len();
        leases.retain(|_, lease| !lease.is_expired(now, ttl));
        Ok(before - leases.len())
    }

    async fn insert_lease_if_absent(&self, lease: &Lease) -> Result<Option<Lease>> {
        let mut leases = self.leases.lock().await;
        match leases.entry(lease.resource_id.clone()) {
            Entry::Occupied(existing) => Ok(Some(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(lease.clone());
                Ok(None)
            }
        }
    }

    async fn list_leases(&self) -> Result<Vec<Lease>> {
        let mut leases: Vec<_> = self.leases.lock().await.values().cloned().collect();
        leases.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        Ok(leases)
    }
}
