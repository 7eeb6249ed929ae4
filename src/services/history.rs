// src/services/history.rs

//! History aggregation service.
//!
//! Loads, mutates and persists [`HistoryRecord`]s. Callers must hold the
//! feed's lease before calling any recording method; the service itself
//! only guards against re-recording a refresh that is already stored.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};

use crate::error::{AppError, Result};
use crate::models::{FeedSource, HistoryRecord};
use crate::storage::HistoryStore;

/// Result of a recording call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The record was written; carries the new refresh count.
    Recorded { refresh_count: u64 },
    /// The store already holds this refresh (or, for a first observation,
    /// some record); nothing was written.
    AlreadyRecorded,
}

/// Appends refresh events to per-feed history records.
#[derive(Clone)]
pub struct HistoryAggregator {
    store: Arc<dyn HistoryStore>,
    local_offset: Option<FixedOffset>,
}

impl HistoryAggregator {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self {
            store,
            local_offset: None,
        }
    }

    /// Also render timestamps in `offset` on every written event.
    pub fn with_local_offset(mut self, offset: Option<FixedOffset>) -> Self {
        self.local_offset = offset;
        self
    }

    /// Load the current record for a feed.
    pub async fn find(&self, feed_id: &str) -> Result<Option<HistoryRecord>> {
        self.store.find_record(feed_id).await
    }

    /// Create the record of a feed seen for the first time.
    ///
    /// Never overwrites: if a record appeared since the caller last looked,
    /// the call is a no-op and the next cycle classifies against it.
    pub async fn record_first_observation(
        &self,
        feed: &FeedSource,
        observed: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome> {
        if self.store.find_record(&feed.id).await?.is_some() {
            return Ok(RecordOutcome::AlreadyRecorded);
        }

        let record = HistoryRecord::first_observation(feed, observed, now, self.local_offset);
        self.store.save_record(&record).await?;

        Ok(RecordOutcome::Recorded {
            refresh_count: record.refresh_count,
        })
    }

    /// Append a refresh to an existing record and persist it.
    pub async fn record_change(
        &self,
        feed_id: &str,
        observed: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome> {
        let mut record = self
            .store
            .find_record(feed_id)
            .await?
            .ok_or_else(|| AppError::feed(feed_id, "history record disappeared before update"))?;

        if record.last_updated_at == Some(observed) {
            return Ok(RecordOutcome::AlreadyRecorded);
        }

        record.append_refresh(observed, now, self.local_offset);
        self.store.save_record(&record).await?;

        Ok(RecordOutcome::Recorded {
            refresh_count: record.refresh_count,
        })
    }
}
