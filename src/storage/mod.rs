//! Storage abstractions for history records and write leases.
//!
//! A backend provides three primitives:
//! - find a history record by feed id
//! - replace a history record as a whole document
//! - insert a lease only if none exists, reporting the lease that was
//!   already there in the same atomic step
//!
//! Purging must only ever remove the expired lease it inspected, never a
//! lease claimed after it was read.
//!
//! ## Layout
//!
//! Document backends share one key scheme:
//!
//! ```text
//! {root}/
//! ├── history/
//! │   └── {key}.json        # HistoryRecord
//! └── leases/
//!     └── {key}.json        # Lease
//! ```
//!
//! where `{key}` is [`document_key`] of the feed id. The filesystem backend
//! keeps a directory of lease generations under `leases/{key}/` instead.

pub mod local;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::models::{HistoryRecord, Lease};

// Re-export for convenience
pub use local::LocalStorage;
pub use memory::MemoryStore;

/// Directory (or key prefix) holding history records.
pub const HISTORY_DIR: &str = "history";

/// Directory (or key prefix) holding leases.
pub const LEASES_DIR: &str = "leases";

/// Object-name-safe key for a feed id.
pub fn document_key(feed_id: &str) -> String {
    hex::encode(Sha256::digest(feed_id.as_bytes()))
}

/// Relative path of a feed's history document.
pub fn history_key(feed_id: &str) -> String {
    format!("{}/{}.json", HISTORY_DIR, document_key(feed_id))
}

/// Relative path of a feed's lease document.
pub fn lease_key(feed_id: &str) -> String {
    format!("{}/{}.json", LEASES_DIR, document_key(feed_id))
}

/// Persistence of per-feed history records.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Verify the store is reachable and writable.
    async fn ping(&self) -> Result<()>;

    /// Load the record for a feed id.
    async fn find_record(&self, feed_id: &str) -> Result<Option<HistoryRecord>>;

    /// Replace the record keyed by `record.id` with the full document.
    async fn save_record(&self, record: &HistoryRecord) -> Result<()>;

    /// All stored records.
    async fn list_records(&self) -> Result<Vec<HistoryRecord>>;
}

/// Shared store backing the lease lock.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Delete every lease that is expired at `now`. Returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>, ttl: Duration) -> Result<usize>;

    /// Insert `lease` unless a lease for the same resource exists.
    ///
    /// Returns the lease that existed before the call, or `None` when the
    /// insert took place. Check and insert are a single atomic operation.
    async fn insert_lease_if_absent(&self, lease: &Lease) -> Result<Option<Lease>>;

    /// All stored leases, expired or not.
    async fn list_leases(&self) -> Result<Vec<Lease>>;
}
