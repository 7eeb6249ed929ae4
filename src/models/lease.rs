//! Write lease records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A time-bounded claim on a feed id. There is no release; leases expire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lease {
    /// The claimed feed id
    pub resource_id: String,

    /// When the claim was made
    pub acquired_at: DateTime<Utc>,

    /// The feed timestamp the holder is about to record
    pub associated_timestamp: DateTime<Utc>,
}

/// State of a lease slot at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Free,
    Leased { until: DateTime<Utc> },
}

impl Lease {
    pub fn new(
        resource_id: impl Into<String>,
        acquired_at: DateTime<Utc>,
        associated_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            acquired_at,
            associated_timestamp,
        }
    }

    /// Instant after which the lease no longer blocks claims.
    pub fn expires_at(&self, ttl: Duration) -> DateTime<Utc> {
        self.acquired_at + ttl
    }

    /// Whether the lease is older than `ttl` at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.expires_at(ttl) < now
    }

    pub fn state(&self, now: DateTime<Utc>, ttl: Duration) -> LeaseState {
        if self.is_expired(now, ttl) {
            LeaseState::Free
        } else {
            LeaseState::Leased {
                until: self.expires_at(ttl),
            }
        }
    }
}
