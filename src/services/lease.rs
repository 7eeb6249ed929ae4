// src/services/lease.rs

//! Lease lock guarding history writes.
//!
//! A lease is claimed right before a refresh is recorded and is never
//! released: it simply stops counting once it is older than the TTL and is
//! purged on the next claim attempt. A worker that crashes mid-write can
//! therefore block its feed for at most one TTL.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::models::{Lease, LeaseConfig, LeaseState};
use crate::storage::LeaseStore;

/// Claims feed ids for writing through a shared [`LeaseStore`].
#[derive(Clone)]
pub struct LeaseLock {
    store: Arc<dyn LeaseStore>,
    ttl: Duration,
}

impl LeaseLock {
    pub fn new(store: Arc<dyn LeaseStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn from_config(store: Arc<dyn LeaseStore>, config: &LeaseConfig) -> Self {
        Self::new(store, config.ttl())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Try to claim `resource_id` for recording `timestamp`.
    ///
    /// Returns `true` only for the caller whose insert found no lease.
    pub async fn try_acquire(&self, resource_id: &str, timestamp: DateTime<Utc>) -> Result<bool> {
        self.try_acquire_at(resource_id, timestamp, Utc::now()).await
    }

    /// [`try_acquire`](Self::try_acquire) with an explicit clock.
    pub async fn try_acquire_at(
        &self,
        resource_id: &str,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.store.purge_expired(now, self.ttl).await?;

        let lease = Lease::new(resource_id, now, timestamp);
        match self.store.insert_lease_if_absent(&lease).await? {
            None => Ok(true),
            Some(existing) => {
                log::debug!(
                    "Lease on {} held since {} ({:?})",
                    resource_id,
                    existing.acquired_at,
                    existing.state(now, self.ttl)
                );
                Ok(false)
            }
        }
    }

    /// State of every stored lease at `now`.
    pub async fn states_at(&self, now: DateTime<Utc>) -> Result<Vec<(Lease, LeaseState)>> {
        let leases = self.store.list_leases().await?;
        Ok(leases
            .into_iter()
            .map(|lease| {
                let state = lease.state(now, self.ttl);
                (lease, state)
            })
            .collect())
    }
}
