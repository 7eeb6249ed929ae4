// src/pipeline/dispatch.rs

//! Monitoring cycle: probe every feed, classify, and record refreshes.
//!
//! Each feed runs in its own task so a failure (or panic) while handling
//! one feed never stops the others. Within a feed the order is fixed:
//! probe, normalize, read the prior record, classify, and only for a
//! change or first observation claim the lease and write.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::error::Result;
use crate::models::{Config, FeedCatalog, FeedSource};
use crate::services::{Classification, HistoryAggregator, LeaseLock, RecordOutcome, classify};
use crate::storage::{HistoryStore, LeaseStore};
use crate::utils::log as report;
use crate::utils::{Prober, normalize_http_date};

/// What happened to a single feed during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedOutcome {
    /// No usable `Last-Modified`; nothing was read or written.
    Unavailable,
    /// The recorded timestamp is still current.
    Unchanged,
    /// A record was created for a feed seen for the first time.
    FirstRecorded,
    /// A refresh was appended.
    Updated { refresh_count: u64 },
    /// Another worker holds the feed's lease.
    Contended,
    /// The refresh was already stored by someone else.
    AlreadyRecorded,
}

/// Counters for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub checked: usize,
    pub unavailable: usize,
    pub unchanged: usize,
    pub first_observations: usize,
    pub updated: usize,
    pub contended: usize,
    pub already_recorded: usize,
    pub failed: usize,
}

impl DispatchSummary {
    fn record(&mut self, outcome: &FeedOutcome) {
        match outcome {
            FeedOutcome::Unavailable => self.unavailable += 1,
            FeedOutcome::Unchanged => self.unchanged += 1,
            FeedOutcome::FirstRecorded => self.first_observations += 1,
            FeedOutcome::Updated { .. } => self.updated += 1,
            FeedOutcome::Contended => self.contended += 1,
            FeedOutcome::AlreadyRecorded => self.already_recorded += 1,
        }
    }

    /// Feeds whose history was written this cycle.
    pub fn written(&self) -> usize {
        self.first_observations + self.updated
    }

    pub fn log(&self) {
        report::summary(
            "Monitoring cycle",
            &[
                ("Checked", self.checked.to_string()),
                ("Updated", self.updated.to_string()),
                ("First observations", self.first_observations.to_string()),
                ("Unchanged", self.unchanged.to_string()),
                ("Unavailable", self.unavailable.to_string()),
                ("Lease contended", self.contended.to_string()),
                ("Already recorded", self.already_recorded.to_string()),
                ("Failed", self.failed.to_string()),
            ],
        );
    }
}

/// Runs monitoring cycles over a set of feeds.
#[derive(Clone)]
pub struct Dispatcher {
    prober: Arc<dyn Prober>,
    history: HistoryAggregator,
    lease: LeaseLock,
    concurrency: usize,
}

impl Dispatcher {
    pub fn new(
        prober: Arc<dyn Prober>,
        history: HistoryAggregator,
        lease: LeaseLock,
        concurrency: usize,
    ) -> Self {
        Self {
            prober,
            history,
            lease,
            concurrency: concurrency.max(1),
        }
    }

    /// Wire a dispatcher from configuration and store handles.
    pub fn from_config(
        config: &Config,
        prober: Arc<dyn Prober>,
        history_store: Arc<dyn HistoryStore>,
        lease_store: Arc<dyn LeaseStore>,
    ) -> Self {
        let history = HistoryAggregator::new(history_store)
            .with_local_offset(config.history.local_offset());
        let lease = LeaseLock::from_config(lease_store, &config.lease);
        Self::new(prober, history, lease, config.monitor.max_concurrent)
    }

    /// Process every feed once, at most `concurrency` at a time.
    pub async fn run(&self, feeds: &[FeedSource]) -> DispatchSummary {
        let mut summary = DispatchSummary::default();

        let mut tasks = stream::iter(feeds.iter().cloned())
            .map(|feed| {
                let this = self.clone();
                tokio::spawn(async move {
                    let result = this.process_feed(&feed).await;
                    (feed, result)
                })
            })
            .buffer_unordered(self.concurrency);

        while let Some(joined) = tasks.next().await {
            summary.checked += 1;
            match joined {
                Ok((_, Ok(outcome))) => summary.record(&outcome),
                Ok((feed, Err(e))) => {
                    summary.failed += 1;
                    log::error!("{}: {}", feed.id, e);
                }
                Err(e) => {
                    summary.failed += 1;
                    log::error!("Feed task aborted: {}", e);
                }
            }
        }

        summary
    }

    /// Run the full per-feed sequence for one feed.
    pub async fn process_feed(&self, feed: &FeedSource) -> Result<FeedOutcome> {
        let raw = self.prober.last_modified(&feed.url).await;
        let Some(observed) = raw.as_deref().and_then(normalize_http_date) else {
            log::warn!(
                "{}: no usable Last-Modified ({}), skipping",
                feed.id,
                raw.as_deref().unwrap_or("missing")
            );
            return Ok(FeedOutcome::Unavailable);
        };

        let prior = self.history.find(&feed.id).await?;

        match classify(Some(observed), prior.as_ref()) {
            Classification::Unavailable => Ok(FeedOutcome::Unavailable),
            Classification::Unchanged { .. } => {
                log::info!("{}: unchanged since {}", feed.id, observed);
                Ok(FeedOutcome::Unchanged)
            }
            Classification::FirstObservation { observed } => {
                if !self.lease.try_acquire(&feed.id, observed).await? {
                    log::debug!("{}: lease held elsewhere, skipping", feed.id);
                    return Ok(FeedOutcome::Contended);
                }

                match self
                    .history
                    .record_first_observation(feed, observed, Utc::now())
                    .await?
                {
                    RecordOutcome::Recorded { .. } => {
                        log::info!("{}: first observation at {}", feed.id, observed);
                        Ok(FeedOutcome::FirstRecorded)
                    }
                    RecordOutcome::AlreadyRecorded => Ok(FeedOutcome::AlreadyRecorded),
                }
            }
            Classification::Changed { previous, observed } => {
                if !self.lease.try_acquire(&feed.id, observed).await? {
                    log::debug!("{}: lease held elsewhere, skipping", feed.id);
                    return Ok(FeedOutcome::Contended);
                }

                match self
                    .history
                    .record_change(&feed.id, observed, Utc::now())
                    .await?
                {
                    RecordOutcome::Recorded { refresh_count } => {
                        log::info!(
                            "{}: updated {} -> {} (refresh #{})",
                            feed.id,
                            previous.map_or_else(|| "never".to_string(), |t| t.to_string()),
                            observed,
                            refresh_count
                        );
                        Ok(FeedOutcome::Updated { refresh_count })
                    }
                    RecordOutcome::AlreadyRecorded => Ok(FeedOutcome::AlreadyRecorded),
                }
            }
        }
    }
}

/// Run one monitoring cycle over a catalog.
///
/// Fails only when the catalog is invalid or the store is unreachable;
/// per-feed errors are counted in the summary.
pub async fn run_dispatch<S>(
    config: &Config,
    catalog: &FeedCatalog,
    store: Arc<S>,
    prober: Arc<dyn Prober>,
) -> Result<DispatchSummary>
where
    S: HistoryStore + LeaseStore + 'static,
{
    let start_time = Utc::now();
    report::header("Feed monitor");

    catalog.validate()?;
    HistoryStore::ping(store.as_ref()).await?;

    report::step(1, 2, &format!("Probing {} feeds", catalog.len()));
    if config.logging.show_progress {
        report::sub_item(&format!(
            "Concurrency {}, lease TTL {}s",
            config.monitor.max_concurrent, config.lease.ttl_secs
        ));
    }

    let history_store: Arc<dyn HistoryStore> = store.clone();
    let lease_store: Arc<dyn LeaseStore> = store;
    let dispatcher = Dispatcher::from_config(config, prober, history_store, lease_store);
    let summary = dispatcher.run(&catalog.feeds).await;

    report::step(2, 2, "Cycle complete");
    summary.log();
    report::success(&format!(
        "{} feeds written in {}s",
        summary.written(),
        (Utc::now() - start_time).num_seconds()
    ));

    Ok(summary)
}
