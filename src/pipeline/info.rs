// src/pipeline/info.rs

//! Store inspection.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::models::{Config, LeaseState};
use crate::services::LeaseLock;
use crate::storage::{HistoryStore, LeaseStore};
use crate::utils::log as report;

/// One line of the store overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordSummary {
    pub id: String,
    pub display_name: String,
    pub refresh_count: u64,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub active_days: usize,
}

/// Overview of stored history and leases at one instant.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreInfo {
    pub records: Vec<RecordSummary>,
    pub live_leases: Vec<String>,
    pub expired_leases: usize,
}

/// Summarize every stored record and lease as of `now`.
pub async fn run_info<S>(config: &Config, store: Arc<S>, now: DateTime<Utc>) -> Result<StoreInfo>
where
    S: HistoryStore + LeaseStore + 'static,
{
    report::header("Store info");

    let records = HistoryStore::list_records(store.as_ref()).await?;
    let lock = LeaseLock::from_config(store, &config.lease);

    let mut info = StoreInfo {
        records: records
            .iter()
            .map(|record| RecordSummary {
                id: record.id.clone(),
                display_name: record.display_name.clone(),
                refresh_count: record.refresh_count,
                last_updated_at: record.last_updated_at,
                active_days: record.daily_log.len(),
            })
            .collect(),
        ..StoreInfo::default()
    };

    for (lease, state) in lock.states_at(now).await? {
        match state {
            LeaseState::Leased { .. } => info.live_leases.push(lease.resource_id),
            LeaseState::Free => info.expired_leases += 1,
        }
    }

    for record in &info.records {
        report::sub_item(&format!(
            "{} ({}): {} refreshes over {} days, last {}",
            record.id,
            record.display_name,
            record.refresh_count,
            record.active_days,
            record
                .last_updated_at
                .map_or_else(|| "never".to_string(), |t| t.to_rfc3339()),
        ));
    }

    report::summary(
        "Store",
        &[
            ("Records", info.records.len().to_string()),
            ("Live leases", info.live_leases.len().to_string()),
            ("Expired leases", info.expired_leases.to_string()),
        ],
    );

    Ok(info)
}
