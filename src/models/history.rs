//! Append-only refresh history kept per feed.
//!
//! A [`HistoryRecord`] is one document per feed id. Detected refreshes are
//! grouped into [`DayBucket`]s keyed by the UTC date on which they were
//! detected:
//!
//! ```text
//! HistoryRecord { id, refresh_count, last_updated_at, daily_log }
//!     └── DayBucket { date: "2024-01-01", count, events }
//!             └── RefreshEvent { checked_at, observed_update_at }
//! ```

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::models::FeedSource;

/// Date format of [`DayBucket::date`].
pub const DAY_FORMAT: &str = "%Y-%m-%d";

/// Durable refresh history of one monitored feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryRecord {
    pub id: String,
    pub display_name: String,
    pub url: String,

    /// Number of detected refresh events, including the first observation
    pub refresh_count: u64,

    /// Feed timestamp of the most recently recorded refresh
    #[serde(default)]
    pub last_updated_at: Option<DateTime<Utc>>,

    /// `last_updated_at` in the configured display offset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_local: Option<DateTime<FixedOffset>>,

    /// Buckets ordered by date ascending, one per date
    #[serde(default)]
    pub daily_log: Vec<DayBucket>,
}

/// Refresh events detected on one UTC calendar date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayBucket {
    /// UTC date, `YYYY-MM-DD`
    pub date: String,
    pub count: u64,
    /// In detection order
    pub events: Vec<RefreshEvent>,
}

/// A single detected refresh. Never modified after it is appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshEvent {
    /// When the probe that detected the refresh ran
    pub checked_at: DateTime<Utc>,

    /// The feed's normalized `Last-Modified`
    pub observed_update_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_local: Option<DateTime<FixedOffset>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_local: Option<DateTime<FixedOffset>>,
}

impl RefreshEvent {
    pub fn new(
        checked_at: DateTime<Utc>,
        observed_update_at: DateTime<Utc>,
        local: Option<FixedOffset>,
    ) -> Self {
        Self {
            checked_at,
            observed_update_at,
            checked_local: local.map(|offset| checked_at.with_timezone(&offset)),
            observed_local: local.map(|offset| observed_update_at.with_timezone(&offset)),
        }
    }
}

impl DayBucket {
    fn new(date: String, event: RefreshEvent) -> Self {
        Self {
            date,
            count: 1,
            events: vec![event],
        }
    }

    fn push(&mut self, event: RefreshEvent) {
        self.events.push(event);
        self.count += 1;
    }
}

/// UTC calendar date used as the bucket key for `now`.
pub fn day_key(now: DateTime<Utc>) -> String {
    now.format(DAY_FORMAT).to_string()
}

impl HistoryRecord {
    /// Build the record for a feed seen for the first time.
    pub fn first_observation(
        feed: &FeedSource,
        observed: DateTime<Utc>,
        now: DateTime<Utc>,
        local: Option<FixedOffset>,
    ) -> Self {
        let event = RefreshEvent::new(now, observed, local);
        Self {
            id: feed.id.clone(),
            display_name: feed.display_name.clone(),
            url: feed.url.clone(),
            refresh_count: 1,
            last_updated_at: Some(observed),
            last_updated_local: local.map(|offset| observed.with_timezone(&offset)),
            daily_log: vec![DayBucket::new(day_key(now), event)],
        }
    }

    /// Append a refresh detected at `now` for the feed timestamp `observed`.
    ///
    /// Events land in the bucket for `now`'s UTC date, which is created in
    /// date order if it does not exist yet.
    pub fn append_refresh(
        &mut self,
        observed: DateTime<Utc>,
        now: DateTime<Utc>,
        local: Option<FixedOffset>,
    ) {
        let date = day_key(now);
        let event = RefreshEvent::new(now, observed, local);

        match self
            .daily_log
            .binary_search_by(|bucket| bucket.date.as_str().cmp(date.as_str()))
        {
            Ok(index) => self.daily_log[index].push(event),
            Err(index) => self.daily_log.insert(index, DayBucket::new(date, event)),
        }

        self.refresh_count += 1;
        self.last_updated_at = Some(observed);
        self.last_updated_local = local.map(|offset| observed.with_timezone(&offset));
    }

    /// Bucket for a given `YYYY-MM-DD` date.
    pub fn bucket(&self, date: &str) -> Option<&DayBucket> {
        self.daily_log.iter().find(|bucket| bucket.date == date)
    }

    /// Sum of all bucket counts.
    pub fn bucket_total(&self) -> u64 {
        self.daily_log.iter().map(|bucket| bucket.count).sum()
    }

    /// Number of refreshes recorded on `date`.
    pub fn refreshes_on(&self, date: &str) -> u64 {
        self.bucket(date).map_or(0, |bucket| bucket.count)
    }

    /// Check the structural invariants of the record.
    ///
    /// Returns a description of the first violation found.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        if self.refresh_count != self.bucket_total() {
            return Err(format!(
                "refresh_count {} != bucket total {}",
                self.refresh_count,
                self.bucket_total()
            ));
        }

        for pair in self.daily_log.windows(2) {
            if pair[0].date >= pair[1].date {
                return Err(format!(
                    "daily_log out of order or duplicated at {}",
                    pair[1].date
                ));
            }
        }

        for bucket in &self.daily_log {
            if bucket.count == 0 || bucket.count != bucket.events.len() as u64 {
                return Err(format!(
                    "bucket {} count {} does not match {} events",
                    bucket.date,
                    bucket.count,
                    bucket.events.len()
                ));
            }
        }

        let latest = self
            .daily_log
            .iter()
            .flat_map(|bucket| bucket.events.iter())
            .max_by_key(|event| event.checked_at)
            .map(|event| event.observed_update_at);
        if latest.is_some() && latest != self.last_updated_at {
            return Err("last_updated_at does not match the latest event".to_string());
        }

        Ok(())
    }
}
