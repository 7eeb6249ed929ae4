// src/services/detector.rs

//! Change detection against the persisted history.
//!
//! Comparison is always between normalized instants, never raw header
//! strings, so servers that reformat an unchanged date do not register as
//! refreshed.

use chrono::{DateTime, Utc};

use crate::models::HistoryRecord;

/// Outcome of comparing a probe against the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// No usable `Last-Modified`; the feed is skipped this cycle.
    Unavailable,
    /// No record exists for the feed yet.
    FirstObservation { observed: DateTime<Utc> },
    /// The feed still reports the recorded timestamp.
    Unchanged { observed: DateTime<Utc> },
    /// The feed reports a timestamp different from the recorded one.
    Changed {
        previous: Option<DateTime<Utc>>,
        observed: DateTime<Utc>,
    },
}

impl Classification {
    /// Whether this outcome leads to a history write.
    pub fn needs_write(&self) -> bool {
        matches!(self, Self::FirstObservation { .. } | Self::Changed { .. })
    }

    /// The probed timestamp, when one was available.
    pub fn observed(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Unavailable => None,
            Self::FirstObservation { observed }
            | Self::Unchanged { observed }
            | Self::Changed { observed, .. } => Some(*observed),
        }
    }
}

/// Classify a normalized probe result against the feed's prior record.
pub fn classify(
    normalized: Option<DateTime<Utc>>,
    prior: Option<&HistoryRecord>,
) -> Classification {
    let Some(observed) = normalized else {
        return Classification::Unavailable;
    };

    match prior {
        None => Classification::FirstObservation { observed },
        Some(record) if record.last_updated_at == Some(observed) => {
            Classification::Unchanged { observed }
        }
        Some(record) => Classification::Changed {
            previous: record.last_updated_at,
            observed,
        },
    }
}
