// src/services/mod.rs

//! Core services: change detection, the lease lock and history aggregation.

pub mod detector;
pub mod history;
pub mod lease;

pub use detector::{Classification, classify};
pub use history::{HistoryAggregator, RecordOutcome};
pub use lease::LeaseLock;
