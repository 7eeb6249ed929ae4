// src/models/mod.rs

//! Domain models for the feed monitor.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod feed;
pub mod history;
mod lease;

// Re-export all public types
pub use config::{CatalogConfig, Config, HistoryConfig, LeaseConfig, LoggingConfig, MonitorConfig};
pub use feed::{FeedCatalog, FeedSource};
pub use history::{DayBucket, HistoryRecord, RefreshEvent};
pub use lease::{Lease, LeaseState};
