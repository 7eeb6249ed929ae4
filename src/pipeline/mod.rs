//! Pipeline entry points.
//!
//! - `run_dispatch`: one monitoring cycle over the feed catalog
//! - `run_validate`: check configuration and catalog
//! - `run_info`: summarize stored history and live leases

pub mod dispatch;
pub mod info;
pub mod validate;

pub use dispatch::{DispatchSummary, Dispatcher, FeedOutcome, run_dispatch};
pub use info::run_info;
pub use validate::run_validate;
