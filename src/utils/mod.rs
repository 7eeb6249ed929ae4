//! Utility functions and helpers.

pub mod http;
pub mod log;
pub mod time;

pub use http::{HttpProber, Prober, create_async_client};
pub use time::normalize_http_date;
