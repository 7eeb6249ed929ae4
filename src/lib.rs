// src/lib.rs

//! Feed monitor library.
//!
//! Probes job-listing feeds for `Last-Modified`, detects refreshes against
//! stored history and records them under a per-feed lease.

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
