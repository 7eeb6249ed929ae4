// src/pipeline/validate.rs

use std::path::Path;

use crate::config::load_all;
use crate::error::Result;
use crate::utils::log as report;

/// Validate the configuration and the feed catalog it points at.
pub fn run_validate(
    base_path: &Path,
    config_path: Option<&Path>,
    catalog_path: Option<&Path>,
) -> Result<()> {
    report::header("Validating configuration");

    match load_all(base_path, config_path, catalog_path) {
        Ok((config, catalog)) => {
            report::success("Config OK");
            report::sub_item(&format!("User agent: {}", config.monitor.user_agent));
            report::sub_item(&format!("Timeout: {}s", config.monitor.timeout_secs));
            report::sub_item(&format!("Max concurrent: {}", config.monitor.max_concurrent));
            report::sub_item(&format!("Lease TTL: {}s", config.lease.ttl_secs));

            report::success("Catalog OK");
            report::sub_item(&format!("Feeds: {}", catalog.len()));
            Ok(())
        }
        Err(e) => {
            log::error!("Validation failed: {}", e);
            Err(e)
        }
    }
}
