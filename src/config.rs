// src/config.rs

//! Configuration loading utilities.
//!
//! Resolves the monitor configuration and the feed catalog either from a
//! local storage directory or, under the `s3` feature, from an S3 prefix.

use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::models::{Config, FeedCatalog};

#[cfg(feature = "s3")]
pub use self::remote::RemoteConfigLoader;

/// Default config file name inside a storage directory or config prefix.
pub const CONFIG_FILE: &str = "config.toml";

/// Load configuration from `path`, falling back to defaults.
///
/// A file that exists but fails validation is an error; only a missing or
/// unparseable file falls back.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load_or_default(path);
    config.validate()?;
    Ok(config)
}

/// Load the config and the catalog it points at.
///
/// `config_path` defaults to `{base_path}/config.toml`; `catalog_override`
/// replaces the catalog path from the config.
pub fn load_all(
    base_path: &Path,
    config_path: Option<&Path>,
    catalog_override: Option<&Path>,
) -> Result<(Config, FeedCatalog)> {
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| base_path.join(CONFIG_FILE));
    let config = load_config(&config_path)?;

    let catalog_path: PathBuf = catalog_override
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.catalog_path(base_path));
    let catalog = FeedCatalog::load(&catalog_path)?;

    catalog
        .validate()
        .map_err(|e| AppError::catalog(format!("{}: {e}", catalog_path.display())))?;

    Ok((config, catalog))
}

#[cfg(feature = "s3")]
mod remote {
    use serde::de::DeserializeOwned;

    use crate::error::{AppError, Result};
    use crate::models::{Config, FeedCatalog};
    use crate::storage::s3::S3Storage;

    /// Loads config objects stored next to the data in S3.
    pub struct RemoteConfigLoader {
        storage: S3Storage,
        prefix: String,
    }

    impl RemoteConfigLoader {
        pub fn new(storage: S3Storage, config_prefix: &str) -> Self {
            Self {
                storage,
                prefix: config_prefix.trim_end_matches('/').to_string(),
            }
        }

        async fn load_text(&self, file_name: &str) -> Result<String> {
            let key = format!("{}/{}", self.prefix, file_name);
            log::info!("Loading config file from S3: {}", key);

            let bytes = self
                .storage
                .read_bytes_optional(&key)
                .await?
                .ok_or_else(|| AppError::config(format!("Config file not found in S3: {key}")))?;

            String::from_utf8(bytes).map_err(|e| {
                AppError::config(format!("Config file {key} is not valid UTF-8: {e}"))
            })
        }

        async fn load_toml<T: DeserializeOwned>(&self, file_name: &str) -> Result<T> {
            let text = self.load_text(file_name).await?;
            toml::from_str(&text).map_err(AppError::from)
        }

        pub async fn load_config(&self) -> Result<Config> {
            let config: Config = self.load_toml(super::CONFIG_FILE).await?;
            config.validate()?;
            Ok(config)
        }

        /// Load the catalog named by `config.catalog.path`.
        pub async fn load_catalog(&self, config: &Config) -> Result<FeedCatalog> {
            let name = config.catalog.path.as_str();
            let text = self.load_text(name).await?;
            let catalog = if name.ends_with(".json") {
                FeedCatalog::from_json(&text)?
            } else {
                FeedCatalog::from_toml(&text)?
            };
            catalog.validate()?;
            Ok(catalog)
        }
    }
}
