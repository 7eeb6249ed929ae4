//! Monitored feed descriptors and the catalog that lists them.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};

/// A feed endpoint to probe. Read-only for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedSource {
    /// Stable identifier, also the history record key
    #[serde(alias = "employerId")]
    pub id: String,

    /// Human-readable name
    #[serde(alias = "employerName")]
    pub display_name: String,

    /// Feed URL probed with HEAD
    #[serde(alias = "xml_url")]
    pub url: String,
}

impl FeedSource {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            url: url.into(),
        }
    }
}

/// The list of feeds processed by one dispatch cycle.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FeedCatalog {
    #[serde(default)]
    pub feeds: Vec<FeedSource>,
}

/// JSON catalogs may be a bare array or wrapped in `{ "feeds": [...] }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum JsonCatalog {
    Bare(Vec<FeedSource>),
    Wrapped(FeedCatalog),
}

impl FeedCatalog {
    pub fn new(feeds: Vec<FeedSource>) -> Self {
        Self { feeds }
    }

    /// Load a catalog file. `.json` files are read as JSON, anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            AppError::catalog(format!("cannot read {}: {e}", path.display()))
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_toml(&content)
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| AppError::catalog(format!("invalid TOML catalog: {e}")))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let parsed: JsonCatalog = serde_json::from_str(content)
            .map_err(|e| AppError::catalog(format!("invalid JSON catalog: {e}")))?;
        Ok(match parsed {
            JsonCatalog::Bare(feeds) => Self { feeds },
            JsonCatalog::Wrapped(catalog) => catalog,
        })
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    /// Check ids are present and unique and every URL is absolute http(s).
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();

        for feed in &self.feeds {
            if feed.id.trim().is_empty() {
                return Err(AppError::validation(format!(
                    "feed with url {} has an empty id",
                    feed.url
                )));
            }
            if !seen.insert(feed.id.as_str()) {
                return Err(AppError::validation(format!(
                    "duplicate feed id: {}",
                    feed.id
                )));
            }

            let url = Url::parse(&feed.url)?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(AppError::validation(format!(
                    "feed {} has unsupported scheme: {}",
                    feed.id,
                    url.scheme()
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_catalog() {
        let catalog = FeedCatalog::from_toml(
            r#"
            [[feeds]]
            id = "acme"
            display_name = "Acme Corp"
            url = "https://acme.example/jobs.xml"

            [[feeds]]
            id = "globex"
            display_name = "Globex"
            url = "https://globex.example/feed.xml"
            "#,
        )
        .unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.feeds[1].display_name, "Globex");
        assert!(catalog.validate().is_ok());
    }

    #[test]
    fn test_json_catalog_accepts_source_field_names() {
        let catalog = FeedCatalog::from_json(
            r#"[{"employerId": "e-1", "employerName": "Initech", "xml_url": "http://initech.example/a.xml"}]"#,
        )
        .unwrap();

        assert_eq!(
            catalog.feeds[0],
            FeedSource::new("e-1", "Initech", "http://initech.example/a.xml")
        );

        let wrapped = FeedCatalog::from_json(
            r#"{"feeds": [{"id": "x", "display_name": "X", "url": "https://x.example/"}]}"#,
        )
        .unwrap();
        assert_eq!(wrapped.feeds[0].id, "x");
    }

    #[test]
    fn test_validate_rejects_duplicates_and_bad_urls() {
        let dup = FeedCatalog::new(vec![
            FeedSource::new("a", "A", "https://a.example/"),
            FeedSource::new("a", "A again", "https://a2.example/"),
        ]);
        assert!(matches!(dup.validate(), Err(AppError::Validation(_))));

        let ftp = FeedCatalog::new(vec![FeedSource::new("f", "F", "ftp://f.example/feed")]);
        assert!(ftp.validate().is_err());

        let relative = FeedCatalog::new(vec![FeedSource::new("r", "R", "/feed.xml")]);
        assert!(matches!(relative.validate(), Err(AppError::Url(_))));
    }

    #[test]
    fn test_missing_file_is_catalog_error() {
        let err = FeedCatalog::load("/definitely/not/here/feeds.toml").unwrap_err();
        assert!(matches!(err, AppError::Catalog(_)));
    }
}
