//! AWS S3 storage implementation.
//!
//! Stores history records and leases as JSON objects under a key prefix:
//! - Records: `{prefix}/history/{key}.json`, replaced with a plain `PutObject`
//! - Leases: `{prefix}/leases/{key}.json`, created with a conditional
//!   `PutObject` (`If-None-Match: *`) so S3 itself decides which of several
//!   racing workers gets the lease, and purged with a `DeleteObject`
//!   conditioned on the ETag of the expired version that was read

use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use log::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::models::{HistoryRecord, Lease};
use crate::storage::{HISTORY_DIR, HistoryStore, LEASES_DIR, LeaseStore, history_key, lease_key};

/// HTTP status S3 answers when a conditional write loses.
const PRECONDITION_FAILED: u16 = 412;
/// HTTP status S3 answers when two conditional writes overlap.
const CONDITIONAL_CONFLICT: u16 = 409;
/// HTTP status of a conditional delete whose object is already gone.
const NOT_FOUND: u16 = 404;

/// Whether a failed conditional request lost to a concurrent writer.
fn lost_condition(status: Option<u16>) -> bool {
    matches!(status, Some(PRECONDITION_FAILED | CONDITIONAL_CONFLICT))
}

/// S3-based history and lease storage.
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Storage {
    /// Create a new S3 storage instance.
    pub fn new(client: Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    /// Create S3 storage from environment configuration.
    pub async fn from_env() -> Result<Self> {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = Client::new(&config);

        let bucket = std::env::var("S3_BUCKET").unwrap_or_else(|_| "feedwatch".to_string());
        let prefix = std::env::var("S3_PREFIX").unwrap_or_else(|_| "feedwatch".to_string());

        Ok(Self::new(client, bucket, prefix))
    }

    /// Full object key for a key relative to the prefix.
    fn key(&self, relative: &str) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            relative.to_string()
        } else {
            format!("{}/{}", prefix, relative)
        }
    }

    /// Read an object and its ETag, returning None if it doesn't exist.
    async fn read_object(&self, key: &str) -> Result<Option<(Vec<u8>, Option<String>)>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let etag = output.e_tag().map(str::to_string);
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| AppError::S3(e.to_string()))?;
                Ok(Some((bytes.into_bytes().to_vec(), etag)))
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(AppError::S3(DisplayErrorContext(&service_err).to_string()))
                }
            }
        }
    }

    /// Read an object, returning None if it doesn't exist.
    pub async fn read_bytes_optional(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.read_object(key).await?.map(|(bytes, _)| bytes))
    }

    /// Write JSON to S3.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(value)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(json))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| AppError::S3(DisplayErrorContext(&e).to_string()))?;

        debug!("Wrote s3://{}/{}", self.bucket, key);
        Ok(())
    }

    /// Delete an object only if it still has `etag`.
    ///
    /// Returns `false` when the object changed or vanished since it was read.
    async fn delete_if_match(&self, key: &str, etag: &str) -> Result<bool> {
        let result = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .if_match(etag)
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!("Deleted s3://{}/{}", self.bucket, key);
                Ok(true)
            }
            Err(err) => {
                let status = err.raw_response().map(|response| response.status().as_u16());
                if lost_condition(status) || status == Some(NOT_FOUND) {
                    debug!("s3://{}/{} changed before delete, kept", self.bucket, key);
                    Ok(false)
                } else {
                    Err(AppError::S3(DisplayErrorContext(&err).to_string()))
                }
            }
        }
    }

    /// Keys of all JSON objects under a relative directory.
    async fn list_keys(&self, dir: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", self.key(dir));
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| AppError::S3(DisplayErrorContext(&e).to_string()))?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .filter(|key| key.ends_with(".json"))
                    .map(str::to_string),
            );

            match output.next_continuation_token() {
                Some(next) if output.is_truncated().unwrap_or(false) => {
                    token = Some(next.to_string())
                }
                _ => break,
            }
        }

        Ok(keys)
    }
}

#[async_trait]
impl HistoryStore for S3Storage {
    async fn ping(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| AppError::S3(DisplayErrorContext(&e).to_string()))?;
        info!("Connected to s3://{}/{}", self.bucket, self.prefix);
        Ok(())
    }

    async fn find_record(&self, feed_id: &str) -> Result<Option<HistoryRecord>> {
        match self.read_bytes_optional(&self.key(&history_key(feed_id))).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save_record(&self, record: &HistoryRecord) -> Result<()> {
        self.write_json(&self.key(&history_key(&record.id)), record)
            .await
    }

    async fn list_records(&self) -> Result<Vec<HistoryRecord>> {
        let mut records = Vec::new();
        for key in self.list_keys(HISTORY_DIR).await? {
            if let Some(bytes) = self.read_bytes_optional(&key).await? {
                records.push(serde_json::from_slice::<HistoryRecord>(&bytes)?);
            }
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}

#[async_trait]
impl LeaseStore for S3Storage {
    async fn purge_expired(&self, now: DateTime<Utc>, ttl: Duration) -> Result<usize> {
        let mut removed = 0;

        for key in self.list_keys(LEASES_DIR).await? {
            let Some((bytes, etag)) = self.read_object(&key).await? else {
                continue;
            };

            let expired = match serde_json::from_slice::<Lease>(&bytes) {
                Ok(lease) => lease.is_expired(now, ttl),
                Err(e) => {
                    warn!("Removing unreadable lease s3://{}/{}: {}", self.bucket, key, e);
                    true
                }
            };
            if !expired {
                continue;
            }

            // Only the version read above may go; a newer claim must survive.
            match etag {
                Some(etag) => {
                    if self.delete_if_match(&key, &etag).await? {
                        removed += 1;
                    }
                }
                None => warn!("Lease s3://{}/{} has no ETag, not purged", self.bucket, key),
            }
        }

        Ok(removed)
    }

    async fn insert_lease_if_absent(&self, lease: &Lease) -> Result<Option<Lease>> {
        let key = self.key(&lease_key(&lease.resource_id));
        let json = serde_json::to_vec_pretty(lease)?;

        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .if_none_match("*")
            .body(ByteStream::from(json))
            .content_type("application/json")
            .send()
            .await;

        match result {
            Ok(_) => Ok(None),
            Err(err) => {
                let status = err.raw_response().map(|response| response.status().as_u16());
                if lost_condition(status) {
                    match self.read_bytes_optional(&key).await? {
                        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
                        None => Ok(Some(lease.clone())),
                    }
                } else {
                    Err(AppError::S3(DisplayErrorContext(&err).to_string()))
                }
            }
        }
    }

    async fn list_leases(&self) -> Result<Vec<Lease>> {
        let mut leases = Vec::new();
        for key in self.list_keys(LEASES_DIR).await? {
            if let Some(bytes) = self.read_bytes_optional(&key).await? {
                match serde_json::from_slice::<Lease>(&bytes) {
                    Ok(lease) => leases.push(lease),
                    Err(e) => warn!("Skipping unreadable lease s3://{}/{}: {}", self.bucket, key, e),
                }
            }
        }
        leases.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        Ok(leases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lost_condition_statuses() {
        assert!(lost_condition(Some(412)));
        assert!(lost_condition(Some(409)));
        assert!(!lost_condition(Some(403)));
        assert!(!lost_condition(Some(500)));
        assert!(!lost_condition(None));
    }

    #[test]
    fn test_key_prefixing() {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_config::BehaviorVersion::latest())
            .build();
        let client = Client::from_conf(config);

        let storage = S3Storage::new(client.clone(), "bucket", "feedwatch/");
        assert_eq!(storage.key("leases/a.json"), "feedwatch/leases/a.json");

        let bare = S3Storage::new(client, "bucket", "");
        assert_eq!(bare.key("leases/a.json"), "leases/a.json");
    }
}
