//! Thin wrapper around the `object_store` crate's S3 client, used by the
//! Output Sink to upload compressed segments (§4.3). Grounded on the
//! `object_store`/`PutPayload` usage in `store-uploader.rs`
//! (MystenLabs/sui analytics-indexer); the exponential backoff there is
//! reused for upload retries (§7 "Upload failures are retried within the
//! task").

use std::path::Path;
use std::time::Duration;

use object_store::aws::AmazonS3Builder;
use object_store::path::Path as StorePath;
use object_store::ObjectStore;
use thiserror::Error;

use crate::config::S3Settings;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not configure object store: {0}")]
    Configure(#[from] object_store::Error),

    #[error("could not read local file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upload of {key} failed after {attempts} attempts: {source}")]
    UploadFailed {
        key: String,
        attempts: u32,
        #[source]
        source: object_store::Error,
    },
}

/// Exponential backoff used between upload retries, grounded on the
/// `Backoff` helper in the Sui store-uploader (100ms -> 5min doubling).
struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    fn new() -> Self {
        Backoff {
            current: Duration::from_millis(100),
            max: Duration::from_secs(300),
        }
    }

    async fn sleep_and_advance(&mut self) {
        tokio::time::sleep(self.current).await;
        self.current = std::cmp::min(self.current * 2, self.max);
    }
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub s3_key: String,
    pub s3_bucket: String,
    pub s3_endpoint_url: String,
    pub size_bytes: u64,
}

pub struct ObjectStoreClient {
    store: Box<dyn ObjectStore>,
    bucket: String,
    endpoint_url: String,
    max_attempts: u32,
}

impl ObjectStoreClient {
    pub fn new(settings: &S3Settings) -> Result<Self> {
        let store = AmazonS3Builder::new()
            .with_endpoint(settings.endpoint_url.clone())
            .with_bucket_name(settings.bucket.clone())
            .with_access_key_id(settings.key_id.clone())
            .with_secret_access_key(settings.secret.clone())
            .with_allow_http(true)
            .build()?;

        Ok(ObjectStoreClient {
            store: Box::new(store),
            bucket: settings.bucket.clone(),
            endpoint_url: settings.endpoint_url.clone(),
            max_attempts: 5,
        })
    }

    /// Builds a client around an arbitrary `object_store` backend, e.g. an
    /// in-memory store for tests that don't need a real S3-compatible
    /// endpoint.
    pub fn from_store(store: Box<dyn ObjectStore>, bucket: String, endpoint_url: String) -> Self {
        ObjectStoreClient {
            store,
            bucket,
            endpoint_url,
            max_attempts: 5,
        }
    }

    /// Uploads a local file to `key`, retrying with exponential backoff on
    /// transient failure; a persistent failure is the caller's cue to
    /// treat the upload as Fatal (§7).
    pub async fn upload_file(&self, local_path: &Path, key: &str) -> Result<UploadOutcome> {
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|e| Error::ReadFile {
                path: local_path.display().to_string(),
                source: e,
            })?;
        let size_bytes = bytes.len() as u64;
        let store_path = StorePath::from(key);

        let mut backoff = Backoff::new();
        let mut last_err = None;
        for attempt in 1..=self.max_attempts {
            match self.store.put(&store_path, bytes.clone().into()).await {
                Ok(_) => {
                    return Ok(UploadOutcome {
                        s3_key: key.to_string(),
                        s3_bucket: self.bucket.clone(),
                        s3_endpoint_url: self.endpoint_url.clone(),
                        size_bytes,
                    });
                }
                Err(e) => {
                    last_err = Some(e);
                    if attempt < self.max_attempts {
                        backoff.sleep_and_advance().await;
                    }
                }
            }
        }

        Err(Error::UploadFailed {
            key: key.to_string(),
            attempts: self.max_attempts,
            source: last_err.expect("loop ran at least once"),
        })
    }
}
