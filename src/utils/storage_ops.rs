//! Object storage metadata listing
//!
//! Only object metadata is captured; object bodies are never read.

use crate::config::StorageConfig;
use crate::error::{Error, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, info};

/// Metadata of one stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// One page of a bucket listing
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub objects: Vec<StoredObject>,
    pub next_token: Option<String>,
}

/// Contents of `storage.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSnapshot {
    pub bucket: String,
    pub exported_at: DateTime<Utc>,
    pub objects: Vec<StoredObject>,
}

/// Abstraction for object storage listing, enabling mocking in tests
pub trait ObjectStorageOperations: Send + Sync {
    /// Fetch one page; `continuation` is the token returned by the previous page
    fn list_page(&self, bucket: &str, continuation: Option<&str>) -> Result<ObjectPage>;
}

/// Page through the whole bucket, one request at a time
pub fn list_all_objects(ops: &dyn ObjectStorageOperations, bucket: &str) -> Result<Vec<StoredObject>> {
    let mut objects = Vec::new();
    let mut token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = ops.list_page(bucket, token.as_deref())?;
        pages += 1;
        objects.extend(page.objects);
        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    info!("Listed {} objects in {} ({} pages)", objects.len(), bucket, pages);
    Ok(objects)
}

/// S3-compatible implementation
#[derive(Clone)]
pub struct RealS3Ops {
    handle: Handle,
    client: Client,
}

impl RealS3Ops {
    /// Build a client; static keys are used when both are configured,
    /// otherwise the default AWS credential chain applies
    pub fn connect(handle: Handle, config: &StorageConfig) -> Self {
        let region = Region::new(config.region.clone());
        let shared = handle.block_on(
            aws_config::defaults(BehaviorVersion::latest())
                .region(region)
                .load(),
        );

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            builder = builder.credentials_provider(Credentials::new(
                key_id,
                secret,
                None,
                None,
                "backup-dr-env",
            ));
        }
        if let Some(endpoint) = &config.endpoint {
            // MinIO and most S3-compatible services need path-style access
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            handle,
            client: Client::from_conf(builder.build()),
        }
    }
}

impl ObjectStorageOperations for RealS3Ops {
    fn list_page(&self, bucket: &str, continuation: Option<&str>) -> Result<ObjectPage> {
        let mut request = self.client.list_objects_v2().bucket(bucket);
        if let Some(token) = continuation {
            request = request.continuation_token(token);
        }

        let output = self
            .handle
            .block_on(request.send())
            .map_err(|e| Error::Network(format!("ListObjectsV2 on {}: {}", bucket, e)))?;

        let objects: Vec<StoredObject> = output
            .contents
            .unwrap_or_default()
            .into_iter()
            .map(|object| StoredObject {
                key: object.key.unwrap_or_default(),
                size: object.size.unwrap_or(0).max(0) as u64,
                last_modified: object
                    .last_modified
                    .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())),
                etag: object.e_tag,
            })
            .collect();

        let next_token = if output.is_truncated.unwrap_or(false) {
            output.next_continuation_token
        } else {
            None
        };
        debug!("Fetched page of {} objects (more: {})", objects.len(), next_token.is_some());

        Ok(ObjectPage { objects, next_token })
    }
}

/// Mock implementation for testing
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Serves pre-built pages; tokens are page indices
    #[derive(Clone, Default)]
    pub struct MockObjectStorage {
        pages: Arc<Mutex<Vec<Vec<StoredObject>>>>,
        /// Continuation tokens received, in order
        pub requests: Arc<Mutex<Vec<Option<String>>>>,
        fail: Arc<Mutex<bool>>,
    }

    impl MockObjectStorage {
        pub fn new() -> Self {
            Self::default()
        }

        /// Append a page holding objects with the given keys and sizes
        pub fn with_page(self, objects: &[(&str, u64)]) -> Self {
            self.pages.lock().unwrap().push(
                objects
                    .iter()
                    .map(|(key, size)| StoredObject {
                        key: key.to_string(),
                        size: *size,
                        last_modified: None,
                        etag: Some(format!("\"{:032x}\"", size)),
                    })
                    .collect(),
            );
            self
        }

        pub fn with_failure(self) -> Self {
            *self.fail.lock().unwrap() = true;
            self
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    impl ObjectStorageOperations for MockObjectStorage {
        fn list_page(&self, bucket: &str, continuation: Option<&str>) -> Result<ObjectPage> {
            self.requests
                .lock()
                .unwrap()
                .push(continuation.map(String::from));
            if *self.fail.lock().unwrap() {
                return Err(Error::Network(format!("ListObjectsV2 on {}: access denied", bucket)));
            }

            let pages = self.pages.lock().unwrap();
            let index: usize = continuation.and_then(|t| t.parse().ok()).unwrap_or(0);
            let objects = pages.get(index).cloned().unwrap_or_default();
            let next_token = if index + 1 < pages.len() {
                Some((index + 1).to_string())
            } else {
                None
            };
            Ok(ObjectPage { objects, next_token })
        }
    }
}
