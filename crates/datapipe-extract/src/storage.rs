//! Object storage sink
//!
//! Wraps an OpenDAL operator. Writes replace any existing object at the same
//! key, which is what makes daily re-runs idempotent.

use bytes::Bytes;
use datapipe_config::{S3Config, StorageBackend, StorageConfig};
use opendal::Operator;
use tracing::{debug, info};

use crate::error::{ExtractError, Result};

#[derive(Debug, Clone)]
pub struct ObjectSink {
    operator: Operator,
    /// URI of the storage root without a trailing slash, e.g. `s3://my-bucket`
    root_uri: String,
}

impl ObjectSink {
    pub fn new(operator: Operator, root_uri: impl Into<String>) -> Self {
        Self {
            operator,
            root_uri: root_uri.into(),
        }
    }

    /// Build a sink from the storage section of the runtime config
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        match config.backend {
            StorageBackend::Fs => {
                let fs = config.fs.as_ref().ok_or_else(|| {
                    ExtractError::invalid_config("fs config required for filesystem backend")
                })?;
                info!("Using filesystem storage at: {}", fs.path);

                let builder = opendal::services::Fs::default().root(&fs.path);
                let operator = Operator::new(builder)
                    .map_err(|e| {
                        ExtractError::invalid_config(format!(
                            "Failed to create filesystem operator: {}",
                            e
                        ))
                    })?
                    .finish();
                Ok(Self::new(
                    operator,
                    format!("file://{}", fs.path.trim_end_matches('/')),
                ))
            }
            StorageBackend::S3 => {
                let s3 = config.s3.as_ref().ok_or_else(|| {
                    ExtractError::invalid_config("s3 config required for S3 backend")
                })?;
                Self::s3(&s3.bucket, s3)
            }
            StorageBackend::Memory => Self::memory(),
        }
    }

    /// S3 sink for `bucket`, taking region and endpoint from `s3`.
    ///
    /// The bucket is passed separately because the Lambda event may name a
    /// different bucket than the configured one.
    pub fn s3(bucket: &str, s3: &S3Config) -> Result<Self> {
        if bucket.is_empty() {
            return Err(ExtractError::invalid_config("S3 bucket name is empty"));
        }
        info!("Using S3 storage: bucket={}, region={}", bucket, s3.region);

        // Credentials come from the environment (Lambda execution role)
        let mut builder = opendal::services::S3::default()
            .bucket(bucket)
            .region(&s3.region);

        if let Some(endpoint) = &s3.endpoint {
            builder = builder.endpoint(endpoint);
        }

        let operator = Operator::new(builder)
            .map_err(|e| {
                ExtractError::invalid_config(format!("Failed to create S3 operator: {}", e))
            })?
            .finish();
        Ok(Self::new(operator, format!("s3://{}", bucket)))
    }

    /// In-process sink, used for dry runs and tests
    pub fn memory() -> Result<Self> {
        let operator = Operator::new(opendal::services::Memory::default())
            .map_err(|e| {
                ExtractError::invalid_config(format!("Failed to create memory operator: {}", e))
            })?
            .finish();
        Ok(Self::new(operator, "memory:/"))
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    /// Full URI of an object key
    pub fn location(&self, path: &str) -> String {
        format!("{}/{}", self.root_uri, path)
    }

    /// Write `body` to `path`, replacing any existing object
    pub async fn put(&self, path: &str, body: Bytes, content_type: &str) -> Result<()> {
        let size = body.len();
        self.operator
            .write_with(path, body)
            .content_type(content_type)
            .await
            .map_err(|e| ExtractError::write_failure(self.location(path), e.to_string()))?;

        debug!(path, size, "object written");
        Ok(())
    }
}
