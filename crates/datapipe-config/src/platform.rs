// Platform detection based on environment variables
//
// - AWS Lambda: AWS_LAMBDA_FUNCTION_NAME env var present
// - Local: anything else (CLI runs, tests)

use std::env;

use crate::{LogConfig, LogFormat, RuntimeConfig, S3Config, StorageBackend, StorageConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Local,
    Lambda,
}

impl Platform {
    /// Auto-detect the current platform based on environment variables
    pub fn detect() -> Self {
        if env::var("AWS_LAMBDA_FUNCTION_NAME").is_ok() {
            Platform::Lambda
        } else {
            Platform::Local
        }
    }

    /// Get platform-specific defaults
    pub fn defaults(&self) -> RuntimeConfig {
        match self {
            Platform::Local => RuntimeConfig::default(),
            Platform::Lambda => {
                let mut config = RuntimeConfig::default();
                config.storage = StorageConfig {
                    backend: StorageBackend::S3,
                    fs: None,
                    s3: Some(S3Config {
                        bucket: config.resources.data_bucket.clone(),
                        region: "us-east-1".to_string(),
                        endpoint: None,
                    }),
                };
                // CloudWatch ingests one JSON object per line
                config.log = LogConfig {
                    level: "info".to_string(),
                    format: LogFormat::Json,
                };
                config
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_defaults() {
        let local = Platform::Local.defaults();
        assert_eq!(local.storage.backend, StorageBackend::Fs);
        assert_eq!(local.log.format, LogFormat::Text);

        let lambda = Platform::Lambda.defaults();
        assert_eq!(lambda.storage.backend, StorageBackend::S3);
        assert_eq!(lambda.log.format, LogFormat::Json);
        let s3 = lambda.storage.s3.expect("lambda defaults carry s3 config");
        assert_eq!(s3.bucket, "data-pipeline-bucket-jsonplaceholder");
    }
}
