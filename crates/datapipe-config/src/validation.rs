// Configuration validation
//
// Validates that required fields are present and values are sensible

use crate::*;
use anyhow::{bail, Result};
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_source_config(&config.source)?;
    validate_storage_config(&config.storage)?;
    validate_output_config(&config.output)?;
    validate_resource_names(&config.resources)?;
    Ok(())
}

fn validate_source_config(config: &SourceConfig) -> Result<()> {
    if config.url.is_empty() {
        bail!("source.url must not be empty");
    }

    if !config.url.starts_with("http://") && !config.url.starts_with("https://") {
        bail!("source.url must be an http(s) URL, got '{}'", config.url);
    }

    if config.timeout_secs == 0 {
        bail!("source.timeout_secs must be greater than 0");
    }

    // Lambda is configured with a 5 minute timeout
    if config.timeout_secs > 300 {
        warn!(
            timeout_secs = config.timeout_secs,
            "source.timeout_secs exceeds the function timeout"
        );
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<()> {
    match config.backend {
        StorageBackend::Fs => {
            let fs = config
                .fs
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("fs storage backend requires 'fs' configuration"))?;

            if fs.path.is_empty() {
                bail!("storage.fs.path must not be empty");
            }
        }
        StorageBackend::S3 => {
            let s3 = config
                .s3
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("s3 storage backend requires 's3' configuration"))?;

            if s3.bucket.is_empty() {
                bail!("storage.s3.bucket is required for S3 backend");
            }

            if s3.region.is_empty() {
                bail!("storage.s3.region is required for S3 backend");
            }
        }
        StorageBackend::Memory => {}
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<()> {
    if config.prefix.is_empty() {
        bail!("output.prefix must not be empty");
    }

    if config.file_name.is_empty() || config.file_name.contains('/') {
        bail!("output.file_name must be a bare file name");
    }

    Ok(())
}

fn validate_resource_names(names: &ResourceNames) -> Result<()> {
    for (field, value) in [
        ("stack_name", &names.stack_name),
        ("project_prefix", &names.project_prefix),
        ("workgroup", &names.workgroup),
        ("database", &names.database),
        ("crawler", &names.crawler),
        ("function", &names.function),
        ("data_bucket", &names.data_bucket),
        ("results_bucket", &names.results_bucket),
        ("table", &names.table),
    ] {
        if value.is_empty() {
            bail!("resources.{} must not be empty", field);
        }
    }

    if !names.data_bucket.starts_with(&names.project_prefix)
        || !names.results_bucket.starts_with(&names.project_prefix)
    {
        warn!(
            prefix = %names.project_prefix,
            "bucket names do not start with the project prefix; cleanup will not discover them by name"
        );
    }

    Ok(())
}
