use crate::{FsConfig, LogFormat, RuntimeConfig, S3Config, StorageBackend};
use anyhow::{anyhow, Context, Result};

pub const ENV_PREFIX: &str = "DATAPIPE_";

/// Abstraction over environment-variable lookups so tests can supply their
/// own source of overrides.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;

    /// Get an environment variable WITHOUT the DATAPIPE_ prefix
    /// Used for BUCKET_NAME (set by the stack) and AWS_REGION
    fn get_raw(&self, key: &str) -> Option<String>;
}

/// Apply environment-variable overrides (highest priority) to the runtime config.
pub fn apply_env_overrides<E: EnvSource>(config: &mut RuntimeConfig, env: &E) -> Result<()> {
    // Source API
    if let Some(url) = env.get("SOURCE_URL") {
        config.source.url = url;
    }
    if let Some(val) = get_env_u64(env, "SOURCE_TIMEOUT_SECS")? {
        config.source.timeout_secs = val;
    }

    // Logging: the prefixed level wins over RUST_LOG
    if let Some(level) = env.get_raw("RUST_LOG") {
        config.log.level = level;
    }
    if let Some(level) = env.get("LOG_LEVEL") {
        config.log.level = level;
    }
    if let Some(format) = env.get("LOG_FORMAT") {
        config.log.format = format
            .parse::<LogFormat>()
            .context("Invalid DATAPIPE_LOG_FORMAT value")?;
    }

    // Storage backend
    if let Some(backend) = env.get("STORAGE_BACKEND") {
        config.storage.backend = backend
            .parse::<StorageBackend>()
            .context("Invalid DATAPIPE_STORAGE_BACKEND value")?;
    }
    if let Some(path) = env.get("STORAGE_PATH") {
        config.storage.fs.get_or_insert_with(FsConfig::default).path = path;
    }

    // AWS standard variables first so the prefixed ones win
    if let Some(bucket) = env.get_raw("BUCKET_NAME") {
        ensure_s3(config).bucket = bucket;
    }
    if let Some(region) = env.get_raw("AWS_REGION") {
        ensure_s3(config).region = region;
    }
    if let Some(bucket) = env.get("S3_BUCKET") {
        ensure_s3(config).bucket = bucket;
    }
    if let Some(region) = env.get("S3_REGION") {
        ensure_s3(config).region = region;
    }
    if let Some(endpoint) = env.get("S3_ENDPOINT") {
        ensure_s3(config).endpoint = Some(endpoint);
    }

    // Output layout
    if let Some(prefix) = env.get("OUTPUT_PREFIX") {
        config.output.prefix = prefix.trim_matches('/').to_string();
    }
    if let Some(file_name) = env.get("OUTPUT_FILE_NAME") {
        config.output.file_name = file_name;
    }

    // Resource names
    let resources = &mut config.resources;
    for (key, slot) in [
        ("STACK_NAME", &mut resources.stack_name),
        ("PROJECT_PREFIX", &mut resources.project_prefix),
        ("WORKGROUP", &mut resources.workgroup),
        ("DATABASE", &mut resources.database),
        ("CRAWLER", &mut resources.crawler),
        ("FUNCTION_NAME", &mut resources.function),
        ("DATA_BUCKET", &mut resources.data_bucket),
        ("RESULTS_BUCKET", &mut resources.results_bucket),
        ("TABLE", &mut resources.table),
    ] {
        if let Some(value) = env.get(key) {
            *slot = value;
        }
    }

    Ok(())
}

fn ensure_s3(config: &mut RuntimeConfig) -> &mut S3Config {
    let default_bucket = config.resources.data_bucket.clone();
    config.storage.s3.get_or_insert_with(|| S3Config {
        bucket: default_bucket,
        region: "us-east-1".to_string(),
        endpoint: None,
    })
}

fn get_env_u64<E: EnvSource>(env: &E, key: &str) -> Result<Option<u64>> {
    match env.get(key) {
        Some(val) => {
            let parsed = val
                .parse::<u64>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}
