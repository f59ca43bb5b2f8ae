// datapipe-config - Unified configuration for the extractor and the CLI
//
// Supports configuration from multiple sources:
// 1. Environment variables (highest priority)
// 2. Config file path from DATAPIPE_CONFIG env var
// 3. Config file contents from DATAPIPE_CONFIG_CONTENT env var
// 4. Default config file locations (./config.toml, ./.datapipe.toml)
// 5. Platform-specific defaults (lowest priority)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

mod env_overrides;
mod platform;
mod sources;
mod validation;

pub use env_overrides::{EnvSource, ENV_PREFIX};
pub use platform::Platform;

pub const DEFAULT_SOURCE_URL: &str = "https://jsonplaceholder.typicode.com/users";

/// Main runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub resources: ResourceNames,
}

/// Layer read from a TOML file. Sections that are present replace the
/// corresponding section of the config they are merged into; keys missing
/// from a present section take their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub source: Option<SourceConfig>,
    pub storage: Option<StorageConfig>,
    pub output: Option<OutputConfig>,
    pub log: Option<LogConfig>,
    pub resources: Option<ResourceNames>,
}

impl ConfigFile {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config TOML")
    }
}

/// Upstream HTTP API the extractor reads from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub url: String,
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs: Option<FsConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Config>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            fs: Some(FsConfig::default()),
            s3: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Fs,
    S3,
    Memory,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Fs => write!(f, "fs"),
            StorageBackend::S3 => write!(f, "s3"),
            StorageBackend::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fs" | "filesystem" => Ok(StorageBackend::Fs),
            "s3" | "aws" => Ok(StorageBackend::S3),
            "memory" | "mem" => Ok(StorageBackend::Memory),
            _ => anyhow::bail!(
                "Unsupported storage backend: {}. Supported: fs, s3, memory",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsConfig {
    pub path: String,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            path: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Where extracted records land inside the storage root
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub prefix: String,
    pub file_name: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            prefix: "raw-data".to_string(),
            file_name: "users.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Unsupported log format: {}. Supported: text, json", s),
        }
    }
}

/// Names of the provisioned cloud resources.
///
/// These mirror the names fixed in the CloudFormation template and are what
/// the cleanup, deploy and check commands look for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceNames {
    pub stack_name: String,
    /// Buckets whose name starts with this prefix belong to the project
    pub project_prefix: String,
    pub workgroup: String,
    pub database: String,
    pub crawler: String,
    pub function: String,
    pub data_bucket: String,
    pub results_bucket: String,
    /// Table the crawler creates from the `raw-data/` prefix
    pub table: String,
}

impl Default for ResourceNames {
    fn default() -> Self {
        Self {
            stack_name: "DataPipelineStack".to_string(),
            project_prefix: "data-pipeline".to_string(),
            workgroup: "data-pipeline-workgroup".to_string(),
            database: "data_pipeline_db".to_string(),
            crawler: "data-pipeline-crawler".to_string(),
            function: "data-pipeline-data-extractor".to_string(),
            data_bucket: "data-pipeline-bucket-jsonplaceholder".to_string(),
            results_bucket: "data-pipeline-athena-results-jsonplaceholder".to_string(),
            table: "raw_data".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from all sources with priority
    pub fn load() -> Result<Self> {
        sources::load_config(Platform::detect())
    }

    /// Load configuration from a specific file path (for the CLI --config flag).
    pub fn load_from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        sources::load_from_file_path(path)
    }

    /// Construct a config that contains only platform defaults (no env or files).
    pub fn from_platform_defaults(platform: Platform) -> Self {
        platform.defaults()
    }

    /// Merge a file layer into this config
    pub fn merge(&mut self, other: ConfigFile) {
        if let Some(source) = other.source {
            self.source = source;
        }
        if let Some(storage) = other.storage {
            self.storage = storage;
        }
        if let Some(output) = other.output {
            self.output = output;
        }
        if let Some(log) = other.log {
            self.log = log;
        }
        if let Some(resources) = other.resources {
            self.resources = resources;
        }
    }

    /// Apply environment overrides from a custom source.
    pub fn apply_env_overrides_from<E: EnvSource>(&mut self, env: &E) -> Result<()> {
        env_overrides::apply_env_overrides(self, env)
    }

    /// Build a configuration for the given platform from inline config content
    /// plus overrides supplied by an `EnvSource`.
    pub fn load_for_platform_with_env<E: EnvSource>(
        platform: Platform,
        inline_config: Option<&str>,
        env: &E,
    ) -> Result<Self> {
        let mut config = RuntimeConfig::from_platform_defaults(platform);

        if let Some(inline) = inline_config {
            let file_config =
                ConfigFile::parse(inline).context("Failed to parse inline config content")?;
            config.merge(file_config);
        }

        config.apply_env_overrides_from(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}
