// Logging setup shared by the Lambda bootstrap and the CLI

use datapipe_config::{LogConfig, LogFormat};

/// Initialize tracing/logging from the log section of the config
pub fn init_tracing(log: &LogConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // RUST_LOG is already folded into log.level by the config loader
    let env_filter = EnvFilter::try_new(&log.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // Try to set the global subscriber; ignore error if already set (idempotent)
    let _ = match log.format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_current_span(false)),
        ),
        LogFormat::Text => tracing::subscriber::set_global_default(registry.with(fmt::layer())),
    };
}
