// AWS Lambda runtime adapter
//
// Runs one extraction per invocation into the S3 bucket named by the event.
// Extraction failures are reported in the response body; the invocation
// itself only fails if the runtime cannot deliver the response.

use std::sync::Arc;

use datapipe_config::{RuntimeConfig, S3Config};
use datapipe_extract::{
    init_tracing, ExtractError, Extractor, HttpSource, ObjectSink, RecordSource,
};
use lambda_runtime::{service_fn, Error, LambdaEvent};
use tracing::{error, info};

mod response;

pub use response::{ExtractionEvent, InvocationResponse};

const DEFAULT_REGION: &str = "us-east-1";

pub(crate) struct LambdaState {
    config: RuntimeConfig,
    source: HttpSource,
}

async fn handle_request(
    event: LambdaEvent<ExtractionEvent>,
    state: Arc<LambdaState>,
) -> Result<InvocationResponse, Error> {
    let (event, context) = event.into_parts();
    info!(request_id = %context.request_id, "Invocation received");

    let sink = match resolve_bucket(&event, &state.config).and_then(|bucket| {
        let s3 = region_config(&state.config);
        ObjectSink::s3(&bucket, &s3)
    }) {
        Ok(sink) => sink,
        Err(e) => {
            error!(code = e.code().as_str(), error = %e, "Invalid invocation");
            return Ok(InvocationResponse::failure(&e));
        }
    };

    let extractor = Extractor::new(
        state.source.clone(),
        sink,
        state.config.output.clone(),
    );
    Ok(process(&extractor).await)
}

/// Run the extractor and fold the outcome into a response
pub async fn process<S: RecordSource>(extractor: &Extractor<S>) -> InvocationResponse {
    match extractor.run().await {
        Ok(summary) => InvocationResponse::success(&summary),
        Err(e) => {
            error!(code = e.code().as_str(), error = %e, "Extraction failed");
            InvocationResponse::failure(&e)
        }
    }
}

/// Pick the target bucket: the event wins, then the configured S3 bucket
/// (which already reflects `BUCKET_NAME`).
pub fn resolve_bucket(
    event: &ExtractionEvent,
    config: &RuntimeConfig,
) -> datapipe_extract::Result<String> {
    let from_event = event
        .bucket_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());
    let from_config = config
        .storage
        .s3
        .as_ref()
        .map(|s3| s3.bucket.trim())
        .filter(|name| !name.is_empty());

    from_event
        .or(from_config)
        .map(str::to_string)
        .ok_or_else(|| {
            ExtractError::invalid_config(
                "bucket_name must be provided in the event or the BUCKET_NAME environment variable",
            )
        })
}

fn region_config(config: &RuntimeConfig) -> S3Config {
    config.storage.s3.clone().unwrap_or_else(|| S3Config {
        bucket: String::new(),
        region: DEFAULT_REGION.to_string(),
        endpoint: None,
    })
}

/// Lambda runtime entry point
pub async fn run() -> Result<(), Error> {
    let config = RuntimeConfig::load()
        .map_err(|e| Error::from(format!("Failed to load configuration: {:#}", e)))?;
    init_tracing(&config.log);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        build_timestamp = env!("BUILD_TIMESTAMP"),
        source = %config.source.url,
        "datapipe extractor starting"
    );

    let source = HttpSource::from_config(&config.source)
        .map_err(|e| Error::from(format!("Failed to initialize source: {}", e)))?;
    let state = Arc::new(LambdaState { config, source });

    lambda_runtime::run(service_fn(move |event: LambdaEvent<ExtractionEvent>| {
        let state = state.clone();
        async move { handle_request(event, state).await }
    }))
    .await
}
