//! Push a freshly built Lambda zip to the deployed function

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::{LastUpdateStatus, State};
use clap::Args;
use datapipe_config::RuntimeConfig;
use serde_json::json;

use crate::stack::{load_sdk_config, stack_outputs};

const READY_ATTEMPTS: u32 = 30;
const READY_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Args)]
pub struct FunctionArgs {
    /// Lambda zip built by cargo-lambda
    #[arg(long, default_value = "target/lambda/bootstrap/bootstrap.zip")]
    pub zip: PathBuf,

    /// AWS region (defaults to the SDK's region chain)
    #[arg(long)]
    pub region: Option<String>,

    /// Skip the test invocation after the update
    #[arg(long)]
    pub no_invoke: bool,
}

pub async fn run(args: FunctionArgs, config: &RuntimeConfig) -> Result<()> {
    println!();
    println!("datapipe deploy - Lambda function code");
    println!();

    let zip = tokio::fs::read(&args.zip).await.with_context(|| {
        format!(
            "Failed to read {} (build it with `cargo lambda build --release -p datapipe-lambda --output-format zip`)",
            args.zip.display()
        )
    })?;
    println!("📦 Package: {} ({} bytes)", args.zip.display(), zip.len());

    let sdk_config = load_sdk_config(args.region.as_deref()).await;
    let cfn = aws_sdk_cloudformation::Client::new(&sdk_config);
    let lambda = aws_sdk_lambda::Client::new(&sdk_config);

    let stack_name = &config.resources.stack_name;
    let outputs = stack_outputs(&cfn, stack_name).await?;
    let function_name = outputs
        .get("LambdaFunctionName")
        .with_context(|| format!("LambdaFunctionName output not found on stack {}", stack_name))?;
    println!("🔍 Function: {}", function_name);

    let updated = lambda
        .update_function_code()
        .function_name(function_name)
        .zip_file(Blob::new(zip))
        .send()
        .await
        .with_context(|| format!("Failed to update function {}", function_name))?;
    println!("🚀 Code updated");
    if let Some(arn) = updated.function_arn() {
        println!("   Function ARN: {}", arn);
    }
    if let Some(modified) = updated.last_modified() {
        println!("   Last modified: {}", modified);
    }
    println!("   Code size: {} bytes", updated.code_size());

    wait_until_ready(&lambda, function_name).await?;

    if args.no_invoke {
        println!();
        println!("Deployed. Test invocation skipped.");
        return Ok(());
    }

    let data_bucket = outputs
        .get("DataBucketName")
        .cloned()
        .unwrap_or_else(|| config.resources.data_bucket.clone());
    let payload = invoke(&lambda, function_name, &data_bucket).await?;
    println!("✅ Test invocation succeeded");
    println!("   Response: {}", payload);
    println!();

    Ok(())
}

/// Poll until the function is Active and no update is in progress
async fn wait_until_ready(client: &aws_sdk_lambda::Client, function_name: &str) -> Result<()> {
    println!("⏳ Waiting for the function to become ready...");

    for attempt in 1..=READY_ATTEMPTS {
        let response = client
            .get_function()
            .function_name(function_name)
            .send()
            .await
            .with_context(|| format!("Failed to read function {}", function_name))?;

        let configuration = response.configuration();
        let state = configuration.and_then(|c| c.state());
        let update = configuration.and_then(|c| c.last_update_status());

        match (state, update) {
            (Some(State::Active), Some(LastUpdateStatus::Successful) | None) => {
                println!("✅ Function is ready");
                return Ok(());
            }
            (Some(State::Failed), _) | (_, Some(LastUpdateStatus::Failed)) => {
                let reason = configuration
                    .and_then(|c| c.last_update_status_reason().or(c.state_reason()))
                    .unwrap_or("unknown");
                bail!("Function {} failed to update: {}", function_name, reason);
            }
            _ => {
                println!(
                    "   State: {} / update: {} (attempt {}/{})",
                    state.map(|s| s.as_str()).unwrap_or("unknown"),
                    update.map(|u| u.as_str()).unwrap_or("unknown"),
                    attempt,
                    READY_ATTEMPTS
                );
                tokio::time::sleep(READY_INTERVAL).await;
            }
        }
    }

    bail!(
        "Timed out waiting for function {} to become ready",
        function_name
    )
}

/// Invoke the function synchronously and check the response it returns
pub(crate) async fn invoke(
    client: &aws_sdk_lambda::Client,
    function_name: &str,
    bucket: &str,
) -> Result<String> {
    let event = json!({ "bucket_name": bucket }).to_string();
    let response = client
        .invoke()
        .function_name(function_name)
        .payload(Blob::new(event.into_bytes()))
        .send()
        .await
        .with_context(|| format!("Failed to invoke {}", function_name))?;

    let payload = response
        .payload()
        .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned())
        .unwrap_or_default();

    if let Some(error) = response.function_error() {
        bail!("Function error ({}): {}", error, payload);
    }
    if response.status_code() != 200 {
        bail!("Invocation returned status {}", response.status_code());
    }

    // The handler reports extraction failures in its own statusCode
    let body: serde_json::Value =
        serde_json::from_str(&payload).context("Function returned a non-JSON payload")?;
    match body.get("statusCode").and_then(|s| s.as_u64()) {
        Some(200) => Ok(payload),
        Some(status) => bail!("Extraction failed with status {}: {}", status, payload),
        None => bail!("Response has no statusCode: {}", payload),
    }
}
