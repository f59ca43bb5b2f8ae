// Shared AWS plumbing: SDK configuration and CloudFormation stack lookups

use std::collections::HashMap;

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_cloudformation::error::ProvideErrorMetadata;
use aws_sdk_cloudformation::Client as CfnClient;

/// Snapshot of a CloudFormation stack
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackInfo {
    pub status: String,
    pub outputs: HashMap<String, String>,
}

impl StackInfo {
    /// A stack that is being or has been deleted no longer owns its resources.
    /// DELETE_FAILED does not count: the stack still holds whatever blocked it.
    pub fn is_deleting(&self) -> bool {
        matches!(self.status.as_str(), "DELETE_IN_PROGRESS" | "DELETE_COMPLETE")
    }

    pub fn output(&self, key: &str) -> Option<&str> {
        self.outputs.get(key).map(String::as_str)
    }
}

/// Load AWS SDK configuration, optionally pinning the region
pub async fn load_sdk_config(region: Option<&str>) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = region {
        loader = loader.region(aws_config::Region::new(region.to_string()));
    }
    loader.load().await
}

/// Describe a stack. Returns `None` when CloudFormation says it does not exist.
pub async fn describe_stack(client: &CfnClient, stack_name: &str) -> Result<Option<StackInfo>> {
    let response = match client.describe_stacks().stack_name(stack_name).send().await {
        Ok(response) => response,
        Err(e) => {
            let missing = e
                .as_service_error()
                .and_then(|se| se.message())
                .is_some_and(|msg| msg.contains("does not exist"));
            if missing {
                return Ok(None);
            }
            return Err(e).with_context(|| format!("Failed to describe stack {}", stack_name));
        }
    };

    let Some(stack) = response.stacks().first() else {
        return Ok(None);
    };

    let mut outputs = HashMap::new();
    for output in stack.outputs() {
        if let (Some(key), Some(value)) = (output.output_key(), output.output_value()) {
            outputs.insert(key.to_string(), value.to_string());
        }
    }

    Ok(Some(StackInfo {
        status: stack
            .stack_status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
        outputs,
    }))
}

/// Outputs of a live stack; errors if the stack is missing
pub async fn stack_outputs(client: &CfnClient, stack_name: &str) -> Result<HashMap<String, String>> {
    let stack = describe_stack(client, stack_name)
        .await?
        .with_context(|| format!("Stack {} not found", stack_name))?;
    Ok(stack.outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deleting_statuses() {
        let mut stack = StackInfo {
            status: "CREATE_COMPLETE".to_string(),
            outputs: HashMap::new(),
        };
        assert!(!stack.is_deleting());

        for status in ["DELETE_IN_PROGRESS", "DELETE_COMPLETE"] {
            stack.status = status.to_string();
            assert!(stack.is_deleting());
        }

        stack.status = "DELETE_FAILED".to_string();
        assert!(!stack.is_deleting());
    }
}
