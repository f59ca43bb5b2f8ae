//! CloudFormation template generator

use anyhow::{Context, Result};
use clap::Args;
use datapipe_config::RuntimeConfig;
use dialoguer::{Confirm, Input, Select};
use std::fs;
use std::path::PathBuf;

const TEMPLATE: &str = include_str!("../../templates/cloudformation.yaml");

#[derive(Args)]
pub struct TemplateArgs {
    /// S3 URI of the Lambda zip (e.g., s3://my-artifacts/datapipe/bootstrap.zip)
    #[arg(long)]
    pub lambda_s3_uri: Option<String>,

    /// CloudFormation stack name
    #[arg(long)]
    pub stack_name: Option<String>,

    /// Bucket for extracted records
    #[arg(long)]
    pub data_bucket: Option<String>,

    /// Bucket for Athena query results
    #[arg(long)]
    pub results_bucket: Option<String>,

    /// Lambda architecture: arm64 or x86_64
    #[arg(long)]
    pub architecture: Option<String>,

    /// Output file
    #[arg(long, default_value = "template.yaml")]
    pub output: PathBuf,

    /// Overwrite existing file without asking
    #[arg(long)]
    pub force: bool,
}

/// Values substituted into the template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateValues {
    pub stack_name: String,
    pub data_bucket: String,
    pub results_bucket: String,
    pub function_name: String,
    pub database: String,
    pub crawler: String,
    pub workgroup: String,
    pub source_url: String,
    pub output_prefix: String,
    pub output_file_name: String,
    pub architecture: String,
    pub lambda_s3_bucket: String,
    pub lambda_s3_key: String,
}

impl TemplateValues {
    /// Defaults from the runtime config; the code location must be filled in
    pub fn from_config(config: &RuntimeConfig) -> Self {
        let names = &config.resources;
        Self {
            stack_name: names.stack_name.clone(),
            data_bucket: names.data_bucket.clone(),
            results_bucket: names.results_bucket.clone(),
            function_name: names.function.clone(),
            database: names.database.clone(),
            crawler: names.crawler.clone(),
            workgroup: names.workgroup.clone(),
            source_url: config.source.url.clone(),
            output_prefix: config.output.prefix.clone(),
            output_file_name: config.output.file_name.clone(),
            architecture: "arm64".to_string(),
            lambda_s3_bucket: String::new(),
            lambda_s3_key: String::new(),
        }
    }
}

pub fn render(values: &TemplateValues) -> String {
    TEMPLATE
        .replace("{{STACK_NAME}}", &values.stack_name)
        .replace("{{DATA_BUCKET}}", &values.data_bucket)
        .replace("{{RESULTS_BUCKET}}", &values.results_bucket)
        .replace("{{FUNCTION_NAME}}", &values.function_name)
        .replace("{{DATABASE}}", &values.database)
        .replace("{{CRAWLER}}", &values.crawler)
        .replace("{{WORKGROUP}}", &values.workgroup)
        .replace("{{SOURCE_URL}}", &values.source_url)
        .replace("{{OUTPUT_PREFIX}}", &values.output_prefix)
        .replace("{{OUTPUT_FILE_NAME}}", &values.output_file_name)
        .replace("{{ARCHITECTURE}}", &values.architecture)
        .replace("{{LAMBDA_S3_BUCKET}}", &values.lambda_s3_bucket)
        .replace("{{LAMBDA_S3_KEY}}", &values.lambda_s3_key)
}

pub fn run(args: TemplateArgs, config: &RuntimeConfig) -> Result<()> {
    println!();
    println!("datapipe deploy - CloudFormation template");
    println!();

    let mut values = TemplateValues::from_config(config);

    // Collect values via wizard or flags
    let lambda_s3_uri = match args.lambda_s3_uri {
        Some(uri) => {
            validate_s3_uri(&uri).map_err(|e| anyhow::anyhow!("Invalid S3 URI: {}", e))?;
            uri
        }
        None => {
            println!("Build the function with:");
            println!("  cargo lambda build --release -p datapipe-lambda --arm64 --output-format zip");
            println!("and upload target/lambda/bootstrap/bootstrap.zip to S3.");
            println!();
            Input::new()
                .with_prompt("S3 URI of Lambda zip")
                .validate_with(validate_s3_uri)
                .interact_text()?
        }
    };
    let (bucket, key) = parse_s3_uri(&lambda_s3_uri)?;
    values.lambda_s3_bucket = bucket;
    values.lambda_s3_key = key;

    values.stack_name = match args.stack_name {
        Some(name) => name,
        None => Input::new()
            .with_prompt("Stack name")
            .default(values.stack_name)
            .interact_text()?,
    };

    values.data_bucket = match args.data_bucket {
        Some(bucket) => {
            validate_bucket_name(&bucket)
                .map_err(|e| anyhow::anyhow!("Invalid data bucket name: {}", e))?;
            bucket
        }
        None => Input::new()
            .with_prompt("S3 bucket for extracted records")
            .default(values.data_bucket)
            .validate_with(validate_bucket_name)
            .interact_text()?,
    };

    values.results_bucket = match args.results_bucket {
        Some(bucket) => {
            validate_bucket_name(&bucket)
                .map_err(|e| anyhow::anyhow!("Invalid results bucket name: {}", e))?;
            bucket
        }
        None => Input::new()
            .with_prompt("S3 bucket for Athena query results")
            .default(values.results_bucket)
            .validate_with(validate_bucket_name)
            .interact_text()?,
    };

    values.architecture = match args.architecture {
        Some(arch) => {
            if arch != "arm64" && arch != "x86_64" {
                anyhow::bail!(
                    "Invalid architecture '{}'. Must be 'arm64' or 'x86_64'.",
                    arch
                );
            }
            arch
        }
        None => {
            let options = &["arm64  - Graviton", "x86_64 - Intel/AMD"];
            let selection = Select::new()
                .with_prompt("Lambda architecture")
                .items(options)
                .default(0)
                .interact()?;
            if selection == 0 {
                "arm64".to_string()
            } else {
                "x86_64".to_string()
            }
        }
    };

    // Check if file exists
    let output_path = args.output;
    if output_path.exists() && !args.force {
        let overwrite = Confirm::new()
            .with_prompt(format!(
                "{} already exists. Overwrite?",
                output_path.display()
            ))
            .default(false)
            .interact()?;
        if !overwrite {
            println!("Aborted.");
            return Ok(());
        }
    }

    fs::write(&output_path, render(&values))
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    println!();
    println!("Created {}", output_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Deploy:");
    println!("     aws cloudformation deploy \\");
    println!("       --template-file {} \\", output_path.display());
    println!("       --stack-name {} \\", values.stack_name);
    println!("       --capabilities CAPABILITY_IAM");
    println!("  2. Check the pipeline:");
    println!("     datapipe check");
    println!();

    Ok(())
}

#[allow(clippy::ptr_arg)]
fn validate_s3_uri(input: &String) -> Result<(), String> {
    let Some(path) = input.strip_prefix("s3://") else {
        return Err("S3 URI must start with 's3://'".to_string());
    };
    match path.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok(()),
        _ => Err(
            "S3 URI must include both bucket and key (e.g., s3://bucket/key.zip)".to_string(),
        ),
    }
}

fn parse_s3_uri(uri: &str) -> Result<(String, String)> {
    let path = uri.strip_prefix("s3://").context("Invalid S3 URI")?;
    let (bucket, key) = path.split_once('/').context("Invalid S3 URI format")?;
    Ok((bucket.to_string(), key.to_string()))
}

#[allow(clippy::ptr_arg)]
pub fn validate_bucket_name(input: &String) -> Result<(), String> {
    if input.is_empty() {
        return Err("Bucket name cannot be empty".to_string());
    }
    if input.len() < 3 || input.len() > 63 {
        return Err("Bucket name must be 3-63 characters".to_string());
    }
    if !input
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(
            "Bucket name must contain only lowercase letters, numbers, and hyphens".to_string(),
        );
    }
    if input.starts_with('-') || input.ends_with('-') {
        return Err("Bucket name cannot start or end with a hyphen".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values() -> TemplateValues {
        let mut values = TemplateValues::from_config(&RuntimeConfig::default());
        values.lambda_s3_bucket = "my-artifacts".to_string();
        values.lambda_s3_key = "datapipe/bootstrap.zip".to_string();
        values
    }

    #[test]
    fn render_replaces_every_placeholder() {
        let rendered = render(&values());
        assert!(!rendered.contains("{{"), "unreplaced placeholder");
        assert!(rendered.contains("BucketName: data-pipeline-bucket-jsonplaceholder"));
        assert!(rendered.contains("BucketName: data-pipeline-athena-results-jsonplaceholder"));
        assert!(rendered.contains("S3Bucket: my-artifacts"));
        assert!(rendered.contains("S3Key: datapipe/bootstrap.zip"));
        assert!(rendered.contains("Name: data_pipeline_db"));
        assert!(rendered.contains("Name: data-pipeline-workgroup"));
        assert!(rendered.contains("s3://${DataBucket}/raw-data/"));
    }

    #[test]
    fn template_declares_schedules_and_outputs() {
        let rendered = render(&values());
        assert!(rendered.contains("ScheduleExpression: cron(0 1 * * ? *)"));
        assert!(rendered.contains("ScheduleExpression: cron(0 2 * * ? *)"));
        assert!(rendered.contains(r#"Input: !Sub '{"bucket_name": "${DataBucket}"}'"#));
        assert!(rendered.contains("Runtime: provided.al2023"));
        assert!(rendered.contains("Timeout: 300"));
        assert!(rendered.contains("MemorySize: 256"));
        assert!(rendered.contains("NoncurrentDays: 30"));
        assert!(rendered.contains("ExpirationInDays: 7"));
        for output in [
            "DataBucketName:",
            "AthenaResultsBucketName:",
            "GlueDatabaseName:",
            "GlueCrawlerName:",
            "AthenaWorkGroupName:",
            "LambdaFunctionName:",
        ] {
            assert!(rendered.contains(output), "missing output {}", output);
        }
    }

    #[test]
    fn function_writes_where_the_crawler_reads() {
        let mut config = RuntimeConfig::default();
        config.output.prefix = "landing".to_string();
        config.output.file_name = "people.json".to_string();
        let mut values = TemplateValues::from_config(&config);
        values.lambda_s3_bucket = "my-artifacts".to_string();
        values.lambda_s3_key = "datapipe/bootstrap.zip".to_string();

        let rendered = render(&values);
        assert!(rendered.contains("s3://${DataBucket}/landing/"));
        assert!(rendered.contains("DATAPIPE_OUTPUT_PREFIX: 'landing'"));
        assert!(rendered.contains("DATAPIPE_OUTPUT_FILE_NAME: 'people.json'"));
        assert!(rendered.contains("DATAPIPE_LOG_LEVEL: info"));
        assert!(!rendered.contains("RUST_LOG"));
        assert!(!rendered.contains("raw-data"));
    }

    #[test]
    fn bucket_name_rules() {
        assert!(validate_bucket_name(&"data-pipeline-bucket".to_string()).is_ok());
        assert!(validate_bucket_name(&"ab".to_string()).is_err());
        assert!(validate_bucket_name(&"a".repeat(64)).is_err());
        assert!(validate_bucket_name(&"Data-Pipeline".to_string()).is_err());
        assert!(validate_bucket_name(&"data_pipeline".to_string()).is_err());
        assert!(validate_bucket_name(&"-data-pipeline".to_string()).is_err());
        assert!(validate_bucket_name(&"data-pipeline-".to_string()).is_err());
    }

    #[test]
    fn s3_uri_parsing() {
        assert!(validate_s3_uri(&"s3://bucket/key.zip".to_string()).is_ok());
        assert!(validate_s3_uri(&"https://bucket/key.zip".to_string()).is_err());
        assert!(validate_s3_uri(&"s3://bucket".to_string()).is_err());
        assert!(validate_s3_uri(&"s3://bucket/".to_string()).is_err());

        let (bucket, key) = parse_s3_uri("s3://bucket/path/to/key.zip").unwrap();
        assert_eq!(bucket, "bucket");
        assert_eq!(key, "path/to/key.zip");
    }
}
