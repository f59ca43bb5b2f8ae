//! End-to-end check of a deployed pipeline
//!
//! Invokes the extractor, then follows the data: objects in S3, the crawler,
//! catalog tables and finally a COUNT(*) through Athena.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use aws_sdk_athena::types::{QueryExecutionContext, QueryExecutionState};
use aws_sdk_glue::types::CrawlerState;
use clap::Args;
use datapipe_config::RuntimeConfig;
use tracing::warn;

use crate::deploy::function::invoke;
use crate::stack::{load_sdk_config, stack_outputs};

const QUERY_ATTEMPTS: u32 = 30;
const QUERY_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Args)]
pub struct CheckArgs {
    /// AWS region (defaults to the SDK's region chain)
    #[arg(long)]
    pub region: Option<String>,

    /// Do not invoke the function, only inspect what is already there
    #[arg(long)]
    pub no_invoke: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Default)]
pub struct CheckReport {
    pub results: Vec<CheckResult>,
}

impl CheckReport {
    pub fn all_passed(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.passed)
    }

    fn record(&mut self, name: &'static str, outcome: Result<String>) {
        let result = match outcome {
            Ok(detail) => {
                println!("✅ {}: {}", name, detail);
                CheckResult {
                    name,
                    passed: true,
                    detail,
                }
            }
            Err(e) => {
                let detail = format!("{:#}", e);
                println!("❌ {}: {}", name, detail);
                CheckResult {
                    name,
                    passed: false,
                    detail,
                }
            }
        };
        self.results.push(result);
    }

    pub fn print_summary(&self) {
        let passed = self.results.iter().filter(|r| r.passed).count();
        println!();
        println!("{}/{} checks passed", passed, self.results.len());
        if self.all_passed() {
            println!("🎉 Pipeline is working end to end");
        }
    }
}

struct Clients {
    athena: aws_sdk_athena::Client,
    glue: aws_sdk_glue::Client,
    lambda: aws_sdk_lambda::Client,
    s3: aws_sdk_s3::Client,
}

pub async fn run(args: CheckArgs, config: &RuntimeConfig) -> Result<CheckReport> {
    println!();
    println!("datapipe check - {}", config.resources.stack_name);
    println!();

    let sdk_config = load_sdk_config(args.region.as_deref()).await;
    let cfn = aws_sdk_cloudformation::Client::new(&sdk_config);
    let clients = Clients {
        athena: aws_sdk_athena::Client::new(&sdk_config),
        glue: aws_sdk_glue::Client::new(&sdk_config),
        lambda: aws_sdk_lambda::Client::new(&sdk_config),
        s3: aws_sdk_s3::Client::new(&sdk_config),
    };

    let mut report = CheckReport::default();
    let names = &config.resources;

    let outputs = match stack_outputs(&cfn, &names.stack_name).await {
        Ok(outputs) => {
            report.record("stack", Ok(format!("{} outputs", outputs.len())));
            outputs
        }
        Err(e) => {
            report.record("stack", Err(e));
            HashMap::new()
        }
    };
    let output = |key: &str, fallback: &str| {
        outputs
            .get(key)
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    };

    let function = output("LambdaFunctionName", &names.function);
    let bucket = output("DataBucketName", &names.data_bucket);
    let crawler = output("GlueCrawlerName", &names.crawler);
    let database = output("GlueDatabaseName", &names.database);
    let workgroup = output("AthenaWorkGroupName", &names.workgroup);

    if !args.no_invoke {
        let outcome = invoke(&clients.lambda, &function, &bucket)
            .await
            .map(|_| format!("{} returned statusCode 200", function));
        report.record("invoke", outcome);
    }

    let prefix = format!("{}/", config.output.prefix.trim_end_matches('/'));
    report.record("objects", list_objects(&clients, &bucket, &prefix).await);
    report.record("crawler", start_crawler(&clients, &crawler).await);
    report.record("tables", list_tables(&clients, &database).await);

    let query = format!(
        "SELECT COUNT(*) AS record_count FROM \"{}\".\"{}\"",
        database, names.table
    );
    report.record(
        "query",
        run_query(&clients, &query, &database, &workgroup).await,
    );

    report.print_summary();
    Ok(report)
}

async fn list_objects(clients: &Clients, bucket: &str, prefix: &str) -> Result<String> {
    let response = clients
        .s3
        .list_objects_v2()
        .bucket(bucket)
        .prefix(prefix)
        .send()
        .await
        .with_context(|| format!("Failed to list s3://{}/{}", bucket, prefix))?;

    let objects = response.contents();
    if objects.is_empty() {
        bail!("no objects under s3://{}/{}", bucket, prefix);
    }
    for object in objects.iter().take(5) {
        println!(
            "   {} ({} bytes)",
            object.key().unwrap_or_default(),
            object.size().unwrap_or_default()
        );
    }
    Ok(format!("{} objects under s3://{}/{}", objects.len(), bucket, prefix))
}

async fn start_crawler(clients: &Clients, crawler: &str) -> Result<String> {
    let response = clients
        .glue
        .get_crawler()
        .name(crawler)
        .send()
        .await
        .with_context(|| format!("Failed to read crawler {}", crawler))?;

    let state = response.crawler().and_then(|c| c.state());
    match state {
        Some(CrawlerState::Ready) => {
            clients
                .glue
                .start_crawler()
                .name(crawler)
                .send()
                .await
                .with_context(|| format!("Failed to start crawler {}", crawler))?;
            Ok(format!("started {}", crawler))
        }
        Some(state) => Ok(format!("{} is {}", crawler, state.as_str())),
        None => bail!("crawler {} has no state", crawler),
    }
}

async fn list_tables(clients: &Clients, database: &str) -> Result<String> {
    let response = clients
        .glue
        .get_tables()
        .database_name(database)
        .send()
        .await
        .with_context(|| format!("Failed to list tables in {}", database))?;

    let tables: Vec<&str> = response.table_list().iter().map(|t| t.name()).collect();
    if tables.is_empty() {
        bail!("no tables in {} yet (the crawler may still be running)", database);
    }
    Ok(format!("{}: {}", database, tables.join(", ")))
}

async fn run_query(
    clients: &Clients,
    query: &str,
    database: &str,
    workgroup: &str,
) -> Result<String> {
    let started = clients
        .athena
        .start_query_execution()
        .query_string(query)
        .query_execution_context(QueryExecutionContext::builder().database(database).build())
        .work_group(workgroup)
        .send()
        .await
        .context("Failed to start Athena query")?;
    let query_id = started
        .query_execution_id()
        .context("Athena returned no query execution id")?;

    for attempt in 1..=QUERY_ATTEMPTS {
        let execution = clients
            .athena
            .get_query_execution()
            .query_execution_id(query_id)
            .send()
            .await
            .context("Failed to read query status")?;
        let status = execution.query_execution().and_then(|q| q.status());

        match status.and_then(|s| s.state()) {
            Some(QueryExecutionState::Succeeded) => {
                let results = clients
                    .athena
                    .get_query_results()
                    .query_execution_id(query_id)
                    .send()
                    .await
                    .context("Failed to read query results")?;

                // First row is the header
                let count = results
                    .result_set()
                    .and_then(|rs| rs.rows().get(1))
                    .and_then(|row| row.data().first())
                    .and_then(|datum| datum.var_char_value())
                    .unwrap_or("0");
                return Ok(format!("{} records", count));
            }
            Some(QueryExecutionState::Failed) | Some(QueryExecutionState::Cancelled) => {
                let reason = status
                    .and_then(|s| s.state_change_reason())
                    .unwrap_or("no reason given");
                bail!("query {} did not succeed: {}", query_id, reason);
            }
            state => {
                if attempt % 5 == 0 {
                    warn!(query_id, ?state, attempt, "Query still running");
                }
                tokio::time::sleep(QUERY_INTERVAL).await;
            }
        }
    }

    bail!(
        "query {} did not finish after {} checks",
        query_id,
        QUERY_ATTEMPTS
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_requires_every_check() {
        let mut report = CheckReport::default();
        assert!(!report.all_passed());

        report.record("objects", Ok("3 objects".to_string()));
        assert!(report.all_passed());

        report.record("query", Err(anyhow::anyhow!("workgroup not found")));
        assert!(!report.all_passed());
        assert_eq!(report.results[1].detail, "workgroup not found");
    }
}
