//! Tear down every resource the pipeline created
//!
//! Order matters and is fixed:
//!
//! 0. read stack outputs to learn the real resource names
//! 1. stop running queries in the Athena workgroup
//! 2. delete the workgroup (recursive, purges query history)
//! 3. empty every project bucket, including old object versions
//! 4. delete the CloudFormation stack and wait for it to go away
//! 5. if that failed or there was no stack, delete leftovers one by one;
//!    otherwise only sweep project buckets the stack did not own
//! 6. verify nothing is left
//!
//! Every step is guarded on its own: a failure is logged and recorded, and
//! the run moves on. Absent resources are not failures, so a second run
//! finds nothing to delete and still succeeds.

mod aws;

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use datapipe_config::ResourceNames;
use tracing::{info, warn};

use crate::stack::StackInfo;

pub use aws::AwsCloud;

/// Every cloud call the cleanup needs.
///
/// Methods that delete return `Ok(false)` when the target was already gone.
#[async_trait]
pub trait CloudOps: Send + Sync {
    async fn describe_stack(&self, name: &str) -> Result<Option<StackInfo>>;
    async fn delete_stack(&self, name: &str) -> Result<()>;

    async fn workgroup_exists(&self, name: &str) -> Result<bool>;
    /// IDs of queries in the workgroup that are still QUEUED or RUNNING
    async fn active_queries(&self, workgroup: &str) -> Result<Vec<String>>;
    async fn stop_query(&self, query_id: &str) -> Result<()>;
    async fn delete_workgroup(&self, name: &str) -> Result<bool>;

    async fn list_buckets(&self) -> Result<Vec<String>>;
    async fn bucket_exists(&self, name: &str) -> Result<bool>;
    /// Delete all object versions and delete markers; returns how many
    async fn empty_bucket(&self, name: &str) -> Result<usize>;
    async fn delete_bucket(&self, name: &str) -> Result<bool>;

    async fn function_exists(&self, name: &str) -> Result<bool>;
    async fn delete_function(&self, name: &str) -> Result<bool>;

    async fn crawler_exists(&self, name: &str) -> Result<bool>;
    async fn delete_crawler(&self, name: &str) -> Result<bool>;

    async fn database_exists(&self, name: &str) -> Result<bool>;
    async fn delete_database(&self, name: &str) -> Result<bool>;
}

/// How long to wait for the stack deletion
#[derive(Debug, Clone, Copy)]
pub struct StackWait {
    pub interval: Duration,
    pub attempts: u32,
}

impl Default for StackWait {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            attempts: 40,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Discover,
    StopQueries,
    DeleteWorkgroup,
    EmptyBuckets,
    DestroyStack,
    ManualCleanup,
    Verify,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Discover => "discover stack",
            Step::StopQueries => "stop queries",
            Step::DeleteWorkgroup => "delete workgroup",
            Step::EmptyBuckets => "empty buckets",
            Step::DestroyStack => "destroy stack",
            Step::ManualCleanup => "manual cleanup",
            Step::Verify => "verify",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Done,
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: Step,
    pub status: StepStatus,
    pub detail: String,
}

/// What a cleanup run did and what it left behind
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub steps: Vec<StepOutcome>,
    /// Resources and objects actually removed by this run
    pub deleted: usize,
    /// Resources still present after verification
    pub remaining: Vec<String>,
    pub verified: bool,
}

impl CleanupReport {
    /// True iff verification ran and found nothing left
    pub fn is_clean(&self) -> bool {
        self.verified && self.remaining.is_empty()
    }

    pub fn step(&self, step: Step) -> Option<&StepOutcome> {
        self.steps.iter().rev().find(|o| o.step == step)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps
            .iter()
            .filter(|o| matches!(o.status, StepStatus::Failed(_)))
    }

    fn record(&mut self, step: Step, status: StepStatus, detail: impl Into<String>) {
        let detail = detail.into();
        match &status {
            StepStatus::Failed(reason) => warn!(%step, %reason, "{}", detail),
            _ => info!(%step, "{}", detail),
        }
        self.steps.push(StepOutcome {
            step,
            status,
            detail,
        });
    }
}

pub struct Cleanup<C> {
    cloud: C,
    names: ResourceNames,
    wait: StackWait,
}

impl<C: CloudOps> Cleanup<C> {
    pub fn new(cloud: C, names: ResourceNames) -> Self {
        Self {
            cloud,
            names,
            wait: StackWait::default(),
        }
    }

    pub fn with_wait(mut self, wait: StackWait) -> Self {
        self.wait = wait;
        self
    }

    pub fn cloud(&self) -> &C {
        &self.cloud
    }

    pub async fn run(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();

        let (stack_present, output_buckets) = self.discover(&mut report).await;
        self.stop_queries(&mut report).await;
        self.delete_workgroup(&mut report).await;

        let buckets = self.bucket_set(output_buckets, &mut report).await;
        self.empty_buckets(&buckets, &mut report).await;

        let destroyed = if stack_present {
            self.destroy_stack(&mut report).await
        } else {
            report.record(
                Step::DestroyStack,
                StepStatus::Skipped,
                format!("stack {} not found", self.names.stack_name),
            );
            false
        };

        if destroyed {
            // The stack only owns its own buckets
            self.manual_cleanup(&buckets, false, &mut report).await;
        } else {
            self.manual_cleanup(&buckets, true, &mut report).await;
            if stack_present {
                // Leftovers may have been what blocked the first attempt
                self.destroy_stack(&mut report).await;
            }
        }

        self.verify(&mut report).await;
        report
    }

    /// Step 0: pick up real names from the stack outputs
    async fn discover(&mut self, report: &mut CleanupReport) -> (bool, Vec<String>) {
        let stack = match self.cloud.describe_stack(&self.names.stack_name).await {
            Ok(stack) => stack,
            Err(e) => {
                report.record(
                    Step::Discover,
                    StepStatus::Failed(format!("{:#}", e)),
                    "could not read stack, using configured names",
                );
                return (false, Vec::new());
            }
        };

        let Some(stack) = stack else {
            report.record(Step::Discover, StepStatus::Skipped, "stack not found");
            return (false, Vec::new());
        };

        if stack.is_deleting() {
            report.record(
                Step::Discover,
                StepStatus::Skipped,
                format!("stack is already being deleted ({})", stack.status),
            );
            return (false, Vec::new());
        }

        // Configured names stay in the sweep even when the stack renames them
        let mut buckets = vec![
            self.names.data_bucket.clone(),
            self.names.results_bucket.clone(),
        ];
        if let Some(bucket) = stack.output("DataBucketName") {
            self.names.data_bucket = bucket.to_string();
            buckets.push(bucket.to_string());
        }
        if let Some(bucket) = stack.output("AthenaResultsBucketName") {
            self.names.results_bucket = bucket.to_string();
            buckets.push(bucket.to_string());
        }
        if let Some(function) = stack.output("LambdaFunctionName") {
            self.names.function = function.to_string();
        }

        report.record(
            Step::Discover,
            StepStatus::Done,
            format!("stack status {}", stack.status),
        );
        (true, buckets)
    }

    /// Step 1
    async fn stop_queries(&self, report: &mut CleanupReport) {
        let workgroup = &self.names.workgroup;
        match self.cloud.workgroup_exists(workgroup).await {
            Ok(false) => {
                report.record(Step::StopQueries, StepStatus::Skipped, "workgroup not found");
                return;
            }
            Ok(true) => {}
            Err(e) => {
                report.record(
                    Step::StopQueries,
                    StepStatus::Failed(format!("{:#}", e)),
                    "could not look up workgroup",
                );
                return;
            }
        }

        let queries = match self.cloud.active_queries(workgroup).await {
            Ok(queries) => queries,
            Err(e) => {
                report.record(
                    Step::StopQueries,
                    StepStatus::Failed(format!("{:#}", e)),
                    "could not list query executions",
                );
                return;
            }
        };

        let mut stopped = 0;
        let mut errors = Vec::new();
        for query in &queries {
            match self.cloud.stop_query(query).await {
                Ok(()) => stopped += 1,
                Err(e) => errors.push(format!("{}: {:#}", query, e)),
            }
        }

        let status = if errors.is_empty() {
            StepStatus::Done
        } else {
            StepStatus::Failed(errors.join("; "))
        };
        report.record(
            Step::StopQueries,
            status,
            format!("stopped {} of {} active queries", stopped, queries.len()),
        );
    }

    /// Step 2
    async fn delete_workgroup(&self, report: &mut CleanupReport) {
        let workgroup = &self.names.workgroup;
        match self.cloud.delete_workgroup(workgroup).await {
            Ok(true) => {
                report.deleted += 1;
                report.record(
                    Step::DeleteWorkgroup,
                    StepStatus::Done,
                    format!("deleted workgroup {}", workgroup),
                );
            }
            Ok(false) => report.record(
                Step::DeleteWorkgroup,
                StepStatus::Skipped,
                format!("workgroup {} not found", workgroup),
            ),
            Err(e) => report.record(
                Step::DeleteWorkgroup,
                StepStatus::Failed(format!("{:#}", e)),
                format!("could not delete workgroup {}", workgroup),
            ),
        }
    }

    /// Stack outputs, configured names and every account bucket with the
    /// project prefix
    async fn bucket_set(&self, from_stack: Vec<String>, report: &mut CleanupReport) -> Vec<String> {
        let mut buckets: BTreeSet<String> = from_stack.into_iter().collect();
        buckets.insert(self.names.data_bucket.clone());
        buckets.insert(self.names.results_bucket.clone());

        match self.cloud.list_buckets().await {
            Ok(all) => buckets.extend(
                all.into_iter()
                    .filter(|b| b.starts_with(&self.names.project_prefix)),
            ),
            Err(e) => report.record(
                Step::EmptyBuckets,
                StepStatus::Failed(format!("{:#}", e)),
                "could not list account buckets, using known names only",
            ),
        }

        buckets.into_iter().filter(|b| !b.is_empty()).collect()
    }

    /// Step 3
    async fn empty_buckets(&self, buckets: &[String], report: &mut CleanupReport) {
        let mut emptied = 0;
        let mut objects = 0;
        let mut errors = Vec::new();

        for bucket in buckets {
            match self.cloud.bucket_exists(bucket).await {
                Ok(false) => continue,
                Ok(true) => {}
                Err(e) => {
                    errors.push(format!("{}: {:#}", bucket, e));
                    continue;
                }
            }

            match self.cloud.empty_bucket(bucket).await {
                Ok(count) => {
                    info!(bucket = %bucket, objects = count, "Emptied bucket");
                    emptied += 1;
                    objects += count;
                }
                Err(e) => errors.push(format!("{}: {:#}", bucket, e)),
            }
        }

        report.deleted += objects;
        let detail = format!("emptied {} buckets ({} objects)", emptied, objects);
        let status = if !errors.is_empty() {
            StepStatus::Failed(errors.join("; "))
        } else if emptied == 0 {
            StepStatus::Skipped
        } else {
            StepStatus::Done
        };
        report.record(Step::EmptyBuckets, status, detail);
    }

    /// Step 4: returns true once the stack is gone
    async fn destroy_stack(&self, report: &mut CleanupReport) -> bool {
        let stack_name = &self.names.stack_name;
        if let Err(e) = self.cloud.delete_stack(stack_name).await {
            report.record(
                Step::DestroyStack,
                StepStatus::Failed(format!("{:#}", e)),
                format!("could not delete stack {}", stack_name),
            );
            return false;
        }
        info!(stack = %stack_name, "Stack deletion initiated, waiting for completion");

        for attempt in 1..=self.wait.attempts {
            tokio::time::sleep(self.wait.interval).await;

            match self.cloud.describe_stack(stack_name).await {
                Ok(None) => {
                    report.deleted += 1;
                    report.record(
                        Step::DestroyStack,
                        StepStatus::Done,
                        format!("stack {} deleted", stack_name),
                    );
                    return true;
                }
                Ok(Some(stack)) if stack.status == "DELETE_COMPLETE" => {
                    report.deleted += 1;
                    report.record(
                        Step::DestroyStack,
                        StepStatus::Done,
                        format!("stack {} deleted", stack_name),
                    );
                    return true;
                }
                Ok(Some(stack)) if stack.status == "DELETE_FAILED" => {
                    report.record(
                        Step::DestroyStack,
                        StepStatus::Failed(stack.status),
                        format!("stack {} could not be deleted", stack_name),
                    );
                    return false;
                }
                Ok(Some(stack)) => {
                    info!(
                        status = %stack.status,
                        attempt,
                        max_attempts = self.wait.attempts,
                        "Waiting for stack deletion"
                    );
                }
                Err(e) => {
                    warn!(error = %format!("{:#}", e), attempt, "Error checking stack status");
                }
            }
        }

        report.record(
            Step::DestroyStack,
            StepStatus::Failed("timed out".to_string()),
            format!(
                "stack {} still present after {} checks",
                stack_name, self.wait.attempts
            ),
        );
        false
    }

    /// Step 5: function, crawler, database, then buckets. `services` is
    /// false after a clean stack delete, when only buckets outside the stack
    /// can linger.
    async fn manual_cleanup(
        &self,
        buckets: &[String],
        services: bool,
        report: &mut CleanupReport,
    ) {
        let mut deleted = Vec::new();
        let mut errors = Vec::new();

        if services {
            let function = &self.names.function;
            tally(
                self.cloud.delete_function(function).await,
                format!("function {}", function),
                &mut deleted,
                &mut errors,
            );

            let crawler = &self.names.crawler;
            tally(
                self.cloud.delete_crawler(crawler).await,
                format!("crawler {}", crawler),
                &mut deleted,
                &mut errors,
            );

            let database = &self.names.database;
            tally(
                self.cloud.delete_database(database).await,
                format!("database {}", database),
                &mut deleted,
                &mut errors,
            );
        }

        for bucket in buckets {
            // Objects may have landed since step 3
            match self.cloud.bucket_exists(bucket).await {
                Ok(true) => {
                    if let Err(e) = self.cloud.empty_bucket(bucket).await {
                        errors.push(format!("bucket {}: {:#}", bucket, e));
                        continue;
                    }
                }
                Ok(false) => continue,
                Err(e) => {
                    errors.push(format!("bucket {}: {:#}", bucket, e));
                    continue;
                }
            }
            tally(
                self.cloud.delete_bucket(bucket).await,
                format!("bucket {}", bucket),
                &mut deleted,
                &mut errors,
            );
        }

        report.deleted += deleted.len();
        let detail = if deleted.is_empty() {
            "nothing left to delete".to_string()
        } else {
            format!("deleted {}", deleted.join(", "))
        };
        let status = if errors.is_empty() {
            StepStatus::Done
        } else {
            StepStatus::Failed(errors.join("; "))
        };
        report.record(Step::ManualCleanup, status, detail);
    }

    /// Step 6
    async fn verify(&self, report: &mut CleanupReport) {
        let names = &self.names;
        let mut remaining = Vec::new();
        let mut errors = Vec::new();

        match self.cloud.describe_stack(&names.stack_name).await {
            Ok(Some(stack)) if stack.status != "DELETE_COMPLETE" => {
                remaining.push(format!("stack {} ({})", names.stack_name, stack.status))
            }
            Ok(_) => {}
            Err(e) => errors.push(format!("stack: {:#}", e)),
        }

        match self.cloud.list_buckets().await {
            Ok(buckets) => remaining.extend(
                buckets
                    .into_iter()
                    .filter(|b| b.starts_with(&names.project_prefix))
                    .map(|b| format!("bucket {}", b)),
            ),
            Err(e) => errors.push(format!("buckets: {:#}", e)),
        }

        let checks = [
            (
                self.cloud.function_exists(&names.function).await,
                format!("function {}", names.function),
            ),
            (
                self.cloud.database_exists(&names.database).await,
                format!("database {}", names.database),
            ),
            (
                self.cloud.crawler_exists(&names.crawler).await,
                format!("crawler {}", names.crawler),
            ),
            (
                self.cloud.workgroup_exists(&names.workgroup).await,
                format!("workgroup {}", names.workgroup),
            ),
        ];
        for (result, label) in checks {
            match result {
                Ok(true) => remaining.push(label),
                Ok(false) => {}
                Err(e) => errors.push(format!("{}: {:#}", label, e)),
            }
        }

        report.verified = errors.is_empty();
        let status = if !errors.is_empty() {
            StepStatus::Failed(errors.join("; "))
        } else if !remaining.is_empty() {
            StepStatus::Failed(format!("{} resources remain", remaining.len()))
        } else {
            StepStatus::Done
        };
        let detail = if remaining.is_empty() {
            "no pipeline resources found".to_string()
        } else {
            format!("still present: {}", remaining.join(", "))
        };
        report.remaining = remaining;
        report.record(Step::Verify, status, detail);
    }
}

fn tally(result: Result<bool>, label: String, deleted: &mut Vec<String>, errors: &mut Vec<String>) {
    match result {
        Ok(true) => deleted.push(label),
        Ok(false) => {}
        Err(e) => errors.push(format!("{}: {:#}", label, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_is_clean_only_after_verification() {
        let mut report = CleanupReport::default();
        assert!(!report.is_clean());

        report.verified = true;
        assert!(report.is_clean());

        report.remaining.push("bucket data-pipeline-x".to_string());
        assert!(!report.is_clean());
    }

    #[test]
    fn step_returns_latest_outcome() {
        let mut report = CleanupReport::default();
        report.record(
            Step::DestroyStack,
            StepStatus::Failed("DELETE_FAILED".to_string()),
            "first",
        );
        report.record(Step::DestroyStack, StepStatus::Done, "second");

        assert_eq!(report.step(Step::DestroyStack).unwrap().detail, "second");
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn default_wait_is_ten_minutes() {
        let wait = StackWait::default();
        assert_eq!(wait.interval * wait.attempts, Duration::from_secs(600));
    }
}
