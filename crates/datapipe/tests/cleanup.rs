// Cleanup ordering and idempotency against an in-memory account

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use datapipe::cleanup::{Cleanup, CloudOps, StackWait, Step, StepStatus};
use datapipe::StackInfo;
use datapipe_config::ResourceNames;

const DATA_BUCKET: &str = "data-pipeline-bucket-a1b2c3";
const RESULTS_BUCKET: &str = "data-pipeline-athena-results-a1b2c3";
const FUNCTION: &str = "DataPipelineStack-DataExtractor-XYZ";

#[derive(Default)]
struct Account {
    stack: Option<StackInfo>,
    /// Number of upcoming stack deletions that end in DELETE_FAILED
    stack_delete_failures: u32,
    workgroups: BTreeSet<String>,
    /// (query id, state)
    queries: Vec<(String, &'static str)>,
    /// bucket name -> object version count
    buckets: BTreeMap<String, usize>,
    functions: BTreeSet<String>,
    crawlers: BTreeSet<String>,
    databases: BTreeSet<String>,
    broken_list_buckets: bool,
    calls: Vec<String>,
}

#[derive(Default)]
struct FakeCloud {
    account: Mutex<Account>,
}

impl FakeCloud {
    /// A fully deployed pipeline with some data in it
    fn deployed() -> Self {
        let names = ResourceNames::default();
        let mut account = Account {
            stack: Some(StackInfo {
                status: "CREATE_COMPLETE".to_string(),
                outputs: HashMap::from([
                    ("DataBucketName".to_string(), DATA_BUCKET.to_string()),
                    (
                        "AthenaResultsBucketName".to_string(),
                        RESULTS_BUCKET.to_string(),
                    ),
                    ("LambdaFunctionName".to_string(), FUNCTION.to_string()),
                ]),
            }),
            ..Account::default()
        };
        account.workgroups.insert(names.workgroup.clone());
        account.queries = vec![
            ("q-1".to_string(), "SUCCEEDED"),
            ("q-2".to_string(), "RUNNING"),
            ("q-3".to_string(), "QUEUED"),
        ];
        account.buckets.insert(DATA_BUCKET.to_string(), 12);
        account.buckets.insert(RESULTS_BUCKET.to_string(), 4);
        account.functions.insert(FUNCTION.to_string());
        account.crawlers.insert(names.crawler.clone());
        account.databases.insert(names.database.clone());
        Self {
            account: Mutex::new(account),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Account) -> R) -> R {
        let mut account = self.account.lock().unwrap();
        f(&mut account)
    }

    fn calls(&self) -> Vec<String> {
        self.with(|a| a.calls.clone())
    }

    fn position(&self, call: &str) -> usize {
        self.calls()
            .iter()
            .position(|c| c == call)
            .unwrap_or_else(|| panic!("{} was never called", call))
    }
}

fn remove(set: &mut BTreeSet<String>, name: &str) -> bool {
    set.remove(name)
}

#[async_trait]
impl CloudOps for FakeCloud {
    async fn describe_stack(&self, _name: &str) -> Result<Option<StackInfo>> {
        Ok(self.with(|a| a.stack.clone()))
    }

    async fn delete_stack(&self, name: &str) -> Result<()> {
        self.with(|a| {
            a.calls.push(format!("delete_stack:{}", name));
            let Some(stack) = a.stack.as_mut() else {
                return;
            };

            let owned = [DATA_BUCKET, RESULTS_BUCKET];
            let buckets_empty = owned
                .iter()
                .all(|b| a.buckets.get(*b).copied().unwrap_or(0) == 0);

            if a.stack_delete_failures > 0 || !buckets_empty {
                a.stack_delete_failures = a.stack_delete_failures.saturating_sub(1);
                stack.status = "DELETE_FAILED".to_string();
                return;
            }

            let names = ResourceNames::default();
            a.stack = None;
            for bucket in owned {
                a.buckets.remove(bucket);
            }
            a.functions.remove(FUNCTION);
            a.crawlers.remove(&names.crawler);
            a.databases.remove(&names.database);
            a.workgroups.remove(&names.workgroup);
        });
        Ok(())
    }

    async fn workgroup_exists(&self, name: &str) -> Result<bool> {
        Ok(self.with(|a| a.workgroups.contains(name)))
    }

    async fn active_queries(&self, _workgroup: &str) -> Result<Vec<String>> {
        Ok(self.with(|a| {
            a.queries
                .iter()
                .filter(|(_, state)| matches!(*state, "QUEUED" | "RUNNING"))
                .map(|(id, _)| id.clone())
                .collect()
        }))
    }

    async fn stop_query(&self, query_id: &str) -> Result<()> {
        self.with(|a| {
            a.calls.push(format!("stop_query:{}", query_id));
            for (id, state) in a.queries.iter_mut() {
                if id == query_id {
                    *state = "CANCELLED";
                }
            }
        });
        Ok(())
    }

    async fn delete_workgroup(&self, name: &str) -> Result<bool> {
        Ok(self.with(|a| {
            a.calls.push(format!("delete_workgroup:{}", name));
            let existed = remove(&mut a.workgroups, name);
            if existed {
                a.queries.clear();
            }
            existed
        }))
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        let (broken, buckets): (bool, Vec<String>) =
            self.with(|a| (a.broken_list_buckets, a.buckets.keys().cloned().collect()));
        if broken {
            bail!("AccessDenied: s3:ListAllMyBuckets");
        }
        Ok(buckets)
    }

    async fn bucket_exists(&self, name: &str) -> Result<bool> {
        Ok(self.with(|a| a.buckets.contains_key(name)))
    }

    async fn empty_bucket(&self, name: &str) -> Result<usize> {
        Ok(self.with(|a| {
            a.calls.push(format!("empty_bucket:{}", name));
            a.buckets
                .get_mut(name)
                .map(std::mem::take)
                .unwrap_or(0)
        }))
    }

    async fn delete_bucket(&self, name: &str) -> Result<bool> {
        self.with(|a| {
            a.calls.push(format!("delete_bucket:{}", name));
            match a.buckets.get(name) {
                None => Ok(false),
                Some(0) => {
                    a.buckets.remove(name);
                    Ok(true)
                }
                Some(_) => bail!("BucketNotEmpty: {}", name),
            }
        })
    }

    async fn function_exists(&self, name: &str) -> Result<bool> {
        Ok(self.with(|a| a.functions.contains(name)))
    }

    async fn delete_function(&self, name: &str) -> Result<bool> {
        Ok(self.with(|a| {
            a.calls.push(format!("delete_function:{}", name));
            remove(&mut a.functions, name)
        }))
    }

    async fn crawler_exists(&self, name: &str) -> Result<bool> {
        Ok(self.with(|a| a.crawlers.contains(name)))
    }

    async fn delete_crawler(&self, name: &str) -> Result<bool> {
        Ok(self.with(|a| {
            a.calls.push(format!("delete_crawler:{}", name));
            remove(&mut a.crawlers, name)
        }))
    }

    async fn database_exists(&self, name: &str) -> Result<bool> {
        Ok(self.with(|a| a.databases.contains(name)))
    }

    async fn delete_database(&self, name: &str) -> Result<bool> {
        Ok(self.with(|a| {
            a.calls.push(format!("delete_database:{}", name));
            remove(&mut a.databases, name)
        }))
    }
}

fn cleanup(cloud: FakeCloud) -> Cleanup<FakeCloud> {
    Cleanup::new(cloud, ResourceNames::default()).with_wait(StackWait {
        interval: Duration::ZERO,
        attempts: 3,
    })
}

#[tokio::test]
async fn test_full_teardown_is_clean() {
    let mut cleanup = cleanup(FakeCloud::deployed());
    let report = cleanup.run().await;

    assert!(report.is_clean(), "report: {:?}", report);
    assert_eq!(report.failures().count(), 0);
    // workgroup + 16 object versions + stack
    assert_eq!(report.deleted, 18);
    assert_eq!(
        report.step(Step::DestroyStack).unwrap().status,
        StepStatus::Done
    );
}

#[tokio::test]
async fn test_steps_run_in_order() {
    let mut cleanup = cleanup(FakeCloud::deployed());
    cleanup.run().await;
    let cloud = cleanup.cloud();

    let stop = cloud.position("stop_query:q-2");
    let workgroup = cloud.position("delete_workgroup:data-pipeline-workgroup");
    let empty = cloud.position(&format!("empty_bucket:{}", DATA_BUCKET));
    let destroy = cloud.position("delete_stack:DataPipelineStack");

    assert!(stop < workgroup);
    assert!(workgroup < empty);
    assert!(empty < destroy);

    // Finished queries are left alone
    assert!(!cloud.calls().contains(&"stop_query:q-1".to_string()));
}

#[tokio::test]
async fn test_second_run_deletes_nothing() {
    let mut cleanup = cleanup(FakeCloud::deployed());
    let first = cleanup.run().await;
    assert!(first.is_clean());

    let second = cleanup.run().await;
    assert!(second.is_clean(), "report: {:?}", second);
    assert_eq!(second.deleted, 0);
    assert_eq!(second.failures().count(), 0);
    assert_eq!(
        second.step(Step::DestroyStack).unwrap().status,
        StepStatus::Skipped
    );
}

#[tokio::test]
async fn test_destroy_failure_falls_back_to_manual_cleanup() {
    let cloud = FakeCloud::deployed();
    cloud.with(|a| a.stack_delete_failures = 1);

    let mut cleanup = cleanup(cloud);
    let report = cleanup.run().await;
    let cloud = cleanup.cloud();

    let first_destroy = cloud.position("delete_stack:DataPipelineStack");
    let function = cloud.position(&format!("delete_function:{}", FUNCTION));
    let crawler = cloud.position("delete_crawler:data-pipeline-crawler");
    let database = cloud.position("delete_database:data_pipeline_db");
    let bucket = cloud.position(&format!("delete_bucket:{}", DATA_BUCKET));

    assert!(first_destroy < function);
    assert!(function < crawler);
    assert!(crawler < database);
    assert!(database < bucket);

    // Stack deletion is retried once the leftovers are gone
    let destroys = cloud
        .calls()
        .iter()
        .filter(|c| c.starts_with("delete_stack:"))
        .count();
    assert_eq!(destroys, 2);
    assert!(report.is_clean(), "report: {:?}", report);
}

#[tokio::test]
async fn test_missing_stack_cleans_by_name() {
    let names = ResourceNames::default();
    let cloud = FakeCloud::default();
    cloud.with(|a| {
        a.buckets.insert(names.data_bucket.clone(), 5);
        a.functions.insert(names.function.clone());
        a.databases.insert(names.database.clone());
    });

    let mut cleanup = cleanup(cloud);
    let report = cleanup.run().await;

    assert!(report.is_clean(), "report: {:?}", report);
    // 5 objects + bucket + function + database
    assert_eq!(report.deleted, 8);
    assert!(!cleanup
        .cloud()
        .calls()
        .iter()
        .any(|c| c.starts_with("delete_stack:")));
}

#[tokio::test]
async fn test_orphaned_project_buckets_are_swept() {
    let cloud = FakeCloud::deployed();
    cloud.with(|a| {
        a.buckets.insert("data-pipeline-old-exports".to_string(), 3);
        a.buckets.insert("unrelated-bucket".to_string(), 7);
    });

    let mut cleanup = cleanup(cloud);
    let report = cleanup.run().await;

    assert!(report.is_clean(), "report: {:?}", report);
    let remaining: Vec<String> = cleanup.cloud().with(|a| a.buckets.keys().cloned().collect());
    assert_eq!(remaining, vec!["unrelated-bucket".to_string()]);
    assert_eq!(
        cleanup.cloud().with(|a| a.buckets["unrelated-bucket"]),
        7
    );
}

#[tokio::test]
async fn test_step_failure_does_not_stop_the_run() {
    let cloud = FakeCloud::deployed();
    cloud.with(|a| a.broken_list_buckets = true);

    let mut cleanup = cleanup(cloud);
    let report = cleanup.run().await;

    // Known bucket names still get emptied and the stack still goes away
    assert_eq!(
        report.step(Step::DestroyStack).unwrap().status,
        StepStatus::Done
    );
    // Verification cannot list buckets, so the run is not reported clean
    assert!(!report.verified);
    assert!(!report.is_clean());
    assert!(report.failures().any(|o| o.step == Step::EmptyBuckets));
}

#[tokio::test]
async fn test_stack_already_deleting_is_treated_as_absent() {
    let cloud = FakeCloud::default();
    cloud.with(|a| {
        a.stack = Some(StackInfo {
            status: "DELETE_COMPLETE".to_string(),
            outputs: HashMap::new(),
        });
    });

    let mut cleanup = cleanup(cloud);
    let report = cleanup.run().await;

    assert!(report.is_clean(), "report: {:?}", report);
    assert_eq!(report.deleted, 0);
    assert_eq!(
        report.step(Step::Discover).unwrap().status,
        StepStatus::Skipped
    );
}

#[tokio::test]
async fn test_delete_failed_stack_is_destroyed_again() {
    let cloud = FakeCloud::deployed();
    cloud.with(|a| {
        if let Some(stack) = a.stack.as_mut() {
            stack.status = "DELETE_FAILED".to_string();
        }
    });

    let mut cleanup = cleanup(cloud);
    let report = cleanup.run().await;
    let cloud = cleanup.cloud();

    assert_eq!(
        report.step(Step::Discover).unwrap().status,
        StepStatus::Done
    );
    // Buckets named only in the stack outputs are emptied before the retry
    let empty = cloud.position(&format!("empty_bucket:{}", DATA_BUCKET));
    let destroy = cloud.position("delete_stack:DataPipelineStack");
    assert!(empty < destroy);

    assert_eq!(
        report.step(Step::DestroyStack).unwrap().status,
        StepStatus::Done
    );
    assert!(report.is_clean(), "report: {:?}", report);
    assert!(cloud.with(|a| a.stack.is_none()));
}
