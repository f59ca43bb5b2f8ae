// CloudOps backed by the AWS SDK

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_athena::types::QueryExecutionState;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use tracing::{debug, warn};

use super::CloudOps;
use crate::stack::{self, StackInfo};

/// S3 DeleteObjects accepts at most this many keys per request
const DELETE_BATCH: usize = 1000;
/// Athena BatchGetQueryExecution accepts at most this many IDs per request
const QUERY_BATCH: usize = 50;

pub struct AwsCloud {
    athena: aws_sdk_athena::Client,
    cfn: aws_sdk_cloudformation::Client,
    glue: aws_sdk_glue::Client,
    lambda: aws_sdk_lambda::Client,
    s3: aws_sdk_s3::Client,
}

impl AwsCloud {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            athena: aws_sdk_athena::Client::new(config),
            cfn: aws_sdk_cloudformation::Client::new(config),
            glue: aws_sdk_glue::Client::new(config),
            lambda: aws_sdk_lambda::Client::new(config),
            s3: aws_sdk_s3::Client::new(config),
        }
    }

    async fn workgroup_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut next_token = None;
        loop {
            let response = self
                .athena
                .list_work_groups()
                .set_next_token(next_token)
                .send()
                .await
                .context("Failed to list Athena workgroups")?;

            names.extend(
                response
                    .work_groups()
                    .iter()
                    .filter_map(|wg| wg.name().map(str::to_string)),
            );

            match response.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => return Ok(names),
            }
        }
    }

    async fn delete_versions(&self, bucket: &str, objects: Vec<ObjectIdentifier>) -> Result<usize> {
        let count = objects.len();
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .context("Failed to build delete request")?;

        let response = self
            .s3
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .with_context(|| format!("Failed to delete objects from {}", bucket))?;

        let failed = response.errors().len();
        if failed > 0 {
            if let Some(first) = response.errors().first() {
                warn!(
                    bucket,
                    failed,
                    key = first.key().unwrap_or_default(),
                    reason = first.message().unwrap_or_default(),
                    "Some objects could not be deleted"
                );
            }
        }
        Ok(count - failed)
    }
}

#[async_trait]
impl CloudOps for AwsCloud {
    async fn describe_stack(&self, name: &str) -> Result<Option<StackInfo>> {
        stack::describe_stack(&self.cfn, name).await
    }

    async fn delete_stack(&self, name: &str) -> Result<()> {
        self.cfn
            .delete_stack()
            .stack_name(name)
            .send()
            .await
            .with_context(|| format!("Failed to delete stack {}", name))?;
        Ok(())
    }

    async fn workgroup_exists(&self, name: &str) -> Result<bool> {
        Ok(self.workgroup_names().await?.iter().any(|wg| wg == name))
    }

    async fn active_queries(&self, workgroup: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut next_token = None;
        loop {
            let response = self
                .athena
                .list_query_executions()
                .work_group(workgroup)
                .set_next_token(next_token)
                .send()
                .await
                .with_context(|| format!("Failed to list queries in {}", workgroup))?;
            ids.extend(response.query_execution_ids().iter().cloned());

            match response.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        let mut active = Vec::new();
        for chunk in ids.chunks(QUERY_BATCH) {
            let response = self
                .athena
                .batch_get_query_execution()
                .set_query_execution_ids(Some(chunk.to_vec()))
                .send()
                .await
                .context("Failed to read query execution status")?;

            for execution in response.query_executions() {
                let state = execution.status().and_then(|s| s.state());
                if matches!(
                    state,
                    Some(QueryExecutionState::Queued) | Some(QueryExecutionState::Running)
                ) {
                    if let Some(id) = execution.query_execution_id() {
                        active.push(id.to_string());
                    }
                }
            }
        }
        debug!(workgroup, total = ids.len(), active = active.len(), "Query executions");
        Ok(active)
    }

    async fn stop_query(&self, query_id: &str) -> Result<()> {
        self.athena
            .stop_query_execution()
            .query_execution_id(query_id)
            .send()
            .await
            .with_context(|| format!("Failed to stop query {}", query_id))?;
        Ok(())
    }

    async fn delete_workgroup(&self, name: &str) -> Result<bool> {
        if !self.workgroup_exists(name).await? {
            return Ok(false);
        }
        self.athena
            .delete_work_group()
            .work_group(name)
            .recursive_delete_option(true)
            .send()
            .await
            .with_context(|| format!("Failed to delete workgroup {}", name))?;
        Ok(true)
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        let response = self
            .s3
            .list_buckets()
            .send()
            .await
            .context("Failed to list S3 buckets")?;
        Ok(response
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(str::to_string))
            .collect())
    }

    async fn bucket_exists(&self, name: &str) -> Result<bool> {
        match self.s3.head_bucket().bucket(name).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to check bucket {}", name)),
        }
    }

    async fn empty_bucket(&self, name: &str) -> Result<usize> {
        let mut deleted = 0;
        let mut key_marker: Option<String> = None;
        let mut version_marker: Option<String> = None;

        loop {
            let response = self
                .s3
                .list_object_versions()
                .bucket(name)
                .set_key_marker(key_marker.take())
                .set_version_id_marker(version_marker.take())
                .send()
                .await
                .with_context(|| format!("Failed to list object versions in {}", name))?;

            let mut batch = Vec::new();
            let versions = response
                .versions()
                .iter()
                .map(|v| (v.key(), v.version_id()));
            let markers = response
                .delete_markers()
                .iter()
                .map(|m| (m.key(), m.version_id()));

            for (key, version_id) in versions.chain(markers) {
                let Some(key) = key else { continue };
                batch.push(
                    ObjectIdentifier::builder()
                        .key(key)
                        .set_version_id(version_id.map(str::to_string))
                        .build()
                        .context("Failed to build object identifier")?,
                );
                if batch.len() == DELETE_BATCH {
                    deleted += self.delete_versions(name, std::mem::take(&mut batch)).await?;
                }
            }
            if !batch.is_empty() {
                deleted += self.delete_versions(name, batch).await?;
            }

            if response.is_truncated().unwrap_or(false) {
                key_marker = response.next_key_marker().map(str::to_string);
                version_marker = response.next_version_id_marker().map(str::to_string);
            } else {
                return Ok(deleted);
            }
        }
    }

    async fn delete_bucket(&self, name: &str) -> Result<bool> {
        match self.s3.delete_bucket().bucket(name).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().and_then(|se| se.code()) == Some("NoSuchBucket") => {
                Ok(false)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to delete bucket {}", name)),
        }
    }

    async fn function_exists(&self, name: &str) -> Result<bool> {
        match self.lambda.get_function().function_name(name).send().await {
            Ok(_) => Ok(true),
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_resource_not_found_exception()) =>
            {
                Ok(false)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to look up function {}", name)),
        }
    }

    async fn delete_function(&self, name: &str) -> Result<bool> {
        match self.lambda.delete_function().function_name(name).send().await {
            Ok(_) => Ok(true),
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_resource_not_found_exception()) =>
            {
                Ok(false)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to delete function {}", name)),
        }
    }

    async fn crawler_exists(&self, name: &str) -> Result<bool> {
        match self.glue.get_crawler().name(name).send().await {
            Ok(_) => Ok(true),
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_entity_not_found_exception()) =>
            {
                Ok(false)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to look up crawler {}", name)),
        }
    }

    async fn delete_crawler(&self, name: &str) -> Result<bool> {
        match self.glue.delete_crawler().name(name).send().await {
            Ok(_) => Ok(true),
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_entity_not_found_exception()) =>
            {
                Ok(false)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to delete crawler {}", name)),
        }
    }

    async fn database_exists(&self, name: &str) -> Result<bool> {
        match self.glue.get_database().name(name).send().await {
            Ok(_) => Ok(true),
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_entity_not_found_exception()) =>
            {
                Ok(false)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to look up database {}", name)),
        }
    }

    async fn delete_database(&self, name: &str) -> Result<bool> {
        match self.glue.delete_database().name(name).send().await {
            Ok(_) => Ok(true),
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_entity_not_found_exception()) =>
            {
                Ok(false)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to delete database {}", name)),
        }
    }
}
