//! Fetch → flatten → encode → write
//!
//! One run is all-or-nothing: nothing is written unless the fetch and the
//! flattening of every element succeeded. Failures are returned, never retried.

use chrono::{DateTime, Utc};
use datapipe_config::OutputConfig;
use serde::Serialize;
use tracing::{info, instrument};

use crate::encoding::{to_ndjson, NDJSON_CONTENT_TYPE};
use crate::error::Result;
use crate::flatten::{flatten_all, format_timestamp, FlattenRules};
use crate::partition::partition_path;
use crate::source::RecordSource;
use crate::storage::ObjectSink;

/// Outcome of a successful run
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExtractionSummary {
    pub records_processed: usize,
    /// Object key inside the storage root
    pub path: String,
    /// Full URI, e.g. `s3://bucket/raw-data/year=2024/...`
    pub location: String,
    pub timestamp: String,
}

pub struct Extractor<S> {
    source: S,
    sink: ObjectSink,
    output: OutputConfig,
    rules: FlattenRules,
}

impl<S: RecordSource> Extractor<S> {
    pub fn new(source: S, sink: ObjectSink, output: OutputConfig) -> Self {
        Self {
            source,
            sink,
            output,
            rules: FlattenRules::default(),
        }
    }

    pub fn with_rules(mut self, rules: FlattenRules) -> Self {
        self.rules = rules;
        self
    }

    pub async fn run(&self) -> Result<ExtractionSummary> {
        self.run_at(Utc::now()).await
    }

    /// Run with an explicit extraction time, which picks the partition
    #[instrument(skip(self), fields(source = %self.source.describe()))]
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<ExtractionSummary> {
        info!("Fetching records");
        let values = self.source.fetch().await?;
        info!(count = values.len(), "Retrieved records from source");

        let records = flatten_all(&values, &self.rules, now)?;
        let body = to_ndjson(&records)?;

        let path = partition_path(&self.output.prefix, now, &self.output.file_name);
        let location = self.sink.location(&path);
        info!(location = %location, bytes = body.len(), "Uploading records");

        self.sink.put(&path, body, NDJSON_CONTENT_TYPE).await?;

        info!(
            records = records.len(),
            location = %location,
            "Extraction complete"
        );

        Ok(ExtractionSummary {
            records_processed: records.len(),
            path,
            location,
            timestamp: format_timestamp(now),
        })
    }
}
