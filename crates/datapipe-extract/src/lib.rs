//! Extract records from an HTTP API into date-partitioned object storage
//!
//! A run fetches one JSON array, flattens every element into a single-level
//! record, stamps it with the extraction time, and writes the set as
//! newline-delimited JSON to `raw-data/year=YYYY/month=MM/day=DD/users.json`.

mod encoding;
mod error;
mod extractor;
mod flatten;
mod init;
mod partition;
mod record;
mod source;
mod storage;

pub use encoding::{to_ndjson, NDJSON_CONTENT_TYPE};
pub use error::{ErrorCode, ExtractError, Result};
pub use extractor::{ExtractionSummary, Extractor};
pub use flatten::{flatten_all, flatten_value, format_timestamp, FlattenRules};
pub use init::init_tracing;
pub use partition::partition_path;
pub use record::{FieldValue, Record, EXTRACTION_TIMESTAMP_FIELD};
pub use source::{HttpSource, RecordSource};
pub use storage::ObjectSink;

pub use datapipe_config as config;
