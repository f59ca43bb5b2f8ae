// Invocation event and response shapes
//
// The scheduled rule sends `{"bucket_name": "..."}`. Manual invocations may
// send `{}`, in which case the bucket falls back to the environment.

use datapipe_extract::{ExtractError, ExtractionSummary};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractionEvent {
    #[serde(default)]
    pub bucket_name: Option<String>,
}

/// API-Gateway-style response: a status code plus a JSON-encoded body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

impl InvocationResponse {
    pub fn success(summary: &ExtractionSummary) -> Self {
        Self {
            status_code: 200,
            body: json!({
                "message": "Data extraction and upload successful",
                "records_processed": summary.records_processed,
                "s3_location": summary.location,
                "timestamp": summary.timestamp,
            })
            .to_string(),
        }
    }

    pub fn failure(err: &ExtractError) -> Self {
        Self {
            status_code: 500,
            body: json!({
                "error": err.to_string(),
                "code": err.code().as_str(),
            })
            .to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }
}
