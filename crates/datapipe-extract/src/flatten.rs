//! Flattening of nested API objects into single-level records
//!
//! Every scalar leaf of the input becomes one field. The field name is the
//! path to the leaf, lowercased and joined with `_`; array elements use their
//! index as the path segment. Aliases rename specific paths, e.g. the users
//! API's `address.geo.lat` is stored as `address_lat`.
//!
//! ```text
//! {"id": 1, "address": {"city": "Gwenborough", "geo": {"lat": "-37.3159"}}}
//!   -> {"id": 1, "address_city": "Gwenborough", "address_lat": "-37.3159"}
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::warn;

use crate::error::{ExtractError, Result};
use crate::record::{FieldValue, Record, EXTRACTION_TIMESTAMP_FIELD};

const SEPARATOR: &str = "_";

/// Naming rules applied while flattening
#[derive(Debug, Clone)]
pub struct FlattenRules {
    aliases: Vec<(Vec<String>, String)>,
}

impl FlattenRules {
    /// Rules without any aliases
    pub fn plain() -> Self {
        Self { aliases: Vec::new() }
    }

    /// Map a dotted input path (`address.geo.lat`) to a fixed output key.
    pub fn with_alias(mut self, dotted_path: &str, key: impl Into<String>) -> Self {
        let path = dotted_path
            .split('.')
            .map(|segment| segment.to_string())
            .collect();
        self.aliases.push((path, key.into()));
        self
    }

    /// Output key for a path of input segments
    pub fn key_for(&self, path: &[String]) -> String {
        if let Some((_, key)) = self.aliases.iter().find(|(alias, _)| alias == path) {
            return key.clone();
        }
        path.iter()
            .map(|segment| segment.to_lowercase())
            .collect::<Vec<_>>()
            .join(SEPARATOR)
    }
}

impl Default for FlattenRules {
    /// Rules for the users API: coordinates are stored next to the address.
    fn default() -> Self {
        Self::plain()
            .with_alias("address.geo.lat", "address_lat")
            .with_alias("address.geo.lng", "address_lng")
    }
}

/// Flatten one JSON object into a record.
///
/// The root must be an object. Empty nested objects and arrays contribute no
/// fields. When two paths map to the same key the first one wins.
pub fn flatten_value(value: &Value, rules: &FlattenRules) -> Result<Record> {
    let Value::Object(_) = value else {
        return Err(ExtractError::invalid_payload(format!(
            "expected a JSON object, got {}",
            value_kind(value)
        )));
    };

    let mut record = Record::new();
    let mut path = Vec::new();
    walk(value, &mut path, rules, &mut record);
    Ok(record)
}

fn walk(value: &Value, path: &mut Vec<String>, rules: &FlattenRules, record: &mut Record) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                path.push(key.clone());
                walk(child, path, rules, record);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                path.push(index.to_string());
                walk(child, path, rules, record);
                path.pop();
            }
        }
        scalar => {
            let key = rules.key_for(path);
            // from_scalar only fails for containers, handled above
            if let Some(field) = FieldValue::from_scalar(scalar) {
                if !record.insert(key.clone(), field) {
                    warn!(
                        key = %key,
                        path = %path.join("."),
                        "duplicate flattened key; keeping the first value"
                    );
                }
            }
        }
    }
}

/// Flatten every element of an API response and stamp the extraction time.
///
/// The output has exactly one record per input element.
pub fn flatten_all(
    values: &[Value],
    rules: &FlattenRules,
    extracted_at: DateTime<Utc>,
) -> Result<Vec<Record>> {
    let timestamp = format_timestamp(extracted_at);

    values
        .iter()
        .enumerate()
        .map(|(index, value)| {
            let mut record = flatten_value(value, rules).map_err(|err| match err {
                ExtractError::InvalidPayload { message, .. } => {
                    ExtractError::invalid_payload(format!("element {}: {}", index, message))
                }
                other => other,
            })?;
            record.set(EXTRACTION_TIMESTAMP_FIELD, FieldValue::String(timestamp.clone()));
            Ok(record)
        })
        .collect()
}

/// RFC 3339 UTC with microsecond precision, e.g. `2024-01-15T01:00:00.000000Z`
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample_user() -> Value {
        json!({
            "id": 1,
            "name": "Leanne Graham",
            "username": "Bret",
            "email": "Sincere@april.biz",
            "address": {
                "street": "Kulas Light",
                "suite": "Apt. 556",
                "city": "Gwenborough",
                "zipcode": "92998-3874",
                "geo": { "lat": "-37.3159", "lng": "81.1496" }
            },
            "phone": "1-770-736-8031 x56442",
            "website": "hildegard.org",
            "company": {
                "name": "Romaguera-Crona",
                "catchPhrase": "Multi-layered client-server neural-net",
                "bs": "harness real-time e-markets"
            }
        })
    }

    #[test]
    fn flattens_users_shape() {
        let record = flatten_value(&sample_user(), &FlattenRules::default()).unwrap();

        assert_eq!(record.get("id"), Some(&FieldValue::Number(1.into())));
        assert_eq!(
            record.get("address_city").and_then(FieldValue::as_str),
            Some("Gwenborough")
        );
        assert_eq!(
            record.get("address_lat").and_then(FieldValue::as_str),
            Some("-37.3159")
        );
        assert_eq!(
            record.get("address_lng").and_then(FieldValue::as_str),
            Some("81.1496")
        );
        assert_eq!(
            record.get("company_catchphrase").and_then(FieldValue::as_str),
            Some("Multi-layered client-server neural-net")
        );
        assert!(record.get("address_geo_lat").is_none());
        assert_eq!(record.len(), 15);
    }

    #[test]
    fn no_nested_structure_remains() {
        let value = json!({
            "a": {"b": {"c": {"d": 1}}},
            "tags": ["x", {"y": true}],
            "empty": {},
            "none": []
        });
        let record = flatten_value(&value, &FlattenRules::plain()).unwrap();

        let encoded: Value = serde_json::to_value(&record).unwrap();
        let object = encoded.as_object().unwrap();
        assert!(object.values().all(|v| !v.is_object() && !v.is_array()));
        assert_eq!(record.get("a_b_c_d"), Some(&FieldValue::Number(1.into())));
        assert_eq!(record.get("tags_0").and_then(FieldValue::as_str), Some("x"));
        assert_eq!(record.get("tags_1_y"), Some(&FieldValue::Bool(true)));
        assert!(record.get("empty").is_none());
        assert!(record.get("none").is_none());
    }

    #[test]
    fn key_naming_is_deterministic() {
        let rules = FlattenRules::default();
        let first = flatten_value(&sample_user(), &rules).unwrap();
        let second = flatten_value(&sample_user(), &rules).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn duplicate_keys_keep_first_value() {
        // "A_b" lowercases to the same key as the nested path a.b
        let value = json!({"a": {"b": 1}, "a_B": 2});
        let record = flatten_value(&value, &FlattenRules::plain()).unwrap();
        assert_eq!(record.len(), 1);
        assert_eq!(record.get("a_b"), Some(&FieldValue::Number(1.into())));
    }

    #[test]
    fn rejects_non_object_root() {
        let err = flatten_value(&json!([1, 2]), &FlattenRules::default()).unwrap_err();
        assert!(err.to_string().contains("expected a JSON object, got an array"));
    }

    #[test]
    fn flatten_all_stamps_every_record() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 1, 0, 0).unwrap();
        let values = vec![sample_user(), json!({"id": 2}), json!({})];
        let records = flatten_all(&values, &FlattenRules::default(), at).unwrap();

        assert_eq!(records.len(), values.len());
        for record in &records {
            assert_eq!(
                record.get(EXTRACTION_TIMESTAMP_FIELD).and_then(FieldValue::as_str),
                Some("2024-01-15T01:00:00.000000Z")
            );
        }
    }

    #[test]
    fn flatten_all_replaces_input_timestamp_field() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 1, 0, 0).unwrap();
        let values = vec![json!({"extraction_timestamp": null, "id": 3})];
        let records = flatten_all(&values, &FlattenRules::default(), at).unwrap();
        let stamp = records[0].get(EXTRACTION_TIMESTAMP_FIELD).unwrap();
        assert!(!stamp.is_null());
    }

    #[test]
    fn flatten_all_reports_failing_element() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 1, 0, 0).unwrap();
        let values = vec![json!({"id": 1}), json!("oops")];
        let err = flatten_all(&values, &FlattenRules::default(), at).unwrap_err();
        assert!(err.to_string().contains("element 1"));
    }
}
