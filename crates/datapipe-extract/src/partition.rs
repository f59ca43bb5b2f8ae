//! Partition path generation for date-based organization
//!
//! Generates Hive-style partition paths the crawler turns into partition columns:
//! {prefix}/year={year}/month={month}/day={day}/{file_name}

use chrono::{DateTime, Datelike, Utc};

/// Generate the object key for a day's extract
///
/// Format: `{prefix}/year=YYYY/month=MM/day=DD/{file_name}`
///
/// The file name is fixed per day so that re-running an extract on the same
/// date overwrites the object instead of adding a second one.
pub fn partition_path(prefix: &str, at: DateTime<Utc>, file_name: &str) -> String {
    format!(
        "{}/year={}/month={:02}/day={:02}/{}",
        prefix.trim_matches('/'),
        at.year(),
        at.month(),
        at.day(),
        sanitize_file_name(file_name)
    )
}

/// Replace characters that would change the key layout
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_partition_path() {
        let at = Utc.with_ymd_and_hms(2024, 1, 5, 14, 30, 0).unwrap();
        assert_eq!(
            partition_path("raw-data", at, "users.json"),
            "raw-data/year=2024/month=01/day=05/users.json"
        );
    }

    #[test]
    fn same_day_same_path() {
        let morning = Utc.with_ymd_and_hms(2024, 11, 30, 1, 0, 0).unwrap();
        let night = Utc.with_ymd_and_hms(2024, 11, 30, 23, 59, 59).unwrap();
        assert_eq!(
            partition_path("raw-data", morning, "users.json"),
            partition_path("raw-data", night, "users.json")
        );
    }

    #[test]
    fn prefix_slashes_are_trimmed() {
        let at = Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap();
        assert_eq!(
            partition_path("/landing/", at, "users.json"),
            "landing/year=2024/month=12/day=31/users.json"
        );
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("users.json"), "users.json");
        assert_eq!(sanitize_file_name("a/b.json"), "a_b.json");
        assert_eq!(sanitize_file_name("my users.json"), "my_users.json");
    }
}
