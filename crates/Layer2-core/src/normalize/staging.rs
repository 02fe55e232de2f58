//! Staged large-dataset detection
//!
//! Some tools return a handle to a staged result set instead of inlining
//! the data, as free text ("Results staged under data_access_id ...;
//! query with SELECT * FROM orders"). These regex heuristics extract the
//! handle, the referenced SQL tables, and optional row count / payload
//! size. There is no formal schema for this output; patterns live here so
//! a future structured-content convention replaces one module.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Parsed staged-dataset reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedData {
    /// Handle for the follow-up query call
    #[serde(rename = "dataAccessId")]
    pub data_access_id: String,

    /// SQL tables inferred from the response text (deduplicated)
    pub tables: Vec<String>,

    /// First referenced table, the default target for follow-up queries
    #[serde(rename = "primaryTable", skip_serializing_if = "Option::is_none")]
    pub primary_table: Option<String>,

    /// Row count when the text mentions one
    #[serde(rename = "rowCount", skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,

    /// Payload size as written in the text (e.g. "2.4 MB")
    #[serde(rename = "payloadSize", skip_serializing_if = "Option::is_none")]
    pub payload_size: Option<String>,
}

fn access_id_labeled() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)data[_\s-]?access[_\s-]?id["'\s:=]+([A-Za-z0-9][A-Za-z0-9_-]{3,})"#)
            .expect("valid regex")
    })
}

fn access_id_bare() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(data_access_[A-Za-z0-9][A-Za-z0-9_-]{3,})\b").expect("valid regex")
    })
}

fn from_clause() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Dotted names allowed (schema.table), but a dot needs a following
        // identifier so a sentence period is never swallowed
        Regex::new(r"(?i)\bFROM\s+([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)").expect("valid regex")
    })
}

fn row_count() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d[\d,]*)\s+rows?\b").expect("valid regex"))
}

fn payload_size() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(bytes|kb|mb|gb)\b").expect("valid regex")
    })
}

/// SQL keywords that can follow FROM in compound statements but are never
/// table names
const SQL_KEYWORDS: &[&str] = &[
    "select", "where", "table", "join", "inner", "outer", "left", "right", "on", "group",
    "order", "by", "limit", "offset", "union", "as", "distinct", "having",
];

/// Extract the staged data-access id, if any
pub fn detect_access_id(text: &str) -> Option<String> {
    if let Some(captures) = access_id_labeled().captures(text) {
        return Some(captures[1].to_string());
    }
    if let Some(captures) = access_id_bare().captures(text) {
        return Some(captures[1].to_string());
    }
    None
}

/// Scan `FROM <identifier>` occurrences, excluding SQL keywords,
/// deduplicated in order of first appearance
pub fn extract_tables(text: &str) -> Vec<String> {
    let mut tables = Vec::new();

    for captures in from_clause().captures_iter(text) {
        let table = captures[1].to_string();
        if SQL_KEYWORDS.contains(&table.to_lowercase().as_str()) {
            continue;
        }
        if !tables.contains(&table) {
            tables.push(table);
        }
    }

    tables
}

/// Extract a row count ("1,204 rows")
pub fn extract_row_count(text: &str) -> Option<u64> {
    let captures = row_count().captures(text)?;
    captures[1].replace(',', "").parse().ok()
}

/// Extract a payload size ("2.4 MB")
pub fn extract_payload_size(text: &str) -> Option<String> {
    let captures = payload_size().captures(text)?;
    Some(format!("{} {}", &captures[1], captures[2].to_uppercase()))
}

/// Full staged-reference detection: only fires when an access id is present
pub fn detect_staged(text: &str) -> Option<StagedData> {
    let data_access_id = detect_access_id(text)?;
    let tables = extract_tables(text);
    let primary_table = tables.first().cloned();

    Some(StagedData {
        data_access_id,
        tables,
        primary_table,
        row_count: extract_row_count(text),
        payload_size: extract_payload_size(text),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_access_id_labeled() {
        let text = "Results staged. dataAccessId: da_9f3k2m1x. Query to retrieve.";
        assert_eq!(detect_access_id(text).as_deref(), Some("da_9f3k2m1x"));
    }

    #[test]
    fn test_detect_access_id_bare() {
        let text = "Stored under data_access_20240811_abc123 for follow-up queries.";
        assert_eq!(
            detect_access_id(text).as_deref(),
            Some("data_access_20240811_abc123")
        );
    }

    #[test]
    fn test_extract_tables_dedup_and_keywords() {
        let text = "Query with SELECT * FROM orders WHERE x, or SELECT id FROM customers \
                    JOIN orders, also SELECT * FROM orders again. Avoid FROM select.";
        let tables = extract_tables(text);
        assert_eq!(tables, vec!["orders".to_string(), "customers".to_string()]);
    }

    #[test]
    fn test_staged_with_two_from_clauses() {
        let text = "Large result staged (data_access_id: batch42x). 1,204 rows, 2.4 MB. \
                    Use SELECT * FROM events or SELECT * FROM sessions.";
        let staged = detect_staged(text).unwrap();
        assert_eq!(staged.data_access_id, "batch42x");
        assert_eq!(staged.tables, vec!["events".to_string(), "sessions".to_string()]);
        assert_eq!(staged.primary_table.as_deref(), Some("events"));
        assert_eq!(staged.row_count, Some(1204));
        assert_eq!(staged.payload_size.as_deref(), Some("2.4 MB"));
    }

    #[test]
    fn test_sentence_period_not_part_of_table_name() {
        let tables = extract_tables("Retrieve with SELECT * FROM sessions. Then aggregate.");
        assert_eq!(tables, vec!["sessions".to_string()]);
        // A keyword stays excluded even when a period follows it
        assert!(extract_tables("Never write FROM select.").is_empty());
    }

    #[test]
    fn test_dotted_table_name_kept_whole() {
        let tables = extract_tables("SELECT * FROM analytics.events LIMIT 10");
        assert_eq!(tables, vec!["analytics.events".to_string()]);
    }

    #[test]
    fn test_no_access_id_means_no_staging() {
        let text = "SELECT * FROM orders returned 3 rows";
        assert!(detect_staged(text).is_none());
    }
}
