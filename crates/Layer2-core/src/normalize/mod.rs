//! Response Normalizer - tool output to a uniform envelope
//!
//! Tool servers return text blocks, structured content, embedded JSON,
//! fenced JSON, staged-dataset references, or nothing at all. `transform`
//! reduces every shape to one envelope so downstream consumers branch on
//! `ok` and nothing else. The chain is ordered and first-match-wins;
//! re-normalizing an already-normalized value is the identity.

pub mod detect;
pub mod staging;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tether_foundation::ErrorCode;
use tracing::debug;

pub use staging::StagedData;

/// Structured error inside the envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable code (SCREAMING_SNAKE_CASE)
    pub code: ErrorCode,

    /// Human-readable message
    pub message: String,

    /// Extra context (hints, raw fragments), absent when empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Uniform invocation envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    /// Whether the invocation succeeded
    pub ok: bool,

    /// Payload on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Error on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,

    /// Staged-dataset reference, success only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staged: Option<StagedData>,
}

impl InvocationResult {
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            staged: None,
        }
    }

    pub fn failure(code: ErrorCode, message: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorInfo {
                code,
                message: message.into(),
                details,
            }),
            staged: None,
        }
    }

    pub fn with_staged(mut self, staged: Option<StagedData>) -> Self {
        self.staged = staged;
        self
    }
}

/// Does this value already look like our envelope?
fn is_envelope(value: &Value) -> bool {
    let Some(object) = value.as_object() else {
        return false;
    };
    object.get("ok").map(Value::is_boolean).unwrap_or(false)
        && object
            .keys()
            .all(|k| matches!(k.as_str(), "ok" | "data" | "error" | "staged"))
}

/// Gather all text blocks from an MCP content array
fn collect_text(content: &Value) -> String {
    let Some(items) = content.as_array() else {
        return String::new();
    };

    items
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|item| item.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n")
}

fn fenced_json() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?s)```(?:json)?\s*(\{.*?\}|\[.*?\])\s*```").expect("valid regex")
    })
}

/// Try to pull a JSON document out of free text: the whole text, a fenced
/// block, or a bare top-level object/array substring.
fn extract_embedded_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() || value.is_array() {
            return Some(value);
        }
    }

    if let Some(captures) = fenced_json().captures(text) {
        if let Ok(value) = serde_json::from_str::<Value>(&captures[1]) {
            return Some(value);
        }
    }

    // Bare object spanning the first '{' to the last '}'
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end > start {
        if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
            return Some(value);
        }
    }

    None
}

/// Structured content carrying its own failure flag or error member
fn structured_failure(structured: &Value) -> bool {
    structured.get("success").and_then(Value::as_bool) == Some(false)
        || structured.get("isError").and_then(Value::as_bool) == Some(true)
        || structured.get("error").is_some_and(|e| !e.is_null())
}

/// Build the failure envelope for a detected error text
fn failure_from_text(text: &str, tool_name: &str) -> InvocationResult {
    let code = detect::derive_error_code(text);
    let message = detect::extract_error_message(text);
    let details = detect::hints_as_details(text);

    debug!("tool '{}' returned an error: {} ({})", tool_name, message, code);
    InvocationResult::failure(code, message, details)
}

/// Normalize a raw tools/call result into the uniform envelope.
///
/// The chain, first match wins:
/// 1. Already an envelope - returned unchanged (idempotence)
/// 2. structuredContent present - success, unless it embeds its own
///    failure signal (success:false, isError:true, or a non-null error)
/// 3. Explicit isError flag or error-looking text - failure with derived
///    code, extracted message, and hints
/// 4. Staged-dataset reference in the text - success with `staged`
/// 5. Embedded or fenced JSON in the text - success with that JSON
/// 6. Plain text - success with a `{text, _rawText:true}` wrapper
/// 7. Anything else (no content at all) - success with the raw value
pub fn transform(raw: Value, tool_name: &str) -> InvocationResult {
    // 1. Idempotence
    if is_envelope(&raw) {
        if let Ok(envelope) = serde_json::from_value::<InvocationResult>(raw.clone()) {
            return envelope;
        }
    }

    let is_error = raw.get("isError").and_then(Value::as_bool) == Some(true);
    let text = raw.get("content").map(collect_text).unwrap_or_default();

    // 2. Structured content wins over text heuristics
    if let Some(structured) = raw.get("structuredContent") {
        if !structured.is_null() {
            if is_error || structured_failure(structured) {
                let message = structured
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        if text.is_empty() {
                            format!("Tool '{}' reported a failure", tool_name)
                        } else {
                            detect::extract_error_message(&text)
                        }
                    });
                let code = detect::derive_error_code(&message);
                return InvocationResult::failure(code, message, Some(structured.clone()));
            }
            return InvocationResult::success(structured.clone());
        }
    }

    // 3. Error detection over the joined text blocks
    if !text.is_empty() && detect::detect_error(&text, is_error) {
        return failure_from_text(&text, tool_name);
    }
    if is_error {
        return InvocationResult::failure(
            ErrorCode::UnknownError,
            format!("Tool '{}' reported a failure with no message", tool_name),
            None,
        );
    }

    if !text.is_empty() {
        // 4. Staged large-dataset reference
        if let Some(staged) = staging::detect_staged(&text) {
            debug!(
                "tool '{}' staged {} rows under '{}'",
                tool_name,
                staged.row_count.unwrap_or(0),
                staged.data_access_id
            );
            return InvocationResult::success(json!({ "text": text })).with_staged(Some(staged));
        }

        // 5. Embedded / fenced JSON
        if let Some(embedded) = extract_embedded_json(&text) {
            return InvocationResult::success(embedded);
        }

        // 6. Raw text
        return InvocationResult::success(json!({ "text": text, "_rawText": true }));
    }

    // 7. Nothing recognizable, pass the raw value through
    InvocationResult::success(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_result(text: &str) -> Value {
        json!({ "content": [{ "type": "text", "text": text }] })
    }

    #[test]
    fn test_structured_content_wins() {
        let raw = json!({
            "content": [{ "type": "text", "text": "see structured" }],
            "structuredContent": { "items": [1, 2, 3] }
        });
        let result = transform(raw, "search");
        assert!(result.ok);
        assert_eq!(result.data, Some(json!({ "items": [1, 2, 3] })));
    }

    #[test]
    fn test_structured_content_with_embedded_failure() {
        let raw = json!({
            "structuredContent": { "success": false, "error": "table 'users' not found" }
        });
        let result = transform(raw, "query");
        assert!(!result.ok);
        let error = result.error.unwrap();
        assert_eq!(error.code, ErrorCode::TableNotFound);
        assert_eq!(error.message, "table 'users' not found");
    }

    #[test]
    fn test_structured_content_error_member_is_a_failure() {
        let raw = json!({
            "structuredContent": { "error": "table 'users' not found" }
        });
        let result = transform(raw, "query");
        assert!(!result.ok, "got: {:?}", result);
        let error = result.error.unwrap();
        assert_eq!(error.code, ErrorCode::TableNotFound);
        assert_eq!(error.message, "table 'users' not found");
    }

    #[test]
    fn test_structured_content_null_error_member_is_a_success() {
        let raw = json!({
            "structuredContent": { "items": [1], "error": null }
        });
        let result = transform(raw, "list");
        assert!(result.ok);
    }

    #[test]
    fn test_error_text_maps_to_invalid_arguments() {
        let result = transform(text_result("Error: Invalid arguments"), "search");
        assert!(!result.ok);
        let error = result.error.unwrap();
        assert_eq!(error.code, ErrorCode::InvalidArguments);
        assert_eq!(error.message, "Invalid arguments");
    }

    #[test]
    fn test_is_error_flag_without_message() {
        let raw = json!({ "isError": true, "content": [] });
        let result = transform(raw, "broken");
        assert!(!result.ok);
        assert_eq!(result.error.unwrap().code, ErrorCode::UnknownError);
    }

    #[test]
    fn test_success_glyph_text_is_not_an_error() {
        let result = transform(
            text_result("✅ Done. 2 invalid argument rows were skipped."),
            "import",
        );
        assert!(result.ok);
    }

    #[test]
    fn test_staged_reference_detected() {
        let text = "Large result staged (data_access_id: batch42x). 1,204 rows. \
                    Use SELECT * FROM events.";
        let result = transform(text_result(text), "query");
        assert!(result.ok);
        let staged = result.staged.unwrap();
        assert_eq!(staged.data_access_id, "batch42x");
        assert_eq!(staged.primary_table.as_deref(), Some("events"));
    }

    #[test]
    fn test_embedded_json_extracted() {
        let result = transform(text_result(r#"{"count": 7, "items": []}"#), "list");
        assert!(result.ok);
        assert_eq!(result.data, Some(json!({ "count": 7, "items": [] })));
    }

    #[test]
    fn test_fenced_json_extracted() {
        let text = "Here are the results:\n```json\n{\"total\": 3}\n```\nDone.";
        let result = transform(text_result(text), "list");
        assert!(result.ok);
        assert_eq!(result.data, Some(json!({ "total": 3 })));
    }

    #[test]
    fn test_plain_text_wrapped_with_marker() {
        let result = transform(text_result("three documents found"), "search");
        assert!(result.ok);
        let data = result.data.unwrap();
        assert_eq!(data["text"], "three documents found");
        assert_eq!(data["_rawText"], true);
    }

    #[test]
    fn test_empty_content_passes_raw_value_through() {
        let raw = json!({ "content": [] });
        let result = transform(raw.clone(), "noop");
        assert!(result.ok);
        assert_eq!(result.data, Some(raw));
    }

    #[test]
    fn test_transform_is_idempotent() {
        let first = transform(text_result("Error: Invalid arguments"), "search");
        let as_value = serde_json::to_value(&first).unwrap();
        let second = transform(as_value, "search");
        assert_eq!(first, second);
    }

    #[test]
    fn test_multiple_text_blocks_joined() {
        let raw = json!({
            "content": [
                { "type": "text", "text": "line one" },
                { "type": "text", "text": "line two" }
            ]
        });
        let result = transform(raw, "tool");
        let data = result.data.unwrap();
        assert_eq!(data["text"], "line one\nline two");
    }
}
