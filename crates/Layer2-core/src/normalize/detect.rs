//! Free-text error detection and extraction
//!
//! Tool servers report failures in wildly different shapes: explicit
//! flags, "Error: ..." prefixes, emoji glyphs, embedded validation JSON.
//! Each heuristic here is a pure function so it stays testable in
//! isolation; `transform` composes them first-match-wins.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tether_foundation::ErrorCode;

/// Glyphs that mark a successful, informational response. These take
/// precedence: a message starting with one is never an error even when it
/// contains warning-like language further in.
const SUCCESS_GLYPHS: &[&str] = &["✅", "✓", "✔", "🎉"];

/// Glyphs that mark a failed response
const FAILURE_GLYPHS: &[&str] = &["❌", "✗", "✘", "🚫", "⛔"];

/// Failure phrases checked against lowercased text
const FAILURE_PHRASES: &[&str] = &[
    "error:",
    "failed:",
    "failure:",
    "exception:",
    "fatal:",
    "permission denied",
    "access denied",
    "unauthorized",
    "unable to",
    "could not be",
    "validation error",
    "validation failed",
    "invalid arguments",
    "invalid argument",
    "invalid params",
    "missing required",
];

fn jsonrpc_error_code() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // JSON-RPC reserved error range surfacing in text (-32700..-32000)
    RE.get_or_init(|| Regex::new(r"-32[0-7]\d\d\b").expect("valid regex"))
}

fn error_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^\W*(?:error|failed|failure)\s*:\s*(.+)$").expect("valid regex"))
}

fn validation_path() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // zod-style fragments: "path":["query"], optionally with "expected":"string"
    RE.get_or_init(|| Regex::new(r#""path"\s*:\s*\[\s*"([^"]+)""#).expect("valid regex"))
}

fn validation_expected() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""expected"\s*:\s*"([^"]+)""#).expect("valid regex"))
}

fn unknown_parameter() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(?:unknown|unrecognized|unexpected)\s+(?:parameter|argument|field|key)s?\s*[:'"]?\s*['"]?([A-Za-z0-9_]+)"#)
            .expect("valid regex")
    })
}

/// Common wrong-name -> expected-name corrections for tool parameters
const PARAMETER_SYNONYMS: &[(&str, &str)] = &[
    ("filepath", "path"),
    ("file_path", "path"),
    ("filename", "path"),
    ("file", "path"),
    ("dir", "directory"),
    ("folder", "directory"),
    ("q", "query"),
    ("search", "query"),
    ("search_term", "query"),
    ("max", "limit"),
    ("max_results", "limit"),
    ("count", "limit"),
    ("id", "identifier"),
];

/// Decide whether a text block represents an error.
///
/// Success glyphs win over everything except an explicit error flag:
/// informational messages may legitimately contain warning-like language.
pub fn detect_error(text: &str, explicit_flag: bool) -> bool {
    if explicit_flag {
        return true;
    }

    let trimmed = text.trim_start();

    for glyph in SUCCESS_GLYPHS {
        if trimmed.starts_with(glyph) {
            return false;
        }
    }

    for glyph in FAILURE_GLYPHS {
        if trimmed.starts_with(glyph) {
            return true;
        }
    }

    let lower = text.to_lowercase();
    if FAILURE_PHRASES.iter().any(|p| lower.contains(p)) {
        return true;
    }

    jsonrpc_error_code().is_match(text)
}

/// Derive a machine-readable code from known error substrings
pub fn derive_error_code(text: &str) -> ErrorCode {
    let lower = text.to_lowercase();

    let missing_entity = lower.contains("not found")
        || lower.contains("does not exist")
        || lower.contains("no such");

    if lower.contains("table") && missing_entity {
        return ErrorCode::TableNotFound;
    }
    if lower.contains("invalid argument")
        || lower.contains("invalid params")
        || lower.contains("invalid_type")
        || text.contains("-32602")
    {
        return ErrorCode::InvalidArguments;
    }
    if lower.contains("timeout") || lower.contains("timed out") || lower.contains("deadline") {
        return ErrorCode::Timeout;
    }
    if lower.contains("missing required")
        || lower.contains("required parameter")
        || lower.contains("is required")
    {
        return ErrorCode::MissingRequiredParam;
    }
    if missing_entity {
        return ErrorCode::NotFound;
    }

    ErrorCode::UnknownError
}

/// Maximum message length before truncation
const MAX_MESSAGE_LEN: usize = 200;

/// Best-effort error message extraction: prefer a structured
/// "Error:"/"Failed:" capture, else the whole text when short, else a
/// truncated prefix.
pub fn extract_error_message(text: &str) -> String {
    if let Some(captures) = error_prefix().captures(text) {
        return captures[1].trim().to_string();
    }

    let trimmed = text.trim();
    if trimmed.len() <= MAX_MESSAGE_LEN {
        return trimmed.to_string();
    }

    let mut end = MAX_MESSAGE_LEN;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

/// Human-readable hints parsed from validation-error fragments, so an
/// automated caller can self-correct without a human in the loop
pub fn extract_hints(text: &str) -> Vec<String> {
    let mut hints = Vec::new();

    if let Some(path) = validation_path().captures(text) {
        let param = path[1].to_string();
        let hint = match validation_expected().captures(text) {
            Some(expected) => format!(
                "Parameter '{}' is missing or has the wrong type (expected {})",
                param, &expected[1]
            ),
            None => format!("Parameter '{}' is missing or invalid", param),
        };
        hints.push(hint);
    }

    if let Some(captures) = unknown_parameter().captures(text) {
        let wrong = captures[1].to_lowercase();
        if let Some((_, correct)) = PARAMETER_SYNONYMS.iter().find(|(k, _)| *k == wrong) {
            hints.push(format!("Did you mean '{}' instead of '{}'?", correct, wrong));
        }
    }

    hints
}

/// Hints as a details payload, None when nothing was extracted
pub fn hints_as_details(text: &str) -> Option<Value> {
    let hints = extract_hints(text);
    if hints.is_empty() {
        None
    } else {
        Some(serde_json::json!({ "hints": hints }))
    }
}
