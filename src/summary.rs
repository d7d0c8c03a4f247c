use serde_json::Value;

use crate::record::LogRecord;

/// Shown when a record carries neither a text nor a structured payload.
pub const UNKNOWN_SUMMARY: &str = "Unable to determine text log";

/// Pick the text to display for a record.
///
/// Preference order: trimmed `textPayload`, the `message` string of the
/// structured payload, the structured payload as it was received, and
/// finally [`UNKNOWN_SUMMARY`]. Never returns an empty string.
pub fn summarize(record: &LogRecord) -> String {
    let text = record.text_payload.trim();
    if !text.is_empty() {
        return text.to_string();
    }

    let Some(raw) = record.structured_payload.as_deref() else {
        return UNKNOWN_SUMMARY.to_string();
    };

    let Ok(payload) = serde_json::from_str::<Value>(raw) else {
        return UNKNOWN_SUMMARY.to_string();
    };

    if let Some(message) = payload.get("message").and_then(Value::as_str)
        && !message.is_empty()
    {
        return message.to_string();
    }

    if raw.trim().is_empty() || payload.is_null() {
        UNKNOWN_SUMMARY.to_string()
    } else {
        raw.to_string()
    }
}
