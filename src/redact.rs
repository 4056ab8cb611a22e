//! Secret scrubbing for outbound payloads.
//!
//! Values under keys that look credential-bearing are replaced with a
//! mask before a result leaves the gateway. Matching is by key name only;
//! the values themselves are never inspected.

use serde_json::Value;

const SECRET_KEY_MARKERS: &[&str] = &["password", "token", "secret", "key", "credential"];
const MASK: &str = "***";

/// Recursively mask values whose key names suggest secret material.
pub fn redact_secrets(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    let lower = key.to_ascii_lowercase();
                    if SECRET_KEY_MARKERS.iter().any(|m| lower.contains(m)) {
                        (key, Value::String(MASK.to_string()))
                    } else {
                        (key, redact_secrets(value))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact_secrets).collect()),
        value => value,
    }
}
