//! Indirection classifier
//!
//! Decides whether a configuration tree carries secret material that must be
//! resolved server-side. A value needs indirection when any string reachable
//! through sequence elements or mapping values starts with [`SECRET_MARKER`].

use serde_json::Value;

/// Prefix marking a configuration value that must be resolved by the backend
pub const SECRET_MARKER: &str = "secret://";

/// Returns true if `value`, or anything nested inside it, carries the secret marker.
///
/// Mapping keys never take part in the decision. Cyclic trees cannot be
/// represented by [`Value`], so traversal always terminates.
pub fn needs_indirection(value: &Value) -> bool {
    match value {
        Value::String(s) => is_secret_reference(s),
        Value::Array(items) => items.iter().any(needs_indirection),
        Value::Object(map) => map.values().any(needs_indirection),
        Value::Null | Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Returns true if a single string is a secret reference
pub fn is_secret_reference(s: &str) -> bool {
    s.starts_with(SECRET_MARKER)
}
