//! Value Extraction
//!
//! Pulls an application value out of a decoded payload using a
//! dot-delimited field path such as `sensor.temperature.value`.
//!
//! Paths address object fields only. Array indices (`items.0`) and
//! wildcards (`*`) are not supported: a path step that lands on an array
//! or a scalar yields no value.

use serde_json::Value;
use std::fmt;

use crate::cache::Message;

/// A parsed dot-delimited field path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a path string. Returns `None` for a blank path, which callers
    /// treat as "the whole decoded value".
    pub fn parse(path: &str) -> Option<Self> {
        let path = path.trim();
        if path.is_empty() {
            return None;
        }

        Some(Self {
            segments: path.split('.').map(|s| s.trim().to_string()).collect(),
        })
    }

    /// Build a path from pre-split segments
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

/// Walk `root` along `path`. Missing fields, nulls and non-object
/// intermediates all resolve to `None`.
pub fn resolve<'a>(root: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    let mut current = root;

    for segment in &path.segments {
        current = current.as_object()?.get(segment)?;
        if current.is_null() {
            return None;
        }
    }

    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// Extract the value addressed by `path` from a message.
///
/// - no message, or no decoded content → `None`
/// - no path → the whole decoded value
/// - otherwise the addressed field, or `None` if any step is missing
pub fn extract(message: Option<&Message>, path: Option<&FieldPath>) -> Option<Value> {
    let decoded = message?.decoded.as_ref()?;

    match path {
        None => Some(decoded.clone()),
        Some(path) => resolve(decoded, path).cloned(),
    }
}

/// Convenience wrapper taking the path as a string
pub fn extract_str(message: Option<&Message>, path: Option<&str>) -> Option<Value> {
    let path = path.and_then(FieldPath::parse);
    extract(message, path.as_ref())
}

/// Extract a numeric sample. Only JSON numbers count; numeric-looking
/// strings are left to a parser expression to convert.
pub fn extract_number(message: Option<&Message>, path: Option<&FieldPath>) -> Option<f64> {
    let decoded = message?.decoded.as_ref()?;

    let value = match path {
        None => decoded,
        Some(path) => resolve(decoded, path)?,
    };

    value.as_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(decoded: Option<Value>) -> Message {
        Message {
            topic: "sensors/t1".to_string(),
            payload: b"{}".to_vec(),
            received_at: 1_700_000_000_000,
            decoded,
            decode_error: None,
        }
    }

    #[test]
    fn test_parse_path() {
        let path = FieldPath::parse("a.b.c").unwrap();
        assert_eq!(path.segments(), &["a", "b", "c"]);
        assert_eq!(path.to_string(), "a.b.c");

        assert!(FieldPath::parse("").is_none());
        assert!(FieldPath::parse("   ").is_none());
    }

    #[test]
    fn test_extract_nested() {
        let msg = message(Some(json!({"a": {"b": {"c": 5}}})));
        assert_eq!(extract_str(Some(&msg), Some("a.b.c")), Some(json!(5)));
    }

    #[test]
    fn test_extract_missing_leaf() {
        let msg = message(Some(json!({"a": {"b": {}}})));
        assert_eq!(extract_str(Some(&msg), Some("a.b.c")), None);
    }

    #[test]
    fn test_extract_null_intermediate() {
        let msg = message(Some(json!({"a": null})));
        assert_eq!(extract_str(Some(&msg), Some("a.b")), None);

        let msg = message(Some(json!({"a": {"b": null}})));
        assert_eq!(extract_str(Some(&msg), Some("a.b")), None);
    }

    #[test]
    fn test_extract_without_path_returns_whole_value() {
        let msg = message(Some(json!({"value": 21.3})));
        assert_eq!(extract(Some(&msg), None), Some(json!({"value": 21.3})));
    }

    #[test]
    fn test_extract_decode_failure() {
        let msg = message(None);
        assert_eq!(extract_str(Some(&msg), Some("value")), None);
        assert_eq!(extract(Some(&msg), None), None);
    }

    #[test]
    fn test_extract_no_message() {
        assert_eq!(extract_str(None, Some("value")), None);
    }

    #[test]
    fn test_array_indices_not_supported() {
        let msg = message(Some(json!({"items": [1, 2, 3]})));
        assert_eq!(extract_str(Some(&msg), Some("items.0")), None);
        assert_eq!(extract_str(Some(&msg), Some("items")), Some(json!([1, 2, 3])));
    }

    #[test]
    fn test_extract_number() {
        let msg = message(Some(json!({"value": 21.3, "label": "21.3"})));
        let value = FieldPath::parse("value");
        let label = FieldPath::parse("label");

        assert_eq!(extract_number(Some(&msg), value.as_ref()), Some(21.3));
        assert_eq!(extract_number(Some(&msg), label.as_ref()), None);

        let scalar = message(Some(json!(42)));
        assert_eq!(extract_number(Some(&scalar), None), Some(42.0));
    }
}
