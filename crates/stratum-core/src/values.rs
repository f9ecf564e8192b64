//! Values handling with deep merge support

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

/// Values container with deep merge capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    /// Create empty values
    pub fn new() -> Self {
        Self(JsonValue::Object(serde_json::Map::new()))
    }

    /// Parse values from YAML string
    ///
    /// An empty document yields empty values rather than `null`.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Ok(match value {
            JsonValue::Null => Self::new(),
            other => Self(other),
        })
    }

    /// Parse values from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(json)?;
        Ok(Self(value))
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.0)?)
    }

    /// Deep merge another Values into this one
    ///
    /// Rules:
    /// - Scalars: overlay replaces base
    /// - Objects: recursive merge
    /// - Arrays: overlay replaces base (not appended)
    pub fn merge(&mut self, overlay: &Values) {
        deep_merge(&mut self.0, &overlay.0);
    }

    /// Merge multiple values in order
    pub fn merge_all(values: Vec<Values>) -> Self {
        let mut result = Values::new();
        for v in values {
            result.merge(&v);
        }
        result
    }

    /// Set a value by path (e.g., "image.tag", "args[1]", "labels.app\.kubernetes\.io/name")
    pub fn set(&mut self, path: &str, value: JsonValue) -> Result<()> {
        let segments = parse_path(path)?;
        set_nested(&mut self.0, &segments, value);
        Ok(())
    }

    /// Get a value by path
    ///
    /// Malformed paths simply resolve to `None`.
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        let segments = parse_path(path).ok()?;
        get_nested(&self.0, &segments)
    }

    /// Get the inner JSON value
    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    /// Convert to JSON value
    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    /// Check if values are empty
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }

    /// SHA-256 of the canonical (key-sorted) JSON encoding, hex encoded
    pub fn digest(&self) -> String {
        let mut canonical = String::new();
        write_canonical(&self.0, &mut canonical);
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }
}

/// Largest list index a values path may address
pub const MAX_LIST_INDEX: usize = 4096;

/// One step of a values path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Parse a values path into segments
///
/// `.` separates keys, `\.` is a literal dot inside a key and `[n]` indexes a list.
/// Indices above [`MAX_LIST_INDEX`] are rejected.
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>> {
    let invalid = |message: &str| CoreError::InvalidPath {
        path: path.to_string(),
        message: message.to_string(),
    };

    if path.is_empty() {
        return Err(invalid("path is empty"));
    }

    let mut segments = Vec::new();
    let mut key = String::new();
    // true once a key (or index) has been closed and only `.` or `[` may follow
    let mut closed = false;
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => {
                    if closed {
                        return Err(invalid("unexpected character after index"));
                    }
                    key.push(escaped);
                }
                None => return Err(invalid("trailing escape")),
            },
            '.' => {
                if !closed {
                    if key.is_empty() {
                        return Err(invalid("empty key"));
                    }
                    segments.push(PathSegment::Key(std::mem::take(&mut key)));
                }
                closed = false;
                if chars.peek().is_none() {
                    return Err(invalid("path ends with '.'"));
                }
            }
            '[' => {
                if !closed {
                    if key.is_empty() {
                        return Err(invalid("index without a key"));
                    }
                    segments.push(PathSegment::Key(std::mem::take(&mut key)));
                }
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) if d.is_ascii_digit() => digits.push(d),
                        Some(_) => return Err(invalid("index must be a non-negative integer")),
                        None => return Err(invalid("unclosed '['")),
                    }
                }
                let index = digits
                    .parse::<usize>()
                    .ok()
                    .filter(|index| *index <= MAX_LIST_INDEX)
                    .ok_or_else(|| {
                        invalid(&format!("index must be an integer between 0 and {MAX_LIST_INDEX}"))
                    })?;
                segments.push(PathSegment::Index(index));
                closed = true;
            }
            other => {
                if closed {
                    return Err(invalid("unexpected character after index"));
                }
                key.push(other);
            }
        }
    }

    if !closed {
        segments.push(PathSegment::Key(key));
    }

    Ok(segments)
}

/// Deep merge two JSON values
fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

/// Set a nested value, creating objects and lists along the way
fn set_nested(value: &mut JsonValue, path: &[PathSegment], new_value: JsonValue) {
    let Some((head, rest)) = path.split_first() else {
        *value = new_value;
        return;
    };

    match head {
        PathSegment::Key(key) => {
            if !value.is_object() {
                *value = JsonValue::Object(serde_json::Map::new());
            }
            if let JsonValue::Object(map) = value {
                let entry = map.entry(key.clone()).or_insert(JsonValue::Null);
                set_nested(entry, rest, new_value);
            }
        }
        PathSegment::Index(index) => {
            if !value.is_array() {
                *value = JsonValue::Array(Vec::new());
            }
            if let JsonValue::Array(items) = value {
                if items.len() <= *index {
                    items.resize(*index + 1, JsonValue::Null);
                }
                set_nested(&mut items[*index], rest, new_value);
            }
        }
    }
}

/// Get a nested value by path
fn get_nested<'a>(value: &'a JsonValue, path: &[PathSegment]) -> Option<&'a JsonValue> {
    let Some((head, rest)) = path.split_first() else {
        return Some(value);
    };

    match (head, value) {
        (PathSegment::Key(key), JsonValue::Object(map)) => {
            map.get(key).and_then(|v| get_nested(v, rest))
        }
        (PathSegment::Index(index), JsonValue::Array(items)) => {
            items.get(*index).and_then(|v| get_nested(v, rest))
        }
        _ => None,
    }
}

fn write_canonical(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&JsonValue::String((*key).clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(*key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Type a raw `--set` style value
///
/// `true`/`false`/`null`, integers, floats and JSON literals are recognised.
/// Anything else stays a string.
pub fn typed_value(val: &str) -> JsonValue {
    if val == "true" {
        JsonValue::Bool(true)
    } else if val == "false" {
        JsonValue::Bool(false)
    } else if val == "null" {
        JsonValue::Null
    } else if let Ok(num) = val.parse::<i64>() {
        JsonValue::Number(num.into())
    } else if let Ok(num) = val.parse::<f64>() {
        serde_json::Number::from_f64(num)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(val.to_string()))
    } else if val.starts_with('[') || val.starts_with('{') {
        serde_json::from_str(val).unwrap_or_else(|_| JsonValue::String(val.to_string()))
    } else {
        JsonValue::String(val.to_string())
    }
}

/// Parse --set arguments (key=value format)
pub fn parse_set_values(set_args: &[String]) -> Result<Values> {
    let mut values = Values::new();

    for arg in set_args {
        let (key, val) = arg.split_once('=').ok_or_else(|| CoreError::ValuesMerge {
            message: format!("Invalid --set format: '{}'. Expected key=value", arg),
        })?;

        values.set(key, typed_value(val))?;
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deep_merge() {
        let mut base = Values::from_yaml(r#"
image:
  repository: nginx
  tag: "1.0"
replicas: 1
"#).unwrap();

        let overlay = Values::from_yaml(r#"
image:
  tag: "2.0"
  pullPolicy: Always
replicas: 3
"#).unwrap();

        base.merge(&overlay);

        assert_eq!(base.get("image.repository").unwrap(), "nginx");
        assert_eq!(base.get("image.tag").unwrap(), "2.0");
        assert_eq!(base.get("image.pullPolicy").unwrap(), "Always");
        assert_eq!(base.get("replicas").unwrap(), 3);
    }

    #[test]
    fn test_merge_replaces_lists() {
        let mut base = Values::from_yaml("hosts: [a, b, c]\n").unwrap();
        let overlay = Values::from_yaml("hosts: [z]\n").unwrap();

        base.merge(&overlay);

        assert_eq!(base.get("hosts").unwrap(), &serde_json::json!(["z"]));
    }

    #[test]
    fn test_set_nested() {
        let mut values = Values::new();
        values.set("image.tag", JsonValue::String("v1".into())).unwrap();
        values.set("replicas", JsonValue::Number(3.into())).unwrap();

        assert_eq!(values.get("image.tag").unwrap(), "v1");
        assert_eq!(values.get("replicas").unwrap(), 3);
    }

    #[test]
    fn test_set_indexed() {
        let mut values = Values::new();
        values.set("args[1]", "y".into()).unwrap();
        values.set("args[0]", "x".into()).unwrap();
        values.set("ports[0].name", "http".into()).unwrap();

        assert_eq!(values.get("args").unwrap(), &serde_json::json!(["x", "y"]));
        assert_eq!(values.get("args[1]").unwrap(), "y");
        assert_eq!(values.get("ports[0].name").unwrap(), "http");
    }

    #[test]
    fn test_escaped_dots() {
        let mut values = Values::new();
        values
            .set(r"podLabels.app\.kubernetes\.io/name", "web".into())
            .unwrap();

        let labels = values.get("podLabels").unwrap();
        assert_eq!(labels["app.kubernetes.io/name"], "web");
        assert_eq!(
            values.get(r"podLabels.app\.kubernetes\.io/name").unwrap(),
            "web"
        );
    }

    #[test]
    fn test_parse_path_errors() {
        assert!(parse_path("").is_err());
        assert!(parse_path("a..b").is_err());
        assert!(parse_path("a.").is_err());
        assert!(parse_path("a[x]").is_err());
        assert!(parse_path("a[0").is_err());
        assert!(parse_path("[0]").is_err());
        assert!(parse_path("a[0]b").is_err());
    }

    #[test]
    fn test_oversized_index_is_rejected() {
        let mut values = Values::new();
        let err = values
            .set("name[18446744073709551615]", "x".into())
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidPath { .. }));

        let err = values.set("name[99999999999999999999999]", "x".into()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPath { .. }));

        assert!(values.set(&format!("name[{}]", MAX_LIST_INDEX + 1), "x".into()).is_err());
        assert!(values.is_empty());
        assert!(values.get("name[18446744073709551615]").is_none());

        values.set(&format!("name[{MAX_LIST_INDEX}]"), "x".into()).unwrap();
        assert_eq!(values.get("name").unwrap().as_array().unwrap().len(), MAX_LIST_INDEX + 1);
    }

    #[test]
    fn test_parse_path_segments() {
        let segments = parse_path("a.b[2][0].c").unwrap();
        assert_eq!(
            segments,
            vec![
                PathSegment::Key("a".into()),
                PathSegment::Key("b".into()),
                PathSegment::Index(2),
                PathSegment::Index(0),
                PathSegment::Key("c".into()),
            ]
        );
    }

    #[test]
    fn test_parse_set_values() {
        let args = vec![
            "image.tag=v2".to_string(),
            "replicas=5".to_string(),
            "debug=true".to_string(),
        ];

        let values = parse_set_values(&args).unwrap();

        assert_eq!(values.get("image.tag").unwrap(), "v2");
        assert_eq!(values.get("replicas").unwrap(), 5);
        assert_eq!(values.get("debug").unwrap(), true);
    }

    #[test]
    fn test_parse_set_values_rejects_missing_equals() {
        let err = parse_set_values(&["novalue".to_string()]).unwrap_err();
        assert!(err.to_string().contains("Expected key=value"));
    }

    #[test]
    fn test_empty_yaml_is_empty_values() {
        let values = Values::from_yaml("").unwrap();
        assert!(values.is_empty());
        assert_eq!(values, Values::new());
    }

    #[test]
    fn test_digest_ignores_key_order() {
        let a = Values::from_json(r#"{"a":1,"b":{"c":[1,2],"d":"x"}}"#).unwrap();
        let b = Values::from_json(r#"{"b":{"d":"x","c":[1,2]},"a":1}"#).unwrap();
        let c = Values::from_json(r#"{"a":2,"b":{"c":[1,2],"d":"x"}}"#).unwrap();

        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.digest().len(), 64);
    }
}
