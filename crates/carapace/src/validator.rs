//! Strict validation of operation requests.
//!
//! A request is a JSON document `{"operations": [...]}`. Each element is
//! checked against a closed schema for its `type`: required fields must be
//! non-empty strings, `write` needs a recognized `mode`, and any field outside
//! the allowed set is rejected. Validation never touches the filesystem.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::operation::{Operation, WriteMode};

/// Errors produced while validating an operation request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The payload is not parseable JSON.
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    /// The payload is not a JSON object.
    #[error("Root must be a JSON object")]
    RootNotObject,
    /// The payload has no `operations` field.
    #[error("Missing 'operations' field")]
    MissingOperations,
    /// The `operations` field is not an array.
    #[error("'operations' must be a list")]
    OperationsNotList,
    /// An element of `operations` is not an object.
    #[error("Operation #{index} must be an object")]
    NotAnObject {
        /// Position in the request.
        index: usize,
    },
    /// An element's `type` is missing or unrecognized.
    #[error("Operation #{index} has invalid type: {found}")]
    InvalidType {
        /// Position in the request.
        index: usize,
        /// The offending value, rendered as JSON.
        found: String,
    },
    /// A required string field is missing, empty, or not a string.
    #[error("Operation #{index} missing or invalid '{field}'")]
    MissingField {
        /// Position in the request.
        index: usize,
        /// Name of the field.
        field: &'static str,
    },
    /// A `write` operation has no `mode`.
    #[error("Operation #{index} missing 'mode'")]
    MissingMode {
        /// Position in the request.
        index: usize,
    },
    /// A `write` operation's `mode` is not one of the recognized values.
    #[error("Operation #{index} has invalid mode: {found}")]
    InvalidMode {
        /// Position in the request.
        index: usize,
        /// The offending value, rendered as JSON.
        found: String,
    },
    /// The element carries fields outside the allowed set for its kind.
    #[error("Operation #{index} has unknown fields: {}", fields.join(", "))]
    UnknownFields {
        /// Position in the request.
        index: usize,
        /// Offending field names, sorted.
        fields: Vec<String>,
    },
}

impl ValidationError {
    /// Index of the offending operation, if the error concerns one.
    pub fn index(&self) -> Option<usize> {
        match self {
            ValidationError::NotAnObject { index }
            | ValidationError::InvalidType { index, .. }
            | ValidationError::MissingField { index, .. }
            | ValidationError::MissingMode { index }
            | ValidationError::InvalidMode { index, .. }
            | ValidationError::UnknownFields { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Field layout of one operation kind.
struct Schema {
    name: &'static str,
    required: &'static [&'static str],
}

const SCHEMAS: &[Schema] = &[
    Schema {
        name: "read",
        required: &["path"],
    },
    Schema {
        name: "write",
        required: &["path", "content"],
    },
    Schema {
        name: "move",
        required: &["src", "dst"],
    },
    Schema {
        name: "copy",
        required: &["src", "dst"],
    },
    Schema {
        name: "mkdir",
        required: &["path"],
    },
    Schema {
        name: "delete",
        required: &["path"],
    },
    Schema {
        name: "zip",
        required: &["path"],
    },
    Schema {
        name: "unzip",
        required: &["path"],
    },
];

impl Schema {
    fn lookup(name: &str) -> Option<&'static Schema> {
        SCHEMAS.iter().find(|s| s.name == name)
    }

    fn allows(&self, field: &str) -> bool {
        field == "type"
            || self.required.contains(&field)
            || (self.name == "write" && field == "mode")
    }
}

/// Parse and validate a request document.
///
/// Returns the operations in request order, or the first error encountered.
pub fn parse_operations(text: &str) -> Result<Vec<Operation>, ValidationError> {
    let payload: Value =
        serde_json::from_str(text).map_err(|e| ValidationError::InvalidJson(e.to_string()))?;
    validate_request(&payload)
}

/// Validate an already-parsed request document.
pub fn validate_request(payload: &Value) -> Result<Vec<Operation>, ValidationError> {
    let object = payload.as_object().ok_or(ValidationError::RootNotObject)?;
    let operations = object
        .get("operations")
        .ok_or(ValidationError::MissingOperations)?;
    let operations = operations
        .as_array()
        .ok_or(ValidationError::OperationsNotList)?;

    operations
        .iter()
        .enumerate()
        .map(|(index, element)| validate_operation(index, element))
        .collect()
}

/// Parse a document that may wrap its operations in a response envelope.
///
/// Accepts `{"operations": [...]}`, `{"response": {"operations": [...]}}`,
/// and `{"response": "<json text with operations>"}`. The extracted array is
/// validated exactly as a plain request would be.
pub fn parse_envelope(text: &str) -> Result<Vec<Operation>, ValidationError> {
    let payload: Value =
        serde_json::from_str(text).map_err(|e| ValidationError::InvalidJson(e.to_string()))?;
    if !payload.is_object() {
        return Err(ValidationError::RootNotObject);
    }
    let operations = extract_operations(&payload).ok_or(ValidationError::MissingOperations)?;
    validate_request(&serde_json::json!({ "operations": operations }))
}

/// Locate an operations array inside a response payload.
pub fn extract_operations(payload: &Value) -> Option<Value> {
    if let Some(ops @ Value::Array(_)) = payload.get("operations") {
        return Some(ops.clone());
    }
    match payload.get("response")? {
        Value::Object(response) => match response.get("operations") {
            Some(ops @ Value::Array(_)) => Some(ops.clone()),
            _ => None,
        },
        Value::String(text) => {
            let inner: Value = serde_json::from_str(text).ok()?;
            match inner.get("operations") {
                Some(ops @ Value::Array(_)) => Some(ops.clone()),
                _ => None,
            }
        }
        _ => None,
    }
}

fn validate_operation(index: usize, element: &Value) -> Result<Operation, ValidationError> {
    let fields = element
        .as_object()
        .ok_or(ValidationError::NotAnObject { index })?;

    let kind = fields.get("type");
    let schema = kind
        .and_then(Value::as_str)
        .and_then(Schema::lookup)
        .ok_or_else(|| ValidationError::InvalidType {
            index,
            found: kind.map_or_else(|| "null".to_string(), Value::to_string),
        })?;

    for field in schema.required {
        require(fields, field, index)?;
    }
    let mode = if schema.name == "write" {
        Some(write_mode(fields, index)?)
    } else {
        None
    };

    let mut unknown: Vec<String> = fields
        .keys()
        .filter(|key| !schema.allows(key))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        unknown.sort();
        return Err(ValidationError::UnknownFields {
            index,
            fields: unknown,
        });
    }

    let text = |field: &'static str| require(fields, field, index).map(str::to_string);
    let operation = match (schema.name, mode) {
        ("read", _) => Operation::Read {
            path: text("path")?,
        },
        ("write", Some(mode)) => Operation::Write {
            path: text("path")?,
            content: text("content")?,
            mode,
        },
        ("move", _) => Operation::Move {
            src: text("src")?,
            dst: text("dst")?,
        },
        ("copy", _) => Operation::Copy {
            src: text("src")?,
            dst: text("dst")?,
        },
        ("mkdir", _) => Operation::Mkdir {
            path: text("path")?,
        },
        ("delete", _) => Operation::Delete {
            path: text("path")?,
        },
        ("zip", _) => Operation::Zip {
            path: text("path")?,
        },
        ("unzip", _) => Operation::Unzip {
            path: text("path")?,
        },
        _ => {
            return Err(ValidationError::InvalidType {
                index,
                found: Value::String(schema.name.to_string()).to_string(),
            });
        }
    };
    Ok(operation)
}

fn require<'a>(
    fields: &'a Map<String, Value>,
    field: &'static str,
    index: usize,
) -> Result<&'a str, ValidationError> {
    match fields.get(field).and_then(Value::as_str) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ValidationError::MissingField { index, field }),
    }
}

fn write_mode(fields: &Map<String, Value>, index: usize) -> Result<WriteMode, ValidationError> {
    let mode = match fields.get("mode") {
        None | Some(Value::Null) => return Err(ValidationError::MissingMode { index }),
        Some(mode) => mode,
    };
    mode.as_str()
        .and_then(WriteMode::from_name)
        .ok_or_else(|| ValidationError::InvalidMode {
            index,
            found: mode.to_string(),
        })
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Result<Vec<Operation>, ValidationError> {
        parse_operations(&value.to_string())
    }

    #[test]
    fn test_parse_valid_operations() {
        let ops = parse(json!({
            "operations": [
                {"type": "read", "path": "docs/readme.txt"},
                {"type": "write", "path": "docs/out.txt", "mode": "overwrite", "content": "hello"},
                {"type": "move", "src": "a.txt", "dst": "b.txt"},
                {"type": "mkdir", "path": "dir"},
            ]
        }))
        .unwrap();

        assert_eq!(ops.len(), 4);
        assert_eq!(
            ops[1],
            Operation::Write {
                path: "docs/out.txt".into(),
                content: "hello".into(),
                mode: WriteMode::Overwrite,
            }
        );
        assert_eq!(
            ops[2],
            Operation::Move {
                src: "a.txt".into(),
                dst: "b.txt".into()
            }
        );
    }

    #[test]
    fn test_all_kinds_accepted() {
        let ops = parse(json!({
            "operations": [
                {"type": "read", "path": "a"},
                {"type": "write", "path": "a", "content": "c", "mode": "create"},
                {"type": "move", "src": "a", "dst": "b"},
                {"type": "copy", "src": "a", "dst": "b"},
                {"type": "mkdir", "path": "a"},
                {"type": "delete", "path": "a"},
                {"type": "zip", "path": "a"},
                {"type": "unzip", "path": "a.zip"},
            ]
        }))
        .unwrap();
        let kinds: Vec<_> = ops.iter().map(Operation::kind).collect();
        assert_eq!(
            kinds,
            ["read", "write", "move", "copy", "mkdir", "delete", "zip", "unzip"]
        );
    }

    #[test]
    fn test_empty_operations_is_empty_batch() {
        assert!(parse(json!({"operations": []})).unwrap().is_empty());
    }

    #[test]
    fn test_reject_invalid_json() {
        let err = parse_operations("not-json").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidJson(_)));
        assert!(err.to_string().starts_with("Invalid JSON"));
    }

    #[test]
    fn test_reject_non_object_root() {
        assert_eq!(parse(json!([1, 2])), Err(ValidationError::RootNotObject));
    }

    #[test]
    fn test_reject_missing_operations() {
        assert_eq!(
            parse(json!({"foo": []})),
            Err(ValidationError::MissingOperations)
        );
    }

    #[test]
    fn test_reject_operations_not_list() {
        assert_eq!(
            parse(json!({"operations": {"type": "read"}})),
            Err(ValidationError::OperationsNotList)
        );
    }

    #[test]
    fn test_reject_non_object_element() {
        let err = parse(json!({"operations": [{"type": "read", "path": "a"}, "read"]})).unwrap_err();
        assert_eq!(err, ValidationError::NotAnObject { index: 1 });
        assert_eq!(err.to_string(), "Operation #1 must be an object");
    }

    #[test]
    fn test_reject_invalid_type() {
        let err = parse(json!({"operations": [{"type": "rm", "path": "x"}]})).unwrap_err();
        assert_eq!(err.to_string(), "Operation #0 has invalid type: \"rm\"");

        let err = parse(json!({"operations": [{"path": "x"}]})).unwrap_err();
        assert_eq!(err.index(), Some(0));
        assert!(matches!(err, ValidationError::InvalidType { .. }));

        let err = parse(json!({"operations": [{"type": 7, "path": "x"}]})).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidType { .. }));
    }

    #[test]
    fn test_reject_missing_path() {
        let err = parse(json!({"operations": [{"type": "read"}]})).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingField {
                index: 0,
                field: "path"
            }
        );
        assert_eq!(err.to_string(), "Operation #0 missing or invalid 'path'");
    }

    #[test]
    fn test_reject_empty_and_wrong_shape_fields() {
        let err = parse(json!({"operations": [{"type": "read", "path": ""}]})).unwrap_err();
        assert!(matches!(err, ValidationError::MissingField { field: "path", .. }));

        let err = parse(json!({"operations": [{"type": "move", "src": "a", "dst": 3}]})).unwrap_err();
        assert!(matches!(err, ValidationError::MissingField { field: "dst", .. }));

        let err = parse(json!({
            "operations": [{"type": "write", "path": "a", "content": "", "mode": "create"}]
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::MissingField {
                field: "content",
                ..
            }
        ));
    }

    #[test]
    fn test_reject_write_without_mode() {
        let err =
            parse(json!({"operations": [{"type": "write", "path": "x", "content": "y"}]})).unwrap_err();
        assert_eq!(err, ValidationError::MissingMode { index: 0 });
    }

    #[test]
    fn test_reject_write_invalid_mode() {
        let err = parse(json!({
            "operations": [{"type": "write", "path": "x", "content": "y", "mode": "truncate"}]
        }))
        .unwrap_err();
        assert_eq!(err.to_string(), "Operation #0 has invalid mode: \"truncate\"");

        let err = parse(json!({
            "operations": [{"type": "write", "path": "x", "content": "y", "mode": 1}]
        }))
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidMode { .. }));
    }

    #[test]
    fn test_reject_unknown_fields() {
        let err = parse(json!({
            "operations": [{"type": "read", "path": "x", "foo": "bar", "mode": "append"}]
        }))
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownFields {
                index: 0,
                fields: vec!["foo".into(), "mode".into()],
            }
        );
        assert_eq!(
            err.to_string(),
            "Operation #0 has unknown fields: foo, mode"
        );
    }

    #[test]
    fn test_reject_fields_of_another_kind() {
        let err = parse(json!({
            "operations": [{"type": "copy", "src": "a", "dst": "b", "path": "c"}]
        }))
        .unwrap_err();
        assert!(matches!(err, ValidationError::UnknownFields { .. }));
    }

    #[test]
    fn test_first_error_wins() {
        let err = parse(json!({
            "operations": [
                {"type": "read", "path": "ok"},
                {"type": "read"},
                {"type": "bogus"},
            ]
        }))
        .unwrap_err();
        assert_eq!(err.index(), Some(1));
    }

    #[test]
    fn test_extra_top_level_fields_are_ignored() {
        let ops = parse(json!({
            "operations": [{"type": "mkdir", "path": "d"}],
            "explanation": "make a directory",
        }))
        .unwrap();
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn test_envelope_shapes() {
        let plain = json!({"operations": [{"type": "mkdir", "path": "d"}]});
        let nested = json!({"response": {"operations": [{"type": "mkdir", "path": "d"}]}});
        let text = json!({"response": plain.to_string()});

        for payload in [&plain, &nested, &text] {
            let ops = parse_envelope(&payload.to_string()).unwrap();
            assert_eq!(ops, vec![Operation::Mkdir { path: "d".into() }]);
        }
    }

    #[test]
    fn test_envelope_without_operations() {
        let err = parse_envelope(&json!({"response": "plain prose"}).to_string()).unwrap_err();
        assert_eq!(err, ValidationError::MissingOperations);
        assert!(extract_operations(&json!({"response": 5})).is_none());
    }

    #[test]
    fn test_envelope_still_validates_elements() {
        let payload = json!({"response": {"operations": [{"type": "read", "path": "a", "x": 1}]}});
        let err = parse_envelope(&payload.to_string()).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownFields { index: 0, .. }));
    }
}
