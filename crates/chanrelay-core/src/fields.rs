//! Typed accessors for envelope payload fields.
//!
//! Schema failures surface as [`RelayError`] values that the connection
//! boundary turns into `cmd:"error"` replies; they never propagate into the
//! shared fan-out.

use serde_json::{Map, Value};

use crate::error::{RelayError, Result};

/// Required string field.
pub fn ensure_str<'a>(data: &'a Map<String, Value>, key: &'static str) -> Result<&'a str> {
    match data.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(RelayError::WrongType {
            field: key,
            expected: "string",
        }),
        None => Err(RelayError::MissingField(key)),
    }
}

/// Optional string field with a default.
pub fn str_or<'a>(data: &'a Map<String, Value>, key: &'static str, default: &'a str) -> &'a str {
    match data.get(key) {
        Some(Value::String(s)) => s,
        _ => default,
    }
}

/// Required integer field.
pub fn ensure_i64(data: &Map<String, Value>, key: &'static str) -> Result<i64> {
    match data.get(key) {
        Some(value) => value.as_i64().ok_or(RelayError::WrongType {
            field: key,
            expected: "integer",
        }),
        None => Err(RelayError::MissingField(key)),
    }
}

/// Required boolean field.
pub fn ensure_bool(data: &Map<String, Value>, key: &'static str) -> Result<bool> {
    match data.get(key) {
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(RelayError::WrongType {
            field: key,
            expected: "boolean",
        }),
        None => Err(RelayError::MissingField(key)),
    }
}

/// Required object field, cloned out of the payload.
pub fn ensure_object(data: &Map<String, Value>, key: &'static str) -> Result<Map<String, Value>> {
    match data.get(key) {
        Some(Value::Object(obj)) => Ok(obj.clone()),
        Some(_) => Err(RelayError::WrongType {
            field: key,
            expected: "object",
        }),
        None => Err(RelayError::MissingField(key)),
    }
}

/// Required array of strings.
pub fn ensure_str_array(data: &Map<String, Value>, key: &'static str) -> Result<Vec<String>> {
    match data.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                _ => Err(RelayError::WrongType {
                    field: key,
                    expected: "array of strings",
                }),
            })
            .collect(),
        Some(_) => Err(RelayError::WrongType {
            field: key,
            expected: "array of strings",
        }),
        None => Err(RelayError::MissingField(key)),
    }
}

/// Required array of objects, cloned out of the payload.
pub fn ensure_objects(
    data: &Map<String, Value>,
    key: &'static str,
) -> Result<Vec<Map<String, Value>>> {
    match data.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::Object(obj) => Ok(obj.clone()),
                _ => Err(RelayError::WrongType {
                    field: key,
                    expected: "array of objects",
                }),
            })
            .collect(),
        Some(_) => Err(RelayError::WrongType {
            field: key,
            expected: "array of objects",
        }),
        None => Err(RelayError::MissingField(key)),
    }
}
