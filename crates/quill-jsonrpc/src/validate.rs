//! Strict envelope validation.
//!
//! Validation is hand-rolled over a raw [`Value`] instead of derived
//! deserialization so that every failure yields a [`FieldError`] with a
//! location path into the offending document, and so that all failures in
//! one envelope are reported together.

use serde_json::{Map, Value};

use crate::error::FieldError;
use crate::request::JsonRpcRequest;
use crate::types::{JsonRpcVersion, RequestId};
use crate::JSONRPC_VERSION;

const ENVELOPE_FIELDS: [&str; 4] = ["jsonrpc", "id", "method", "params"];

/// Validate one raw body item against the JSON-RPC request envelope.
///
/// Rules: the item must be an object with no extra top-level fields,
/// `jsonrpc` must equal the literal `"2.0"`, `method` must be a string,
/// `id` (when present) must be a string or integer, and `params` (when
/// present) must be an object.
pub fn validate_envelope(raw: &Value) -> Result<JsonRpcRequest, Vec<FieldError>> {
    let Some(obj) = raw.as_object() else {
        return Err(vec![FieldError::not_an_object(Vec::<String>::new())]);
    };

    let mut errors = Vec::new();

    for key in obj.keys() {
        if !ENVELOPE_FIELDS.contains(&key.as_str()) {
            errors.push(FieldError::new(
                [key.clone()],
                "extra fields not permitted",
                "value_error.extra",
            ));
        }
    }

    match obj.get("jsonrpc") {
        None => errors.push(FieldError::missing(["jsonrpc"])),
        Some(Value::String(s)) if s == JSONRPC_VERSION => {}
        Some(Value::String(_)) => errors.push(FieldError::new(
            ["jsonrpc"],
            format!("unexpected value; permitted: '{}'", JSONRPC_VERSION),
            "value_error.const",
        )),
        Some(_) => errors.push(FieldError::new(
            ["jsonrpc"],
            "str type expected",
            "type_error.str",
        )),
    }

    let id = match obj.get("id") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(RequestId::String(s.clone())),
        Some(Value::Number(n)) if n.is_i64() => n.as_i64().map(RequestId::Number),
        Some(_) => {
            // the id member admits a string or an integer; report both
            // rejected union members
            errors.push(FieldError::new(["id"], "str type expected", "type_error.str"));
            errors.push(FieldError::new(
                ["id"],
                "value is not a valid integer",
                "type_error.integer",
            ));
            None
        }
    };

    let method = match obj.get("method") {
        None => {
            errors.push(FieldError::missing(["method"]));
            String::new()
        }
        Some(Value::String(s)) => s.clone(),
        Some(_) => {
            errors.push(FieldError::new(
                ["method"],
                "str type expected",
                "type_error.str",
            ));
            String::new()
        }
    };

    let params = match obj.get("params") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            errors.push(FieldError::not_an_object(["params"]));
            Map::new()
        }
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(JsonRpcRequest {
        version: JsonRpcVersion::V2_0,
        id,
        method,
        params,
    })
}
