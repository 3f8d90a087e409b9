//! Payload template validation.
//!
//! A contract's template maps payload field names to specs:
//!
//! ```json
//! { "amount": { "type": "int" }, "memo": { "type": "str?" } }
//! ```
//!
//! Supported types: `str`, `int`, `bool`, `hash`, `json`, `addr`. A
//! trailing `?` marks the field optional. Payloads must not carry keys the
//! template does not name; a contract cannot be handed data it never asked
//! for.

use serde_json::{Map, Value};
use shared_crypto::address::verify_address;

/// Field types a template may require.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FieldType {
    Str,
    Int,
    Bool,
    Hash,
    Json,
    Addr,
}

fn parse_field_type(s: &str) -> Option<(FieldType, bool)> {
    let (name, optional) = match s.strip_suffix('?') {
        Some(name) => (name, true),
        None => (s, false),
    };
    let field_type = match name {
        "str" => FieldType::Str,
        "int" => FieldType::Int,
        "bool" => FieldType::Bool,
        "hash" => FieldType::Hash,
        "json" => FieldType::Json,
        "addr" => FieldType::Addr,
        _ => return None,
    };
    Some((field_type, optional))
}

fn check_value(field: &str, field_type: FieldType, value: &Value) -> Result<(), String> {
    let ok = match field_type {
        FieldType::Str => value.is_string(),
        FieldType::Int => value.as_i64().is_some(),
        FieldType::Bool => value.is_boolean(),
        FieldType::Hash => value
            .as_str()
            .map(|s| s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()))
            .unwrap_or(false),
        FieldType::Json => true,
        FieldType::Addr => value
            .as_str()
            .map(|s| verify_address(s).is_ok())
            .unwrap_or(false),
    };
    if ok {
        Ok(())
    } else {
        Err(format!("field '{field}' does not match type {field_type:?}"))
    }
}

/// Check that a template itself is well-formed, for create-contract
/// payloads.
pub fn validate_template_spec(template: &Value) -> Result<(), String> {
    let map = template
        .as_object()
        .ok_or_else(|| "template must be a JSON object".to_string())?;
    for (field, spec) in map {
        let type_name = spec
            .as_object()
            .and_then(|s| s.get("type"))
            .and_then(Value::as_str)
            .ok_or_else(|| format!("field '{field}' is missing a type"))?;
        parse_field_type(type_name)
            .ok_or_else(|| format!("field '{field}' has unknown type '{type_name}'"))?;
    }
    Ok(())
}

/// Validate a payload object against a contract's template.
pub fn validate_payload(template: &Value, payload: &Map<String, Value>) -> Result<(), String> {
    let spec = template
        .as_object()
        .ok_or_else(|| "template must be a JSON object".to_string())?;

    for key in payload.keys() {
        if !spec.contains_key(key) {
            return Err(format!("unexpected field '{key}'"));
        }
    }

    for (field, field_spec) in spec {
        let type_name = field_spec
            .as_object()
            .and_then(|s| s.get("type"))
            .and_then(Value::as_str)
            .ok_or_else(|| format!("field '{field}' is missing a type"))?;
        let (field_type, optional) = parse_field_type(type_name)
            .ok_or_else(|| format!("field '{field}' has unknown type '{type_name}'"))?;

        match payload.get(field) {
            Some(value) => check_value(field, field_type, value)?,
            None if optional => {}
            None => return Err(format!("missing field '{field}'")),
        }
    }
    Ok(())
}
