//! Coercion of loosely typed settings values.
//!
//! Hosts hand connectors settings as JSON maps, usually produced from user
//! edited configuration. A flag may arrive as `true`, `"true"`, `1` or `"T"`,
//! and a QoS as `1` or `"1"`. These helpers turn such values into typed data
//! and report anything that does not fit as a [`CoerceError`].

use crate::error::CoerceError;
use serde_json::Value;

/// Settings, inputs and outputs exchanged with the host.
pub type Attrs = serde_json::Map<String, Value>;

/// Coerce a value to a boolean.
///
/// Strings are parsed strictly: `1 t T TRUE true True` and
/// `0 f F FALSE false False` are the only accepted spellings. Null is false.
pub fn to_bool(value: &Value) -> Result<bool, CoerceError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        Value::Number(n) => Ok(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
        Value::String(s) => parse_bool(s).ok_or_else(|| CoerceError::incompatible(value, "bool")),
        _ => Err(CoerceError::incompatible(value, "bool")),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Coerce a value to a signed integer. Floats are truncated.
pub fn to_int(value: &Value) -> Result<i64, CoerceError> {
    match value {
        Value::Null => Ok(0),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| CoerceError::incompatible(value, "int")),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().map(|f| f as i64))
                .ok_or_else(|| CoerceError::incompatible(value, "int"))
        }
        _ => Err(CoerceError::incompatible(value, "int")),
    }
}

/// Coerce a value to an unsigned integer.
pub fn to_u64(value: &Value) -> Result<u64, CoerceError> {
    let n = to_int(value)?;
    u64::try_from(n).map_err(|_| CoerceError::incompatible(value, "unsigned int"))
}

/// Coerce a value to a string. Null becomes the empty string and compound
/// values are JSON encoded.
pub fn to_string(value: &Value) -> Result<String, CoerceError> {
    Ok(match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    })
}

/// Read a string setting, defaulting to the empty string.
pub fn get_string(attrs: &Attrs, name: &str) -> Result<String, CoerceError> {
    match attrs.get(name) {
        Some(v) => to_string(v).map_err(|e| e.for_setting(name)),
        None => Ok(String::new()),
    }
}

/// Read a boolean setting, falling back to `default` when absent.
pub fn get_bool(attrs: &Attrs, name: &str, default: bool) -> Result<bool, CoerceError> {
    match attrs.get(name) {
        Some(v) => to_bool(v).map_err(|e| e.for_setting(name)),
        None => Ok(default),
    }
}

/// Read a boolean setting that must be present.
pub fn require_bool(attrs: &Attrs, name: &str) -> Result<bool, CoerceError> {
    match attrs.get(name) {
        Some(Value::Null) | None => Err(CoerceError::Missing(name.to_string())),
        Some(v) => to_bool(v).map_err(|e| e.for_setting(name)),
    }
}

/// Read an integer setting, falling back to `default` when absent.
pub fn get_int(attrs: &Attrs, name: &str, default: i64) -> Result<i64, CoerceError> {
    match attrs.get(name) {
        Some(v) => to_int(v).map_err(|e| e.for_setting(name)),
        None => Ok(default),
    }
}

/// Read an unsigned integer setting, falling back to `default` when absent.
pub fn get_u64(attrs: &Attrs, name: &str, default: u64) -> Result<u64, CoerceError> {
    match attrs.get(name) {
        Some(v) => to_u64(v).map_err(|e| e.for_setting(name)),
        None => Ok(default),
    }
}
