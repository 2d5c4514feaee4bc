//! Prompt template resolution.
//!
//! Supports `{{name}}` (required) and `{{name | default}}` (optional with a
//! default), with whitespace trimmed around the name and pipe.  Values are
//! substituted by string conversion in a single pass — markers inside a
//! resolved value are never expanded again.
//!
//! Templates come from trusted project config; variable values come from API
//! consumers, so only primitive value types are accepted and a length cap is
//! enforced.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// Maximum allowed length for a substituted value.
pub const MAX_VALUE_LENGTH: usize = 100 * 1024;

/// Errors raised during template resolution.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error(
        "template variable '{name}' not found; available variables: {available:?}. \
         Add a default with '{{{{{name} | default_value}}}}'"
    )]
    VariableNotFound { name: String, available: Vec<String> },

    #[error(
        "variable '{name}' has unsupported type '{type_name}'; only string, \
         integer, float, boolean and null are allowed"
    )]
    UnsupportedType { name: String, type_name: String },

    #[error("variable '{name}' value exceeds maximum length ({len} > {max})")]
    ValueTooLong { name: String, len: usize, max: usize },
}

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)(?:\s*\|\s*([^}]*))?\s*\}\}")
            .expect("marker pattern is valid")
    })
}

/// Quick check for the presence of template markers.
pub fn has_template_markers(text: &str) -> bool {
    text.contains("{{") && text.contains("}}")
}

/// Convert a variable value to its substitution string.
///
/// Null becomes the empty string; non-primitive values are rejected.
fn value_to_string(name: &str, value: &Value) -> Result<String, TemplateError> {
    let s = match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => {
            let type_name = if value.is_array() { "array" } else { "object" };
            return Err(TemplateError::UnsupportedType {
                name: name.to_owned(),
                type_name: type_name.to_owned(),
            });
        }
    };
    if s.len() > MAX_VALUE_LENGTH {
        return Err(TemplateError::ValueTooLong {
            name: name.to_owned(),
            len: s.len(),
            max: MAX_VALUE_LENGTH,
        });
    }
    Ok(s)
}

/// Resolve template variables in a string.
pub fn resolve(
    template: &str,
    variables: &serde_json::Map<String, Value>,
) -> Result<String, TemplateError> {
    if !template.contains("{{") {
        return Ok(template.to_owned());
    }

    let pattern = marker_pattern();
    let mut out = String::with_capacity(template.len());
    let mut last_end = 0;

    for caps in pattern.captures_iter(template) {
        let whole = caps.get(0).expect("group 0 always present");
        out.push_str(&template[last_end..whole.start()]);
        last_end = whole.end();

        let name = &caps[1];
        if let Some(value) = variables.get(name) {
            out.push_str(&value_to_string(name, value)?);
        } else if let Some(default) = caps.get(2) {
            out.push_str(default.as_str().trim());
        } else {
            tracing::warn!(variable = name, "template variable not found");
            return Err(TemplateError::VariableNotFound {
                name: name.to_owned(),
                available: variables.keys().cloned().collect(),
            });
        }
    }

    out.push_str(&template[last_end..]);
    Ok(out)
}

/// Recursively resolve template variables in a JSON value.
///
/// Strings are resolved; maps and sequences are walked; other leaves pass
/// through unchanged.
pub fn resolve_object(
    obj: &Value,
    variables: &serde_json::Map<String, Value>,
) -> Result<Value, TemplateError> {
    match obj {
        Value::String(s) => Ok(Value::String(resolve(s, variables)?)),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_object(v, variables)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_object(item, variables)?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

/// Extract `(name, default)` pairs from a template, for validation and
/// documentation.
pub fn extract_variables(template: &str) -> Vec<(String, Option<String>)> {
    marker_pattern()
        .captures_iter(template)
        .map(|caps| {
            (
                caps[1].to_owned(),
                caps.get(2).map(|d| d.as_str().trim().to_owned()),
            )
        })
        .collect()
}
