//! Frame classification.
//!
//! The firmware is untrusted and free-mixes three line formats on one stream:
//! JSON replies, legacy `NAME:VALUE` variable updates, and plain diagnostic
//! text. Every frame resolves to exactly one of those categories; malformed
//! input of any shape degrades to the raw category instead of erroring.

use serde::Serialize;
use std::fmt;

use super::response::Response;

/// A typed value parsed from the right-hand side of a `NAME:VALUE` frame.
///
/// Parse precedence is boolean literals, then numbers, then opaque text:
/// `1`/`true` and `0`/`false` (case-insensitive) are booleans even though
/// they would also parse as numbers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum VarValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl fmt::Display for VarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarValue::Bool(b) => write!(f, "{}", b),
            VarValue::Number(n) => write!(f, "{}", n),
            VarValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A `NAME:VALUE` variable update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VarUpdate {
    pub name: String,
    pub value: VarValue,
}

/// The routing decision for one frame.
#[derive(Debug)]
pub enum Classified {
    /// JSON object; typed by its `type` discriminant.
    Response(Box<Response>),
    /// Legacy `NAME:VALUE` pair.
    Var(VarUpdate),
    /// Anything else, surfaced unmodified.
    Raw(String),
}

/// Classify one complete frame.
pub fn classify(line: &str) -> Classified {
    if line.starts_with('{') {
        // Only objects qualify; a frame like "{garbage" falls through.
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
            if value.is_object() {
                return Classified::Response(Box::new(Response::from_value(value)));
            }
        }
    }
    if let Some(update) = parse_var(line) {
        return Classified::Var(update);
    }
    Classified::Raw(line.to_string())
}

/// Try to read the frame as exactly one `NAME:VALUE` pair. The name must be
/// non-empty `\w+`; a value containing another colon disqualifies the frame.
fn parse_var(line: &str) -> Option<VarUpdate> {
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    if value.contains(':') {
        return None;
    }
    Some(VarUpdate {
        name: name.to_string(),
        value: parse_value(value.trim()),
    })
}

fn parse_value(raw: &str) -> VarValue {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" => return VarValue::Bool(true),
        "0" | "false" => return VarValue::Bool(false),
        _ => {}
    }
    if let Ok(n) = raw.parse::<f64>() {
        return VarValue::Number(n);
    }
    VarValue::Text(raw.to_string())
}
