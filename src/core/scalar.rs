//! Purpose: Typed values decoded from dump literals.
//! Exports: `Scalar`, `Row`.
//! Role: Closed value model handed from the tokenizer to record mapping and JSON output.
//! Invariants: Exactly one variant per value; rendering via `to_literal` re-parses to the same value.
use std::fmt;

use serde::{Serialize, Serializer};

/// One tuple of a `VALUES` clause, in column order.
pub type Row = Vec<Scalar>;

#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Scalar::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Renders the value the way mysqldump writes it inside a `VALUES` tuple.
    pub fn to_literal(&self) -> String {
        match self {
            Scalar::Null => "NULL".to_string(),
            Scalar::Integer(value) => value.to_string(),
            Scalar::Float(value) => format!("{value:?}"),
            Scalar::Text(value) => {
                let mut out = String::with_capacity(value.len() + 2);
                out.push('\'');
                for ch in value.chars() {
                    match ch {
                        '\'' => out.push_str("\\'"),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        '\t' => out.push_str("\\t"),
                        '\0' => out.push_str("\\0"),
                        '\u{1a}' => out.push_str("\\Z"),
                        other => out.push(other),
                    }
                }
                out.push('\'');
                out
            }
        }
    }
}

/// Plain rendering used for paths and labels: text is unquoted, null is `NULL`.
impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => f.write_str("NULL"),
            Scalar::Integer(value) => write!(f, "{value}"),
            Scalar::Float(value) => write!(f, "{value}"),
            Scalar::Text(value) => f.write_str(value),
        }
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Null => serializer.serialize_unit(),
            Scalar::Integer(value) => serializer.serialize_i64(*value),
            Scalar::Float(value) => serializer.serialize_f64(*value),
            Scalar::Text(value) => serializer.serialize_str(value),
        }
    }
}

impl From<&Scalar> for serde_json::Value {
    fn from(scalar: &Scalar) -> Self {
        match scalar {
            Scalar::Null => serde_json::Value::Null,
            Scalar::Integer(value) => serde_json::Value::from(*value),
            Scalar::Float(value) => serde_json::Value::from(*value),
            Scalar::Text(value) => serde_json::Value::from(value.as_str()),
        }
    }
}
