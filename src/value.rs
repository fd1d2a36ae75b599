//! Field values as they travel between the stores and the caller.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single field value.
///
/// `Raw` carries an unescaped SQL expression (e.g. `NOW()`). It is the only way
/// to bypass escaping and must be constructed explicitly with [`Value::raw`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Raw(String),
}

impl Value {
    /// Unescaped SQL expression.
    pub fn raw(expr: impl Into<String>) -> Self {
        Value::Raw(expr.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Value::Raw(_))
    }

    /// Canonical string form used for cache keys, de-duplication and row matching.
    ///
    /// Booleans render as `1` / `0`, so `false` shares an identity with `0`
    /// and `"0"`. Keys for `false` therefore differ from ones built by plain
    /// string concatenation of a false boolean, which yields an empty suffix.
    pub fn to_key_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(true) => "1".to_string(),
            Value::Bool(false) => "0".to_string(),
            Value::Int(n) => n.to_string(),
            Value::UInt(n) => n.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) | Value::Raw(s) => s.clone(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::UInt(n) => i64::try_from(*n).ok(),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(n) => Some(*n),
            Value::Int(n) => u64::try_from(*n).ok(),
            Value::Bool(b) => Some(u64::from(*b)),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(n) => Some(*n as f64),
            Value::UInt(n) => Some(*n as f64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(n) => Some(*n != 0),
            Value::UInt(n) => Some(*n != 0),
            Value::Text(s) => match s.as_str() {
                "1" | "true" => Some(true),
                "0" | "false" | "" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            other => f.write_str(&other.to_key_string()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(u64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_string_forms() {
        assert_eq!(Value::Bool(true).to_key_string(), "1");
        assert_eq!(Value::Bool(false).to_key_string(), "0");
        assert_eq!(Value::Int(-7).to_key_string(), "-7");
        assert_eq!(Value::UInt(42).to_key_string(), "42");
        assert_eq!(Value::Float(1.5).to_key_string(), "1.5");
        assert_eq!(Value::from("abc").to_key_string(), "abc");
        assert_eq!(Value::Null.to_key_string(), "");
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::from("42").as_u64(), Some(42));
        assert_eq!(Value::Int(-1).as_u64(), None);
        assert_eq!(Value::UInt(3).as_f64(), Some(3.0));
        assert_eq!(Value::Int(0).as_bool(), Some(false));
        assert_eq!(Value::from("yes").as_bool(), None);
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(5u64)), Value::UInt(5));
    }

    #[test]
    fn test_raw_is_explicit() {
        let raw = Value::raw("NOW()");
        assert!(raw.is_raw());
        assert!(!Value::from("@NOW()").is_raw());
    }
}
