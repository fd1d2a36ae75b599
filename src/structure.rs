//! Record structures: the immutable shape of a table and its cache family.
//!
//! A [`RecordStructure`] names the relational table, its typed fields, the
//! primary field and whether the store generates it, plus where cache entries
//! for the table live (server alias, family name, lookup field). Structures are
//! built once and shared behind an `Arc` by every record of that kind.
//!
//! Construction failures are programmer errors and surface as
//! `Error::ConfigError`; they are never retried.
//!
//! # Example
//!
//! ```
//! use cache_table::structure::RecordStructure;
//!
//! let users = RecordStructure::new(
//!     "users",
//!     &[("id", "uint"), ("email", "string"), ("active", "bool")],
//!     "id",
//!     true,
//! )
//! .expect("valid structure");
//!
//! assert_eq!(users.cache_family(), "users");
//! assert_eq!(users.escape_value("active", &true.into()).unwrap(), "1");
//! ```

use crate::error::{Error, Result};
use crate::sql::escape_str;
use crate::value::Value;
use std::fmt;
use std::str::FromStr;

/// Column types understood by the escaping and validation rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    Int,
    UInt,
    Float,
    String,
    Ip,
    Md5,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Bool => "bool",
            FieldType::Int => "int",
            FieldType::UInt => "uint",
            FieldType::Float => "float",
            FieldType::String => "string",
            FieldType::Ip => "ip",
            FieldType::Md5 => "md5",
        }
    }

    fn is_textual(&self) -> bool {
        matches!(self, FieldType::String | FieldType::Ip | FieldType::Md5)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bool" => Ok(FieldType::Bool),
            "int" => Ok(FieldType::Int),
            "uint" => Ok(FieldType::UInt),
            "float" => Ok(FieldType::Float),
            "string" => Ok(FieldType::String),
            "ip" => Ok(FieldType::Ip),
            "md5" => Ok(FieldType::Md5),
            other => Err(Error::ConfigError(format!("Unknown field type '{}'", other))),
        }
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_server_alias(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_integer(s: &str, signed: bool) -> bool {
    let digits = match s.strip_prefix('-') {
        Some(rest) if signed => rest,
        _ => s,
    };
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn is_dotted_quad(s: &str) -> bool {
    let octets: Vec<&str> = s.split('.').collect();
    octets.len() == 4
        && octets.iter().all(|o| {
            !o.is_empty() && o.len() <= 3 && is_integer(o, false) && o.parse::<u16>().is_ok_and(|n| n <= 255)
        })
}

fn is_md5(s: &str) -> bool {
    s.len() == 32 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Immutable description of a table and its cache family.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordStructure {
    name: String,
    fields: Vec<(String, FieldType)>,
    primary: String,
    auto_generated: bool,
    cache_server: String,
    cache_family: String,
    lookup_field: String,
}

impl RecordStructure {
    /// Build a structure from `(field, type name)` pairs with default cache settings.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for an invalid name, an unknown type or a
    /// primary field that is not one of the fields.
    pub fn new(
        name: &str,
        fields: &[(&str, &str)],
        primary: &str,
        auto_generated: bool,
    ) -> Result<Self> {
        let mut builder = Self::builder(name).primary(primary, auto_generated);
        for (field, type_name) in fields {
            builder = builder.field(field, type_name.parse()?);
        }
        builder.build()
    }

    pub fn builder(name: &str) -> RecordStructureBuilder {
        RecordStructureBuilder {
            name: name.to_string(),
            fields: Vec::new(),
            primary: None,
            auto_generated: false,
            cache_server: None,
            cache_family: None,
            lookup_field: None,
        }
    }

    /// Relational table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, FieldType)> + '_ {
        self.fields.iter().map(|(name, kind)| (name.as_str(), *kind))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|(name, _)| name == field)
    }

    /// Type of `field`.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for an unknown field.
    pub fn field_type(&self, field: &str) -> Result<FieldType> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| {
                Error::ConfigError(format!("Unknown field '{}' in '{}'", field, self.name))
            })
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn auto_generated(&self) -> bool {
        self.auto_generated
    }

    pub fn cache_server(&self) -> &str {
        &self.cache_server
    }

    pub fn cache_family(&self) -> &str {
        &self.cache_family
    }

    /// Field whose value derives cache keys and filters the fallback query.
    pub fn lookup_field(&self) -> &str {
        &self.lookup_field
    }

    /// Normalise a value to the field's type.
    ///
    /// Driver and cache values arrive loosely typed (`Int(0)` for a bool
    /// column, decimal text for a float). Values that cannot be converted are
    /// returned unchanged, `Null` and `Raw` pass through.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for an unknown field.
    pub fn coerce(&self, field: &str, value: Value) -> Result<Value> {
        let kind = self.field_type(field)?;
        if value.is_null() || value.is_raw() {
            return Ok(value);
        }
        let coerced = match kind {
            FieldType::Bool => value.as_bool().map(Value::Bool),
            FieldType::Int => value.as_i64().map(Value::Int),
            FieldType::UInt => value.as_u64().map(Value::UInt),
            FieldType::Float => value.as_f64().map(Value::Float),
            FieldType::String | FieldType::Ip | FieldType::Md5 => match &value {
                Value::Text(_) => None,
                other => Some(Value::Text(other.to_key_string())),
            },
        };
        Ok(coerced.unwrap_or(value))
    }

    /// Render a value as a MySQL literal for `field`.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for an unknown field.
    pub fn escape_value(&self, field: &str, value: &Value) -> Result<String> {
        let kind = self.field_type(field)?;
        let literal = match value {
            Value::Null => "NULL".to_string(),
            Value::Raw(expr) => expr.clone(),
            _ => match kind {
                FieldType::Bool => {
                    if value.as_bool().unwrap_or(false) {
                        "1".to_string()
                    } else {
                        "0".to_string()
                    }
                }
                FieldType::Int => value
                    .as_i64()
                    .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
                    .unwrap_or(0)
                    .to_string(),
                FieldType::UInt => value
                    .as_u64()
                    .or_else(|| {
                        value
                            .as_f64()
                            .filter(|f| f.is_finite() && *f >= 0.0)
                            .map(|f| f as u64)
                    })
                    .unwrap_or(0)
                    .to_string(),
                FieldType::Float => value
                    .as_f64()
                    .filter(|f| f.is_finite())
                    .unwrap_or(0.0)
                    .to_string(),
                FieldType::String | FieldType::Ip | FieldType::Md5 => {
                    format!("'{}'", escape_str(&value.to_key_string()))
                }
            },
        };
        Ok(literal)
    }

    /// Cheap shape check of a value against the field type.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for an unknown field.
    pub fn validate_value(&self, field: &str, value: &Value) -> Result<bool> {
        let kind = self.field_type(field)?;
        let valid = match value {
            Value::Null => false,
            Value::Raw(_) => true,
            _ => match kind {
                FieldType::Bool => match value {
                    Value::Bool(_) => true,
                    Value::Int(n) => *n == 0 || *n == 1,
                    Value::UInt(n) => *n <= 1,
                    Value::Text(s) => s == "0" || s == "1",
                    _ => false,
                },
                FieldType::Int => match value {
                    Value::Int(_) => true,
                    Value::UInt(n) => i64::try_from(*n).is_ok(),
                    Value::Text(s) => is_integer(s, true),
                    _ => false,
                },
                FieldType::UInt => match value {
                    Value::UInt(_) => true,
                    Value::Int(n) => *n >= 0,
                    Value::Text(s) => is_integer(s, false),
                    _ => false,
                },
                FieldType::Float => match value {
                    Value::Float(f) => f.is_finite(),
                    Value::Int(_) | Value::UInt(_) => true,
                    Value::Text(s) => s.trim().parse::<f64>().is_ok_and(f64::is_finite),
                    _ => false,
                },
                FieldType::String => matches!(value, Value::Text(_)),
                FieldType::Ip => value.as_str().is_some_and(is_dotted_quad),
                FieldType::Md5 => value.as_str().is_some_and(is_md5),
            },
        };
        Ok(valid)
    }

    /// Whether `field` holds text (quoted when escaped).
    pub fn is_textual(&self, field: &str) -> Result<bool> {
        Ok(self.field_type(field)?.is_textual())
    }
}

/// Builder for [`RecordStructure`].
#[derive(Clone, Debug)]
pub struct RecordStructureBuilder {
    name: String,
    fields: Vec<(String, FieldType)>,
    primary: Option<String>,
    auto_generated: bool,
    cache_server: Option<String>,
    cache_family: Option<String>,
    lookup_field: Option<String>,
}

impl RecordStructureBuilder {
    /// Append a field. Field order is preserved.
    pub fn field(mut self, name: &str, kind: FieldType) -> Self {
        self.fields.push((name.to_string(), kind));
        self
    }

    pub fn primary(mut self, field: &str, auto_generated: bool) -> Self {
        self.primary = Some(field.to_string());
        self.auto_generated = auto_generated;
        self
    }

    /// Key/value server alias (defaults to `default`).
    pub fn cache_server(mut self, alias: &str) -> Self {
        self.cache_server = Some(alias.to_string());
        self
    }

    /// Cache family name (defaults to the table name).
    pub fn cache_family(mut self, family: &str) -> Self {
        self.cache_family = Some(family.to_string());
        self
    }

    /// Lookup field (defaults to the primary field).
    pub fn lookup_field(mut self, field: &str) -> Self {
        self.lookup_field = Some(field.to_string());
        self
    }

    /// # Errors
    /// Returns `Error::ConfigError` when any name or reference is invalid.
    pub fn build(self) -> Result<RecordStructure> {
        if !is_identifier(&self.name) {
            return Err(Error::ConfigError(format!(
                "Invalid table name '{}'",
                self.name
            )));
        }
        if self.fields.is_empty() {
            return Err(Error::ConfigError(format!(
                "Structure '{}' has no fields",
                self.name
            )));
        }
        for (index, (field, _)) in self.fields.iter().enumerate() {
            if !is_identifier(field) {
                return Err(Error::ConfigError(format!(
                    "Invalid field name '{}' in '{}'",
                    field, self.name
                )));
            }
            if self.fields[..index].iter().any(|(other, _)| other == field) {
                return Err(Error::ConfigError(format!(
                    "Duplicate field '{}' in '{}'",
                    field, self.name
                )));
            }
        }

        let has_field = |name: &str| self.fields.iter().any(|(f, _)| f == name);

        let primary = self.primary.clone().ok_or_else(|| {
            Error::ConfigError(format!("Structure '{}' has no primary field", self.name))
        })?;
        if !has_field(&primary) {
            return Err(Error::ConfigError(format!(
                "Primary field '{}' is not a field of '{}'",
                primary, self.name
            )));
        }

        let lookup_field = self.lookup_field.clone().unwrap_or_else(|| primary.clone());
        if !has_field(&lookup_field) {
            return Err(Error::ConfigError(format!(
                "Lookup field '{}' is not a field of '{}'",
                lookup_field, self.name
            )));
        }

        let cache_server = self
            .cache_server
            .clone()
            .unwrap_or_else(|| "default".to_string());
        if !is_server_alias(&cache_server) {
            return Err(Error::ConfigError(format!(
                "Invalid cache server alias '{}'",
                cache_server
            )));
        }

        let cache_family = self.cache_family.clone().unwrap_or_else(|| self.name.clone());
        if !is_identifier(&cache_family) {
            return Err(Error::ConfigError(format!(
                "Invalid cache family '{}'",
                cache_family
            )));
        }

        Ok(RecordStructure {
            name: self.name,
            fields: self.fields,
            primary,
            auto_generated: self.auto_generated,
            cache_server,
            cache_family,
            lookup_field,
        })
    }
}
