//! Field schemas and validated request data.
//!
//! A path declares the fields it understands. Incoming payloads are flat JSON
//! maps; known fields are coerced to their declared type, defaults fill the
//! gaps, and unknown fields are dropped. All of this happens before a handler
//! runs, so a malformed field never causes a partial side effect.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::errors::{Error, Result};
use crate::secrets::duration::parse_optional_duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Bool,
    Int,
    /// Go-style duration string or a bare number of seconds.
    Duration,
}

#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub name: &'static str,
    pub field_type: FieldType,
    pub default: Option<Value>,
    pub required: bool,
    pub description: &'static str,
}

impl FieldSchema {
    fn new(name: &'static str, field_type: FieldType, description: &'static str) -> Self {
        Self { name, field_type, default: None, required: false, description }
    }

    pub fn string(name: &'static str, description: &'static str) -> Self {
        Self::new(name, FieldType::String, description)
    }

    pub fn bool(name: &'static str, description: &'static str) -> Self {
        Self::new(name, FieldType::Bool, description)
    }

    pub fn int(name: &'static str, description: &'static str) -> Self {
        Self::new(name, FieldType::Int, description)
    }

    pub fn duration(name: &'static str, description: &'static str) -> Self {
        Self::new(name, FieldType::Duration, description)
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Reject requests where this field is absent or empty.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    String(String),
    Bool(bool),
    Int(i64),
    Duration(Option<Duration>),
}

/// Request fields after schema validation.
#[derive(Debug, Clone, Default)]
pub struct FieldData {
    values: HashMap<&'static str, FieldValue>,
}

impl FieldData {
    /// Validate `body` and `captures` against `schema`.
    ///
    /// Path captures override body fields of the same name.
    pub fn parse(
        schema: &[FieldSchema],
        body: &Map<String, Value>,
        captures: &HashMap<String, String>,
    ) -> Result<Self> {
        Self::parse_with(schema, body, captures, true)
    }

    /// Like [`FieldData::parse`] but without enforcing required fields.
    /// Reads, lists and deletes share a path's schema with its writes.
    pub fn parse_lenient(
        schema: &[FieldSchema],
        body: &Map<String, Value>,
        captures: &HashMap<String, String>,
    ) -> Result<Self> {
        Self::parse_with(schema, body, captures, false)
    }

    fn parse_with(
        schema: &[FieldSchema],
        body: &Map<String, Value>,
        captures: &HashMap<String, String>,
        enforce_required: bool,
    ) -> Result<Self> {
        let mut values = HashMap::with_capacity(schema.len());
        for field in schema {
            let raw = match captures.get(field.name) {
                Some(captured) => Some(Value::String(captured.clone())),
                None => body.get(field.name).filter(|v| !v.is_null()).cloned(),
            };

            if enforce_required && field.required && raw.as_ref().map_or(true, is_empty_value) {
                return Err(Error::validation_field(
                    format!("missing required field '{}'", field.name),
                    field.name,
                ));
            }

            let raw = raw.or_else(|| field.default.clone());
            values.insert(field.name, coerce(field, raw)?);
        }
        Ok(Self { values })
    }

    pub fn get_str(&self, name: &str) -> &str {
        match self.values.get(name) {
            Some(FieldValue::String(s)) => s.as_str(),
            _ => "",
        }
    }

    /// Field value, or `None` when empty.
    pub fn get_opt_str(&self, name: &str) -> Option<&str> {
        Some(self.get_str(name)).filter(|s| !s.is_empty())
    }

    pub fn get_bool(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(FieldValue::Bool(true)))
    }

    pub fn get_int(&self, name: &str) -> i64 {
        match self.values.get(name) {
            Some(FieldValue::Int(i)) => *i,
            _ => 0,
        }
    }

    pub fn get_duration(&self, name: &str) -> Option<Duration> {
        match self.values.get(name) {
            Some(FieldValue::Duration(d)) => *d,
            _ => None,
        }
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn coerce(field: &FieldSchema, raw: Option<Value>) -> Result<FieldValue> {
    let invalid = |expected: &str| {
        Error::validation_field(format!("field '{}' must be {}", field.name, expected), field.name)
    };

    Ok(match field.field_type {
        FieldType::String => FieldValue::String(match raw {
            None => String::new(),
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(_) => return Err(invalid("a string")),
        }),
        FieldType::Bool => FieldValue::Bool(match raw {
            None => false,
            Some(Value::Bool(b)) => b,
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "t" => true,
                "false" | "0" | "f" | "" => false,
                _ => return Err(invalid("a boolean")),
            },
            Some(Value::Number(n)) => match n.as_i64() {
                Some(0) => false,
                Some(1) => true,
                _ => return Err(invalid("a boolean")),
            },
            Some(_) => return Err(invalid("a boolean")),
        }),
        FieldType::Int => FieldValue::Int(match raw {
            None => 0,
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| invalid("an integer"))?,
            Some(Value::String(s)) if s.trim().is_empty() => 0,
            Some(Value::String(s)) => s.trim().parse().map_err(|_| invalid("an integer"))?,
            Some(_) => return Err(invalid("an integer")),
        }),
        FieldType::Duration => FieldValue::Duration(match raw {
            None => None,
            Some(Value::String(s)) => parse_optional_duration(&s).map_err(|e| {
                Error::validation_field(format!("invalid '{}': {}", field.name, e), field.name)
            })?,
            Some(Value::Number(n)) => match n.as_u64() {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => return Err(invalid("a non-negative duration")),
            },
            Some(_) => return Err(invalid("a duration")),
        }),
    })
}
