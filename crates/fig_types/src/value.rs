//! Setting values as they flow between clients, display scripts and verifiers
//!
//! A `SettingValue` is deliberately loose: clients register strongly typed
//! settings, but scripts and verification snippets only ever see the
//! JSON-shaped projection of those values.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Setting values keyed by setting name, as handed to verification.
pub type SettingValues = HashMap<String, SettingValue>;

// ─────────────────────────────────────────────────────────────────────────────
// Value Type
// ─────────────────────────────────────────────────────────────────────────────

/// Declared type of a setting value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Bool,
    Int,
    Double,
    #[default]
    String,
    DateTime,
    TimeSpan,
    List,
    DataGrid,
}

impl ValueType {
    /// Name shown to scripts as `ValueType`
    pub fn script_name(&self) -> &'static str {
        match self {
            ValueType::Bool => "Boolean",
            ValueType::Int => "Int32",
            ValueType::Double => "Double",
            ValueType::String => "String",
            ValueType::DateTime => "DateTime",
            ValueType::TimeSpan => "TimeSpan",
            ValueType::List => "List",
            ValueType::DataGrid => "DataGrid",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Setting Value
// ─────────────────────────────────────────────────────────────────────────────

/// A setting value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    /// No value
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<SettingValue>),
    Map(BTreeMap<String, SettingValue>),
}

impl SettingValue {
    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, SettingValue::Null)
    }

    /// Get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64 (also converts from float if lossless)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SettingValue::Int(i) => Some(*i),
            SettingValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Get as f64 (also converts from int)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Float(f) => Some(*f),
            SettingValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[SettingValue]> {
        match self {
            SettingValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, SettingValue>> {
        match self {
            SettingValue::Map(fields) => Some(fields),
            _ => None,
        }
    }

    /// Get a field from a map value
    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.as_map().and_then(|fields| fields.get(key))
    }

    /// Render the value the way an operator sees it in a single-line editor
    pub fn display_string(&self) -> String {
        match self {
            SettingValue::Null => String::new(),
            SettingValue::Bool(b) => b.to_string(),
            SettingValue::Int(i) => i.to_string(),
            SettingValue::Float(f) => f.to_string(),
            SettingValue::String(s) => s.clone(),
            SettingValue::List(_) | SettingValue::Map(_) => {
                serde_json::Value::from(self.clone()).to_string()
            }
        }
    }

    /// Coerce a value written by a script towards the declared type.
    ///
    /// JavaScript has a single number type, so `3` written to a double
    /// setting arrives as an int and `3.0` written to an int setting
    /// arrives as a float. Anything that cannot be coerced losslessly is
    /// returned unchanged.
    pub fn coerce_to(self, value_type: ValueType) -> SettingValue {
        match (value_type, self) {
            (ValueType::Int, SettingValue::Float(f)) if f.fract() == 0.0 => {
                SettingValue::Int(f as i64)
            }
            (ValueType::Double, SettingValue::Int(i)) => SettingValue::Float(i as f64),
            (_, other) => other,
        }
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            SettingValue::Null => "null",
            SettingValue::Bool(_) => "bool",
            SettingValue::Int(_) => "int",
            SettingValue::Float(_) => "float",
            SettingValue::String(_) => "string",
            SettingValue::List(_) => "list",
            SettingValue::Map(_) => "map",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// From Implementations
// ─────────────────────────────────────────────────────────────────────────────

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        SettingValue::Bool(v)
    }
}

impl From<i32> for SettingValue {
    fn from(v: i32) -> Self {
        SettingValue::Int(v as i64)
    }
}

impl From<i64> for SettingValue {
    fn from(v: i64) -> Self {
        SettingValue::Int(v)
    }
}

impl From<f64> for SettingValue {
    fn from(v: f64) -> Self {
        SettingValue::Float(v)
    }
}

impl From<String> for SettingValue {
    fn from(v: String) -> Self {
        SettingValue::String(v)
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        SettingValue::String(v.to_string())
    }
}

impl<T: Into<SettingValue>> From<Vec<T>> for SettingValue {
    fn from(v: Vec<T>) -> Self {
        SettingValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<SettingValue>> From<Option<T>> for SettingValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => SettingValue::Null,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// serde_json::Value Interop
// ─────────────────────────────────────────────────────────────────────────────

impl From<serde_json::Value> for SettingValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => SettingValue::Null,
            serde_json::Value::Bool(b) => SettingValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SettingValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    SettingValue::Float(f)
                } else {
                    SettingValue::Null
                }
            }
            serde_json::Value::String(s) => SettingValue::String(s),
            serde_json::Value::Array(arr) => {
                SettingValue::List(arr.into_iter().map(SettingValue::from).collect())
            }
            serde_json::Value::Object(obj) => SettingValue::Map(
                obj.into_iter()
                    .map(|(k, v)| (k, SettingValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<SettingValue> for serde_json::Value {
    fn from(v: SettingValue) -> Self {
        match v {
            SettingValue::Null => serde_json::Value::Null,
            SettingValue::Bool(b) => serde_json::Value::Bool(b),
            SettingValue::Int(i) => serde_json::Value::Number(i.into()),
            SettingValue::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            SettingValue::String(s) => serde_json::Value::String(s),
            SettingValue::List(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
            }
            SettingValue::Map(fields) => serde_json::Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TryFrom Implementations
// ─────────────────────────────────────────────────────────────────────────────

/// Error when converting from SettingValue
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValueConversionError {
    #[error("Expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

impl TryFrom<SettingValue> for bool {
    type Error = ValueConversionError;
    fn try_from(v: SettingValue) -> Result<Self, Self::Error> {
        v.as_bool().ok_or(ValueConversionError::TypeMismatch {
            expected: "bool",
            actual: v.type_name(),
        })
    }
}

impl TryFrom<SettingValue> for i64 {
    type Error = ValueConversionError;
    fn try_from(v: SettingValue) -> Result<Self, Self::Error> {
        v.as_i64().ok_or(ValueConversionError::TypeMismatch {
            expected: "int",
            actual: v.type_name(),
        })
    }
}

impl TryFrom<SettingValue> for f64 {
    type Error = ValueConversionError;
    fn try_from(v: SettingValue) -> Result<Self, Self::Error> {
        v.as_f64().ok_or(ValueConversionError::TypeMismatch {
            expected: "float",
            actual: v.type_name(),
        })
    }
}

impl TryFrom<SettingValue> for String {
    type Error = ValueConversionError;
    fn try_from(v: SettingValue) -> Result<Self, Self::Error> {
        match v {
            SettingValue::String(s) => Ok(s),
            _ => Err(ValueConversionError::TypeMismatch {
                expected: "string",
                actual: v.type_name(),
            }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
