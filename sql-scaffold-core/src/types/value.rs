use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike};
use serde::{Serialize, Serializer};

use crate::script::python::{bytes_literal, float_literal, string_literal};

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// A concrete literal: an argument bound to an operation, a default column
/// value, an enum member or a value flowing through an in-process import.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
    List(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    /// Column name to value, the literal of a table class.
    Row(BTreeMap<String, Value>),
}

impl Value {
    pub fn str(value: impl Into<String>) -> Self {
        Value::Str(value.into())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn dict_get(&self, key: &Value) -> Option<&Value> {
        match self {
            Value::Dict(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Shape-agnostic conversion. Typed conversion lives in
    /// [`crate::types::ValueType::literal_from_json`].
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(flag) => Value::Int(i64::from(*flag)),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(int) => Value::Int(int),
                None => Value::Float(number.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(string) => Value::Str(string.clone()),
            serde_json::Value::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => Value::Dict(
                map.iter()
                    .map(|(k, v)| (Value::Str(k.clone()), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::None => Json::Null,
            Value::Int(value) => Json::from(*value),
            Value::Float(value) => serde_json::Number::from_f64(*value)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Str(value) => Json::String(value.clone()),
            Value::Bytes(value) => Json::Array(value.iter().map(|byte| Json::from(*byte)).collect()),
            Value::DateTime(value) => Json::String(value.format(DATETIME_FORMAT).to_string()),
            Value::Time(value) => Json::String(value.format(TIME_FORMAT).to_string()),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Dict(pairs) => Json::Object(
                pairs
                    .iter()
                    .map(|(k, v)| (k.key_text(), v.to_json()))
                    .collect(),
            ),
            Value::Row(row) => Json::Object(
                row.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    fn key_text(&self) -> String {
        match self {
            Value::Str(value) => value.clone(),
            other => other.to_string(),
        }
    }

    fn discriminant(&self) -> u8 {
        match self {
            Value::None => 0,
            Value::Int(_) => 1,
            Value::Float(_) => 2,
            Value::Str(_) => 3,
            Value::Bytes(_) => 4,
            Value::DateTime(_) => 5,
            Value::Time(_) => 6,
            Value::List(_) => 7,
            Value::Dict(_) => 8,
            Value::Row(_) => 9,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => a == b,
            (Value::Row(a), Value::Row(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.discriminant().hash(state);
        match self {
            Value::None => {}
            Value::Int(value) => value.hash(state),
            Value::Float(value) => value.to_bits().hash(state),
            Value::Str(value) => value.hash(state),
            Value::Bytes(value) => value.hash(state),
            Value::DateTime(value) => value.hash(state),
            Value::Time(value) => value.hash(state),
            Value::List(items) => items.hash(state),
            Value::Dict(pairs) => pairs.hash(state),
            Value::Row(row) => row.hash(state),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::None, Into::into)
    }
}

/// Python-like `repr`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{}", float_literal(*value)),
            Value::Str(value) => write!(f, "{}", string_literal(value)),
            Value::Bytes(value) => write!(f, "{}", bytes_literal(value)),
            Value::DateTime(value) => write!(
                f,
                "datetime(year={}, month={}, day={}, hour={}, minute={}, second={})",
                value.year(),
                value.month(),
                value.day(),
                value.hour(),
                value.minute(),
                value.second()
            ),
            Value::Time(value) => write!(
                f,
                "time(hour={}, minute={}, second={})",
                value.hour(),
                value.minute(),
                value.second()
            ),
            Value::List(items) => {
                let items = items.iter().map(ToString::to_string).collect::<Vec<_>>();
                write!(f, "[{}]", items.join(", "))
            }
            Value::Dict(pairs) => {
                let pairs = pairs
                    .iter()
                    .map(|(k, v)| format!("{k}: {v}"))
                    .collect::<Vec<_>>();
                write!(f, "{{{}}}", pairs.join(", "))
            }
            Value::Row(row) => {
                let fields = row
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>();
                write!(f, "({})", fields.join(", "))
            }
        }
    }
}
