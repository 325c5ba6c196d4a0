//! The value type lattice.
//!
//! [`ValueType`] describes the shape of every value flowing through generated
//! code: column types, operation inputs and outputs, argument types. Besides
//! the assignability relation it knows how to render itself and its literals
//! in the generated program, how to produce a default literal and how to parse
//! one back from text or JSON.

pub mod value;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;
use thiserror::Error;

use crate::script::Imports;
use crate::script::python::{bytes_literal, float_literal, string_literal, to_pascal};
pub use value::{DATETIME_FORMAT, TIME_FORMAT, Value};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TypeError {
    #[error("`{token}` is not a valid literal of {value_type}")]
    InvalidLiteral { token: String, value_type: ValueType },
    #[error("{value} is not a literal of {value_type}")]
    LiteralMismatch { value: Value, value_type: ValueType },
    #[error("{0} has no literal syntax")]
    NoLiteral(ValueType),
    #[error("{value_type} has no default literal: {reason}")]
    NoDefault {
        value_type: ValueType,
        reason: &'static str,
    },
    #[error("enum over {base} has no value")]
    EmptyEnum { base: ValueType },
    #[error("enum values must be literals of {base}, found {value}")]
    InvalidEnumValue { base: ValueType, value: Value },
    #[error("operation {position} of the chain expects {expected} but receives {found}")]
    ChainMismatch {
        position: usize,
        expected: ValueType,
        found: ValueType,
    },
    #[error("{found} cannot be assigned to {expected}")]
    NotAssignable {
        expected: ValueType,
        found: ValueType,
    },
    #[error("empty operation chain")]
    EmptyChain,
}

/// Closed set of value shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ValueType {
    Int,
    Float,
    Str,
    Bytes,
    DateTime,
    Time,
    None,
    Optional(Box<ValueType>),
    Enum(EnumType),
    Class(ClassType),
    Reference(ReferenceType),
    Iterable(Box<ValueType>),
    List(Box<ValueType>),
    Dict(Box<ValueType>, Box<ValueType>),
    Any,
}

/// A finite set of literals of `base`.
///
/// `values: None` is an open enum: any enum over `base`, members unknown until
/// an operation instance fixes them.
#[derive(Debug, Clone, Serialize)]
pub struct EnumType {
    base: Box<ValueType>,
    values: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassType {
    pub name: String,
    pub parent: Option<Box<ClassType>>,
    /// Constructor parameters of `constant`, the primary key of the class.
    pub key: Vec<(String, ValueType)>,
}

/// A foreign key resolved to the table and column it finally points at.
/// `sub_references` lists the intermediate tables of a multi-hop chain.
#[derive(Debug, Clone, Eq, Serialize)]
pub struct ReferenceType {
    pub table: String,
    pub column: String,
    pub sub_references: Vec<String>,
}

impl PartialEq for ReferenceType {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table && self.column == other.column
    }
}

impl EnumType {
    /// Duplicates are dropped, first occurrence order is kept. Nested enums and
    /// optionals in `base` are stripped to their raw type.
    pub fn new(base: ValueType, values: impl IntoIterator<Item = Value>) -> Result<Self, TypeError> {
        let base = base.raw().clone();
        let mut unique: Vec<Value> = vec![];
        for value in values {
            if !base.admits(&value) || value.is_none() {
                return Err(TypeError::InvalidEnumValue { base, value });
            }
            if !unique.contains(&value) {
                unique.push(value);
            }
        }
        Ok(Self {
            base: Box::new(base),
            values: Some(unique),
        })
    }

    pub fn open(base: ValueType) -> Self {
        Self {
            base: Box::new(base.raw().clone()),
            values: None,
        }
    }

    pub fn base(&self) -> &ValueType {
        &self.base
    }

    pub fn values(&self) -> Option<&[Value]> {
        self.values.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.values.is_none()
    }

    pub fn contains(&self, value: &Value) -> bool {
        match &self.values {
            Some(values) => values.contains(value),
            None => self.base.admits(value),
        }
    }

    /// `self ⊇ other` as sets, for enums over the same base.
    fn includes(&self, other: &EnumType) -> bool {
        match (&self.values, &other.values) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(mine), Some(theirs)) => theirs.iter().all(|value| mine.contains(value)),
        }
    }
}

/// Set equality.
impl PartialEq for EnumType {
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base && self.includes(other) && other.includes(self)
    }
}

impl Eq for EnumType {}

impl ClassType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            key: vec![],
        }
    }

    pub fn with_parent(mut self, parent: ClassType) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    pub fn with_key(mut self, key: Vec<(String, ValueType)>) -> Self {
        self.key = key;
        self
    }

    fn descends_from(&self, ancestor: &ClassType) -> bool {
        let mut current = Some(self);
        while let Some(class) = current {
            if class.name == ancestor.name {
                return true;
            }
            current = class.parent.as_deref();
        }
        false
    }
}

impl ReferenceType {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            sub_references: vec![],
        }
    }

    /// Every table the reference depends on: the target first, then the
    /// intermediate hops.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.table.as_str()).chain(self.sub_references.iter().map(String::as_str))
    }

    pub fn class_name(&self) -> String {
        to_pascal(&self.table)
    }
}

impl ValueType {
    /// `Optional(T)`, flattened: never wraps `None` or another `Optional`.
    pub fn optional(inner: ValueType) -> Self {
        match inner {
            ValueType::None | ValueType::Optional(_) => inner,
            inner => ValueType::Optional(Box::new(inner)),
        }
    }

    pub fn list(inner: ValueType) -> Self {
        ValueType::List(Box::new(inner))
    }

    pub fn iterable(inner: ValueType) -> Self {
        ValueType::Iterable(Box::new(inner))
    }

    pub fn dict(key: ValueType, value: ValueType) -> Self {
        ValueType::Dict(Box::new(key), Box::new(value))
    }

    pub fn enumeration(
        base: ValueType,
        values: impl IntoIterator<Item = Value>,
    ) -> Result<Self, TypeError> {
        Ok(ValueType::Enum(EnumType::new(base, values)?))
    }

    pub fn open_enum(base: ValueType) -> Self {
        ValueType::Enum(EnumType::open(base))
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, ValueType::Optional(_))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ValueType::None)
    }

    pub fn is_enum(&self) -> bool {
        matches!(self, ValueType::Enum(_))
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, ValueType::Reference(_))
    }

    pub fn is_text(&self) -> bool {
        matches!(self.raw(), ValueType::Str)
    }

    /// An enum with no value at all: no literal can be produced for it.
    pub fn is_uninhabited(&self) -> bool {
        match self {
            ValueType::Enum(enumeration) => enumeration.values().is_some_and(<[Value]>::is_empty),
            _ => false,
        }
    }

    /// Strips `Optional` and `Enum` wrappers.
    pub fn raw(&self) -> &ValueType {
        match self {
            ValueType::Optional(inner) => inner.raw(),
            ValueType::Enum(enumeration) => enumeration.base.raw(),
            other => other,
        }
    }

    /// Strips `Optional` only.
    pub fn non_optional(&self) -> &ValueType {
        match self {
            ValueType::Optional(inner) => inner,
            other => other,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumType> {
        match self.non_optional() {
            ValueType::Enum(enumeration) => Some(enumeration),
            _ => None,
        }
    }

    /// Whether a following operation can have its output narrowed by running
    /// it on every value this type admits.
    pub fn is_narrowable(&self) -> bool {
        match self {
            ValueType::None => true,
            ValueType::Enum(enumeration) => !enumeration.is_open(),
            ValueType::Optional(inner) => {
                matches!(inner.as_ref(), ValueType::Enum(enumeration) if !enumeration.is_open())
            }
            _ => false,
        }
    }

    /// Every value of a narrowable type, `None` last.
    pub fn candidate_values(&self) -> Vec<Value> {
        let mut candidates = vec![];
        if let Some(values) = self.as_enum().and_then(EnumType::values) {
            candidates.extend(values.iter().cloned());
        }
        if self.is_none() || self.is_optional() {
            candidates.push(Value::None);
        }
        candidates
    }

    /// `self ⊒ other`: a value of `other` may be used where `self` is expected.
    pub fn is_super_type(&self, other: &ValueType) -> bool {
        use ValueType as T;
        match (self, other) {
            (T::Any, _) => true,
            (T::Optional(_), T::None) => true,
            (T::Optional(mine), T::Optional(theirs)) => mine.is_super_type(theirs),
            (T::Optional(mine), theirs) => mine.is_super_type(theirs),
            (T::Enum(mine), T::Enum(theirs)) => {
                mine.base.is_super_type(&theirs.base) && mine.includes(theirs)
            }
            (T::Enum(_), _) => false,
            (mine, T::Enum(theirs)) => mine.is_super_type(&theirs.base),
            (T::Float, T::Int) => true,
            (T::Class(mine), T::Class(theirs)) => theirs.descends_from(mine),
            (T::Reference(mine), T::Reference(theirs)) => mine == theirs,
            (T::List(mine), T::List(theirs)) => mine.is_super_type(theirs),
            (T::Dict(mine_key, mine_value), T::Dict(their_key, their_value)) => {
                mine_key.is_super_type(their_key) && mine_value.is_super_type(their_value)
            }
            (T::Iterable(mine), T::Iterable(theirs) | T::List(theirs) | T::Dict(theirs, _)) => {
                mine.is_super_type(theirs)
            }
            (mine, theirs) => mine == theirs,
        }
    }

    /// Whether `value` is a literal of this type.
    pub fn admits(&self, value: &Value) -> bool {
        use ValueType as T;
        match (self, value) {
            (T::Any, _) => true,
            (T::None, Value::None) => true,
            (T::Optional(_), Value::None) => true,
            (T::Optional(inner), value) => inner.admits(value),
            (T::Int, Value::Int(_)) => true,
            (T::Float, Value::Float(_) | Value::Int(_)) => true,
            (T::Str, Value::Str(_)) => true,
            (T::Bytes, Value::Bytes(_)) => true,
            (T::DateTime, Value::DateTime(_)) => true,
            (T::Time, Value::Time(_)) => true,
            (T::Enum(enumeration), value) => enumeration.base.admits(value) && enumeration.contains(value),
            (T::Reference(_), Value::Str(_)) => true,
            (T::Class(class), Value::Row(row)) => class
                .key
                .iter()
                .all(|(name, value_type)| row.get(name).is_some_and(|v| value_type.admits(v))),
            (T::List(inner) | T::Iterable(inner), Value::List(items)) => items.iter().all(|v| inner.admits(v)),
            (T::Iterable(inner), Value::Dict(pairs)) => pairs.iter().all(|(k, _)| inner.admits(k)),
            (T::Dict(key, value_type), Value::Dict(pairs)) => pairs
                .iter()
                .all(|(k, v)| key.admits(k) && value_type.admits(v)),
            _ => false,
        }
    }

    /// Type annotation in the generated program. Records the imports the
    /// annotation needs.
    pub fn render(&self, imports: &mut Imports) -> String {
        match self {
            ValueType::Int => "int".into(),
            ValueType::Float => "float".into(),
            ValueType::Str => "str".into(),
            ValueType::Bytes => "bytes".into(),
            ValueType::DateTime => {
                imports.add("datetime", "datetime");
                "datetime".into()
            }
            ValueType::Time => {
                imports.add("datetime", "time");
                "time".into()
            }
            ValueType::None => "None".into(),
            ValueType::Optional(inner) => {
                imports.add("typing", "Optional");
                format!("Optional[{}]", inner.render(imports))
            }
            ValueType::Enum(enumeration) => match &enumeration.values {
                None => enumeration.base.render(imports),
                Some(values) if values.is_empty() => {
                    imports.add("typing", "NoReturn");
                    "NoReturn".into()
                }
                Some(values) => {
                    imports.add("typing", "Literal");
                    let values = values.iter().map(ToString::to_string).collect::<Vec<_>>();
                    format!("Literal[{}]", values.join(", "))
                }
            },
            ValueType::Class(class) => class.name.clone(),
            ValueType::Reference(reference) => reference.class_name(),
            ValueType::Iterable(inner) => {
                imports.add("typing", "Iterable");
                format!("Iterable[{}]", inner.render(imports))
            }
            ValueType::List(inner) => format!("list[{}]", inner.render(imports)),
            ValueType::Dict(key, value) => {
                format!("dict[{}, {}]", key.render(imports), value.render(imports))
            }
            ValueType::Any => {
                imports.add("typing", "Any");
                "Any".into()
            }
        }
    }

    /// Expression producing `value` in the generated program.
    pub fn render_literal(&self, value: &Value, imports: &mut Imports) -> Result<String, TypeError> {
        if self.is_uninhabited() {
            return Err(TypeError::EmptyEnum {
                base: self.raw().clone(),
            });
        }
        if matches!(self, ValueType::Any) {
            return Err(TypeError::NoLiteral(self.clone()));
        }
        if !self.admits(value) {
            return Err(TypeError::LiteralMismatch {
                value: value.clone(),
                value_type: self.clone(),
            });
        }
        let literal = match (self, value) {
            (_, Value::None) => "None".to_string(),
            (ValueType::Optional(inner), value) => inner.render_literal(value, imports)?,
            (ValueType::Enum(enumeration), value) => enumeration.base.render_literal(value, imports)?,
            (ValueType::Float, value) => float_literal(value.as_f64().unwrap_or_default()),
            (_, Value::Int(int)) => int.to_string(),
            (ValueType::Reference(reference), Value::Str(key)) => format!(
                "{}.constant({}={})",
                reference.class_name(),
                reference.column,
                string_literal(key)
            ),
            (_, Value::Str(string)) => string_literal(string),
            (_, Value::Bytes(bytes)) => bytes_literal(bytes),
            (_, Value::DateTime(_)) => {
                imports.add("datetime", "datetime");
                value.to_string()
            }
            (_, Value::Time(time)) => {
                imports.add("datetime", "time");
                format!(
                    "time(hour={}, minute={}, second={})",
                    time.hour(),
                    time.minute(),
                    time.second()
                )
            }
            (ValueType::List(inner) | ValueType::Iterable(inner), Value::List(items)) => {
                let items = items
                    .iter()
                    .map(|item| inner.render_literal(item, imports))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("[{}]", items.join(", "))
            }
            (ValueType::Iterable(inner), Value::Dict(pairs)) => {
                let items = pairs
                    .iter()
                    .map(|(key, _)| inner.render_literal(key, imports))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("[{}]", items.join(", "))
            }
            (ValueType::Dict(key_type, value_type), Value::Dict(pairs)) => {
                let pairs = pairs
                    .iter()
                    .map(|(key, value)| {
                        Ok(format!(
                            "{}: {}",
                            key_type.render_literal(key, imports)?,
                            value_type.render_literal(value, imports)?
                        ))
                    })
                    .collect::<Result<Vec<_>, TypeError>>()?;
                format!("{{{}}}", pairs.join(", "))
            }
            (ValueType::Class(class), Value::Row(row)) => {
                let mut fields = vec![];
                for (name, field_type) in &class.key {
                    let field = row.get(name).unwrap_or(&Value::None);
                    fields.push(format!("{name}={}", field_type.render_literal(field, imports)?));
                }
                format!("{}.constant({})", class.name, fields.join(", "))
            }
            (value_type, value) => {
                return Err(TypeError::LiteralMismatch {
                    value: value.clone(),
                    value_type: value_type.clone(),
                });
            }
        };
        Ok(literal)
    }

    /// The value a field of this type takes when nothing better is known.
    pub fn default_literal(&self) -> Result<Value, TypeError> {
        Ok(match self {
            ValueType::Int => Value::Int(0),
            ValueType::Float => Value::Float(0.0),
            ValueType::Str => Value::Str(String::new()),
            ValueType::Bytes => Value::Bytes(vec![]),
            ValueType::DateTime => Value::DateTime(
                NaiveDate::from_ymd_opt(1, 1, 1)
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
                    .unwrap_or_default(),
            ),
            ValueType::Time => Value::Time(NaiveTime::default()),
            ValueType::None | ValueType::Optional(_) => Value::None,
            ValueType::Enum(enumeration) => match &enumeration.values {
                Some(values) => values.first().cloned().ok_or_else(|| TypeError::EmptyEnum {
                    base: enumeration.base.as_ref().clone(),
                })?,
                None => enumeration.base.default_literal()?,
            },
            ValueType::Class(class) => {
                if class.key.is_empty() {
                    return Err(TypeError::NoDefault {
                        value_type: self.clone(),
                        reason: "class without primary key",
                    });
                }
                let mut row = BTreeMap::new();
                for (name, field_type) in &class.key {
                    row.insert(name.clone(), field_type.default_literal()?);
                }
                Value::Row(row)
            }
            ValueType::Reference(reference) => {
                if reference.column.is_empty() {
                    return Err(TypeError::NoDefault {
                        value_type: self.clone(),
                        reason: "reference without primary key",
                    });
                }
                Value::Str(String::new())
            }
            ValueType::Iterable(_) | ValueType::List(_) => Value::List(vec![]),
            ValueType::Dict(_, _) => Value::Dict(vec![]),
            ValueType::Any => {
                return Err(TypeError::NoDefault {
                    value_type: self.clone(),
                    reason: "no literal for Any",
                });
            }
        })
    }

    /// Coerces a textual token, as found in a schema default or a CSV field.
    pub fn parse_literal(&self, token: &str) -> Result<Value, TypeError> {
        let invalid = || TypeError::InvalidLiteral {
            token: token.to_string(),
            value_type: self.clone(),
        };
        Ok(match self {
            ValueType::Int => Value::Int(token.trim().parse().map_err(|_| invalid())?),
            ValueType::Float => Value::Float(token.trim().parse().map_err(|_| invalid())?),
            ValueType::Str => Value::Str(token.to_string()),
            ValueType::Bytes => Value::Bytes(token.as_bytes().to_vec()),
            ValueType::DateTime => Value::DateTime(parse_datetime(token.trim()).ok_or_else(invalid)?),
            ValueType::Time => Value::Time(
                NaiveTime::parse_from_str(token.trim(), TIME_FORMAT).map_err(|_| invalid())?,
            ),
            ValueType::None => match token {
                "None" => Value::None,
                _ => return Err(invalid()),
            },
            ValueType::Optional(inner) => match token {
                "None" => Value::None,
                token => inner.parse_literal(token)?,
            },
            ValueType::Enum(enumeration) => {
                let value = enumeration.base.parse_literal(token)?;
                if !enumeration.contains(&value) {
                    return Err(invalid());
                }
                value
            }
            ValueType::Reference(_) => Value::Str(token.to_string()),
            ValueType::List(_) | ValueType::Iterable(_) | ValueType::Dict(_, _) => {
                let json = serde_json::from_str(token).map_err(|_| invalid())?;
                self.literal_from_json(&json).map_err(|_| invalid())?
            }
            ValueType::Class(_) | ValueType::Any => return Err(invalid()),
        })
    }

    /// Literal stored in a profile document.
    pub fn literal_from_json(&self, json: &serde_json::Value) -> Result<Value, TypeError> {
        use serde_json::Value as Json;
        let invalid = || TypeError::InvalidLiteral {
            token: json.to_string(),
            value_type: self.clone(),
        };
        Ok(match (self, json) {
            (ValueType::None | ValueType::Optional(_), Json::Null) => Value::None,
            (ValueType::Optional(inner), json) => inner.literal_from_json(json)?,
            (ValueType::Int, Json::Number(number)) => Value::Int(number.as_i64().ok_or_else(invalid)?),
            (ValueType::Float, Json::Number(number)) => Value::Float(number.as_f64().ok_or_else(invalid)?),
            (ValueType::Str | ValueType::Reference(_), Json::String(string)) => Value::Str(string.clone()),
            (ValueType::Bytes, Json::String(string)) => Value::Bytes(string.as_bytes().to_vec()),
            (ValueType::Bytes, Json::Array(items)) => Value::Bytes(
                items
                    .iter()
                    .map(|item| item.as_u64().and_then(|byte| u8::try_from(byte).ok()))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(invalid)?,
            ),
            (ValueType::DateTime | ValueType::Time, Json::String(string)) => self.parse_literal(string)?,
            (ValueType::Enum(enumeration), json) => {
                let value = enumeration.base.literal_from_json(json)?;
                if !enumeration.contains(&value) {
                    return Err(invalid());
                }
                value
            }
            (ValueType::List(inner) | ValueType::Iterable(inner), Json::Array(items)) => Value::List(
                items
                    .iter()
                    .map(|item| inner.literal_from_json(item))
                    .collect::<Result<_, _>>()?,
            ),
            (ValueType::Dict(key, value), Json::Object(map)) => Value::Dict(
                map.iter()
                    .map(|(k, v)| Ok((key.parse_literal(k)?, value.literal_from_json(v)?)))
                    .collect::<Result<_, TypeError>>()?,
            ),
            (ValueType::Class(class), Json::Object(map)) => {
                let mut row = BTreeMap::new();
                for (name, field_type) in &class.key {
                    let field = map.get(name).ok_or_else(invalid)?;
                    row.insert(name.clone(), field_type.literal_from_json(field)?);
                }
                Value::Row(row)
            }
            _ => return Err(invalid()),
        })
    }
}

/// `YYYY-MM-DD HH:MM:SS`, or a bare date at midnight.
fn parse_datetime(token: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(token, DATETIME_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(token, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .filter(|datetime| datetime.year() > 0)
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut imports = Imports::default();
        write!(f, "{}", self.render(&mut imports))
    }
}
