use std::fmt;

use regex::Regex;
use serde::Serialize;

use super::SchemaError;
use crate::introspection::RawColumn;
use crate::types::{EnumType, ReferenceType, Value, ValueType};

/// Storage type of a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SqlType {
    Int { precision: Option<u32> },
    Float { precision: Option<u32> },
    Json,
    String { char_limit: Option<u32> },
    DateTime,
    Time,
    Blob { char_limit: Option<u32> },
    Enum { values: Vec<String> },
    /// A string column whose foreign key has been resolved.
    Reference(ReferenceType),
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let limit = |limit: &Option<u32>| limit.map_or("???".to_string(), |limit| limit.to_string());
        match self {
            SqlType::Int { precision } => write!(f, "int({})", limit(precision)),
            SqlType::Float { precision } => write!(f, "float({})", limit(precision)),
            SqlType::Json => write!(f, "json"),
            SqlType::String { char_limit } => write!(f, "varchar({})", limit(char_limit)),
            SqlType::DateTime => write!(f, "datetime"),
            SqlType::Time => write!(f, "time"),
            SqlType::Blob { char_limit } => write!(f, "blob({})", limit(char_limit)),
            SqlType::Enum { values } => write!(f, "enum({})", values.join(", ")),
            SqlType::Reference(reference) => {
                write!(f, "reference({}.{}", reference.table, reference.column)?;
                for hop in &reference.sub_references {
                    write!(f, " via {hop}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl SqlType {
    pub fn from_raw(column: &RawColumn) -> Result<Self, SchemaError> {
        let precision = column.precision.and_then(|p| u32::try_from(p).ok());
        let char_limit = column.char_limit.and_then(|l| u32::try_from(l).ok());
        Ok(match column.data_type.to_ascii_lowercase().as_str() {
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" => {
                Self::Int { precision }
            }
            "float" | "double" | "real" | "decimal" | "numeric" => Self::Float { precision },
            "json" => Self::Json,
            "char" | "varchar" | "tinytext" | "text" | "mediumtext" | "longtext" => {
                Self::String { char_limit }
            }
            "date" | "datetime" | "timestamp" => Self::DateTime,
            "time" => Self::Time,
            "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
                Self::Blob { char_limit }
            }
            "enum" => Self::Enum {
                values: enum_values(&column.column_type)?,
            },
            _ => Err(SchemaError::UnknownDataType {
                table: column.table.clone(),
                column: column.column.clone(),
                data_type: column.data_type.clone(),
            })?,
        })
    }

    pub fn is_string(&self) -> bool {
        matches!(self, SqlType::String { .. })
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, SqlType::Reference(_))
    }

    pub fn as_reference(&self) -> Option<&ReferenceType> {
        match self {
            SqlType::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            SqlType::Int { .. } => ValueType::Int,
            SqlType::Float { .. } => ValueType::Float,
            SqlType::Json | SqlType::String { .. } => ValueType::Str,
            SqlType::DateTime => ValueType::DateTime,
            SqlType::Time => ValueType::Time,
            SqlType::Blob { .. } => ValueType::Bytes,
            SqlType::Enum { values } => ValueType::Enum(
                EnumType::new(ValueType::Str, values.iter().cloned().map(Value::Str))
                    .unwrap_or_else(|_| EnumType::open(ValueType::Str)),
            ),
            SqlType::Reference(reference) => ValueType::Reference(reference.clone()),
        }
    }

    /// Expression suffix turning a field into what the connector accepts.
    /// References are stored through the primary key of the referenced object.
    pub fn sql_value_accessor(&self) -> Option<String> {
        self.as_reference().map(|reference| format!(".{}", reference.column))
    }
}

/// `enum('a','b''c')` gives `["a", "b'c"]`.
pub fn enum_values(column_type: &str) -> Result<Vec<String>, regex::Error> {
    let value_pattern = Regex::new(r"'((?:[^']|'')*)'")?;
    Ok(value_pattern
        .captures_iter(column_type)
        .filter_map(|captures| captures.get(1))
        .map(|value| value.as_str().replace("''", "'"))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(data_type: &str, column_type: &str) -> RawColumn {
        RawColumn {
            table: "t".into(),
            column: "c".into(),
            nullable: false,
            data_type: data_type.into(),
            column_type: column_type.into(),
            char_limit: Some(45),
            precision: Some(10),
            default: None,
        }
    }

    #[test]
    fn maps_known_data_types() {
        assert_eq!(
            SqlType::from_raw(&raw("varchar", "varchar(45)")).unwrap(),
            SqlType::String { char_limit: Some(45) }
        );
        assert_eq!(
            SqlType::from_raw(&raw("INT", "int")).unwrap(),
            SqlType::Int { precision: Some(10) }
        );
        assert_eq!(SqlType::from_raw(&raw("time", "time")).unwrap(), SqlType::Time);
        assert_eq!(
            SqlType::from_raw(&raw("enum", "enum('M','F')")).unwrap(),
            SqlType::Enum {
                values: vec!["M".into(), "F".into()]
            }
        );
    }

    #[test]
    fn unknown_data_type_fails_closed() {
        let err = SqlType::from_raw(&raw("geometry", "geometry")).unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnknownDataType {
                table: "t".into(),
                column: "c".into(),
                data_type: "geometry".into(),
            }
        );
    }

    #[test]
    fn enum_values_unescape_quotes() {
        assert_eq!(enum_values("enum('a','b''c','')").unwrap(), vec!["a", "b'c", ""]);
    }

    #[test]
    fn value_types() {
        assert_eq!(SqlType::Json.value_type(), ValueType::Str);
        assert_eq!(SqlType::Blob { char_limit: None }.value_type(), ValueType::Bytes);
        let sex = SqlType::Enum {
            values: vec!["M".into(), "F".into()],
        };
        assert_eq!(
            sex.value_type(),
            ValueType::enumeration(ValueType::Str, [Value::str("F"), Value::str("M")]).unwrap()
        );
    }
}
