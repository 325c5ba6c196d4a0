//! In-process identity cache of imported rows.
//!
//! Behaves like the `Entries` class of the generated program: `make` returns
//! the entry already cached when any equality constraint of the table matches,
//! and caches the new row otherwise. Tables without equality constraint never
//! merge rows.

use std::collections::HashMap;

use indexmap::IndexMap;
use thiserror::Error;

use crate::schema::{Schema, SchemaError, Semantics, Table};
use crate::types::{TypeError, Value, ValueType};

/// Column name to value, in declaration order.
pub type Row = IndexMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EntryError {
    #[error("no value for {table}.{column}")]
    MissingField { table: String, column: String },
    #[error("{value} is not a valid {value_type} for {table}.{column}")]
    InvalidValue {
        table: String,
        column: String,
        value: Value,
        value_type: ValueType,
    },
    #[error("{table}.{column} has no default: {source}")]
    NoDefault {
        table: String,
        column: String,
        source: TypeError,
    },
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Position of an entry in the cache of its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(pub usize);

#[derive(Debug, Clone)]
struct TableEntries {
    table: Table,
    rows: Vec<Row>,
    /// One lookup per equality constraint: constraint columns, then values to entry.
    indexes: Vec<(Vec<String>, HashMap<Vec<Value>, usize>)>,
}

impl TableEntries {
    fn new(table: Table, semantics: &Semantics) -> Self {
        let indexes = table
            .equality_constraints(semantics)
            .into_iter()
            .map(|constraint| (constraint.columns.clone(), HashMap::new()))
            .collect();
        Self {
            table,
            rows: vec![],
            indexes,
        }
    }

    fn find(&self, row: &Row) -> Option<usize> {
        self.indexes
            .iter()
            .find_map(|(columns, index)| index.get(&key(columns, row)).copied())
    }

    fn insert(&mut self, row: Row) -> usize {
        let id = self.rows.len();
        for (columns, index) in &mut self.indexes {
            index.entry(key(columns, &row)).or_insert(id);
        }
        self.rows.push(row);
        id
    }
}

fn key(columns: &[String], row: &Row) -> Vec<Value> {
    columns
        .iter()
        .map(|column| row.get(column).cloned().unwrap_or(Value::None))
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct Entries {
    semantics: Semantics,
    tables: IndexMap<String, TableEntries>,
}

impl Entries {
    pub fn new<'a>(tables: impl IntoIterator<Item = &'a Table>, semantics: Semantics) -> Self {
        Self {
            semantics,
            tables: tables
                .into_iter()
                .map(|table| (table.name.clone(), TableEntries::new(table.clone(), &semantics)))
                .collect(),
        }
    }

    pub fn for_schema(schema: &Schema, semantics: Semantics) -> Self {
        Self::new(schema.tables.values(), semantics)
    }

    fn table_entries(&self, table: &str) -> Result<&TableEntries, SchemaError> {
        self.tables.get(table).ok_or_else(|| SchemaError::UnknownTable {
            table: table.to_string(),
        })
    }

    /// Completes `fields` with column defaults, checks every value against its
    /// column and returns the matching cached entry, or caches a new one.
    pub fn make(&mut self, table: &str, mut fields: Row) -> Result<EntryId, EntryError> {
        let semantics = self.semantics;
        let entries = self.table_entries(table)?;
        let mut row = Row::with_capacity(entries.table.columns.len());
        for column in entries.table.columns.values() {
            let value = match fields.shift_remove(&column.name) {
                Some(value) => value,
                None => column
                    .field_default(&semantics)
                    .ok_or_else(|| EntryError::MissingField {
                        table: table.to_string(),
                        column: column.name.clone(),
                    })?,
            };
            let value_type = column.make_type();
            if !value_type.admits(&value) {
                return Err(EntryError::InvalidValue {
                    table: table.to_string(),
                    column: column.name.clone(),
                    value,
                    value_type,
                });
            }
            row.insert(column.name.clone(), value);
        }
        if let Some(extra) = fields.keys().next() {
            return Err(EntryError::Schema(SchemaError::UnknownColumn {
                table: table.to_string(),
                column: extra.clone(),
            }));
        }
        if let Some(id) = entries.find(&row) {
            return Ok(EntryId(id));
        }
        let entries = self
            .tables
            .get_mut(table)
            .ok_or_else(|| SchemaError::UnknownTable {
                table: table.to_string(),
            })?;
        Ok(EntryId(entries.insert(row)))
    }

    /// Fixed row built from its primary key, every other column at its
    /// constant value. Constant rows are not cached.
    pub fn constant(table: &Table, mut key: Row) -> Result<Row, EntryError> {
        let primary = table.primary_columns()?;
        let mut row = Row::with_capacity(table.columns.len());
        for column in table.columns.values() {
            let value_type = column.make_type();
            let value = if primary.contains(&column.name) {
                key.shift_remove(&column.name).ok_or_else(|| EntryError::MissingField {
                    table: table.name.clone(),
                    column: column.name.clone(),
                })?
            } else {
                column
                    .constant_value()
                    .map_err(|source| EntryError::NoDefault {
                        table: table.name.clone(),
                        column: column.name.clone(),
                        source,
                    })?
            };
            if !value_type.admits(&value) {
                return Err(EntryError::InvalidValue {
                    table: table.name.clone(),
                    column: column.name.clone(),
                    value,
                    value_type,
                });
            }
            row.insert(column.name.clone(), value);
        }
        Ok(row)
    }

    pub fn get(&self, table: &str, id: EntryId) -> Option<&Row> {
        self.tables.get(table)?.rows.get(id.0)
    }

    pub fn rows(&self, table: &str) -> &[Row] {
        self.tables.get(table).map_or(&[], |entries| entries.rows.as_slice())
    }

    pub fn len(&self, table: &str) -> usize {
        self.rows(table).len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(|entries| entries.rows.is_empty())
    }

    /// Cached rows per table, in the order the tables were given.
    pub fn counts(&self) -> impl Iterator<Item = (&str, usize)> {
        self.tables
            .iter()
            .map(|(name, entries)| (name.as_str(), entries.rows.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnDefault, SqlType, UniqueConstraint};

    fn varchar() -> SqlType {
        SqlType::String { char_limit: Some(45) }
    }

    /// `person(id, email unique, name, nick?, score = 0)`.
    fn person() -> Table {
        let mut table = Table::new("person");
        table.add_column(Column::new("id", varchar(), false)).unwrap();
        table.add_column(Column::new("email", varchar(), false)).unwrap();
        table.add_column(Column::new("name", varchar(), false)).unwrap();
        table.add_column(Column::new("nick", varchar(), true)).unwrap();
        table
            .add_column(
                Column::new("score", SqlType::Int { precision: None }, false)
                    .with_default(ColumnDefault::Literal(Value::Int(0))),
            )
            .unwrap();
        table.set_primary(UniqueConstraint::new(["id"])).unwrap();
        table.add_unique(UniqueConstraint::new(["email"])).unwrap();
        table
    }

    fn row(fields: &[(&str, Value)]) -> Row {
        fields
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let table = person();
        let mut entries = Entries::new([&table], Semantics::default());
        let id = entries
            .make(
                "person",
                row(&[
                    ("id", Value::str("1")),
                    ("email", Value::str("a@x")),
                    ("name", Value::str("Ann")),
                ]),
            )
            .unwrap();
        let stored = entries.get("person", id).unwrap();
        assert_eq!(stored["nick"], Value::None);
        assert_eq!(stored["score"], Value::Int(0));
        assert_eq!(stored.keys().collect::<Vec<_>>(), vec!["id", "email", "name", "nick", "score"]);
    }

    #[test]
    fn any_matching_constraint_merges_entries() {
        let table = person();
        let mut entries = Entries::new([&table], Semantics::default());
        let ann = |id: &str, email: &str| {
            row(&[
                ("id", Value::str(id)),
                ("email", Value::str(email)),
                ("name", Value::str("Ann")),
            ])
        };
        let first = entries.make("person", ann("1", "a@x")).unwrap();
        assert_eq!(entries.make("person", ann("2", "a@x")).unwrap(), first);
        assert_eq!(entries.make("person", ann("1", "b@x")).unwrap(), first);
        let other = entries.make("person", ann("3", "c@x")).unwrap();
        assert_ne!(other, first);
        assert_eq!(entries.len("person"), 2);
        assert_eq!(entries.counts().collect::<Vec<_>>(), vec![("person", 2)]);
    }

    #[test]
    fn primary_key_can_stay_out_of_equality() {
        let table = person();
        let semantics = Semantics {
            use_primary_key_in_equality: false,
            ..Semantics::default()
        };
        let mut entries = Entries::new([&table], semantics);
        let ann = |id: &str, email: &str| {
            row(&[
                ("id", Value::str(id)),
                ("email", Value::str(email)),
                ("name", Value::str("Ann")),
            ])
        };
        entries.make("person", ann("1", "a@x")).unwrap();
        entries.make("person", ann("1", "b@x")).unwrap();
        assert_eq!(entries.len("person"), 2);
    }

    #[test]
    fn tables_without_constraint_never_merge() {
        let mut log = Table::new("log");
        log.add_column(Column::new("line", varchar(), false)).unwrap();
        let mut entries = Entries::new([&log], Semantics::default());
        let line = || row(&[("line", Value::str("same"))]);
        assert_ne!(entries.make("log", line()).unwrap(), entries.make("log", line()).unwrap());
    }

    #[test]
    fn fields_are_checked() {
        let table = person();
        let semantics = Semantics {
            default_value_for_optional_column: false,
            ..Semantics::default()
        };
        let mut entries = Entries::new([&table], semantics);
        let missing_nick = row(&[
            ("id", Value::str("1")),
            ("email", Value::str("a@x")),
            ("name", Value::str("Ann")),
        ]);
        assert_eq!(
            entries.make("person", missing_nick.clone()),
            Err(EntryError::MissingField {
                table: "person".into(),
                column: "nick".into(),
            })
        );
        let mut wrong_score = missing_nick.clone();
        wrong_score.insert("nick".into(), Value::None);
        wrong_score.insert("score".into(), Value::str("high"));
        assert!(matches!(
            entries.make("person", wrong_score),
            Err(EntryError::InvalidValue { column, .. }) if column == "score"
        ));
        let mut extra = missing_nick;
        extra.insert("nick".into(), Value::None);
        extra.insert("age".into(), Value::Int(3));
        assert!(matches!(
            entries.make("person", extra),
            Err(EntryError::Schema(SchemaError::UnknownColumn { column, .. })) if column == "age"
        ));
        assert!(entries.is_empty());
    }

    #[test]
    fn constants_are_built_from_their_key() {
        let table = person();
        let constant = Entries::constant(&table, row(&[("id", Value::str("ADMIN"))])).unwrap();
        assert_eq!(constant["id"], Value::str("ADMIN"));
        assert_eq!(constant["email"], Value::str(""));
        assert_eq!(constant["nick"], Value::None);
        assert_eq!(constant["score"], Value::Int(0));
        assert!(matches!(
            Entries::constant(&table, Row::new()),
            Err(EntryError::MissingField { .. })
        ));
    }
}
