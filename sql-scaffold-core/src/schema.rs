//! Tables, columns and constraints of an introspected schema.
//!
//! A [`Schema`] is built once from the raw introspection records. Building it
//! resolves every foreign key into a [`ReferenceType`], following chains of
//! references down to the primary key they finally point at, after which the
//! schema is never mutated again.

pub mod graph;
pub mod sql_type;

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub use graph::{CyclicGraph, Graph};
pub use sql_type::SqlType;

use crate::introspection::{RawColumn, RawKeyUsage, RawSchema};
use crate::script::python::to_pascal;
use crate::types::{ClassType, ReferenceType, TypeError, Value, ValueType};

/// Base class of every generated table class.
pub const SQL_OBJECT: &str = "SqlObject";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("unknown data type '{data_type}' for {table}.{column}")]
    UnknownDataType {
        table: String,
        column: String,
        data_type: String,
    },
    #[error("invalid column type pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    #[error("foreign key {constraint} on {table}.{column} is not supported: {reason}")]
    UnsupportedForeignKey {
        constraint: String,
        table: String,
        column: String,
        reason: &'static str,
    },
    #[error("foreign keys could not be resolved: {}", constraints.join(", "))]
    UnresolvedForeignKeys { constraints: Vec<String> },
    #[error("foreign key {constraint} on {table}.{column} has a default value")]
    ForeignKeyWithDefault {
        constraint: String,
        table: String,
        column: String,
    },
    #[error("column {column} is declared twice in {table}")]
    DuplicateColumn { table: String, column: String },
    #[error("{table} already has a primary key")]
    DuplicatePrimary { table: String },
    #[error("no primary key in {table}")]
    MissingPrimary { table: String },
    #[error("unknown table {table}")]
    UnknownTable { table: String },
    #[error("no column {column} in {table}")]
    UnknownColumn { table: String, column: String },
    #[error("tables depend on each other: {}", tables.join(", "))]
    CyclicDependency { tables: Vec<String> },
}

/// Equality toggles of the generated objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Semantics {
    /// The primary key counts as one more unique constraint.
    pub use_primary_key_in_equality: bool,
    /// Optional columns without a server default may be omitted, they are then `None`.
    pub default_value_for_optional_column: bool,
}

impl Default for Semantics {
    fn default() -> Self {
        Self {
            use_primary_key_in_equality: true,
            default_value_for_optional_column: true,
        }
    }
}

/// Default value of a column as declared by the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnDefault {
    Literal(Value),
    /// Computed by the server, e.g. `CURRENT_TIMESTAMP`.
    Expression(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub data_type: SqlType,
    pub optional: bool,
    pub default: Option<ColumnDefault>,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: SqlType, optional: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            optional,
            default: None,
        }
    }

    pub fn with_default(mut self, default: ColumnDefault) -> Self {
        self.default = Some(default);
        self
    }

    pub fn from_raw(raw: &RawColumn) -> Result<Self, SchemaError> {
        let data_type = SqlType::from_raw(raw)?;
        let default = raw.default.as_ref().map(|token| {
            match data_type.value_type().parse_literal(token) {
                Ok(value) => ColumnDefault::Literal(value),
                Err(err) => {
                    warn!(
                        "default of {}.{} is computed by the server ({err})",
                        raw.table, raw.column
                    );
                    ColumnDefault::Expression(token.clone())
                }
            }
        });
        Ok(Self {
            name: raw.column.clone(),
            data_type,
            optional: raw.nullable,
            default,
        })
    }

    pub fn is_defaulted(&self) -> bool {
        self.default.is_some()
    }

    pub fn is_reference(&self) -> bool {
        self.data_type.is_reference()
    }

    /// Type of the field holding this column: the storage type, optional when
    /// the column may be left out.
    pub fn make_type(&self) -> ValueType {
        let value_type = self.data_type.value_type();
        if self.optional || self.is_defaulted() {
            ValueType::optional(value_type)
        } else {
            value_type
        }
    }

    /// Value a field takes when the caller does not provide one, `None` when
    /// the field is mandatory.
    pub fn field_default(&self, semantics: &Semantics) -> Option<Value> {
        match &self.default {
            Some(ColumnDefault::Literal(value)) => Some(value.clone()),
            Some(ColumnDefault::Expression(_)) => Some(Value::None),
            None if self.optional && semantics.default_value_for_optional_column => Some(Value::None),
            None => None,
        }
    }

    /// Value of the column in a constant object: its literal default, or the
    /// default literal of its type.
    pub fn constant_value(&self) -> Result<Value, TypeError> {
        match &self.default {
            Some(ColumnDefault::Literal(value)) => Ok(value.clone()),
            _ => self.make_type().default_literal(),
        }
    }

    /// Expression passed to the connector for the field `field`.
    pub fn sql_value(&self, field: &str) -> String {
        match self.data_type.sql_value_accessor() {
            Some(accessor) if self.optional => {
                format!("{field}{accessor} if {field} is not None else None")
            }
            Some(accessor) => format!("{field}{accessor}"),
            None => field.to_string(),
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.data_type)?;
        if self.optional {
            write!(f, "?")?;
        }
        match &self.default {
            Some(ColumnDefault::Literal(value)) => write!(f, " = {value}"),
            Some(ColumnDefault::Expression(expression)) => write!(f, " = <{expression}>"),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UniqueConstraint {
    pub columns: Vec<String>,
}

impl UniqueConstraint {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.iter().any(|name| name == column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub constraint: String,
    pub table: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub name: String,
    pub columns: IndexMap<String, Column>,
    pub unique: Vec<UniqueConstraint>,
    pub primary: Option<UniqueConstraint>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: IndexMap::new(),
            unique: vec![],
            primary: None,
        }
    }

    pub fn add_column(&mut self, column: Column) -> Result<(), SchemaError> {
        if self.columns.contains_key(&column.name) {
            return Err(SchemaError::DuplicateColumn {
                table: self.name.clone(),
                column: column.name,
            });
        }
        self.columns.insert(column.name.clone(), column);
        Ok(())
    }

    pub fn column(&self, name: &str) -> Result<&Column, SchemaError> {
        self.columns.get(name).ok_or_else(|| SchemaError::UnknownColumn {
            table: self.name.clone(),
            column: name.to_string(),
        })
    }

    pub fn add_unique(&mut self, constraint: UniqueConstraint) -> Result<(), SchemaError> {
        for column in &constraint.columns {
            self.column(column)?;
        }
        self.unique.push(constraint);
        Ok(())
    }

    pub fn set_primary(&mut self, constraint: UniqueConstraint) -> Result<(), SchemaError> {
        if self.primary.is_some() {
            return Err(SchemaError::DuplicatePrimary {
                table: self.name.clone(),
            });
        }
        for column in &constraint.columns {
            self.column(column)?;
        }
        self.primary = Some(constraint);
        Ok(())
    }

    pub fn primary_columns(&self) -> Result<&[String], SchemaError> {
        self.primary
            .as_ref()
            .map(|primary| primary.columns.as_slice())
            .ok_or_else(|| SchemaError::MissingPrimary {
                table: self.name.clone(),
            })
    }

    pub fn is_in_primary(&self, column: &str) -> bool {
        self.primary.as_ref().is_some_and(|primary| primary.contains(column))
    }

    /// Whether `column` belongs to a unique constraint or to the primary key.
    pub fn is_in_unique(&self, column: &str) -> bool {
        self.is_in_primary(column) || self.unique.iter().any(|unique| unique.contains(column))
    }

    /// Primary key first, then mandatory, optional, defaulted optional and
    /// defaulted columns. Declaration order is kept inside each group.
    pub fn sorted_columns(&self) -> Vec<&Column> {
        let rank = |column: &Column| match (
            self.is_in_primary(&column.name),
            column.is_defaulted(),
            column.optional,
        ) {
            (true, _, _) => 0,
            (false, false, false) => 1,
            (false, false, true) => 2,
            (false, true, true) => 3,
            (false, true, false) => 4,
        };
        let mut columns = self.columns.values().collect::<Vec<_>>();
        columns.sort_by_key(|column| rank(column));
        columns
    }

    /// Constraints deciding whether two objects of the table are the same
    /// entry. Constraints over the same columns are listed once.
    pub fn equality_constraints(&self, semantics: &Semantics) -> Vec<&UniqueConstraint> {
        let mut constraints: Vec<&UniqueConstraint> = vec![];
        let primary = self
            .primary
            .as_ref()
            .filter(|_| semantics.use_primary_key_in_equality);
        for constraint in self.unique.iter().chain(primary) {
            if !constraints.iter().any(|known| known.columns == constraint.columns) {
                constraints.push(constraint);
            }
        }
        constraints
    }

    /// Columns shared by every equality constraint, in declaration order.
    /// Empty when there is no constraint at all.
    pub fn hash_columns(&self, semantics: &Semantics) -> Vec<&str> {
        let constraints = self.equality_constraints(semantics);
        if constraints.is_empty() {
            return vec![];
        }
        self.columns
            .keys()
            .filter(|name| constraints.iter().all(|constraint| constraint.contains(name)))
            .map(String::as_str)
            .collect()
    }

    pub fn references(&self) -> impl Iterator<Item = (&Column, &ReferenceType)> {
        self.columns
            .values()
            .filter_map(|column| column.data_type.as_reference().map(|reference| (column, reference)))
    }

    /// Tables this one points at through mandatory columns.
    pub fn required_dependencies(&self) -> Vec<&str> {
        self.dependencies(|column| !column.optional)
    }

    /// Tables this one points at through nullable columns.
    pub fn optional_dependencies(&self) -> Vec<&str> {
        self.dependencies(|column| column.optional)
    }

    fn dependencies(&self, keep: impl Fn(&Column) -> bool) -> Vec<&str> {
        let mut tables: Vec<&str> = vec![];
        for (column, reference) in self.references() {
            if !keep(column) {
                continue;
            }
            for table in reference.tables() {
                if !tables.contains(&table) {
                    tables.push(table);
                }
            }
        }
        tables
    }

    pub fn class_name(&self) -> String {
        to_pascal(&self.name)
    }

    /// Generated class of the table. Its key, the arguments of `constant`, is
    /// the primary key.
    pub fn class_type(&self) -> ClassType {
        let key = self
            .primary
            .iter()
            .flat_map(|primary| &primary.columns)
            .filter_map(|name| self.columns.get(name))
            .map(|column| (column.name.clone(), column.make_type()))
            .collect();
        ClassType::new(self.class_name())
            .with_parent(ClassType::new(SQL_OBJECT))
            .with_key(key)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let banner = "#".repeat(self.name.len() + 8);
        writeln!(f, "{banner}")?;
        writeln!(f, "##  {}  ##", self.name)?;
        writeln!(f, "{banner}")?;
        for column in self.columns.values() {
            let marker = if self.is_in_primary(&column.name) { "[PK]" } else { "    " };
            writeln!(f, "   {marker} - {column}")?;
        }
        writeln!(f)?;
        for unique in &self.unique {
            writeln!(f, "unique({})", unique.columns.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Schema {
    pub tables: IndexMap<String, Table>,
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for table in self.tables.values() {
            writeln!(f, "{table}")?;
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Groups key usage rows by constraint, keeping the order of first sight.
fn group_key_usages(rows: &[RawKeyUsage]) -> IndexMap<(&str, &str, Option<&str>), Vec<&RawKeyUsage>> {
    let mut groups: IndexMap<(&str, &str, Option<&str>), Vec<&RawKeyUsage>> = IndexMap::new();
    for row in rows {
        groups
            .entry((
                row.constraint.as_str(),
                row.table.as_str(),
                row.referenced_table.as_deref(),
            ))
            .or_default()
            .push(row);
    }
    groups
}

/// One column of a foreign key waiting to be resolved.
#[derive(Debug, Clone)]
struct PendingReference<'a> {
    constraint: &'a str,
    table: &'a str,
    column: &'a str,
    referenced_table: &'a str,
    referenced_column: &'a str,
}

impl Schema {
    pub fn from_raw(raw: &RawSchema) -> Result<Self, SchemaError> {
        let mut schema = Schema::default();
        for table in &raw.tables {
            schema.tables.insert(table.clone(), Table::new(table.clone()));
        }
        for column in &raw.columns {
            schema
                .table_mut(&column.table)?
                .add_column(Column::from_raw(column)?)?;
        }
        for ((_, table, _), rows) in group_key_usages(&raw.unique) {
            let constraint = UniqueConstraint::new(rows.iter().map(|row| row.column.clone()));
            schema.table_mut(table)?.add_unique(constraint)?;
        }
        for ((_, table, _), rows) in group_key_usages(&raw.primary) {
            let constraint = UniqueConstraint::new(rows.iter().map(|row| row.column.clone()));
            schema.table_mut(table)?.set_primary(constraint)?;
        }
        let foreign_keys = group_key_usages(&raw.foreign)
            .into_iter()
            .map(|((constraint, table, referenced_table), rows)| ForeignKey {
                constraint: constraint.to_string(),
                table: table.to_string(),
                columns: rows.iter().map(|row| row.column.clone()).collect(),
                referenced_table: referenced_table.unwrap_or_default().to_string(),
                referenced_columns: rows
                    .iter()
                    .map(|row| row.referenced_column.clone().unwrap_or_default())
                    .collect(),
            })
            .collect::<Vec<_>>();
        schema.resolve_foreign_keys(&foreign_keys)?;
        Ok(schema)
    }

    pub fn table(&self, name: &str) -> Result<&Table, SchemaError> {
        self.tables.get(name).ok_or_else(|| SchemaError::UnknownTable {
            table: name.to_string(),
        })
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut Table, SchemaError> {
        self.tables.get_mut(name).ok_or_else(|| SchemaError::UnknownTable {
            table: name.to_string(),
        })
    }

    pub fn add_table(&mut self, table: Table) {
        self.tables.insert(table.name.clone(), table);
    }

    fn column(&self, table: &str, column: &str) -> Result<&Column, SchemaError> {
        self.table(table)?.column(column)
    }

    /// Turns every foreign-key column into a reference, repeating passes until
    /// nothing is left. A column pointing at another reference waits for it,
    /// then extends its hop list with the table it went through.
    pub fn resolve_foreign_keys(&mut self, foreign_keys: &[ForeignKey]) -> Result<(), SchemaError> {
        let mut pending: Vec<PendingReference<'_>> = vec![];
        for key in foreign_keys {
            self.table(&key.referenced_table)?;
            for (column, referenced_column) in key.columns.iter().zip(&key.referenced_columns) {
                let source = self.column(&key.table, column)?;
                self.column(&key.referenced_table, referenced_column)?;
                if source.is_reference() {
                    continue;
                }
                if source.is_defaulted() {
                    return Err(SchemaError::ForeignKeyWithDefault {
                        constraint: key.constraint.clone(),
                        table: key.table.clone(),
                        column: column.clone(),
                    });
                }
                if !source.data_type.is_string() {
                    return Err(SchemaError::UnsupportedForeignKey {
                        constraint: key.constraint.clone(),
                        table: key.table.clone(),
                        column: column.clone(),
                        reason: "referencing column is not a string",
                    });
                }
                pending.push(PendingReference {
                    constraint: &key.constraint,
                    table: &key.table,
                    column,
                    referenced_table: &key.referenced_table,
                    referenced_column,
                });
            }
        }

        let mut pass = 0;
        while !pending.is_empty() {
            pass += 1;
            let before = pending.len();
            let mut index = 0;
            while index < pending.len() {
                let current = pending[index].clone();
                if self.column(current.table, current.column)?.is_reference() {
                    pending.remove(index);
                    continue;
                }
                let waits_on_other = pending.iter().any(|other| {
                    other.table == current.referenced_table && other.column == current.referenced_column
                });
                let resolved = match self.resolve_one(&current)? {
                    Some(reference) => reference,
                    None if waits_on_other => {
                        index += 1;
                        continue;
                    }
                    None => {
                        let target = self.table(current.referenced_table)?;
                        let targets_primary = target
                            .primary
                            .as_ref()
                            .is_some_and(|primary| primary.columns == [current.referenced_column]);
                        let reason = if targets_primary {
                            "referenced primary key is not a string"
                        } else {
                            "referenced column is neither a single-column primary key nor a reference"
                        };
                        return Err(SchemaError::UnsupportedForeignKey {
                            constraint: current.constraint.to_string(),
                            table: current.table.to_string(),
                            column: current.column.to_string(),
                            reason,
                        });
                    }
                };
                pending.remove(index);
                if let Some(column) = self.table_mut(current.table)?.columns.get_mut(current.column) {
                    column.data_type = SqlType::Reference(resolved);
                }
            }
            debug!(
                "foreign key pass {pass}: {} resolved, {} pending",
                before - pending.len(),
                pending.len()
            );
            if pending.len() == before {
                let mut constraints = pending
                    .iter()
                    .map(|reference| reference.constraint.to_string())
                    .collect::<Vec<_>>();
                constraints.dedup();
                return Err(SchemaError::UnresolvedForeignKeys { constraints });
            }
        }
        Ok(())
    }

    /// The reference `pending` resolves to, when its target is final.
    fn resolve_one(&self, pending: &PendingReference<'_>) -> Result<Option<ReferenceType>, SchemaError> {
        let target_table = self.table(pending.referenced_table)?;
        let target = target_table.column(pending.referenced_column)?;
        if let Some(reference) = target.data_type.as_reference() {
            let mut resolved = reference.clone();
            resolved.sub_references.push(pending.referenced_table.to_string());
            return Ok(Some(resolved));
        }
        let single_primary = target_table
            .primary
            .as_ref()
            .is_some_and(|primary| primary.columns == [pending.referenced_column]);
        if single_primary && target.data_type.is_string() {
            return Ok(Some(ReferenceType::new(
                pending.referenced_table,
                pending.referenced_column,
            )));
        }
        Ok(None)
    }

    /// Edges go from a table to every table its references depend on.
    pub fn dependency_graph(&self) -> Graph<String> {
        let mut graph = Graph::new();
        for table in self.tables.values() {
            graph.add_node(table.name.clone());
            for (_, reference) in table.references() {
                for target in reference.tables() {
                    graph.add_edge(table.name.clone(), target.to_string());
                }
            }
        }
        graph
    }

    /// Tables ordered so that every table comes after the tables it references.
    pub fn generation_order(&self) -> Result<Vec<String>, SchemaError> {
        self.dependency_graph()
            .sink_to_source()
            .map_err(|err| SchemaError::CyclicDependency {
                tables: err.remaining,
            })
    }

    /// `seeds` and every table they depend on, directly or not.
    pub fn reachable_tables<'a>(
        &self,
        seeds: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<String>, SchemaError> {
        let seeds = seeds
            .into_iter()
            .map(|seed| self.table(seed).map(|table| table.name.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.dependency_graph().reachable_from(seeds, |_, _| true))
    }

    /// Copy of the schema restricted to the tables reachable from `seeds`.
    pub fn filter<'a>(&self, seeds: impl IntoIterator<Item = &'a str>) -> Result<Schema, SchemaError> {
        let reachable = self.reachable_tables(seeds)?;
        Ok(Schema {
            tables: self
                .tables
                .iter()
                .filter(|(name, _)| reachable.contains(name))
                .map(|(name, table)| (name.clone(), table.clone()))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn varchar() -> SqlType {
        SqlType::String { char_limit: Some(45) }
    }

    fn int() -> SqlType {
        SqlType::Int { precision: Some(10) }
    }

    fn table(name: &str, columns: &[(&str, SqlType, bool)], primary: &[&str]) -> Table {
        let mut table = Table::new(name);
        for (column, data_type, optional) in columns {
            table
                .add_column(Column::new(*column, data_type.clone(), *optional))
                .unwrap();
        }
        if !primary.is_empty() {
            table.set_primary(UniqueConstraint::new(primary.iter().copied())).unwrap();
        }
        table
    }

    fn foreign(constraint: &str, table: &str, column: &str, target: &str, target_column: &str) -> ForeignKey {
        ForeignKey {
            constraint: constraint.into(),
            table: table.into(),
            columns: vec![column.into()],
            referenced_table: target.into(),
            referenced_columns: vec![target_column.into()],
        }
    }

    fn family() -> Schema {
        let mut schema = Schema::default();
        schema.add_table(table("parent", &[("parent_id", varchar(), false)], &["parent_id"]));
        schema.add_table(table(
            "child",
            &[("child_id", varchar(), false), ("parent_id", varchar(), false)],
            &["child_id"],
        ));
        schema.add_table(table(
            "grandchild",
            &[("grandchild_id", varchar(), false), ("parent_id", varchar(), true)],
            &["grandchild_id"],
        ));
        schema
    }

    fn reference_of<'a>(schema: &'a Schema, table: &str, column: &str) -> &'a ReferenceType {
        schema.tables[table].columns[column].data_type.as_reference().unwrap()
    }

    #[test]
    fn multi_hop_reference_keeps_intermediate_tables() {
        let mut schema = family();
        schema
            .resolve_foreign_keys(&[
                foreign("fk_grandchild", "grandchild", "parent_id", "child", "parent_id"),
                foreign("fk_child", "child", "parent_id", "parent", "parent_id"),
            ])
            .unwrap();
        let child = reference_of(&schema, "child", "parent_id");
        assert_eq!((child.table.as_str(), child.column.as_str()), ("parent", "parent_id"));
        assert!(child.sub_references.is_empty());
        let grandchild = reference_of(&schema, "grandchild", "parent_id");
        assert_eq!(grandchild.table, "parent");
        assert_eq!(grandchild.sub_references, vec!["child".to_string()]);
    }

    #[test]
    fn int_primary_key_target_is_unsupported() {
        let mut schema = Schema::default();
        schema.add_table(table("parent", &[("id", int(), false)], &["id"]));
        schema.add_table(table("child", &[("id", varchar(), false), ("parent", varchar(), false)], &["id"]));
        let err = schema
            .resolve_foreign_keys(&[foreign("fk", "child", "parent", "parent", "id")])
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnsupportedForeignKey {
                constraint: "fk".into(),
                table: "child".into(),
                column: "parent".into(),
                reason: "referenced primary key is not a string",
            }
        );
    }

    #[test]
    fn int_referencing_column_is_unsupported() {
        let mut schema = Schema::default();
        schema.add_table(table("parent", &[("id", varchar(), false)], &["id"]));
        schema.add_table(table("child", &[("id", varchar(), false), ("parent", int(), false)], &["id"]));
        let err = schema
            .resolve_foreign_keys(&[foreign("fk", "child", "parent", "parent", "id")])
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnsupportedForeignKey { reason, .. } if reason == "referencing column is not a string"));
    }

    #[test]
    fn mutual_references_are_unresolved() {
        let mut schema = Schema::default();
        schema.add_table(table("a", &[("id", varchar(), false), ("b", varchar(), false)], &["id"]));
        schema.add_table(table("b", &[("id", varchar(), false), ("a", varchar(), false)], &["id"]));
        let err = schema
            .resolve_foreign_keys(&[foreign("fk_a", "a", "b", "b", "a"), foreign("fk_b", "b", "a", "a", "b")])
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnresolvedForeignKeys {
                constraints: vec!["fk_a".into(), "fk_b".into()]
            }
        );
    }

    #[test]
    fn foreign_key_with_default_is_rejected() {
        let mut schema = Schema::default();
        schema.add_table(table("parent", &[("id", varchar(), false)], &["id"]));
        let mut child = table("child", &[("id", varchar(), false)], &["id"]);
        child
            .add_column(
                Column::new("parent", varchar(), false)
                    .with_default(ColumnDefault::Literal(Value::str("root"))),
            )
            .unwrap();
        schema.add_table(child);
        let err = schema
            .resolve_foreign_keys(&[foreign("fk", "child", "parent", "parent", "id")])
            .unwrap_err();
        assert!(matches!(err, SchemaError::ForeignKeyWithDefault { .. }));
    }

    #[test]
    fn self_reference_resolves_and_orders() {
        let mut schema = Schema::default();
        schema.add_table(table(
            "employee",
            &[("id", varchar(), false), ("manager", varchar(), true)],
            &["id"],
        ));
        schema
            .resolve_foreign_keys(&[foreign("fk_manager", "employee", "manager", "employee", "id")])
            .unwrap();
        assert_eq!(reference_of(&schema, "employee", "manager").table, "employee");
        assert_eq!(schema.generation_order().unwrap(), vec!["employee".to_string()]);
    }

    #[test]
    fn generation_order_and_dependencies() {
        let mut schema = family();
        schema
            .resolve_foreign_keys(&[
                foreign("fk_child", "child", "parent_id", "parent", "parent_id"),
                foreign("fk_grandchild", "grandchild", "parent_id", "child", "parent_id"),
            ])
            .unwrap();
        assert_eq!(
            schema.generation_order().unwrap(),
            vec!["parent".to_string(), "child".to_string(), "grandchild".to_string()]
        );
        let grandchild = &schema.tables["grandchild"];
        assert!(grandchild.required_dependencies().is_empty());
        assert_eq!(grandchild.optional_dependencies(), vec!["parent", "child"]);
        assert_eq!(
            schema.reachable_tables(["child"]).unwrap(),
            vec!["child".to_string(), "parent".to_string()]
        );
        let filtered = schema.filter(["child"]).unwrap();
        assert_eq!(filtered.tables.keys().collect::<Vec<_>>(), vec!["parent", "child"]);
    }

    #[test]
    fn sorted_columns_groups_by_role() {
        let mut table = table(
            "t",
            &[("opt", varchar(), true), ("req", varchar(), false), ("id", varchar(), false)],
            &["id"],
        );
        table
            .add_column(Column::new("dflt", int(), false).with_default(ColumnDefault::Literal(Value::Int(1))))
            .unwrap();
        table
            .add_column(Column::new("dflt_opt", int(), true).with_default(ColumnDefault::Literal(Value::Int(2))))
            .unwrap();
        let order = table.sorted_columns().iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
        assert_eq!(order, vec!["id", "req", "opt", "dflt_opt", "dflt"]);
    }

    #[test]
    fn equality_and_hash_columns() {
        let mut table = table(
            "t",
            &[("id", varchar(), false), ("a", varchar(), false), ("b", varchar(), false)],
            &["id"],
        );
        table.add_unique(UniqueConstraint::new(["a", "b"])).unwrap();
        table.add_unique(UniqueConstraint::new(["a"])).unwrap();
        let semantics = Semantics::default();
        assert_eq!(table.equality_constraints(&semantics).len(), 3);
        assert!(table.hash_columns(&semantics).is_empty());
        let without_primary = Semantics {
            use_primary_key_in_equality: false,
            ..Semantics::default()
        };
        assert_eq!(table.hash_columns(&without_primary), vec!["a"]);
        assert!(Table::new("empty").hash_columns(&semantics).is_empty());
    }

    #[test]
    fn make_type_is_optional_when_defaulted() {
        let column = Column::new("n", int(), false).with_default(ColumnDefault::Literal(Value::Int(3)));
        assert_eq!(column.make_type(), ValueType::optional(ValueType::Int));
        assert_eq!(column.field_default(&Semantics::default()), Some(Value::Int(3)));
        let optional = Column::new("o", int(), true);
        assert_eq!(optional.field_default(&Semantics::default()), Some(Value::None));
        let strict = Semantics {
            default_value_for_optional_column: false,
            ..Semantics::default()
        };
        assert_eq!(optional.field_default(&strict), None);
    }

    #[test]
    fn reference_sql_value_goes_through_primary_key() {
        let column = Column::new("owner", SqlType::Reference(ReferenceType::new("person", "id")), true);
        assert_eq!(column.sql_value("o.owner"), "o.owner.id if o.owner is not None else None");
        assert_eq!(Column::new("x", int(), true).sql_value("o.x"), "o.x");
    }

    #[test]
    fn from_raw_groups_constraints() {
        let raw_column = |table: &str, column: &str, default: Option<&str>| RawColumn {
            table: table.into(),
            column: column.into(),
            nullable: false,
            data_type: "varchar".into(),
            column_type: "varchar(45)".into(),
            char_limit: Some(45),
            precision: None,
            default: default.map(Into::into),
        };
        let usage = |constraint: &str, table: &str, column: &str, target: Option<(&str, &str)>| RawKeyUsage {
            constraint: constraint.into(),
            table: table.into(),
            column: column.into(),
            referenced_table: target.map(|(t, _)| t.into()),
            referenced_column: target.map(|(_, c)| c.into()),
        };
        let raw = RawSchema {
            tables: vec!["city".into(), "person".into()],
            columns: vec![
                raw_column("city", "name", None),
                raw_column("person", "id", None),
                raw_column("person", "first", None),
                raw_column("person", "last", Some("Doe")),
                raw_column("person", "city", None),
            ],
            unique: vec![
                usage("full_name", "person", "first", None),
                usage("full_name", "person", "last", None),
            ],
            primary: vec![
                usage("PRIMARY", "city", "name", None),
                usage("PRIMARY", "person", "id", None),
            ],
            foreign: vec![usage("fk_city", "person", "city", Some(("city", "name")))],
        };
        let schema = Schema::from_raw(&raw).unwrap();
        let person = &schema.tables["person"];
        assert_eq!(person.unique, vec![UniqueConstraint::new(["first", "last"])]);
        assert_eq!(person.primary_columns().unwrap(), ["id".to_string()]);
        assert_eq!(
            person.columns["last"].default,
            Some(ColumnDefault::Literal(Value::str("Doe")))
        );
        assert_eq!(reference_of(&schema, "person", "city").table, "city");
        assert!(schema.tables["city"].primary_columns().is_ok());
    }

    #[test]
    fn unparsable_default_becomes_expression() {
        let raw = RawColumn {
            table: "t".into(),
            column: "created".into(),
            nullable: false,
            data_type: "datetime".into(),
            column_type: "datetime".into(),
            char_limit: None,
            precision: None,
            default: Some("CURRENT_TIMESTAMP".into()),
        };
        let column = Column::from_raw(&raw).unwrap();
        assert_eq!(column.default, Some(ColumnDefault::Expression("CURRENT_TIMESTAMP".into())));
        assert_eq!(column.field_default(&Semantics::default()), Some(Value::None));
    }

    #[test]
    fn pretty_print_marks_primary_key() {
        let mut table = table("city", &[("name", varchar(), false), ("zip", int(), true)], &["name"]);
        table.add_unique(UniqueConstraint::new(["zip"])).unwrap();
        let text = table.to_string();
        assert!(text.starts_with("############\n##  city  ##\n############\n"));
        assert!(text.contains("   [PK] - name: varchar(45)\n"));
        assert!(text.contains("        - zip: int(10)?\n"));
        assert!(text.ends_with("unique(zip)\n"));
    }

    /// `t0 <- t1 <- ... <- tn`, every `up` column pointing at the previous
    /// table, `t1.up` at the primary key of `t0`.
    fn chain_schema(length: usize) -> (Schema, Vec<ForeignKey>) {
        let mut schema = Schema::default();
        let mut keys = vec![];
        schema.add_table(table("t0", &[("id", varchar(), false)], &["id"]));
        for index in 1..=length {
            let name = format!("t{index}");
            schema.add_table(table(&name, &[("id", varchar(), false), ("up", varchar(), false)], &["id"]));
            let target_column = if index == 1 { "id" } else { "up" };
            keys.push(foreign(
                &format!("fk_{index}"),
                &name,
                "up",
                &format!("t{}", index - 1),
                target_column,
            ));
        }
        (schema, keys)
    }

    proptest! {
        #[test]
        fn resolution_ignores_foreign_key_order(
            (length, order) in (1usize..8).prop_flat_map(|length| {
                (Just(length), Just((0..length).collect::<Vec<_>>()).prop_shuffle())
            })
        ) {
            let (mut expected, keys) = chain_schema(length);
            expected.resolve_foreign_keys(&keys).unwrap();
            let (mut shuffled, keys) = chain_schema(length);
            let keys = order.iter().map(|index| keys[*index].clone()).collect::<Vec<_>>();
            shuffled.resolve_foreign_keys(&keys).unwrap();
            prop_assert_eq!(&expected, &shuffled);
            let last = reference_of(&shuffled, &format!("t{length}"), "up");
            prop_assert_eq!(last.table.as_str(), "t0");
            let hops = (1..length).map(|index| format!("t{index}")).collect::<Vec<_>>();
            prop_assert_eq!(&last.sub_references, &hops);
        }
    }
}
