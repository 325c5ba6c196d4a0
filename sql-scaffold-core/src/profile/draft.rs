//! Non-interactive profile drafting.
//!
//! Field types are deduced from sample CSV records, then every column of the
//! requested tables is mapped onto a same-named field with a default chain.
//! Columns that cannot be bridged are left out with a warning; the draft is a
//! starting point, `check` tells what is still missing.

use indexmap::IndexMap;
use tracing::{info, warn};

use super::{ImportProfile, ProfileError, TableGenerationMethod, TableProfile};
use crate::operation::builtin::to_ascii;
use crate::operation::{Builtin, Catalog, OperationChain, OperationInstance};
use crate::schema::{Column, Graph, Schema, SchemaError, Table};
use crate::types::{Value, ValueType};

/// Fields with at most this many distinct folded values are treated as enums.
pub const ENUM_AUTO_DETECT_LIMIT: usize = 10;

/// What the values of one CSV field can be read as.
#[derive(Debug, Clone, PartialEq)]
pub struct DeducedType {
    candidates: Vec<ValueType>,
    optional: bool,
    /// Distinct raw values, dropped once the field stops looking like an enum.
    values: Option<Vec<String>>,
}

impl DeducedType {
    pub fn infer<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let mut candidates = vec![
            ValueType::Str,
            ValueType::Int,
            ValueType::Float,
            ValueType::DateTime,
            ValueType::Time,
        ];
        let mut optional = false;
        let mut folded: Vec<String> = vec![];
        let mut raw: Option<Vec<String>> = Some(vec![]);
        for value in values {
            if value.trim().is_empty() {
                optional = true;
            } else {
                candidates.retain(|candidate| candidate.parse_literal(value).is_ok());
            }
            let Some(known) = raw.as_mut() else {
                continue;
            };
            let folded_value = to_ascii(value).to_uppercase();
            if !folded.contains(&folded_value) {
                folded.push(folded_value);
            }
            if folded.len() > ENUM_AUTO_DETECT_LIMIT {
                raw = None;
            } else if !known.iter().any(|known| known == value) {
                known.push(value.to_string());
            }
        }
        Self {
            candidates,
            optional,
            values: raw.filter(|values| !values.is_empty()),
        }
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn enum_values(&self) -> Option<&[String]> {
        self.values.as_deref()
    }

    /// Every type the field can be read as.
    pub fn types(&self) -> Vec<ValueType> {
        let mut types = self
            .candidates
            .iter()
            .map(|candidate| match candidate {
                ValueType::Str => ValueType::Str,
                other if self.optional => ValueType::optional(other.clone()),
                other => other.clone(),
            })
            .collect::<Vec<_>>();
        if let Some(enumeration) = self.enum_type() {
            types.push(enumeration);
        }
        types
    }

    fn enum_type(&self) -> Option<ValueType> {
        let values = self.values.as_ref()?;
        ValueType::enumeration(ValueType::Str, values.iter().cloned().map(Value::Str)).ok()
    }

    pub fn is_assignable_to(&self, target: &ValueType) -> bool {
        self.types()
            .iter()
            .any(|value_type| target.is_super_type(value_type.non_optional()))
    }

    /// The most specific reading of the field.
    pub fn best_type(&self) -> ValueType {
        let rank = |value_type: &ValueType| match value_type.non_optional() {
            ValueType::Int => 10,
            ValueType::Float => 9,
            ValueType::Time => 8,
            ValueType::DateTime => 7,
            ValueType::Enum(_) => 1,
            _ => 0,
        };
        self.types()
            .into_iter()
            .rev()
            .max_by_key(|value_type| rank(value_type))
            .unwrap_or(ValueType::Str)
    }
}

/// Deduces the type of every header from `rows`. Short rows count as blanks.
pub fn deduce_field_types(headers: &[String], rows: &[Vec<String>]) -> IndexMap<String, DeducedType> {
    headers
        .iter()
        .enumerate()
        .map(|(index, header)| {
            let values = rows
                .iter()
                .map(|row| row.get(index).map_or("", String::as_str));
            (header.clone(), DeducedType::infer(values))
        })
        .collect()
}

/// Tables to import, in import order: the requested ones and every table they
/// require, each after the tables it points at.
fn import_order(schema: &Schema, selected: &[&str]) -> Result<Vec<String>, SchemaError> {
    let mut graph = Graph::new();
    for table in schema.tables.values() {
        graph.add_node(table.name.clone());
        for (column, reference) in table.references() {
            if !column.optional || selected.contains(&reference.table.as_str()) {
                graph.add_edge(table.name.clone(), reference.table.clone());
            }
        }
    }
    let seeds = selected
        .iter()
        .map(|name| schema.table(name).map(|table| table.name.clone()))
        .collect::<Result<Vec<_>, _>>()?;
    let reached = graph.reachable_from(seeds, |_, _| true);
    let mut restricted = Graph::new();
    for name in &reached {
        restricted.add_node(name.clone());
        for next in graph.successors(name) {
            restricted.add_edge(name.clone(), next.clone());
        }
    }
    restricted
        .sink_to_source()
        .map_err(|err| SchemaError::CyclicDependency {
            tables: err.remaining,
        })
}

fn instance(builtin: Builtin, args: Vec<Value>) -> Result<OperationInstance, ProfileError> {
    builtin.definition().make_instance(args).map_err(ProfileError::Draft)
}

fn constant_profile(table: &Table, value: &str) -> Result<TableProfile, ProfileError> {
    let mut profile = TableProfile::new();
    for name in table.primary_columns()? {
        let column = table.column(name)?;
        let value_type = column.data_type.value_type();
        if !value_type.is_text() {
            return Err(ProfileError::UnsupportedConstant {
                table: table.name.clone(),
                column: name.clone(),
                value_type,
            });
        }
        profile.insert(
            name.clone(),
            OperationChain::from_instances([instance(Builtin::ConstantStr, vec![Value::str(value)])?]),
        );
    }
    Ok(profile)
}

/// Field feeding `column`: a `table.column` name first, then a bare
/// `column` name, compared without case.
fn find_field<'a>(
    fields: &'a IndexMap<String, DeducedType>,
    table: &Table,
    column: &Column,
    used: &[&str],
    reuse: bool,
) -> Option<(&'a str, &'a DeducedType)> {
    let target = column.make_type();
    let qualified = format!("{}.{}", table.name, column.name);
    [qualified.as_str(), column.name.as_str()]
        .into_iter()
        .find_map(|wanted| {
            fields.iter().find(|(name, deduced)| {
                name.eq_ignore_ascii_case(wanted)
                    && (reuse || !used.contains(&name.as_str()))
                    && deduced.is_assignable_to(&target)
            })
        })
        .map(|(name, deduced)| (name.as_str(), deduced))
}

/// Default chain reading `field` into `column`, `None` when no catalog
/// operation bridges the gap.
fn field_chain(
    catalog: &Catalog,
    table: &Table,
    column: &Column,
    field: &str,
    deduced: &DeducedType,
) -> Result<Option<OperationChain>, ProfileError> {
    let target = column.make_type();
    let storage = column.data_type.value_type();
    let mut chain = OperationChain::new();
    match deduced.enum_values() {
        Some(values) if deduced.best_type().is_enum() => {
            let values = Value::List(values.iter().cloned().map(Value::Str).collect());
            chain.append(instance(Builtin::CsvEnumColumn, vec![Value::str(field), values])?);
        }
        _ => chain.append(instance(Builtin::CsvColumn, vec![Value::str(field)])?),
    }
    if storage.is_text() && table.is_in_unique(&column.name) {
        chain.append(instance(Builtin::ToAscii, vec![])?);
        chain.append(instance(Builtin::UpperStr, vec![])?);
    }
    if deduced.is_optional() && *storage.raw() != ValueType::Str {
        chain.append(instance(Builtin::NullifyStr, vec![])?);
    }
    let last = chain.last_type().cloned().unwrap_or(ValueType::Str);
    if !target.is_super_type(&last) {
        let bridge = catalog.iter().find(|operation| {
            !operation.builtin.reads_record()
                && operation.input.is_super_type(&last)
                && target.is_super_type(&operation.output)
        });
        let Some(bridge) = bridge else {
            return Ok(None);
        };
        let Ok(bridge) = bridge.make_default_instance() else {
            return Ok(None);
        };
        chain.append(bridge);
    }
    let record = ValueType::dict(ValueType::Str, ValueType::Str);
    Ok(chain.is_valid(&record, &target).then_some(chain))
}

/// Chain generating a single-column primary key when no field provides it.
fn generated_key(catalog: &Catalog, column: &Column) -> Result<Option<OperationChain>, ProfileError> {
    let target = column.make_type();
    let generator = catalog.iter().find(|operation| {
        operation.primary && operation.input.is_none() && target.is_super_type(&operation.output)
    });
    let Some(Ok(generator)) = generator.map(|generator| generator.make_default_instance()) else {
        return Ok(None);
    };
    Ok(Some(OperationChain::from_instances([
        instance(Builtin::CsvNoColumn, vec![])?,
        generator,
    ])))
}

fn normal_profile(
    catalog: &Catalog,
    table: &Table,
    fields: &IndexMap<String, DeducedType>,
) -> Result<TableProfile, ProfileError> {
    let method = TableGenerationMethod::NormalCsv {
        table: table.clone(),
        profile: TableProfile::new(),
    };
    let required = method.required_columns()?;
    let single_key = match table.primary.as_ref() {
        Some(primary) if primary.columns.len() == 1 => primary.columns.first(),
        _ => None,
    };
    let mut used: Vec<&str> = vec![];
    let mut profile = TableProfile::new();
    let columns = required
        .iter()
        .map(|column| (*column, true))
        .chain(method.optional_columns().into_iter().map(|column| (column, false)));
    for (column, is_required) in columns {
        let chain = match find_field(fields, table, column, &used, is_required) {
            Some((field, deduced)) => {
                used.push(field);
                field_chain(catalog, table, column, field, deduced)?
            }
            None if is_required && single_key == Some(&column.name) => generated_key(catalog, column)?,
            None => {
                if is_required {
                    warn!("no field for {}.{}", table.name, column.name);
                }
                continue;
            }
        };
        match chain {
            Some(chain) => {
                profile.insert(column.name.clone(), chain);
            }
            None => warn!(
                "no default chain for {}.{}, it is left out of the draft",
                table.name, column.name
            ),
        }
    }
    Ok(profile)
}

/// Drafts a profile importing `tables` once per record and `constants` as
/// fixed rows identified by their primary-key value.
pub fn draft_profile(
    schema: &Schema,
    catalog: &Catalog,
    fields: &IndexMap<String, DeducedType>,
    tables: &[&str],
    constants: &[(&str, &str)],
) -> Result<ImportProfile, ProfileError> {
    let selected = tables
        .iter()
        .copied()
        .chain(constants.iter().map(|(table, _)| *table))
        .collect::<Vec<_>>();
    let mut methods = vec![];
    for name in import_order(schema, &selected)? {
        let table = schema.table(&name)?;
        let method = match constants.iter().find(|(constant, _)| *constant == name) {
            Some((_, value)) => TableGenerationMethod::Constant {
                table: table.clone(),
                profile: constant_profile(table, value)?,
            },
            None => TableGenerationMethod::NormalCsv {
                table: table.clone(),
                profile: normal_profile(catalog, table, fields)?,
            },
        };
        info!("drafted {} as {} ({} columns)", name, method.name(), method.profile().len());
        methods.push(method);
    }
    Ok(ImportProfile::new(methods))
}
