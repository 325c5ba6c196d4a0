//! Runs an import profile in-process.
//!
//! Every record goes through the methods of the profile in order, exactly as
//! the generated `import_csv` loop does, except that rows end up in an
//! [`Entries`] cache instead of the database.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::entries::{Entries, EntryError, Row};
use crate::operation::OperationError;
use crate::profile::{BoundReference, ImportProfile, TableGenerationMethod};
use crate::schema::Semantics;
use crate::types::Value;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ImportError {
    #[error("record {record}, {table}.{column}: {source}")]
    Operation {
        record: usize,
        table: String,
        column: String,
        source: OperationError,
    },
    #[error("record {record}: {source}")]
    Entry { record: usize, source: EntryError },
}

pub struct Importer<'a> {
    profile: &'a ImportProfile,
    bound: Vec<Vec<BoundReference<'a>>>,
    entries: Entries,
    records: usize,
}

impl<'a> Importer<'a> {
    pub fn new(profile: &'a ImportProfile, semantics: Semantics) -> Self {
        let tables = profile
            .methods()
            .iter()
            .filter(|method| method.writes_to_database())
            .map(TableGenerationMethod::table);
        Self {
            profile,
            bound: profile.bound_references(),
            entries: Entries::new(tables, semantics),
            records: 0,
        }
    }

    /// Imports one CSV record, given as header and field pairs.
    pub fn import_record<I, K, V>(&mut self, record: I) -> Result<(), ImportError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.records += 1;
        let index = self.records;
        let record = Value::Dict(
            record
                .into_iter()
                .map(|(header, field)| (Value::Str(header.into()), Value::Str(field.into())))
                .collect(),
        );
        let nothing = Value::None;
        // Row imported for each table of this record, for later references.
        let mut imported: HashMap<&str, Row> = HashMap::new();
        for (method, references) in self.profile.methods().iter().zip(&self.bound) {
            let table = method.table();
            let input = match method {
                TableGenerationMethod::NormalCsv { .. } => &record,
                TableGenerationMethod::Constant { .. } => &nothing,
            };
            let mut fields = Row::new();
            for (column, chain) in method.profile().iter() {
                let value = chain.execute(input).map_err(|source| ImportError::Operation {
                    record: index,
                    table: table.name.clone(),
                    column: column.to_string(),
                    source,
                })?;
                fields.insert(column.to_string(), value);
            }
            for reference in references {
                let target = table
                    .columns
                    .get(reference.column)
                    .and_then(|column| column.data_type.as_reference());
                let key = target.and_then(|target| {
                    imported
                        .get(reference.table)
                        .and_then(|row| row.get(&target.column))
                });
                if let Some(key) = key {
                    fields.insert(reference.column.to_string(), key.clone());
                }
            }
            let entry = |source| ImportError::Entry {
                record: index,
                source,
            };
            let row = match method {
                TableGenerationMethod::NormalCsv { .. } => {
                    let id = self.entries.make(&table.name, fields).map_err(entry)?;
                    self.entries.get(&table.name, id).cloned().unwrap_or_default()
                }
                TableGenerationMethod::Constant { .. } => {
                    Entries::constant(table, fields).map_err(entry)?
                }
            };
            imported.insert(&table.name, row);
        }
        debug!("record {index} imported");
        Ok(())
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn entries(&self) -> &Entries {
        &self.entries
    }

    pub fn into_entries(self) -> Entries {
        self.entries
    }
}
