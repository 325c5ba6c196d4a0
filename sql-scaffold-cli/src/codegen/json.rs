use std::{collections::BTreeMap, error::Error};

use serde::Serialize;
use sql_scaffold_core::{
    profile::ImportProfile,
    schema::{Schema, Table},
};

use super::CodeGen;

#[derive(Serialize)]
struct Document<'a> {
    tables: &'a BTreeMap<String, Table>,
    order: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile: Option<&'a serde_json::Value>,
}

/// Schema description for other tools: tables, insertion order and the
/// profile as loaded.
#[derive(Default)]
pub struct JsonCodeGen {
    tables: BTreeMap<String, Table>,
    profile: Option<serde_json::Value>,
}

impl CodeGen for JsonCodeGen {
    fn push_table(&mut self, table: &Table) -> Result<(), Box<dyn Error>> {
        self.tables.insert(table.name.clone(), table.clone());
        Ok(())
    }

    fn push_profile(&mut self, profile: &ImportProfile) -> Result<(), Box<dyn Error>> {
        self.profile = Some(serde_json::from_str(&profile.to_json()?)?);
        Ok(())
    }

    fn finalize(&self) -> Result<String, Box<dyn Error>> {
        let mut schema = Schema::default();
        for table in self.tables.values() {
            schema.add_table(table.clone());
        }
        let order = schema
            .generation_order()?
            .into_iter()
            .filter(|table| self.tables.contains_key(table))
            .collect();
        let document = Document {
            tables: &self.tables,
            order,
            profile: self.profile.as_ref(),
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }
}
