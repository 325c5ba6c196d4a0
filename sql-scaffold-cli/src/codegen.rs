pub mod importer;
pub mod json;
pub mod objects;

use std::error::Error;

use sql_scaffold_core::{profile::ImportProfile, schema::Table};

pub trait CodeGen {
    fn push_table(&mut self, table: &Table) -> Result<(), Box<dyn Error>>;

    /// Profiles are ignored by generators that only describe the schema.
    fn push_profile(&mut self, _profile: &ImportProfile) -> Result<(), Box<dyn Error>> {
        Ok(())
    }

    fn finalize(&self) -> Result<String, Box<dyn Error>>;
}
