use std::error::Error;

use crate::importer::Importer;
use crate::introspection::fetch_raw_schema;
use crate::operation::Catalog;
use crate::profile::{ImportProfile, ProfileError};
use crate::schema::{Schema, Semantics};

pub mod entries;
pub mod importer;
pub mod introspection;
pub mod operation;
pub mod profile;
pub mod schema;
pub mod script;
pub mod types;

#[must_use]
#[derive(Default)]
pub struct SqlScaffoldBuilder {
    semantics: Semantics,
    catalog: Option<Catalog>,
}

impl SqlScaffoldBuilder {
    pub fn semantics(&mut self, semantics: Semantics) -> &mut Self {
        self.semantics = semantics;
        self
    }

    /// Operations a profile may name. Every built-in by default.
    pub fn catalog(&mut self, catalog: Catalog) -> &mut Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn build(self) -> SqlScaffold {
        SqlScaffold {
            semantics: self.semantics,
            catalog: self.catalog.unwrap_or_default(),
        }
    }
}

pub struct SqlScaffold {
    semantics: Semantics,
    catalog: Catalog,
}

impl SqlScaffold {
    pub fn semantics(&self) -> &Semantics {
        &self.semantics
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Reads the metadata of `schema` and resolves it into a typed schema.
    pub async fn introspect(
        &self,
        pool: &sqlx::Pool<sqlx::MySql>,
        schema: &str,
    ) -> Result<Schema, Box<dyn Error>> {
        let raw = fetch_raw_schema(pool, schema).await?;
        Ok(Schema::from_raw(&raw)?)
    }

    /// Parses a profile document against `schema` and checks every chain.
    pub fn load_profile(&self, json: &str, schema: &Schema) -> Result<ImportProfile, ProfileError> {
        let profile = ImportProfile::from_json(json, schema, &self.catalog)?;
        profile.check_validity()?;
        Ok(profile)
    }

    pub fn importer<'a>(&self, profile: &'a ImportProfile) -> Importer<'a> {
        Importer::new(profile, self.semantics)
    }
}
