mod check;
mod draft;
mod generate;
mod init;
mod preview;
mod schema;

use std::{error::Error, path::Path};

pub use check::Check;
pub use draft::Draft;
pub use generate::Generate;
pub use init::Init;
pub use preview::Preview;
pub use schema::Schema;

use sql_scaffold_core::{
    SqlScaffold, SqlScaffoldBuilder, profile::ImportProfile, schema::Schema as DatabaseSchema,
};
use sqlx::mysql::MySqlPoolOptions;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use crate::config::ScaffoldConfig;

pub fn init_standard() -> Result<(), Box<dyn Error>> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::WARN).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

pub fn init_debug() -> Result<(), Box<dyn Error>> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

pub fn init_logging(debug: bool) -> Result<(), Box<dyn Error>> {
    match debug {
        true => init_debug(),
        false => init_standard(),
    }
}

pub fn scaffold(config: &ScaffoldConfig) -> SqlScaffold {
    let mut builder = SqlScaffoldBuilder::default();
    builder.semantics(config.semantics);
    builder.build()
}

/// Reads the schema named in the configuration from the live database.
pub fn introspect(config: &ScaffoldConfig, scaffold: &SqlScaffold) -> Result<DatabaseSchema, Box<dyn Error>> {
    let rt = tokio::runtime::Runtime::new()?;
    let pool = rt.block_on(MySqlPoolOptions::new().max_connections(1).connect(&config.db_url))?;
    let schema = rt.block_on(scaffold.introspect(&pool, &config.schema))?;
    rt.block_on(pool.close());
    info!("Read {} tables from {}", schema.tables.len(), config.schema);
    Ok(schema)
}

pub fn read_profile(
    path: &Path,
    scaffold: &SqlScaffold,
    schema: &DatabaseSchema,
) -> Result<ImportProfile, Box<dyn Error>> {
    let json = std::fs::read_to_string(path)
        .map_err(|error| format!("encountered '{error}' attempting to read {}", path.display()))?;
    let profile = scaffold
        .load_profile(&json, schema)
        .map_err(|error| format!("{}: {error}", path.display()))?;
    info!("Loaded profile {} with {} methods", path.display(), profile.methods().len());
    Ok(profile)
}

/// Header and records of a CSV file. Short records are kept as they are.
pub fn read_csv(path: &Path, delimiter: u8) -> Result<(Vec<String>, Vec<Vec<String>>), Box<dyn Error>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)
        .map_err(|error| format!("encountered '{error}' attempting to read {}", path.display()))?;
    let headers = reader.headers()?.iter().map(str::to_string).collect();
    let mut records = vec![];
    for record in reader.records() {
        records.push(record?.iter().map(str::to_string).collect());
    }
    Ok((headers, records))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_csv_with_the_configured_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cities.csv");
        std::fs::write(&path, "Ville;CP\nParis;75000\nNice\n").unwrap();
        let (headers, records) = read_csv(&path, b';').unwrap();
        assert_eq!(headers, vec!["Ville", "CP"]);
        assert_eq!(records, vec![vec!["Paris", "75000"], vec!["Nice"]]);
    }

    #[test]
    fn missing_csv_names_the_file() {
        let err = read_csv(Path::new("does/not/exist.csv"), b';').unwrap_err();
        assert!(err.to_string().contains("does/not/exist.csv"));
    }
}
