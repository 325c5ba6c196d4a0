use std::{error::Error, path::PathBuf};

use clap::Parser;
use sql_scaffold_core::profile::draft::{deduce_field_types, draft_profile};
use tracing::info;

use super::{init_logging, introspect, read_csv, scaffold};
use crate::config::ScaffoldConfig;

fn parse_constant(argument: &str) -> Result<(String, String), String> {
    match argument.split_once('=') {
        Some((table, value)) if !table.is_empty() => Ok((table.to_string(), value.to_string())),
        _ => Err(format!("expected TABLE=VALUE, got '{argument}'")),
    }
}

/// Writes a first profile for a CSV file, guessing a chain for every column
/// it can match with a field.
#[derive(Parser, Debug, Clone)]
#[must_use]
pub struct Draft {
    csv: PathBuf,
    #[arg(required = true, help = "Tables imported once per record")]
    tables: Vec<String>,
    #[arg(
        long = "constant",
        value_name = "TABLE=VALUE",
        value_parser = parse_constant,
        help = "Table imported as one fixed entry with the given primary key"
    )]
    constants: Vec<(String, String)>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, short, help = "Write the profile here instead of stdout")]
    output: Option<PathBuf>,
    #[arg(long, help = "Show debug information")]
    debug: bool,
}

impl Draft {
    pub fn run(self) -> Result<(), Box<dyn Error>> {
        init_logging(self.debug)?;
        let config = ScaffoldConfig::read(self.config)?;
        let scaffold = scaffold(&config);
        let schema = introspect(&config, &scaffold)?;
        let (headers, records) = read_csv(&self.csv, config.delimiter)?;

        let fields = deduce_field_types(&headers, &records);
        for (field, deduced) in &fields {
            info!("{field}: {}", deduced.best_type());
        }
        let tables = self.tables.iter().map(String::as_str).collect::<Vec<_>>();
        let constants = self
            .constants
            .iter()
            .map(|(table, value)| (table.as_str(), value.as_str()))
            .collect::<Vec<_>>();
        let profile = draft_profile(&schema, scaffold.catalog(), &fields, &tables, &constants)?;
        let json = profile.to_json()?;
        match self.output {
            Some(output) => {
                std::fs::write(&output, json)?;
                eprintln!("Written profile to {}!", output.display());
            }
            None => println!("{json}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_table_value_pairs() {
        assert_eq!(parse_constant("country=FR"), Ok(("country".into(), "FR".into())));
        assert_eq!(parse_constant("tag=a=b"), Ok(("tag".into(), "a=b".into())));
        assert!(parse_constant("country").is_err());
        assert!(parse_constant("=FR").is_err());
    }
}
