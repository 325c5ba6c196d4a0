use std::{error::Error, path::PathBuf};

use clap::{Parser, ValueEnum};

use super::{init_logging, introspect, scaffold};
use crate::config::ScaffoldConfig;

#[derive(ValueEnum, Debug, Clone, Default)]
pub enum Analysis {
    /// Tables with their columns and constraints.
    #[default]
    Display,
    /// The schema as JSON.
    Json,
    /// Tables in insertion order, referenced tables first.
    Order,
}

#[derive(Parser, Debug, Clone)]
#[must_use]
pub struct Schema {
    #[arg(value_enum, default_value_t)]
    analysis: Analysis,
    config: Option<PathBuf>,
    #[arg(long, help = "Show debug information")]
    debug: bool,
}

impl Schema {
    pub fn run(self) -> Result<(), Box<dyn Error>> {
        init_logging(self.debug)?;
        let config = ScaffoldConfig::read(self.config)?;
        let scaffold = scaffold(&config);
        let schema = introspect(&config, &scaffold)?;
        match self.analysis {
            Analysis::Display => println!("{schema}"),
            Analysis::Json => println!("{}", serde_json::to_string_pretty(&schema)?),
            Analysis::Order => {
                for table in schema.generation_order()? {
                    println!("{table}");
                }
            }
        }
        Ok(())
    }
}
