use std::error::Error;

use clap::Parser;

use crate::config::{CONFIG_FILE, TomlConfig};

#[derive(Parser, Debug, Clone)]
#[must_use]
pub struct Init {}

impl Init {
    pub fn run(self) -> Result<(), Box<dyn Error>> {
        if std::fs::exists(CONFIG_FILE)? {
            eprintln!("{CONFIG_FILE} already exists.\nExiting...");
            return Ok(());
        }
        std::fs::write(CONFIG_FILE, toml::to_string_pretty(&TomlConfig::template())?)?;
        eprintln!("Written config to {CONFIG_FILE}!");
        Ok(())
    }
}
