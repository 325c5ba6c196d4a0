use std::{error::Error, path::PathBuf};

use clap::Parser;
use sql_scaffold_core::profile::ImportProfile;

use super::{init_logging, introspect, scaffold};
use crate::config::ScaffoldConfig;

#[derive(Parser, Debug, Clone)]
#[must_use]
pub struct Check {
    profile: PathBuf,
    config: Option<PathBuf>,
    #[arg(long, help = "Show debug information")]
    debug: bool,
}

fn describe(profile: &ImportProfile) -> String {
    let mut out = String::new();
    for method in profile.methods() {
        out.push_str(&format!("{} ({})\n", method.table().name, method.name()));
        for (column, chain) in method.profile().iter() {
            let types = match (chain.first_type(), chain.last_type()) {
                (Some(first), Some(last)) => format!("{first} -> {last}"),
                _ => "empty".to_string(),
            };
            out.push_str(&format!("    {column}: {chain}  [{types}]\n"));
        }
    }
    out
}

impl Check {
    pub fn run(self) -> Result<(), Box<dyn Error>> {
        init_logging(self.debug)?;
        let config = ScaffoldConfig::read(self.config)?;
        let scaffold = scaffold(&config);
        let schema = introspect(&config, &scaffold)?;
        let json = std::fs::read_to_string(&self.profile).map_err(|error| {
            format!("encountered '{error}' attempting to read {}", self.profile.display())
        })?;
        let profile = ImportProfile::from_json(&json, &schema, scaffold.catalog())?;
        print!("{}", describe(&profile));
        match profile.check_validity() {
            Ok(()) => {
                println!("{} is valid.", self.profile.display());
                Ok(())
            }
            Err(error) => {
                tracing::error!("{} is invalid", self.profile.display());
                Err(error.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::tests::{geography, geography_profile};

    #[test]
    fn describes_every_chain_with_its_types() {
        let description = describe(&geography_profile(&geography()));
        let lines = description.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "country (constant)");
        assert!(lines[1].starts_with("    code: constant_str("));
        assert_eq!(lines[2], "city (normal_csv)");
        assert!(lines[3].starts_with("    name: csv_column("));
        assert!(lines[4].ends_with("-> Optional[int]]"));
    }
}
