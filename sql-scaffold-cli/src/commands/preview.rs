use std::{error::Error, path::PathBuf};

use clap::Parser;
use serde_json::{Map, Value as Json};
use sql_scaffold_core::entries::Entries;
use tracing::info;

use super::{init_logging, introspect, read_csv, read_profile, scaffold};
use crate::config::ScaffoldConfig;

/// Runs a profile over a CSV file without touching the database.
#[derive(Parser, Debug, Clone)]
#[must_use]
pub struct Preview {
    profile: PathBuf,
    csv: PathBuf,
    config: Option<PathBuf>,
    #[arg(long, help = "Only import the first records")]
    limit: Option<usize>,
    #[arg(long, help = "Print every entry as a JSON line")]
    rows: bool,
    #[arg(long, help = "Show debug information")]
    debug: bool,
}

fn entry_lines(entries: &Entries) -> Vec<String> {
    let mut lines = vec![];
    for (table, _) in entries.counts() {
        for row in entries.rows(table) {
            let fields = row
                .iter()
                .map(|(column, value)| (column.clone(), value.to_json()))
                .collect::<Map<_, _>>();
            let mut line = Map::new();
            line.insert("table".into(), Json::String(table.to_string()));
            line.insert("row".into(), Json::Object(fields));
            lines.push(Json::Object(line).to_string());
        }
    }
    lines
}

impl Preview {
    pub fn run(self) -> Result<(), Box<dyn Error>> {
        init_logging(self.debug)?;
        let config = ScaffoldConfig::read(self.config)?;
        let scaffold = scaffold(&config);
        let schema = introspect(&config, &scaffold)?;
        let profile = read_profile(&self.profile, &scaffold, &schema)?;
        let (headers, records) = read_csv(&self.csv, config.delimiter)?;

        let mut importer = scaffold.importer(&profile);
        for record in records.iter().take(self.limit.unwrap_or(usize::MAX)) {
            importer.import_record(headers.iter().zip(record))?;
        }
        info!("Imported {} records from {}", importer.records(), self.csv.display());

        let entries = importer.into_entries();
        if self.rows {
            for line in entry_lines(&entries) {
                println!("{line}");
            }
        }
        for (table, count) in entries.counts() {
            println!("{table}: {count} entries");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sql_scaffold_core::{importer::Importer, schema::Semantics};

    use super::*;
    use crate::codegen::tests::{geography, geography_profile};

    #[test]
    fn entries_print_as_json_lines() {
        let schema = geography();
        let profile = geography_profile(&schema);
        let mut importer = Importer::new(&profile, Semantics::default());
        importer.import_record([("Ville", "nice"), ("CP", "06000")]).unwrap();
        let lines = entry_lines(importer.entries());
        assert_eq!(lines.len(), 1);
        let line: Json = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(
            line,
            serde_json::json!({
                "table": "city",
                "row": {"name": "NICE", "country": "FR", "zip": 6000, "rank": 0}
            })
        );
    }
}
