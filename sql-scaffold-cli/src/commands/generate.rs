use std::{
    error::Error,
    ffi::OsString,
    path::{Path, PathBuf},
};

use clap::Parser;
use tracing::info;

use super::{init_logging, introspect, read_profile, scaffold};
use crate::{
    codegen::{CodeGen, importer::ImporterCodeGen, json::JsonCodeGen, objects::ObjectsCodeGen},
    config::{CodeGenerator, DbInfo, ScaffoldConfig},
};

fn staging_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(target.file_name().unwrap_or_default());
    name.push(".tmp");
    target.with_file_name(name)
}

/// Writes every file next to its target, then moves them in place. Nothing is
/// replaced unless every file was written.
fn write_all(files: &[(&Path, &str)]) -> Result<(), Box<dyn Error>> {
    let mut staged = vec![];
    for (target, code) in files {
        let staging = staging_path(target);
        if let Err(error) = std::fs::write(&staging, code) {
            for path in &staged {
                let _ = std::fs::remove_file(path);
            }
            return Err(format!("encountered '{error}' attempting to write {}", target.display()).into());
        }
        staged.push(staging);
    }
    for (staging, (target, _)) in staged.iter().zip(files) {
        std::fs::rename(staging, target)?;
    }
    Ok(())
}

#[derive(Parser, Debug, Clone)]
#[must_use]
pub struct Generate {
    config: Option<PathBuf>,
    #[arg(long, help = "Show debug information")]
    debug: bool,
}

impl Generate {
    pub fn run(self) -> Result<(), Box<dyn Error>> {
        init_logging(self.debug)?;
        let config = ScaffoldConfig::read(self.config)?;
        let scaffold = scaffold(&config);
        let schema = introspect(&config, &scaffold)?;

        let profile = match &config.profile {
            Some(path) => Some(read_profile(path, &scaffold, &schema)?),
            None => None,
        };
        let schema = match &profile {
            Some(profile) => schema.filter(profile.tables())?,
            None => schema,
        };

        let mut codegen: Box<dyn CodeGen> = match config.mode {
            CodeGenerator::Json => Box::new(JsonCodeGen::default()),
            CodeGenerator::Python => Box::new(ObjectsCodeGen::new(
                config.semantics,
                DbInfo {
                    name: config.schema.clone(),
                    ..config.database.clone()
                },
            )),
        };
        for table in schema.tables.values() {
            codegen.push_table(table)?;
        }
        if let Some(profile) = &profile {
            codegen.push_profile(profile)?;
        }
        let code = codegen.finalize()?;

        // Both files are rendered before anything is written.
        let importer = match (&profile, config.mode, &config.importer_target) {
            (Some(profile), CodeGenerator::Python, Some(target)) => {
                let mut importer = ImporterCodeGen::new(config.objects_module(), config.delimiter);
                importer.push_profile(profile)?;
                Some((target, importer.finalize()?))
            }
            _ => None,
        };

        let mut files = vec![(config.target.as_path(), code.as_str())];
        if let Some((target, code)) = &importer {
            files.push((target.as_path(), code.as_str()));
        }
        write_all(&files)?;
        info!("Written {} tables to {}", schema.tables.len(), config.target.display());
        if let Some((target, _)) = &importer {
            info!("Written importer to {}", target.display());
        }
        Ok(())
    }
}
