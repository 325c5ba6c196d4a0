//! Python CSV import program for a profile, built on top of the module the
//! objects generator writes.

use std::error::Error;

use sql_scaffold_core::{
    profile::{BoundReference, ImportProfile, TableGenerationMethod},
    schema::Table,
    script::{
        Script,
        python::{Param, string_literal, to_pascal},
    },
};

use super::{
    CodeGen,
    objects::{ENTRIES, make_function},
};

const CSV_ROW: &str = "csv_row";
const CSV_FILE: &str = "csv_file";
const ENTRIES_VAR: &str = "entries";
const IMPORT_CSV: &str = "import_csv";

fn converter_name(table: &Table) -> String {
    format!("import_{}", table.name)
}

/// Referenced tables in order of first use, one parameter each.
fn reference_tables<'a>(references: &[BoundReference<'a>]) -> Vec<&'a str> {
    let mut tables: Vec<&str> = vec![];
    for reference in references {
        if !tables.contains(&reference.table) {
            tables.push(reference.table);
        }
    }
    tables
}

#[derive(thiserror::Error, Debug)]
#[error("the importer needs a profile")]
pub struct NoProfile;

pub struct ImporterCodeGen {
    objects_module: String,
    delimiter: u8,
    profile: Option<ImportProfile>,
}

impl ImporterCodeGen {
    pub fn new(objects_module: impl Into<String>, delimiter: u8) -> Self {
        Self {
            objects_module: objects_module.into(),
            delimiter,
            profile: None,
        }
    }

    fn emit_converter(
        method: &TableGenerationMethod,
        references: &[BoundReference<'_>],
        script: &mut Script,
    ) -> Result<(), Box<dyn Error>> {
        let table = method.table();
        let class_name = table.class_name();
        let mut arguments = vec![];
        for (column, chain) in method.profile().iter() {
            let input = match method {
                TableGenerationMethod::NormalCsv { .. } => CSV_ROW,
                TableGenerationMethod::Constant { .. } => "None",
            };
            arguments.push(format!("{column}={}", chain.render(input, script.imports_mut())?));
        }
        for reference in references {
            arguments.push(format!("{}={}", reference.column, reference.table));
        }
        let mut params = vec![];
        let call = match method {
            TableGenerationMethod::NormalCsv { .. } => {
                let row_type = method.input_type().render(script.imports_mut());
                params.push(Param::typed(CSV_ROW, row_type));
                params.push(Param::typed(ENTRIES_VAR, ENTRIES));
                format!("return {ENTRIES_VAR}.{}(", make_function(table))
            }
            TableGenerationMethod::Constant { .. } => format!("return {class_name}.constant("),
        };
        for referenced in reference_tables(references) {
            params.push(Param::typed(referenced, to_pascal(referenced)));
        }
        script.function(&converter_name(table), &params, Some(class_name.as_str()), |s| {
            if arguments.is_empty() {
                s.line(format!("{call})"));
            } else {
                s.aligned_line(&call, ",", &arguments, ")");
            }
        });
        script.empty_lines(1);
        Ok(())
    }

    fn emit_import_csv(&self, profile: &ImportProfile, script: &mut Script) {
        let bound = profile.bound_references();
        let referenced = profile.referenced_tables();
        let delimiter = string_literal(&char::from(self.delimiter).to_string());
        let call = |method: &TableGenerationMethod, references: &[BoundReference<'_>]| {
            let table = method.table();
            let mut arguments = vec![];
            if let TableGenerationMethod::NormalCsv { .. } = method {
                arguments.push(CSV_ROW.to_string());
                arguments.push(ENTRIES_VAR.to_string());
            }
            arguments.extend(reference_tables(references).into_iter().map(str::to_string));
            let call = format!("{}({})", converter_name(table), arguments.join(", "));
            match referenced.contains(&table.name.as_str()) {
                true => format!("{} = {call}", table.name),
                false => call,
            }
        };
        script.function(IMPORT_CSV, &[], Some("None"), |s| {
            s.if_block("len(argv) != 2", |s| {
                s.line("print(f\"Usage: {argv[0]} <path_to_csv>\")");
                s.line("exit(1)");
            });
            s.line(format!("{ENTRIES_VAR} = {ENTRIES}()"));
            for (method, references) in profile.methods().iter().zip(&bound) {
                if !method.is_recursive() {
                    s.line(call(method, references.as_slice()));
                }
            }
            s.with_block("open(file=argv[1], mode=\"r\", newline=\"\")", CSV_FILE, |s| {
                s.for_block(CSV_ROW, &format!("DictReader({CSV_FILE}, delimiter={delimiter})"), |s| {
                    for (method, references) in profile.methods().iter().zip(&bound) {
                        if method.is_recursive() {
                            s.line(call(method, references.as_slice()));
                        }
                    }
                });
            });
            s.line("connection = connect_to_database()");
            s.try_block(|s| {
                s.line(format!("{ENTRIES_VAR}.add_all_to_database(connection)"));
                s.line("commit_to_database(connection)");
            });
            s.except_block(Some("Exception as error"), |s| {
                s.line("print(f\"Import failed: {error}\")")
            });
            s.line("close_database(connection)");
        });
        script.empty_lines(1);
        script.if_block("__name__ == \"__main__\"", |s| s.line(format!("{IMPORT_CSV}()")));
    }

    fn generate(&self, profile: &ImportProfile) -> Result<String, Box<dyn Error>> {
        let mut script = Script::new();
        script.add_import("__future__", "annotations");
        script.add_import("csv", "DictReader");
        script.add_import("sys", "argv");
        script.add_import(&self.objects_module, "*");

        for operation in profile.operations() {
            operation.emit_definition(&mut script);
            script.empty_lines(1);
        }
        for (method, references) in profile.methods().iter().zip(profile.bound_references()) {
            Self::emit_converter(method, &references, &mut script)?;
        }
        self.emit_import_csv(profile, &mut script);
        Ok(script.finish())
    }
}

impl CodeGen for ImporterCodeGen {
    /// Tables reach the importer through the profile.
    fn push_table(&mut self, _table: &Table) -> Result<(), Box<dyn Error>> {
        Ok(())
    }

    fn push_profile(&mut self, profile: &ImportProfile) -> Result<(), Box<dyn Error>> {
        self.profile = Some(profile.clone());
        Ok(())
    }

    fn finalize(&self) -> Result<String, Box<dyn Error>> {
        let profile = self.profile.as_ref().ok_or(NoProfile)?;
        self.generate(profile)
    }
}
