//! Python data-access module: one class per table, the `Entries` identity
//! cache and the connection helpers the importer relies on.

use std::error::Error;

use sql_scaffold_core::{
    schema::{SQL_OBJECT, Schema, Semantics, Table},
    script::{
        Imports, Script,
        python::{Param, string_literal},
    },
    types::TypeError,
};

use super::CodeGen;
use crate::config::DbInfo;

pub const ENTRIES: &str = "Entries";
pub const CONNECTION: &str = "SqlConnection";
const OTHER: &str = "other";
const ENTRY: &str = "entry";

fn cache_name(table: &Table) -> String {
    format!("_{}_cache", table.name)
}

pub fn make_function(table: &Table) -> String {
    format!("make_{}", table.name)
}

fn quoted(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

/// Constructor parameters, in the order of [`Table::sorted_columns`].
fn field_params(table: &Table, semantics: &Semantics, imports: &mut Imports) -> Result<Vec<Param>, TypeError> {
    table
        .sorted_columns()
        .into_iter()
        .map(|column| {
            let value_type = column.make_type();
            let param = Param::typed(column.name.clone(), value_type.render(imports));
            Ok(match column.field_default(semantics) {
                Some(value) => param.with_default(value_type.render_literal(&value, imports)?),
                None => param,
            })
        })
        .collect()
}

/// `name=name, ...` forwarding every parameter by keyword.
fn keyword_arguments(params: &[Param]) -> String {
    params
        .iter()
        .map(|param| format!("{0}={0}", param.name))
        .collect::<Vec<_>>()
        .join(", ")
}

pub struct ObjectsCodeGen {
    semantics: Semantics,
    database: DbInfo,
    schema: Schema,
}

impl ObjectsCodeGen {
    pub fn new(semantics: Semantics, database: DbInfo) -> Self {
        Self {
            semantics,
            database,
            schema: Schema::default(),
        }
    }

    fn emit_database_functions(&self, script: &mut Script) {
        let connection = Param::typed("connection", CONNECTION);
        let database = &self.database;
        script.function("connect_to_database", &[], Some(CONNECTION), |s| {
            s.aligned_line(
                "return sql_connect(",
                ",",
                [
                    format!("host={}", string_literal(&database.host)),
                    format!("port={}", database.port),
                    format!("user={}", string_literal(&database.user)),
                    format!("password={}", string_literal(&database.password)),
                    format!("database={}", string_literal(&database.name)),
                ],
                ")",
            );
        });
        script.empty_lines(1);
        script.function("commit_to_database", &[connection.clone()], Some("None"), |s| {
            s.line("connection.commit()")
        });
        script.empty_lines(1);
        script.function("close_database", &[connection], Some("None"), |s| {
            s.line("connection.close()")
        });
        script.empty_lines(1);
    }

    fn emit_base_class(script: &mut Script) {
        script.class(SQL_OBJECT, None, |s| {
            s.static_method(
                "add_to_database",
                &[
                    Param::typed("connection", CONNECTION),
                    Param::typed("objects", "Iterable[Any]"),
                ],
                Some("None"),
                |s| s.line("raise Exception(\"Abstract method\")"),
            );
        });
    }

    fn emit_table_class(&self, table: &Table, script: &mut Script) -> Result<(), Box<dyn Error>> {
        let class_name = table.class_name();
        let params = field_params(table, &self.semantics, script.imports_mut())?;
        let columns = table.sorted_columns();
        let constant = self.constant_call(table, script.imports_mut())?;
        script.class(&class_name, Some(SQL_OBJECT), |s| {
            s.method("__init__", &params, None, |s| {
                for column in &columns {
                    s.line(format!("self.{0} = {0}", column.name));
                }
            });
            self.emit_insert(table, &class_name, s);
            if let Some((key, body)) = &constant {
                s.static_method("constant", key, Some(class_name.as_str()), |s| s.line(body));
            }
            self.emit_equality(table, &class_name, s);
        });
        Ok(())
    }

    fn emit_insert(&self, table: &Table, class_name: &str, script: &mut Script) {
        let columns = table.columns.values().collect::<Vec<_>>();
        let names = columns
            .iter()
            .map(|column| quoted(&column.name))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["%s"; columns.len()].join(", ");
        let values = columns
            .iter()
            .map(|column| column.sql_value(&format!("o.{}", column.name)))
            .collect::<Vec<_>>()
            .join(", ");
        script.static_method(
            "add_to_database",
            &[
                Param::typed("connection", CONNECTION),
                Param::typed("objects", format!("Iterable[{class_name}]")),
            ],
            Some("None"),
            |s| {
                s.aligned_line(
                    "stmt = ",
                    " \\",
                    [
                        string_literal(&format!("INSERT INTO {} (", quoted(&table.name))),
                        string_literal(&format!("{names}) ")),
                        string_literal(&format!("VALUES ({placeholders})")),
                    ],
                    "",
                );
                s.line(format!("values = list([{values}] for o in objects)"));
                s.if_block("len(values) == 0", |s| s.line("return"));
                s.line("cursor = connection.cursor()");
                s.line("cursor.executemany(stmt, values)");
                s.line("cursor.close()");
            },
        );
    }

    /// Key parameters and body of `constant`, for tables with a primary key.
    fn constant_call(
        &self,
        table: &Table,
        imports: &mut Imports,
    ) -> Result<Option<(Vec<Param>, String)>, Box<dyn Error>> {
        let Some(primary) = &table.primary else {
            return Ok(None);
        };
        let mut key = vec![];
        let mut arguments = vec![];
        for column in table.sorted_columns() {
            let value_type = column.make_type();
            if primary.contains(&column.name) {
                key.push(Param::typed(column.name.clone(), value_type.render(imports)));
                arguments.push(format!("{0}={0}", column.name));
            } else {
                let literal = value_type.render_literal(&column.constant_value()?, imports)?;
                arguments.push(format!("{}={literal}", column.name));
            }
        }
        let body = format!("return {}({})", table.class_name(), arguments.join(", "));
        Ok(Some((key, body)))
    }

    fn emit_equality(&self, table: &Table, class_name: &str, script: &mut Script) {
        let constraints = table.equality_constraints(&self.semantics);
        let hash_columns = table.hash_columns(&self.semantics);
        script.method("__eq__", &[Param::typed(OTHER, "Any")], Some("bool"), |s| {
            if constraints.is_empty() {
                s.line(format!("return self is {OTHER}"));
                return;
            }
            s.if_block(&format!("not isinstance({OTHER}, {class_name})"), |s| {
                s.line("return False")
            });
            let groups = constraints
                .iter()
                .map(|constraint| {
                    constraint
                        .columns
                        .iter()
                        .map(|column| format!("self.{column} == {OTHER}.{column}"))
                        .collect::<Vec<_>>()
                        .join(" and ")
                })
                .collect::<Vec<_>>();
            s.aligned_expression("return ", " or ", groups, "", " \\");
        });
        script.method("__hash__", &[], Some("int"), |s| {
            let fields = hash_columns
                .iter()
                .map(|column| format!("self.{column}"))
                .collect::<Vec<_>>();
            match fields.as_slice() {
                [] if constraints.is_empty() => s.line("return id(self)"),
                [] => s.line("return 0"),
                [field] => s.line(format!("return hash({field})")),
                fields => s.line(format!("return hash(({}))", fields.join(", "))),
            }
        });
    }

    fn emit_entries(&self, order: &[&Table], script: &mut Script) -> Result<(), Box<dyn Error>> {
        let mut makers = vec![];
        for table in order {
            makers.push(field_params(table, &self.semantics, script.imports_mut())?);
        }
        script.class(ENTRIES, None, |s| {
            s.method("__init__", &[], None, |s| {
                for table in order {
                    let class_name = table.class_name();
                    s.line(format!(
                        "self.{}: dict[{class_name}, {class_name}] = {{}}",
                        cache_name(table)
                    ));
                }
            });
            s.method(
                "add_all_to_database",
                &[Param::typed("connection", CONNECTION)],
                Some("None"),
                |s| {
                    for table in order {
                        s.line(format!(
                            "{}.add_to_database(connection, self.{}.values())",
                            table.class_name(),
                            cache_name(table)
                        ));
                    }
                },
            );
            for (table, params) in order.iter().zip(&makers) {
                let class_name = table.class_name();
                let cache = cache_name(table);
                s.method(&make_function(table), params, Some(class_name.as_str()), |s| {
                    s.line(format!("{ENTRY} = {class_name}({})", keyword_arguments(params)));
                    s.if_block(&format!("{ENTRY} not in self.{cache}"), |s| {
                        s.line(format!("self.{cache}[{ENTRY}] = {ENTRY}"))
                    });
                    s.line(format!("return self.{cache}[{ENTRY}]"));
                });
            }
        });
        Ok(())
    }
}

impl CodeGen for ObjectsCodeGen {
    fn push_table(&mut self, table: &Table) -> Result<(), Box<dyn Error>> {
        self.schema.add_table(table.clone());
        Ok(())
    }

    fn finalize(&self) -> Result<String, Box<dyn Error>> {
        let order = self
            .schema
            .generation_order()?
            .into_iter()
            .filter_map(|name| self.schema.tables.get(&name))
            .collect::<Vec<_>>();

        let mut script = Script::new();
        script.add_import("__future__", "annotations");
        let imports = script.imports_mut();
        imports.add_aliased("mysql.connector", "connect", "sql_connect");
        imports.add_aliased("mysql.connector.connection", "MySQLConnection", CONNECTION);
        imports.add("typing", "Any");
        imports.add("typing", "Iterable");

        self.emit_database_functions(&mut script);
        self.emit_entries(&order, &mut script)?;
        Self::emit_base_class(&mut script);
        for table in self.schema.tables.values() {
            self.emit_table_class(table, &mut script)?;
        }
        Ok(script.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::tests::geography;

    fn generate(semantics: Semantics) -> String {
        let mut codegen = ObjectsCodeGen::new(
            semantics,
            DbInfo {
                name: "world".into(),
                ..DbInfo::default()
            },
        );
        for table in geography().tables.values() {
            codegen.push_table(table).unwrap();
        }
        codegen.finalize().unwrap()
    }

    #[test]
    fn module_starts_with_its_imports() {
        let code = generate(Semantics::default());
        assert!(code.starts_with(
            "from __future__ import annotations\n\
             from mysql.connector import connect as sql_connect\n\
             from mysql.connector.connection import MySQLConnection as SqlConnection\n\
             from typing import Any, Iterable, Optional\n"
        ));
        assert!(code.contains("def connect_to_database() -> SqlConnection:\n    return sql_connect(host=\"localhost\",\n"));
        assert!(code.contains("                       database=\"world\")\n"));
    }

    #[test]
    fn entries_cache_every_table_in_insertion_order() {
        let code = generate(Semantics::default());
        assert!(code.contains(
            "    def add_all_to_database(self,\n\
             \x20                           connection: SqlConnection) -> None:\n\
             \x20       Country.add_to_database(connection, self._country_cache.values())\n\
             \x20       City.add_to_database(connection, self._city_cache.values())\n"
        ));
        assert!(code.contains("        self._city_cache: dict[City, City] = {}\n"));
        assert!(code.contains(
            "        entry = City(name=name, country=country, zip=zip, rank=rank)\n\
             \x20       if entry not in self._city_cache:\n\
             \x20           self._city_cache[entry] = entry\n\
             \x20       return self._city_cache[entry]\n"
        ));
    }

    #[test]
    fn classes_insert_through_the_connector() {
        let code = generate(Semantics::default());
        assert!(code.contains("class City(SqlObject):\n    def __init__(self,\n"));
        assert!(code.contains("                 zip: Optional[int] = None,\n"));
        assert!(code.contains("                 rank: Optional[int] = 0):\n"));
        assert!(code.contains(
            "        stmt = \"INSERT INTO `city` (\" \\\n\
             \x20              \"`name`, `country`, `zip`, `rank`) \" \\\n\
             \x20              \"VALUES (%s, %s, %s, %s)\"\n"
        ));
        assert!(code.contains("        values = list([o.name, o.country.code, o.zip, o.rank] for o in objects)\n"));
        assert!(code.contains(
            "    def constant(name: str) -> City:\n        return City(name=name, country=Country.constant(code=\"\"), zip=None, rank=0)\n"
        ));
    }

    #[test]
    fn equality_follows_the_semantics() {
        let code = generate(Semantics::default());
        assert!(code.contains("        return self.name == other.name\n"));
        assert!(code.contains("        return hash(self.name)\n"));

        let code = generate(Semantics {
            use_primary_key_in_equality: false,
            default_value_for_optional_column: false,
        });
        assert!(code.contains("        return self is other\n"));
        assert!(code.contains("        return id(self)\n"));
        assert!(code.contains("                 zip: Optional[int],\n"));
    }
}
