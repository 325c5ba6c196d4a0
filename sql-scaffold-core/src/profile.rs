//! Import profiles.
//!
//! A profile lists, in import order, the tables filled from a CSV file and how
//! each of their columns is computed: one [`OperationChain`] per column. Tables
//! are imported either once per CSV record ([`TableGenerationMethod::NormalCsv`])
//! or as a single fixed row built from literal primary-key values
//! ([`TableGenerationMethod::Constant`]).

pub mod draft;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::operation::{Catalog, OperationChain, OperationError, OperationInstance};
use crate::schema::{Column, Schema, SchemaError, Table};
use crate::types::{TypeError, ValueType};

pub const NORMAL_CSV: &str = "normal_csv";
pub const CONSTANT: &str = "constant";

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("invalid profile document: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("unknown generation method '{method}' for {table}")]
    UnknownMethod { table: String, method: String },
    #[error("unknown operation '{operation}' for {table}.{column}")]
    UnknownOperation {
        table: String,
        column: String,
        operation: String,
    },
    #[error("cannot build default chain: {0}")]
    Draft(OperationError),
    #[error("{table}.{column}: {source}")]
    Operation {
        table: String,
        column: String,
        source: OperationError,
    },
    #[error("no chain for required column {table}.{column}")]
    MissingColumn { table: String, column: String },
    #[error("{table}.{column} is a reference, it is filled from the table it points at")]
    ReferenceColumn { table: String, column: String },
    #[error("invalid chain for {table}.{column}: {source}")]
    InvalidChain {
        table: String,
        column: String,
        source: TypeError,
    },
    #[error("the chain for {table}.{column} cannot produce any value")]
    UninhabitedChain { table: String, column: String },
    #[error("{table} is imported more than once")]
    DuplicateTable { table: String },
    #[error("constant {table}.{column} must be a string, not {value_type}")]
    UnsupportedConstant {
        table: String,
        column: String,
        value_type: ValueType,
    },
}

/// Chain computing each column, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableProfile {
    chains: IndexMap<String, OperationChain>,
}

impl TableProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, chain: OperationChain) -> Option<OperationChain> {
        self.chains.insert(column.into(), chain)
    }

    pub fn get(&self, column: &str) -> Option<&OperationChain> {
        self.chains.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.chains.contains_key(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OperationChain)> {
        self.chains.iter().map(|(column, chain)| (column.as_str(), chain))
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableGenerationMethod {
    /// One entry per CSV record.
    NormalCsv { table: Table, profile: TableProfile },
    /// One fixed entry, never written to the database, which later tables of
    /// the same record can reference.
    Constant { table: Table, profile: TableProfile },
}

impl TableGenerationMethod {
    pub fn from_name(name: &str, table: Table, profile: TableProfile) -> Option<Self> {
        match name {
            NORMAL_CSV => Some(Self::NormalCsv { table, profile }),
            CONSTANT => Some(Self::Constant { table, profile }),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NormalCsv { .. } => NORMAL_CSV,
            Self::Constant { .. } => CONSTANT,
        }
    }

    pub fn table(&self) -> &Table {
        match self {
            Self::NormalCsv { table, .. } | Self::Constant { table, .. } => table,
        }
    }

    pub fn profile(&self) -> &TableProfile {
        match self {
            Self::NormalCsv { profile, .. } | Self::Constant { profile, .. } => profile,
        }
    }

    pub fn profile_mut(&mut self) -> &mut TableProfile {
        match self {
            Self::NormalCsv { profile, .. } | Self::Constant { profile, .. } => profile,
        }
    }

    /// Runs once per record.
    pub fn is_recursive(&self) -> bool {
        matches!(self, Self::NormalCsv { .. })
    }

    pub fn writes_to_database(&self) -> bool {
        matches!(self, Self::NormalCsv { .. })
    }

    /// What every chain of the method receives: the record, or nothing.
    pub fn input_type(&self) -> ValueType {
        match self {
            Self::NormalCsv { .. } => ValueType::dict(ValueType::Str, ValueType::Str),
            Self::Constant { .. } => ValueType::None,
        }
    }

    /// Columns that must have a chain. References never do, their value is
    /// the entry of the referenced table.
    pub fn required_columns(&self) -> Result<Vec<&Column>, SchemaError> {
        match self {
            Self::NormalCsv { table, .. } => Ok(table
                .columns
                .values()
                .filter(|c| !c.optional && !c.is_defaulted() && !c.is_reference())
                .collect()),
            Self::Constant { table, .. } => table
                .primary_columns()?
                .iter()
                .map(|name| table.column(name))
                .collect(),
        }
    }

    /// Columns that may have a chain.
    pub fn optional_columns(&self) -> Vec<&Column> {
        match self {
            Self::NormalCsv { table, .. } => table
                .columns
                .values()
                .filter(|c| (c.optional || c.is_defaulted()) && !c.is_reference())
                .collect(),
            Self::Constant { .. } => vec![],
        }
    }

    pub fn check_validity(&self) -> Result<(), ProfileError> {
        let table = self.table();
        let profile = self.profile();
        for column in self.required_columns()? {
            if !profile.contains(&column.name) {
                return Err(ProfileError::MissingColumn {
                    table: table.name.clone(),
                    column: column.name.clone(),
                });
            }
        }
        let input = self.input_type();
        for (name, chain) in profile.iter() {
            let column = table.column(name)?;
            if column.is_reference() {
                return Err(ProfileError::ReferenceColumn {
                    table: table.name.clone(),
                    column: name.to_string(),
                });
            }
            chain
                .validate(&input, &column.make_type())
                .map_err(|source| ProfileError::InvalidChain {
                    table: table.name.clone(),
                    column: name.to_string(),
                    source,
                })?;
            if chain.last_type().is_some_and(ValueType::is_uninhabited) {
                return Err(ProfileError::UninhabitedChain {
                    table: table.name.clone(),
                    column: name.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MethodDocument {
    table: String,
    method: String,
    columns: IndexMap<String, Vec<OperationDocument>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OperationDocument {
    name: String,
    #[serde(default)]
    params: Vec<serde_json::Value>,
}

/// A reference column whose target was imported by an earlier method of the
/// same record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundReference<'a> {
    pub column: &'a str,
    pub table: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportProfile {
    methods: Vec<TableGenerationMethod>,
}

impl ImportProfile {
    pub fn new(methods: Vec<TableGenerationMethod>) -> Self {
        Self { methods }
    }

    pub fn methods(&self) -> &[TableGenerationMethod] {
        &self.methods
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(|method| method.table().name.as_str())
    }

    pub fn from_json(json: &str, schema: &Schema, catalog: &Catalog) -> Result<Self, ProfileError> {
        let documents: Vec<MethodDocument> = serde_json::from_str(json)?;
        let mut methods = Vec::with_capacity(documents.len());
        for document in documents {
            let table = schema.table(&document.table)?;
            let mut profile = TableProfile::new();
            for (column, operations) in document.columns {
                table.column(&column)?;
                let mut chain = OperationChain::new();
                for operation in operations {
                    let definition = catalog.get(&operation.name).ok_or_else(|| {
                        ProfileError::UnknownOperation {
                            table: table.name.clone(),
                            column: column.clone(),
                            operation: operation.name.clone(),
                        }
                    })?;
                    let instance = definition
                        .make_instance_from_json(&operation.params)
                        .map_err(|source| ProfileError::Operation {
                            table: table.name.clone(),
                            column: column.clone(),
                            source,
                        })?;
                    chain.append(instance);
                }
                profile.insert(column, chain);
            }
            let method = TableGenerationMethod::from_name(&document.method, table.clone(), profile)
                .ok_or_else(|| ProfileError::UnknownMethod {
                    table: document.table.clone(),
                    method: document.method.clone(),
                })?;
            methods.push(method);
        }
        Ok(Self { methods })
    }

    pub fn to_json(&self) -> Result<String, ProfileError> {
        let documents = self
            .methods
            .iter()
            .map(|method| MethodDocument {
                table: method.table().name.clone(),
                method: method.name().to_string(),
                columns: method
                    .profile()
                    .iter()
                    .map(|(column, chain)| {
                        let operations = chain
                            .iter()
                            .map(|instance| OperationDocument {
                                name: instance.name().to_string(),
                                params: instance.args().iter().map(|arg| arg.to_json()).collect(),
                            })
                            .collect();
                        (column.to_string(), operations)
                    })
                    .collect(),
            })
            .collect::<Vec<_>>();
        Ok(serde_json::to_string_pretty(&documents)?)
    }

    pub fn check_validity(&self) -> Result<(), ProfileError> {
        let mut seen: Vec<&str> = vec![];
        for method in &self.methods {
            let table = method.table().name.as_str();
            if seen.contains(&table) {
                return Err(ProfileError::DuplicateTable {
                    table: table.to_string(),
                });
            }
            seen.push(table);
            method.check_validity()?;
        }
        for (method, references) in self.methods.iter().zip(self.bound_references()) {
            if !method.is_recursive() {
                continue;
            }
            let table = method.table();
            let unbound = table.references().find(|(column, _)| {
                !column.optional
                    && !column.is_defaulted()
                    && !references.iter().any(|bound| bound.column == column.name)
            });
            if let Some((column, _)) = unbound {
                return Err(ProfileError::MissingColumn {
                    table: table.name.clone(),
                    column: column.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Every operation used by the profile, once, in order of first use.
    pub fn operations(&self) -> Vec<&OperationInstance> {
        let mut operations: Vec<&OperationInstance> = vec![];
        for method in &self.methods {
            for (_, chain) in method.profile().iter() {
                for instance in chain {
                    if !operations.iter().any(|known| known.name() == instance.name()) {
                        operations.push(instance);
                    }
                }
            }
        }
        operations
    }

    /// For each method, the reference columns it can fill from the entries of
    /// the methods before it.
    pub fn bound_references(&self) -> Vec<Vec<BoundReference<'_>>> {
        let mut imported: Vec<&str> = vec![];
        let mut bound = Vec::with_capacity(self.methods.len());
        for method in &self.methods {
            let table = method.table();
            bound.push(
                table
                    .references()
                    .filter(|(_, reference)| imported.contains(&reference.table.as_str()))
                    .map(|(column, reference)| BoundReference {
                        column: &column.name,
                        table: &reference.table,
                    })
                    .collect(),
            );
            imported.push(&table.name);
        }
        bound
    }

    /// Tables whose entry is referenced by a later method of the same record.
    pub fn referenced_tables(&self) -> Vec<&str> {
        let mut tables: Vec<&str> = vec![];
        for references in self.bound_references() {
            for reference in references {
                if !tables.contains(&reference.table) {
                    tables.push(reference.table);
                }
            }
        }
        tables
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::operation::Builtin;
    use crate::schema::{ForeignKey, SqlType, UniqueConstraint};
    use crate::types::Value;

    /// `country(code)`, `city(name, country -> country, zip?)`.
    pub(crate) fn geography() -> Schema {
        let varchar = || SqlType::String { char_limit: Some(45) };
        let mut schema = Schema::default();
        let mut country = Table::new("country");
        country.add_column(Column::new("code", varchar(), false)).unwrap();
        country.set_primary(UniqueConstraint::new(["code"])).unwrap();
        schema.add_table(country);
        let mut city = Table::new("city");
        city.add_column(Column::new("name", varchar(), false)).unwrap();
        city.add_column(Column::new("country", varchar(), false)).unwrap();
        city.add_column(Column::new("zip", SqlType::Int { precision: None }, true)).unwrap();
        city.set_primary(UniqueConstraint::new(["name"])).unwrap();
        schema.add_table(city);
        schema
            .resolve_foreign_keys(&[ForeignKey {
                constraint: "fk_country".into(),
                table: "city".into(),
                columns: vec!["country".into()],
                referenced_table: "country".into(),
                referenced_columns: vec!["code".into()],
            }])
            .unwrap();
        schema
    }

    pub(crate) const GEOGRAPHY_PROFILE: &str = r#"[
        {"table": "country", "method": "constant", "columns": {
            "code": [{"name": "constant_str", "params": ["FR"]}]
        }},
        {"table": "city", "method": "normal_csv", "columns": {
            "name": [{"name": "csv_column", "params": ["Ville"]}, {"name": "upper_str", "params": []}],
            "zip": [
                {"name": "csv_column", "params": ["CP"]},
                {"name": "nullify_str"},
                {"name": "parse_opt_int", "params": []}
            ]
        }}
    ]"#;

    #[test]
    fn loads_and_validates_a_profile() {
        let schema = geography();
        let profile = ImportProfile::from_json(GEOGRAPHY_PROFILE, &schema, &Catalog::default()).unwrap();
        profile.check_validity().unwrap();
        assert_eq!(profile.tables().collect::<Vec<_>>(), vec!["country", "city"]);
        let country = &profile.methods()[0];
        assert_eq!(country.name(), CONSTANT);
        assert!(!country.is_recursive());
        assert!(!country.writes_to_database());
        let code = country.profile().get("code").unwrap();
        assert_eq!(
            code.last_type(),
            Some(&ValueType::enumeration(ValueType::Str, [Value::str("FR")]).unwrap())
        );
        let names = profile
            .operations()
            .iter()
            .map(|operation| operation.name())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec!["constant_str", "csv_column", "upper_str", "nullify_str", "parse_opt_int"]
        );
    }

    #[test]
    fn references_bind_to_earlier_methods() {
        let schema = geography();
        let profile = ImportProfile::from_json(GEOGRAPHY_PROFILE, &schema, &Catalog::default()).unwrap();
        assert_eq!(
            profile.bound_references(),
            vec![vec![], vec![BoundReference { column: "country", table: "country" }]]
        );
        assert_eq!(profile.referenced_tables(), vec!["country"]);
    }

    #[test]
    fn required_and_optional_columns_skip_references() {
        let schema = geography();
        let method = TableGenerationMethod::NormalCsv {
            table: schema.tables["city"].clone(),
            profile: TableProfile::new(),
        };
        let names = |columns: Vec<&Column>| columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(method.required_columns().unwrap()), vec!["name"]);
        assert_eq!(names(method.optional_columns()), vec!["zip"]);
        assert!(matches!(
            method.check_validity(),
            Err(ProfileError::MissingColumn { column, .. }) if column == "name"
        ));
    }

    #[test]
    fn profile_round_trips_through_json() {
        let schema = geography();
        let catalog = Catalog::default();
        let profile = ImportProfile::from_json(GEOGRAPHY_PROFILE, &schema, &catalog).unwrap();
        let json = profile.to_json().unwrap();
        let reloaded = ImportProfile::from_json(&json, &schema, &catalog).unwrap();
        assert_eq!(profile, reloaded);
    }

    #[test]
    fn unknown_names_are_reported() {
        let schema = geography();
        let catalog = Catalog::default();
        let bad_method = r#"[{"table": "city", "method": "sometimes", "columns": {}}]"#;
        assert!(matches!(
            ImportProfile::from_json(bad_method, &schema, &catalog),
            Err(ProfileError::UnknownMethod { .. })
        ));
        let bad_operation =
            r#"[{"table": "city", "method": "normal_csv", "columns": {"name": [{"name": "shout"}]}}]"#;
        assert!(matches!(
            ImportProfile::from_json(bad_operation, &schema, &catalog),
            Err(ProfileError::UnknownOperation { operation, .. }) if operation == "shout"
        ));
        let bad_table = r#"[{"table": "town", "method": "normal_csv", "columns": {}}]"#;
        assert!(matches!(
            ImportProfile::from_json(bad_table, &schema, &catalog),
            Err(ProfileError::Schema(SchemaError::UnknownTable { .. }))
        ));
        let bad_arity = r#"[{"table": "city", "method": "normal_csv", "columns": {"name": [{"name": "csv_column"}]}}]"#;
        assert!(matches!(
            ImportProfile::from_json(bad_arity, &schema, &catalog),
            Err(ProfileError::Operation {
                source: OperationError::ArityMismatch { .. },
                ..
            })
        ));
    }

    #[test]
    fn ill_typed_chain_is_rejected() {
        let schema = geography();
        let mut profile = TableProfile::new();
        let chain = OperationChain::from_instances([
            Builtin::CsvColumn.definition().make_instance(vec![Value::str("Ville")]).unwrap(),
            Builtin::ParseInt.definition().make_instance(vec![]).unwrap(),
        ]);
        profile.insert("name", chain);
        let method = TableGenerationMethod::NormalCsv {
            table: schema.tables["city"].clone(),
            profile,
        };
        assert!(matches!(
            method.check_validity(),
            Err(ProfileError::InvalidChain {
                source: TypeError::NotAssignable { .. },
                ..
            })
        ));
    }

    #[test]
    fn reference_columns_take_no_chain() {
        let schema = geography();
        let mut profile = TableProfile::new();
        let csv_column = |field: &str| {
            Builtin::CsvColumn.definition().make_instance(vec![Value::str(field)]).unwrap()
        };
        profile.insert("name", OperationChain::from_instances([csv_column("Ville")]));
        profile.insert("country", OperationChain::from_instances([csv_column("Pays")]));
        let method = TableGenerationMethod::NormalCsv {
            table: schema.tables["city"].clone(),
            profile,
        };
        assert!(matches!(method.check_validity(), Err(ProfileError::ReferenceColumn { .. })));
    }

    #[test]
    fn uninhabited_chain_is_rejected() {
        let schema = geography();
        let mut profile = TableProfile::new();
        let values = Value::List(vec![Value::str("A")]);
        let chain = OperationChain::from_instances([
            Builtin::CsvEnumColumn
                .definition()
                .make_instance(vec![Value::str("Ville"), values])
                .unwrap(),
            Builtin::ParseInt.definition().make_instance(vec![]).unwrap(),
        ]);
        profile.insert("zip", chain);
        profile.insert(
            "name",
            OperationChain::from_instances([Builtin::CsvColumn
                .definition()
                .make_instance(vec![Value::str("Ville")])
                .unwrap()]),
        );
        let method = TableGenerationMethod::NormalCsv {
            table: schema.tables["city"].clone(),
            profile,
        };
        assert!(matches!(
            method.check_validity(),
            Err(ProfileError::UninhabitedChain { column, .. }) if column == "zip"
        ));
    }

    #[test]
    fn required_reference_needs_an_earlier_method() {
        let schema = geography();
        let city_only = r#"[{"table": "city", "method": "normal_csv", "columns": {
            "name": [{"name": "csv_column", "params": ["Ville"]}]
        }}]"#;
        let profile = ImportProfile::from_json(city_only, &schema, &Catalog::default()).unwrap();
        assert!(matches!(
            profile.check_validity(),
            Err(ProfileError::MissingColumn { table, column }) if table == "city" && column == "country"
        ));
    }

    #[test]
    fn duplicate_tables_are_rejected() {
        let schema = geography();
        let mut profile = TableProfile::new();
        profile.insert(
            "code",
            OperationChain::from_instances([Builtin::ConstantStr
                .definition()
                .make_instance(vec![Value::str("FR")])
                .unwrap()]),
        );
        let method = TableGenerationMethod::Constant {
            table: schema.tables["country"].clone(),
            profile,
        };
        let profile = ImportProfile::new(vec![method.clone(), method]);
        assert!(matches!(
            profile.check_validity(),
            Err(ProfileError::DuplicateTable { .. })
        ));
    }
}
