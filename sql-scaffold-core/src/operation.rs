//! Typed transformation steps and the chains built from them.
//!
//! An [`Operation`] is a named step with an input type, an output type and
//! typed arguments. Binding argument values gives an [`OperationInstance`],
//! which can be evaluated in-process or rendered as a call in the generated
//! program. An [`OperationChain`] threads instances one into the next and
//! narrows output types by probing when the incoming values are finite.

pub mod builtin;

use std::fmt;

use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, warn};

pub use builtin::Builtin;

use crate::script::python::Param;
use crate::script::{Imports, Script};
use crate::types::{TypeError, Value, ValueType};

/// Parameter name of the inner closure of every generated operation.
pub const OPERATION_INPUT: &str = "value";
pub const INNER_OPERATION: &str = "inner";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OperationError {
    #[error("{operation} takes {expected} argument(s), {found} given")]
    ArityMismatch {
        operation: String,
        expected: usize,
        found: usize,
    },
    #[error("argument {index} of {operation}: {source}")]
    InvalidArgument {
        operation: String,
        index: usize,
        source: TypeError,
    },
    #[error("{operation} expects {expected}, got {input}")]
    InvalidInput {
        operation: String,
        expected: ValueType,
        input: Value,
    },
    #[error("{operation} failed: {message}")]
    Execution { operation: String, message: String },
    #[error(transparent)]
    Type(#[from] TypeError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: &'static str,
    pub value_type: ValueType,
}

impl Argument {
    pub fn new(name: &'static str, value_type: ValueType) -> Self {
        Self { name, value_type }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub name: &'static str,
    pub input: ValueType,
    pub output: ValueType,
    pub args: Vec<Argument>,
    /// Produces values suitable for a primary key.
    pub primary: bool,
    /// Same input, same output. Impure operations are never probed.
    pub pure: bool,
    pub builtin: Builtin,
}

impl Operation {
    pub fn make_instance(&self, args: Vec<Value>) -> Result<OperationInstance, OperationError> {
        if args.len() != self.args.len() {
            return Err(OperationError::ArityMismatch {
                operation: self.name.to_string(),
                expected: self.args.len(),
                found: args.len(),
            });
        }
        for (index, (value, argument)) in args.iter().zip(&self.args).enumerate() {
            if !argument.value_type.admits(value) {
                return Err(OperationError::InvalidArgument {
                    operation: self.name.to_string(),
                    index,
                    source: TypeError::LiteralMismatch {
                        value: value.clone(),
                        value_type: argument.value_type.clone(),
                    },
                });
            }
        }
        let dynamic_output = self.builtin.dynamic_output(&args).transpose()?;
        Ok(OperationInstance {
            operation: self.clone(),
            args,
            dynamic_output,
        })
    }

    /// Arguments as stored in a profile document.
    pub fn make_instance_from_json(
        &self,
        params: &[serde_json::Value],
    ) -> Result<OperationInstance, OperationError> {
        if params.len() != self.args.len() {
            return Err(OperationError::ArityMismatch {
                operation: self.name.to_string(),
                expected: self.args.len(),
                found: params.len(),
            });
        }
        let args = params
            .iter()
            .zip(&self.args)
            .enumerate()
            .map(|(index, (param, argument))| {
                argument
                    .value_type
                    .literal_from_json(param)
                    .map_err(|source| OperationError::InvalidArgument {
                        operation: self.name.to_string(),
                        index,
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.make_instance(args)
    }

    /// Instance with every argument at its default literal.
    pub fn make_default_instance(&self) -> Result<OperationInstance, OperationError> {
        let args = self
            .args
            .iter()
            .map(|argument| argument.value_type.default_literal())
            .collect::<Result<Vec<_>, _>>()?;
        self.make_instance(args)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationInstance {
    operation: Operation,
    args: Vec<Value>,
    dynamic_output: Option<ValueType>,
}

impl OperationInstance {
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn name(&self) -> &'static str {
        self.operation.name
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn input_type(&self) -> &ValueType {
        &self.operation.input
    }

    pub fn output_type(&self) -> &ValueType {
        self.dynamic_output.as_ref().unwrap_or(&self.operation.output)
    }

    pub fn has_dynamic_output(&self) -> bool {
        self.dynamic_output.is_some()
    }

    pub fn execute(&self, input: &Value) -> Result<Value, OperationError> {
        if !self.operation.input.admits(input) {
            return Err(OperationError::InvalidInput {
                operation: self.operation.name.to_string(),
                expected: self.operation.input.clone(),
                input: input.clone(),
            });
        }
        self.operation
            .builtin
            .eval(&self.args, input)
            .map_err(|message| OperationError::Execution {
                operation: self.operation.name.to_string(),
                message,
            })
    }

    /// `name(args)(input)`.
    pub fn render_call(&self, input: &str, imports: &mut Imports) -> Result<String, TypeError> {
        let args = self
            .args
            .iter()
            .zip(&self.operation.args)
            .map(|(value, argument)| argument.value_type.render_literal(value, imports))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(format!("{}({})({input})", self.operation.name, args.join(", ")))
    }

    /// Emits the curried definition shared by every instance of the operation:
    /// the outer function binds the arguments, `inner` receives the value.
    pub fn emit_definition(&self, script: &mut Script) {
        let params = self
            .operation
            .args
            .iter()
            .map(|argument| {
                let annotation = argument.value_type.render(script.imports_mut());
                Param::typed(argument.name, annotation)
            })
            .collect::<Vec<_>>();
        let input_annotation = self.operation.input.render(script.imports_mut());
        let input = [Param::typed(OPERATION_INPUT, input_annotation)];
        let builtin = self.operation.builtin;
        script.function(self.operation.name, &params, None, |s| {
            s.inner_function(INNER_OPERATION, &input, |s| builtin.emit(s, OPERATION_INPUT));
            s.line(format!("return {INNER_OPERATION}"));
        });
    }
}

impl fmt::Display for OperationInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.operation.name)?;
        if !self.args.is_empty() {
            let args = self.args.iter().map(ToString::to_string).collect::<Vec<_>>();
            write!(f, "({})", args.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationChain {
    instances: Vec<OperationInstance>,
}

impl OperationChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_instances(instances: impl IntoIterator<Item = OperationInstance>) -> Self {
        let mut chain = Self::new();
        for instance in instances {
            chain.append(instance);
        }
        chain
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OperationInstance> {
        self.instances.iter()
    }

    pub fn first_type(&self) -> Option<&ValueType> {
        self.instances.first().map(OperationInstance::input_type)
    }

    pub fn last_type(&self) -> Option<&ValueType> {
        self.instances.last().map(OperationInstance::output_type)
    }

    /// Appends `instance`, narrowing its output type when the values reaching
    /// it are known.
    pub fn append(&mut self, mut instance: OperationInstance) {
        if let Some(last) = self.last_type()
            && last.is_narrowable()
            && !instance.has_dynamic_output()
            && instance.operation.pure
        {
            instance.dynamic_output = probe(&instance, last);
        }
        self.instances.push(instance);
    }

    pub fn is_valid(&self, input: &ValueType, output: &ValueType) -> bool {
        self.validate(input, output).is_ok()
    }

    /// First break in the contract `input -> op0 -> ... -> opN -> output`.
    pub fn validate(&self, input: &ValueType, output: &ValueType) -> Result<(), TypeError> {
        let (Some(first), Some(last)) = (self.instances.first(), self.instances.last()) else {
            return Err(TypeError::EmptyChain);
        };
        if !first.input_type().is_super_type(input) {
            return Err(TypeError::ChainMismatch {
                position: 0,
                expected: first.input_type().clone(),
                found: input.clone(),
            });
        }
        for (position, pair) in self.instances.windows(2).enumerate() {
            let (previous, next) = (&pair[0], &pair[1]);
            if !next.input_type().is_super_type(previous.output_type()) {
                return Err(TypeError::ChainMismatch {
                    position: position + 1,
                    expected: next.input_type().clone(),
                    found: previous.output_type().clone(),
                });
            }
        }
        if !output.is_super_type(last.output_type()) {
            return Err(TypeError::NotAssignable {
                expected: output.clone(),
                found: last.output_type().clone(),
            });
        }
        Ok(())
    }

    /// Nested call expression applying the chain to `input`.
    pub fn render(&self, input: &str, imports: &mut Imports) -> Result<String, TypeError> {
        self.instances
            .iter()
            .try_fold(input.to_string(), |expression, instance| {
                instance.render_call(&expression, imports)
            })
    }

    pub fn execute(&self, input: &Value) -> Result<Value, OperationError> {
        self.instances
            .iter()
            .try_fold(input.clone(), |value, instance| instance.execute(&value))
    }
}

impl<'a> IntoIterator for &'a OperationChain {
    type Item = &'a OperationInstance;
    type IntoIter = std::slice::Iter<'a, OperationInstance>;

    fn into_iter(self) -> Self::IntoIter {
        self.instances.iter()
    }
}

impl fmt::Display for OperationChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps = self.instances.iter().map(ToString::to_string).collect::<Vec<_>>();
        write!(f, "{}", steps.join(" -> "))
    }
}

/// Runs `instance` on every value of `incoming` and returns the enum of what
/// came out. Candidates the operation rejects are skipped.
fn probe(instance: &OperationInstance, incoming: &ValueType) -> Option<ValueType> {
    let mut results: Vec<Value> = vec![];
    let mut optional = false;
    for candidate in incoming.candidate_values() {
        match instance.execute(&candidate) {
            Ok(Value::None) => optional = true,
            Ok(value) => {
                if !results.contains(&value) {
                    results.push(value);
                }
            }
            Err(err) => debug!("{} skips {candidate}: {err}", instance.name()),
        }
    }
    if results.is_empty() && !optional {
        warn!(
            "{} produces no value from {incoming}, its output is uninhabited",
            instance.name()
        );
    }
    let base = instance.operation.output.raw().clone();
    match ValueType::enumeration(base, results) {
        Ok(narrowed) if optional => Some(ValueType::optional(narrowed)),
        Ok(narrowed) => Some(narrowed),
        Err(err) => {
            warn!("cannot narrow the output of {}: {err}", instance.name());
            None
        }
    }
}

/// Operations addressable by name from a profile.
#[derive(Debug, Clone)]
pub struct Catalog {
    operations: IndexMap<&'static str, Operation>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::from_operations(Builtin::ALL.iter().map(Builtin::definition))
    }
}

impl Catalog {
    pub fn from_operations(operations: impl IntoIterator<Item = Operation>) -> Self {
        Self {
            operations: operations
                .into_iter()
                .map(|operation| (operation.name, operation))
                .collect(),
        }
    }

    /// Value transformations only, without the record-reading operations.
    pub fn base() -> Self {
        Self::from_operations(
            Builtin::ALL
                .iter()
                .filter(|builtin| !builtin.reads_record())
                .map(Builtin::definition),
        )
    }

    pub fn get(&self, name: &str) -> Option<&Operation> {
        self.operations.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.operations.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(builtin: Builtin) -> Operation {
        builtin.definition()
    }

    fn enum_str(values: &[&str]) -> ValueType {
        ValueType::enumeration(ValueType::Str, values.iter().map(|v| Value::str(*v))).unwrap()
    }

    #[test]
    fn make_instance_checks_arity_and_arguments() {
        let constant = op(Builtin::ConstantStr);
        assert!(matches!(
            constant.make_instance(vec![]),
            Err(OperationError::ArityMismatch { expected: 1, found: 0, .. })
        ));
        assert!(matches!(
            constant.make_instance(vec![Value::Int(1)]),
            Err(OperationError::InvalidArgument { index: 0, .. })
        ));
        let instance = constant.make_instance(vec![Value::str("X")]).unwrap();
        assert_eq!(instance.output_type(), &enum_str(&["X"]));
    }

    #[test]
    fn make_instance_from_json_parses_typed_arguments() {
        let converter = op(Builtin::EnumConverter);
        let instance = converter
            .make_instance_from_json(&[serde_json::json!({"m": "MALE", "f": "FEMALE"})])
            .unwrap();
        assert_eq!(instance.output_type(), &enum_str(&["MALE", "FEMALE"]));
        assert!(matches!(
            converter.make_instance_from_json(&[serde_json::json!([1])]),
            Err(OperationError::InvalidArgument { index: 0, .. })
        ));
    }

    #[test]
    fn execute_rejects_inputs_outside_the_input_type() {
        let upper = op(Builtin::UpperStr).make_instance(vec![]).unwrap();
        assert_eq!(upper.execute(&Value::str("ab")).unwrap(), Value::str("AB"));
        assert!(matches!(
            upper.execute(&Value::None),
            Err(OperationError::InvalidInput { .. })
        ));
    }

    #[test]
    fn chain_with_mismatched_middle_step_is_rejected() {
        let chain = OperationChain::from_instances([
            op(Builtin::CsvColumn).make_instance(vec![Value::str("age")]).unwrap(),
            op(Builtin::ParseInt).make_instance(vec![]).unwrap(),
            op(Builtin::UpperStr).make_instance(vec![]).unwrap(),
        ]);
        let input = ValueType::dict(ValueType::Str, ValueType::Str);
        assert_eq!(
            chain.validate(&input, &ValueType::Str),
            Err(TypeError::ChainMismatch {
                position: 2,
                expected: ValueType::Str,
                found: ValueType::Int,
            })
        );
        assert!(!chain.is_valid(&input, &ValueType::Str));
    }

    #[test]
    fn chain_checks_both_ends() {
        let chain = OperationChain::from_instances([
            op(Builtin::CsvColumn).make_instance(vec![Value::str("age")]).unwrap(),
            op(Builtin::ParseInt).make_instance(vec![]).unwrap(),
        ]);
        let input = ValueType::dict(ValueType::Str, ValueType::Str);
        assert!(chain.is_valid(&input, &ValueType::Int));
        assert!(chain.is_valid(&input, &ValueType::optional(ValueType::Float)));
        assert!(!chain.is_valid(&ValueType::None, &ValueType::Int));
        assert!(matches!(
            chain.validate(&input, &ValueType::Str),
            Err(TypeError::NotAssignable { .. })
        ));
        assert_eq!(
            OperationChain::new().validate(&input, &ValueType::Int),
            Err(TypeError::EmptyChain)
        );
    }

    #[test]
    fn total_mapping_after_enum_narrows_to_image() {
        let mut chain = OperationChain::from_instances([op(Builtin::CsvEnumColumn)
            .make_instance(vec![
                Value::str("sex"),
                Value::List(vec![Value::str("a"), Value::str("b")]),
            ])
            .unwrap()]);
        chain.append(op(Builtin::UpperStr).make_instance(vec![]).unwrap());
        assert_eq!(chain.last_type(), Some(&enum_str(&["A", "B"])));
    }

    #[test]
    fn fixed_literal_after_none_is_single_valued() {
        let mut chain = OperationChain::from_instances([op(Builtin::CsvNoColumn)
            .make_instance(vec![])
            .unwrap()]);
        chain.append(op(Builtin::ConstantStr).make_instance(vec![Value::str("K")]).unwrap());
        assert_eq!(chain.last_type(), Some(&enum_str(&["K"])));
        chain.append(op(Builtin::LowerStr).make_instance(vec![]).unwrap());
        assert_eq!(chain.last_type(), Some(&enum_str(&["k"])));
    }

    #[test]
    fn probing_marks_none_results_optional_and_skips_failures() {
        let mut chain = OperationChain::from_instances([op(Builtin::CsvEnumColumn)
            .make_instance(vec![
                Value::str("n"),
                Value::List(vec![Value::str("1"), Value::str(" "), Value::str("x")]),
            ])
            .unwrap()]);
        chain.append(op(Builtin::NullifyStr).make_instance(vec![]).unwrap());
        let expected = ValueType::optional(enum_str(&["1", "x"]));
        assert_eq!(chain.last_type(), Some(&expected));
        chain.append(op(Builtin::ParseOptInt).make_instance(vec![]).unwrap());
        let expected = ValueType::optional(
            ValueType::enumeration(ValueType::Int, [Value::Int(1)]).unwrap(),
        );
        assert_eq!(chain.last_type(), Some(&expected));
    }

    #[test]
    fn impure_operations_are_not_probed() {
        let mut chain = OperationChain::from_instances([op(Builtin::CsvNoColumn)
            .make_instance(vec![])
            .unwrap()]);
        chain.append(op(Builtin::Uuid4Generator).make_instance(vec![]).unwrap());
        assert_eq!(chain.last_type(), Some(&ValueType::Str));
    }

    #[test]
    fn chain_renders_nested_calls_and_executes() {
        let chain = OperationChain::from_instances([
            op(Builtin::CsvColumn).make_instance(vec![Value::str("name")]).unwrap(),
            op(Builtin::UpperStr).make_instance(vec![]).unwrap(),
        ]);
        let mut imports = Imports::default();
        assert_eq!(
            chain.render("csv_row", &mut imports).unwrap(),
            r#"upper_str()(csv_column("name")(csv_row))"#
        );
        let row = Value::Dict(vec![(Value::str("name"), Value::str("ada"))]);
        assert_eq!(chain.execute(&row).unwrap(), Value::str("ADA"));
        assert_eq!(chain.to_string(), r#"csv_column("name") -> upper_str"#);
    }

    #[test]
    fn definition_is_curried() {
        let mut script = Script::new();
        op(Builtin::ConstantStr)
            .make_instance(vec![Value::str("x")])
            .unwrap()
            .emit_definition(&mut script);
        assert_eq!(
            script.finish(),
            "def constant_str(s: str):\n    def inner(value: None):\n        return s\n    return inner\n\n"
        );
    }

    #[test]
    fn catalog_lists_every_builtin_once() {
        let catalog = Catalog::default();
        assert_eq!(catalog.iter().count(), Builtin::ALL.len());
        assert!(catalog.get("csv_column").is_some());
        assert!(Catalog::base().get("csv_column").is_none());
        assert!(Catalog::base().get("to_ascii").is_some());
    }
}
