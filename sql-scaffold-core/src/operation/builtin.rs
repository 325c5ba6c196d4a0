//! Built-in operations.
//!
//! Every operation is defined once, here: its signature in
//! [`Builtin::definition`], its evaluation in [`Builtin::eval`] and the body
//! of its generated definition in [`Builtin::emit`]. The three matches must
//! stay in step; the tests below run each operation both ways.

use rand::Rng;
use uuid::Uuid;

use super::{Argument, Operation};
use crate::script::Script;
use crate::script::python::{Param, float_literal, string_literal};
use crate::types::{TypeError, Value, ValueType};

pub const SPECIAL_CHAR_MAP: &str = "SPECIAL_CHAR_MAP";
const HEX_DIGITS: &[u8] = b"0123456789abcdef";

/// Latin-1 letters folded to ASCII. Codes below 128 are kept as is, anything
/// else becomes a space.
pub const SPECIAL_CHARS: &[(u32, &str)] = &[
    (192, "A"), (193, "A"), (194, "A"), (195, "A"), (196, "A"), (197, "A"), (198, "AE"),
    (199, "C"), (200, "E"), (201, "E"), (202, "E"), (203, "E"), (204, "I"), (205, "I"),
    (206, "I"), (207, "I"), (208, "D"), (209, "N"), (210, "O"), (211, "O"), (212, "O"),
    (213, "O"), (214, "O"), (216, "O"), (217, "U"), (218, "U"), (219, "U"), (220, "U"),
    (221, "Y"), (223, "B"), (224, "a"), (225, "a"), (226, "a"), (227, "a"), (228, "a"),
    (229, "a"), (230, "ae"), (231, "c"), (232, "e"), (233, "e"), (234, "e"), (235, "e"),
    (236, "i"), (237, "i"), (238, "i"), (239, "i"), (241, "n"), (242, "o"), (243, "o"),
    (244, "o"), (245, "o"), (246, "o"), (249, "u"), (250, "u"), (251, "u"), (252, "u"),
    (253, "y"), (255, "y"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    UpperStr,
    LowerStr,
    RemoveSpace,
    NullifyStr,
    ConstantStr,
    ToAscii,
    StringifyFloat,
    ParseFloat,
    ParseOptFloat,
    StringifyInt,
    ParseInt,
    ParseOptInt,
    Uuid4Generator,
    HexColorGenerator,
    EnumConverter,
    CsvColumn,
    CsvEnumColumn,
    CsvNoColumn,
}

fn csv_record() -> ValueType {
    ValueType::dict(ValueType::Str, ValueType::Str)
}

fn str_arg(args: &[Value], index: usize) -> Result<&str, String> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("argument {index} is not a string"))
}

fn input_str(input: &Value) -> Result<&str, String> {
    input.as_str().ok_or_else(|| format!("{input} is not a string"))
}

pub(crate) fn to_ascii(input: &str) -> String {
    let folded = input
        .chars()
        .map(|character| {
            let code = u32::from(character);
            if code < 128 {
                return character.to_string();
            }
            SPECIAL_CHARS
                .iter()
                .find(|(special, _)| *special == code)
                .map_or_else(|| " ".to_string(), |(_, ascii)| ascii.to_string())
        })
        .collect::<String>();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl Builtin {
    pub const ALL: &'static [Builtin] = &[
        Builtin::UpperStr,
        Builtin::LowerStr,
        Builtin::RemoveSpace,
        Builtin::NullifyStr,
        Builtin::ConstantStr,
        Builtin::ToAscii,
        Builtin::StringifyFloat,
        Builtin::ParseFloat,
        Builtin::ParseOptFloat,
        Builtin::StringifyInt,
        Builtin::ParseInt,
        Builtin::ParseOptInt,
        Builtin::Uuid4Generator,
        Builtin::HexColorGenerator,
        Builtin::EnumConverter,
        Builtin::CsvColumn,
        Builtin::CsvEnumColumn,
        Builtin::CsvNoColumn,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::UpperStr => "upper_str",
            Builtin::LowerStr => "lower_str",
            Builtin::RemoveSpace => "remove_space",
            Builtin::NullifyStr => "nullify_str",
            Builtin::ConstantStr => "constant_str",
            Builtin::ToAscii => "to_ascii",
            Builtin::StringifyFloat => "stringify_float",
            Builtin::ParseFloat => "parse_float",
            Builtin::ParseOptFloat => "parse_opt_float",
            Builtin::StringifyInt => "stringify_int",
            Builtin::ParseInt => "parse_int",
            Builtin::ParseOptInt => "parse_opt_int",
            Builtin::Uuid4Generator => "uuid4_generator",
            Builtin::HexColorGenerator => "hex_color_generator",
            Builtin::EnumConverter => "enum_converter",
            Builtin::CsvColumn => "csv_column",
            Builtin::CsvEnumColumn => "csv_enum_column",
            Builtin::CsvNoColumn => "csv_no_column",
        }
    }

    /// Operations whose input is the whole CSV record.
    pub fn reads_record(&self) -> bool {
        matches!(
            self,
            Builtin::CsvColumn | Builtin::CsvEnumColumn | Builtin::CsvNoColumn
        )
    }

    pub fn definition(&self) -> Operation {
        use ValueType as T;
        let (input, output, args) = match self {
            Builtin::UpperStr | Builtin::LowerStr | Builtin::RemoveSpace | Builtin::ToAscii => {
                (T::Str, T::Str, vec![])
            }
            Builtin::NullifyStr => (T::Str, T::optional(T::Str), vec![]),
            Builtin::ConstantStr => (T::None, T::Str, vec![Argument::new("s", T::Str)]),
            Builtin::StringifyFloat => (T::Float, T::Str, vec![]),
            Builtin::ParseFloat => (T::Str, T::Float, vec![]),
            Builtin::ParseOptFloat => (T::optional(T::Str), T::optional(T::Float), vec![]),
            Builtin::StringifyInt => (T::Int, T::Str, vec![]),
            Builtin::ParseInt => (T::Str, T::Int, vec![]),
            Builtin::ParseOptInt => (T::optional(T::Str), T::optional(T::Int), vec![]),
            Builtin::Uuid4Generator | Builtin::HexColorGenerator => (T::None, T::Str, vec![]),
            Builtin::EnumConverter => (
                T::open_enum(T::Str),
                T::open_enum(T::Str),
                vec![Argument::new("enum_asso", T::dict(T::Str, T::Str))],
            ),
            Builtin::CsvColumn => (csv_record(), T::Str, vec![Argument::new("column_name", T::Str)]),
            Builtin::CsvEnumColumn => (
                csv_record(),
                T::open_enum(T::Str),
                vec![
                    Argument::new("column_name", T::Str),
                    Argument::new("values", T::list(T::Str)),
                ],
            ),
            Builtin::CsvNoColumn => (csv_record(), T::None, vec![]),
        };
        Operation {
            name: self.name(),
            input,
            output,
            args,
            primary: matches!(self, Builtin::Uuid4Generator),
            pure: !matches!(self, Builtin::Uuid4Generator | Builtin::HexColorGenerator),
            builtin: *self,
        }
    }

    /// Output type fixed by the argument values, for operations that have one.
    pub fn dynamic_output(&self, args: &[Value]) -> Option<Result<ValueType, TypeError>> {
        let values = match (self, args) {
            (Builtin::ConstantStr, [value]) => vec![value.clone()],
            (Builtin::EnumConverter, [Value::Dict(pairs)]) => {
                pairs.iter().map(|(_, value)| value.clone()).collect()
            }
            (Builtin::CsvEnumColumn, [_, Value::List(values)]) => values.clone(),
            _ => return None,
        };
        Some(ValueType::enumeration(ValueType::Str, values))
    }

    /// Evaluates the operation in-process. Arguments and input are assumed to
    /// have been checked against the definition.
    pub fn eval(&self, args: &[Value], input: &Value) -> Result<Value, String> {
        Ok(match self {
            Builtin::UpperStr => Value::str(input_str(input)?.to_uppercase()),
            Builtin::LowerStr => Value::str(input_str(input)?.to_lowercase()),
            Builtin::RemoveSpace => Value::str(
                input_str(input)?
                    .chars()
                    .filter(|character| !character.is_whitespace())
                    .collect::<String>(),
            ),
            Builtin::NullifyStr => match input_str(input)?.trim() {
                "" => Value::None,
                _ => input.clone(),
            },
            Builtin::ConstantStr => Value::str(str_arg(args, 0)?),
            Builtin::ToAscii => Value::str(to_ascii(input_str(input)?)),
            Builtin::StringifyFloat => {
                let float = input.as_f64().ok_or_else(|| format!("{input} is not a float"))?;
                Value::str(float_literal(float))
            }
            Builtin::StringifyInt => match input {
                Value::Int(int) => Value::str(int.to_string()),
                other => return Err(format!("{other} is not an int")),
            },
            Builtin::ParseFloat | Builtin::ParseOptFloat => match input {
                Value::None => Value::None,
                input => {
                    let text = input_str(input)?;
                    Value::Float(
                        text.trim()
                            .parse()
                            .map_err(|_| format!("could not convert string to float: {input}"))?,
                    )
                }
            },
            Builtin::ParseInt | Builtin::ParseOptInt => match input {
                Value::None => Value::None,
                input => {
                    let text = input_str(input)?;
                    Value::Int(
                        text.trim()
                            .parse()
                            .map_err(|_| format!("invalid literal for int(): {input}"))?,
                    )
                }
            },
            Builtin::Uuid4Generator => Value::str(Uuid::new_v4().to_string()),
            Builtin::HexColorGenerator => {
                let mut rng = rand::thread_rng();
                let digits = (0..6)
                    .map(|_| char::from(HEX_DIGITS[rng.gen_range(0..HEX_DIGITS.len())]))
                    .collect::<String>();
                Value::str(format!("#{digits}"))
            }
            Builtin::EnumConverter => {
                let association = args.first().ok_or("missing enum association")?;
                association
                    .dict_get(input)
                    .cloned()
                    .ok_or_else(|| format!("KeyError: {input}"))?
            }
            Builtin::CsvColumn | Builtin::CsvEnumColumn => {
                let column = Value::str(str_arg(args, 0)?);
                let field = input
                    .dict_get(&column)
                    .cloned()
                    .ok_or_else(|| format!("KeyError: {column}"))?;
                if let (Builtin::CsvEnumColumn, Some(Value::List(values))) = (self, args.get(1))
                    && !values.contains(&field)
                {
                    return Err(format!("{field} is not one of the values of {column}"));
                }
                field
            }
            Builtin::CsvNoColumn => Value::None,
        })
    }

    /// Body of the `inner` closure, `input` being its parameter.
    pub fn emit(&self, script: &mut Script, input: &str) {
        match self {
            Builtin::UpperStr => script.line(format!("return {input}.upper()")),
            Builtin::LowerStr => script.line(format!("return {input}.lower()")),
            Builtin::RemoveSpace => script.line(format!(
                "return \"\".join(_c for _c in {input} if not _c.isspace())"
            )),
            Builtin::NullifyStr => {
                script.if_block(&format!("len({input}.strip()) == 0"), |s| s.line("return None"));
                script.line(format!("return {input}"));
            }
            Builtin::ConstantStr => script.line("return s"),
            Builtin::ToAscii => {
                let entries = SPECIAL_CHARS
                    .iter()
                    .map(|(code, ascii)| format!("{code}: {}", string_literal(ascii)))
                    .collect::<Vec<_>>();
                script.add_global(
                    SPECIAL_CHAR_MAP,
                    format!("{SPECIAL_CHAR_MAP}: dict[int, str] = {{{}}}", entries.join(", ")),
                );
                script.inner_function(
                    "ascii_char",
                    &[Param::typed("c", "str")],
                    |s| {
                        s.line("ascii_num = ord(c)");
                        s.if_block("ascii_num < 128", |s| s.line("return c"));
                        s.try_block(|s| s.line(format!("return {SPECIAL_CHAR_MAP}[ascii_num]")));
                        s.except_block(Some("KeyError"), |s| s.line("return \" \""));
                    },
                );
                script.line(format!(
                    "return \" \".join(\"\".join(ascii_char(c) for c in {input}).split())"
                ));
            }
            Builtin::StringifyFloat | Builtin::StringifyInt => {
                script.line(format!("return str({input})"))
            }
            Builtin::ParseFloat => script.line(format!("return float({input})")),
            Builtin::ParseOptFloat => {
                script.if_block(&format!("{input} is None"), |s| s.line("return None"));
                script.line(format!("return float({input})"));
            }
            Builtin::ParseInt => script.line(format!("return int({input})")),
            Builtin::ParseOptInt => {
                script.if_block(&format!("{input} is None"), |s| s.line("return None"));
                script.line(format!("return int({input})"));
            }
            Builtin::Uuid4Generator => {
                script.add_import("uuid", "uuid4");
                script.line("return str(uuid4())");
            }
            Builtin::HexColorGenerator => {
                script.add_import("random", "choice");
                script.line("return \"#\" + \"\".join(choice(\"0123456789abcdef\") for _ in range(6))");
            }
            Builtin::EnumConverter => script.line(format!("return enum_asso[{input}]")),
            Builtin::CsvColumn => script.line(format!("return {input}[column_name]")),
            Builtin::CsvEnumColumn => {
                script.line(format!("field = {input}[column_name]"));
                script.if_block("field not in values", |s| {
                    s.line("raise ValueError(f\"{field} is not one of the values of {column_name}\")")
                });
                script.line("return field");
            }
            Builtin::CsvNoColumn => script.line("return None"),
        }
    }
}
