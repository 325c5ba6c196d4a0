//! Python 3 surface syntax on top of [`Script`].

use super::Script;

pub const BLANK_LINES_AFTER_CLASS: usize = 1;
pub const BLANK_LINES_AFTER_FUNCTION: usize = 1;
pub const BLANK_LINES_AFTER_METHOD: usize = 1;

/// Double-quoted Python string literal.
pub fn string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for character in value.chars() {
        match character {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

pub fn bytes_literal(value: &[u8]) -> String {
    let mut out = String::from("b\"");
    for byte in value {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            0x20..=0x7e => out.push(*byte as char),
            _ => out.push_str(&format!("\\x{byte:02x}")),
        }
    }
    out.push('"');
    out
}

/// Same text as Python's `repr(float)` for the values a schema default or a
/// parsed record can produce.
pub fn float_literal(value: f64) -> String {
    if value.is_nan() {
        return "float(\"nan\")".to_string();
    }
    if value.is_infinite() {
        return match value.is_sign_positive() {
            true => "float(\"inf\")".to_string(),
            false => "float(\"-inf\")".to_string(),
        };
    }
    if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// Class name for a table: `user_account` and `userAccount` both give `UserAccount`.
pub fn to_pascal(mixed_case_name: &str) -> String {
    let mut words = vec![];
    let mut curr = String::new();
    for character in mixed_case_name.chars() {
        let is_snake = character == '_';
        if character.is_uppercase() || is_snake {
            words.push(std::mem::take(&mut curr));
        }
        if is_snake {
            continue;
        }
        if curr.is_empty() {
            curr.extend(character.to_uppercase());
        } else {
            curr.push(character);
        }
    }
    words.push(curr);
    words.concat()
}

/// A rendered function parameter: `name`, `name: type` or `name: type = default`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub annotation: Option<String>,
    pub default: Option<String>,
}

impl Param {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotation: None,
            default: None,
        }
    }

    pub fn typed(name: impl Into<String>, annotation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotation: Some(annotation.into()),
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn render(&self) -> String {
        let mut out = self.name.clone();
        if let Some(annotation) = &self.annotation {
            out.push_str(": ");
            out.push_str(annotation);
        }
        if let Some(default) = &self.default {
            out.push_str(" = ");
            out.push_str(default);
        }
        out
    }
}

impl Script {
    fn signature(&mut self, name: &str, params: &[Param], returns: Option<&str>) -> String {
        let start = format!("def {name}(");
        let end = match returns {
            Some(returns) => format!(") -> {returns}:"),
            None => "):".to_string(),
        };
        let params = params.iter().map(Param::render).collect::<Vec<_>>();
        if params.is_empty() {
            return format!("{start}{end}");
        }
        let padding = format!(",\n{}{}", super::INDENT.repeat(self.indent()), " ".repeat(start.len()));
        format!("{start}{}{end}", params.join(&padding))
    }

    pub fn function<R, B>(&mut self, name: &str, params: &[Param], returns: Option<&str>, body: B) -> R
    where
        B: FnOnce(&mut Self) -> R,
    {
        let header = self.signature(name, params, returns);
        self.scope_with(header, "pass", body, |s| {
            s.empty_lines(BLANK_LINES_AFTER_FUNCTION)
        })
    }

    /// Nested helper function: no trailing blank line.
    pub fn inner_function<R, B>(&mut self, name: &str, params: &[Param], body: B) -> R
    where
        B: FnOnce(&mut Self) -> R,
    {
        let header = self.signature(name, params, None);
        self.scope_with(header, "pass", body, |_| {})
    }

    pub fn method<R, B>(&mut self, name: &str, params: &[Param], returns: Option<&str>, body: B) -> R
    where
        B: FnOnce(&mut Self) -> R,
    {
        let mut all = Vec::with_capacity(params.len() + 1);
        all.push(Param::new("self"));
        all.extend(params.iter().cloned());
        let header = self.signature(name, &all, returns);
        self.scope_with(header, "pass", body, |s| {
            s.empty_lines(BLANK_LINES_AFTER_METHOD)
        })
    }

    pub fn static_method<R, B>(
        &mut self,
        name: &str,
        params: &[Param],
        returns: Option<&str>,
        body: B,
    ) -> R
    where
        B: FnOnce(&mut Self) -> R,
    {
        self.line("@staticmethod");
        self.function(name, params, returns, body)
    }

    pub fn class<R, B>(&mut self, name: &str, parent: Option<&str>, body: B) -> R
    where
        B: FnOnce(&mut Self) -> R,
    {
        let header = match parent {
            Some(parent) => format!("class {name}({parent}):"),
            None => format!("class {name}:"),
        };
        self.scope_with(header, "pass", body, |s| s.empty_lines(BLANK_LINES_AFTER_CLASS))
    }

    pub fn if_block<R, B>(&mut self, condition: &str, body: B) -> R
    where
        B: FnOnce(&mut Self) -> R,
    {
        self.scope_with(format!("if {condition}:"), "pass", body, |_| {})
    }

    pub fn try_block<R, B>(&mut self, body: B) -> R
    where
        B: FnOnce(&mut Self) -> R,
    {
        self.scope_with("try:", "pass", body, |_| {})
    }

    pub fn except_block<R, B>(&mut self, exception: Option<&str>, body: B) -> R
    where
        B: FnOnce(&mut Self) -> R,
    {
        let header = match exception {
            Some(exception) => format!("except {exception}:"),
            None => "except Exception:".to_string(),
        };
        self.scope_with(header, "pass", body, |_| {})
    }

    pub fn for_block<R, B>(&mut self, variables: &str, iterable: &str, body: B) -> R
    where
        B: FnOnce(&mut Self) -> R,
    {
        self.scope_with(format!("for {variables} in {iterable}:"), "pass", body, |_| {})
    }

    pub fn with_block<R, B>(&mut self, expression: &str, target: &str, body: B) -> R
    where
        B: FnOnce(&mut Self) -> R,
    {
        self.scope_with(format!("with {expression} as {target}:"), "pass", body, |_| {})
    }
}
