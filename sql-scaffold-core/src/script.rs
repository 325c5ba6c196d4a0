//! Scoped text accumulation for generated programs.
//!
//! A [`Script`] collects lines at the current indentation level, deduplicated
//! imports and module-level globals. Scopes are opened with a header line and a
//! closure; leaving the closure restores the indentation and runs the scope's
//! exit hook. Nothing is printed until [`Script::finish`] assembles the imports,
//! the globals and the body in that order.

pub mod python;

use std::collections::BTreeSet;

use indexmap::IndexMap;

pub const INDENT: &str = "    ";
pub const BLANK_LINES_AFTER_IMPORTS: usize = 2;
pub const BLANK_LINES_AFTER_GLOBALS: usize = 2;

/// `from <module> import <object>` statements, grouped by module.
///
/// Modules keep the order in which they were first requested, objects inside a
/// module are sorted so that the output does not depend on emission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Imports {
    modules: IndexMap<String, BTreeSet<String>>,
}

impl Imports {
    pub fn add(&mut self, module: &str, object: &str) {
        self.modules
            .entry(module.to_string())
            .or_default()
            .insert(object.to_string());
    }

    pub fn add_aliased(&mut self, module: &str, object: &str, alias: &str) {
        self.add(module, &format!("{object} as {alias}"));
    }

    pub fn extend(&mut self, other: &Imports) {
        for (module, objects) in &other.modules {
            let entry = self.modules.entry(module.clone()).or_default();
            entry.extend(objects.iter().cloned());
        }
    }

    pub fn contains(&self, module: &str, object: &str) -> bool {
        self.modules
            .get(module)
            .is_some_and(|objects| objects.contains(object))
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (module, objects) in &self.modules {
            let objects = objects.iter().cloned().collect::<Vec<_>>().join(", ");
            out.push_str(&format!("from {module} import {objects}\n"));
        }
        out
    }
}

/// Module-level declarations keyed by name. The first declaration of a name wins.
#[derive(Debug, Clone, Default)]
pub struct Globals {
    declarations: IndexMap<String, String>,
}

impl Globals {
    /// Returns `false` when a global with the same name was already declared.
    pub fn add(&mut self, name: &str, declaration: String) -> bool {
        if self.declarations.contains_key(name) {
            return false;
        }
        self.declarations.insert(name.to_string(), declaration);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.declarations.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for declaration in self.declarations.values() {
            out.push_str(declaration);
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Default)]
pub struct Script {
    body: String,
    indent: usize,
    lines_in_scope: usize,
    imports: Imports,
    globals: Globals,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn imports(&self) -> &Imports {
        &self.imports
    }

    pub fn imports_mut(&mut self) -> &mut Imports {
        &mut self.imports
    }

    pub fn add_import(&mut self, module: &str, object: &str) {
        self.imports.add(module, object);
    }

    pub fn add_global(&mut self, name: &str, declaration: String) -> bool {
        self.globals.add(name, declaration)
    }

    pub fn indent(&self) -> usize {
        self.indent
    }

    fn prefix(&self) -> String {
        INDENT.repeat(self.indent)
    }

    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if text.is_empty() {
            self.body.push('\n');
        } else {
            self.body.push_str(&self.prefix());
            self.body.push_str(text);
            self.body.push('\n');
            self.lines_in_scope += 1;
        }
    }

    pub fn empty_lines(&mut self, count: usize) {
        for _ in 0..count {
            self.line("");
        }
    }

    /// Emits `start v1<sep>\n<pad>v2<sep>\n<pad>v3 end`, aligning every value
    /// under the first one.
    pub fn aligned_line<I, S>(&mut self, start: &str, separator: &str, values: I, end: &str)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let padding = format!("{}{}", self.prefix(), " ".repeat(start.chars().count()));
        let joiner = format!("{separator}\n{padding}");
        let values = values
            .into_iter()
            .map(|value| value.as_ref().to_string())
            .collect::<Vec<_>>();
        self.line(format!("{start}{}{end}", values.join(&joiner)));
    }

    /// Like [`Script::aligned_line`] but the separator leads each continuation
    /// line and the previous line is ended with `continuation`, which is how
    /// long boolean or arithmetic expressions are wrapped.
    pub fn aligned_expression<I, S>(
        &mut self,
        start: &str,
        separator: &str,
        values: I,
        end: &str,
        continuation: &str,
    ) where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let width = start.chars().count().saturating_sub(separator.chars().count());
        let padding = format!("{}{}", self.prefix(), " ".repeat(width));
        let joiner = format!("{continuation}\n{padding}{separator}");
        let values = values
            .into_iter()
            .map(|value| value.as_ref().to_string())
            .collect::<Vec<_>>();
        self.line(format!("{start}{}{end}", values.join(&joiner)));
    }

    /// Opens an indented scope under `header`. `filler` is emitted when the
    /// body produced no line at all, `on_exit` runs once the indentation is
    /// restored.
    pub fn scope_with<R, B, E>(&mut self, header: impl AsRef<str>, filler: &str, body: B, on_exit: E) -> R
    where
        B: FnOnce(&mut Self) -> R,
        E: FnOnce(&mut Self),
    {
        self.line(header);
        self.indent += 1;
        let outer_lines = std::mem::replace(&mut self.lines_in_scope, 0);
        let result = body(self);
        if self.lines_in_scope == 0 && !filler.is_empty() {
            self.line(filler);
        }
        self.lines_in_scope += outer_lines;
        self.indent -= 1;
        on_exit(self);
        result
    }

    pub fn scope<R, B>(&mut self, header: impl AsRef<str>, body: B) -> R
    where
        B: FnOnce(&mut Self) -> R,
    {
        self.scope_with(header, "", body, |_| {})
    }

    /// Appends another script at the current indentation, merging its imports
    /// and globals.
    pub fn append(&mut self, other: Script) {
        self.imports.extend(&other.imports);
        for (name, declaration) in other.globals.declarations {
            self.globals.add(&name, declaration);
        }
        let prefix = self.prefix();
        for line in other.body.lines() {
            if line.is_empty() {
                self.body.push('\n');
            } else {
                self.body.push_str(&prefix);
                self.body.push_str(line);
                self.body.push('\n');
                self.lines_in_scope += 1;
            }
        }
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn finish(self) -> String {
        let mut out = String::new();
        if !self.imports.is_empty() {
            out.push_str(&self.imports.render());
            out.push_str(&"\n".repeat(BLANK_LINES_AFTER_IMPORTS));
        }
        if !self.globals.is_empty() {
            out.push_str(&self.globals.render());
            out.push_str(&"\n".repeat(BLANK_LINES_AFTER_GLOBALS));
        }
        out.push_str(&self.body);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_scopes_indent_and_restore() {
        let mut script = Script::new();
        script.scope("def f():", |s| {
            s.scope("if x:", |s| s.line("return 1"));
            s.line("return 2");
        });
        script.line("f()");
        assert_eq!(
            script.finish(),
            "def f():\n    if x:\n        return 1\n    return 2\nf()\n"
        );
    }

    #[test]
    fn empty_scope_receives_filler() {
        let mut script = Script::new();
        script.scope_with("class A:", "pass", |_| {}, |s| s.empty_lines(1));
        assert_eq!(script.finish(), "class A:\n    pass\n\n");
    }

    #[test]
    fn filler_is_skipped_when_inner_scope_wrote_lines() {
        let mut script = Script::new();
        script.scope_with(
            "class A:",
            "pass",
            |s| s.scope_with("def f(self):", "pass", |_| {}, |_| {}),
            |_| {},
        );
        assert_eq!(script.finish(), "class A:\n    def f(self):\n        pass\n");
    }

    #[test]
    fn exit_hook_runs_after_dedent() {
        let mut script = Script::new();
        script.scope_with("def f():", "pass", |s| s.line("return 1"), |s| s.line("# end"));
        assert_eq!(script.finish(), "def f():\n    return 1\n# end\n");
    }

    #[test]
    fn imports_are_deduplicated_and_sorted() {
        let mut script = Script::new();
        script.add_import("typing", "Optional");
        script.add_import("datetime", "time");
        script.add_import("typing", "Any");
        script.add_import("typing", "Optional");
        script.line("x = 1");
        assert_eq!(
            script.finish(),
            "from typing import Any, Optional\nfrom datetime import time\n\n\nx = 1\n"
        );
    }

    #[test]
    fn globals_keep_first_declaration() {
        let mut script = Script::new();
        assert!(script.add_global("MAP", "MAP = {}".into()));
        assert!(!script.add_global("MAP", "MAP = {1: 2}".into()));
        script.line("y = MAP");
        assert_eq!(script.finish(), "MAP = {}\n\n\ny = MAP\n");
    }

    #[test]
    fn aligned_line_pads_continuations() {
        let mut script = Script::new();
        script.scope("def f():", |s| s.aligned_line("return g(", ",", ["a", "b"], ")"));
        assert_eq!(
            script.finish(),
            "def f():\n    return g(a,\n             b)\n"
        );
    }

    #[test]
    fn aligned_expression_leads_with_separator() {
        let mut script = Script::new();
        script.aligned_expression("return ", " or ", ["a", "b"], "", " \\");
        assert_eq!(script.finish(), "return a \\\n    or b\n");
    }

    #[test]
    fn append_reindents_and_merges_imports() {
        let mut inner = Script::new();
        inner.add_import("uuid", "uuid4");
        inner.line("return str(uuid4())");
        let mut outer = Script::new();
        outer.scope("def g():", |s| s.append(inner));
        assert_eq!(
            outer.finish(),
            "from uuid import uuid4\n\n\ndef g():\n    return str(uuid4())\n"
        );
    }
}
