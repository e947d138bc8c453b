//! ES module syntax handling for the bundle assembler.
//!
//! Modules in the bundle are plain functions in a registry, so every static
//! `import`/`export` statement has to be rewritten into calls on the bundle
//! runtime (see `emit::RUNTIME`). The rewrite works statement by statement on
//! the source text and only recognizes statements that start a line:
//!
//! | source                              | bundled                                              |
//! |-------------------------------------|------------------------------------------------------|
//! | `import d, { a, b as c } from 'x'`  | `const dep = require("x"); const d = dep.default; const { a, b: c } = dep;` |
//! | `import * as ns from 'x'`           | `const dep = require("x"); const ns = dep;`          |
//! | `import 'x'`                        | `require("x");`                                      |
//! | `import('x')`                       | `import_("x")`                                       |
//! | `export function f` / `export const x` | declaration plus a getter in the export block     |
//! | `export { a, b as c }`              | getters in the export block                          |
//! | `export default expr`               | `exports.default = expr`                             |
//! | `export * from 'x'`                 | `reexport(exports, require("x"))`                    |
//!
//! Imported bindings are read once, when the import statement runs. Exported
//! bindings are getters, installed before the module body runs.
//!
//! Statements inside comments and string, template or regex literals are
//! skipped. Regex literals are told apart from division
//! by the token before the `/`, so a regex right after `)` or an identifier
//! is read as division.

use anyhow::{Context, Result};
use regex::{Captures, Regex};
use std::collections::BTreeMap;

/// How a module refers to a dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ImportKind {
    /// `import ... from` / `export ... from`, evaluated in place
    Static,
    /// `import("...")`, evaluated on demand
    Dynamic,
}

/// Names the bundle runtime exposes to module bodies.
pub mod runtime {
    pub const EXPORTS: &str = "__bundle_exports";
    pub const REQUIRE: &str = "__bundle_require";
    pub const IMPORT: &str = "__bundle_import";
    pub const EXPORT: &str = "__bundle_export";
    pub const REEXPORT: &str = "__bundle_reexport";
    pub const DEP_PREFIX: &str = "__bundle_dep_";
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Binding {
    Default(String),
    Namespace(String),
    /// (imported, local)
    Named(Vec<(String, String)>),
}

/// Compiled patterns for every statement form the assembler understands
pub struct ModuleSyntax {
    static_import: Regex,
    side_effect_import: Regex,
    dynamic_import: Regex,
    export_from: Regex,
    export_list: Regex,
    export_default_decl: Regex,
    export_decl: Regex,
    export_default: Regex,
    leftover: Regex,
}

impl ModuleSyntax {
    pub fn new() -> Result<Self> {
        let named = r"\{[^}]*\}";
        let namespace = r"\*[ \t]*as[ \t]+[\w$]+";
        let spec = r#"['"](?P<spec>[^'"\r\n]+)['"]"#;

        Ok(Self {
            static_import: Regex::new(&format!(
                r"(?m)^[ \t]*import\b[ \t]*(?P<clause>[\w$]+(?:[ \t]*,[ \t]*(?:{namespace}|{named}))?|{namespace}|{named})\s*from[ \t]*{spec}[ \t]*;?"
            ))?,
            side_effect_import: Regex::new(&format!(r"(?m)^[ \t]*import[ \t]*{spec}[ \t]*;?"))?,
            dynamic_import: Regex::new(&format!(
                r"(?P<pre>^|[^.\w$])import\(\s*{spec}\s*\)"
            ))?,
            export_from: Regex::new(&format!(
                r"(?m)^[ \t]*export[ \t]*(?P<clause>\*(?:[ \t]*as[ \t]+[\w$]+)?|{named})\s*from[ \t]*{spec}[ \t]*;?"
            ))?,
            export_list: Regex::new(r"(?m)^[ \t]*export[ \t]*\{(?P<names>[^}]*)\}[ \t]*;?")?,
            export_default_decl: Regex::new(
                r"(?m)^(?P<indent>[ \t]*)export[ \t]+default[ \t]+(?P<kw>(?:async[ \t]+)?function\b(?:[ \t]*\*)?|class\b)[ \t]*(?P<name>[\w$]+)",
            )?,
            export_decl: Regex::new(
                r"(?m)^(?P<indent>[ \t]*)export[ \t]+(?P<kw>(?:async[ \t]+)?function\b(?:[ \t]*\*)?|class\b|const\b|let\b|var\b)[ \t]*(?P<name>[\w$]+)",
            )?,
            export_default: Regex::new(r"(?m)^(?P<indent>[ \t]*)export[ \t]+default\b[ \t]*")?,
            leftover: Regex::new(r#"(?m)^[ \t]*(?:export\b|import\b[ \t]*[\w${*'"]).*$"#)?,
        })
    }

    /// Every literal specifier the module refers to, in source order
    pub fn specifiers(&self, source: &str) -> Vec<(String, ImportKind)> {
        let mask = code_mask(source);
        let mut found: Vec<(usize, String, ImportKind)> = Vec::new();

        for (re, kind) in [
            (&self.static_import, ImportKind::Static),
            (&self.side_effect_import, ImportKind::Static),
            (&self.export_from, ImportKind::Static),
            (&self.dynamic_import, ImportKind::Dynamic),
        ] {
            for caps in re.captures_iter(source) {
                if !is_code(&mask, &caps) {
                    continue;
                }
                if let Some(spec) = caps.name("spec") {
                    found.push((spec.start(), spec.as_str().to_string(), kind));
                }
            }
        }

        found.sort();
        found
            .into_iter()
            .map(|(_, spec, kind)| (spec, kind))
            .collect()
    }

    /// Rewrite a module body for the registry.
    ///
    /// `resolved` maps each specifier returned by [`Self::specifiers`] to the
    /// id of the module it resolved to.
    pub fn rewrite(&self, source: &str, resolved: &BTreeMap<String, String>) -> Result<String> {
        let lookup = |caps: &Captures<'_>| -> Result<String> {
            let spec = &caps["spec"];
            let id = resolved
                .get(spec)
                .with_context(|| format!("Import {:?} was not resolved", spec))?;
            js_string(id)
        };

        let mut next_dep = 0usize;
        let mut dep_name = || {
            let name = format!("{}{}", runtime::DEP_PREFIX, next_dep);
            next_dep += 1;
            name
        };
        // (local, exported)
        let mut exports: Vec<(String, String)> = Vec::new();

        let text = replace_all(&self.export_from, source, |caps| {
            let id = lookup(caps)?;
            let clause = caps["clause"].trim();
            if clause == "*" {
                return Ok(format!(
                    "{}({}, {}({}));",
                    runtime::REEXPORT,
                    runtime::EXPORTS,
                    runtime::REQUIRE,
                    id
                ));
            }

            let dep = dep_name();
            let getters = if let Some(inner) = clause.strip_prefix('{') {
                let inner = inner.strip_suffix('}').unwrap_or(inner);
                parse_named_list(inner)?
                    .into_iter()
                    .map(|(imported, exported)| {
                        Ok(format!(
                            "{}: () => {}[{}]",
                            js_string(&exported)?,
                            dep,
                            js_string(&imported)?
                        ))
                    })
                    .collect::<Result<Vec<_>>>()?
            } else {
                let ns = namespace_name(clause)?;
                vec![format!("{}: () => {}", js_string(&ns)?, dep)]
            };

            Ok(format!(
                "const {} = {}({}); {}({}, {{ {} }});",
                dep,
                runtime::REQUIRE,
                id,
                runtime::EXPORT,
                runtime::EXPORTS,
                getters.join(", ")
            ))
        })?;

        let text = replace_all(&self.static_import, &text, |caps| {
            let id = lookup(caps)?;
            let dep = dep_name();
            let mut out = vec![format!("const {} = {}({});", dep, runtime::REQUIRE, id)];

            for binding in parse_import_clause(&caps["clause"])? {
                match binding {
                    Binding::Default(local) => {
                        out.push(format!("const {} = {}.default;", local, dep));
                    }
                    Binding::Namespace(local) => {
                        out.push(format!("const {} = {};", local, dep));
                    }
                    Binding::Named(names) if names.is_empty() => {}
                    Binding::Named(names) => {
                        let fields: Vec<String> = names
                            .iter()
                            .map(|(imported, local)| {
                                if imported == local {
                                    local.clone()
                                } else {
                                    format!("{}: {}", property_key(imported), local)
                                }
                            })
                            .collect();
                        out.push(format!("const {{ {} }} = {};", fields.join(", "), dep));
                    }
                }
            }
            Ok(out.join(" "))
        })?;

        let text = replace_all(&self.side_effect_import, &text, |caps| {
            Ok(format!("{}({});", runtime::REQUIRE, lookup(caps)?))
        })?;

        let text = replace_all(&self.dynamic_import, &text, |caps| {
            Ok(format!("{}{}({})", &caps["pre"], runtime::IMPORT, lookup(caps)?))
        })?;

        let text = replace_all(&self.export_list, &text, |caps| {
            exports.extend(parse_named_list(&caps["names"])?);
            Ok(String::new())
        })?;

        let text = replace_all(&self.export_default_decl, &text, |caps| {
            let name = caps["name"].to_string();
            // `export default class extends Base {}` is an anonymous class
            if name == "extends" {
                return Ok(caps[0].to_string());
            }
            let declaration = format!("{}{} {}", &caps["indent"], &caps["kw"], name);
            exports.push((name, "default".to_string()));
            Ok(declaration)
        })?;

        let current = text;
        let mask = code_mask(&current);
        let text = replace_all(&self.export_decl, &current, |caps| {
            let name = caps["name"].to_string();
            if let Some(whole) = caps.get(0) {
                let is_variable = matches!(&caps["kw"], "const" | "let" | "var");
                if is_variable && declares_several(&current, &mask, whole.end()) {
                    let line = current[whole.start()..].lines().next().unwrap_or_default();
                    anyhow::bail!("Unsupported module syntax: {:?}", line.trim());
                }
            }
            let declaration = format!("{}{} {}", &caps["indent"], &caps["kw"], name);
            exports.push((name.clone(), name));
            Ok(declaration)
        })?;

        let text = replace_all(&self.export_default, &text, |caps| {
            Ok(format!("{}{}.default = ", &caps["indent"], runtime::EXPORTS))
        })?;

        let mask = code_mask(&text);
        if let Some(statement) = self
            .leftover
            .captures_iter(&text)
            .find(|caps| is_code(&mask, caps))
            .and_then(|caps| caps.get(0))
        {
            anyhow::bail!(
                "Unsupported module syntax: {:?}",
                statement.as_str().trim()
            );
        }

        if exports.is_empty() {
            return Ok(text);
        }

        let getters = exports
            .iter()
            .map(|(local, exported)| Ok(format!("{}: () => {}", js_string(exported)?, local)))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!(
            "{}({}, {{ {} }});\n{}",
            runtime::EXPORT,
            runtime::EXPORTS,
            getters.join(", "),
            text
        ))
    }
}

/// Quote a string as a JavaScript string literal
pub fn js_string(value: &str) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn property_key(name: &str) -> String {
    if is_identifier(name) {
        name.to_string()
    } else {
        serde_json::Value::from(name).to_string()
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn namespace_name(clause: &str) -> Result<String> {
    let name = clause
        .trim_start_matches('*')
        .trim()
        .strip_prefix("as")
        .map(str::trim)
        .with_context(|| format!("Malformed namespace binding {:?}", clause))?;
    if !is_identifier(name) {
        anyhow::bail!("Malformed namespace binding {:?}", clause);
    }
    Ok(name.to_string())
}

fn parse_import_clause(clause: &str) -> Result<Vec<Binding>> {
    let clause = clause.trim();
    let mut bindings = Vec::new();

    let rest = if clause.starts_with('*') || clause.starts_with('{') {
        clause
    } else {
        let (default, rest) = match clause.split_once(',') {
            Some((default, rest)) => (default.trim(), rest.trim()),
            None => (clause, ""),
        };
        if !is_identifier(default) {
            anyhow::bail!("Malformed default import {:?}", default);
        }
        bindings.push(Binding::Default(default.to_string()));
        rest
    };

    if rest.starts_with('*') {
        bindings.push(Binding::Namespace(namespace_name(rest)?));
    } else if let Some(inner) = rest.strip_prefix('{') {
        let inner = inner.strip_suffix('}').unwrap_or(inner);
        bindings.push(Binding::Named(parse_named_list(inner)?));
    } else if !rest.is_empty() {
        anyhow::bail!("Malformed import clause {:?}", clause);
    }

    Ok(bindings)
}

/// Parse the inside of `{ a, b as c }` into (source, target) name pairs.
fn parse_named_list(inner: &str) -> Result<Vec<(String, String)>> {
    let mut names = Vec::new();
    for item in inner.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let parts: Vec<&str> = item.split_whitespace().collect();
        let (from, to) = match parts.as_slice() {
            [name] => (unquote(name), unquote(name)),
            [from, "as", to] => (unquote(from), unquote(to)),
            _ => anyhow::bail!("Malformed binding {:?}", item),
        };
        if from.is_empty() || to.is_empty() {
            anyhow::bail!("Malformed binding {:?}", item);
        }
        names.push((from, to));
    }
    Ok(names)
}

fn unquote(name: &str) -> String {
    name.trim_matches(|c| c == '"' || c == '\'').to_string()
}

/// Whether a match starts in code rather than inside a comment or literal.
///
/// The position checked is the `import` keyword for dynamic imports and the
/// first non-blank character of the match otherwise.
fn is_code(mask: &[bool], caps: &Captures<'_>) -> bool {
    let position = match (caps.name("pre"), caps.get(0)) {
        (Some(pre), _) => pre.end(),
        (None, Some(whole)) => {
            whole.start()
                + whole
                    .as_str()
                    .find(|c: char| !c.is_whitespace())
                    .unwrap_or(0)
        }
        (None, None) => return false,
    };
    mask.get(position).copied().unwrap_or(true)
}

/// Whether the declaration starting at `from` goes on to declare another
/// binding, as in `const a = 1, b = 2;`.
fn declares_several(text: &str, mask: &[bool], from: usize) -> bool {
    let mut depth = 0usize;
    for (i, b) in text.bytes().enumerate().skip(from) {
        if !mask[i] {
            continue;
        }
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            b',' if depth == 0 => return true,
            b';' | b'\n' if depth == 0 => return false,
            _ => {}
        }
    }
    false
}

/// Can a `/` after this byte start a regex literal rather than divide?
fn regex_can_follow(prev: u8) -> bool {
    matches!(
        prev,
        b'(' | b',' | b'=' | b':' | b'[' | b'!' | b'&' | b'|' | b'?' | b'{' | b'}' | b';'
            | b'+' | b'-' | b'*' | b'%' | b'<' | b'>' | b'~' | b'^' | b'\n'
    )
}

fn hide(mask: &mut [bool], i: usize) {
    if let Some(slot) = mask.get_mut(i) {
        *slot = false;
    }
}

/// Marks which bytes of `text` are code. Bytes inside comments and inside
/// string, template and regex literals are `false`; `${...}` inside a
/// template is code again.
fn code_mask(text: &str) -> Vec<bool> {
    #[derive(Clone, Copy)]
    enum State {
        Code,
        LineComment,
        BlockComment,
        Str(u8),
        Template,
        Regex { class: bool },
    }

    let bytes = text.as_bytes();
    let mut mask = vec![true; bytes.len()];
    let mut state = State::Code;
    let mut depth = 0usize;
    // Brace depth each open `${` was entered at
    let mut interpolations: Vec<usize> = Vec::new();
    let mut prev = b'\n';
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();

        match state {
            State::Code => match b {
                b'/' if next == Some(b'/') => {
                    state = State::LineComment;
                    hide(&mut mask, i);
                }
                b'/' if next == Some(b'*') => {
                    state = State::BlockComment;
                    hide(&mut mask, i);
                    hide(&mut mask, i + 1);
                    i += 2;
                    continue;
                }
                b'/' if regex_can_follow(prev) => {
                    state = State::Regex { class: false };
                    hide(&mut mask, i);
                }
                b'\'' | b'"' => {
                    state = State::Str(b);
                    hide(&mut mask, i);
                }
                b'`' => {
                    state = State::Template;
                    hide(&mut mask, i);
                }
                b'}' if interpolations.last() == Some(&depth) => {
                    interpolations.pop();
                    state = State::Template;
                    hide(&mut mask, i);
                }
                b'{' => depth += 1,
                b'}' => depth = depth.saturating_sub(1),
                _ => {}
            },
            State::LineComment => {
                if b == b'\n' {
                    state = State::Code;
                } else {
                    hide(&mut mask, i);
                }
            }
            State::BlockComment => {
                hide(&mut mask, i);
                if b == b'*' && next == Some(b'/') {
                    hide(&mut mask, i + 1);
                    state = State::Code;
                    i += 2;
                    continue;
                }
            }
            State::Str(quote) => {
                hide(&mut mask, i);
                if b == b'\\' {
                    hide(&mut mask, i + 1);
                    i += 2;
                    continue;
                }
                if b == quote {
                    state = State::Code;
                    prev = quote;
                } else if b == b'\n' {
                    // Unterminated; pick up again on the next line
                    mask[i] = true;
                    state = State::Code;
                }
            }
            State::Template => {
                hide(&mut mask, i);
                if b == b'\\' {
                    hide(&mut mask, i + 1);
                    i += 2;
                    continue;
                }
                if b == b'`' {
                    state = State::Code;
                    prev = b'`';
                } else if b == b'$' && next == Some(b'{') {
                    hide(&mut mask, i + 1);
                    interpolations.push(depth);
                    state = State::Code;
                    prev = b'{';
                    i += 2;
                    continue;
                }
            }
            State::Regex { class } => {
                hide(&mut mask, i);
                match b {
                    b'\\' => {
                        hide(&mut mask, i + 1);
                        i += 2;
                        continue;
                    }
                    b'[' => state = State::Regex { class: true },
                    b']' => state = State::Regex { class: false },
                    b'/' if !class => {
                        state = State::Code;
                        prev = b'/';
                    }
                    b'\n' => {
                        mask[i] = true;
                        state = State::Code;
                    }
                    _ => {}
                }
            }
        }

        if matches!(state, State::Code) && mask[i] && !b.is_ascii_whitespace() {
            prev = b;
        }
        i += 1;
    }

    mask
}

/// `Regex::replace_all` with a replacement that can fail, leaving matches
/// outside of code alone
fn replace_all(
    re: &Regex,
    text: &str,
    mut replacement: impl FnMut(&Captures<'_>) -> Result<String>,
) -> Result<String> {
    let mask = code_mask(text);
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if !is_code(&mask, &caps) {
            continue;
        }
        out.push_str(&text[last..whole.start()]);
        out.push_str(&replacement(&caps)?);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}
