// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Go `text/template` rendering on top of minijinja.
//!
//! Hook manifests are written as Go templates. Each template is compiled into
//! a minijinja template whose statements only ever call the `go_*` functions
//! registered here, so Go semantics hold for output formatting, truthiness and
//! pipelines. Template text is never parsed by minijinja: it is emitted from a
//! literal table, so `{% ... %}` or `{# ... #}` in a manifest is plain text.
//!
//! # Supported actions
//!
//! - `{{ pipeline }}` and `{{/* comment */}}`, with `{{-`/`-}}` trim markers
//! - `{{ if }}`, `{{ else if }}`, `{{ else }}`, `{{ end }}`
//! - `{{ range }}` over maps (sorted keys), lists and integers, with
//!   `$v :=` and `$k, $v :=` declarations and an `{{ else }}` branch
//! - `{{ with }}` and `{{ with $x := }}`
//! - `{{ $x := pipeline }}` and `{{ $x = pipeline }}`
//! - builtins: `and`, `or`, `not`, `eq`, `ne`, `lt`, `le`, `gt`, `ge`, `len`,
//!   `index`, `print`, `println`, `printf`
//!
//! A field missing from the variable map is an error, as with
//! `Option("missingkey=error")`.
//!
//! # Example
//!
//! ```rust
//! use kflex::gotemplate::render;
//! use std::collections::BTreeMap;
//!
//! let vars = BTreeMap::from([("Flag".to_string(), "on".to_string())]);
//! let out = render("{{if .Flag}}enabled={{.Flag}}{{end}}", &vars).unwrap();
//! assert_eq!(out, "enabled=on");
//! ```

use minijinja::value::{Rest, ValueKind};
use minijinja::{context, Environment, ErrorKind, UndefinedBehavior, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Errors from compiling or executing a Go template
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// The template is not valid Go template syntax, or uses an unsupported action
    #[error("template: {0}")]
    Parse(String),

    /// A field reference named a key missing from the variable map
    #[error("template: map has no entry for key {0:?}")]
    MissingKey(String),

    /// Execution failed
    #[error("template: {0}")]
    Execute(String),
}

/// Render `template` against `vars`.
///
/// # Errors
///
/// Returns [`TemplateError::Parse`] for malformed templates,
/// [`TemplateError::MissingKey`] when a referenced variable is absent and
/// [`TemplateError::Execute`] when a builtin fails.
pub fn render(template: &str, vars: &BTreeMap<String, String>) -> Result<String, TemplateError> {
    let compiled = compile(template)?;
    let env = environment();
    env.render_str(
        &compiled.source,
        context! { __root => vars, __text => compiled.literals },
    )
    .map_err(|e| match (e.kind(), e.detail()) {
        (ErrorKind::UndefinedError, Some(key)) => TemplateError::MissingKey(key.to_string()),
        _ => TemplateError::Execute(e.detail().map_or_else(|| e.to_string(), str::to_string)),
    })
}

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_function("go_field", go_field);
    env.add_function("go_range", go_range);
    env.add_function("go_output", |v: Value| go_format(&v));
    env.add_function("go_and", go_and);
    env.add_function("go_or", go_or);
    env.add_function("go_not", |v: Value| !v.is_true());
    env.add_function("go_eq", go_eq);
    env.add_function("go_ne", |a: Value, b: Value| a != b);
    env.add_function("go_lt", |a: Value, b: Value| compare(&a, &b).map(Ordering::is_lt));
    env.add_function("go_le", |a: Value, b: Value| compare(&a, &b).map(Ordering::is_le));
    env.add_function("go_gt", |a: Value, b: Value| compare(&a, &b).map(Ordering::is_gt));
    env.add_function("go_ge", |a: Value, b: Value| compare(&a, &b).map(Ordering::is_ge));
    env.add_function("go_len", go_len);
    env.add_function("go_index", go_index);
    env.add_function("go_print", go_print);
    env.add_function("go_println", go_println);
    env.add_function("go_printf", go_printf);
    env
}

const BUILTINS: &[&str] = &[
    "and", "or", "not", "eq", "ne", "lt", "le", "gt", "ge", "len", "index", "print", "println",
    "printf",
];

const GO_WHITESPACE: [char; 4] = [' ', '\t', '\r', '\n'];

// ============================================================================
// Runtime builtins
// ============================================================================

fn exec_error(message: impl Into<String>) -> minijinja::Error {
    minijinja::Error::new(ErrorKind::InvalidOperation, message.into())
}

fn go_field(obj: Value, key: &str) -> Result<Value, minijinja::Error> {
    match obj.kind() {
        ValueKind::Map => {
            let value = obj.get_attr(key)?;
            if value.is_undefined() {
                Err(minijinja::Error::new(ErrorKind::UndefinedError, key.to_string()))
            } else {
                Ok(value)
            }
        }
        ValueKind::None | ValueKind::Undefined => {
            Err(exec_error(format!("nil pointer evaluating .{key}")))
        }
        kind => Err(exec_error(format!("can't evaluate field {key} in type {kind}"))),
    }
}

/// Normalize a range operand into `[key, value]` pairs.
fn go_range(value: Value) -> Result<Value, minijinja::Error> {
    let pairs: Vec<Value> = match value.kind() {
        ValueKind::Map => {
            let mut keys: Vec<Value> = value.try_iter()?.collect();
            keys.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            keys.into_iter()
                .map(|k| {
                    let v = value.get_item(&k)?;
                    Ok(Value::from(vec![k, v]))
                })
                .collect::<Result<_, minijinja::Error>>()?
        }
        ValueKind::Seq | ValueKind::Iterable => value
            .try_iter()?
            .enumerate()
            .map(|(i, v)| Value::from(vec![Value::from(i), v]))
            .collect(),
        ValueKind::Number => {
            let n = value
                .as_i64()
                .ok_or_else(|| exec_error(format!("range can't iterate over {value}")))?;
            (0..n.max(0))
                .map(|i| Value::from(vec![Value::from(i), Value::from(i)]))
                .collect()
        }
        ValueKind::None | ValueKind::Undefined => Vec::new(),
        _ => return Err(exec_error(format!("range can't iterate over {value}"))),
    };
    Ok(Value::from(pairs))
}

/// Format a value the way Go's `fmt` prints it with `%v`.
fn go_format(value: &Value) -> String {
    match value.kind() {
        ValueKind::None | ValueKind::Undefined => "<nil>".to_string(),
        ValueKind::Seq | ValueKind::Iterable => {
            let items: Vec<String> = value
                .try_iter()
                .map(|it| it.map(|v| go_format(&v)).collect())
                .unwrap_or_default();
            format!("[{}]", items.join(" "))
        }
        ValueKind::Map => {
            let mut keys: Vec<Value> = value.try_iter().map(|it| it.collect()).unwrap_or_default();
            keys.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            let entries: Vec<String> = keys
                .iter()
                .map(|k| {
                    let v = value.get_item(k).unwrap_or_default();
                    format!("{}:{}", go_format(k), go_format(&v))
                })
                .collect();
            format!("map[{}]", entries.join(" "))
        }
        _ => value.to_string(),
    }
}

fn go_and(Rest(args): Rest<Value>) -> Value {
    args.iter()
        .find(|v| !v.is_true())
        .or_else(|| args.last())
        .cloned()
        .unwrap_or_else(|| Value::from(()))
}

fn go_or(Rest(args): Rest<Value>) -> Value {
    args.iter()
        .find(|v| v.is_true())
        .or_else(|| args.last())
        .cloned()
        .unwrap_or_else(|| Value::from(()))
}

fn go_eq(first: Value, Rest(others): Rest<Value>) -> Result<bool, minijinja::Error> {
    if others.is_empty() {
        return Err(exec_error("missing argument for comparison"));
    }
    Ok(others.iter().any(|v| *v == first))
}

fn compare(a: &Value, b: &Value) -> Result<Ordering, minijinja::Error> {
    if a.kind() != b.kind() {
        return Err(exec_error(format!(
            "incompatible types for comparison: {} and {}",
            a.kind(),
            b.kind()
        )));
    }
    a.partial_cmp(b)
        .ok_or_else(|| exec_error(format!("invalid type for comparison: {}", a.kind())))
}

fn go_len(value: Value) -> Result<usize, minijinja::Error> {
    if let Some(s) = value.as_str() {
        return Ok(s.len());
    }
    value
        .len()
        .ok_or_else(|| exec_error(format!("len of type {}", value.kind())))
}

fn go_index(value: Value, Rest(keys): Rest<Value>) -> Result<Value, minijinja::Error> {
    let mut current = value;
    for key in keys {
        let kind = current.kind();
        let item = current.get_item(&key)?;
        current = match (kind, item.is_undefined()) {
            (ValueKind::Map, true) => Value::from(()),
            (_, true) => return Err(exec_error(format!("error calling index: index {key} out of range"))),
            (_, false) => item,
        };
    }
    Ok(current)
}

/// `fmt.Sprint`: operands are separated by a space when neither is a string.
fn go_print(Rest(args): Rest<Value>) -> String {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 && !is_string(&args[i - 1]) && !is_string(arg) {
            out.push(' ');
        }
        out.push_str(&go_format(arg));
    }
    out
}

fn go_println(Rest(args): Rest<Value>) -> String {
    let items: Vec<String> = args.iter().map(go_format).collect();
    format!("{}\n", items.join(" "))
}

/// `fmt.Sprintf` for the `%v`, `%s`, `%d`, `%q`, `%t` and `%%` verbs.
fn go_printf(format: &str, Rest(args): Rest<Value>) -> String {
    let mut out = String::new();
    let mut args = args.iter();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        let Some(arg) = args.next() else {
            let _ = write!(out, "%!{verb}(MISSING)");
            continue;
        };
        match verb {
            'v' | 's' => out.push_str(&go_format(arg)),
            'd' if arg.kind() == ValueKind::Number && arg.as_i64().is_some() => {
                out.push_str(&go_format(arg));
            }
            't' if arg.kind() == ValueKind::Bool => out.push_str(&go_format(arg)),
            'q' => {
                let _ = write!(out, "{:?}", go_format(arg));
            }
            _ => {
                let _ = write!(out, "%!{verb}({})", go_format(arg));
            }
        }
    }
    out
}

fn is_string(value: &Value) -> bool {
    value.kind() == ValueKind::String
}

// ============================================================================
// Compiler
// ============================================================================

/// A Go template compiled to minijinja source plus its literal table.
#[derive(Debug, Default)]
struct Compiled {
    source: String,
    literals: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    If,
    Range,
    With,
}

#[derive(Debug)]
struct Block {
    kind: BlockKind,
    /// Whether the block rebound dot and the binding is still active
    dot_bound: bool,
    seen_else: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Pipe,
    LParen,
    RParen,
    Comma,
    Declare,
    Assign,
    Str(String),
    Number(String),
    Ident(String),
    /// `.A.B`; an empty path is dot itself
    Field(Vec<String>),
    /// `$name.A.B`; an empty name is `$`
    Var(String, Vec<String>),
}

fn parse_error(message: impl Into<String>) -> TemplateError {
    TemplateError::Parse(message.into())
}

fn compile(template: &str) -> Result<Compiled, TemplateError> {
    let mut compiler = Compiler::default();
    compiler.run(template)?;
    if let Some(block) = compiler.blocks.last() {
        return Err(parse_error(format!("unexpected EOF: unclosed {:?} action", block.kind)));
    }
    Ok(compiler.out)
}

#[derive(Debug)]
struct Compiler {
    out: Compiled,
    blocks: Vec<Block>,
    dots: Vec<String>,
    scopes: Vec<Vec<String>>,
    next_id: usize,
}

impl Default for Compiler {
    fn default() -> Self {
        Self {
            out: Compiled::default(),
            blocks: Vec::new(),
            dots: vec!["__root".to_string()],
            scopes: vec![Vec::new()],
            next_id: 0,
        }
    }
}

impl Compiler {
    fn run(&mut self, template: &str) -> Result<(), TemplateError> {
        let mut rest = template;
        let mut trim_next = false;
        loop {
            let start = rest.find("{{");
            let mut text = &rest[..start.unwrap_or(rest.len())];
            if trim_next {
                text = text.trim_start_matches(GO_WHITESPACE);
            }
            let Some(start) = start else {
                self.emit_text(text);
                return Ok(());
            };

            let mut body_start = start + 2;
            let after = &rest[body_start..];
            if after.starts_with('-') && after[1..].starts_with(GO_WHITESPACE) {
                text = text.trim_end_matches(GO_WHITESPACE);
                body_start += 1;
            }
            self.emit_text(text);

            let (body, consumed, trim_right) = scan_action(&rest[body_start..])?;
            self.action(body.trim_matches(GO_WHITESPACE))?;
            trim_next = trim_right;
            rest = &rest[body_start + consumed..];
        }
    }

    fn emit_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let index = self.literal(text.to_string());
        let _ = write!(self.out.source, "{{{{ __text[{index}] }}}}");
    }

    fn literal(&mut self, value: String) -> usize {
        self.out.literals.push(value);
        self.out.literals.len() - 1
    }

    fn fresh(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("__{prefix}{}", self.next_id)
    }

    fn stmt(&mut self, stmt: &str) {
        let _ = write!(self.out.source, "{{% {stmt} %}}");
    }

    fn action(&mut self, body: &str) -> Result<(), TemplateError> {
        if body.starts_with("/*") {
            return Ok(());
        }
        let tokens = tokenize(body)?;
        let Some(first) = tokens.first() else {
            return Err(parse_error("missing value for command"));
        };

        match first {
            Token::Ident(word) if word == "if" => {
                let cond = self.pipeline(&tokens[1..])?;
                self.open(BlockKind::If, false);
                self.stmt(&format!("if {cond}"));
            }
            Token::Ident(word) if word == "else" => self.else_branch(&tokens[1..])?,
            Token::Ident(word) if word == "end" => self.end(tokens.len())?,
            Token::Ident(word) if word == "range" => self.range(&tokens[1..])?,
            Token::Ident(word) if word == "with" => self.with(&tokens[1..])?,
            Token::Ident(word)
                if matches!(word.as_str(), "define" | "template" | "block" | "break" | "continue") =>
            {
                return Err(parse_error(format!("unsupported action {word:?}")));
            }
            Token::Var(name, path)
                if !name.is_empty()
                    && path.is_empty()
                    && matches!(tokens.get(1), Some(Token::Declare | Token::Assign)) =>
            {
                let name = name.clone();
                if tokens[1] == Token::Assign && !self.is_declared(&name) {
                    return Err(parse_error(format!("undefined variable \"${name}\"")));
                }
                let value = self.pipeline(&tokens[2..])?;
                self.declare(&name);
                self.stmt(&format!("set {} = {value}", var_ident(&name)));
            }
            _ => {
                let value = self.pipeline(&tokens)?;
                let _ = write!(self.out.source, "{{{{ go_output({value}) }}}}");
            }
        }
        Ok(())
    }

    fn open(&mut self, kind: BlockKind, dot_bound: bool) {
        self.blocks.push(Block {
            kind,
            dot_bound,
            seen_else: false,
        });
        self.scopes.push(Vec::new());
    }

    fn else_branch(&mut self, tokens: &[Token]) -> Result<(), TemplateError> {
        let Some(block) = self.blocks.last_mut() else {
            return Err(parse_error("unexpected {{else}}"));
        };
        if block.seen_else {
            return Err(parse_error("expected end; found {{else}}"));
        }
        let kind = block.kind;
        let unbind = std::mem::take(&mut block.dot_bound);

        match tokens.first() {
            None => {
                block.seen_else = true;
                if unbind {
                    self.dots.pop();
                }
                self.scopes.pop();
                self.scopes.push(Vec::new());
                self.stmt("else");
                Ok(())
            }
            Some(Token::Ident(word)) if word == "if" && kind == BlockKind::If => {
                self.scopes.pop();
                self.scopes.push(Vec::new());
                let cond = self.pipeline(&tokens[1..])?;
                self.stmt(&format!("elif {cond}"));
                Ok(())
            }
            Some(_) => Err(parse_error(format!("unsupported else clause in {kind:?}"))),
        }
    }

    fn end(&mut self, token_count: usize) -> Result<(), TemplateError> {
        if token_count != 1 {
            return Err(parse_error("unexpected arguments to end"));
        }
        let block = self
            .blocks
            .pop()
            .ok_or_else(|| parse_error("unexpected {{end}}"))?;
        if block.dot_bound {
            self.dots.pop();
        }
        self.scopes.pop();
        match block.kind {
            BlockKind::If => self.stmt("endif"),
            BlockKind::Range => self.stmt("endfor"),
            BlockKind::With => {
                self.stmt("endif");
                self.stmt("endwith");
            }
        }
        Ok(())
    }

    /// Split an optional `$a :=` or `$a, $b :=` prefix off a range or with clause.
    fn declarations<'t>(tokens: &'t [Token]) -> Result<(Vec<String>, &'t [Token]), TemplateError> {
        let declared = |t: &Token| match t {
            Token::Var(name, path) if !name.is_empty() && path.is_empty() => Some(name.clone()),
            _ => None,
        };
        match tokens {
            [a, Token::Declare | Token::Assign, rest @ ..] => {
                let a = declared(a).ok_or_else(|| parse_error("invalid variable declaration"))?;
                Ok((vec![a], rest))
            }
            [a, Token::Comma, b, Token::Declare | Token::Assign, rest @ ..] => {
                let a = declared(a).ok_or_else(|| parse_error("invalid variable declaration"))?;
                let b = declared(b).ok_or_else(|| parse_error("invalid variable declaration"))?;
                Ok((vec![a, b], rest))
            }
            _ => Ok((Vec::new(), tokens)),
        }
    }

    fn range(&mut self, tokens: &[Token]) -> Result<(), TemplateError> {
        let (vars, rest) = Self::declarations(tokens)?;
        let source = self.pipeline(rest)?;
        let (key, value) = match vars.as_slice() {
            [] => (self.fresh("k"), self.fresh("v")),
            [v] => (self.fresh("k"), var_ident(v)),
            [k, v] => (var_ident(k), var_ident(v)),
            _ => return Err(parse_error("too many declarations in range")),
        };
        self.open(BlockKind::Range, true);
        for name in &vars {
            self.declare(name);
        }
        self.dots.push(value.clone());
        self.stmt(&format!("for {key}, {value} in go_range({source})"));
        Ok(())
    }

    fn with(&mut self, tokens: &[Token]) -> Result<(), TemplateError> {
        let (vars, rest) = Self::declarations(tokens)?;
        let value = self.pipeline(rest)?;
        let bound = match vars.as_slice() {
            [] => self.fresh("d"),
            [v] => var_ident(v),
            _ => return Err(parse_error("too many declarations in with")),
        };
        self.open(BlockKind::With, true);
        for name in &vars {
            self.declare(name);
        }
        self.dots.push(bound.clone());
        self.stmt(&format!("with {bound} = {value}"));
        self.stmt(&format!("if {bound}"));
        Ok(())
    }

    fn declare(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(name.to_string());
        }
    }

    fn is_declared(&self, name: &str) -> bool {
        self.scopes.iter().flatten().any(|n| n == name)
    }

    fn pipeline(&mut self, tokens: &[Token]) -> Result<String, TemplateError> {
        if tokens.is_empty() {
            return Err(parse_error("missing value for command"));
        }
        let mut value = None;
        for command in split_commands(tokens)? {
            value = Some(self.command(command, value)?);
        }
        value.ok_or_else(|| parse_error("missing value for command"))
    }

    fn command(&mut self, tokens: &[Token], piped: Option<String>) -> Result<String, TemplateError> {
        if let Some(Token::Ident(name)) = tokens.first() {
            if !matches!(name.as_str(), "true" | "false" | "nil") {
                if !BUILTINS.contains(&name.as_str()) {
                    return Err(parse_error(format!("function {name:?} not defined")));
                }
                let mut args = self.operands(&tokens[1..])?;
                args.extend(piped);
                return Ok(format!("go_{name}({})", args.join(", ")));
            }
        }

        let mut operands = self.operands(tokens)?;
        if operands.len() != 1 {
            return Err(parse_error("can't give argument to non-function"));
        }
        if piped.is_some() {
            return Err(parse_error("non-function in pipeline stage"));
        }
        Ok(operands.remove(0))
    }

    fn operands(&mut self, tokens: &[Token]) -> Result<Vec<String>, TemplateError> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            match &tokens[i] {
                Token::LParen => {
                    let close = matching_paren(tokens, i)?;
                    let inner = self.pipeline(&tokens[i + 1..close])?;
                    out.push(format!("({inner})"));
                    i = close;
                }
                token => out.push(self.operand(token)?),
            }
            i += 1;
        }
        Ok(out)
    }

    fn operand(&mut self, token: &Token) -> Result<String, TemplateError> {
        match token {
            Token::Str(s) => {
                let index = self.literal(s.clone());
                Ok(format!("__text[{index}]"))
            }
            Token::Number(n) => Ok(n.clone()),
            Token::Ident(word) => match word.as_str() {
                "true" | "false" => Ok(word.clone()),
                "nil" => Ok("none".to_string()),
                other => Err(parse_error(format!("function {other:?} used as an argument"))),
            },
            Token::Field(path) => {
                let dot = self.dots.last().cloned().unwrap_or_else(|| "__root".to_string());
                Ok(field_access(dot, path))
            }
            Token::Var(name, path) => {
                let base = if name.is_empty() {
                    "__root".to_string()
                } else if self.is_declared(name) {
                    var_ident(name)
                } else {
                    return Err(parse_error(format!("undefined variable \"${name}\"")));
                };
                Ok(field_access(base, path))
            }
            other => Err(parse_error(format!("unexpected {other:?} in operand"))),
        }
    }
}

fn var_ident(name: &str) -> String {
    format!("var_{name}")
}

fn field_access(base: String, path: &[String]) -> String {
    path.iter()
        .fold(base, |acc, key| format!("go_field({acc}, \"{key}\")"))
}

fn split_commands(tokens: &[Token]) -> Result<Vec<&[Token]>, TemplateError> {
    let mut commands = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| parse_error("unexpected right paren"))?;
            }
            Token::Pipe if depth == 0 => {
                if i == start {
                    return Err(parse_error("missing command in pipeline"));
                }
                commands.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start >= tokens.len() {
        return Err(parse_error("missing command in pipeline"));
    }
    commands.push(&tokens[start..]);
    Ok(commands)
}

fn matching_paren(tokens: &[Token], open: usize) -> Result<usize, TemplateError> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err(parse_error("unclosed left paren"))
}

/// Find the end of an action body. Returns the body, the bytes consumed
/// including the closing delimiter, and whether it carries a `-}}` marker.
fn scan_action(src: &str) -> Result<(&str, usize, bool), TemplateError> {
    let bytes = src.as_bytes();
    let mut i = 0;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' && q != b'`' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None if b == b'"' || b == b'`' || b == b'\'' => quote = Some(b),
            None if b == b'/' && src[i..].starts_with("/*") => {
                let end = src[i + 2..]
                    .find("*/")
                    .ok_or_else(|| parse_error("unclosed comment"))?;
                i += end + 3;
            }
            None if b == b'}' && bytes.get(i + 1) == Some(&b'}') => {
                let body = &src[..i];
                if let Some(stripped) = body.strip_suffix('-') {
                    if stripped.ends_with(GO_WHITESPACE) {
                        return Ok((stripped, i + 2, true));
                    }
                }
                return Ok((body, i + 2, false));
            }
            None => {}
        }
        i += 1;
    }
    Err(parse_error("unclosed action"))
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn read_while(chars: &[char], mut i: usize, pred: impl Fn(char) -> bool) -> (String, usize) {
    let start = i;
    while i < chars.len() && pred(chars[i]) {
        i += 1;
    }
    (chars[start..i].iter().collect(), i)
}

/// Read a `.A.B` chain starting at a `.`.
fn read_path(chars: &[char], mut i: usize) -> Result<(Vec<String>, usize), TemplateError> {
    let mut path = Vec::new();
    while i < chars.len() && chars[i] == '.' {
        let (segment, next) = read_while(chars, i + 1, is_ident_char);
        if segment.is_empty() {
            if path.is_empty() && next == i + 1 {
                return Ok((path, next));
            }
            return Err(parse_error("unexpected . after term"));
        }
        path.push(segment);
        i = next;
    }
    Ok((path, i))
}

fn read_quoted(chars: &[char], mut i: usize) -> Result<(String, usize), TemplateError> {
    let mut out = String::new();
    i += 1;
    while i < chars.len() {
        match chars[i] {
            '"' => return Ok((out, i + 1)),
            '\\' => {
                let escaped = chars.get(i + 1).copied().ok_or_else(|| parse_error("unterminated quoted string"))?;
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '\\' | '"' | '\'' => out.push(escaped),
                    'u' => {
                        let hex: String = chars.iter().skip(i + 2).take(4).collect();
                        let c = u32::from_str_radix(&hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| parse_error(format!("invalid escape \\u{hex}")))?;
                        out.push(c);
                        i += 4;
                    }
                    other => return Err(parse_error(format!("unknown escape sequence \\{other}"))),
                }
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(parse_error("unterminated quoted string"))
}

fn tokenize(body: &str) -> Result<Vec<Token>, TemplateError> {
    let chars: Vec<char> = body.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' if next == Some('=') => {
                tokens.push(Token::Declare);
                i += 2;
            }
            '=' => {
                tokens.push(Token::Assign);
                i += 1;
            }
            '"' => {
                let (s, end) = read_quoted(&chars, i)?;
                tokens.push(Token::Str(s));
                i = end;
            }
            '`' => {
                let (s, end) = read_while(&chars, i + 1, |c| c != '`');
                if end >= chars.len() {
                    return Err(parse_error("unterminated raw quoted string"));
                }
                tokens.push(Token::Str(s));
                i = end + 1;
            }
            '.' if !next.is_some_and(|n| n.is_ascii_digit()) => {
                let (path, end) = read_path(&chars, i)?;
                tokens.push(Token::Field(path));
                i = end;
            }
            '$' => {
                let (name, end) = read_while(&chars, i + 1, is_ident_char);
                let (path, end) = read_path(&chars, end)?;
                tokens.push(Token::Var(name, path));
                i = end;
            }
            c if c.is_ascii_digit()
                || c == '.'
                || ((c == '-' || c == '+') && next.is_some_and(|n| n.is_ascii_digit())) =>
            {
                let (raw, end) = read_while(&chars, i + 1, |c| c.is_ascii_alphanumeric() || c == '.' || c == '_');
                let literal = format!("{c}{raw}");
                tokens.push(Token::Number(number_literal(&literal)?));
                i = end;
            }
            c if c.is_alphabetic() || c == '_' => {
                let (word, end) = read_while(&chars, i, is_ident_char);
                tokens.push(Token::Ident(word));
                i = end;
            }
            other => return Err(parse_error(format!("unexpected {other:?} in command"))),
        }
    }
    Ok(tokens)
}

fn number_literal(raw: &str) -> Result<String, TemplateError> {
    let cleaned = raw.trim_start_matches('+').replace('_', "");
    if let Ok(n) = cleaned.parse::<i64>() {
        return Ok(n.to_string());
    }
    match cleaned.parse::<f64>() {
        Ok(f) if f.is_finite() => Ok(format!("{f:?}")),
        _ => Err(parse_error(format!("bad number syntax: {raw:?}"))),
    }
}

#[cfg(test)]
#[path = "gotemplate_tests.rs"]
mod gotemplate_tests;
