//! Shared test helpers: a compile-counting engine for a tiny line-based
//! script dialect.
//!
//! One statement per line, trailing `;` optional, `//` comments ignored:
//!
//! ```text
//! module.exports.NAME = EXPR      exports.NAME = EXPR
//! module.exports = EXPR           module.shared = true|false
//! module.exports.NAME = fn(EXPR)  module.exports.NAME = fn(args)
//! module.exports.NAME = retry_once(EXPR)
//! require('NAME')                 return EXPR
//! throw 'MESSAGE'                 sleep MILLIS
//! ```
//!
//! Expressions are `+`-separated terms: numbers, `'strings'`, `true`,
//! `false`, `require('NAME').a.b`, `module.args.length` and calls of global
//! functions `NAME(EXPR)`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tern_runtime::repository::{MemoryRepository, Repository};
use tern_runtime::{
    CompileError, CompileMode, CompiledUnit, ModuleHost, ModuleScopeRef, NativeFunction,
    ObjectRef, Runtime, RuntimeConfig, ScriptEngine, ScriptError, SyntaxError, Value,
};

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Require { name: String, props: Vec<String> },
    ArgCount,
    CallArgs,
    Call { name: String, arg: Box<Expr> },
    Add(Vec<Expr>),
}

#[derive(Debug, Clone)]
enum Stmt {
    Export(String, Expr),
    ExportAlias(String, Expr),
    ReplaceExports(Expr),
    Shared(bool),
    ExportFn(String, Expr),
    ExportRetryFn(String, Expr),
    Require(String),
    Return(Expr),
    Throw(String),
    Sleep(u64),
}

#[derive(Debug)]
struct Program {
    source_name: String,
    statements: Vec<Stmt>,
}

/// Engine counting compilations and executions per source name.
#[derive(Debug, Default)]
pub struct LineEngine {
    compiles: Mutex<HashMap<String, usize>>,
    executions: Mutex<HashMap<String, usize>>,
    retries: Arc<AtomicUsize>,
}

impl LineEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of compilations of sources whose name ends with `suffix`.
    pub fn compiles(&self, suffix: &str) -> usize {
        count(&self.compiles.lock(), suffix)
    }

    /// Number of executions of sources whose name ends with `suffix`.
    pub fn executions(&self, suffix: &str) -> usize {
        count(&self.executions.lock(), suffix)
    }

    pub fn total_compiles(&self) -> usize {
        self.compiles.lock().values().sum()
    }

    /// Make the next `n` calls of `retry_once` functions request a retry.
    pub fn request_retries(&self, n: usize) {
        self.retries.store(n, Ordering::SeqCst);
    }

    fn eval(&self, expr: &Expr, host: &mut ModuleHost<'_>) -> Result<Value, ScriptError> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::string(s)),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Require { name, props } => {
                let mut value = host.require(name)?;
                for prop in props {
                    value = value.get(prop).unwrap_or_default();
                }
                Ok(value)
            }
            Expr::ArgCount => {
                let count = host
                    .scope()
                    .meta()
                    .get("args")
                    .and_then(|args| args.as_array().map(|a| a.len()))
                    .unwrap_or(0);
                Ok(Value::Number(count as f64))
            }
            Expr::CallArgs => Ok(Value::Undefined),
            Expr::Call { name, arg } => {
                let arg = self.eval(arg, host)?;
                match host.global().get(name) {
                    Some(Value::Function(func)) => func.call(&[arg]),
                    _ => Err(ScriptError::thrown(
                        "TypeError",
                        format!("{} is not a function", name),
                    )),
                }
            }
            Expr::Add(terms) => {
                let values = terms
                    .iter()
                    .map(|term| self.eval(term, host))
                    .collect::<Result<Vec<_>, _>>()?;
                if values.iter().all(|v| v.as_number().is_some()) {
                    return Ok(Value::Number(values.iter().filter_map(Value::as_number).sum()));
                }
                Ok(Value::from(values.iter().map(display).collect::<String>()))
            }
        }
    }
}

impl ScriptEngine for LineEngine {
    fn compile(
        &self,
        source: &str,
        source_name: &str,
        first_line: u32,
        _mode: CompileMode,
    ) -> Result<CompiledUnit, CompileError> {
        *self
            .compiles
            .lock()
            .entry(source_name.to_string())
            .or_default() += 1;

        let mut statements = Vec::new();
        let mut errors = Vec::new();
        for (index, line) in source.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("//") {
                continue;
            }
            match parse_statement(trimmed) {
                Some(statement) => statements.push(statement),
                None => {
                    let offset = line.len() - line.trim_start().len() + 1;
                    errors.push(SyntaxError::new(
                        "unrecognized statement",
                        source_name,
                        first_line + index as u32,
                        line,
                        offset as u32,
                    ));
                }
            }
        }
        if !errors.is_empty() {
            return Err(CompileError::from_syntax_errors(errors));
        }
        Ok(Arc::new(Program {
            source_name: source_name.to_string(),
            statements,
        }))
    }

    fn execute(
        &self,
        unit: &CompiledUnit,
        host: &mut ModuleHost<'_>,
    ) -> Result<Value, ScriptError> {
        let program = (**unit)
            .downcast_ref::<Program>()
            .ok_or_else(|| ScriptError::error("foreign compiled unit"))?;
        *self
            .executions
            .lock()
            .entry(program.source_name.clone())
            .or_default() += 1;

        for statement in &program.statements {
            match statement {
                Stmt::Export(name, expr) => {
                    let value = self.eval(expr, host)?;
                    exports_object(host.scope().exports())?.set(name, value);
                }
                Stmt::ExportAlias(name, expr) => {
                    let value = self.eval(expr, host)?;
                    let exports = host.global().get("exports").unwrap_or_default();
                    exports_object(exports)?.set(name, value);
                }
                Stmt::ReplaceExports(expr) => {
                    let value = self.eval(expr, host)?;
                    host.scope().meta().set("exports", value);
                }
                Stmt::Shared(shared) => {
                    host.scope().meta().set("shared", Value::Bool(*shared));
                }
                Stmt::ExportFn(name, expr) => {
                    let func = match expr {
                        Expr::CallArgs => NativeFunction::new(name, |args| {
                            Ok(Value::Number(args.iter().filter_map(Value::as_number).sum()))
                        }),
                        other => {
                            let value = self.eval(other, host)?;
                            NativeFunction::new(name, move |_| Ok(value.clone()))
                        }
                    };
                    exports_object(host.scope().exports())?.set(name, Value::Function(func));
                }
                Stmt::ExportRetryFn(name, expr) => {
                    let value = self.eval(expr, host)?;
                    let retries = Arc::clone(&self.retries);
                    let func = NativeFunction::new(name, move |_| {
                        let take = retries.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                            n.checked_sub(1)
                        });
                        match take {
                            Ok(_) => Err(ScriptError::RetryRequested),
                            Err(_) => Ok(value.clone()),
                        }
                    });
                    exports_object(host.scope().exports())?.set(name, Value::Function(func));
                }
                Stmt::Require(name) => {
                    host.require(name)?;
                }
                Stmt::Return(expr) => return self.eval(expr, host),
                Stmt::Throw(message) => return Err(ScriptError::error(message.clone())),
                Stmt::Sleep(millis) => std::thread::sleep(Duration::from_millis(*millis)),
            }
        }
        Ok(Value::Undefined)
    }
}

fn count(counts: &HashMap<String, usize>, suffix: &str) -> usize {
    counts
        .iter()
        .filter(|(name, _)| name.ends_with(suffix))
        .map(|(_, n)| *n)
        .sum()
}

fn exports_object(exports: Value) -> Result<ObjectRef, ScriptError> {
    exports
        .as_object()
        .cloned()
        .ok_or_else(|| ScriptError::thrown("TypeError", "exports is not an object"))
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.type_name().to_string(),
    }
}

fn parse_statement(line: &str) -> Option<Stmt> {
    let line = line.trim_end_matches(';').trim();
    if let Some(rest) = line.strip_prefix("return ") {
        return parse_expr(rest).map(Stmt::Return);
    }
    if let Some(rest) = line.strip_prefix("throw ") {
        return parse_string(rest).map(Stmt::Throw);
    }
    if let Some(rest) = line.strip_prefix("sleep ") {
        return rest.trim().parse().ok().map(Stmt::Sleep);
    }
    if line.starts_with("require(") {
        return match parse_term(line)? {
            Expr::Require { name, props } if props.is_empty() => Some(Stmt::Require(name)),
            _ => None,
        };
    }

    let (target, value) = line.split_once(" = ")?;
    let (target, value) = (target.trim(), value.trim());
    match target {
        "module.shared" => match value {
            "true" => Some(Stmt::Shared(true)),
            "false" => Some(Stmt::Shared(false)),
            _ => None,
        },
        "module.exports" => parse_expr(value).map(Stmt::ReplaceExports),
        _ => {
            let (alias, name) = if let Some(name) = target.strip_prefix("module.exports.") {
                (false, name)
            } else if let Some(name) = target.strip_prefix("exports.") {
                (true, name)
            } else {
                return None;
            };
            if !is_ident(name) {
                return None;
            }
            if let Some(inner) = call_argument(value, "fn") {
                let expr = if inner == "args" {
                    Expr::CallArgs
                } else {
                    parse_expr(inner)?
                };
                return Some(Stmt::ExportFn(name.to_string(), expr));
            }
            if let Some(inner) = call_argument(value, "retry_once") {
                return Some(Stmt::ExportRetryFn(name.to_string(), parse_expr(inner)?));
            }
            let expr = parse_expr(value)?;
            Some(if alias {
                Stmt::ExportAlias(name.to_string(), expr)
            } else {
                Stmt::Export(name.to_string(), expr)
            })
        }
    }
}

fn parse_expr(text: &str) -> Option<Expr> {
    let mut terms = text
        .split(" + ")
        .map(parse_term)
        .collect::<Option<Vec<_>>>()?;
    if terms.len() == 1 {
        terms.pop()
    } else {
        Some(Expr::Add(terms))
    }
}

fn parse_term(text: &str) -> Option<Expr> {
    let text = text.trim();
    if let Ok(n) = text.parse::<f64>() {
        return Some(Expr::Number(n));
    }
    match text {
        "true" => return Some(Expr::Bool(true)),
        "false" => return Some(Expr::Bool(false)),
        "module.args.length" => return Some(Expr::ArgCount),
        _ => {}
    }
    if let Some(s) = parse_string(text) {
        return Some(Expr::Str(s));
    }
    if let Some(rest) = text.strip_prefix("require(") {
        let (arg, props) = rest.split_once(')')?;
        let name = parse_string(arg)?;
        if !props.is_empty() && !props.starts_with('.') {
            return None;
        }
        let props: Vec<String> = props.split('.').skip(1).map(str::to_string).collect();
        if !props.iter().all(|p| is_ident(p)) {
            return None;
        }
        return Some(Expr::Require { name, props });
    }
    let (name, rest) = text.split_once('(')?;
    let arg = rest.strip_suffix(')')?;
    if !is_ident(name) {
        return None;
    }
    Some(Expr::Call {
        name: name.to_string(),
        arg: Box::new(parse_expr(arg)?),
    })
}

fn call_argument<'a>(text: &'a str, function: &str) -> Option<&'a str> {
    text.strip_prefix(function)?
        .strip_prefix('(')?
        .strip_suffix(')')
}

fn parse_string(text: &str) -> Option<String> {
    let text = text.trim();
    let inner = text.strip_prefix('\'')?.strip_suffix('\'')?;
    if inner.contains('\'') {
        return None;
    }
    Some(inner.to_string())
}

fn is_ident(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

/// A runtime over one in-memory repository named `app`.
pub fn memory_runtime(
    config: RuntimeConfig,
) -> (Arc<MemoryRepository>, Arc<LineEngine>, Runtime) {
    let repo = MemoryRepository::new("app");
    let engine = LineEngine::new();
    let runtime = Runtime::with_search_path(
        config,
        Arc::clone(&engine) as Arc<dyn ScriptEngine>,
        vec![Arc::clone(&repo) as Arc<dyn Repository>],
    );
    (repo, engine, runtime)
}

/// Property `key` of the scope exports.
pub fn export(scope: &ModuleScopeRef, key: &str) -> Value {
    scope.exports().get(key).unwrap_or_default()
}

pub fn number(scope: &ModuleScopeRef, key: &str) -> f64 {
    export(scope, key)
        .as_number()
        .unwrap_or_else(|| panic!("{} of {} is not a number", key, scope))
}
