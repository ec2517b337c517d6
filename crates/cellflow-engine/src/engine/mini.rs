//! The `mini` expression language, backed by Rhai.
//!
//! A mini expression is a Rhai expression with two additions:
//! - an optional binding prefix `name = expr` that publishes the value under
//!   `name` to the other cells of the same resource
//! - spreadsheet references (`A1`, `A1:B2`, `sheet1!A3`) used as values
//!
//! Ranges evaluate to arrays (one row or column) or to object maps of
//! columns (rectangular ranges). `sum`, `avg`, `count`, `min` and `max`
//! accept either.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use futures::FutureExt;
use futures::future;
use regex::Regex;
use rhai::{AST, Array, Dynamic, Engine, FLOAT, INT, Map, Scope, Variant};

use super::cell::CellError;
use super::cell_ref::CellRef;
use super::context::{Analysis, AnalyzeFuture, ExecuteFuture, InputRef, LanguageContext};
use super::deps::{extract_references, for_each_code_segment, replace_references};
use super::value::{Table, TableColumn, Value};

/// Language name of [`MiniContext`].
pub const MINI: &str = "mini";

const REF_VAR_PREFIX: &str = "__ref_";

const KEYWORDS: &[&str] = &[
    "true", "false", "let", "const", "if", "else", "switch", "do", "while", "until", "loop",
    "for", "in", "continue", "break", "return", "throw", "try", "catch", "fn", "this", "global",
    "import", "export", "as", "private", "Fn",
];

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*\b").expect("identifier regex must compile")
    })
}

fn closure_params_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\|\s*([A-Za-z_][A-Za-z0-9_]*(?:\s*,\s*[A-Za-z_][A-Za-z0-9_]*)*)\s*\|")
            .expect("closure regex must compile")
    })
}

fn is_identifier(s: &str) -> bool {
    identifier_re()
        .find(s)
        .is_some_and(|m| m.start() == 0 && m.end() == s.len())
}

/// Split `name = expr` into its parts. Comparison operators are not
/// bindings, and neither is a cell reference on the left.
fn split_binding(source: &str) -> (Option<&str>, &str) {
    let bytes = source.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'=' {
            continue;
        }
        let prev = if i > 0 { bytes[i - 1] } else { 0 };
        let next = bytes.get(i + 1).copied().unwrap_or(0);
        if next == b'=' || matches!(prev, b'=' | b'!' | b'<' | b'>') {
            return (None, source);
        }
        let name = source[..i].trim();
        if is_identifier(name) && CellRef::from_str(name).is_none() {
            return (Some(name), source[i + 1..].trim());
        }
        return (None, source);
    }
    (None, source)
}

/// Replace every reference with a scope variable. Returns the rewritten
/// script and `(input key, variable)` pairs in order of first appearance.
fn bind_references(body: &str) -> (String, Vec<(String, String)>) {
    let mut vars: Vec<(String, String)> = Vec::new();
    let script = replace_references(body, |token| {
        let key = InputRef::from(token.clone()).key();
        let var = match vars.iter().find(|(k, _)| *k == key) {
            Some((_, var)) => var.clone(),
            None => {
                let var = format!("{}{}", REF_VAR_PREFIX, vars.len());
                vars.push((key, var.clone()));
                var
            }
        };
        Some(var)
    });
    (script, vars)
}

/// Free variables of a rewritten script, in order of first appearance.
fn free_symbols(script: &str) -> Vec<String> {
    let mut params: HashSet<String> = HashSet::new();
    for caps in closure_params_re().captures_iter(script) {
        for p in caps[1].split(',') {
            params.insert(p.trim().to_string());
        }
    }

    let mut symbols: Vec<String> = Vec::new();
    for_each_code_segment(script, |seg| {
        for m in identifier_re().find_iter(seg) {
            let name = m.as_str();
            if name.starts_with(REF_VAR_PREFIX)
                || KEYWORDS.contains(&name)
                || params.contains(name)
            {
                continue;
            }
            let before = seg[..m.start()].trim_end();
            let after = seg[m.end()..].trim_start();
            if before.ends_with('.') || after.starts_with('(') {
                continue;
            }
            // Object map keys: `#{ name: value }`
            if after.starts_with(':') && !after.starts_with("::") {
                continue;
            }
            if !symbols.iter().any(|s| s == name) {
                symbols.push(name.to_string());
            }
        }
        seg.to_string()
    });
    symbols
}

fn collect_numbers(value: &Dynamic, out: &mut Vec<f64>) {
    if let Ok(n) = value.as_float() {
        out.push(n);
    } else if let Ok(n) = value.as_int() {
        out.push(n as f64);
    } else if value.is_array() {
        if let Some(items) = value.clone().try_cast::<Array>() {
            items.iter().for_each(|v| collect_numbers(v, out));
        }
    } else if value.is_map()
        && let Some(map) = value.clone().try_cast::<Map>()
    {
        map.values().for_each(|v| collect_numbers(v, out));
    }
}

fn count_values(value: &Dynamic) -> i64 {
    if value.is_unit() {
        0
    } else if let Some(items) = value.clone().try_cast::<Array>() {
        items.iter().map(count_values).sum()
    } else if let Some(map) = value.clone().try_cast::<Map>() {
        map.values().map(count_values).sum()
    } else {
        1
    }
}

fn numbers_of(value: Dynamic) -> Vec<f64> {
    let mut out = Vec::new();
    collect_numbers(&value, &mut out);
    out
}

fn aggregate_sum(value: Dynamic) -> f64 {
    numbers_of(value).iter().sum()
}

fn aggregate_avg(value: Dynamic) -> f64 {
    let nums = numbers_of(value);
    if nums.is_empty() {
        0.0
    } else {
        nums.iter().sum::<f64>() / nums.len() as f64
    }
}

fn aggregate_min(value: Dynamic) -> Dynamic {
    numbers_of(value)
        .into_iter()
        .reduce(f64::min)
        .map(Dynamic::from)
        .unwrap_or(Dynamic::UNIT)
}

fn aggregate_max(value: Dynamic) -> Dynamic {
    numbers_of(value)
        .into_iter()
        .reduce(f64::max)
        .map(Dynamic::from)
        .unwrap_or(Dynamic::UNIT)
}

/// Register `name` for arrays, tables and single values. A range reduced
/// to one cell reads as that cell's value, which may be a number or empty.
fn register_aggregate<R: Variant + Clone>(
    engine: &mut Engine,
    name: &str,
    aggregate: fn(Dynamic) -> R,
) {
    engine.register_fn(name, move |arr: Array| aggregate(Dynamic::from_array(arr)));
    engine.register_fn(name, move |map: Map| aggregate(Dynamic::from_map(map)));
    engine.register_fn(name, move |n: FLOAT| aggregate(Dynamic::from(n)));
    engine.register_fn(name, move |n: INT| aggregate(Dynamic::from(n)));
    engine.register_fn(name, move |_: ()| aggregate(Dynamic::UNIT));
}

fn register_builtins(engine: &mut Engine) {
    register_aggregate(engine, "sum", aggregate_sum);
    register_aggregate(engine, "avg", aggregate_avg);
    register_aggregate(engine, "count", |value: Dynamic| count_values(&value));
    register_aggregate(engine, "min", aggregate_min);
    register_aggregate(engine, "max", aggregate_max);
}

/// Convert a cell value into a Rhai value.
pub fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => Dynamic::from(*n),
        Value::Text(s) => Dynamic::from(s.clone()),
        Value::Array(items) => Dynamic::from_array(items.iter().map(to_dynamic).collect()),
        Value::Table(table) => {
            let mut map = Map::new();
            for column in &table.columns {
                map.insert(
                    column.name.as_str().into(),
                    Dynamic::from_array(column.values.iter().map(to_dynamic).collect()),
                );
            }
            Dynamic::from_map(map)
        }
    }
}

/// Convert a Rhai result into a cell value. Object maps become tables.
pub fn from_dynamic(value: Dynamic) -> Value {
    if value.is_unit() {
        return Value::Null;
    }
    if let Ok(b) = value.as_bool() {
        return Value::Bool(b);
    }
    if let Ok(n) = value.as_int() {
        return Value::Number(n as f64);
    }
    if let Ok(n) = value.as_float() {
        return Value::Number(n);
    }
    if let Ok(c) = value.as_char() {
        return Value::Text(c.to_string());
    }
    if value.is_string() {
        return match value.into_immutable_string() {
            Ok(s) => Value::Text(s.to_string()),
            Err(type_name) => Value::Text(type_name.to_string()),
        };
    }
    if value.is_array() {
        return match value.try_cast::<Array>() {
            Some(items) => Value::Array(items.into_iter().map(from_dynamic).collect()),
            None => Value::Null,
        };
    }
    if value.is_map() {
        return match value.try_cast::<Map>() {
            Some(map) => Value::Table(map_to_table(map)),
            None => Value::Null,
        };
    }
    Value::Text(value.to_string())
}

fn map_to_table(map: Map) -> Table {
    let mut columns: Vec<TableColumn> = map
        .into_iter()
        .map(|(name, v)| {
            let values = match v.try_cast::<Array>() {
                Some(items) => items.into_iter().map(from_dynamic).collect(),
                None => Vec::new(),
            };
            TableColumn {
                name: name.to_string(),
                values,
            }
        })
        .collect();
    let rows = columns.iter().map(|c| c.values.len()).max().unwrap_or(0);
    for column in &mut columns {
        column.values.resize(rows, Value::Null);
    }
    Table { columns, rows }
}

/// Rhai-backed [`LanguageContext`] for the `mini` language.
pub struct MiniContext {
    engine: Engine,
    functions: Option<AST>,
}

impl Default for MiniContext {
    fn default() -> Self {
        Self::new()
    }
}

impl MiniContext {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        register_builtins(&mut engine);
        Self {
            engine,
            functions: None,
        }
    }

    /// Add a library of Rhai functions callable from every expression.
    pub fn with_functions(mut self, script: &str) -> Result<Self, String> {
        let ast = self
            .engine
            .compile(script)
            .map_err(|e| format!("Error in custom functions: {}", e))?;
        self.functions = Some(match self.functions.take() {
            Some(existing) => existing.merge(&ast),
            None => ast,
        });
        Ok(self)
    }

    /// Synchronous analysis.
    pub fn analyze_sync(&self, source: &str) -> Result<Analysis, CellError> {
        let (name, body) = split_binding(source);
        if body.trim().is_empty() {
            return Err(CellError::syntax("Empty expression"));
        }
        let (script, _) = bind_references(body);
        self.engine
            .compile_expression(&script)
            .map_err(|e| CellError::syntax(e.to_string()))?;

        let mut inputs: Vec<InputRef> = Vec::new();
        for token in extract_references(body) {
            let input = InputRef::from(token);
            if !inputs.contains(&input) {
                inputs.push(input);
            }
        }
        inputs.extend(free_symbols(&script).into_iter().map(InputRef::Symbol));

        Ok(Analysis {
            inputs,
            outputs: name.map(|n| vec![n.to_string()]).unwrap_or_default(),
        })
    }

    /// Synchronous execution.
    pub fn execute_sync(
        &self,
        source: &str,
        inputs: &HashMap<String, Value>,
    ) -> Result<Value, CellError> {
        let (_, body) = split_binding(source);
        let (script, vars) = bind_references(body);

        let mut scope = Scope::new();
        for (key, value) in inputs {
            if is_identifier(key) {
                scope.push_dynamic(key.as_str(), to_dynamic(value));
            }
        }
        for (key, var) in &vars {
            let value = inputs.get(key).map(to_dynamic).unwrap_or(Dynamic::UNIT);
            scope.push_dynamic(var.as_str(), value);
        }

        let ast = self
            .engine
            .compile_expression_with_scope(&scope, &script)
            .map_err(|e| CellError::syntax(e.to_string()))?;
        let ast = match &self.functions {
            Some(functions) => functions.merge(&ast),
            None => ast,
        };
        self.engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
            .map(from_dynamic)
            .map_err(|e| CellError::runtime(e.to_string()))
    }
}

impl LanguageContext for MiniContext {
    fn analyze(&self, source: &str) -> AnalyzeFuture {
        future::ready(self.analyze_sync(source)).boxed()
    }

    fn execute(&self, source: &str, inputs: HashMap<String, Value>) -> ExecuteFuture {
        future::ready(self.execute_sync(source, &inputs)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ErrorKind;

    fn keys(analysis: &Analysis) -> Vec<String> {
        analysis.inputs.iter().map(InputRef::key).collect()
    }

    #[test]
    fn test_split_binding() {
        assert_eq!(split_binding("x = 2"), (Some("x"), "2"));
        assert_eq!(split_binding("x == 2"), (None, "x == 2"));
        assert_eq!(split_binding("a <= b"), (None, "a <= b"));
        assert_eq!(split_binding("A1 = 2"), (None, "A1 = 2"));
        assert_eq!(split_binding("1 + 2"), (None, "1 + 2"));
    }

    #[test]
    fn test_analyze_binding_and_symbols() {
        let ctx = MiniContext::new();
        let analysis = ctx.analyze_sync("z = x + y").unwrap();
        assert_eq!(analysis.outputs, vec!["z".to_string()]);
        assert_eq!(keys(&analysis), vec!["x", "y"]);
    }

    #[test]
    fn test_analyze_references() {
        let ctx = MiniContext::new();
        let analysis = ctx.analyze_sync("x = sheet1!A3 + sum(A1:B4) + A1").unwrap();
        assert_eq!(keys(&analysis), vec!["sheet1!A3", "A1:B4", "A1"]);
    }

    #[test]
    fn test_analyze_ignores_calls_and_methods() {
        let ctx = MiniContext::new();
        let analysis = ctx.analyze_sync("items.len() + sum(values) * factor").unwrap();
        assert_eq!(keys(&analysis), vec!["items", "values", "factor"]);
    }

    #[test]
    fn test_free_symbols_skip_closure_params_and_map_keys() {
        assert_eq!(
            free_symbols("items.map(|v| v * factor)"),
            vec!["items".to_string(), "factor".to_string()]
        );
        assert_eq!(free_symbols("#{ total: n }"), vec!["n".to_string()]);
    }

    #[test]
    fn test_syntax_error() {
        let ctx = MiniContext::new();
        let err = ctx.analyze_sync("6 * 2 +").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
    }

    #[test]
    fn test_execute_with_symbols_and_references() {
        let ctx = MiniContext::new();
        let mut inputs = HashMap::new();
        inputs.insert("x".to_string(), Value::Number(2.0));
        inputs.insert("sheet1!A3".to_string(), Value::Number(4.0));
        let value = ctx.execute_sync("y = x * sheet1!A3", &inputs).unwrap();
        assert_eq!(value, Value::Number(8.0));
    }

    #[test]
    fn test_execute_aggregates_tables() {
        let ctx = MiniContext::new();
        let table = Value::Table(Table {
            columns: vec![
                TableColumn {
                    name: "A".into(),
                    values: vec![1.0.into(), 3.0.into()],
                },
                TableColumn {
                    name: "B".into(),
                    values: vec![2.0.into(), Value::Null],
                },
            ],
            rows: 2,
        });
        let mut inputs = HashMap::new();
        inputs.insert("A1:B2".to_string(), table.clone());
        assert_eq!(ctx.execute_sync("sum(A1:B2)", &inputs).unwrap(), Value::Number(6.0));
        assert_eq!(ctx.execute_sync("count(A1:B2)", &inputs).unwrap(), Value::Number(3.0));
        assert_eq!(ctx.execute_sync("A1:B2", &inputs).unwrap(), table);
    }

    #[test]
    fn test_execute_aggregates_single_values() {
        let ctx = MiniContext::new();
        let mut inputs = HashMap::new();
        inputs.insert("A1".to_string(), Value::Number(2.0));
        inputs.insert("A2".to_string(), Value::Null);
        let run = |src: &str| ctx.execute_sync(src, &inputs).unwrap();
        assert_eq!(run("sum(A1)"), Value::Number(2.0));
        assert_eq!(run("avg(A1)"), Value::Number(2.0));
        assert_eq!(run("count(A1)"), Value::Number(1.0));
        assert_eq!(run("min(A1)"), Value::Number(2.0));
        assert_eq!(run("max(3)"), Value::Number(3.0));
        assert_eq!(run("sum(A2)"), Value::Number(0.0));
        assert_eq!(run("count(A2)"), Value::Number(0.0));
        assert_eq!(run("max(A2)"), Value::Null);
    }

    #[test]
    fn test_runtime_error() {
        let ctx = MiniContext::new();
        let err = ctx.execute_sync("missing_fn(1)", &HashMap::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Runtime);
    }

    #[test]
    fn test_custom_functions() {
        let ctx = MiniContext::new()
            .with_functions("fn double(x) { x * 2 }")
            .unwrap();
        let mut inputs = HashMap::new();
        inputs.insert("A1".to_string(), Value::Number(21.0));
        assert_eq!(ctx.execute_sync("double(A1)", &inputs).unwrap(), Value::Number(42.0));
        assert!(MiniContext::new().with_functions("fn broken(").is_err());
    }
}
