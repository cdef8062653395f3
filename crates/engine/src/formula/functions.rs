// Built-in spreadsheet functions and the registry formulas resolve against

use rustc_hash::FxHashMap;

use super::eval::{compare_values, Arg, CellError, ErrorKind, Value};

pub type FunctionImpl = fn(args: &[Arg]) -> Value;

#[derive(Debug, Clone, Copy)]
pub struct FunctionDef {
    pub name: &'static str,
    pub min_args: usize,
    /// `None` for variadic functions
    pub max_args: Option<usize>,
    pub implementation: FunctionImpl,
}

impl FunctionDef {
    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min_args && self.max_args.map_or(true, |max| count <= max)
    }
}

/// Name -> implementation table. Names are matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: FxHashMap<String, FunctionDef>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for def in BUILTINS {
            registry.register(*def);
        }
        registry
    }

    /// Add or replace a function.
    pub fn register(&mut self, def: FunctionDef) {
        self.functions.insert(def.name.to_uppercase(), def);
    }

    pub fn resolve(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(&name.to_uppercase())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

macro_rules! builtin {
    ($name:literal, $min:expr, $max:expr, $imp:expr) => {
        FunctionDef { name: $name, min_args: $min, max_args: $max, implementation: $imp }
    };
}

const BUILTINS: &[FunctionDef] = &[
    // Aggregates
    builtin!("SUM", 1, None, sum),
    builtin!("AVERAGE", 1, None, average),
    builtin!("MIN", 1, None, min),
    builtin!("MAX", 1, None, max),
    builtin!("COUNT", 1, None, count),
    builtin!("COUNTA", 1, None, counta),
    // Math
    builtin!("ABS", 1, Some(1), abs),
    builtin!("ROUND", 1, Some(2), round),
    // Logic
    builtin!("IF", 2, Some(3), if_fn),
    builtin!("IFERROR", 2, Some(2), iferror),
    builtin!("AND", 1, None, and),
    builtin!("OR", 1, None, or),
    builtin!("NOT", 1, Some(1), not),
    // Information
    builtin!("ISERROR", 1, Some(1), iserror),
    builtin!("ISNA", 1, Some(1), isna),
    builtin!("NA", 0, Some(0), na),
    // Text
    builtin!("CONCAT", 1, None, concat),
    builtin!("LEN", 1, Some(1), len),
    builtin!("UPPER", 1, Some(1), upper),
    builtin!("LOWER", 1, Some(1), lower),
    // Lookup
    builtin!("MATCH", 2, Some(3), match_fn),
    builtin!("VLOOKUP", 3, Some(4), vlookup),
];

// =============================================================================
// Helpers
// =============================================================================

/// Numbers for aggregation. Literal scalars are coerced; inside ranges only
/// numbers count and text/booleans/empties are skipped. First error wins.
fn collect_numbers(args: &[Arg]) -> Result<Vec<f64>, CellError> {
    let mut numbers = Vec::new();
    for arg in args {
        match arg {
            Arg::Value(Value::Empty) => {}
            Arg::Value(v) => numbers.push(v.to_number()?),
            Arg::Range(arr) => {
                for v in arr.values() {
                    match v {
                        Value::Number(n) => numbers.push(*n),
                        Value::Error(e) => return Err(e.clone()),
                        _ => {}
                    }
                }
            }
        }
    }
    Ok(numbers)
}

fn scalar(args: &[Arg], idx: usize) -> Value {
    args.get(idx).map(Arg::to_value).unwrap_or_default()
}

fn number_arg(args: &[Arg], idx: usize) -> Result<f64, CellError> {
    scalar(args, idx).to_number()
}

fn bools(args: &[Arg]) -> Result<Vec<bool>, CellError> {
    let mut out = Vec::new();
    for arg in args {
        for v in arg.values() {
            match v {
                Value::Empty => {}
                Value::Text(_) if matches!(arg, Arg::Range(_)) => {}
                other => out.push(other.to_bool()?),
            }
        }
    }
    Ok(out)
}

fn to_value(result: Result<Value, CellError>) -> Value {
    result.unwrap_or_else(Value::Error)
}

// =============================================================================
// Aggregates
// =============================================================================

pub fn sum(args: &[Arg]) -> Value {
    to_value(collect_numbers(args).map(|ns| Value::Number(ns.iter().sum())))
}

pub fn average(args: &[Arg]) -> Value {
    to_value(collect_numbers(args).and_then(|ns| {
        if ns.is_empty() {
            Err(CellError::error("Division by zero"))
        } else {
            Ok(Value::Number(ns.iter().sum::<f64>() / ns.len() as f64))
        }
    }))
}

pub fn min(args: &[Arg]) -> Value {
    to_value(collect_numbers(args).map(|ns| Value::Number(ns.into_iter().reduce(f64::min).unwrap_or(0.0))))
}

pub fn max(args: &[Arg]) -> Value {
    to_value(collect_numbers(args).map(|ns| Value::Number(ns.into_iter().reduce(f64::max).unwrap_or(0.0))))
}

pub fn count(args: &[Arg]) -> Value {
    let n = args
        .iter()
        .flat_map(|arg| arg.values())
        .filter(|v| matches!(v, Value::Number(_)))
        .count();
    Value::Number(n as f64)
}

pub fn counta(args: &[Arg]) -> Value {
    let n = args.iter().flat_map(|arg| arg.values()).filter(|v| !v.is_empty()).count();
    Value::Number(n as f64)
}

// =============================================================================
// Math
// =============================================================================

pub fn abs(args: &[Arg]) -> Value {
    to_value(number_arg(args, 0).map(|n| Value::Number(n.abs())))
}

pub fn round(args: &[Arg]) -> Value {
    to_value((|| {
        let n = number_arg(args, 0)?;
        let digits = if args.len() > 1 { number_arg(args, 1)?.trunc() as i32 } else { 0 };
        let factor = 10f64.powi(digits);
        Ok(Value::Number((n * factor).round() / factor))
    })())
}

// =============================================================================
// Logic and information
// =============================================================================

pub fn if_fn(args: &[Arg]) -> Value {
    match scalar(args, 0).to_bool() {
        Ok(true) => scalar(args, 1),
        Ok(false) if args.len() > 2 => scalar(args, 2),
        Ok(false) => Value::Boolean(false),
        Err(e) => Value::Error(e),
    }
}

pub fn iferror(args: &[Arg]) -> Value {
    match scalar(args, 0) {
        Value::Error(_) => scalar(args, 1),
        other => other,
    }
}

pub fn and(args: &[Arg]) -> Value {
    to_value(bools(args).map(|bs| Value::Boolean(bs.iter().all(|b| *b))))
}

pub fn or(args: &[Arg]) -> Value {
    to_value(bools(args).map(|bs| Value::Boolean(bs.iter().any(|b| *b))))
}

pub fn not(args: &[Arg]) -> Value {
    to_value(scalar(args, 0).to_bool().map(|b| Value::Boolean(!b)))
}

pub fn iserror(args: &[Arg]) -> Value {
    Value::Boolean(scalar(args, 0).is_error())
}

pub fn isna(args: &[Arg]) -> Value {
    Value::Boolean(matches!(scalar(args, 0), Value::Error(e) if e.kind == ErrorKind::NotAvailable))
}

pub fn na(_args: &[Arg]) -> Value {
    Value::Error(CellError::not_available("NA()"))
}

// =============================================================================
// Text
// =============================================================================

pub fn concat(args: &[Arg]) -> Value {
    let mut out = String::new();
    for v in args.iter().flat_map(|arg| arg.values()) {
        if let Value::Error(e) = v {
            return Value::Error(e.clone());
        }
        out.push_str(&v.to_text());
    }
    Value::Text(out)
}

fn text_arg(args: &[Arg]) -> Result<String, CellError> {
    match scalar(args, 0) {
        Value::Error(e) => Err(e),
        v => Ok(v.to_text()),
    }
}

pub fn len(args: &[Arg]) -> Value {
    to_value(text_arg(args).map(|s| Value::Number(s.chars().count() as f64)))
}

pub fn upper(args: &[Arg]) -> Value {
    to_value(text_arg(args).map(|s| Value::Text(s.to_uppercase())))
}

pub fn lower(args: &[Arg]) -> Value {
    to_value(text_arg(args).map(|s| Value::Text(s.to_lowercase())))
}

// =============================================================================
// Lookup
// =============================================================================

fn lookup_values(arg: Option<&Arg>) -> Vec<Value> {
    match arg {
        Some(arg) => arg.values().cloned().collect(),
        None => Vec::new(),
    }
}

/// Position of `needle` in `haystack`. `approximate` assumes ascending
/// order and returns the last entry not greater than the needle.
fn find_position(needle: &Value, haystack: &[Value], approximate: bool) -> Option<usize> {
    use std::cmp::Ordering;
    if approximate {
        let mut found = None;
        for (i, v) in haystack.iter().enumerate() {
            if v.is_empty() || v.is_error() {
                continue;
            }
            match compare_values(v, needle) {
                Ordering::Greater => break,
                _ => found = Some(i),
            }
        }
        found
    } else {
        haystack
            .iter()
            .position(|v| !v.is_empty() && compare_values(v, needle) == Ordering::Equal)
    }
}

/// MATCH(value, range, [match_type]) - 1-based position. match_type 0 is
/// exact, 1 (default) approximate ascending.
pub fn match_fn(args: &[Arg]) -> Value {
    let needle = scalar(args, 0);
    if let Value::Error(e) = needle {
        return Value::Error(e);
    }
    let approximate = match args.len() {
        3 => match number_arg(args, 2) {
            Ok(n) => n != 0.0,
            Err(e) => return Value::Error(e),
        },
        _ => true,
    };
    let haystack = lookup_values(args.get(1));
    match find_position(&needle, &haystack, approximate) {
        Some(i) => Value::Number((i + 1) as f64),
        None => Value::Error(CellError::not_available("No match")),
    }
}

/// VLOOKUP(value, table, col_index, [approximate=TRUE])
pub fn vlookup(args: &[Arg]) -> Value {
    let needle = scalar(args, 0);
    if let Value::Error(e) = needle {
        return Value::Error(e);
    }
    let Some(Arg::Range(table)) = args.get(1) else {
        return Value::Error(CellError::error("VLOOKUP needs a range"));
    };
    let col_index = match number_arg(args, 2) {
        Ok(n) if n >= 1.0 && (n as usize) <= table.cols() => n as usize - 1,
        Ok(_) => return Value::Error(CellError::invalid_reference()),
        Err(e) => return Value::Error(e),
    };
    let approximate = match args.len() {
        4 => match scalar(args, 3).to_bool() {
            Ok(b) => b,
            Err(e) => return Value::Error(e),
        },
        _ => true,
    };
    let first_col: Vec<Value> = (0..table.rows())
        .map(|row| table.get(row, 0).cloned().unwrap_or_default())
        .collect();
    match find_position(&needle, &first_col, approximate) {
        Some(row) => table.get(row, col_index).cloned().unwrap_or_default(),
        None => Value::Error(CellError::not_available("No match")),
    }
}
