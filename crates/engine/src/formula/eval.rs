// Formula evaluator - walks a bound formula's AST against a cell lookup

use cellgraph_core::xc::cell_xc;
use cellgraph_core::{RefSlot, Reference, SheetId, SheetRef};

use super::functions::FunctionRegistry;
use super::parser::{BoundFormula, Expr, Op, UnaryOp};

/// Read access to settled cell values during evaluation.
///
/// The evaluation engine guarantees that every value returned here is final
/// for the current pass: either untouched by the edit, or already
/// re-evaluated earlier in topological order.
pub trait CellLookup {
    /// Value at a position. Empty cells (and merge proxies) are `Value::Empty`.
    fn get_value(&self, sheet: SheetId, col: usize, row: usize) -> Value;

    /// `(cols, rows)` of a sheet, `None` if the sheet does not exist.
    fn sheet_dimensions(&self, sheet: SheetId) -> Option<(usize, usize)>;
}

// =============================================================================
// Errors as values
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Formula text could not be parsed or compiled
    BadExpression,
    /// Cell takes part in a reference cycle
    Cycle,
    /// Runtime failure, or an error coming from a referenced cell
    Error,
    /// Reference destroyed by a structural edit or pointing outside its sheet
    InvalidReference,
    /// "Not found" from lookup functions
    NotAvailable,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::BadExpression => "#BAD_EXPR",
            ErrorKind::Cycle => "#CYCLE",
            ErrorKind::Error => "#ERROR",
            ErrorKind::InvalidReference => "#REF",
            ErrorKind::NotAvailable => "#N/A",
        }
    }
}

/// Per-cell evaluation error. Stored as the cell's value, never raised.
#[derive(Debug, Clone, PartialEq)]
pub struct CellError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CellError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn bad_expression(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadExpression, message)
    }

    pub fn cycle() -> Self {
        Self::new(ErrorKind::Cycle, "Circular reference")
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Error, message)
    }

    pub fn invalid_reference() -> Self {
        Self::new(ErrorKind::InvalidReference, "Invalid reference")
    }

    pub fn not_available(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotAvailable, message)
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

impl std::fmt::Display for CellError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

// =============================================================================
// Values
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(CellError),
}

impl Value {
    pub fn to_number(&self) -> Result<f64, CellError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) if s.trim().is_empty() => Ok(0.0),
            Value::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| CellError::error(format!("Cannot convert '{}' to number", s))),
            Value::Empty => Ok(0.0),
            Value::Error(e) => Err(e.clone()),
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            Value::Text(s) => s.clone(),
            Value::Boolean(b) => if *b { "TRUE".to_string() } else { "FALSE".to_string() },
            Value::Empty => String::new(),
            Value::Error(e) => e.code().to_string(),
        }
    }

    pub fn to_bool(&self) -> Result<bool, CellError> {
        match self {
            Value::Boolean(b) => Ok(*b),
            Value::Number(n) => Ok(*n != 0.0),
            Value::Text(s) => {
                let upper = s.to_uppercase();
                if upper == "TRUE" { Ok(true) }
                else if upper == "FALSE" { Ok(false) }
                else { Err(CellError::error(format!("Cannot convert '{}' to boolean", s))) }
            }
            Value::Empty => Ok(false),
            Value::Error(e) => Err(e.clone()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    pub fn error(&self) -> Option<&CellError> {
        match self {
            Value::Error(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CellError> for Value {
    fn from(e: CellError) -> Self {
        Value::Error(e)
    }
}

// =============================================================================
// Array2D: 2D grid of Values (dense storage, row-major)
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Array2D {
    data: Vec<Value>,
    rows: usize,
    cols: usize,
}

impl Array2D {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            data: vec![Value::Empty; rows * cols],
            rows,
            cols,
        }
    }

    pub fn from_vec(data: Vec<Vec<Value>>) -> Self {
        if data.is_empty() {
            return Self::new(0, 0);
        }
        let rows = data.len();
        let cols = data[0].len();
        let mut flat = Vec::with_capacity(rows * cols);
        for row in data {
            flat.extend(row);
        }
        Self { data: flat, rows, cols }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&Value> {
        if row < self.rows && col < self.cols {
            self.data.get(row * self.cols + col)
        } else {
            None
        }
    }

    pub fn set(&mut self, row: usize, col: usize, value: Value) {
        if row < self.rows && col < self.cols {
            self.data[row * self.cols + col] = value;
        }
    }

    /// Values in row-major order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.data.iter()
    }

    /// Check if this is a 1x1 array (effectively scalar)
    pub fn is_scalar(&self) -> bool {
        self.rows == 1 && self.cols == 1
    }

    /// Convert 1x1 array to scalar Value
    pub fn to_scalar(&self) -> Option<Value> {
        if self.is_scalar() {
            self.data.first().cloned()
        } else {
            None
        }
    }
}

/// A function argument: a scalar, or a fully settled rectangular range.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(Value),
    Range(Array2D),
}

impl Arg {
    /// Every value in the argument; a scalar yields itself.
    pub fn values(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            Arg::Value(v) => Box::new(std::iter::once(v)),
            Arg::Range(arr) => Box::new(arr.values()),
        }
    }

    /// Scalar view: a 1x1 range collapses to its value.
    pub fn to_value(&self) -> Value {
        match self {
            Arg::Value(v) => v.clone(),
            Arg::Range(arr) => arr
                .to_scalar()
                .unwrap_or_else(|| Value::Error(CellError::error("Range used where a single value is expected"))),
        }
    }
}

// =============================================================================
// Evaluation
// =============================================================================

pub struct EvalContext<'a> {
    pub lookup: &'a dyn CellLookup,
    pub registry: &'a FunctionRegistry,
    /// Sheet that owns the formula (target of unqualified references)
    pub sheet: SheetId,
}

/// Evaluate a formula to the value stored on its cell.
pub fn evaluate(formula: &BoundFormula, ctx: &EvalContext<'_>) -> Value {
    match eval_expr(&formula.expr, &formula.references, ctx).to_value() {
        // A formula pointing at an empty cell shows 0
        Value::Empty => Value::Number(0.0),
        other => other,
    }
}

fn eval_expr(expr: &Expr, refs: &[RefSlot<SheetRef>], ctx: &EvalContext<'_>) -> Arg {
    match expr {
        Expr::Empty => Arg::Value(Value::Empty),
        Expr::Number(n) => Arg::Value(Value::Number(*n)),
        Expr::Text(s) => Arg::Value(Value::Text(s.clone())),
        Expr::Boolean(b) => Arg::Value(Value::Boolean(*b)),
        Expr::Group(inner) => eval_expr(inner, refs, ctx),
        Expr::Reference(idx) => match refs.get(*idx) {
            Some(RefSlot::Valid(reference)) => eval_reference(reference, ctx),
            _ => Arg::Value(Value::Error(CellError::invalid_reference())),
        },
        Expr::Unary { op, operand } => {
            let value = eval_expr(operand, refs, ctx).to_value();
            Arg::Value(match (op, value.to_number()) {
                (_, Err(e)) => Value::Error(e),
                (UnaryOp::Plus, Ok(n)) => Value::Number(n),
                (UnaryOp::Neg, Ok(n)) => Value::Number(-n),
            })
        }
        Expr::Percent(inner) => {
            let value = eval_expr(inner, refs, ctx).to_value();
            Arg::Value(match value.to_number() {
                Ok(n) => Value::Number(n / 100.0),
                Err(e) => Value::Error(e),
            })
        }
        Expr::BinaryOp { op, left, right } => {
            let left = eval_expr(left, refs, ctx).to_value();
            let right = eval_expr(right, refs, ctx).to_value();
            Arg::Value(eval_binary(*op, &left, &right))
        }
        Expr::Function { name, args } => {
            let Some(def) = ctx.registry.resolve(name) else {
                return Arg::Value(Value::Error(CellError::bad_expression(format!("Unknown function {}", name))));
            };
            let evaluated: Vec<Arg> = args.iter().map(|arg| eval_expr(arg, refs, ctx)).collect();
            Arg::Value((def.implementation)(&evaluated))
        }
    }
}

/// Errors read from another cell surface as `#ERROR`, except `#N/A`,
/// which lookups are expected to pass along unchanged.
fn upstream(value: Value, sheet: SheetId, col: usize, row: usize) -> Value {
    match value {
        Value::Error(e) if e.kind != ErrorKind::NotAvailable => Value::Error(CellError::error(format!(
            "{} in Sheet{}!{}",
            e.code(),
            sheet.raw(),
            cell_xc(col, row)
        ))),
        other => other,
    }
}

fn eval_reference(reference: &Reference<SheetRef>, ctx: &EvalContext<'_>) -> Arg {
    let Some(sheet) = reference.target_sheet(ctx.sheet) else {
        return Arg::Value(Value::Error(CellError::invalid_reference()));
    };
    let Some((cols, rows)) = ctx.lookup.sheet_dimensions(sheet) else {
        return Arg::Value(Value::Error(CellError::invalid_reference()));
    };

    if reference.is_single_cell() {
        let (col, row) = (reference.zone.left, reference.zone.top);
        if col >= cols || row >= rows {
            return Arg::Value(Value::Error(CellError::invalid_reference()));
        }
        return Arg::Value(upstream(ctx.lookup.get_value(sheet, col, row), sheet, col, row));
    }

    let Some(zone) = reference.zone.clamp_to(cols, rows) else {
        return Arg::Value(Value::Error(CellError::invalid_reference()));
    };
    let (Some(height), Some(width)) = (zone.height(), zone.width()) else {
        return Arg::Value(Value::Error(CellError::invalid_reference()));
    };
    let mut array = Array2D::new(height, width);
    for (col, row) in zone.positions() {
        let value = upstream(ctx.lookup.get_value(sheet, col, row), sheet, col, row);
        array.set(row - zone.top, col - zone.left, value);
    }
    Arg::Range(array)
}

pub(crate) fn eval_binary(op: Op, left: &Value, right: &Value) -> Value {
    match op {
        Op::Concat => {
            if let Some(e) = left.error().or(right.error()) {
                return Value::Error(e.clone());
            }
            Value::Text(format!("{}{}", left.to_text(), right.to_text()))
        }
        Op::Lt | Op::Gt | Op::Eq | Op::LtEq | Op::GtEq | Op::NotEq => {
            if let Some(e) = left.error().or(right.error()) {
                return Value::Error(e.clone());
            }
            let ord = compare_values(left, right);
            Value::Boolean(match op {
                Op::Lt => ord.is_lt(),
                Op::Gt => ord.is_gt(),
                Op::Eq => ord.is_eq(),
                Op::LtEq => ord.is_le(),
                Op::GtEq => ord.is_ge(),
                _ => ord.is_ne(),
            })
        }
        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Pow => {
            let (a, b) = match (left.to_number(), right.to_number()) {
                (Ok(a), Ok(b)) => (a, b),
                (Err(e), _) | (_, Err(e)) => return Value::Error(e),
            };
            let result = match op {
                Op::Add => a + b,
                Op::Sub => a - b,
                Op::Mul => a * b,
                Op::Div => {
                    if b == 0.0 {
                        return Value::Error(CellError::error("Division by zero"));
                    }
                    a / b
                }
                _ => a.powf(b),
            };
            if result.is_finite() {
                Value::Number(result)
            } else {
                Value::Error(CellError::error("Numeric overflow"))
            }
        }
    }
}

/// Spreadsheet ordering: numbers < text < booleans; text compares
/// case-insensitively; an empty cell takes the zero of the other side's type.
pub(crate) fn compare_values(left: &Value, right: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    fn rank(v: &Value) -> u8 {
        match v {
            Value::Number(_) | Value::Empty => 0,
            Value::Text(_) => 1,
            Value::Boolean(_) => 2,
            Value::Error(_) => 3,
        }
    }

    match (left, right) {
        (Value::Empty, Value::Empty) => Ordering::Equal,
        (Value::Empty, Value::Text(s)) => "".cmp(s.to_lowercase().as_str()),
        (Value::Text(s), Value::Empty) => s.to_lowercase().as_str().cmp(""),
        (Value::Empty, Value::Boolean(b)) => false.cmp(b),
        (Value::Boolean(b), Value::Empty) => b.cmp(&false),
        (Value::Text(a), Value::Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
        (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
        (Value::Number(_) | Value::Empty, Value::Number(_) | Value::Empty) => {
            let a = left.to_number().unwrap_or(0.0);
            let b = right.to_number().unwrap_or(0.0);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        _ => rank(left).cmp(&rank(right)),
    }
}
