// Formula parsing, compilation and evaluation

pub mod compile;
pub mod eval;
pub mod functions;
pub mod parser;

pub use compile::{bind_formula, compile, BadExpression, CompileCache};
pub use eval::{evaluate, Arg, Array2D, CellError, CellLookup, ErrorKind, EvalContext, Value};
pub use functions::{FunctionDef, FunctionImpl, FunctionRegistry};
pub use parser::{format_formula, format_sheet_name, parse, BoundFormula, Expr, Formula, ParsedFormula};
