// Compilation: parse, check functions against the registry, bind sheet names

use std::collections::VecDeque;

use cellgraph_core::{RefSlot, SheetId, SheetRef, UnboundSheetRef};
use rustc_hash::FxHashMap;
use thiserror::Error;

use super::functions::FunctionRegistry;
use super::parser::{parse, BoundFormula, Expr, Formula, ParsedFormula};

/// Formula text that cannot become an evaluable formula. Cached on the cell
/// and surfaced as `#BAD_EXPR` until the content changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("bad expression: {message}")]
pub struct BadExpression {
    pub message: String,
}

impl BadExpression {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Parse `text` and check every function call against `registry`.
pub fn compile(text: &str, registry: &FunctionRegistry) -> Result<ParsedFormula, BadExpression> {
    let parsed = parse(text).map_err(BadExpression::new)?;
    check_functions(&parsed.expr, registry)?;
    Ok(parsed)
}

fn check_functions(expr: &Expr, registry: &FunctionRegistry) -> Result<(), BadExpression> {
    match expr {
        Expr::Function { name, args } => {
            let def = registry
                .resolve(name)
                .ok_or_else(|| BadExpression::new(format!("Unknown function {}", name)))?;
            if !def.accepts(args.len()) {
                return Err(BadExpression::new(format!(
                    "{} does not take {} argument(s)",
                    def.name,
                    args.len()
                )));
            }
            args.iter().try_for_each(|arg| check_functions(arg, registry))
        }
        Expr::Unary { operand: inner, .. } | Expr::Percent(inner) | Expr::Group(inner) => {
            check_functions(inner, registry)
        }
        Expr::BinaryOp { left, right, .. } => {
            check_functions(left, registry)?;
            check_functions(right, registry)
        }
        Expr::Number(_) | Expr::Text(_) | Expr::Boolean(_) | Expr::Reference(_) | Expr::Empty => Ok(()),
    }
}

/// Resolve sheet names to ids. Unknown names stay `Missing` so they can bind
/// later when a sheet takes that name.
pub fn bind_formula<F>(parsed: &ParsedFormula, resolve_name: F) -> BoundFormula
where
    F: Fn(&str) -> Option<SheetId>,
{
    Formula {
        expr: parsed.expr.clone(),
        references: parsed
            .references
            .iter()
            .map(|slot| match slot {
                RefSlot::Valid(reference) => RefSlot::Valid(reference.clone().map_sheet(|sheet| match sheet {
                    UnboundSheetRef::Current => SheetRef::Current,
                    UnboundSheetRef::Named(name) => match resolve_name(&name) {
                        Some(id) => SheetRef::Id(id),
                        None => SheetRef::Missing(name),
                    },
                })),
                RefSlot::Invalid => RefSlot::Invalid,
            })
            .collect(),
    }
}

/// Text -> compile result cache. Identical text shares one AST.
///
/// Bounded; once full the oldest entry is evicted.
#[derive(Debug)]
pub struct CompileCache {
    entries: FxHashMap<String, Result<ParsedFormula, BadExpression>>,
    order: VecDeque<String>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl CompileCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: FxHashMap::default(),
            order: VecDeque::new(),
            capacity,
            hits: 0,
            misses: 0,
        }
    }

    pub fn compile(&mut self, text: &str, registry: &FunctionRegistry) -> Result<ParsedFormula, BadExpression> {
        if let Some(entry) = self.entries.get(text) {
            self.hits += 1;
            return entry.clone();
        }
        self.misses += 1;
        let result = compile(text, registry);
        if self.capacity > 0 {
            while self.order.len() >= self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
            self.order.push_back(text.to_string());
            self.entries.insert(text.to_string(), result.clone());
        }
        result
    }

    /// Drop everything, e.g. after the function registry changed.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since creation
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
