use crate::formula::{BadExpression, BoundFormula, CellError, Value};
use crate::style::{BorderId, FormatId, StyleId};

/// Kind of content a cell holds, without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Empty,
    Text,
    Number,
    Formula,
}

/// A formula cell: source text, its compiled form and the last evaluated value.
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaCell {
    /// Text as last rendered. Rewritten when a structural edit moves references.
    pub source: String,
    pub compiled: Result<BoundFormula, BadExpression>,
    /// Cached result. Written only by the evaluation engine.
    pub value: Value,
}

impl FormulaCell {
    pub fn new(source: String, compiled: Result<BoundFormula, BadExpression>) -> Self {
        let value = match &compiled {
            Ok(_) => Value::Empty,
            Err(e) => Value::Error(CellError::bad_expression(e.message.clone())),
        };
        Self { source, compiled, value }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum CellContent {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Formula(Box<FormulaCell>),
}

impl CellContent {
    /// Classify raw user input. Anything starting with `=` is handed to
    /// `compile`; numeric text becomes a number.
    pub fn from_input<F>(input: &str, compile: F) -> Self
    where
        F: FnOnce(&str) -> Result<BoundFormula, BadExpression>,
    {
        let trimmed = input.trim();

        if trimmed.is_empty() {
            return CellContent::Empty;
        }

        if trimmed.starts_with('=') {
            let compiled = compile(trimmed);
            return CellContent::Formula(Box::new(FormulaCell::new(trimmed.to_string(), compiled)));
        }

        if let Ok(num) = trimmed.parse::<f64>() {
            if num.is_finite() {
                return CellContent::Number(num);
            }
        }

        CellContent::Text(input.to_string())
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            CellContent::Empty => ContentKind::Empty,
            CellContent::Text(_) => ContentKind::Text,
            CellContent::Number(_) => ContentKind::Number,
            CellContent::Formula(_) => ContentKind::Formula,
        }
    }

    /// Text the user would see in the edit bar.
    pub fn raw_display(&self) -> String {
        match self {
            CellContent::Empty => String::new(),
            CellContent::Text(s) => s.clone(),
            CellContent::Number(n) => format!("{}", n),
            CellContent::Formula(f) => f.source.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellContent::Empty)
    }

    pub fn formula(&self) -> Option<&FormulaCell> {
        match self {
            CellContent::Formula(f) => Some(f),
            _ => None,
        }
    }

    pub fn formula_mut(&mut self) -> Option<&mut FormulaCell> {
        match self {
            CellContent::Formula(f) => Some(f),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cell {
    pub content: CellContent,
    pub style: Option<StyleId>,
    pub border: Option<BorderId>,
    pub format: Option<FormatId>,
}

impl Cell {
    pub fn new(content: CellContent) -> Self {
        Self { content, ..Self::default() }
    }

    /// Evaluated value: literals as-is, formulas their cached result.
    pub fn value(&self) -> Value {
        match &self.content {
            CellContent::Empty => Value::Empty,
            CellContent::Text(s) => Value::Text(s.clone()),
            CellContent::Number(n) => Value::Number(*n),
            CellContent::Formula(f) => f.value.clone(),
        }
    }

    pub fn has_formatting(&self) -> bool {
        self.style.is_some() || self.border.is_some() || self.format.is_some()
    }

    /// No content and no formatting: the store drops such cells.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && !self.has_formatting()
    }

    pub fn clear_formatting(&mut self) {
        self.style = None;
        self.border = None;
        self.format = None;
    }
}
