// Formula parser - converts formula strings into an AST plus a reference table
// Supports: numbers, strings, booleans, cell refs (A1, $A$1), ranges (A1:B5, A:A, 3:3),
// sheet-qualified refs (Sheet2!A1, 'My Sheet'!A1), #REF, functions, and the
// operators + - * / ^ % & = <> < > <= >=

use std::rc::Rc;

use cellgraph_core::{AbsFlags, RefSlot, Reference, SheetId, SheetRef, UnboundSheetRef, Zone};
use cellgraph_core::xc::letters_to_col;

/// Formula AST.
///
/// References are not stored inline: `Expr::Reference(i)` points into the
/// owning [`Formula`]'s reference table. Structural edits rewrite the table
/// and leave the tree alone, so one tree can be shared by every cell that
/// typed the same text.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Boolean(bool),
    Reference(usize),
    Function {
        name: String,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// Postfix `%`
    Percent(Box<Expr>),
    BinaryOp {
        op: Op,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Parenthesized sub-expression, kept so rendering reproduces the input
    Group(Box<Expr>),
    /// Empty/omitted argument (e.g. the trailing slot in `=IF(a,b,)`)
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    // Comparison
    Lt,      // <
    Gt,      // >
    Eq,      // =
    LtEq,    // <=
    GtEq,    // >=
    NotEq,   // <>
    // String
    Concat,  // &
    // Exponentiation
    Pow,     // ^
}

impl Op {
    pub fn symbol(self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Lt => "<",
            Op::Gt => ">",
            Op::Eq => "=",
            Op::LtEq => "<=",
            Op::GtEq => ">=",
            Op::NotEq => "<>",
            Op::Concat => "&",
            Op::Pow => "^",
        }
    }
}

/// A formula: shared AST plus its own reference table.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula<S> {
    pub expr: Rc<Expr>,
    pub references: Vec<RefSlot<S>>,
}

/// Parser output: sheet qualifiers are unresolved names
pub type ParsedFormula = Formula<UnboundSheetRef>;

/// Bound formula: sheet qualifiers resolved to stable ids
pub type BoundFormula = Formula<SheetRef>;

/// Parse a formula string (with its leading `=`).
pub fn parse(formula: &str) -> Result<ParsedFormula, String> {
    let formula = formula.trim();
    let Some(input) = formula.strip_prefix('=') else {
        return Err("Formula must start with =".to_string());
    };

    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err("Empty formula".to_string());
    }
    let mut parser = Parser { tokens: &tokens, references: Vec::new(), depth: 0 };
    let (node, pos) = parser.parse_comparison(0)?;
    if pos != tokens.len() {
        return Err(format!("Unexpected token at position {}", pos));
    }
    Ok(Formula { expr: Rc::new(node.expr), references: parser.references })
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    StringLit(String),
    /// Cell reference with absolute/relative flags
    CellRef {
        col: usize,
        row: usize,
        col_abs: bool,
        row_abs: bool,
    },
    /// Column-only bound of `A:C`
    ColRef { col: usize, abs: bool },
    /// Row-only bound of `3:5`
    RowRef { row: usize, abs: bool },
    /// Sheet name prefix (e.g., "Sheet1" from "Sheet1!A1")
    SheetPrefix(String),
    /// `#REF` left behind by a structural edit
    RefError,
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Colon,
    Comma,
    // Comparison operators
    Lt,      // <
    Gt,      // >
    Eq,      // =
    LtEq,    // <=
    GtEq,    // >=
    NotEq,   // <>
    // String concatenation
    Ampersand, // &
    // Exponentiation and percent
    Caret,   // ^
    Percent, // %
}

/// True when the previous two tokens are `<bound> :`, i.e. the next token is
/// the closing bound of a column or row range.
fn closes_range(tokens: &[Token], row: bool) -> bool {
    match tokens {
        [.., Token::ColRef { .. }, Token::Colon] => !row,
        [.., Token::RowRef { .. }, Token::Colon] => row,
        _ => false,
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => { chars.next(); }
            '+' => { tokens.push(Token::Plus); chars.next(); }
            '-' => { tokens.push(Token::Minus); chars.next(); }
            '*' => { tokens.push(Token::Star); chars.next(); }
            '/' => { tokens.push(Token::Slash); chars.next(); }
            '(' => { tokens.push(Token::LParen); chars.next(); }
            ')' => { tokens.push(Token::RParen); chars.next(); }
            ':' => { tokens.push(Token::Colon); chars.next(); }
            ',' => { tokens.push(Token::Comma); chars.next(); }
            '&' => { tokens.push(Token::Ampersand); chars.next(); }
            '^' => { tokens.push(Token::Caret); chars.next(); }
            '%' => { tokens.push(Token::Percent); chars.next(); }
            '<' => {
                chars.next();
                match chars.peek() {
                    Some('=') => { tokens.push(Token::LtEq); chars.next(); }
                    Some('>') => { tokens.push(Token::NotEq); chars.next(); }
                    _ => tokens.push(Token::Lt),
                }
            }
            '>' => {
                chars.next();
                if let Some(&'=') = chars.peek() {
                    tokens.push(Token::GtEq);
                    chars.next();
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '=' => { tokens.push(Token::Eq); chars.next(); }
            '"' => {
                // String literal, "" inside is an escaped quote
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => {
                            if chars.peek() == Some(&'"') {
                                chars.next();
                                s.push('"');
                            } else {
                                break;
                            }
                        }
                        Some(ch) => s.push(ch),
                        None => return Err("Unterminated string literal".to_string()),
                    }
                }
                tokens.push(Token::StringLit(s));
            }
            '\'' => {
                // Quoted sheet name (e.g., 'My Sheet'!A1 or 'Bob''s Sheet'!A1)
                chars.next();
                let mut sheet_name = String::new();
                loop {
                    match chars.next() {
                        Some('\'') => {
                            if chars.peek() == Some(&'\'') {
                                chars.next();
                                sheet_name.push('\'');
                            } else {
                                break;
                            }
                        }
                        Some(ch) => sheet_name.push(ch),
                        None => return Err("Unterminated sheet name".to_string()),
                    }
                }
                if chars.next() != Some('!') {
                    return Err("Quoted sheet name must be followed by !".to_string());
                }
                tokens.push(Token::SheetPrefix(sheet_name));
            }
            '#' => {
                chars.next();
                let mut word = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphabetic() {
                        word.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if !word.eq_ignore_ascii_case("REF") {
                    return Err(format!("Unknown error literal: #{}", word));
                }
                if chars.peek() == Some(&'!') {
                    chars.next();
                }
                tokens.push(Token::RefError);
            }
            'A'..='Z' | 'a'..='z' | '_' | '$' => {
                // Cell reference (A1), column bound (A of A:C), function name (SUM),
                // or sheet prefix (Sheet1!)
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' || ch == '.' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }

                if chars.peek() == Some(&'!') {
                    chars.next();
                    tokens.push(Token::SheetPrefix(ident));
                    continue;
                }

                // LOG10( is a function call, not cell LOG10
                if chars.peek() == Some(&'(') {
                    tokens.push(Token::Ident(ident.to_uppercase()));
                    continue;
                }

                let next_is_colon = chars.peek() == Some(&':');
                if let Some(token) = try_parse_cell_ref(&ident) {
                    tokens.push(token);
                } else if let Some((row, abs)) = try_parse_row_ref(&ident)
                    .filter(|_| next_is_colon || closes_range(&tokens, true))
                {
                    tokens.push(Token::RowRef { row, abs });
                } else if let Some((col, abs)) = try_parse_col_ref(&ident)
                    .filter(|_| next_is_colon || closes_range(&tokens, false))
                {
                    tokens.push(Token::ColRef { col, abs });
                } else if ident.starts_with('$') {
                    return Err(format!("Invalid cell reference: {}", ident));
                } else {
                    tokens.push(Token::Ident(ident.to_uppercase()));
                }
            }
            '0'..='9' | '.' => {
                let mut num_str = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        num_str.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let next_is_colon = chars.peek() == Some(&':');
                if let Some((row, abs)) = try_parse_row_ref(&num_str)
                    .filter(|_| next_is_colon || closes_range(&tokens, true))
                {
                    tokens.push(Token::RowRef { row, abs });
                    continue;
                }
                let num: f64 = num_str.parse().map_err(|_| format!("Invalid number: {}", num_str))?;
                tokens.push(Token::Number(num));
            }
            _ => return Err(format!("Unexpected character: {}", c)),
        }
    }

    Ok(tokens)
}

fn try_parse_cell_ref(s: &str) -> Option<Token> {
    let s = s.to_uppercase();
    let mut chars = s.chars().peekable();

    let col_abs = if chars.peek() == Some(&'$') {
        chars.next();
        true
    } else {
        false
    };

    let mut col_str = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_uppercase() {
            col_str.push(c);
            chars.next();
        } else {
            break;
        }
    }

    if col_str.is_empty() || col_str.len() > 3 {
        return None;
    }

    let row_abs = if chars.peek() == Some(&'$') {
        chars.next();
        true
    } else {
        false
    };

    let row_str: String = chars.collect();
    if row_str.is_empty() || !row_str.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let row: usize = row_str.parse().ok()?;
    if row == 0 {
        return None;
    }
    let col = letters_to_col(&col_str)?;

    Some(Token::CellRef { col, row: row - 1, col_abs, row_abs })
}

/// `A`, `$AB` as a column bound.
fn try_parse_col_ref(s: &str) -> Option<(usize, bool)> {
    let (abs, letters) = match s.strip_prefix('$') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if letters.len() > 3 || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    letters_to_col(letters).map(|col| (col, abs))
}

/// `3`, `$12` as a row bound.
fn try_parse_row_ref(s: &str) -> Option<(usize, bool)> {
    let (abs, digits) = match s.strip_prefix('$') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let row: usize = digits.parse().ok()?;
    (row > 0).then(|| (row - 1, abs))
}

/// Deepest expression tree (and parser nesting) a formula may have. Deeper
/// input is a bad expression rather than a risk to the evaluator's stack.
pub const MAX_DEPTH: usize = 256;

fn too_deep() -> String {
    format!("Formula is nested deeper than {} levels", MAX_DEPTH)
}

/// A parsed sub-expression and the height of its tree.
struct Node {
    expr: Expr,
    height: usize,
}

impl Node {
    fn leaf(expr: Expr) -> Self {
        Node { expr, height: 1 }
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    references: Vec<RefSlot<UnboundSheetRef>>,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn push_ref(&mut self, slot: RefSlot<UnboundSheetRef>) -> Expr {
        self.references.push(slot);
        Expr::Reference(self.references.len() - 1)
    }

    /// Wrap `expr` over children of height `below`.
    fn node(expr: Expr, below: usize) -> Result<Node, String> {
        let height = below + 1;
        if height > MAX_DEPTH {
            return Err(too_deep());
        }
        Ok(Node { expr, height })
    }

    fn binary(op: Op, left: Node, right: Node) -> Result<Node, String> {
        let below = left.height.max(right.height);
        Self::node(Expr::BinaryOp { op, left: Box::new(left.expr), right: Box::new(right.expr) }, below)
    }

    fn unary(op: UnaryOp, operand: Node) -> Result<Node, String> {
        Self::node(Expr::Unary { op, operand: Box::new(operand.expr) }, operand.height)
    }

    /// Run a recursive step one nesting level down.
    fn descend<T>(&mut self, step: impl FnOnce(&mut Self) -> Result<T, String>) -> Result<T, String> {
        if self.depth >= MAX_DEPTH {
            return Err(too_deep());
        }
        self.depth += 1;
        let result = step(self);
        self.depth -= 1;
        result
    }

    // Lowest precedence: comparison operators
    fn parse_comparison(&mut self, pos: usize) -> Result<(Node, usize), String> {
        let (mut left, mut pos) = self.parse_concat(pos)?;

        while pos < self.tokens.len() {
            let op = match &self.tokens[pos] {
                Token::Lt => Op::Lt,
                Token::Gt => Op::Gt,
                Token::Eq => Op::Eq,
                Token::LtEq => Op::LtEq,
                Token::GtEq => Op::GtEq,
                Token::NotEq => Op::NotEq,
                _ => break,
            };
            let (right, new_pos) = self.parse_concat(pos + 1)?;
            left = Self::binary(op, left, right)?;
            pos = new_pos;
        }

        Ok((left, pos))
    }

    // String concatenation (&)
    fn parse_concat(&mut self, pos: usize) -> Result<(Node, usize), String> {
        let (mut left, mut pos) = self.parse_add_sub(pos)?;

        while pos < self.tokens.len() && self.tokens[pos] == Token::Ampersand {
            let (right, new_pos) = self.parse_add_sub(pos + 1)?;
            left = Self::binary(Op::Concat, left, right)?;
            pos = new_pos;
        }

        Ok((left, pos))
    }

    fn parse_add_sub(&mut self, pos: usize) -> Result<(Node, usize), String> {
        let (mut left, mut pos) = self.parse_mul_div(pos)?;

        while pos < self.tokens.len() {
            let op = match &self.tokens[pos] {
                Token::Plus => Op::Add,
                Token::Minus => Op::Sub,
                _ => break,
            };
            let (right, new_pos) = self.parse_mul_div(pos + 1)?;
            left = Self::binary(op, left, right)?;
            pos = new_pos;
        }

        Ok((left, pos))
    }

    fn parse_mul_div(&mut self, pos: usize) -> Result<(Node, usize), String> {
        let (mut left, mut pos) = self.parse_power(pos)?;

        while pos < self.tokens.len() {
            let op = match &self.tokens[pos] {
                Token::Star => Op::Mul,
                Token::Slash => Op::Div,
                _ => break,
            };
            let (right, new_pos) = self.parse_power(pos + 1)?;
            left = Self::binary(op, left, right)?;
            pos = new_pos;
        }

        Ok((left, pos))
    }

    // Exponentiation (^) - right-associative, higher precedence than * /
    fn parse_power(&mut self, pos: usize) -> Result<(Node, usize), String> {
        let (base, pos) = self.parse_percent(pos)?;

        if pos < self.tokens.len() && self.tokens[pos] == Token::Caret {
            let (exponent, new_pos) = self.descend(|p| p.parse_power(pos + 1))?;
            return Ok((Self::binary(Op::Pow, base, exponent)?, new_pos));
        }

        Ok((base, pos))
    }

    // Percent postfix (%)
    fn parse_percent(&mut self, pos: usize) -> Result<(Node, usize), String> {
        let (mut node, mut pos) = self.parse_primary(pos)?;

        while pos < self.tokens.len() && self.tokens[pos] == Token::Percent {
            node = Self::node(Expr::Percent(Box::new(node.expr)), node.height)?;
            pos += 1;
        }

        Ok((node, pos))
    }

    /// A reference starting at `pos`, with `:` joining two bounds into a range.
    fn parse_reference(&mut self, sheet: UnboundSheetRef, pos: usize) -> Result<(Expr, usize), String> {
        let tokens = self.tokens;
        let joined = |p: usize| -> Option<&Token> {
            match tokens.get(p + 1) {
                Some(Token::Colon) => tokens.get(p + 2),
                _ => None,
            }
        };

        match (tokens.get(pos), joined(pos)) {
            (Some(Token::RefError), _) => Ok((self.push_ref(RefSlot::Invalid), pos + 1)),
            (
                Some(&Token::CellRef { col, row, col_abs, row_abs }),
                Some(&Token::CellRef { col: end_col, row: end_row, col_abs: end_col_abs, row_abs: end_row_abs }),
            ) => {
                // Corners are normalized; flags follow the corner they were written on
                let (left, left_abs, right, right_abs) = if col <= end_col {
                    (col, col_abs, end_col, end_col_abs)
                } else {
                    (end_col, end_col_abs, col, col_abs)
                };
                let (top, top_abs, bottom, bottom_abs) = if row <= end_row {
                    (row, row_abs, end_row, end_row_abs)
                } else {
                    (end_row, end_row_abs, row, row_abs)
                };
                let reference = Reference::range(
                    sheet,
                    Zone::new(left, top, right, bottom),
                    AbsFlags { left: left_abs, top: top_abs, right: right_abs, bottom: bottom_abs },
                );
                Ok((self.push_ref(RefSlot::Valid(reference)), pos + 3))
            }
            (Some(&Token::CellRef { col, row, col_abs, row_abs }), _) => {
                let reference = Reference::cell(sheet, col, row, col_abs, row_abs);
                Ok((self.push_ref(RefSlot::Valid(reference)), pos + 1))
            }
            (Some(&Token::ColRef { col, abs }), Some(&Token::ColRef { col: end, abs: end_abs })) => {
                let (left, left_abs, right, right_abs) =
                    if col <= end { (col, abs, end, end_abs) } else { (end, end_abs, col, abs) };
                let reference = Reference::range(
                    sheet,
                    Zone::columns(left, right),
                    AbsFlags { left: left_abs, top: false, right: right_abs, bottom: false },
                );
                Ok((self.push_ref(RefSlot::Valid(reference)), pos + 3))
            }
            (Some(&Token::RowRef { row, abs }), Some(&Token::RowRef { row: end, abs: end_abs })) => {
                let (top, top_abs, bottom, bottom_abs) =
                    if row <= end { (row, abs, end, end_abs) } else { (end, end_abs, row, abs) };
                let reference = Reference::range(
                    sheet,
                    Zone::rows(top, bottom),
                    AbsFlags { left: false, top: top_abs, right: false, bottom: bottom_abs },
                );
                Ok((self.push_ref(RefSlot::Valid(reference)), pos + 3))
            }
            (Some(Token::ColRef { .. }), _) | (Some(Token::RowRef { .. }), _) => {
                Err("Incomplete column or row range".to_string())
            }
            _ => Err("Sheet reference must be followed by cell reference".to_string()),
        }
    }

    fn parse_primary(&mut self, pos: usize) -> Result<(Node, usize), String> {
        let tokens = self.tokens;
        if pos >= tokens.len() {
            return Err("Unexpected end of expression".to_string());
        }

        match &tokens[pos] {
            Token::Number(n) => Ok((Node::leaf(Expr::Number(*n)), pos + 1)),
            Token::StringLit(s) => Ok((Node::leaf(Expr::Text(s.clone())), pos + 1)),
            Token::SheetPrefix(sheet_name) => {
                let sheet = UnboundSheetRef::Named(sheet_name.clone());
                let (expr, pos) = self.parse_reference(sheet, pos + 1)?;
                Ok((Node::leaf(expr), pos))
            }
            Token::CellRef { .. } | Token::ColRef { .. } | Token::RowRef { .. } | Token::RefError => {
                let (expr, pos) = self.parse_reference(UnboundSheetRef::Current, pos)?;
                Ok((Node::leaf(expr), pos))
            }
            Token::Ident(name) => {
                if name == "TRUE" {
                    return Ok((Node::leaf(Expr::Boolean(true)), pos + 1));
                }
                if name == "FALSE" {
                    return Ok((Node::leaf(Expr::Boolean(false)), pos + 1));
                }
                if tokens.get(pos + 1) == Some(&Token::LParen) {
                    let (args, new_pos) = self.descend(|p| p.parse_function_args(pos + 2))?;
                    let below = args.iter().map(|a| a.height).max().unwrap_or(0);
                    let args = args.into_iter().map(|a| a.expr).collect();
                    return Ok((Self::node(Expr::Function { name: name.clone(), args }, below)?, new_pos));
                }
                Err(format!("Unknown name: {}", name))
            }
            Token::LParen => {
                let (inner, pos) = self.descend(|p| p.parse_comparison(pos + 1))?;
                match tokens.get(pos) {
                    Some(Token::RParen) => Ok((Self::node(Expr::Group(Box::new(inner.expr)), inner.height)?, pos + 1)),
                    Some(_) => Err("Expected closing parenthesis".to_string()),
                    None => Err("Missing closing parenthesis".to_string()),
                }
            }
            Token::Plus => {
                let (operand, pos) = self.descend(|p| p.parse_primary(pos + 1))?;
                Ok((Self::unary(UnaryOp::Plus, operand)?, pos))
            }
            Token::Minus => {
                let (operand, pos) = self.descend(|p| p.parse_primary(pos + 1))?;
                Ok((Self::unary(UnaryOp::Neg, operand)?, pos))
            }
            _ => Err(format!("Unexpected token at position {}", pos)),
        }
    }

    fn parse_function_args(&mut self, pos: usize) -> Result<(Vec<Node>, usize), String> {
        let mut args = Vec::new();
        let mut pos = pos;

        // Handle empty function call SUM()
        if self.tokens.get(pos) == Some(&Token::RParen) {
            return Ok((args, pos + 1));
        }

        loop {
            // Empty argument: next token is , or ) immediately
            match self.tokens.get(pos) {
                Some(Token::RParen) => {
                    args.push(Node::leaf(Expr::Empty));
                    return Ok((args, pos + 1));
                }
                Some(Token::Comma) => {
                    args.push(Node::leaf(Expr::Empty));
                    pos += 1;
                    continue;
                }
                _ => {}
            }

            let (arg, new_pos) = self.parse_comparison(pos)?;
            args.push(arg);
            pos = new_pos;

            match self.tokens.get(pos) {
                Some(Token::RParen) => return Ok((args, pos + 1)),
                Some(Token::Comma) => pos += 1,
                Some(_) => return Err("Expected comma or closing parenthesis".to_string()),
                None => return Err("Missing closing parenthesis in function call".to_string()),
            }
        }
    }
}

// =============================================================================
// Formula Printing - Convert BoundFormula back to string
// =============================================================================

/// Format a bound formula as a formula string (with leading '=').
///
/// The `name_resolver` function takes a SheetId and returns the current sheet
/// name, so formulas display updated names after sheet renames.
pub fn format_formula<F>(formula: &BoundFormula, name_resolver: F) -> String
where
    F: Fn(SheetId) -> Option<String> + Copy,
{
    format!("={}", format_expr(&formula.expr, &formula.references, name_resolver))
}

/// Format an expression without the leading '='.
pub fn format_expr<F>(expr: &Expr, references: &[RefSlot<SheetRef>], name_resolver: F) -> String
where
    F: Fn(SheetId) -> Option<String> + Copy,
{
    match expr {
        Expr::Empty => String::new(),
        Expr::Number(n) => format_number(*n),
        Expr::Text(s) => format!("\"{}\"", s.replace('"', "\"\"")),
        Expr::Boolean(b) => if *b { "TRUE".to_string() } else { "FALSE".to_string() },
        Expr::Reference(idx) => match references.get(*idx) {
            Some(RefSlot::Valid(reference)) => format_reference(reference, name_resolver),
            _ => "#REF".to_string(),
        },
        Expr::Function { name, args } => {
            let args_str: Vec<String> = args.iter()
                .map(|arg| format_expr(arg, references, name_resolver))
                .collect();
            format!("{}({})", name, args_str.join(","))
        }
        Expr::Unary { op, operand } => {
            let sign = match op {
                UnaryOp::Plus => "+",
                UnaryOp::Neg => "-",
            };
            format!("{}{}", sign, format_expr(operand, references, name_resolver))
        }
        Expr::Percent(inner) => format!("{}%", format_expr(inner, references, name_resolver)),
        Expr::Group(inner) => format!("({})", format_expr(inner, references, name_resolver)),
        Expr::BinaryOp { op, left, right } => {
            let left_str = format_expr(left, references, name_resolver);
            let right_str = format_expr(right, references, name_resolver);
            format!("{}{}{}", left_str, op.symbol(), right_str)
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Render one reference with its sheet prefix.
pub fn format_reference<F>(reference: &Reference<SheetRef>, name_resolver: F) -> String
where
    F: Fn(SheetId) -> Option<String>,
{
    let prefix = match &reference.sheet {
        SheetRef::Current => String::new(),
        SheetRef::Id(id) => match name_resolver(*id) {
            Some(name) => format!("{}!", format_sheet_name(&name)),
            None => return "#REF".to_string(),
        },
        SheetRef::Missing(name) => format!("{}!", format_sheet_name(name)),
    };
    format!("{}{}", prefix, reference.render_address())
}

/// Format a sheet name, adding quotes if necessary
pub fn format_sheet_name(name: &str) -> String {
    // Quote anything the tokenizer would not read back as a bare identifier
    let needs_quotes = name.chars().any(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
        || name.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(true);

    if needs_quotes {
        format!("'{}'", name.replace('\'', "''"))
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only_ref(text: &str) -> Reference<UnboundSheetRef> {
        let formula = parse(text).unwrap();
        assert_eq!(*formula.expr, Expr::Reference(0), "{text}");
        assert_eq!(formula.references.len(), 1);
        match &formula.references[0] {
            RefSlot::Valid(r) => r.clone(),
            RefSlot::Invalid => panic!("expected valid reference in {text}"),
        }
    }

    fn bind_current(formula: ParsedFormula) -> BoundFormula {
        Formula {
            expr: formula.expr,
            references: formula
                .references
                .into_iter()
                .map(|slot| match slot {
                    RefSlot::Valid(r) => RefSlot::Valid(r.map_sheet(|s| match s {
                        UnboundSheetRef::Current => SheetRef::Current,
                        UnboundSheetRef::Named(name) => SheetRef::Missing(name),
                    })),
                    RefSlot::Invalid => RefSlot::Invalid,
                })
                .collect(),
        }
    }

    fn roundtrip(text: &str) -> String {
        format_formula(&bind_current(parse(text).unwrap()), |_| None)
    }

    // =========================================================================
    // Reference shapes
    // =========================================================================

    #[test]
    fn test_parse_absolute_both() {
        let r = only_ref("=$A$1");
        assert_eq!(r.zone, Zone::cell(0, 0));
        assert!(r.abs.left && r.abs.top);
        assert!(!r.is_range);
    }

    #[test]
    fn test_parse_absolute_col_only() {
        let r = only_ref("=$A1");
        assert!(r.abs.left, "col should be absolute");
        assert!(!r.abs.top, "row should be relative");
    }

    #[test]
    fn test_parse_absolute_multi_letter_col() {
        // =$O$95 (column O = index 14)
        let r = only_ref("=$O$95");
        assert_eq!(r.zone, Zone::cell(14, 94));
    }

    #[test]
    fn test_parse_mixed_range() {
        let r = only_ref("=$A1:B$5");
        assert_eq!(r.zone, Zone::new(0, 0, 1, 4));
        assert_eq!(r.abs, AbsFlags { left: true, top: false, right: false, bottom: true });
        assert!(r.is_range);
    }

    #[test]
    fn test_parse_reversed_range_normalizes() {
        let r = only_ref("=C5:A1");
        assert_eq!(r.zone, Zone::new(0, 0, 2, 4));
    }

    #[test]
    fn test_parse_full_column_and_row() {
        assert_eq!(only_ref("=A:A").zone, Zone::columns(0, 0));
        assert_eq!(only_ref("=$B:D").zone, Zone::columns(1, 3));
        assert_eq!(only_ref("=3:3").zone, Zone::rows(2, 2));
        assert_eq!(only_ref("=$2:$10").zone, Zone::rows(1, 9));
    }

    #[test]
    fn test_parse_sheet_prefix() {
        let r = only_ref("=Sheet2!B3:D9");
        assert_eq!(r.sheet, UnboundSheetRef::Named("Sheet2".into()));
        assert_eq!(r.zone, Zone::new(1, 2, 3, 8));

        let r = only_ref("='Bob''s Sheet'!A1");
        assert_eq!(r.sheet, UnboundSheetRef::Named("Bob's Sheet".into()));

        let r = only_ref("=Data!A:A");
        assert_eq!(r.zone, Zone::columns(0, 0));
    }

    #[test]
    fn test_parse_ref_error_token() {
        let formula = parse("=SUM(#REF)+A1").unwrap();
        assert_eq!(formula.references.len(), 2);
        assert!(formula.references[0].is_invalid());
        assert!(!formula.references[1].is_invalid());
    }

    #[test]
    fn test_references_in_source_order() {
        let formula = parse("=A1+SUM(B1:B3)*Sheet2!C1").unwrap();
        let zones: Vec<Zone> = formula.references.iter().map(|s| s.as_valid().unwrap().zone).collect();
        assert_eq!(zones, vec![Zone::cell(0, 0), Zone::new(1, 0, 1, 2), Zone::cell(2, 0)]);
    }

    // =========================================================================
    // Operators
    // =========================================================================

    #[test]
    fn test_precedence_mul_over_add() {
        let formula = parse("=1+2*3").unwrap();
        match &*formula.expr {
            Expr::BinaryOp { op: Op::Add, right, .. } => {
                assert!(matches!(**right, Expr::BinaryOp { op: Op::Mul, .. }));
            }
            other => panic!("Expected Add at root, got {:?}", other),
        }
    }

    #[test]
    fn test_comparison_lowest() {
        let formula = parse("=A1+1>=B1&\"x\"").unwrap();
        assert!(matches!(&*formula.expr, Expr::BinaryOp { op: Op::GtEq, .. }));
    }

    #[test]
    fn test_parse_power_right_assoc() {
        let formula = parse("=2^3^2").unwrap();
        match &*formula.expr {
            Expr::BinaryOp { op: Op::Pow, left, right } => {
                assert_eq!(**left, Expr::Number(2.0));
                assert!(matches!(**right, Expr::BinaryOp { op: Op::Pow, .. }));
            }
            other => panic!("Expected Pow, got {:?}", other),
        }
    }

    #[test]
    fn test_string_escape() {
        let formula = parse("=\"say \"\"hi\"\"\"").unwrap();
        assert_eq!(*formula.expr, Expr::Text("say \"hi\"".into()));
    }

    #[test]
    fn test_empty_arg_trailing() {
        let formula = parse("=IF(A1,1,)").unwrap();
        match &*formula.expr {
            Expr::Function { name, args } => {
                assert_eq!(name, "IF");
                assert_eq!(args.len(), 3);
                assert_eq!(args[2], Expr::Empty);
            }
            other => panic!("Expected Function, got {:?}", other),
        }
    }

    // =========================================================================
    // Failures
    // =========================================================================

    #[test]
    fn test_parse_errors() {
        for bad in ["=", "=1+", "=(1", "=SUM(1", "=A1 B1", "=\"open", "=#NAME", "=FOO", "=A:", "1+1", "=Sheet1!"] {
            assert!(parse(bad).is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |n: usize| format!("={}1{}", "(".repeat(n), ")".repeat(n));
        assert!(parse(&nested(100)).is_ok());
        assert!(parse(&nested(20_000)).is_err());

        assert!(parse(&format!("={}1", "-".repeat(50_000))).is_err());
        assert!(parse(&format!("=2{}", "^2".repeat(50_000))).is_err());
        assert!(parse(&format!("=SUM({}1{})", "ABS(".repeat(5_000), ")".repeat(5_000))).is_err());
    }

    #[test]
    fn test_long_operator_chain_is_bounded() {
        let chain = |n: usize| format!("=1{}", "+1".repeat(n));
        assert!(parse(&chain(MAX_DEPTH - 2)).is_ok());
        let err = parse(&chain(50_000)).unwrap_err();
        assert!(err.contains("nested deeper"), "{err}");
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    #[test]
    fn test_roundtrip_text() {
        for text in [
            "=A1+1",
            "=$A$1:B$2",
            "=SUM(A:A)",
            "=SUM($3:$3)",
            "=(A1+B1)*2",
            "=-A1%",
            "=IF(A1>0,\"pos\",\"neg\")",
            "=2^3^2",
            "=SUM(#REF)",
            "='My Sheet'!A1",
            "=A1:A1",
            "=0.5*C3",
        ] {
            assert_eq!(roundtrip(text), text);
        }
    }

    #[test]
    fn test_roundtrip_normalizes_case_and_spaces() {
        assert_eq!(roundtrip("= sum( a1 , b2 )"), "=SUM(A1,B2)");
    }

    #[test]
    fn test_format_renamed_sheet() {
        let parsed = parse("=Old!A1").unwrap();
        let mut bound = bind_current(parsed);
        if let RefSlot::Valid(r) = &mut bound.references[0] {
            r.sheet = SheetRef::Id(SheetId::from_raw(2));
        }
        let text = format_formula(&bound, |id| (id.raw() == 2).then(|| "New Name".to_string()));
        assert_eq!(text, "='New Name'!A1");
    }

    #[test]
    fn test_format_sheet_name_quoting() {
        assert_eq!(format_sheet_name("Sheet1"), "Sheet1");
        assert_eq!(format_sheet_name("My Sheet"), "'My Sheet'");
        assert_eq!(format_sheet_name("2024"), "'2024'");
        assert_eq!(format_sheet_name("Bob's"), "'Bob''s'");
    }
}
