//! Test harness for driving a workbook with A1 addresses.
//!
//! `TestBook` wraps a `Workbook` and the id of its first sheet, and turns
//! the common test steps (write a cell, read a value, merge a zone, add a
//! sheet) into one-liners. Every write goes through `dispatch`, so tests
//! exercise the same validate/apply/record/evaluate path as callers do.

use cellgraph_core::xc::{parse_cell, parse_zone};
use cellgraph_core::{SheetId, Zone};

use crate::command::Command;
use crate::formula::Value;
use crate::workbook::Workbook;

pub fn zone(xc: &str) -> Zone {
    parse_zone(xc).unwrap_or_else(|e| panic!("bad zone {xc}: {e}"))
}

pub fn cell(xc: &str) -> (usize, usize) {
    parse_cell(xc).unwrap_or_else(|e| panic!("bad cell {xc}: {e}"))
}

/// Command builders.
pub mod cmd {
    use super::*;
    use crate::style::Style;

    pub fn set_content(sheet: SheetId, col: usize, row: usize, content: &str) -> Command {
        Command::SetCellContent { sheet_id: sheet, col, row, content: content.to_string() }
    }

    pub fn format(sheet: SheetId, xc: &str, style: Style) -> Command {
        Command::SetFormatting { sheet_id: sheet, target: vec![zone(xc)], style: Some(style), format: None }
    }
}

pub struct TestBook {
    pub book: Workbook,
    /// First sheet of the workbook
    pub sheet: SheetId,
}

impl TestBook {
    pub fn new() -> Self {
        let book = Workbook::new();
        let sheet = book.active_sheet();
        Self { book, sheet }
    }

    pub fn set(&mut self, xc: &str, input: &str) {
        self.set_on(self.sheet, xc, input);
    }

    pub fn set_on(&mut self, sheet: SheetId, xc: &str, input: &str) {
        let (col, row) = cell(xc);
        self.book
            .dispatch(cmd::set_content(sheet, col, row, input))
            .unwrap_or_else(|r| panic!("set {xc} = {input:?} rejected: {r:?}"));
    }

    pub fn value(&self, xc: &str) -> Value {
        self.value_on(self.sheet, xc)
    }

    pub fn value_on(&self, sheet: SheetId, xc: &str) -> Value {
        let (col, row) = cell(xc);
        self.book.value(sheet, col, row)
    }

    pub fn raw(&self, xc: &str) -> String {
        let (col, row) = cell(xc);
        self.book.raw_content(self.sheet, col, row)
    }

    pub fn formula(&self, xc: &str) -> Option<String> {
        let (col, row) = cell(xc);
        self.book.formula_text(self.sheet, col, row)
    }

    /// Append a sheet with the next free id.
    pub fn add_sheet(&mut self, name: &str) -> SheetId {
        let next = self.book.sheets().iter().map(|s| s.id().raw()).max().unwrap_or(0) + 1;
        let id = SheetId::from_raw(next);
        self.book
            .dispatch(Command::CreateSheet { sheet_id: id, name: name.to_string(), position: None, cols: None, rows: None })
            .unwrap_or_else(|r| panic!("create sheet {name} rejected: {r:?}"));
        id
    }

    pub fn merge(&mut self, xc: &str) {
        self.book
            .dispatch(Command::AddMerge { sheet_id: self.sheet, target: vec![zone(xc)], force: false })
            .unwrap_or_else(|r| panic!("merge {xc} rejected: {r:?}"));
    }
}

impl Default for TestBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harness_basic_flow() {
        let mut t = TestBook::new();
        t.set("A1", "4");
        t.set("B1", "=A1*A1");
        assert_eq!(t.value("B1"), Value::Number(16.0));
        assert_eq!(t.formula("B1").as_deref(), Some("=A1*A1"));
        assert_eq!(t.formula("A1"), None);
    }

    #[test]
    fn test_add_sheet_ids_are_fresh() {
        let mut t = TestBook::new();
        let a = t.add_sheet("A");
        let b = t.add_sheet("B");
        assert_ne!(a, b);
        assert_ne!(a, t.sheet);
        assert_eq!(t.book.sheet_count(), 3);
    }
}
