// Shared helpers for integration tests.

#![allow(dead_code)]

use cellgraph_core::xc::{parse_cell, parse_zone};
use cellgraph_engine::{Command, EngineConfig, SheetId, Value, Workbook, Zone};

pub fn zone(xc: &str) -> Zone {
    parse_zone(xc).unwrap()
}

pub fn small_book(cols: usize, rows: usize) -> Workbook {
    let config = EngineConfig::from_toml_str(&format!("[sheet]\ncols = {cols}\nrows = {rows}\n")).unwrap();
    Workbook::with_config(config)
}

pub fn sheet(book: &Workbook) -> SheetId {
    book.active_sheet()
}

pub fn set(book: &mut Workbook, xc: &str, input: &str) {
    let (col, row) = parse_cell(xc).unwrap();
    let sheet_id = sheet(book);
    book.dispatch(Command::SetCellContent { sheet_id, col, row, content: input.to_string() })
        .unwrap();
}

pub fn value(book: &Workbook, xc: &str) -> Value {
    let (col, row) = parse_cell(xc).unwrap();
    book.value(sheet(book), col, row)
}

pub fn raw(book: &Workbook, xc: &str) -> String {
    let (col, row) = parse_cell(xc).unwrap();
    book.raw_content(sheet(book), col, row)
}
