//! Undo/redo history.
//!
//! Every accepted command produces one [`Transaction`]: the list of
//! [`Change`]s it made, each holding the before and after state of the slice
//! it touched. Undo replays the before-states in reverse order, redo replays
//! the after-states in order. Neither goes through validation, and neither
//! records a new transaction.

use std::collections::VecDeque;

use cellgraph_core::{Axis, SheetId, Zone};
use rustc_hash::FxHashSet;

use crate::cell::Cell;
use crate::cell_id::CellId;
use crate::filter::Table;
use crate::rules::{ConditionalFormat, DataValidationRule};
use crate::sheet::{Header, MergeId, Sheet};

#[derive(Debug, Clone)]
pub enum Change {
    /// One position of the grid. `None` is "no cell".
    Cell {
        sheet: SheetId,
        col: usize,
        row: usize,
        before: Option<Cell>,
        after: Option<Cell>,
    },
    Header {
        sheet: SheetId,
        axis: Axis,
        index: usize,
        before: Header,
        after: Header,
    },
    Merge {
        sheet: SheetId,
        id: MergeId,
        before: Option<Zone>,
        after: Option<Zone>,
    },
    ConditionalFormats {
        sheet: SheetId,
        before: Vec<ConditionalFormat>,
        after: Vec<ConditionalFormat>,
    },
    Validations {
        sheet: SheetId,
        before: Vec<DataValidationRule>,
        after: Vec<DataValidationRule>,
    },
    Tables {
        sheet: SheetId,
        before: Vec<Table>,
        after: Vec<Table>,
    },
    /// Whole-sheet replacement, for row/column insertion and deletion.
    Sheet { before: Box<Sheet>, after: Box<Sheet> },
    SheetAdded { position: usize, sheet: Box<Sheet> },
    SheetRemoved { position: usize, sheet: Box<Sheet> },
    SheetRenamed { sheet: SheetId, before: String, after: String },
    ActiveSheet { before: SheetId, after: SheetId },
}

/// Direction in which a change is replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replay {
    Undo,
    Redo,
}

/// What a replay touched, so the workbook can refresh the graph and
/// re-evaluate.
#[derive(Debug, Default)]
pub struct Touched {
    pub cells: FxHashSet<CellId>,
    /// Sheets replaced, added or removed as a whole
    pub sheets: FxHashSet<SheetId>,
}

impl Touched {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.sheets.is_empty()
    }
}

fn pick<T>(replay: Replay, before: T, after: T) -> T {
    match replay {
        Replay::Undo => before,
        Replay::Redo => after,
    }
}

fn sheet_mut(sheets: &mut [Sheet], id: SheetId) -> Option<&mut Sheet> {
    sheets.iter_mut().find(|s| s.id() == id)
}

impl Change {
    /// Record what this change touches without replaying it.
    pub fn touch(&self, touched: &mut Touched) {
        match self {
            Change::Cell { sheet, col, row, .. } => {
                touched.cells.insert(CellId::new(*sheet, *col, *row));
            }
            Change::Sheet { after, .. } => {
                touched.sheets.insert(after.id());
            }
            Change::SheetAdded { sheet, .. } | Change::SheetRemoved { sheet, .. } => {
                touched.sheets.insert(sheet.id());
            }
            _ => {}
        }
    }

    /// Write the before-state (undo) or after-state (redo) of this change.
    pub fn replay(&self, replay: Replay, sheets: &mut Vec<Sheet>, active_sheet: &mut SheetId, touched: &mut Touched) {
        self.touch(touched);
        match self {
            Change::Cell { sheet, col, row, before, after } => {
                if let Some(s) = sheet_mut(sheets, *sheet) {
                    match pick(replay, before, after) {
                        Some(cell) => {
                            s.put_cell(*col, *row, cell.clone());
                        }
                        None => {
                            s.take_cell(*col, *row);
                        }
                    }
                }
            }
            Change::Header { sheet, axis, index, before, after } => {
                if let Some(s) = sheet_mut(sheets, *sheet) {
                    s.set_header(*axis, *index, *pick(replay, before, after));
                }
            }
            Change::Merge { sheet, id, before, after } => {
                if let Some(s) = sheet_mut(sheets, *sheet) {
                    match pick(replay, before, after) {
                        Some(zone) => s.restore_merge(*id, *zone),
                        None => {
                            s.remove_merge(*id);
                        }
                    }
                }
            }
            Change::ConditionalFormats { sheet, before, after } => {
                if let Some(s) = sheet_mut(sheets, *sheet) {
                    *s.conditional_formats_mut() = pick(replay, before, after).clone();
                }
            }
            Change::Validations { sheet, before, after } => {
                if let Some(s) = sheet_mut(sheets, *sheet) {
                    *s.validations_mut() = pick(replay, before, after).clone();
                }
            }
            Change::Tables { sheet, before, after } => {
                if let Some(s) = sheet_mut(sheets, *sheet) {
                    *s.tables_mut() = pick(replay, before, after).clone();
                }
            }
            Change::Sheet { before, after } => {
                let state = pick(replay, before, after);
                if let Some(s) = sheet_mut(sheets, state.id()) {
                    *s = (**state).clone();
                }
            }
            Change::SheetAdded { position, sheet } => match replay {
                Replay::Undo => sheets.retain(|s| s.id() != sheet.id()),
                Replay::Redo => sheets.insert((*position).min(sheets.len()), (**sheet).clone()),
            },
            Change::SheetRemoved { position, sheet } => match replay {
                Replay::Undo => sheets.insert((*position).min(sheets.len()), (**sheet).clone()),
                Replay::Redo => sheets.retain(|s| s.id() != sheet.id()),
            },
            Change::SheetRenamed { sheet, before, after } => {
                if let Some(s) = sheet_mut(sheets, *sheet) {
                    s.set_name(pick(replay, before, after).clone());
                }
            }
            Change::ActiveSheet { before, after } => {
                *active_sheet = *pick(replay, before, after);
            }
        }
    }
}

/// Changes made by one accepted command.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    /// Command type, for logs.
    pub label: &'static str,
    pub changes: Vec<Change>,
}

impl Transaction {
    pub fn new(label: &'static str) -> Self {
        Self { label, changes: Vec::new() }
    }

    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Two LIFO stacks of transactions.
#[derive(Debug, Clone, Default)]
pub struct History {
    undo_stack: VecDeque<Transaction>,
    redo_stack: Vec<Transaction>,
    /// `None` keeps every transaction
    max_entries: Option<usize>,
}

impl History {
    pub fn new(max_entries: Option<usize>) -> Self {
        Self { undo_stack: VecDeque::new(), redo_stack: Vec::new(), max_entries }
    }

    /// Record a new transaction. Clears the redo stack.
    pub fn record(&mut self, transaction: Transaction) {
        self.undo_stack.push_back(transaction);
        self.redo_stack.clear();

        if let Some(max) = self.max_entries {
            while self.undo_stack.len() > max {
                self.undo_stack.pop_front();
            }
        }
    }

    pub fn pop_undo(&mut self) -> Option<Transaction> {
        self.undo_stack.pop_back()
    }

    pub fn pop_redo(&mut self) -> Option<Transaction> {
        self.redo_stack.pop()
    }

    /// Park an undone transaction for redo.
    pub fn push_redo(&mut self, transaction: Transaction) {
        self.redo_stack.push(transaction);
    }

    /// Put a redone transaction back without touching the redo stack.
    pub fn push_undo(&mut self, transaction: Transaction) {
        self.undo_stack.push_back(transaction);
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}
