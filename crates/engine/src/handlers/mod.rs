//! Command handlers.
//!
//! Each handler owns one concern and answers for the commands of that
//! concern, ignoring the rest. [`HANDLERS`] fixes the order: on dispatch
//! every handler validates first (the first rejection wins), then every
//! handler applies.

mod cells;
mod headers;
mod merges;
mod rules;
mod selection;
mod sheets;
mod tables;

use cellgraph_core::{SheetId, Zone};

use crate::command::Command;
use crate::error::Rejection;
use crate::history::Transaction;
use crate::sheet::Sheet;
use crate::workbook::Workbook;

pub trait CommandHandler: Send + Sync {
    /// Pure check of `command` against the current state.
    fn validate(&self, book: &Workbook, command: &Command) -> Result<(), Rejection>;

    /// Apply an already validated command, recording every change in `tx`.
    fn apply(&self, book: &mut Workbook, tx: &mut Transaction, command: &Command);
}

pub(crate) static HANDLERS: &[&dyn CommandHandler] = &[
    &sheets::SheetHandler,
    &cells::CellHandler,
    &headers::HeaderHandler,
    &merges::MergeHandler,
    &rules::RuleHandler,
    &tables::TableHandler,
    &selection::SelectionHandler,
];

pub(crate) fn sheet_of(book: &Workbook, id: SheetId) -> Result<&Sheet, Rejection> {
    book.sheet(id).ok_or(Rejection::InvalidSheetId)
}

/// Check a list of target zones: at least one, each starting inside the
/// sheet. Zones overflowing the sheet are clamped, not rejected.
pub(crate) fn check_targets(sheet: &Sheet, target: &[Zone]) -> Result<Vec<Zone>, Rejection> {
    if target.is_empty() {
        return Err(Rejection::EmptyTarget);
    }
    target
        .iter()
        .map(|zone| zone.clamp_to(sheet.cols(), sheet.rows()).ok_or(Rejection::TargetOutOfSheet))
        .collect()
}

/// Target zones clamped to the sheet; those outside it are dropped.
pub(crate) fn clamp_targets(sheet: &Sheet, target: &[Zone]) -> Vec<Zone> {
    target.iter().filter_map(|zone| zone.clamp_to(sheet.cols(), sheet.rows())).collect()
}
