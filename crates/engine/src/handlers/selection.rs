use super::{sheet_of, CommandHandler};
use crate::command::Command;
use crate::error::Rejection;
use crate::history::Transaction;
use crate::workbook::{Selection, Workbook};

/// Selection is view state: validated like any command, never recorded.
pub struct SelectionHandler;

impl CommandHandler for SelectionHandler {
    fn validate(&self, book: &Workbook, command: &Command) -> Result<(), Rejection> {
        let Command::SetSelection { sheet_id, zones, anchor } = command else {
            return Ok(());
        };
        let sheet = sheet_of(book, *sheet_id)?;
        if zones.is_empty() {
            return Err(Rejection::EmptyTarget);
        }
        if zones.iter().any(|z| !z.is_inside(sheet.cols(), sheet.rows())) {
            return Err(Rejection::SelectionOutOfBound);
        }
        if !zones.iter().any(|z| z.contains(anchor.col, anchor.row)) {
            return Err(Rejection::InvalidAnchorZone);
        }
        Ok(())
    }

    fn apply(&self, book: &mut Workbook, _tx: &mut Transaction, command: &Command) {
        if let Command::SetSelection { sheet_id, zones, anchor } = command {
            book.selection = Selection { sheet: *sheet_id, zones: zones.clone(), anchor: *anchor };
        }
    }
}
