use cellgraph_core::SheetId;

use super::{sheet_of, CommandHandler};
use crate::command::Command;
use crate::error::Rejection;
use crate::history::Transaction;
use crate::sheet::{is_valid_sheet_name, Sheet};
use crate::workbook::Workbook;

/// Sheet lifecycle. Also the first line of defence for every command: the
/// sheet a command targets must exist.
pub struct SheetHandler;

/// Name is well formed and unused by any sheet other than `except`.
fn check_name(book: &Workbook, name: &str, except: Option<SheetId>) -> Result<(), Rejection> {
    if !is_valid_sheet_name(name) {
        return Err(Rejection::InvalidSheetName);
    }
    match book.sheet_by_name(name) {
        Some(existing) if Some(existing.id()) != except => Err(Rejection::DuplicatedSheetName),
        _ => Ok(()),
    }
}

/// "Copy of Sales", then "Copy of Sales (2)", ... until free.
fn copy_name(book: &Workbook, original: &str) -> String {
    let base = format!("Copy of {}", original);
    let mut candidate = base.clone();
    let mut n = 2;
    while book.sheet_by_name(&candidate).is_some() {
        candidate = format!("{} ({})", base, n);
        n += 1;
    }
    candidate
}

impl CommandHandler for SheetHandler {
    fn validate(&self, book: &Workbook, command: &Command) -> Result<(), Rejection> {
        if let Some(id) = command.target_sheet() {
            sheet_of(book, id)?;
        }

        match command {
            Command::CreateSheet { sheet_id, name, cols, rows, .. } => {
                if book.sheet(*sheet_id).is_some() {
                    return Err(Rejection::DuplicatedSheetId);
                }
                let defaults = &book.config().sheet;
                if !defaults.fits(cols.unwrap_or(defaults.cols), rows.unwrap_or(defaults.rows)) {
                    return Err(Rejection::InvalidQuantity);
                }
                check_name(book, name, None)
            }
            Command::DeleteSheet { .. } => {
                if book.sheet_count() <= 1 {
                    return Err(Rejection::NotEnoughSheets);
                }
                Ok(())
            }
            Command::DuplicateSheet { new_sheet_id, name, .. } => {
                if book.sheet(*new_sheet_id).is_some() {
                    return Err(Rejection::DuplicatedSheetId);
                }
                match name {
                    Some(name) => check_name(book, name, None),
                    None => Ok(()),
                }
            }
            Command::RenameSheet { sheet_id, name } => check_name(book, name, Some(*sheet_id)),
            _ => Ok(()),
        }
    }

    fn apply(&self, book: &mut Workbook, tx: &mut Transaction, command: &Command) {
        match command {
            Command::CreateSheet { sheet_id, name, position, cols, rows } => {
                let defaults = &book.config().sheet;
                let sheet = Sheet::new(
                    *sheet_id,
                    name.clone(),
                    cols.unwrap_or(defaults.cols),
                    rows.unwrap_or(defaults.rows),
                    defaults.col_size,
                    defaults.row_size,
                );
                let position = position.unwrap_or(book.sheet_count());
                book.insert_sheet(tx, position, sheet);
                log::info!("created sheet {}", name);
            }
            Command::DeleteSheet { sheet_id } => book.remove_sheet(tx, *sheet_id),
            Command::DuplicateSheet { sheet_id, new_sheet_id, name } => {
                let name = match name {
                    Some(name) => name.clone(),
                    None => {
                        let original = book.sheet(*sheet_id).map(|s| s.name().to_string()).unwrap_or_default();
                        copy_name(book, &original)
                    }
                };
                book.duplicate_sheet(tx, *sheet_id, *new_sheet_id, name);
            }
            Command::RenameSheet { sheet_id, name } => {
                let unchanged = book.sheet(*sheet_id).map_or(true, |s| s.name() == name);
                if !unchanged {
                    book.rename_sheet(tx, *sheet_id, name.clone());
                }
            }
            Command::ActivateSheet { sheet_id } => book.set_active_sheet(tx, *sheet_id),
            _ => {}
        }
    }
}
