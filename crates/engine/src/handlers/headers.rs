use cellgraph_core::{Axis, GridEdit, SheetId};

use super::{sheet_of, CommandHandler};
use crate::command::{Command, InsertPosition};
use crate::error::Rejection;
use crate::history::Transaction;
use crate::sheet::{Header, Sheet};
use crate::workbook::Workbook;

/// Row/column insertion, deletion, sizing and visibility.
pub struct HeaderHandler;

fn check_elements(sheet: &Sheet, axis: Axis, elements: &[usize]) -> Result<(), Rejection> {
    if elements.is_empty() {
        return Err(Rejection::EmptyTarget);
    }
    let len = sheet.axis_len(axis);
    if elements.iter().any(|&e| e >= len) {
        return Err(Rejection::SelectionOutOfBound);
    }
    Ok(())
}

fn distinct(elements: &[usize]) -> Vec<usize> {
    let mut out = elements.to_vec();
    out.sort_unstable();
    out.dedup();
    out
}

/// Group sorted indices into `(start, quantity)` runs, last run first, so
/// each deletion leaves the indices of the remaining runs valid.
fn runs_descending(elements: &[usize]) -> Vec<(usize, usize)> {
    let mut runs: Vec<(usize, usize)> = Vec::new();
    for &e in &distinct(elements) {
        match runs.last_mut() {
            Some((start, quantity)) if *start + *quantity == e => *quantity += 1,
            _ => runs.push((e, 1)),
        }
    }
    runs.reverse();
    runs
}

impl HeaderHandler {
    fn set_headers<F>(book: &mut Workbook, tx: &mut Transaction, sheet_id: SheetId, axis: Axis, elements: &[usize], edit: F)
    where
        F: Fn(&mut Header),
    {
        for index in distinct(elements) {
            let Some(mut header) = book.sheet(sheet_id).and_then(|s| s.header(axis, index)).copied() else {
                continue;
            };
            edit(&mut header);
            book.set_header(tx, sheet_id, axis, index, header);
        }
    }
}

impl CommandHandler for HeaderHandler {
    fn validate(&self, book: &Workbook, command: &Command) -> Result<(), Rejection> {
        match command {
            Command::AddColumnsRows { sheet_id, dimension, base, quantity, .. } => {
                let sheet = sheet_of(book, *sheet_id)?;
                let grown = sheet.axis_len(*dimension).checked_add(*quantity);
                let limit = book.config().sheet.max_len(*dimension);
                if *quantity == 0 || grown.map_or(true, |len| len > limit) {
                    return Err(Rejection::InvalidQuantity);
                }
                if *base >= sheet.axis_len(*dimension) {
                    return Err(Rejection::SelectionOutOfBound);
                }
                Ok(())
            }
            Command::RemoveColumnsRows { sheet_id, dimension, elements } => {
                let sheet = sheet_of(book, *sheet_id)?;
                check_elements(sheet, *dimension, elements)?;
                if distinct(elements).len() >= sheet.axis_len(*dimension) {
                    return Err(Rejection::NotEnoughElements);
                }
                Ok(())
            }
            Command::ResizeColumnsRows { sheet_id, dimension, elements, .. }
            | Command::UnhideColumnsRows { sheet_id, dimension, elements } => {
                check_elements(sheet_of(book, *sheet_id)?, *dimension, elements)
            }
            Command::HideColumnsRows { sheet_id, dimension, elements } => {
                let sheet = sheet_of(book, *sheet_id)?;
                check_elements(sheet, *dimension, elements)?;
                let hiding = distinct(elements);
                let still_visible = sheet
                    .headers(*dimension)
                    .iter()
                    .enumerate()
                    .any(|(i, h)| !h.hidden && hiding.binary_search(&i).is_err());
                if !still_visible {
                    return Err(Rejection::NotEnoughElements);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn apply(&self, book: &mut Workbook, tx: &mut Transaction, command: &Command) {
        match command {
            Command::AddColumnsRows { sheet_id, dimension, base, quantity, position } => {
                let at = match position {
                    InsertPosition::Before => *base,
                    InsertPosition::After => base + 1,
                };
                book.apply_grid_edit(tx, *sheet_id, GridEdit::insert(*dimension, at, *quantity));
            }
            Command::RemoveColumnsRows { sheet_id, dimension, elements } => {
                for (start, quantity) in runs_descending(elements) {
                    book.apply_grid_edit(tx, *sheet_id, GridEdit::delete(*dimension, start, quantity));
                }
            }
            Command::ResizeColumnsRows { sheet_id, dimension, elements, size } => {
                Self::set_headers(book, tx, *sheet_id, *dimension, elements, |h| h.size = *size);
            }
            Command::HideColumnsRows { sheet_id, dimension, elements } => {
                Self::set_headers(book, tx, *sheet_id, *dimension, elements, |h| h.hidden = true);
            }
            Command::UnhideColumnsRows { sheet_id, dimension, elements } => {
                Self::set_headers(book, tx, *sheet_id, *dimension, elements, |h| h.hidden = false);
            }
            _ => {}
        }
    }
}
