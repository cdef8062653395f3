use cellgraph_core::{SheetId, Zone};

use super::{check_targets, clamp_targets, sheet_of, CommandHandler};
use crate::cell::CellContent;
use crate::command::Command;
use crate::error::Rejection;
use crate::history::Transaction;
use crate::sheet::Sheet;
use crate::workbook::Workbook;

/// Merging and unmerging zones.
pub struct MergeHandler;

/// Positions inside `zone` holding content, other than its top-left.
fn hidden_content(sheet: &Sheet, zone: &Zone) -> Vec<(usize, usize)> {
    sheet
        .content_positions_in(zone)
        .into_iter()
        .filter(|pos| *pos != (zone.left, zone.top))
        .collect()
}

fn check_add_merge(sheet: &Sheet, target: &[Zone], force: bool) -> Result<(), Rejection> {
    if target.is_empty() {
        return Err(Rejection::EmptyTarget);
    }
    if target.iter().any(|zone| !zone.is_bounded()) {
        return Err(Rejection::InvalidRange);
    }
    let zones = check_targets(sheet, target)?;

    for (i, zone) in zones.iter().enumerate() {
        if zones[i + 1..].iter().any(|other| zone.intersects(other)) {
            return Err(Rejection::MergeOverlap);
        }
    }
    if !force && zones.iter().any(|zone| !sheet.merges_intersecting(zone).is_empty()) {
        return Err(Rejection::WillRemoveExistingMerge);
    }
    if zones.iter().any(|zone| sheet.tables().iter().any(|t| t.zone.intersects(zone))) {
        return Err(Rejection::FilterMergeOverlap);
    }
    if !force && zones.iter().any(|zone| !hidden_content(sheet, zone).is_empty()) {
        return Err(Rejection::MergeIsDestructive);
    }
    Ok(())
}

impl MergeHandler {
    fn add_merges(book: &mut Workbook, tx: &mut Transaction, sheet_id: SheetId, target: &[Zone]) {
        let Some(sheet) = book.sheet(sheet_id) else {
            return;
        };
        let zones = clamp_targets(sheet, target);

        for zone in zones.into_iter().filter(|z| !z.is_single_cell()) {
            let Some(sheet) = book.sheet(sheet_id) else {
                return;
            };
            let replaced = sheet.merges_intersecting(&zone);
            let cleared = hidden_content(sheet, &zone);
            let id = sheet.next_merge_id();

            for (existing, _) in replaced {
                book.set_merge(tx, sheet_id, existing, None);
            }
            for (col, row) in cleared {
                book.update_cell(tx, sheet_id, col, row, |cell| cell.content = CellContent::Empty);
            }
            book.set_merge(tx, sheet_id, id, Some(zone));
        }
    }

    fn remove_merges(book: &mut Workbook, tx: &mut Transaction, sheet_id: SheetId, target: &[Zone]) {
        let Some(sheet) = book.sheet(sheet_id) else {
            return;
        };
        let mut ids: Vec<_> = clamp_targets(sheet, target)
            .iter()
            .flat_map(|zone| sheet.merges_intersecting(zone))
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        ids.dedup();
        for id in ids {
            book.set_merge(tx, sheet_id, id, None);
        }
    }
}

impl CommandHandler for MergeHandler {
    fn validate(&self, book: &Workbook, command: &Command) -> Result<(), Rejection> {
        match command {
            Command::AddMerge { sheet_id, target, force } => check_add_merge(sheet_of(book, *sheet_id)?, target, *force),
            Command::RemoveMerge { sheet_id, target } => check_targets(sheet_of(book, *sheet_id)?, target).map(|_| ()),
            _ => Ok(()),
        }
    }

    fn apply(&self, book: &mut Workbook, tx: &mut Transaction, command: &Command) {
        match command {
            Command::AddMerge { sheet_id, target, .. } => Self::add_merges(book, tx, *sheet_id, target),
            Command::RemoveMerge { sheet_id, target } => Self::remove_merges(book, tx, *sheet_id, target),
            _ => {}
        }
    }
}
