use cellgraph_core::{SheetId, Zone};

use super::{check_targets, clamp_targets, sheet_of, CommandHandler};
use crate::cell::{Cell, CellContent};
use crate::command::{BorderPosition, Command};
use crate::error::Rejection;
use crate::formula::{BadExpression, Value};
use crate::history::Transaction;
use crate::rules::RangedRule;
use crate::sheet::Sheet;
use crate::style::{Border, Style};
use crate::workbook::Workbook;

/// Cell content and formatting.
pub struct CellHandler;

/// Targets grown to cover every merge they touch, so formatting a merge
/// formats all of its positions.
fn expand_over_merges(sheet: &Sheet, zones: &[Zone]) -> Vec<Zone> {
    zones
        .iter()
        .map(|zone| {
            sheet
                .merges_intersecting(zone)
                .into_iter()
                .fold(*zone, |grown, (_, merge)| grown.union(&merge))
        })
        .collect()
}

/// Every position of the zones, each once.
fn positions(zones: &[Zone]) -> Vec<(usize, usize)> {
    let mut out: Vec<(usize, usize)> = zones.iter().flat_map(|z| z.positions()).collect();
    out.sort_by_key(|(col, row)| (*row, *col));
    out.dedup();
    out
}

/// Value a literal input would store, for blocking rule checks. Formulas
/// are not known before evaluation and are never blocked.
fn literal_value(input: &str) -> Option<Value> {
    let content = CellContent::from_input(input, |_| Err(BadExpression::new("not evaluated")));
    match content {
        CellContent::Formula(_) => None,
        other => Some(Cell::new(other).value()),
    }
}

fn check_set_content(sheet: &Sheet, col: usize, row: usize, content: &str) -> Result<(), Rejection> {
    if !sheet.contains(col, row) {
        return Err(Rejection::TargetOutOfSheet);
    }
    let (col, row) = sheet.anchor_of(col, row);
    let Some(value) = literal_value(content) else {
        return Ok(());
    };
    if value.is_empty() {
        return Ok(());
    }
    let blocked = sheet
        .validations()
        .iter()
        .filter(|rule| rule.blocking && rule.applies_to(col, row))
        .any(|rule| !rule.criterion.matches(&value));
    if blocked {
        return Err(Rejection::BlockingValidationRule);
    }
    Ok(())
}

/// Border pieces for one position of an outline around `outline`.
fn outline_part(border: &Border, outline: &Zone, col: usize, row: usize) -> Border {
    let right = outline.right_or(outline.left);
    let bottom = outline.bottom_or(outline.top);
    Border {
        top: if row == outline.top { border.top.clone() } else { None },
        left: if col == outline.left { border.left.clone() } else { None },
        bottom: if row == bottom { border.bottom.clone() } else { None },
        right: if col == right { border.right.clone() } else { None },
    }
}

/// `base` with every side set in `patch` written over it.
fn overlay_border(base: &Border, patch: &Border) -> Border {
    Border {
        top: patch.top.clone().or_else(|| base.top.clone()),
        left: patch.left.clone().or_else(|| base.left.clone()),
        bottom: patch.bottom.clone().or_else(|| base.bottom.clone()),
        right: patch.right.clone().or_else(|| base.right.clone()),
    }
}

impl CellHandler {
    fn set_formatting(
        book: &mut Workbook,
        tx: &mut Transaction,
        sheet_id: SheetId,
        target: &[Zone],
        style: Option<&Style>,
        format: Option<&String>,
    ) {
        let Some(sheet) = book.sheet(sheet_id) else {
            return;
        };
        let zones = expand_over_merges(sheet, &clamp_targets(sheet, target));
        let format_id = format.map(|f| book.styles.intern_format(f.clone()));

        for (col, row) in positions(&zones) {
            let style_id = style.map(|patch| {
                let current = book
                    .sheet(sheet_id)
                    .and_then(|s| s.cell(col, row))
                    .and_then(|c| c.style)
                    .and_then(|id| book.styles.style(id))
                    .cloned()
                    .unwrap_or_default();
                book.styles.intern_style(current.patched(patch))
            });
            book.update_cell(tx, sheet_id, col, row, |cell| {
                if let Some(id) = style_id {
                    cell.style = id;
                }
                if let Some(id) = format_id {
                    cell.format = id;
                }
            });
        }
    }

    fn set_border(
        book: &mut Workbook,
        tx: &mut Transaction,
        sheet_id: SheetId,
        target: &[Zone],
        border: &Border,
        position: BorderPosition,
    ) {
        let Some(sheet) = book.sheet(sheet_id) else {
            return;
        };
        let zones = expand_over_merges(sheet, &clamp_targets(sheet, target));
        let outline = match position {
            BorderPosition::All => None,
            BorderPosition::External => Zone::merge_contiguous(&zones),
        };

        for (col, row) in positions(&zones) {
            let patch = match &outline {
                Some(outline) => outline_part(border, outline, col, row),
                None => border.clone(),
            };
            if patch.is_empty() && outline.is_some() {
                continue;
            }
            let current = book
                .sheet(sheet_id)
                .and_then(|s| s.cell(col, row))
                .and_then(|c| c.border)
                .and_then(|id| book.styles.border(id))
                .cloned()
                .unwrap_or_default();
            let merged = match position {
                BorderPosition::All => patch,
                BorderPosition::External => overlay_border(&current, &patch),
            };
            let id = book.styles.intern_border(merged);
            book.update_cell(tx, sheet_id, col, row, |cell| cell.border = id);
        }
    }

    fn clear_formatting(book: &mut Workbook, tx: &mut Transaction, sheet_id: SheetId, target: &[Zone]) {
        let Some(sheet) = book.sheet(sheet_id) else {
            return;
        };
        let zones = expand_over_merges(sheet, &clamp_targets(sheet, target));
        let formatted: Vec<(usize, usize)> = sheet
            .cells()
            .into_iter()
            .filter(|((col, row), cell)| cell.has_formatting() && zones.iter().any(|z| z.contains(*col, *row)))
            .map(|(pos, _)| pos)
            .collect();
        for (col, row) in formatted {
            book.update_cell(tx, sheet_id, col, row, |cell| cell.clear_formatting());
        }
    }
}

impl CommandHandler for CellHandler {
    fn validate(&self, book: &Workbook, command: &Command) -> Result<(), Rejection> {
        match command {
            Command::SetCellContent { sheet_id, col, row, content } => {
                check_set_content(sheet_of(book, *sheet_id)?, *col, *row, content)
            }
            Command::DeleteContent { sheet_id, target }
            | Command::SetFormatting { sheet_id, target, .. }
            | Command::ClearFormatting { sheet_id, target } => {
                check_targets(sheet_of(book, *sheet_id)?, target).map(|_| ())
            }
            Command::SetBorder { sheet_id, target, position, .. } => {
                let sheet = sheet_of(book, *sheet_id)?;
                let zones = check_targets(sheet, target)?;
                if *position == BorderPosition::External && Zone::merge_contiguous(&zones).is_none() {
                    return Err(Rejection::NonContinuousTargets);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn apply(&self, book: &mut Workbook, tx: &mut Transaction, command: &Command) {
        match command {
            Command::SetCellContent { sheet_id, col, row, content } => {
                let Some((col, row)) = book.sheet(*sheet_id).map(|s| s.anchor_of(*col, *row)) else {
                    return;
                };
                let content = book.compile_content(content);
                book.update_cell(tx, *sheet_id, col, row, |cell| cell.content = content);
            }
            Command::DeleteContent { sheet_id, target } => {
                let Some(sheet) = book.sheet(*sheet_id) else {
                    return;
                };
                let filled: Vec<(usize, usize)> = clamp_targets(sheet, target)
                    .iter()
                    .flat_map(|zone| sheet.content_positions_in(zone))
                    .collect();
                for (col, row) in filled {
                    book.update_cell(tx, *sheet_id, col, row, |cell| cell.content = CellContent::Empty);
                }
            }
            Command::SetFormatting { sheet_id, target, style, format } => {
                Self::set_formatting(book, tx, *sheet_id, target, style.as_ref(), format.as_ref());
            }
            Command::SetBorder { sheet_id, target, border, position } => {
                Self::set_border(book, tx, *sheet_id, target, border, *position);
            }
            Command::ClearFormatting { sheet_id, target } => {
                Self::clear_formatting(book, tx, *sheet_id, target);
            }
            _ => {}
        }
    }
}
