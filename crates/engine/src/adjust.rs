//! Reference adjuster.
//!
//! Structural edits move cells; this module moves the references that point
//! at them. Formulas are never re-parsed: the AST is shared and only the
//! reference table is rewritten, then the source text is re-rendered from
//! the result.
//!
//! Formulas to rewrite are found through the dependency graph's target-sheet
//! index (other sheets) and the edited sheet's own formula positions, never
//! by scanning the workbook.

use cellgraph_core::{Axis, GridEdit, RefSlot, Reference, SheetId, SheetRef};
use rustc_hash::FxHashMap;

use crate::cell_id::CellId;
use crate::formula::{format_formula, BoundFormula, Formula};
use crate::history::{Change, Transaction};
use crate::sheet::{normalize_sheet_name, Sheet};
use crate::workbook::Workbook;

// ============================================================================
// Reference table rewrites
// ============================================================================

/// Rewrite the references targeting `target`. `None` when nothing changed.
fn rewrite_slots<F>(formula: &BoundFormula, owner: SheetId, target: SheetId, mut rewrite: F) -> Option<BoundFormula>
where
    F: FnMut(&Reference<SheetRef>) -> RefSlot<SheetRef>,
{
    let mut changed = false;
    let references = formula
        .references
        .iter()
        .map(|slot| match slot {
            RefSlot::Valid(reference) if reference.target_sheet(owner) == Some(target) => {
                let next = rewrite(reference);
                changed |= next != *slot;
                next
            }
            other => other.clone(),
        })
        .collect();
    changed.then(|| Formula { expr: formula.expr.clone(), references })
}

/// Shift the references of a formula living on `owner` that target
/// `target`. References swallowed by a deletion become invalid.
/// `None` when nothing changed.
pub fn adjust_formula(formula: &BoundFormula, owner: SheetId, target: SheetId, edit: &GridEdit) -> Option<BoundFormula> {
    rewrite_slots(formula, owner, target, |reference| match reference.adjusted(edit) {
        Some(adjusted) => RefSlot::Valid(adjusted),
        None => RefSlot::Invalid,
    })
}

/// Invalidate every reference to a deleted sheet.
pub fn invalidate_sheet(formula: &BoundFormula, owner: SheetId, deleted: SheetId) -> Option<BoundFormula> {
    rewrite_slots(formula, owner, deleted, |_| RefSlot::Invalid)
}

/// Bind references qualified with a missing sheet name to `id`.
pub fn rebind_missing(formula: &BoundFormula, name_key: &str, id: SheetId) -> Option<BoundFormula> {
    let mut changed = false;
    let references = formula
        .references
        .iter()
        .map(|slot| match slot {
            RefSlot::Valid(reference) => match &reference.sheet {
                SheetRef::Missing(name) if normalize_sheet_name(name) == name_key => {
                    changed = true;
                    RefSlot::Valid(reference.clone().map_sheet(|_| SheetRef::Id(id)))
                }
                _ => slot.clone(),
            },
            RefSlot::Invalid => RefSlot::Invalid,
        })
        .collect();
    changed.then(|| Formula { expr: formula.expr.clone(), references })
}

/// Does the formula name `sheet` with an explicit qualifier?
pub fn names_sheet(formula: &BoundFormula, sheet: SheetId) -> bool {
    formula
        .references
        .iter()
        .filter_map(RefSlot::as_valid)
        .any(|r| r.sheet == SheetRef::Id(sheet))
}

/// Rewrite the formulas stored on `sheet` in place.
fn rewrite_sheet_formulas<F>(sheet: &mut Sheet, names: &FxHashMap<SheetId, String>, mut rewrite: F)
where
    F: FnMut(&BoundFormula) -> Option<BoundFormula>,
{
    for (col, row) in sheet.formula_positions() {
        let Some(formula) = sheet.cell_mut(col, row).and_then(|c| c.content.formula_mut()) else {
            continue;
        };
        let Ok(bound) = &formula.compiled else {
            continue;
        };
        if let Some(rewritten) = rewrite(bound) {
            formula.source = format_formula(&rewritten, |id| names.get(&id).cloned());
            formula.compiled = Ok(rewritten);
        }
    }
}

// ============================================================================
// Workbook-level edits
// ============================================================================

impl Workbook {
    /// Insert or delete rows/columns on one sheet, moving everything that
    /// points into it: cells, headers, merges, rules, tables, and formula
    /// references on every sheet.
    pub(crate) fn apply_grid_edit(&mut self, tx: &mut Transaction, sheet_id: SheetId, edit: GridEdit) {
        let names = self.name_map();

        let others: Vec<CellId> =
            self.graph.formulas_targeting(sheet_id).into_iter().filter(|c| c.sheet != sheet_id).collect();
        for cell in others {
            self.rewrite_formula(tx, cell, &names, |f| adjust_formula(f, cell.sheet, sheet_id, &edit));
        }

        let Some(mut sheet) = self.sheet(sheet_id).cloned() else {
            return;
        };
        let default_size = match edit.axis() {
            Axis::Col => self.config.sheet.col_size,
            Axis::Row => self.config.sheet.row_size,
        };
        sheet.apply_grid_edit(&edit, default_size);
        rewrite_sheet_formulas(&mut sheet, &names, |f| adjust_formula(f, sheet_id, sheet_id, &edit));

        log::debug!("grid edit on {}: {:?}", sheet.name(), edit);
        self.replace_sheet(tx, sheet);
    }

    /// Remove a sheet. References to it from other sheets become `#REF`.
    pub(crate) fn remove_sheet(&mut self, tx: &mut Transaction, sheet_id: SheetId) {
        let Some(position) = self.sheet_position(sheet_id) else {
            return;
        };
        let names = self.name_map();
        let others: Vec<CellId> =
            self.graph.formulas_targeting(sheet_id).into_iter().filter(|c| c.sheet != sheet_id).collect();
        for cell in others {
            self.rewrite_formula(tx, cell, &names, |f| invalidate_sheet(f, cell.sheet, sheet_id));
        }

        if self.active_sheet == sheet_id {
            let neighbour = if position > 0 { position - 1 } else { position + 1 };
            if let Some(next) = self.sheets.get(neighbour).map(Sheet::id) {
                self.set_active_sheet(tx, next);
            }
        }

        if let Some(sheet) = self.sheet(sheet_id).cloned() {
            log::debug!("deleting sheet {}", sheet.name());
            self.commit(tx, Change::SheetRemoved { position, sheet: Box::new(sheet) });
        }
    }

    /// Add a sheet at `position` and bind formulas that were waiting for
    /// its name.
    pub(crate) fn insert_sheet(&mut self, tx: &mut Transaction, position: usize, mut sheet: Sheet) {
        let id = sheet.id();
        let key = sheet.name_key();
        let mut names = self.name_map();
        names.insert(id, sheet.name().to_string());

        rewrite_sheet_formulas(&mut sheet, &names, |f| rebind_missing(f, &key, id));
        let position = position.min(self.sheets.len());
        self.commit(tx, Change::SheetAdded { position, sheet: Box::new(sheet) });
        self.bind_missing(tx, &key, id, &names);
    }

    /// Deep copy of a sheet placed right after it. Unqualified references
    /// in the copy read the copy; qualified ones keep their target.
    pub(crate) fn duplicate_sheet(&mut self, tx: &mut Transaction, sheet_id: SheetId, new_id: SheetId, name: String) {
        let Some(position) = self.sheet_position(sheet_id) else {
            return;
        };
        let Some(copy) = self.sheet(sheet_id).map(|s| s.duplicate(new_id, name)) else {
            return;
        };
        self.insert_sheet(tx, position + 1, copy);
    }

    /// Rename a sheet and re-render every formula that names it.
    pub(crate) fn rename_sheet(&mut self, tx: &mut Transaction, sheet_id: SheetId, name: String) {
        let Some(before) = self.sheet_name(sheet_id) else {
            return;
        };
        self.commit(tx, Change::SheetRenamed { sheet: sheet_id, before, after: name.clone() });
        let names = self.name_map();

        for cell in self.graph.formulas_targeting(sheet_id) {
            self.rewrite_formula(tx, cell, &names, |f| names_sheet(f, sheet_id).then(|| f.clone()));
        }
        self.bind_missing(tx, &normalize_sheet_name(&name), sheet_id, &names);
    }

    fn bind_missing(&mut self, tx: &mut Transaction, key: &str, id: SheetId, names: &FxHashMap<SheetId, String>) {
        for cell in self.graph.formulas_missing(key) {
            self.rewrite_formula(tx, cell, names, |f| rebind_missing(f, key, id));
        }
    }
}
