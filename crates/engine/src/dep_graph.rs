//! Dependency graph for formula cells.
//!
//! Tracks precedents (what a formula reads) and dependents (which formulas
//! read a given position) for incremental evaluation and reference
//! adjustment.
//!
//! # Edge Direction
//!
//! ```text
//! A → B  means  "B depends on A"  (A is a precedent of B)
//! ```
//!
//! Single-cell references become cell edges. Range references are never
//! expanded into cells: they are kept in a per-sheet range index and matched
//! by containment, so `A:A` costs one entry whatever the sheet size.
//!
//! Two more indexes serve the adjuster:
//! - `sheet_refs[S]`: formula cells whose references target sheet S, so an
//!   edit on S finds every formula to rewrite without scanning the workbook
//! - `missing[name]`: formula cells qualified with a sheet name that does not
//!   exist yet, rebound when a sheet takes that name

use rustc_hash::{FxHashMap, FxHashSet};

use cellgraph_core::{SheetId, SheetRef, Zone};

use crate::cell_id::CellId;
use crate::formula::BoundFormula;
use crate::sheet::normalize_sheet_name;

/// What one formula cell reads, resolved against the current grid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormulaDeps {
    pub cells: FxHashSet<CellId>,
    pub ranges: Vec<(SheetId, Zone)>,
    /// Sheets targeted by any reference (including the owning sheet for
    /// unqualified references)
    pub sheets: FxHashSet<SheetId>,
    /// Normalized names of missing sheets
    pub missing: FxHashSet<String>,
}

impl FormulaDeps {
    /// Collect the dependencies of `formula` living on `owner`.
    pub fn from_formula(owner: SheetId, formula: &BoundFormula) -> Self {
        let mut deps = FormulaDeps::default();
        for reference in formula.references.iter().filter_map(|slot| slot.as_valid()) {
            let sheet = match &reference.sheet {
                SheetRef::Current => owner,
                SheetRef::Id(id) => *id,
                SheetRef::Missing(name) => {
                    deps.missing.insert(normalize_sheet_name(name));
                    continue;
                }
            };
            deps.sheets.insert(sheet);
            if reference.is_single_cell() {
                deps.cells.insert(CellId::new(sheet, reference.zone.left, reference.zone.top));
            } else if !deps.ranges.contains(&(sheet, reference.zone)) {
                deps.ranges.push((sheet, reference.zone));
            }
        }
        deps
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.ranges.is_empty() && self.sheets.is_empty() && self.missing.is_empty()
    }

    /// Does this formula read `cell`, directly or through a range?
    pub fn reads(&self, cell: CellId) -> bool {
        self.cells.contains(&cell)
            || self
                .ranges
                .iter()
                .any(|(sheet, zone)| *sheet == cell.sheet && zone.contains(cell.col, cell.row))
    }
}

/// Persistent dependency graph for formula cells.
///
/// # Invariants
///
/// 1. **Bidirectional consistency:** every entry of `deps[B]` is mirrored in
///    `succs`, `ranges`, `sheet_refs` or `missing`, and nothing else is.
/// 2. **No dangling entries:** Empty sets are removed, not stored.
/// 3. **Atomic updates:** `set_formula` / `remove_formula` are the only
///    mutators, and both go through the full unlink/link cycle.
#[derive(Default, Debug, Clone)]
pub struct DepGraph {
    /// Formula cell -> what it reads
    deps: FxHashMap<CellId, FormulaDeps>,

    /// Referenced cell -> formula cells reading it
    succs: FxHashMap<CellId, FxHashSet<CellId>>,

    /// Target sheet -> (formula cell, zone) for range references
    ranges: FxHashMap<SheetId, FxHashMap<CellId, Vec<Zone>>>,

    /// Target sheet -> formula cells referencing it
    sheet_refs: FxHashMap<SheetId, FxHashSet<CellId>>,

    /// Normalized missing sheet name -> formula cells
    missing: FxHashMap<String, FxHashSet<CellId>>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_formula_cell(&self, cell: CellId) -> bool {
        self.deps.contains_key(&cell)
    }

    pub fn formula_cell_count(&self) -> usize {
        self.deps.len()
    }

    pub fn deps(&self, cell: CellId) -> Option<&FormulaDeps> {
        self.deps.get(&cell)
    }

    /// Register (or re-register) a formula cell.
    pub fn set_formula(&mut self, cell: CellId, deps: FormulaDeps) {
        self.remove_formula(cell);

        for pred in &deps.cells {
            self.succs.entry(*pred).or_default().insert(cell);
        }
        for (sheet, zone) in &deps.ranges {
            self.ranges.entry(*sheet).or_default().entry(cell).or_default().push(*zone);
        }
        for sheet in &deps.sheets {
            self.sheet_refs.entry(*sheet).or_default().insert(cell);
        }
        for name in &deps.missing {
            self.missing.entry(name.clone()).or_default().insert(cell);
        }
        self.deps.insert(cell, deps);
    }

    /// Forget a formula cell (content replaced, cell deleted).
    pub fn remove_formula(&mut self, cell: CellId) -> Option<FormulaDeps> {
        let deps = self.deps.remove(&cell)?;

        for pred in &deps.cells {
            if let Some(set) = self.succs.get_mut(pred) {
                set.remove(&cell);
                if set.is_empty() {
                    self.succs.remove(pred);
                }
            }
        }
        for (sheet, _) in &deps.ranges {
            if let Some(by_cell) = self.ranges.get_mut(sheet) {
                by_cell.remove(&cell);
                if by_cell.is_empty() {
                    self.ranges.remove(sheet);
                }
            }
        }
        for sheet in &deps.sheets {
            if let Some(set) = self.sheet_refs.get_mut(sheet) {
                set.remove(&cell);
                if set.is_empty() {
                    self.sheet_refs.remove(sheet);
                }
            }
        }
        for name in &deps.missing {
            if let Some(set) = self.missing.get_mut(name) {
                set.remove(&cell);
                if set.is_empty() {
                    self.missing.remove(name);
                }
            }
        }
        Some(deps)
    }

    /// Forget every formula living on `sheet`.
    pub fn remove_sheet_formulas(&mut self, sheet: SheetId) -> Vec<CellId> {
        let mut cells: Vec<CellId> = self.deps.keys().filter(|c| c.sheet == sheet).copied().collect();
        cells.sort();
        for cell in &cells {
            self.remove_formula(*cell);
        }
        cells
    }

    /// Formula cells reading `cell`, directly or through a range. Sorted.
    pub fn dependents(&self, cell: CellId) -> Vec<CellId> {
        let mut out: FxHashSet<CellId> = self.succs.get(&cell).cloned().unwrap_or_default();
        if let Some(by_cell) = self.ranges.get(&cell.sheet) {
            for (formula, zones) in by_cell {
                if zones.iter().any(|z| z.contains(cell.col, cell.row)) {
                    out.insert(*formula);
                }
            }
        }
        let mut out: Vec<CellId> = out.into_iter().collect();
        out.sort();
        out
    }

    /// Formula cells with a reference targeting `sheet`. Sorted.
    pub fn formulas_targeting(&self, sheet: SheetId) -> Vec<CellId> {
        let mut out: Vec<CellId> = self
            .sheet_refs
            .get(&sheet)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Formula cells qualified with the (missing) sheet name. Sorted.
    pub fn formulas_missing(&self, name: &str) -> Vec<CellId> {
        let mut out: Vec<CellId> = self
            .missing
            .get(&normalize_sheet_name(name))
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Every formula cell, sorted.
    pub fn formula_cells(&self) -> Vec<CellId> {
        let mut out: Vec<CellId> = self.deps.keys().copied().collect();
        out.sort();
        out
    }

    /// Check all invariants. Panics if any are violated.
    ///
    /// Only available in test builds.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        for (formula, deps) in &self.deps {
            for pred in &deps.cells {
                assert!(
                    self.succs.get(pred).map_or(false, |s| s.contains(formula)),
                    "Missing succ edge: {} should list {}",
                    pred,
                    formula
                );
            }
            for (sheet, zone) in &deps.ranges {
                assert!(
                    self.ranges
                        .get(sheet)
                        .and_then(|m| m.get(formula))
                        .map_or(false, |zones| zones.contains(zone)),
                    "Missing range entry for {}",
                    formula
                );
            }
            for sheet in &deps.sheets {
                assert!(self.sheet_refs.get(sheet).map_or(false, |s| s.contains(formula)));
            }
        }
        for (cell, dependents) in &self.succs {
            assert!(!dependents.is_empty(), "Empty succs set stored for {}", cell);
            for dep in dependents {
                assert!(
                    self.deps.get(dep).map_or(false, |d| d.cells.contains(cell)),
                    "Stale succ edge {} -> {}",
                    cell,
                    dep
                );
            }
        }
        for (sheet, by_cell) in &self.ranges {
            assert!(!by_cell.is_empty());
            for formula in by_cell.keys() {
                assert!(self.deps.get(formula).map_or(false, |d| d.ranges.iter().any(|(s, _)| s == sheet)));
            }
        }
        for set in self.sheet_refs.values().chain(self.missing.values()) {
            assert!(!set.is_empty());
            for formula in set {
                assert!(self.deps.contains_key(formula));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{bind_formula, compile, FunctionRegistry};

    fn cell(sheet: u64, col: usize, row: usize) -> CellId {
        CellId::new(SheetId::from_raw(sheet), col, row)
    }

    fn deps(owner: u64, text: &str) -> FormulaDeps {
        let registry = FunctionRegistry::with_builtins();
        let parsed = compile(text, &registry).unwrap();
        let bound = bind_formula(&parsed, |name| match name {
            "Two" => Some(SheetId::from_raw(2)),
            _ => None,
        });
        FormulaDeps::from_formula(SheetId::from_raw(owner), &bound)
    }

    #[test]
    fn test_empty_graph() {
        let graph = DepGraph::new();
        assert_eq!(graph.formula_cell_count(), 0);
        assert!(graph.dependents(cell(1, 0, 0)).is_empty());
        graph.assert_consistent();
    }

    #[test]
    fn test_single_edge() {
        // B1 = A1
        let mut graph = DepGraph::new();
        let b1 = cell(1, 1, 0);
        graph.set_formula(b1, deps(1, "=A1"));
        graph.assert_consistent();

        assert!(graph.is_formula_cell(b1));
        assert_eq!(graph.dependents(cell(1, 0, 0)), vec![b1]);
        assert!(graph.dependents(cell(1, 1, 1)).is_empty());
    }

    #[test]
    fn test_rewiring() {
        let mut graph = DepGraph::new();
        let c1 = cell(1, 2, 0);
        graph.set_formula(c1, deps(1, "=A1"));
        graph.set_formula(c1, deps(1, "=B1"));
        graph.assert_consistent();

        assert!(graph.dependents(cell(1, 0, 0)).is_empty());
        assert_eq!(graph.dependents(cell(1, 1, 0)), vec![c1]);
    }

    #[test]
    fn test_range_dependents_by_containment() {
        let mut graph = DepGraph::new();
        let d1 = cell(1, 3, 0);
        let e1 = cell(1, 4, 0);
        graph.set_formula(d1, deps(1, "=SUM(A1:B10)"));
        graph.set_formula(e1, deps(1, "=SUM(A:A)"));
        graph.assert_consistent();

        assert_eq!(graph.dependents(cell(1, 0, 5)), vec![d1, e1]);
        assert_eq!(graph.dependents(cell(1, 0, 500)), vec![e1]);
        assert_eq!(graph.dependents(cell(1, 1, 9)), vec![d1]);
        assert!(graph.dependents(cell(2, 0, 5)).is_empty());
    }

    #[test]
    fn test_cross_sheet_index() {
        let mut graph = DepGraph::new();
        let a1 = cell(1, 0, 0);
        let b1 = cell(1, 1, 0);
        graph.set_formula(a1, deps(1, "=Two!A1+1"));
        graph.set_formula(b1, deps(1, "=C3"));
        graph.assert_consistent();

        assert_eq!(graph.formulas_targeting(SheetId::from_raw(2)), vec![a1]);
        assert_eq!(graph.formulas_targeting(SheetId::from_raw(1)), vec![b1]);
        assert_eq!(graph.dependents(cell(2, 0, 0)), vec![a1]);
    }

    #[test]
    fn test_missing_sheet_index() {
        let mut graph = DepGraph::new();
        let a1 = cell(1, 0, 0);
        graph.set_formula(a1, deps(1, "=Later!A1"));
        assert_eq!(graph.formulas_missing("later"), vec![a1]);
        assert_eq!(graph.formulas_missing("LATER"), vec![a1]);

        graph.remove_formula(a1);
        graph.assert_consistent();
        assert!(graph.formulas_missing("later").is_empty());
    }

    #[test]
    fn test_self_reference() {
        let mut graph = DepGraph::new();
        let a1 = cell(1, 0, 0);
        graph.set_formula(a1, deps(1, "=A1+1"));
        graph.assert_consistent();
        assert_eq!(graph.dependents(a1), vec![a1]);
        assert!(graph.deps(a1).map_or(false, |d| d.reads(a1)));
    }

    #[test]
    fn test_remove_sheet_formulas() {
        let mut graph = DepGraph::new();
        graph.set_formula(cell(1, 0, 0), deps(1, "=Two!A1"));
        graph.set_formula(cell(2, 0, 1), deps(2, "=A1"));
        graph.set_formula(cell(2, 0, 2), deps(2, "=SUM(A1:A2)"));

        let removed = graph.remove_sheet_formulas(SheetId::from_raw(2));
        graph.assert_consistent();

        assert_eq!(removed, vec![cell(2, 0, 1), cell(2, 0, 2)]);
        assert_eq!(graph.formula_cell_count(), 1);
        assert_eq!(graph.dependents(cell(2, 0, 0)), vec![cell(1, 0, 0)]);
    }

    #[test]
    fn test_invalid_slots_have_no_edges() {
        let mut graph = DepGraph::new();
        let a1 = cell(1, 0, 0);
        let d = deps(1, "=#REF+1");
        assert!(d.is_empty());
        graph.set_formula(a1, d);
        graph.assert_consistent();
        assert!(graph.is_formula_cell(a1));
    }
}
