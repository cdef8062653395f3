//! Incremental, topologically ordered recalculation.
//!
//! One pass:
//! 1. **Dirty set**: breadth-first walk from the changed cells through
//!    dependents (cell edges and the range index). Only formula cells end up
//!    in the set; everything else keeps its cached value.
//! 2. **Order**: iterative Tarjan over the dirty subgraph. Strongly connected
//!    components come out dependencies-first, which is the evaluation order.
//!    Per-cell visit state lives in a side map dropped at the end of the pass.
//! 3. **Evaluate**: a component of more than one cell (or a cell reading
//!    itself) is a cycle and every member gets `#CYCLE`. Any other cell is
//!    evaluated exactly once, after everything it reads has settled.

use std::collections::VecDeque;
use std::time::Instant;

use cellgraph_core::SheetId;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::cell_id::CellId;
use crate::config::ErrorFallback;
use crate::dep_graph::DepGraph;
use crate::formula::{evaluate, CellError, CellLookup, ErrorKind, EvalContext, FunctionRegistry, Value};
use crate::sheet::Sheet;

/// Report from one recalculation pass.
#[derive(Debug, Clone, Default)]
pub struct RecalcReport {
    /// Time taken in microseconds.
    pub duration_us: u64,

    /// Number of formula cells evaluated (cycle members included).
    pub cells_recomputed: usize,

    /// Cycles found, each sorted (sheet, row, col).
    pub cycles: Vec<Vec<CellId>>,

    /// Cells whose new value is an error (truncated to the first 100).
    pub errors: Vec<RecalcError>,

    /// Cells that kept their previous value under the error fallback policy.
    pub retained: usize,
}

impl RecalcReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn had_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    pub fn cycle_cells(&self) -> usize {
        self.cycles.iter().map(Vec::len).sum()
    }

    /// Format as a concise one-line summary.
    pub fn summary(&self) -> String {
        format!(
            "{} cells in {}us, cycles={}, errors={}",
            self.cells_recomputed,
            self.duration_us,
            self.cycle_cells(),
            self.errors.len()
        )
    }

    /// Format: `[recalc] 120us  14 cells  cycles=0  errors=0  retained=0`
    pub fn log_line(&self) -> String {
        format!(
            "[recalc] {:>4}us  {} cells  cycles={}  errors={}  retained={}",
            self.duration_us,
            self.cells_recomputed,
            self.cycle_cells(),
            self.errors.len(),
            self.retained
        )
    }

    fn push_error(&mut self, cell: CellId, error: &CellError) {
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(RecalcError::new(cell, error.code()));
        }
    }
}

const MAX_REPORTED_ERRORS: usize = 100;

/// A cell that evaluated to an error during recalculation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecalcError {
    pub cell: CellId,
    pub code: &'static str,
}

impl RecalcError {
    pub fn new(cell: CellId, code: &'static str) -> Self {
        Self { cell, code }
    }
}

/// Three-state marker for one pass of the ordering walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Unvisited,
    /// On the Tarjan stack: reaching it again closes a cycle
    InProgress,
    Done,
}

/// Read-only view over the sheets for the evaluator.
pub(crate) struct SheetsLookup<'a> {
    sheets: &'a [Sheet],
    index: &'a FxHashMap<SheetId, usize>,
}

impl<'a> SheetsLookup<'a> {
    pub(crate) fn new(sheets: &'a [Sheet], index: &'a FxHashMap<SheetId, usize>) -> Self {
        Self { sheets, index }
    }

    fn sheet(&self, id: SheetId) -> Option<&Sheet> {
        self.index.get(&id).and_then(|i| self.sheets.get(*i))
    }
}

impl CellLookup for SheetsLookup<'_> {
    fn get_value(&self, sheet: SheetId, col: usize, row: usize) -> Value {
        self.sheet(sheet).map(|s| s.value(col, row)).unwrap_or_default()
    }

    fn sheet_dimensions(&self, sheet: SheetId) -> Option<(usize, usize)> {
        self.sheet(sheet).map(|s| (s.cols(), s.rows()))
    }
}

pub(crate) fn sheet_index(sheets: &[Sheet]) -> FxHashMap<SheetId, usize> {
    sheets.iter().enumerate().map(|(i, s)| (s.id(), i)).collect()
}

/// Everything a pass needs besides the sheets it writes to.
pub struct Recalc<'a> {
    pub graph: &'a DepGraph,
    pub registry: &'a FunctionRegistry,
    pub fallback: ErrorFallback,
}

impl Recalc<'_> {
    /// Re-evaluate every formula downstream of `changed` (changed formula
    /// cells included).
    pub fn run(&self, sheets: &mut [Sheet], changed: &[CellId]) -> RecalcReport {
        let start = Instant::now();
        let mut report = RecalcReport::new();

        let dirty = self.dirty_set(changed);
        if dirty.is_empty() {
            return report;
        }

        let index = sheet_index(sheets);
        for scc in self.evaluation_order(&dirty) {
            let is_cycle = scc.len() > 1
                || scc.first().map_or(false, |c| self.graph.deps(*c).map_or(false, |d| d.reads(*c)));

            if is_cycle {
                let mut members = scc;
                members.sort();
                for cell in &members {
                    if let Some(sheet) = index.get(&cell.sheet).and_then(|i| sheets.get_mut(*i)) {
                        sheet.set_formula_value(cell.col, cell.row, Value::Error(CellError::cycle()));
                    }
                    report.cells_recomputed += 1;
                    report.push_error(*cell, &CellError::cycle());
                }
                report.cycles.push(members);
                continue;
            }

            for cell in scc {
                self.evaluate_cell(sheets, &index, cell, &mut report);
            }
        }

        report.duration_us = start.elapsed().as_micros() as u64;
        log::debug!("{}", report.log_line());
        report
    }

    fn evaluate_cell(
        &self,
        sheets: &mut [Sheet],
        index: &FxHashMap<SheetId, usize>,
        cell: CellId,
        report: &mut RecalcReport,
    ) {
        let Some(&sheet_idx) = index.get(&cell.sheet) else {
            return;
        };
        let Some(formula) = sheets[sheet_idx].cell(cell.col, cell.row).and_then(|c| c.content.formula()) else {
            return;
        };
        let previous = formula.value.clone();
        let compiled = match &formula.compiled {
            Ok(bound) => bound.clone(),
            Err(bad) => {
                let error = CellError::bad_expression(bad.message.clone());
                report.cells_recomputed += 1;
                report.push_error(cell, &error);
                sheets[sheet_idx].set_formula_value(cell.col, cell.row, Value::Error(error));
                return;
            }
        };

        let value = {
            let lookup = SheetsLookup::new(sheets, index);
            let ctx = EvalContext { lookup: &lookup, registry: self.registry, sheet: cell.sheet };
            evaluate(&compiled, &ctx)
        };
        report.cells_recomputed += 1;

        let value = match (&value, self.fallback) {
            (Value::Error(e), ErrorFallback::RetainOnRuntimeError)
                if e.kind == ErrorKind::Error && !previous.is_error() && !previous.is_empty() =>
            {
                report.retained += 1;
                previous
            }
            _ => value,
        };
        if let Value::Error(e) = &value {
            report.push_error(cell, e);
        }
        sheets[sheet_idx].set_formula_value(cell.col, cell.row, value);
    }

    /// Formula cells transitively downstream of `changed`.
    fn dirty_set(&self, changed: &[CellId]) -> FxHashSet<CellId> {
        let mut dirty: FxHashSet<CellId> = FxHashSet::default();
        let mut seen: FxHashSet<CellId> = FxHashSet::default();
        let mut queue: VecDeque<CellId> = changed.iter().copied().collect();

        while let Some(cell) = queue.pop_front() {
            if !seen.insert(cell) {
                continue;
            }
            if self.graph.is_formula_cell(cell) {
                dirty.insert(cell);
            }
            for dependent in self.graph.dependents(cell) {
                if !seen.contains(&dependent) {
                    queue.push_back(dependent);
                }
            }
        }
        dirty
    }

    /// Dirty cells a dirty formula reads. Sorted for a stable order.
    fn dirty_precedents(
        &self,
        cell: CellId,
        dirty: &FxHashSet<CellId>,
        dirty_by_sheet: &FxHashMap<SheetId, Vec<CellId>>,
    ) -> Vec<CellId> {
        let Some(deps) = self.graph.deps(cell) else {
            return Vec::new();
        };
        let mut preds: FxHashSet<CellId> = deps.cells.iter().filter(|c| dirty.contains(c)).copied().collect();
        for (sheet, zone) in &deps.ranges {
            if let Some(candidates) = dirty_by_sheet.get(sheet) {
                preds.extend(candidates.iter().filter(|c| zone.contains(c.col, c.row)));
            }
        }
        let mut preds: Vec<CellId> = preds.into_iter().collect();
        preds.sort();
        preds
    }

    /// Strongly connected components of the dirty subgraph, dependencies
    /// first. Iterative, so long chains do not grow the call stack.
    fn evaluation_order(&self, dirty: &FxHashSet<CellId>) -> Vec<Vec<CellId>> {
        let mut sorted_cells: Vec<CellId> = dirty.iter().copied().collect();
        sorted_cells.sort();

        let mut dirty_by_sheet: FxHashMap<SheetId, Vec<CellId>> = FxHashMap::default();
        for cell in &sorted_cells {
            dirty_by_sheet.entry(cell.sheet).or_default().push(*cell);
        }

        let mut state: FxHashMap<CellId, VisitState> = FxHashMap::default();
        let state_of = |state: &FxHashMap<CellId, VisitState>, c: CellId| {
            state.get(&c).copied().unwrap_or(VisitState::Unvisited)
        };
        let mut index_counter: u32 = 0;
        let mut stack: Vec<CellId> = Vec::new();
        let mut indices: FxHashMap<CellId, u32> = FxHashMap::default();
        let mut lowlinks: FxHashMap<CellId, u32> = FxHashMap::default();
        let mut sccs: Vec<Vec<CellId>> = Vec::new();

        struct DfsFrame {
            cell: CellId,
            neighbours: Vec<CellId>,
            next_idx: usize,
        }

        for &root in &sorted_cells {
            if state_of(&state, root) != VisitState::Unvisited {
                continue;
            }

            indices.insert(root, index_counter);
            lowlinks.insert(root, index_counter);
            index_counter += 1;
            stack.push(root);
            state.insert(root, VisitState::InProgress);

            let mut dfs_stack = vec![DfsFrame {
                cell: root,
                neighbours: self.dirty_precedents(root, dirty, &dirty_by_sheet),
                next_idx: 0,
            }];

            while let Some(frame) = dfs_stack.last_mut() {
                if let Some(&w) = frame.neighbours.get(frame.next_idx) {
                    frame.next_idx += 1;
                    let v = frame.cell;

                    match state_of(&state, w) {
                        VisitState::Unvisited => {
                            indices.insert(w, index_counter);
                            lowlinks.insert(w, index_counter);
                            index_counter += 1;
                            stack.push(w);
                            state.insert(w, VisitState::InProgress);

                            dfs_stack.push(DfsFrame {
                                cell: w,
                                neighbours: self.dirty_precedents(w, dirty, &dirty_by_sheet),
                                next_idx: 0,
                            });
                        }
                        VisitState::InProgress => {
                            let w_idx = indices.get(&w).copied().unwrap_or(u32::MAX);
                            if let Some(v_low) = lowlinks.get_mut(&v) {
                                *v_low = (*v_low).min(w_idx);
                            }
                        }
                        VisitState::Done => {}
                    }
                    continue;
                }

                let v = frame.cell;
                dfs_stack.pop();
                let v_low = lowlinks.get(&v).copied().unwrap_or(u32::MAX);
                let v_idx = indices.get(&v).copied().unwrap_or(u32::MAX);

                if let Some(parent) = dfs_stack.last() {
                    if let Some(parent_low) = lowlinks.get_mut(&parent.cell) {
                        *parent_low = (*parent_low).min(v_low);
                    }
                }

                if v_low == v_idx {
                    let mut scc = Vec::new();
                    while let Some(w) = stack.pop() {
                        state.insert(w, VisitState::Done);
                        scc.push(w);
                        if w == v {
                            break;
                        }
                    }
                    sccs.push(scc);
                }
            }
        }

        sccs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{Cell, CellContent};
    use crate::dep_graph::FormulaDeps;
    use crate::formula::{bind_formula, compile};
    use cellgraph_core::xc::parse_cell;

    struct Fixture {
        sheets: Vec<Sheet>,
        graph: DepGraph,
        registry: FunctionRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                sheets: vec![Sheet::new(SheetId::from_raw(1), "Sheet1", 26, 5000, 96, 23)],
                graph: DepGraph::new(),
                registry: FunctionRegistry::with_builtins(),
            }
        }

        fn set(&mut self, xc: &str, input: &str) -> CellId {
            let (col, row) = parse_cell(xc).unwrap();
            let id = CellId::new(SheetId::from_raw(1), col, row);
            let registry = &self.registry;
            let content = CellContent::from_input(input, |text| {
                compile(text, registry).map(|parsed| bind_formula(&parsed, |_| None))
            });
            match content.formula().map(|f| &f.compiled) {
                Some(Ok(bound)) => self.graph.set_formula(id, FormulaDeps::from_formula(id.sheet, bound)),
                Some(Err(_)) => self.graph.set_formula(id, FormulaDeps::default()),
                None => {
                    self.graph.remove_formula(id);
                }
            }
            self.sheets[0].put_cell(col, row, Cell::new(content));
            id
        }

        fn run(&mut self, changed: &[CellId], fallback: ErrorFallback) -> RecalcReport {
            let recalc = Recalc { graph: &self.graph, registry: &self.registry, fallback };
            recalc.run(&mut self.sheets, changed)
        }

        fn value(&self, xc: &str) -> Value {
            let (col, row) = parse_cell(xc).unwrap();
            self.sheets[0].value(col, row)
        }
    }

    #[test]
    fn test_chain_evaluates_in_order() {
        let mut f = Fixture::new();
        // written in reverse so insertion order cannot hide ordering bugs
        let a3 = f.set("A3", "=A2+1");
        let a2 = f.set("A2", "=A1+1");
        let a1 = f.set("A1", "5");
        let report = f.run(&[a1, a2, a3], ErrorFallback::Never);
        assert_eq!(f.value("A3"), Value::Number(7.0));
        assert_eq!(report.cells_recomputed, 2);
        assert!(!report.had_cycles());
    }

    #[test]
    fn test_only_downstream_cells_recompute() {
        let mut f = Fixture::new();
        let a1 = f.set("A1", "1");
        let b1 = f.set("B1", "=A1*2");
        let c1 = f.set("C1", "=10");
        f.run(&[a1, b1, c1], ErrorFallback::Never);

        let a1 = f.set("A1", "4");
        let report = f.run(&[a1], ErrorFallback::Never);
        assert_eq!(report.cells_recomputed, 1);
        assert_eq!(f.value("B1"), Value::Number(8.0));
    }

    #[test]
    fn test_range_reader_sees_settled_values() {
        let mut f = Fixture::new();
        let a1 = f.set("A1", "1");
        let a2 = f.set("A2", "=A1+1");
        let a3 = f.set("A3", "=A2+1");
        let b1 = f.set("B1", "=SUM(A1:A3)");
        f.run(&[b1, a3, a2, a1], ErrorFallback::Never);
        assert_eq!(f.value("B1"), Value::Number(6.0));
    }

    #[test]
    fn test_cycle_is_contained() {
        let mut f = Fixture::new();
        let a1 = f.set("A1", "=B1");
        let b1 = f.set("B1", "=A1");
        let c1 = f.set("C1", "=A1+1");
        let d1 = f.set("D1", "=2");
        let report = f.run(&[a1, b1, c1, d1], ErrorFallback::Never);

        assert_eq!(f.value("A1").error().map(|e| e.kind), Some(ErrorKind::Cycle));
        assert_eq!(f.value("B1").error().map(|e| e.kind), Some(ErrorKind::Cycle));
        // downstream of the cycle: propagated error
        assert_eq!(f.value("C1").error().map(|e| e.kind), Some(ErrorKind::Error));
        assert_eq!(f.value("D1"), Value::Number(2.0));
        assert_eq!(report.cycles, vec![vec![a1, b1]]);
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let mut f = Fixture::new();
        let a1 = f.set("A1", "=A1+1");
        let report = f.run(&[a1], ErrorFallback::Never);
        assert_eq!(f.value("A1").error().map(|e| e.kind), Some(ErrorKind::Cycle));
        assert_eq!(report.cycle_cells(), 1);
    }

    #[test]
    fn test_range_cycle() {
        let mut f = Fixture::new();
        let a1 = f.set("A1", "=SUM(A1:A3)");
        f.run(&[a1], ErrorFallback::Never);
        assert_eq!(f.value("A1").error().map(|e| e.kind), Some(ErrorKind::Cycle));
    }

    #[test]
    fn test_long_chain_is_stack_safe() {
        let mut f = Fixture::new();
        let mut changed = vec![f.set("A1", "1")];
        for row in 2..=4000 {
            changed.push(f.set(&format!("A{}", row), &format!("=A{}+1", row - 1)));
        }
        changed.reverse();
        f.run(&changed, ErrorFallback::Never);
        assert_eq!(f.value("A4000"), Value::Number(4000.0));
    }

    #[test]
    fn test_fallback_keeps_previous_value() {
        let mut f = Fixture::new();
        let a1 = f.set("A1", "2");
        let b1 = f.set("B1", "=10/A1");
        f.run(&[a1, b1], ErrorFallback::RetainOnRuntimeError);
        assert_eq!(f.value("B1"), Value::Number(5.0));

        let a1 = f.set("A1", "0");
        let report = f.run(&[a1], ErrorFallback::RetainOnRuntimeError);
        assert_eq!(f.value("B1"), Value::Number(5.0));
        assert_eq!(report.retained, 1);

        f.run(&[a1], ErrorFallback::Never);
        assert!(f.value("B1").is_error());
    }

    #[test]
    fn test_bad_expression_is_reported() {
        let mut f = Fixture::new();
        let a1 = f.set("A1", "=NOPE(1)");
        let report = f.run(&[a1], ErrorFallback::Never);
        assert_eq!(f.value("A1").error().map(|e| e.kind), Some(ErrorKind::BadExpression));
        assert_eq!(report.errors, vec![RecalcError::new(a1, "#BAD_EXPR")]);
    }

    #[test]
    fn test_report_lines() {
        let report = RecalcReport { duration_us: 14, cells_recomputed: 3, ..Default::default() };
        assert_eq!(report.summary(), "3 cells in 14us, cycles=0, errors=0");
        assert_eq!(report.log_line(), "[recalc]   14us  3 cells  cycles=0  errors=0  retained=0");
    }
}
