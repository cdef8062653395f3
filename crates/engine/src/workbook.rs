use cellgraph_core::{Axis, SheetId, Zone};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::cell::{Cell, CellContent, ContentKind};
use crate::cell_id::CellId;
use crate::command::{Command, Position};
use crate::config::EngineConfig;
use crate::dep_graph::{DepGraph, FormulaDeps};
use crate::error::Rejection;
use crate::filter::Table;
use crate::formula::{bind_formula, format_formula, BoundFormula, CompileCache, FunctionRegistry, Value};
use crate::handlers::HANDLERS;
use crate::history::{Change, History, Replay, Touched, Transaction};
use crate::recalc::{Recalc, RecalcReport};
use crate::rules::RangedRule;
use crate::sheet::{normalize_sheet_name, Header, MergeId, Sheet};
use crate::style::{Border, Style, StyleTables};

/// Current selection: a set of zones on one sheet plus the anchor cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub sheet: SheetId,
    pub zones: Vec<Zone>,
    pub anchor: Position,
}

impl Selection {
    pub fn at_origin(sheet: SheetId) -> Self {
        Self { sheet, zones: vec![Zone::cell(0, 0)], anchor: Position { col: 0, row: 0 } }
    }
}

/// A workbook: ordered sheets plus everything derived from them.
///
/// The only mutators are [`Workbook::dispatch`], [`Workbook::undo`] and
/// [`Workbook::redo`]. Each runs validate, apply, record, evaluate to
/// completion before returning, so every query afterwards sees settled
/// values.
#[derive(Debug)]
pub struct Workbook {
    pub(crate) sheets: Vec<Sheet>,
    pub(crate) active_sheet: SheetId,
    pub(crate) styles: StyleTables,

    /// Dependency graph for formula cells.
    /// Refreshed from the touched slice after every change.
    pub(crate) graph: DepGraph,
    pub(crate) registry: FunctionRegistry,
    pub(crate) compile_cache: CompileCache,
    pub(crate) history: History,
    pub(crate) config: EngineConfig,
    pub(crate) selection: Selection,
    pub(crate) last_recalc: RecalcReport,
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new()
    }
}

impl Workbook {
    /// Create a new workbook with one default sheet
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_registry(config, FunctionRegistry::with_builtins())
    }

    /// Workbook with a custom function registry.
    pub fn with_registry(config: EngineConfig, registry: FunctionRegistry) -> Self {
        let first = SheetId::from_raw(1);
        let sheet = Sheet::new(
            first,
            config.sheet.first_sheet_name.clone(),
            config.sheet.cols,
            config.sheet.rows,
            config.sheet.col_size,
            config.sheet.row_size,
        );
        let mut book = Self::empty(config, registry);
        book.sheets.push(sheet);
        book.active_sheet = first;
        book.selection = Selection::at_origin(first);
        book
    }

    /// No sheets at all. Only valid as an intermediate state while importing.
    pub(crate) fn empty(config: EngineConfig, registry: FunctionRegistry) -> Self {
        let placeholder = SheetId::from_raw(0);
        Self {
            sheets: Vec::new(),
            active_sheet: placeholder,
            styles: StyleTables::default(),
            graph: DepGraph::new(),
            registry,
            compile_cache: CompileCache::new(config.evaluation.compile_cache_capacity),
            history: History::new(config.history.max_undo),
            config,
            selection: Selection::at_origin(placeholder),
            last_recalc: RecalcReport::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn style_tables(&self) -> &StyleTables {
        &self.styles
    }

    pub fn dep_graph(&self) -> &DepGraph {
        &self.graph
    }

    /// Report of the evaluation pass run by the last dispatch, undo or redo.
    pub fn last_recalc(&self) -> &RecalcReport {
        &self.last_recalc
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    // =========================================================================
    // Sheets
    // =========================================================================

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    pub fn sheet(&self, id: SheetId) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.id() == id)
    }

    /// Case-insensitive lookup.
    pub fn sheet_by_name(&self, name: &str) -> Option<&Sheet> {
        let key = normalize_sheet_name(name);
        self.sheets.iter().find(|s| s.name_key() == key)
    }

    pub fn sheet_id_by_name(&self, name: &str) -> Option<SheetId> {
        self.sheet_by_name(name).map(Sheet::id)
    }

    pub fn sheet_position(&self, id: SheetId) -> Option<usize> {
        self.sheets.iter().position(|s| s.id() == id)
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name()).collect()
    }

    pub fn active_sheet(&self) -> SheetId {
        self.active_sheet
    }

    pub(crate) fn sheet_name(&self, id: SheetId) -> Option<String> {
        self.sheet(id).map(|s| s.name().to_string())
    }

    pub(crate) fn name_map(&self) -> FxHashMap<SheetId, String> {
        self.sheets.iter().map(|s| (s.id(), s.name().to_string())).collect()
    }

    // =========================================================================
    // Cell queries
    // =========================================================================

    /// Evaluated value. Positions inside a merge read the merge's anchor.
    pub fn value(&self, sheet: SheetId, col: usize, row: usize) -> Value {
        let Some(s) = self.sheet(sheet) else {
            return Value::Empty;
        };
        let (col, row) = s.anchor_of(col, row);
        s.value(col, row)
    }

    /// Content as the user would edit it: literal text, number, or the
    /// formula source (rewritten by structural edits).
    pub fn raw_content(&self, sheet: SheetId, col: usize, row: usize) -> String {
        self.content(sheet, col, row).map(CellContent::raw_display).unwrap_or_default()
    }

    pub fn content_kind(&self, sheet: SheetId, col: usize, row: usize) -> ContentKind {
        self.content(sheet, col, row).map(CellContent::kind).unwrap_or(ContentKind::Empty)
    }

    fn content(&self, sheet: SheetId, col: usize, row: usize) -> Option<&CellContent> {
        let s = self.sheet(sheet)?;
        let (col, row) = s.anchor_of(col, row);
        s.cell(col, row).map(|c| &c.content)
    }

    /// Formula text rendered from the compiled form: current sheet names,
    /// `#REF` in place of destroyed references. `None` for non-formula cells.
    pub fn formula_text(&self, sheet: SheetId, col: usize, row: usize) -> Option<String> {
        let formula = self.content(sheet, col, row)?.formula()?;
        Some(match &formula.compiled {
            Ok(bound) => format_formula(bound, |id| self.sheet_name(id)),
            Err(_) => formula.source.clone(),
        })
    }

    /// Cell style with matching conditional formats laid over it, in rule
    /// order.
    pub fn style(&self, sheet: SheetId, col: usize, row: usize) -> Style {
        let Some(s) = self.sheet(sheet) else {
            return Style::default();
        };
        let base = s
            .cell(col, row)
            .and_then(|c| c.style)
            .and_then(|id| self.styles.style(id))
            .cloned()
            .unwrap_or_default();
        let matching: Vec<&Style> = s
            .conditional_formats()
            .iter()
            .filter(|cf| cf.applies_to(col, row))
            .filter(|cf| cf.criterion.matches(&self.value(sheet, col, row)))
            .map(|cf| &cf.style)
            .collect();
        matching.into_iter().fold(base, |style, overlay| style.patched(overlay))
    }

    pub fn border(&self, sheet: SheetId, col: usize, row: usize) -> Option<Border> {
        let id = self.sheet(sheet)?.cell(col, row)?.border?;
        self.styles.border(id).cloned()
    }

    /// Number format, e.g. `"0.00%"`.
    pub fn format(&self, sheet: SheetId, col: usize, row: usize) -> Option<String> {
        let id = self.sheet(sheet)?.cell(col, row)?.format?;
        self.styles.format(id).map(str::to_string)
    }

    /// `false` when a data validation rule covering the cell rejects its
    /// value. Empty cells are always valid.
    pub fn is_cell_valid(&self, sheet: SheetId, col: usize, row: usize) -> bool {
        let Some(s) = self.sheet(sheet) else {
            return true;
        };
        let value = self.value(sheet, col, row);
        if value.is_empty() {
            return true;
        }
        s.validations()
            .iter()
            .filter(|rule| rule.applies_to(col, row))
            .all(|rule| rule.criterion.matches(&value))
    }

    // =========================================================================
    // Sheet queries
    // =========================================================================

    pub fn merges(&self, sheet: SheetId) -> Vec<Zone> {
        self.sheet(sheet).map(|s| s.merges().map(|(_, z)| *z).collect()).unwrap_or_default()
    }

    pub fn tables(&self, sheet: SheetId) -> &[Table] {
        self.sheet(sheet).map(Sheet::tables).unwrap_or(&[])
    }

    /// Rows hidden by table filters on `sheet`, sorted.
    pub fn filtered_rows(&self, sheet: SheetId) -> Vec<usize> {
        let mut rows: Vec<usize> = self
            .tables(sheet)
            .iter()
            .flat_map(|table| table.filtered_rows(|col, row| self.value(sheet, col, row)))
            .collect();
        rows.sort_unstable();
        rows.dedup();
        rows
    }

    // =========================================================================
    // Pipeline
    // =========================================================================

    /// Validate, apply, record and evaluate one command.
    ///
    /// A rejected command leaves the workbook and its history untouched.
    pub fn dispatch(&mut self, command: Command) -> Result<(), Rejection> {
        for handler in HANDLERS {
            if let Err(rejection) = handler.validate(self, &command) {
                log::debug!("{} rejected: {:?}", command.name(), rejection);
                return Err(rejection);
            }
        }

        let mut tx = Transaction::new(command.name());
        for handler in HANDLERS {
            handler.apply(self, &mut tx, &command);
        }

        if command.is_transient() {
            return Ok(());
        }

        let mut touched = Touched::default();
        for change in &tx.changes {
            change.touch(&mut touched);
        }
        self.settle(&touched);
        log::debug!("{} applied: {} changes", tx.label, tx.changes.len());
        self.history.record(tx);
        Ok(())
    }

    /// Restore the state before the last accepted command.
    pub fn undo(&mut self) -> Result<(), Rejection> {
        let tx = self.history.pop_undo().ok_or(Rejection::EmptyUndoStack)?;
        let mut touched = Touched::default();
        for change in tx.changes.iter().rev() {
            change.replay(Replay::Undo, &mut self.sheets, &mut self.active_sheet, &mut touched);
        }
        self.settle(&touched);
        self.repair_selection();
        log::debug!("undo {}", tx.label);
        self.history.push_redo(tx);
        Ok(())
    }

    /// Re-apply the last undone command.
    pub fn redo(&mut self) -> Result<(), Rejection> {
        let tx = self.history.pop_redo().ok_or(Rejection::EmptyRedoStack)?;
        let mut touched = Touched::default();
        for change in &tx.changes {
            change.replay(Replay::Redo, &mut self.sheets, &mut self.active_sheet, &mut touched);
        }
        self.settle(&touched);
        self.repair_selection();
        log::debug!("redo {}", tx.label);
        self.history.push_undo(tx);
        Ok(())
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Rebuild the dependency graph and evaluate every formula.
    pub fn recalculate_all(&mut self) -> &RecalcReport {
        let touched = Touched { sheets: self.sheets.iter().map(Sheet::id).collect(), ..Touched::default() };
        self.settle(&touched);
        &self.last_recalc
    }

    /// Bring the graph up to date for what changed, then re-evaluate
    /// everything downstream.
    fn settle(&mut self, touched: &Touched) {
        let mut seeds: Vec<CellId> = Vec::new();

        let mut sheets: Vec<SheetId> = touched.sheets.iter().copied().collect();
        sheets.sort();
        for id in sheets {
            seeds.extend(self.graph.formulas_targeting(id));
            seeds.extend(self.graph.remove_sheet_formulas(id));
            let positions = self.sheet(id).map(Sheet::formula_positions).unwrap_or_default();
            for (col, row) in positions {
                let cell = CellId::new(id, col, row);
                self.refresh_formula(cell);
                seeds.push(cell);
            }
        }

        let mut cells: Vec<CellId> = touched.cells.iter().copied().collect();
        cells.sort();
        for cell in cells {
            self.refresh_formula(cell);
            seeds.push(cell);
        }

        seeds.sort();
        seeds.dedup();
        let recalc = Recalc {
            graph: &self.graph,
            registry: &self.registry,
            fallback: self.config.evaluation.error_fallback,
        };
        self.last_recalc = recalc.run(&mut self.sheets, &seeds);
    }

    /// Re-derive one cell's graph entry from what the sheet holds.
    fn refresh_formula(&mut self, cell: CellId) {
        let deps = self
            .sheet(cell.sheet)
            .and_then(|s| s.cell(cell.col, cell.row))
            .and_then(|c| c.content.formula())
            .map(|f| match &f.compiled {
                Ok(bound) => FormulaDeps::from_formula(cell.sheet, bound),
                Err(_) => FormulaDeps::default(),
            });
        match deps {
            Some(deps) => self.graph.set_formula(cell, deps),
            None => {
                self.graph.remove_formula(cell);
            }
        }
    }

    fn repair_selection(&mut self) {
        if self.sheet(self.selection.sheet).is_none() {
            self.selection = Selection::at_origin(self.active_sheet);
        }
    }

    // =========================================================================
    // Mutation primitives for handlers
    //
    // Each one captures the before-state, writes the after-state through the
    // same replay code undo/redo use, and records the change.
    // =========================================================================

    pub(crate) fn commit(&mut self, tx: &mut Transaction, change: Change) {
        let mut scratch = Touched::default();
        change.replay(Replay::Redo, &mut self.sheets, &mut self.active_sheet, &mut scratch);
        tx.push(change);
    }

    /// Classify and compile user input. Sheet names bind against the
    /// current sheets; unknown names stay missing.
    pub(crate) fn compile_content(&mut self, input: &str) -> CellContent {
        let cache = &mut self.compile_cache;
        let registry = &self.registry;
        let sheets = &self.sheets;
        CellContent::from_input(input, |text| {
            cache.compile(text, registry).map(|parsed| {
                bind_formula(&parsed, |name| {
                    let key = normalize_sheet_name(name);
                    sheets.iter().find(|s| s.name_key() == key).map(Sheet::id)
                })
            })
        })
    }

    pub(crate) fn set_cell(&mut self, tx: &mut Transaction, sheet: SheetId, col: usize, row: usize, after: Option<Cell>) {
        let Some(s) = self.sheet(sheet) else {
            return;
        };
        let before = s.cell(col, row).cloned();
        let after = after.filter(|c| !c.is_empty());
        if before == after {
            return;
        }
        self.commit(tx, Change::Cell { sheet, col, row, before, after });
    }

    /// Edit the cell at a position (starting from an empty cell if there is
    /// none). Cells left empty are dropped.
    pub(crate) fn update_cell<F>(&mut self, tx: &mut Transaction, sheet: SheetId, col: usize, row: usize, edit: F)
    where
        F: FnOnce(&mut Cell),
    {
        let Some(s) = self.sheet(sheet) else {
            return;
        };
        let mut cell = s.cell(col, row).cloned().unwrap_or_default();
        edit(&mut cell);
        self.set_cell(tx, sheet, col, row, Some(cell));
    }

    /// Swap a formula cell's compiled form, re-rendering its source.
    pub(crate) fn rewrite_formula<F>(
        &mut self,
        tx: &mut Transaction,
        cell: CellId,
        names: &FxHashMap<SheetId, String>,
        rewrite: F,
    ) where
        F: FnOnce(&BoundFormula) -> Option<BoundFormula>,
    {
        let Some(current) = self.sheet(cell.sheet).and_then(|s| s.cell(cell.col, cell.row)) else {
            return;
        };
        let Some(Ok(bound)) = current.content.formula().map(|f| &f.compiled) else {
            return;
        };
        let Some(rewritten) = rewrite(bound) else {
            return;
        };
        let mut updated = current.clone();
        if let Some(formula) = updated.content.formula_mut() {
            formula.source = format_formula(&rewritten, |id| names.get(&id).cloned());
            formula.compiled = Ok(rewritten);
        }
        self.set_cell(tx, cell.sheet, cell.col, cell.row, Some(updated));
    }

    pub(crate) fn replace_sheet(&mut self, tx: &mut Transaction, after: Sheet) {
        let Some(before) = self.sheet(after.id()).cloned() else {
            return;
        };
        self.commit(tx, Change::Sheet { before: Box::new(before), after: Box::new(after) });
    }

    pub(crate) fn set_header(&mut self, tx: &mut Transaction, sheet: SheetId, axis: Axis, index: usize, after: Header) {
        let Some(before) = self.sheet(sheet).and_then(|s| s.header(axis, index)).copied() else {
            return;
        };
        if before != after {
            self.commit(tx, Change::Header { sheet, axis, index, before, after });
        }
    }

    pub(crate) fn set_merge(&mut self, tx: &mut Transaction, sheet: SheetId, id: MergeId, after: Option<Zone>) {
        let Some(s) = self.sheet(sheet) else {
            return;
        };
        let before = s.merge(id).copied();
        if before != after {
            self.commit(tx, Change::Merge { sheet, id, before, after });
        }
    }

    pub(crate) fn set_active_sheet(&mut self, tx: &mut Transaction, after: SheetId) {
        let before = self.active_sheet;
        if before != after {
            self.commit(tx, Change::ActiveSheet { before, after });
        }
        if self.selection.sheet != after {
            self.selection = Selection::at_origin(after);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{cmd, TestBook};

    #[test]
    fn test_new_workbook_from_config() {
        let config = EngineConfig::from_toml_str("[sheet]\nrows = 10\ncols = 4\nfirst_sheet_name = \"Data\"").unwrap();
        let book = Workbook::with_config(config);
        assert_eq!(book.sheet_names(), vec!["Data"]);
        let sheet = book.sheet(book.active_sheet()).unwrap();
        assert_eq!((sheet.cols(), sheet.rows()), (4, 10));
        assert!(!book.can_undo());
    }

    #[test]
    fn test_dispatch_evaluates_before_returning() {
        let mut t = TestBook::new();
        t.set("A1", "2");
        t.set("A2", "=A1*10");
        assert_eq!(t.value("A2"), Value::Number(20.0));
        t.set("A1", "3");
        assert_eq!(t.value("A2"), Value::Number(30.0));
        assert_eq!(t.book.last_recalc().cells_recomputed, 1);
    }

    #[test]
    fn test_rejection_has_no_side_effect() {
        let mut t = TestBook::new();
        t.set("A1", "1");
        let undo_depth = t.book.history.undo_len();
        let result = t.book.dispatch(cmd::set_content(SheetId::from_raw(99), 0, 0, "x"));
        assert_eq!(result, Err(Rejection::InvalidSheetId));
        assert_eq!(t.book.history.undo_len(), undo_depth);
        assert_eq!(t.raw("A1"), "1");
    }

    #[test]
    fn test_undo_redo_content() {
        let mut t = TestBook::new();
        t.set("A1", "1");
        t.set("B1", "=A1+1");
        t.set("A1", "5");
        assert_eq!(t.value("B1"), Value::Number(6.0));

        t.book.undo().unwrap();
        assert_eq!(t.value("B1"), Value::Number(2.0));
        t.book.redo().unwrap();
        assert_eq!(t.value("B1"), Value::Number(6.0));

        t.book.undo().unwrap();
        t.book.undo().unwrap();
        t.book.undo().unwrap();
        assert_eq!(t.book.undo(), Err(Rejection::EmptyUndoStack));
        assert_eq!(t.book.sheet(t.sheet).unwrap().cell_count(), 0);
    }

    #[test]
    fn test_new_command_clears_redo() {
        let mut t = TestBook::new();
        t.set("A1", "1");
        t.book.undo().unwrap();
        assert!(t.book.can_redo());
        t.set("A2", "2");
        assert_eq!(t.book.redo(), Err(Rejection::EmptyRedoStack));
    }

    #[test]
    fn test_formula_text_follows_rename() {
        let mut t = TestBook::new();
        let other = t.add_sheet("Data");
        t.set("A1", "=Data!B2*2");
        t.book
            .dispatch(Command::RenameSheet { sheet_id: other, name: "Inputs 2024".to_string() })
            .unwrap();
        assert_eq!(t.formula("A1").as_deref(), Some("='Inputs 2024'!B2*2"));
        assert_eq!(t.raw("A1"), "='Inputs 2024'!B2*2");
    }

    #[test]
    fn test_selection_is_not_recorded() {
        let mut t = TestBook::new();
        let zones = vec![Zone::new(0, 0, 2, 2)];
        t.book
            .dispatch(Command::SetSelection { sheet_id: t.sheet, zones: zones.clone(), anchor: Position { col: 1, row: 1 } })
            .unwrap();
        assert_eq!(t.book.selection().zones, zones);
        assert!(!t.book.can_undo());
    }

    #[test]
    fn test_merge_proxy_reads_anchor() {
        let mut t = TestBook::new();
        t.set("A1", "hello");
        t.merge("A1:B1");
        assert_eq!(t.value("B1"), Value::Text("hello".into()));
        assert_eq!(t.raw("B1"), "hello");
    }
}
