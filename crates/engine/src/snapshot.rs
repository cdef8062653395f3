//! Plain serializable snapshot of a workbook.
//!
//! A snapshot holds what a user typed and set, never what was computed:
//! raw contents (formulas as their current text), interned styles, borders
//! and formats by id, headers, merges, rules and tables. Importing compiles
//! and evaluates everything again, so an imported workbook behaves exactly
//! like the one that was exported.
//!
//! Export is deterministic: cells are keyed by A1 address in sorted maps and
//! style ids are renumbered in first-use order, so exporting an imported
//! snapshot yields the same document.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use cellgraph_core::xc::{cell_xc, parse_cell};
use cellgraph_core::{Axis, SheetId, Zone};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::cell::{Cell, CellContent};
use crate::config::{EngineConfig, SheetDefaults};
use crate::error::EngineError;
use crate::filter::Table;
use crate::formula::FunctionRegistry;
use crate::rules::{ConditionalFormat, DataValidationRule};
use crate::sheet::{is_valid_sheet_name, normalize_sheet_name, Header, Sheet};
use crate::style::{Border, BorderId, FormatId, Style, StyleId};
use crate::workbook::{Selection, Workbook};

/// Snapshot schema version.
/// Increment when the schema changes in a way older readers can't handle.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkbookSnapshot {
    pub version: u32,
    pub active_sheet: SheetId,
    pub sheets: Vec<SheetSnapshot>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub styles: BTreeMap<u32, Style>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub borders: BTreeMap<u32, Border>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub formats: BTreeMap<u32, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetSnapshot {
    pub id: SheetId,
    pub name: String,
    pub cols: usize,
    pub rows: usize,
    /// One entry per column. Empty means default sizes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub col_headers: Vec<Header>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub row_headers: Vec<Header>,
    /// A1 address -> cell
    #[serde(default)]
    pub cells: BTreeMap<String, CellSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merges: Vec<Zone>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditional_formats: Vec<ConditionalFormat>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validations: Vec<DataValidationRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<Table>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<u32>,
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::InvalidSnapshot(message.into())
}

// ============================================================================
// Export
// ============================================================================

/// Renumbers interned ids densely, in the order they are first seen.
struct Renumber<K> {
    ids: FxHashMap<K, u32>,
}

impl<K: Copy + Eq + std::hash::Hash> Renumber<K> {
    fn new() -> Self {
        Self { ids: FxHashMap::default() }
    }

    /// New id for `key`, and whether it was seen for the first time.
    fn map(&mut self, key: K) -> (u32, bool) {
        let next = self.ids.len() as u32;
        match self.ids.get(&key) {
            Some(&id) => (id, false),
            None => {
                self.ids.insert(key, next);
                (next, true)
            }
        }
    }
}

impl Workbook {
    pub fn to_snapshot(&self) -> WorkbookSnapshot {
        let mut styles = Renumber::<StyleId>::new();
        let mut borders = Renumber::<BorderId>::new();
        let mut formats = Renumber::<FormatId>::new();
        let mut snapshot = WorkbookSnapshot {
            version: SNAPSHOT_VERSION,
            active_sheet: self.active_sheet,
            sheets: Vec::with_capacity(self.sheets.len()),
            styles: BTreeMap::new(),
            borders: BTreeMap::new(),
            formats: BTreeMap::new(),
        };

        for sheet in &self.sheets {
            let mut cells = BTreeMap::new();
            for ((col, row), cell) in sheet.cells() {
                let style = cell.style.and_then(|id| {
                    let (new_id, first) = styles.map(id);
                    if first {
                        snapshot.styles.insert(new_id, self.styles.style(id)?.clone());
                    }
                    Some(new_id)
                });
                let border = cell.border.and_then(|id| {
                    let (new_id, first) = borders.map(id);
                    if first {
                        snapshot.borders.insert(new_id, self.styles.border(id)?.clone());
                    }
                    Some(new_id)
                });
                let format = cell.format.and_then(|id| {
                    let (new_id, first) = formats.map(id);
                    if first {
                        snapshot.formats.insert(new_id, self.styles.format(id)?.to_string());
                    }
                    Some(new_id)
                });
                let content = (!cell.content.is_empty()).then(|| cell.content.raw_display());
                cells.insert(cell_xc(col, row), CellSnapshot { content, style, border, format });
            }

            snapshot.sheets.push(SheetSnapshot {
                id: sheet.id(),
                name: sheet.name().to_string(),
                cols: sheet.cols(),
                rows: sheet.rows(),
                col_headers: sheet.headers(Axis::Col).to_vec(),
                row_headers: sheet.headers(Axis::Row).to_vec(),
                cells,
                merges: sheet.merges().map(|(_, zone)| *zone).collect(),
                conditional_formats: sheet.conditional_formats().to_vec(),
                validations: sheet.validations().to_vec(),
                tables: sheet.tables().to_vec(),
            });
        }
        snapshot
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(&self.to_snapshot())?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &self.to_snapshot())?;
        Ok(())
    }
}

// ============================================================================
// Import
// ============================================================================

fn check_snapshot(snapshot: &WorkbookSnapshot, limits: &SheetDefaults) -> Result<(), EngineError> {
    if snapshot.version > SNAPSHOT_VERSION {
        return Err(invalid(format!("unsupported snapshot version {}", snapshot.version)));
    }
    if snapshot.sheets.is_empty() {
        return Err(invalid("no sheets"));
    }
    let mut ids = FxHashSet::default();
    let mut names = FxHashSet::default();
    for sheet in &snapshot.sheets {
        if !ids.insert(sheet.id) {
            return Err(invalid(format!("duplicated sheet id {}", sheet.id.raw())));
        }
        if !is_valid_sheet_name(&sheet.name) || !names.insert(normalize_sheet_name(&sheet.name)) {
            return Err(invalid(format!("invalid or duplicated sheet name {:?}", sheet.name)));
        }
        if !limits.fits(sheet.cols, sheet.rows) {
            return Err(invalid(format!("sheet {} has no cells or is too large", sheet.name)));
        }
        let headers_ok = |headers: &[Header], len: usize| headers.is_empty() || headers.len() == len;
        if !headers_ok(&sheet.col_headers, sheet.cols) || !headers_ok(&sheet.row_headers, sheet.rows) {
            return Err(invalid(format!("sheet {} header count mismatch", sheet.name)));
        }
    }
    if !ids.contains(&snapshot.active_sheet) {
        return Err(invalid("active sheet does not exist"));
    }
    Ok(())
}

/// Intern the table entry a snapshot cell points at.
fn resolve<T, I, F>(table: &BTreeMap<u32, T>, id: Option<u32>, what: &str, intern: F) -> Result<Option<I>, EngineError>
where
    T: Clone,
    F: FnOnce(T) -> Option<I>,
{
    match id {
        None => Ok(None),
        Some(id) => {
            let value = table.get(&id).ok_or_else(|| invalid(format!("unknown {} id {}", what, id)))?;
            Ok(intern(value.clone()))
        }
    }
}

impl Workbook {
    /// Rebuild a workbook from a snapshot and evaluate it.
    pub fn from_snapshot(snapshot: WorkbookSnapshot, config: EngineConfig) -> Result<Self, EngineError> {
        Self::from_snapshot_with_registry(snapshot, config, FunctionRegistry::with_builtins())
    }

    pub fn from_snapshot_with_registry(
        snapshot: WorkbookSnapshot,
        config: EngineConfig,
        registry: FunctionRegistry,
    ) -> Result<Self, EngineError> {
        check_snapshot(&snapshot, &config.sheet)?;
        let mut book = Workbook::empty(config, registry);

        // Every sheet exists before any formula compiles, so cross-sheet
        // references bind regardless of sheet order.
        for s in &snapshot.sheets {
            let defaults = &book.config.sheet;
            let mut sheet = Sheet::new(s.id, s.name.clone(), s.cols, s.rows, defaults.col_size, defaults.row_size);
            for (index, header) in s.col_headers.iter().enumerate() {
                sheet.set_header(Axis::Col, index, *header);
            }
            for (index, header) in s.row_headers.iter().enumerate() {
                sheet.set_header(Axis::Row, index, *header);
            }
            book.sheets.push(sheet);
        }

        for (position, s) in snapshot.sheets.iter().enumerate() {
            let mut cells = Vec::with_capacity(s.cells.len());
            for (xc, snap) in &s.cells {
                let (col, row) = parse_cell(xc).map_err(|e| invalid(format!("{}!{}: {}", s.name, xc, e)))?;
                if col >= s.cols || row >= s.rows {
                    return Err(invalid(format!("{}!{} is outside the sheet", s.name, xc)));
                }
                let content = match &snap.content {
                    Some(raw) => book.compile_content(raw),
                    None => CellContent::Empty,
                };
                let cell = Cell {
                    content,
                    style: resolve(&snapshot.styles, snap.style, "style", |v| book.styles.intern_style(v))?,
                    border: resolve(&snapshot.borders, snap.border, "border", |v| book.styles.intern_border(v))?,
                    format: resolve(&snapshot.formats, snap.format, "format", |v| book.styles.intern_format(v))?,
                };
                cells.push((col, row, cell));
            }

            let sheet = &mut book.sheets[position];
            for (col, row, cell) in cells {
                sheet.put_cell(col, row, cell);
            }
            for zone in &s.merges {
                if !zone.is_bounded() || sheet.add_merge(*zone).is_none() {
                    return Err(invalid(format!("invalid merge in sheet {}", s.name)));
                }
            }
            *sheet.conditional_formats_mut() = s.conditional_formats.clone();
            *sheet.validations_mut() = s.validations.clone();
            *sheet.tables_mut() = s.tables.clone();
        }

        book.active_sheet = snapshot.active_sheet;
        book.selection = Selection::at_origin(snapshot.active_sheet);
        let report = book.recalculate_all();
        log::info!(
            "imported snapshot: {} sheets, {} formulas evaluated",
            snapshot.sheets.len(),
            report.cells_recomputed
        );
        Ok(book)
    }

    pub fn from_json(text: &str, config: EngineConfig) -> Result<Self, EngineError> {
        let snapshot: WorkbookSnapshot = serde_json::from_str(text)?;
        Self::from_snapshot(snapshot, config)
    }

    pub fn load(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        let reader = BufReader::new(File::open(path)?);
        let snapshot: WorkbookSnapshot = serde_json::from_reader(reader)?;
        Self::from_snapshot(snapshot, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::formula::{ErrorKind, Value};
    use crate::harness::{cmd, zone, TestBook};

    fn reimport(book: &Workbook) -> Workbook {
        Workbook::from_snapshot(book.to_snapshot(), EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_values_survive_roundtrip() {
        let mut t = TestBook::new();
        let data = t.add_sheet("Data");
        t.set_on(data, "A1", "4");
        t.set("A1", "=Data!A1*2");
        t.set("A2", "text");
        t.set("A3", "=A3");

        let book = reimport(&t.book);
        assert_eq!(book.value(t.sheet, 0, 0), Value::Number(8.0));
        assert_eq!(book.value(t.sheet, 0, 1), Value::Text("text".into()));
        assert_eq!(book.value(t.sheet, 0, 2).error().map(|e| e.kind), Some(ErrorKind::Cycle));
        assert_eq!(book.sheet_names(), vec!["Sheet1", "Data"]);
    }

    #[test]
    fn test_export_is_stable() {
        let mut t = TestBook::new();
        t.set("B2", "1");
        t.book
            .dispatch(cmd::format(t.sheet, "A1:B2", Style { bold: Some(true), ..Default::default() }))
            .unwrap();
        t.merge("C3:D4");
        t.book
            .dispatch(Command::CreateTable { sheet_id: t.sheet, zone: zone("F1:G5"), has_header: true })
            .unwrap();

        let first = t.book.to_json().unwrap();
        let second = Workbook::from_json(&first, EngineConfig::default()).unwrap().to_json().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_style_ids_renumbered_densely() {
        let mut t = TestBook::new();
        let italic = Style { italic: Some(true), ..Default::default() };
        let bold = Style { bold: Some(true), ..Default::default() };
        t.book.dispatch(cmd::format(t.sheet, "A1", italic)).unwrap();
        t.book.dispatch(cmd::format(t.sheet, "A1", bold.clone())).unwrap();
        t.book.dispatch(cmd::format(t.sheet, "A2", bold)).unwrap();

        // the italic-only style is interned but no longer used
        let snapshot = t.book.to_snapshot();
        assert_eq!(snapshot.styles.len(), 2);
        assert_eq!(snapshot.styles.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_invalid_snapshots() {
        let book = Workbook::new();
        let mut snapshot = book.to_snapshot();
        snapshot.active_sheet = SheetId::from_raw(42);
        assert!(matches!(
            Workbook::from_snapshot(snapshot, EngineConfig::default()),
            Err(EngineError::InvalidSnapshot(_))
        ));

        let mut snapshot = book.to_snapshot();
        snapshot.sheets[0].cells.insert("A1".into(), CellSnapshot { style: Some(7), ..CellSnapshot::default() });
        assert!(matches!(
            Workbook::from_snapshot(snapshot, EngineConfig::default()),
            Err(EngineError::InvalidSnapshot(_))
        ));

        let mut snapshot = book.to_snapshot();
        snapshot.sheets[0].rows = usize::MAX;
        snapshot.sheets[0].row_headers.clear();
        assert!(matches!(
            Workbook::from_snapshot(snapshot, EngineConfig::default()),
            Err(EngineError::InvalidSnapshot(_))
        ));

        assert!(matches!(Workbook::from_json("{", EngineConfig::default()), Err(EngineError::Snapshot(_))));
    }

    #[test]
    fn test_imported_book_has_empty_history() {
        let mut t = TestBook::new();
        t.set("A1", "1");
        let mut book = reimport(&t.book);
        assert!(!book.can_undo());
        book.dispatch(cmd::set_content(t.sheet, 0, 0, "2")).unwrap();
        book.undo().unwrap();
        assert_eq!(book.value(t.sheet, 0, 0), Value::Number(1.0));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.json");

        let mut t = TestBook::new();
        t.set("A1", "3");
        t.set("A2", "=A1+1");
        t.book.save(&path).unwrap();

        let book = Workbook::load(&path, EngineConfig::default()).unwrap();
        assert_eq!(book.value(t.sheet, 0, 1), Value::Number(4.0));
        assert_eq!(book.raw_content(t.sheet, 0, 1), "=A1+1");
    }
}
