use std::collections::BTreeMap;

use cellgraph_core::{Axis, GridEdit, SheetId, Zone};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::cell::{Cell, CellContent};
use super::filter::Table;
use super::formula::Value;
use super::rules::{adjust_rules, ConditionalFormat, DataValidationRule};

/// Size and visibility of one row or column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub size: u32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
}

impl Header {
    pub fn new(size: u32) -> Self {
        Self { size, hidden: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MergeId(pub u32);

/// Case-insensitive key used for sheet name lookups and uniqueness.
pub fn normalize_sheet_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Sheet names are non-empty, at most 100 characters, and avoid the
/// characters that would break formula references.
pub fn is_valid_sheet_name(name: &str) -> bool {
    const FORBIDDEN: &[char] = &['\'', '!', '[', ']', '*', '?', '/', '\\', ':'];
    let trimmed = name.trim();
    !trimmed.is_empty() && trimmed == name && name.chars().count() <= 100 && !name.contains(FORBIDDEN)
}

/// One sheet of the sparse grid.
///
/// Positions are `(col, row)`, 0-based. A position holds a [`Cell`] only while
/// the cell has content or formatting. Inside a merge only the top-left
/// position (the anchor) holds content; the others are proxies.
#[derive(Debug, Clone)]
pub struct Sheet {
    id: SheetId,
    name: String,
    cols: usize,
    rows: usize,
    cells: FxHashMap<(usize, usize), Cell>,
    col_headers: Vec<Header>,
    row_headers: Vec<Header>,
    merges: BTreeMap<MergeId, Zone>,
    merge_index: FxHashMap<(usize, usize), MergeId>,
    next_merge_id: u32,
    conditional_formats: Vec<ConditionalFormat>,
    validations: Vec<DataValidationRule>,
    tables: Vec<Table>,
}

impl Sheet {
    pub fn new(id: SheetId, name: impl Into<String>, cols: usize, rows: usize, col_size: u32, row_size: u32) -> Self {
        Self {
            id,
            name: name.into(),
            cols,
            rows,
            cells: FxHashMap::default(),
            col_headers: vec![Header::new(col_size); cols],
            row_headers: vec![Header::new(row_size); rows],
            merges: BTreeMap::new(),
            merge_index: FxHashMap::default(),
            next_merge_id: 1,
            conditional_formats: Vec::new(),
            validations: Vec::new(),
            tables: Vec::new(),
        }
    }

    pub fn id(&self) -> SheetId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn name_key(&self) -> String {
        normalize_sheet_name(&self.name)
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// The whole sheet as a bounded zone.
    pub fn bounds(&self) -> Zone {
        Zone::new(0, 0, self.cols.saturating_sub(1), self.rows.saturating_sub(1))
    }

    pub fn contains(&self, col: usize, row: usize) -> bool {
        col < self.cols && row < self.rows
    }

    /// Deep copy under a new identity.
    pub fn duplicate(&self, id: SheetId, name: impl Into<String>) -> Sheet {
        Sheet { id, name: name.into(), ..self.clone() }
    }

    // =========================================================================
    // Cells
    // =========================================================================

    pub fn cell(&self, col: usize, row: usize) -> Option<&Cell> {
        self.cells.get(&(col, row))
    }

    pub fn cell_mut(&mut self, col: usize, row: usize) -> Option<&mut Cell> {
        self.cells.get_mut(&(col, row))
    }

    /// Store a cell, or drop the position when the cell is empty.
    /// Returns the previous cell.
    pub fn put_cell(&mut self, col: usize, row: usize, cell: Cell) -> Option<Cell> {
        if cell.is_empty() {
            self.cells.remove(&(col, row))
        } else {
            self.cells.insert((col, row), cell)
        }
    }

    pub fn take_cell(&mut self, col: usize, row: usize) -> Option<Cell> {
        self.cells.remove(&(col, row))
    }

    /// Replace content, keeping formatting.
    pub fn set_content(&mut self, col: usize, row: usize, content: CellContent) -> Option<Cell> {
        let mut cell = self.cell(col, row).cloned().unwrap_or_default();
        cell.content = content;
        self.put_cell(col, row, cell)
    }

    /// Write the cached value of a formula cell. No-op for other cells.
    pub fn set_formula_value(&mut self, col: usize, row: usize, value: Value) {
        if let Some(formula) = self.cells.get_mut(&(col, row)).and_then(|c| c.content.formula_mut()) {
            formula.value = value;
        }
    }

    pub fn value(&self, col: usize, row: usize) -> Value {
        self.cell(col, row).map(Cell::value).unwrap_or_default()
    }

    /// Non-empty positions, row-major.
    pub fn cells(&self) -> Vec<((usize, usize), &Cell)> {
        let mut cells: Vec<((usize, usize), &Cell)> = self.cells.iter().map(|(pos, cell)| (*pos, cell)).collect();
        cells.sort_by_key(|((col, row), _)| (*row, *col));
        cells
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Positions of formula cells, row-major.
    pub fn formula_positions(&self) -> Vec<(usize, usize)> {
        let mut positions: Vec<(usize, usize)> = self
            .cells
            .iter()
            .filter(|(_, cell)| cell.content.formula().is_some())
            .map(|(pos, _)| *pos)
            .collect();
        positions.sort_by_key(|(col, row)| (*row, *col));
        positions
    }

    /// Positions inside `zone` holding content.
    pub fn content_positions_in(&self, zone: &Zone) -> Vec<(usize, usize)> {
        let mut positions: Vec<(usize, usize)> = self
            .cells
            .iter()
            .filter(|((col, row), cell)| zone.contains(*col, *row) && !cell.content.is_empty())
            .map(|(pos, _)| *pos)
            .collect();
        positions.sort_by_key(|(col, row)| (*row, *col));
        positions
    }

    // =========================================================================
    // Headers
    // =========================================================================

    pub fn headers(&self, axis: Axis) -> &[Header] {
        match axis {
            Axis::Col => &self.col_headers,
            Axis::Row => &self.row_headers,
        }
    }

    fn headers_mut(&mut self, axis: Axis) -> &mut Vec<Header> {
        match axis {
            Axis::Col => &mut self.col_headers,
            Axis::Row => &mut self.row_headers,
        }
    }

    pub fn header(&self, axis: Axis, index: usize) -> Option<&Header> {
        self.headers(axis).get(index)
    }

    pub fn set_header_size(&mut self, axis: Axis, index: usize, size: u32) {
        if let Some(header) = self.headers_mut(axis).get_mut(index) {
            header.size = size;
        }
    }

    pub fn set_header_hidden(&mut self, axis: Axis, index: usize, hidden: bool) {
        if let Some(header) = self.headers_mut(axis).get_mut(index) {
            header.hidden = hidden;
        }
    }

    pub fn set_header(&mut self, axis: Axis, index: usize, value: Header) {
        if let Some(header) = self.headers_mut(axis).get_mut(index) {
            *header = value;
        }
    }

    /// Number of headers on `axis` that are not hidden.
    pub fn visible_count(&self, axis: Axis) -> usize {
        self.headers(axis).iter().filter(|h| !h.hidden).count()
    }

    pub fn axis_len(&self, axis: Axis) -> usize {
        match axis {
            Axis::Col => self.cols,
            Axis::Row => self.rows,
        }
    }

    // =========================================================================
    // Merges
    // =========================================================================

    pub fn merges(&self) -> impl Iterator<Item = (MergeId, &Zone)> {
        self.merges.iter().map(|(id, zone)| (*id, zone))
    }

    pub fn merge(&self, id: MergeId) -> Option<&Zone> {
        self.merges.get(&id)
    }

    pub fn merge_at(&self, col: usize, row: usize) -> Option<(MergeId, Zone)> {
        let id = *self.merge_index.get(&(col, row))?;
        self.merges.get(&id).map(|zone| (id, *zone))
    }

    /// Merges intersecting `zone`.
    pub fn merges_intersecting(&self, zone: &Zone) -> Vec<(MergeId, Zone)> {
        self.merges
            .iter()
            .filter(|(_, z)| z.intersects(zone))
            .map(|(id, z)| (*id, *z))
            .collect()
    }

    /// Position holding the content for `(col, row)`: the merge anchor for
    /// positions inside a merge, the position itself otherwise.
    pub fn anchor_of(&self, col: usize, row: usize) -> (usize, usize) {
        match self.merge_at(col, row) {
            Some((_, zone)) => (zone.left, zone.top),
            None => (col, row),
        }
    }

    pub fn is_merge_proxy(&self, col: usize, row: usize) -> bool {
        self.anchor_of(col, row) != (col, row)
    }

    /// Add a merge, clamped to the sheet. A zone that clamps to a single cell
    /// (or to nothing) is not a merge and yields `None`.
    pub fn add_merge(&mut self, zone: Zone) -> Option<MergeId> {
        let zone = zone.clamp_to(self.cols, self.rows)?;
        if zone.is_single_cell() {
            return None;
        }
        let id = MergeId(self.next_merge_id);
        self.next_merge_id += 1;
        for pos in zone.positions() {
            self.merge_index.insert(pos, id);
        }
        self.merges.insert(id, zone);
        Some(id)
    }

    /// Id the next merge will get.
    pub fn next_merge_id(&self) -> MergeId {
        MergeId(self.next_merge_id)
    }

    /// Put back a merge under a known id (undo/redo, snapshot import).
    pub fn restore_merge(&mut self, id: MergeId, zone: Zone) {
        if let Some(previous) = self.merges.insert(id, zone) {
            for pos in previous.positions() {
                self.merge_index.remove(&pos);
            }
        }
        for pos in zone.positions() {
            self.merge_index.insert(pos, id);
        }
        self.next_merge_id = self.next_merge_id.max(id.0 + 1);
    }

    pub fn remove_merge(&mut self, id: MergeId) -> Option<Zone> {
        let zone = self.merges.remove(&id)?;
        for pos in zone.positions() {
            self.merge_index.remove(&pos);
        }
        Some(zone)
    }

    fn rebuild_merge_index(&mut self) {
        self.merge_index.clear();
        for (id, zone) in &self.merges {
            for pos in zone.positions() {
                self.merge_index.insert(pos, *id);
            }
        }
    }

    // =========================================================================
    // Rules and tables
    // =========================================================================

    pub fn conditional_formats(&self) -> &[ConditionalFormat] {
        &self.conditional_formats
    }

    pub fn conditional_formats_mut(&mut self) -> &mut Vec<ConditionalFormat> {
        &mut self.conditional_formats
    }

    pub fn validations(&self) -> &[DataValidationRule] {
        &self.validations
    }

    pub fn validations_mut(&mut self) -> &mut Vec<DataValidationRule> {
        &mut self.validations
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn tables_mut(&mut self) -> &mut Vec<Table> {
        &mut self.tables
    }

    pub fn table_at(&self, col: usize, row: usize) -> Option<&Table> {
        self.tables.iter().find(|t| t.zone.contains(col, row))
    }

    // =========================================================================
    // Structural edits
    // =========================================================================

    /// Apply a row/column insertion or deletion to everything the sheet
    /// stores by position: cells, headers, merges, rules and tables.
    /// Formula references are rewritten separately by the adjuster.
    pub fn apply_grid_edit(&mut self, edit: &GridEdit, default_size: u32) {
        let axis = edit.axis();

        self.cells = std::mem::take(&mut self.cells)
            .into_iter()
            .filter_map(|((col, row), cell)| edit.map_position(col, row).map(|pos| (pos, cell)))
            .collect();

        match *edit {
            GridEdit::Insert { at, quantity, .. } => {
                let headers = self.headers_mut(axis);
                let at = at.min(headers.len());
                headers.splice(at..at, std::iter::repeat(Header::new(default_size)).take(quantity));
            }
            GridEdit::Delete { start, quantity, .. } => {
                let headers = self.headers_mut(axis);
                let end = (start + quantity).min(headers.len());
                headers.drain(start.min(end)..end);
            }
        }
        match axis {
            Axis::Col => self.cols = self.col_headers.len(),
            Axis::Row => self.rows = self.row_headers.len(),
        }

        // Merges shift like ranges; one that shrinks to a cell is gone.
        self.merges = std::mem::take(&mut self.merges)
            .into_iter()
            .filter_map(|(id, zone)| edit.adjust_zone(&zone).map(|z| (id, z)))
            .filter(|(_, zone)| !zone.is_single_cell())
            .collect();
        self.rebuild_merge_index();

        adjust_rules(&mut self.conditional_formats, edit);
        adjust_rules(&mut self.validations, edit);
        self.tables.retain_mut(|table| table.adjust(edit));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::StyleId;

    fn sheet() -> Sheet {
        Sheet::new(SheetId::from_raw(1), "Sheet1", 10, 10, 96, 23)
    }

    fn text(s: &str) -> CellContent {
        CellContent::Text(s.to_string())
    }

    #[test]
    fn test_sheet_name_rules() {
        assert!(is_valid_sheet_name("Sheet 2"));
        assert!(!is_valid_sheet_name(""));
        assert!(!is_valid_sheet_name(" padded"));
        assert!(!is_valid_sheet_name("a'b"));
        assert!(!is_valid_sheet_name("a!b"));
        assert!(!is_valid_sheet_name("a:b"));
        assert_eq!(normalize_sheet_name("Data"), normalize_sheet_name("DATA"));
    }

    #[test]
    fn test_empty_cells_are_dropped() {
        let mut s = sheet();
        s.set_content(1, 1, text("x"));
        assert_eq!(s.cell_count(), 1);
        s.set_content(1, 1, CellContent::Empty);
        assert_eq!(s.cell_count(), 0);
    }

    #[test]
    fn test_formatted_cell_survives_content_clear() {
        let mut s = sheet();
        s.put_cell(0, 0, Cell { style: Some(StyleId(0)), ..Cell::new(text("x")) });
        s.set_content(0, 0, CellContent::Empty);
        assert_eq!(s.cell(0, 0).and_then(|c| c.style), Some(StyleId(0)));
    }

    #[test]
    fn test_cells_are_row_major() {
        let mut s = sheet();
        s.set_content(1, 0, text("b"));
        s.set_content(0, 1, text("c"));
        s.set_content(0, 0, text("a"));
        let order: Vec<(usize, usize)> = s.cells().into_iter().map(|(pos, _)| pos).collect();
        assert_eq!(order, vec![(0, 0), (1, 0), (0, 1)]);
    }

    #[test]
    fn test_merge_is_clamped_to_sheet() {
        let mut s = sheet();
        let id = s.add_merge(Zone::new(8, 8, 20, 20)).unwrap();
        assert_eq!(s.merge(id), Some(&Zone::new(8, 8, 9, 9)));
        assert_eq!(s.anchor_of(9, 9), (8, 8));
        assert!(s.is_merge_proxy(9, 8));
        assert!(!s.is_merge_proxy(8, 8));
        // clamps to one cell: not a merge
        assert_eq!(s.add_merge(Zone::new(9, 9, 30, 9)), None);
    }

    #[test]
    fn test_remove_merge_clears_index() {
        let mut s = sheet();
        let id = s.add_merge(Zone::new(0, 0, 1, 0)).unwrap();
        assert!(s.merge_at(1, 0).is_some());
        s.remove_merge(id);
        assert!(s.merge_at(1, 0).is_none());
    }

    #[test]
    fn test_restore_merge_keeps_ids_fresh() {
        let mut s = sheet();
        s.restore_merge(MergeId(7), Zone::new(2, 2, 3, 3));
        assert_eq!(s.merge_at(3, 3).map(|(id, _)| id), Some(MergeId(7)));
        let next = s.add_merge(Zone::new(5, 5, 6, 5)).unwrap();
        assert_eq!(next, MergeId(8));
    }

    #[test]
    fn test_insert_rows_shifts_cells_headers_and_merges() {
        let mut s = sheet();
        s.set_content(0, 3, text("x"));
        s.set_header_size(Axis::Row, 3, 50);
        let id = s.add_merge(Zone::new(0, 2, 1, 4)).unwrap();

        s.apply_grid_edit(&GridEdit::insert(Axis::Row, 3, 2), 23);

        assert_eq!(s.rows(), 12);
        assert!(s.cell(0, 3).is_none());
        assert!(s.cell(0, 5).is_some());
        assert_eq!(s.header(Axis::Row, 5).map(|h| h.size), Some(50));
        assert_eq!(s.header(Axis::Row, 3).map(|h| h.size), Some(23));
        assert_eq!(s.merge(id), Some(&Zone::new(0, 2, 1, 6)));
    }

    #[test]
    fn test_delete_columns_drops_cells_and_degenerate_merges() {
        let mut s = sheet();
        s.set_content(1, 0, text("gone"));
        s.set_content(3, 0, text("kept"));
        let small = s.add_merge(Zone::new(0, 5, 1, 5)).unwrap();
        let wide = s.add_merge(Zone::new(0, 7, 3, 7)).unwrap();

        s.apply_grid_edit(&GridEdit::delete(Axis::Col, 1, 1), 96);

        assert_eq!(s.cols(), 9);
        assert!(s.cell(1, 0).is_none());
        assert_eq!(s.cell(2, 0).map(|c| c.content.raw_display()), Some("kept".to_string()));
        assert_eq!(s.merge(small), None);
        assert!(s.merge_at(0, 5).is_none());
        assert_eq!(s.merge(wide), Some(&Zone::new(0, 7, 2, 7)));
    }

    #[test]
    fn test_duplicate_is_deep() {
        let mut s = sheet();
        s.set_content(0, 0, text("a"));
        let mut copy = s.duplicate(SheetId::from_raw(2), "Copy");
        copy.set_content(0, 0, text("b"));
        assert_eq!(s.value(0, 0), Value::Text("a".into()));
        assert_eq!(copy.value(0, 0), Value::Text("b".into()));
        assert_eq!(copy.id(), SheetId::from_raw(2));
        assert_eq!(copy.name_key(), "copy");
    }
}
