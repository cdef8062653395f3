//! Cell identity for dependency graph.
//!
//! A `CellId` uniquely identifies a cell position across all sheets in a
//! workbook.

use cellgraph_core::xc::cell_xc;
use cellgraph_core::SheetId;

/// Unique identifier for a cell in a workbook.
///
/// Combines sheet identity with column/row coordinates. Used as graph nodes
/// in the dependency graph and as keys of the per-pass evaluation state.
/// Ordering is (sheet, row, col), which is the deterministic traversal order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CellId {
    /// The sheet this cell belongs to (stable, never reused after deletion)
    pub sheet: SheetId,
    /// Column index (0-based)
    pub col: usize,
    /// Row index (0-based)
    pub row: usize,
}

impl CellId {
    #[inline]
    pub fn new(sheet: SheetId, col: usize, row: usize) -> Self {
        Self { sheet, col, row }
    }
}

impl Ord for CellId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sheet
            .cmp(&other.sheet)
            .then(self.row.cmp(&other.row))
            .then(self.col.cmp(&other.col))
    }
}

impl PartialOrd for CellId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sheet{}!{}", self.sheet.raw(), cell_xc(self.col, self.row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_id_equality() {
        let a = CellId::new(SheetId::from_raw(1), 0, 0);
        let b = CellId::new(SheetId::from_raw(1), 0, 0);
        let c = CellId::new(SheetId::from_raw(2), 0, 0);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_cell_id_display() {
        assert_eq!(CellId::new(SheetId::from_raw(1), 0, 0).to_string(), "Sheet1!A1");
        assert_eq!(CellId::new(SheetId::from_raw(3), 27, 9).to_string(), "Sheet3!AB10");
    }

    #[test]
    fn test_cell_id_order_is_row_major() {
        let s = SheetId::from_raw(1);
        let mut cells = vec![CellId::new(s, 0, 1), CellId::new(s, 1, 0), CellId::new(s, 0, 0)];
        cells.sort();
        assert_eq!(cells, vec![CellId::new(s, 0, 0), CellId::new(s, 1, 0), CellId::new(s, 0, 1)]);
    }
}
