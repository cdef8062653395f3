//! Row/column shift arithmetic.
//!
//! Insertion of `q` elements at index `i` moves every bound `>= i` by `+q`.
//! Deletion of `start..start+q` moves bounds after the block by `-q` and
//! clamps bounds inside the block to its edges; a zone with nothing left
//! collapses to `None`. Zones unbounded along the edited axis are left
//! alone.

use serde::{Deserialize, Serialize};

use crate::zone::Zone;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    #[serde(alias = "COL")]
    Col,
    #[serde(alias = "ROW")]
    Row,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridEdit {
    Insert { axis: Axis, at: usize, quantity: usize },
    Delete { axis: Axis, start: usize, quantity: usize },
}

impl GridEdit {
    pub fn insert(axis: Axis, at: usize, quantity: usize) -> Self {
        GridEdit::Insert { axis, at, quantity }
    }

    pub fn delete(axis: Axis, start: usize, quantity: usize) -> Self {
        GridEdit::Delete { axis, start, quantity }
    }

    pub fn axis(&self) -> Axis {
        match self {
            GridEdit::Insert { axis, .. } | GridEdit::Delete { axis, .. } => *axis,
        }
    }

    /// New index of a single row/column, `None` if it was deleted.
    pub fn map_index(&self, index: usize) -> Option<usize> {
        match *self {
            GridEdit::Insert { at, quantity, .. } => {
                Some(if index >= at { index.saturating_add(quantity) } else { index })
            }
            GridEdit::Delete { start, quantity, .. } => {
                if index < start {
                    Some(index)
                } else if index >= start.saturating_add(quantity) {
                    Some(index - quantity)
                } else {
                    None
                }
            }
        }
    }

    /// New position of a cell, `None` if its row/column was deleted.
    pub fn map_position(&self, col: usize, row: usize) -> Option<(usize, usize)> {
        match self.axis() {
            Axis::Col => self.map_index(col).map(|c| (c, row)),
            Axis::Row => self.map_index(row).map(|r| (col, r)),
        }
    }

    /// Shift a `lo..=hi` span. `None` when a deletion swallows it.
    fn adjust_span(&self, lo: usize, hi: usize) -> Option<(usize, usize)> {
        match *self {
            GridEdit::Insert { .. } => {
                let lo = self.map_index(lo)?;
                let hi = self.map_index(hi)?;
                Some((lo, hi))
            }
            GridEdit::Delete { start, quantity, .. } => {
                let end = start.saturating_add(quantity);
                let new_lo = if lo < start {
                    lo
                } else if lo >= end {
                    lo - quantity
                } else {
                    start
                };
                let new_hi = if hi < start {
                    hi
                } else if hi >= end {
                    hi - quantity
                } else if start == 0 {
                    return None;
                } else {
                    start - 1
                };
                (new_lo <= new_hi).then_some((new_lo, new_hi))
            }
        }
    }

    /// Apply the edit to a zone.
    pub fn adjust_zone(&self, zone: &Zone) -> Option<Zone> {
        match self.axis() {
            Axis::Col => {
                // Row ranges (`3:3`) span every column.
                let Some(right) = zone.right else {
                    return Some(*zone);
                };
                let (left, right) = self.adjust_span(zone.left, right)?;
                Some(Zone { left, right: Some(right), ..*zone })
            }
            Axis::Row => {
                // Column ranges (`A:A`) span every row.
                let Some(bottom) = zone.bottom else {
                    return Some(*zone);
                };
                let (top, bottom) = self.adjust_span(zone.top, bottom)?;
                Some(Zone { top, bottom: Some(bottom), ..*zone })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn z(s: &str) -> Zone {
        s.parse().unwrap()
    }

    fn ins_rows(at: usize, q: usize) -> GridEdit {
        GridEdit::insert(Axis::Row, at, q)
    }

    fn del_rows(start: usize, q: usize) -> GridEdit {
        GridEdit::delete(Axis::Row, start, q)
    }

    fn del_cols(start: usize, q: usize) -> GridEdit {
        GridEdit::delete(Axis::Col, start, q)
    }

    #[test]
    fn test_insert_before_shifts() {
        assert_eq!(ins_rows(0, 2).adjust_zone(&z("A1:B3")), Some(z("A3:B5")));
    }

    #[test]
    fn test_insert_after_untouched() {
        assert_eq!(ins_rows(5, 2).adjust_zone(&z("A1:B3")), Some(z("A1:B3")));
    }

    #[test]
    fn test_insert_inside_expands() {
        assert_eq!(ins_rows(1, 2).adjust_zone(&z("A1:A3")), Some(z("A1:A5")));
    }

    #[test]
    fn test_delete_before_shifts_up() {
        assert_eq!(del_rows(0, 1).adjust_zone(&z("A3:A4")), Some(z("A2:A3")));
    }

    #[test]
    fn test_delete_straddling_contracts() {
        // rows 2..=3 deleted out of 1..=5
        assert_eq!(del_rows(1, 2).adjust_zone(&z("A1:A5")), Some(z("A1:A3")));
        // top inside the deleted block
        assert_eq!(del_rows(0, 2).adjust_zone(&z("A2:A5")), Some(z("A1:A3")));
        // bottom inside the deleted block
        assert_eq!(del_rows(3, 5).adjust_zone(&z("A1:A5")), Some(z("A1:A3")));
    }

    #[test]
    fn test_delete_swallows() {
        assert_eq!(del_rows(0, 1).adjust_zone(&z("A1")), None);
        assert_eq!(del_rows(2, 3).adjust_zone(&z("B3:C5")), None);
        assert_eq!(del_cols(1, 2).adjust_zone(&z("B1:C1")), None);
        assert_eq!(del_rows(2, 1).adjust_zone(&z("3:3")), None);
    }

    #[test]
    fn test_unbounded_axis_ignored() {
        assert_eq!(del_rows(0, 3).adjust_zone(&z("A:A")), Some(z("A:A")));
        assert_eq!(ins_rows(0, 3).adjust_zone(&z("B:C")), Some(z("B:C")));
        assert_eq!(del_cols(0, 1).adjust_zone(&z("2:4")), Some(z("2:4")));
        // the orthogonal axis still moves
        assert_eq!(del_cols(0, 1).adjust_zone(&z("B:C")), Some(z("A:B")));
        assert_eq!(ins_rows(0, 1).adjust_zone(&z("2:4")), Some(z("3:5")));
    }

    #[test]
    fn test_map_index() {
        let ins = ins_rows(3, 2);
        assert_eq!(ins.map_index(2), Some(2));
        assert_eq!(ins.map_index(3), Some(5));
        let del = del_rows(3, 2);
        assert_eq!(del.map_index(2), Some(2));
        assert_eq!(del.map_index(3), None);
        assert_eq!(del.map_index(4), None);
        assert_eq!(del.map_index(5), Some(3));
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn arb_zone() -> impl Strategy<Value = Zone> {
            (0..12usize, 0..12usize, 0..5usize, 0..5usize).prop_map(|(l, t, w, h)| Zone::new(l, t, l + w, t + h))
        }

        fn arb_axis() -> impl Strategy<Value = Axis> {
            prop_oneof![Just(Axis::Col), Just(Axis::Row)]
        }

        proptest! {
            #[test]
            fn prop_surviving_cells_stay_inside(zone in arb_zone(), axis in arb_axis(), at in 0..16usize, q in 1..4usize, insert in any::<bool>()) {
                let edit = if insert { GridEdit::insert(axis, at, q) } else { GridEdit::delete(axis, at, q) };
                let survivors: Vec<(usize, usize)> = zone
                    .positions()
                    .filter_map(|(col, row)| edit.map_position(col, row))
                    .collect();
                match edit.adjust_zone(&zone) {
                    Some(adjusted) => {
                        for &(col, row) in &survivors {
                            prop_assert!(adjusted.contains(col, row));
                        }
                        if !insert {
                            prop_assert_eq!(adjusted.positions().count(), survivors.len());
                        }
                    }
                    None => prop_assert!(survivors.is_empty()),
                }
            }

            #[test]
            fn prop_insert_then_delete_restores(zone in arb_zone(), axis in arb_axis(), at in 0..16usize, q in 1..4usize) {
                let inserted = GridEdit::insert(axis, at, q).adjust_zone(&zone);
                prop_assert!(inserted.is_some());
                let restored = inserted.and_then(|z| GridEdit::delete(axis, at, q).adjust_zone(&z));
                prop_assert_eq!(restored, Some(zone));
            }
        }
    }
}
