//! Formula references.
//!
//! A [`Reference`] is one occurrence of a cell or range inside a formula. It
//! is generic over the sheet qualifier, mirroring the two phases a formula
//! goes through:
//! - parsed: `Reference<UnboundSheetRef>` (sheet names as typed)
//! - bound: `Reference<SheetRef>` (names resolved to stable ids)

use serde::{Deserialize, Serialize};

use crate::adjust::GridEdit;
use crate::sheet_id::SheetId;
use crate::xc::col_to_letters;
use crate::zone::Zone;

/// Sheet qualifier as written in the formula text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UnboundSheetRef {
    /// No qualifier: the sheet that owns the formula.
    Current,
    /// `Name!A1` or `'Quoted Name'!A1`
    Named(String),
}

/// Sheet qualifier resolved against a workbook.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SheetRef {
    Current,
    Id(SheetId),
    /// Qualified with a name that matches no sheet. Kept so the reference can
    /// bind once a sheet with that name is created or renamed into place.
    Missing(String),
}

impl SheetRef {
    /// The sheet this qualifier points at, given the owning sheet.
    pub fn resolve(&self, current: SheetId) -> Option<SheetId> {
        match self {
            SheetRef::Current => Some(current),
            SheetRef::Id(id) => Some(*id),
            SheetRef::Missing(_) => None,
        }
    }

    pub fn is_explicit(&self) -> bool {
        !matches!(self, SheetRef::Current)
    }
}

/// Absolute (`$`) markers for each of the four bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AbsFlags {
    pub left: bool,
    pub top: bool,
    pub right: bool,
    pub bottom: bool,
}

impl AbsFlags {
    pub fn all() -> Self {
        Self { left: true, top: true, right: true, bottom: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference<S> {
    pub sheet: S,
    pub zone: Zone,
    pub abs: AbsFlags,
    /// Written with a colon. `A1:A1` stays a range when rendered.
    pub is_range: bool,
}

impl<S> Reference<S> {
    pub fn cell(sheet: S, col: usize, row: usize, col_abs: bool, row_abs: bool) -> Self {
        Self {
            sheet,
            zone: Zone::cell(col, row),
            abs: AbsFlags { left: col_abs, top: row_abs, right: col_abs, bottom: row_abs },
            is_range: false,
        }
    }

    pub fn range(sheet: S, zone: Zone, abs: AbsFlags) -> Self {
        Self { sheet, zone, abs, is_range: true }
    }

    pub fn map_sheet<T>(self, f: impl FnOnce(S) -> T) -> Reference<T> {
        Reference {
            sheet: f(self.sheet),
            zone: self.zone,
            abs: self.abs,
            is_range: self.is_range,
        }
    }

    /// Single position (not a range and not unbounded).
    pub fn is_single_cell(&self) -> bool {
        !self.is_range && self.zone.is_single_cell()
    }

    /// Render the address part (no sheet prefix), keeping `$` markers.
    pub fn render_address(&self) -> String {
        let z = &self.zone;
        let col = |c: usize, abs: bool| format!("{}{}", if abs { "$" } else { "" }, col_to_letters(c));
        let row = |r: usize, abs: bool| format!("{}{}", if abs { "$" } else { "" }, r + 1);
        match (z.right, z.bottom) {
            (Some(r), Some(b)) => {
                let start = format!("{}{}", col(z.left, self.abs.left), row(z.top, self.abs.top));
                if !self.is_range && r == z.left && b == z.top {
                    start
                } else {
                    format!("{}:{}{}", start, col(r, self.abs.right), row(b, self.abs.bottom))
                }
            }
            (Some(r), None) => format!("{}:{}", col(z.left, self.abs.left), col(r, self.abs.right)),
            (None, Some(b)) => format!("{}:{}", row(z.top, self.abs.top), row(b, self.abs.bottom)),
            (None, None) => format!("{}:{}", col(z.left, self.abs.left), col(z.left, self.abs.right)),
        }
    }
}

impl<S: Clone> Reference<S> {
    /// Apply a row/column edit to this reference. `None` means the reference
    /// was entirely consumed by a deletion.
    pub fn adjusted(&self, edit: &GridEdit) -> Option<Reference<S>> {
        let zone = edit.adjust_zone(&self.zone)?;
        Some(Reference {
            sheet: self.sheet.clone(),
            zone,
            abs: self.abs,
            is_range: self.is_range,
        })
    }
}

impl Reference<SheetRef> {
    /// Sheet the reference targets, or `None` for a missing sheet.
    pub fn target_sheet(&self, current: SheetId) -> Option<SheetId> {
        self.sheet.resolve(current)
    }
}

/// An entry in a compiled formula's reference table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RefSlot<S> {
    Valid(Reference<S>),
    /// Destroyed by a structural edit (or typed as `#REF`).
    Invalid,
}

impl<S> RefSlot<S> {
    pub fn as_valid(&self) -> Option<&Reference<S>> {
        match self {
            RefSlot::Valid(r) => Some(r),
            RefSlot::Invalid => None,
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, RefSlot::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjust::Axis;

    #[test]
    fn test_render_cell_flags() {
        let r = Reference::cell((), 0, 0, true, false);
        assert_eq!(r.render_address(), "$A1");
        let r = Reference::cell((), 27, 9, false, true);
        assert_eq!(r.render_address(), "AB$10");
    }

    #[test]
    fn test_render_ranges() {
        let r = Reference::range((), Zone::new(1, 0, 2, 4), AbsFlags { left: true, top: true, right: false, bottom: false });
        assert_eq!(r.render_address(), "$B$1:C5");
        let r = Reference::range((), Zone::columns(0, 0), AbsFlags::default());
        assert_eq!(r.render_address(), "A:A");
        let r = Reference::range((), Zone::rows(2, 2), AbsFlags::all());
        assert_eq!(r.render_address(), "$3:$3");
        let r = Reference::range((), Zone::cell(0, 0), AbsFlags::default());
        assert_eq!(r.render_address(), "A1:A1");
    }

    #[test]
    fn test_adjusted_keeps_sheet_and_flags() {
        let r = Reference::cell(SheetRef::Id(SheetId(3)), 1, 4, true, true);
        let shifted = r.adjusted(&GridEdit::insert(Axis::Row, 2, 3)).unwrap();
        assert_eq!(shifted.zone, Zone::cell(1, 7));
        assert_eq!(shifted.sheet, SheetRef::Id(SheetId(3)));
        assert!(shifted.abs.left && shifted.abs.top);
    }

    #[test]
    fn test_sheet_ref_resolve() {
        assert_eq!(SheetRef::Current.resolve(SheetId(1)), Some(SheetId(1)));
        assert_eq!(SheetRef::Id(SheetId(2)).resolve(SheetId(1)), Some(SheetId(2)));
        assert_eq!(SheetRef::Missing("Gone".into()).resolve(SheetId(1)), None);
    }
}
