use serde::{Deserialize, Serialize};

use crate::xc;

/// A rectangular region of a sheet.
///
/// Bounds are inclusive and 0-based. `right`/`bottom` are `None` when the
/// zone is unbounded on that side: `A:A` has `bottom == None`, `3:3` has
/// `right == None`. A zone is a plain value; it is never tied to a sheet.
///
/// Serialized as A1 text (`"B2:D9"`, `"A:A"`, `"3:3"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Zone {
    pub left: usize,
    pub top: usize,
    pub right: Option<usize>,
    pub bottom: Option<usize>,
}

impl Zone {
    /// Bounded zone; corners are normalized so left <= right and top <= bottom.
    pub fn new(left: usize, top: usize, right: usize, bottom: usize) -> Self {
        Self {
            left: left.min(right),
            top: top.min(bottom),
            right: Some(left.max(right)),
            bottom: Some(top.max(bottom)),
        }
    }

    pub fn cell(col: usize, row: usize) -> Self {
        Self::new(col, row, col, row)
    }

    /// Whole columns `left..=right` (e.g. `B:D`).
    pub fn columns(left: usize, right: usize) -> Self {
        Self {
            left: left.min(right),
            top: 0,
            right: Some(left.max(right)),
            bottom: None,
        }
    }

    /// Whole rows `top..=bottom` (e.g. `3:5`).
    pub fn rows(top: usize, bottom: usize) -> Self {
        Self {
            left: 0,
            top: top.min(bottom),
            right: None,
            bottom: Some(top.max(bottom)),
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.right.is_some() && self.bottom.is_some()
    }

    pub fn is_full_columns(&self) -> bool {
        self.bottom.is_none()
    }

    pub fn is_full_rows(&self) -> bool {
        self.right.is_none()
    }

    pub fn is_single_cell(&self) -> bool {
        self.right == Some(self.left) && self.bottom == Some(self.top)
    }

    #[inline]
    pub fn right_or(&self, last_col: usize) -> usize {
        self.right.unwrap_or(last_col)
    }

    #[inline]
    pub fn bottom_or(&self, last_row: usize) -> usize {
        self.bottom.unwrap_or(last_row)
    }

    pub fn contains(&self, col: usize, row: usize) -> bool {
        col >= self.left
            && row >= self.top
            && self.right.map_or(true, |r| col <= r)
            && self.bottom.map_or(true, |b| row <= b)
    }

    /// True if every position of `other` is inside `self`.
    pub fn contains_zone(&self, other: &Zone) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && match (self.right, other.right) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(a), Some(b)) => b <= a,
            }
            && match (self.bottom, other.bottom) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(a), Some(b)) => b <= a,
            }
    }

    pub fn intersects(&self, other: &Zone) -> bool {
        let cols = self.right.map_or(true, |r| other.left <= r)
            && other.right.map_or(true, |r| self.left <= r);
        let rows = self.bottom.map_or(true, |b| other.top <= b)
            && other.bottom.map_or(true, |b| self.top <= b);
        cols && rows
    }

    /// Resolve against sheet dimensions. Returns `None` when the zone lies
    /// entirely outside the sheet.
    pub fn clamp_to(&self, cols: usize, rows: usize) -> Option<Zone> {
        if cols == 0 || rows == 0 || self.left >= cols || self.top >= rows {
            return None;
        }
        Some(Zone::new(
            self.left,
            self.top,
            self.right_or(cols - 1).min(cols - 1),
            self.bottom_or(rows - 1).min(rows - 1),
        ))
    }

    /// True if the zone, bounded or not, fits in a `cols` x `rows` sheet.
    pub fn is_inside(&self, cols: usize, rows: usize) -> bool {
        self.left < cols
            && self.top < rows
            && self.right.map_or(true, |r| r < cols)
            && self.bottom.map_or(true, |b| b < rows)
    }

    /// Width of a bounded zone.
    pub fn width(&self) -> Option<usize> {
        self.right.map(|r| r - self.left + 1)
    }

    /// Height of a bounded zone.
    pub fn height(&self) -> Option<usize> {
        self.bottom.map(|b| b - self.top + 1)
    }

    /// Smallest zone covering both.
    pub fn union(&self, other: &Zone) -> Zone {
        Zone {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: match (self.right, other.right) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            },
            bottom: match (self.bottom, other.bottom) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            },
        }
    }

    /// Positions `(col, row)` of a bounded zone in row-major order.
    /// Unbounded zones must be clamped first; they yield nothing here.
    pub fn positions(&self) -> impl Iterator<Item = (usize, usize)> {
        let left = self.left;
        let (right, bottom) = match (self.right, self.bottom) {
            (Some(r), Some(b)) => (r, b),
            _ => (0, 0),
        };
        let rows = if self.is_bounded() { self.top..=bottom } else { 1..=0 };
        rows.flat_map(move |row| (left..=right).map(move |col| (col, row)))
    }

    /// Collapse a list of zones into one rectangle, if they tile one exactly.
    ///
    /// Used to reject multi-zone targets that do not describe a single
    /// continuous block.
    pub fn merge_contiguous(zones: &[Zone]) -> Option<Zone> {
        let mut pending: Vec<Zone> = zones.to_vec();
        let mut merged = pending.pop()?;
        loop {
            let before = pending.len();
            pending.retain(|z| {
                if merged.contains_zone(z) {
                    return false;
                }
                if z.contains_zone(&merged) {
                    merged = *z;
                    return false;
                }
                let same_cols = z.left == merged.left && z.right == merged.right;
                let same_rows = z.top == merged.top && z.bottom == merged.bottom;
                let touches_rows = match (merged.bottom, z.bottom) {
                    (Some(mb), Some(zb)) => z.top <= mb + 1 && merged.top <= zb + 1,
                    _ => false,
                };
                let touches_cols = match (merged.right, z.right) {
                    (Some(mr), Some(zr)) => z.left <= mr + 1 && merged.left <= zr + 1,
                    _ => false,
                };
                if (same_cols && touches_rows) || (same_rows && touches_cols) {
                    merged = merged.union(z);
                    false
                } else {
                    true
                }
            });
            if pending.is_empty() {
                return Some(merged);
            }
            if pending.len() == before {
                return None;
            }
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&xc::zone_to_xc(self))
    }
}

impl std::str::FromStr for Zone {
    type Err = xc::XcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        xc::parse_zone(s)
    }
}

impl TryFrom<String> for Zone {
    type Error = xc::XcError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        xc::parse_zone(&s)
    }
}

impl From<Zone> for String {
    fn from(zone: Zone) -> String {
        xc::zone_to_xc(&zone)
    }
}
