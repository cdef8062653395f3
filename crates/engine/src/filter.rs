//! Tables and column filters.
//!
//! A table is a bounded zone, optionally with a header row. Each column can
//! carry a filter: a set of hidden values. A data row is filtered out when
//! any column filter hides the value in that row.
//!
//! Matching is done on [`NormalizedFilterKey`], derived from the cell's
//! evaluated value, never from its display text:
//! - text compares trimmed and case-insensitively
//! - numbers compare by value (`1` and `1.0` are the same key)
//! - blanks are written `(Blanks)` in filter values

use std::collections::BTreeMap;

use cellgraph_core::{Axis, GridEdit, Zone};
use ordered_float::OrderedFloat;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::formula::{ErrorKind, Value};

pub const BLANKS_LABEL: &str = "(Blanks)";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColumnFilter {
    /// Values hidden by this filter, as typed by the user.
    pub hidden_values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub zone: Zone,
    pub has_header: bool,
    /// Column offset within the table -> filter
    #[serde(default)]
    pub filters: BTreeMap<usize, ColumnFilter>,
}

impl Table {
    pub fn new(zone: Zone, has_header: bool) -> Self {
        Self { zone, has_header, filters: BTreeMap::new() }
    }

    /// Rows holding data (the header row excluded).
    pub fn data_rows(&self) -> std::ops::RangeInclusive<usize> {
        let first = self.zone.top + usize::from(self.has_header);
        first..=self.zone.bottom_or(self.zone.top)
    }

    /// Rows hidden by the filters, given a way to read evaluated values.
    pub fn filtered_rows<F>(&self, value_at: F) -> Vec<usize>
    where
        F: Fn(usize, usize) -> Value,
    {
        let active: Vec<(usize, FxHashSet<NormalizedFilterKey>)> = self
            .filters
            .iter()
            .filter(|(_, f)| !f.hidden_values.is_empty())
            .map(|(offset, f)| {
                let keys = f.hidden_values.iter().map(|v| NormalizedFilterKey::parse(v)).collect();
                (self.zone.left + offset, keys)
            })
            .collect();
        if active.is_empty() {
            return Vec::new();
        }

        self.data_rows()
            .filter(|row| {
                active.iter().any(|(col, hidden)| {
                    let key = FilterKey::from_value(&value_at(*col, *row)).normalized();
                    hidden.contains(&key)
                })
            })
            .collect()
    }

    /// Follow a row/column edit. `false` when the table was entirely deleted.
    pub fn adjust(&mut self, edit: &GridEdit) -> bool {
        let Some(zone) = edit.adjust_zone(&self.zone) else {
            return false;
        };
        if edit.axis() == Axis::Col {
            let left = self.zone.left;
            self.filters = std::mem::take(&mut self.filters)
                .into_iter()
                .filter_map(|(offset, filter)| {
                    let col = edit.map_index(left + offset)?;
                    Some((col.checked_sub(zone.left)?, filter))
                })
                .collect();
        }
        self.zone = zone;
        true
    }
}

// =============================================================================
// FilterKey: Typed key for filter comparison
// =============================================================================

/// Typed key for filter comparison.
/// Stores RAW values; use normalized() for comparison
#[derive(Debug, Clone)]
pub enum FilterKey {
    Blank,
    Error(ErrorKind),
    Bool(bool),
    Number(OrderedFloat<f64>),
    Text(String),
}

impl FilterKey {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Empty => FilterKey::Blank,
            Value::Number(n) => FilterKey::Number(OrderedFloat(*n)),
            Value::Text(s) if s.trim().is_empty() => FilterKey::Blank,
            Value::Text(s) => FilterKey::Text(s.clone()),
            Value::Boolean(b) => FilterKey::Bool(*b),
            Value::Error(e) => FilterKey::Error(e.kind),
        }
    }

    pub fn normalized(&self) -> NormalizedFilterKey {
        match self {
            FilterKey::Blank => NormalizedFilterKey::Blank,
            FilterKey::Error(e) => NormalizedFilterKey::Error(*e),
            FilterKey::Bool(b) => NormalizedFilterKey::Bool(*b),
            FilterKey::Number(n) => NormalizedFilterKey::Number(*n),
            FilterKey::Text(s) => NormalizedFilterKey::Text(s.trim().to_lowercase()),
        }
    }

    /// Label offered in a filter menu
    pub fn display_string(&self) -> String {
        match self {
            FilterKey::Blank => BLANKS_LABEL.to_string(),
            FilterKey::Error(e) => e.code().to_string(),
            FilterKey::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            FilterKey::Number(n) => Value::Number(n.0).to_text(),
            FilterKey::Text(s) => s.clone(),
        }
    }
}

/// Normalized key for comparison/hashing (used in filter sets)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NormalizedFilterKey {
    Blank,
    Error(ErrorKind),
    Bool(bool),
    Number(OrderedFloat<f64>),
    /// Trimmed + lowercase
    Text(String),
}

impl NormalizedFilterKey {
    /// Key for a filter value typed by the user.
    pub fn parse(label: &str) -> Self {
        let trimmed = label.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(BLANKS_LABEL) {
            return NormalizedFilterKey::Blank;
        }
        if let Ok(n) = trimmed.parse::<f64>() {
            return NormalizedFilterKey::Number(OrderedFloat(n));
        }
        if trimmed.eq_ignore_ascii_case("TRUE") {
            return NormalizedFilterKey::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("FALSE") {
            return NormalizedFilterKey::Bool(false);
        }
        let error = [
            ErrorKind::BadExpression,
            ErrorKind::Cycle,
            ErrorKind::Error,
            ErrorKind::InvalidReference,
            ErrorKind::NotAvailable,
        ]
        .into_iter()
        .find(|k| k.code().eq_ignore_ascii_case(trimmed));
        match error {
            Some(kind) => NormalizedFilterKey::Error(kind),
            None => NormalizedFilterKey::Text(trimmed.to_lowercase()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    fn values(cells: &[((usize, usize), Value)]) -> impl Fn(usize, usize) -> Value {
        let map: FxHashMap<(usize, usize), Value> = cells.iter().cloned().collect();
        move |col, row| map.get(&(col, row)).cloned().unwrap_or_default()
    }

    #[test]
    fn test_normalized_keys() {
        assert_eq!(FilterKey::from_value(&Value::Text("  Apple ".into())).normalized(), NormalizedFilterKey::parse("apple"));
        assert_eq!(FilterKey::from_value(&Value::Number(1.0)).normalized(), NormalizedFilterKey::parse("1.0"));
        assert_eq!(FilterKey::from_value(&Value::Empty).normalized(), NormalizedFilterKey::parse("(Blanks)"));
        assert_eq!(NormalizedFilterKey::parse("#ref"), NormalizedFilterKey::Error(ErrorKind::InvalidReference));
    }

    #[test]
    fn test_filtered_rows_skip_header() {
        let mut table = Table::new(Zone::new(0, 0, 1, 3), true);
        table.filters.insert(1, ColumnFilter { hidden_values: vec!["x".into()] });
        let lookup = values(&[
            ((1, 0), Value::Text("x".into())), // header, never filtered
            ((1, 1), Value::Text("X".into())),
            ((1, 2), Value::Text("y".into())),
        ]);
        assert_eq!(table.filtered_rows(lookup), vec![1]);
    }

    #[test]
    fn test_blank_filter() {
        let mut table = Table::new(Zone::new(0, 0, 0, 2), false);
        table.filters.insert(0, ColumnFilter { hidden_values: vec![BLANKS_LABEL.into()] });
        let lookup = values(&[((0, 1), Value::Number(3.0))]);
        assert_eq!(table.filtered_rows(lookup), vec![0, 2]);
    }

    #[test]
    fn test_adjust_moves_filters_with_columns() {
        let mut table = Table::new(Zone::new(1, 0, 3, 5), true);
        table.filters.insert(2, ColumnFilter { hidden_values: vec!["a".into()] });
        table.filters.insert(0, ColumnFilter { hidden_values: vec!["b".into()] });

        // delete column B: the table's first column
        assert!(table.adjust(&GridEdit::delete(Axis::Col, 1, 1)));
        assert_eq!(table.zone, Zone::new(1, 0, 2, 5));
        assert_eq!(table.filters.keys().copied().collect::<Vec<_>>(), vec![1]);

        assert!(!table.adjust(&GridEdit::delete(Axis::Col, 0, 10)));
    }
}
