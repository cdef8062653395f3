//! Conditional formats and data validation rules.
//!
//! Both kinds of rule pair a set of target zones with a [`Criterion`]. The
//! criterion kinds form a closed registry: each kind knows how many values it
//! takes and whether those values must be numeric, which is what command
//! validation checks before a rule is stored.
//!
//! Rules never store cell values. They are evaluated on demand against the
//! evaluated value of a cell, so they always agree with the engine.

use cellgraph_core::{GridEdit, Zone};
use serde::{Deserialize, Serialize};

use crate::error::Rejection;
use crate::formula::Value;
use crate::style::Style;

// ============================================================================
// Criterion registry
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CriterionKind {
    IsEqual,
    IsNotEqual,
    IsGreaterThan,
    IsGreaterOrEqualTo,
    IsLessThan,
    IsLessOrEqualTo,
    IsBetween,
    IsNotBetween,
    ContainsText,
    NotContainsText,
    IsEmpty,
    IsNotEmpty,
    IsNumber,
    IsValueInList,
}

/// How many values a criterion kind expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueCount {
    Exactly(usize),
    AtLeast(usize),
}

impl ValueCount {
    fn accepts(self, n: usize) -> bool {
        match self {
            ValueCount::Exactly(k) => n == k,
            ValueCount::AtLeast(k) => n >= k,
        }
    }
}

const CRITERIA: &[(&str, CriterionKind)] = &[
    ("isEqual", CriterionKind::IsEqual),
    ("isNotEqual", CriterionKind::IsNotEqual),
    ("isGreaterThan", CriterionKind::IsGreaterThan),
    ("isGreaterOrEqualTo", CriterionKind::IsGreaterOrEqualTo),
    ("isLessThan", CriterionKind::IsLessThan),
    ("isLessOrEqualTo", CriterionKind::IsLessOrEqualTo),
    ("isBetween", CriterionKind::IsBetween),
    ("isNotBetween", CriterionKind::IsNotBetween),
    ("containsText", CriterionKind::ContainsText),
    ("notContainsText", CriterionKind::NotContainsText),
    ("isEmpty", CriterionKind::IsEmpty),
    ("isNotEmpty", CriterionKind::IsNotEmpty),
    ("isNumber", CriterionKind::IsNumber),
    ("isValueInList", CriterionKind::IsValueInList),
];

impl CriterionKind {
    pub fn from_name(name: &str) -> Option<Self> {
        CRITERIA.iter().find(|(n, _)| *n == name).map(|(_, kind)| *kind)
    }

    pub fn name(self) -> &'static str {
        CRITERIA
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(n, _)| *n)
            .unwrap_or("unknown")
    }

    pub fn value_count(self) -> ValueCount {
        use CriterionKind::*;
        match self {
            IsEmpty | IsNotEmpty | IsNumber => ValueCount::Exactly(0),
            IsBetween | IsNotBetween => ValueCount::Exactly(2),
            IsValueInList => ValueCount::AtLeast(1),
            _ => ValueCount::Exactly(1),
        }
    }

    fn numeric_values(self) -> bool {
        use CriterionKind::*;
        matches!(
            self,
            IsGreaterThan | IsGreaterOrEqualTo | IsLessThan | IsLessOrEqualTo | IsBetween | IsNotBetween
        )
    }
}

/// Untyped criterion as carried by commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// A checked criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub kind: CriterionKind,
    pub values: Vec<String>,
}

impl Criterion {
    /// Check a command's criterion against the registry.
    pub fn from_spec(spec: &CriterionSpec) -> Result<Self, Rejection> {
        let kind = CriterionKind::from_name(&spec.kind).ok_or(Rejection::UnknownDataValidationRuleType)?;
        if !kind.value_count().accepts(spec.values.len()) {
            return Err(Rejection::InvalidNumberOfCriterionValues);
        }
        if kind.numeric_values() && spec.values.iter().any(|v| v.trim().parse::<f64>().is_err()) {
            return Err(Rejection::InvalidCriterionValue);
        }
        if kind == CriterionKind::IsValueInList && spec.values.iter().any(|v| v.is_empty()) {
            return Err(Rejection::InvalidCriterionValue);
        }
        Ok(Self { kind, values: spec.values.clone() })
    }

    fn number(&self, idx: usize) -> f64 {
        self.values
            .get(idx)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .unwrap_or(0.0)
    }

    /// Does `value` satisfy the criterion? Errors never do.
    pub fn matches(&self, value: &Value) -> bool {
        use CriterionKind::*;

        if value.is_error() {
            return false;
        }
        let text = value.to_text();
        let first = self.values.first().map(String::as_str).unwrap_or("");

        match self.kind {
            IsEmpty => text.trim().is_empty(),
            IsNotEmpty => !text.trim().is_empty(),
            IsNumber => matches!(value, Value::Number(_)),
            IsEqual => match (value, first.trim().parse::<f64>()) {
                (Value::Number(n), Ok(x)) => *n == x,
                _ => text.eq_ignore_ascii_case(first),
            },
            IsNotEqual => match (value, first.trim().parse::<f64>()) {
                (Value::Number(n), Ok(x)) => *n != x,
                _ => !text.eq_ignore_ascii_case(first),
            },
            ContainsText => text.to_lowercase().contains(&first.to_lowercase()),
            NotContainsText => !text.to_lowercase().contains(&first.to_lowercase()),
            IsValueInList => self.values.iter().any(|v| v.eq_ignore_ascii_case(&text)),
            IsGreaterThan | IsGreaterOrEqualTo | IsLessThan | IsLessOrEqualTo | IsBetween | IsNotBetween => {
                let Value::Number(x) = value else {
                    return false;
                };
                let a = self.number(0);
                match self.kind {
                    IsGreaterThan => *x > a,
                    IsGreaterOrEqualTo => *x >= a,
                    IsLessThan => *x < a,
                    IsLessOrEqualTo => *x <= a,
                    IsBetween => {
                        let b = self.number(1);
                        *x >= a.min(b) && *x <= a.max(b)
                    }
                    _ => {
                        let b = self.number(1);
                        *x < a.min(b) || *x > a.max(b)
                    }
                }
            }
        }
    }
}

// ============================================================================
// Rules
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalFormat {
    pub id: String,
    pub ranges: Vec<Zone>,
    pub criterion: Criterion,
    /// Overlaid on the cell's own style when the criterion holds.
    pub style: Style,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataValidationRule {
    pub id: String,
    pub ranges: Vec<Zone>,
    pub criterion: Criterion,
    /// Blocking rules reject content that fails them; others only flag it.
    pub blocking: bool,
}

/// Anything that targets a list of zones and follows structural edits.
pub trait RangedRule {
    fn ranges(&self) -> &[Zone];
    fn ranges_mut(&mut self) -> &mut Vec<Zone>;

    fn applies_to(&self, col: usize, row: usize) -> bool {
        self.ranges().iter().any(|z| z.contains(col, row))
    }
}

impl RangedRule for ConditionalFormat {
    fn ranges(&self) -> &[Zone] {
        &self.ranges
    }

    fn ranges_mut(&mut self) -> &mut Vec<Zone> {
        &mut self.ranges
    }
}

impl RangedRule for DataValidationRule {
    fn ranges(&self) -> &[Zone] {
        &self.ranges
    }

    fn ranges_mut(&mut self) -> &mut Vec<Zone> {
        &mut self.ranges
    }
}

/// Shift every rule's zones; zones swallowed by a deletion disappear, and
/// so does a rule left with no zones.
pub fn adjust_rules<R: RangedRule>(rules: &mut Vec<R>, edit: &GridEdit) {
    for rule in rules.iter_mut() {
        let adjusted: Vec<Zone> = rule.ranges().iter().filter_map(|z| edit.adjust_zone(z)).collect();
        *rule.ranges_mut() = adjusted;
    }
    rules.retain(|rule| !rule.ranges().is_empty());
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellgraph_core::Axis;

    fn spec(kind: &str, values: &[&str]) -> CriterionSpec {
        CriterionSpec { kind: kind.to_string(), values: values.iter().map(|s| s.to_string()).collect() }
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert_eq!(Criterion::from_spec(&spec("isFancy", &[])), Err(Rejection::UnknownDataValidationRuleType));
    }

    #[test]
    fn test_value_count_checked() {
        assert_eq!(
            Criterion::from_spec(&spec("isBetween", &["1"])),
            Err(Rejection::InvalidNumberOfCriterionValues)
        );
        assert_eq!(
            Criterion::from_spec(&spec("isEmpty", &["x"])),
            Err(Rejection::InvalidNumberOfCriterionValues)
        );
        assert_eq!(
            Criterion::from_spec(&spec("isValueInList", &[])),
            Err(Rejection::InvalidNumberOfCriterionValues)
        );
    }

    #[test]
    fn test_numeric_values_checked() {
        assert_eq!(
            Criterion::from_spec(&spec("isGreaterThan", &["abc"])),
            Err(Rejection::InvalidCriterionValue)
        );
        assert!(Criterion::from_spec(&spec("isGreaterThan", &[" 4.5 "])).is_ok());
    }

    #[test]
    fn test_matches() {
        let between = Criterion::from_spec(&spec("isBetween", &["10", "1"])).unwrap();
        assert!(between.matches(&Value::Number(5.0)));
        assert!(!between.matches(&Value::Number(11.0)));
        assert!(!between.matches(&Value::Text("5".into())));

        let list = Criterion::from_spec(&spec("isValueInList", &["Yes", "No"])).unwrap();
        assert!(list.matches(&Value::Text("yes".into())));
        assert!(!list.matches(&Value::Text("maybe".into())));

        let eq = Criterion::from_spec(&spec("isEqual", &["3"])).unwrap();
        assert!(eq.matches(&Value::Number(3.0)));

        let empty = Criterion::from_spec(&spec("isEmpty", &[])).unwrap();
        assert!(empty.matches(&Value::Empty));
    }

    #[test]
    fn test_kind_names_roundtrip() {
        for (name, kind) in CRITERIA {
            assert_eq!(CriterionKind::from_name(name), Some(*kind));
            assert_eq!(kind.name(), *name);
        }
    }

    #[test]
    fn test_adjust_drops_consumed_rules() {
        let criterion = Criterion::from_spec(&spec("isNotEmpty", &[])).unwrap();
        let mut rules = vec![
            DataValidationRule { id: "a".into(), ranges: vec![Zone::new(1, 0, 1, 5)], criterion: criterion.clone(), blocking: false },
            DataValidationRule { id: "b".into(), ranges: vec![Zone::new(3, 0, 3, 5)], criterion, blocking: true },
        ];
        adjust_rules(&mut rules, &GridEdit::delete(Axis::Col, 1, 1));
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "b");
        assert_eq!(rules[0].ranges, vec![Zone::new(2, 0, 2, 5)]);
    }
}
