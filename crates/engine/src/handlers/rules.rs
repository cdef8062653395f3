use cellgraph_core::{SheetId, Zone};

use super::{check_targets, sheet_of, CommandHandler};
use crate::command::Command;
use crate::error::Rejection;
use crate::history::{Change, Transaction};
use crate::rules::{ConditionalFormat, Criterion, CriterionSpec, DataValidationRule};
use crate::workbook::Workbook;

/// Conditional formats and data validation rules, keyed by id within a
/// sheet. Adding a rule under an existing id replaces it in place.
pub struct RuleHandler;

fn check_rule(book: &Workbook, sheet_id: SheetId, ranges: &[Zone], criterion: &CriterionSpec) -> Result<(), Rejection> {
    let sheet = sheet_of(book, sheet_id)?;
    Criterion::from_spec(criterion)?;
    check_targets(sheet, ranges).map(|_| ())
}

/// Replace the entry with the same id, or append.
fn upsert<T, F>(rules: &[T], rule: T, id_of: F) -> Vec<T>
where
    T: Clone,
    F: Fn(&T) -> &str,
{
    let mut out = rules.to_vec();
    match out.iter().position(|r| id_of(r) == id_of(&rule)) {
        Some(index) => out[index] = rule,
        None => out.push(rule),
    }
    out
}

impl CommandHandler for RuleHandler {
    fn validate(&self, book: &Workbook, command: &Command) -> Result<(), Rejection> {
        match command {
            Command::AddConditionalFormat { sheet_id, ranges, criterion, .. }
            | Command::AddDataValidationRule { sheet_id, ranges, criterion, .. } => {
                check_rule(book, *sheet_id, ranges, criterion)
            }
            Command::RemoveConditionalFormat { sheet_id, id } => {
                let sheet = sheet_of(book, *sheet_id)?;
                if !sheet.conditional_formats().iter().any(|cf| &cf.id == id) {
                    return Err(Rejection::UnknownRuleId);
                }
                Ok(())
            }
            Command::RemoveDataValidationRule { sheet_id, id } => {
                let sheet = sheet_of(book, *sheet_id)?;
                if !sheet.validations().iter().any(|rule| &rule.id == id) {
                    return Err(Rejection::UnknownRuleId);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn apply(&self, book: &mut Workbook, tx: &mut Transaction, command: &Command) {
        match command {
            Command::AddConditionalFormat { sheet_id, id, ranges, criterion, style } => {
                let (Some(sheet), Ok(criterion)) = (book.sheet(*sheet_id), Criterion::from_spec(criterion)) else {
                    return;
                };
                let before = sheet.conditional_formats().to_vec();
                let rule = ConditionalFormat { id: id.clone(), ranges: ranges.clone(), criterion, style: style.clone() };
                let after = upsert(&before, rule, |cf| cf.id.as_str());
                book.commit(tx, Change::ConditionalFormats { sheet: *sheet_id, before, after });
            }
            Command::RemoveConditionalFormat { sheet_id, id } => {
                let Some(sheet) = book.sheet(*sheet_id) else {
                    return;
                };
                let before = sheet.conditional_formats().to_vec();
                let after = before.iter().filter(|cf| &cf.id != id).cloned().collect();
                book.commit(tx, Change::ConditionalFormats { sheet: *sheet_id, before, after });
            }
            Command::AddDataValidationRule { sheet_id, id, ranges, criterion, blocking } => {
                let (Some(sheet), Ok(criterion)) = (book.sheet(*sheet_id), Criterion::from_spec(criterion)) else {
                    return;
                };
                let before = sheet.validations().to_vec();
                let rule = DataValidationRule { id: id.clone(), ranges: ranges.clone(), criterion, blocking: *blocking };
                let after = upsert(&before, rule, |rule| rule.id.as_str());
                book.commit(tx, Change::Validations { sheet: *sheet_id, before, after });
            }
            Command::RemoveDataValidationRule { sheet_id, id } => {
                let Some(sheet) = book.sheet(*sheet_id) else {
                    return;
                };
                let before = sheet.validations().to_vec();
                let after = before.iter().filter(|rule| &rule.id != id).cloned().collect();
                book.commit(tx, Change::Validations { sheet: *sheet_id, before, after });
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::InsertPosition;
    use crate::harness::{zone, TestBook};
    use crate::style::Style;
    use cellgraph_core::Axis;

    fn criterion(kind: &str, values: &[&str]) -> CriterionSpec {
        CriterionSpec { kind: kind.to_string(), values: values.iter().map(|v| v.to_string()).collect() }
    }

    fn red() -> Style {
        Style { text_color: Some("#FF0000".to_string()), ..Style::default() }
    }

    fn add_cf(t: &TestBook, id: &str, xc: &str, spec: CriterionSpec) -> Command {
        Command::AddConditionalFormat {
            sheet_id: t.sheet,
            id: id.to_string(),
            ranges: vec![zone(xc)],
            criterion: spec,
            style: red(),
        }
    }

    #[test]
    fn test_conditional_format_follows_values() {
        let mut t = TestBook::new();
        t.set("A1", "5");
        t.set("A2", "=A1*3");
        t.book.dispatch(add_cf(&t, "big", "A1:A5", criterion("isGreaterThan", &["10"]))).unwrap();

        assert_eq!(t.book.style(t.sheet, 0, 0).text_color, None);
        assert_eq!(t.book.style(t.sheet, 0, 1).text_color.as_deref(), Some("#FF0000"));

        t.set("A1", "2");
        assert_eq!(t.book.style(t.sheet, 0, 1).text_color, None);
    }

    #[test]
    fn test_rule_rejections() {
        let mut t = TestBook::new();
        assert_eq!(
            t.book.dispatch(add_cf(&t, "x", "A1", criterion("isSomething", &[]))),
            Err(Rejection::UnknownDataValidationRuleType)
        );
        assert_eq!(
            t.book.dispatch(add_cf(&t, "x", "A1", criterion("isBetween", &["1"]))),
            Err(Rejection::InvalidNumberOfCriterionValues)
        );
        assert_eq!(
            t.book.dispatch(add_cf(&t, "x", "A1", criterion("isLessThan", &["ten"]))),
            Err(Rejection::InvalidCriterionValue)
        );
        assert_eq!(
            t.book.dispatch(add_cf(&t, "x", "AB1", criterion("isEmpty", &[]))),
            Err(Rejection::TargetOutOfSheet)
        );
        let remove = Command::RemoveConditionalFormat { sheet_id: t.sheet, id: "nope".to_string() };
        assert_eq!(t.book.dispatch(remove), Err(Rejection::UnknownRuleId));
    }

    #[test]
    fn test_same_id_replaces() {
        let mut t = TestBook::new();
        t.book.dispatch(add_cf(&t, "r", "A1", criterion("isEmpty", &[]))).unwrap();
        t.book.dispatch(add_cf(&t, "r", "B1:B3", criterion("isNotEmpty", &[]))).unwrap();
        let sheet = t.book.sheet(t.sheet).unwrap();
        assert_eq!(sheet.conditional_formats().len(), 1);
        assert_eq!(sheet.conditional_formats()[0].ranges, vec![zone("B1:B3")]);
    }

    #[test]
    fn test_remove_rule_and_undo() {
        let mut t = TestBook::new();
        let add = Command::AddDataValidationRule {
            sheet_id: t.sheet,
            id: "yes-no".to_string(),
            ranges: vec![zone("C:C")],
            criterion: criterion("isValueInList", &["Yes", "No"]),
            blocking: false,
        };
        t.book.dispatch(add).unwrap();
        t.set("C4", "Maybe");
        assert!(!t.book.is_cell_valid(t.sheet, 2, 3));

        t.book
            .dispatch(Command::RemoveDataValidationRule { sheet_id: t.sheet, id: "yes-no".to_string() })
            .unwrap();
        assert!(t.book.is_cell_valid(t.sheet, 2, 3));

        t.book.undo().unwrap();
        assert!(!t.book.is_cell_valid(t.sheet, 2, 3));
    }

    #[test]
    fn test_rule_ranges_follow_column_insert() {
        let mut t = TestBook::new();
        t.book.dispatch(add_cf(&t, "r", "B2:C4", criterion("isNotEmpty", &[]))).unwrap();
        let insert = Command::AddColumnsRows {
            sheet_id: t.sheet,
            dimension: Axis::Col,
            base: 0,
            quantity: 2,
            position: InsertPosition::Before,
        };
        t.book.dispatch(insert).unwrap();
        let sheet = t.book.sheet(t.sheet).unwrap();
        assert_eq!(sheet.conditional_formats()[0].ranges, vec![zone("D2:E4")]);
    }
}
