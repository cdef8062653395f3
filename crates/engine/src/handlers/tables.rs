use cellgraph_core::{SheetId, Zone};

use super::{sheet_of, CommandHandler};
use crate::command::Command;
use crate::error::Rejection;
use crate::filter::{ColumnFilter, Table};
use crate::history::{Change, Transaction};
use crate::sheet::Sheet;
use crate::workbook::Workbook;

/// Tables and their column filters. A table is addressed by any position
/// inside it.
pub struct TableHandler;

fn check_new_table(sheet: &Sheet, zone: &Zone) -> Result<(), Rejection> {
    if !zone.is_bounded() {
        return Err(Rejection::InvalidRange);
    }
    if !zone.is_inside(sheet.cols(), sheet.rows()) {
        return Err(Rejection::TargetOutOfSheet);
    }
    if sheet.tables().iter().any(|t| t.zone.intersects(zone)) {
        return Err(Rejection::TableOverlap);
    }
    if !sheet.merges_intersecting(zone).is_empty() {
        return Err(Rejection::FilterMergeOverlap);
    }
    Ok(())
}

fn table_index(sheet: &Sheet, col: usize, row: usize) -> Option<usize> {
    sheet.tables().iter().position(|t| t.zone.contains(col, row))
}

impl TableHandler {
    /// Commit an edited copy of the sheet's table list.
    fn edit_tables<F>(book: &mut Workbook, tx: &mut Transaction, sheet_id: SheetId, edit: F)
    where
        F: FnOnce(&mut Vec<Table>),
    {
        let Some(sheet) = book.sheet(sheet_id) else {
            return;
        };
        let before = sheet.tables().to_vec();
        let mut after = before.clone();
        edit(&mut after);
        if after != before {
            book.commit(tx, Change::Tables { sheet: sheet_id, before, after });
        }
    }
}

impl CommandHandler for TableHandler {
    fn validate(&self, book: &Workbook, command: &Command) -> Result<(), Rejection> {
        match command {
            Command::CreateTable { sheet_id, zone, .. } => check_new_table(sheet_of(book, *sheet_id)?, zone),
            Command::RemoveTable { sheet_id, col, row } | Command::UpdateFilter { sheet_id, col, row, .. } => {
                table_index(sheet_of(book, *sheet_id)?, *col, *row)
                    .map(|_| ())
                    .ok_or(Rejection::NoTableAtPosition)
            }
            _ => Ok(()),
        }
    }

    fn apply(&self, book: &mut Workbook, tx: &mut Transaction, command: &Command) {
        match command {
            Command::CreateTable { sheet_id, zone, has_header } => {
                let table = Table::new(*zone, *has_header);
                Self::edit_tables(book, tx, *sheet_id, |tables| tables.push(table));
            }
            Command::RemoveTable { sheet_id, col, row } => {
                let Some(index) = book.sheet(*sheet_id).and_then(|s| table_index(s, *col, *row)) else {
                    return;
                };
                Self::edit_tables(book, tx, *sheet_id, |tables| {
                    tables.remove(index);
                });
            }
            Command::UpdateFilter { sheet_id, col, row, hidden_values } => {
                let Some(index) = book.sheet(*sheet_id).and_then(|s| table_index(s, *col, *row)) else {
                    return;
                };
                Self::edit_tables(book, tx, *sheet_id, |tables| {
                    let table = &mut tables[index];
                    let offset = col - table.zone.left;
                    if hidden_values.is_empty() {
                        table.filters.remove(&offset);
                    } else {
                        table.filters.insert(offset, ColumnFilter { hidden_values: hidden_values.clone() });
                    }
                });
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{zone, TestBook};

    fn create(t: &TestBook, xc: &str) -> Command {
        Command::CreateTable { sheet_id: t.sheet, zone: zone(xc), has_header: true }
    }

    fn filter(t: &TestBook, xc: &str, hidden: &[&str]) -> Command {
        let z = zone(xc);
        Command::UpdateFilter {
            sheet_id: t.sheet,
            col: z.left,
            row: z.top,
            hidden_values: hidden.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn test_table_rejections() {
        let mut t = TestBook::new();
        assert_eq!(t.book.dispatch(create(&t, "A:B")), Err(Rejection::InvalidRange));
        assert_eq!(t.book.dispatch(create(&t, "Y1:AB3")), Err(Rejection::TargetOutOfSheet));
        t.book.dispatch(create(&t, "A1:C5")).unwrap();
        assert_eq!(t.book.dispatch(create(&t, "C5:D9")), Err(Rejection::TableOverlap));
        t.merge("E1:F1");
        assert_eq!(t.book.dispatch(create(&t, "D1:E4")), Err(Rejection::FilterMergeOverlap));
        assert_eq!(t.book.dispatch(filter(&t, "H8", &["x"])), Err(Rejection::NoTableAtPosition));
    }

    #[test]
    fn test_filter_hides_rows_by_value() {
        let mut t = TestBook::new();
        t.set("A1", "Region");
        t.set("A2", "North");
        t.set("A3", "south");
        t.set("A4", "North ");
        t.set("A5", "=A3");
        t.book.dispatch(create(&t, "A1:B5")).unwrap();

        t.book.dispatch(filter(&t, "A1", &["SOUTH"])).unwrap();
        assert_eq!(t.book.filtered_rows(t.sheet), vec![2, 4]);

        t.set("A3", "east");
        assert!(t.book.filtered_rows(t.sheet).is_empty());

        t.book.dispatch(filter(&t, "A2", &[])).unwrap();
        assert!(t.book.tables(t.sheet)[0].filters.is_empty());
    }

    #[test]
    fn test_remove_table_and_undo() {
        let mut t = TestBook::new();
        t.book.dispatch(create(&t, "B2:C4")).unwrap();
        t.book.dispatch(Command::RemoveTable { sheet_id: t.sheet, col: 2, row: 3 }).unwrap();
        assert!(t.book.tables(t.sheet).is_empty());
        t.book.undo().unwrap();
        assert_eq!(t.book.tables(t.sheet)[0].zone, zone("B2:C4"));
    }
}
