// Property-based tests for undo/redo.
// CI: 64 cases (default). Soak: PROPTEST_CASES=2000 cargo test --release

mod common;

use cellgraph_engine::style::Style;
use cellgraph_engine::{Axis, Command, InsertPosition, SheetId, Value, Workbook, Zone};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn config() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(64),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

const SHEET: SheetId = SheetId(1);
const SIZE: usize = 6;

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

fn arb_content() -> impl Strategy<Value = String> {
    prop_oneof![
        3 => (1..100u32).prop_map(|n| n.to_string()),
        1 => Just("".to_string()),
        1 => Just("label".to_string()),
        1 => Just("=A1+B2".to_string()),
        1 => Just("=SUM(A1:B3)".to_string()),
        1 => Just("=C3*2".to_string()),
        1 => Just("=A1".to_string()),
        1 => Just("=1+".to_string()),
    ]
}

/// Zones of up to 3x3 starting anywhere in (or just past) the grid.
fn arb_zone() -> impl Strategy<Value = Zone> {
    (0..=SIZE, 0..=SIZE, 0..3usize, 0..3usize).prop_map(|(l, t, w, h)| Zone::new(l, t, l + w, t + h))
}

fn arb_axis() -> impl Strategy<Value = Axis> {
    prop_oneof![Just(Axis::Col), Just(Axis::Row)]
}

fn arb_command() -> impl Strategy<Value = Command> {
    prop_oneof![
        6 => (0..=SIZE, 0..=SIZE, arb_content())
            .prop_map(|(col, row, content)| Command::SetCellContent { sheet_id: SHEET, col, row, content }),
        1 => arb_zone().prop_map(|z| Command::DeleteContent { sheet_id: SHEET, target: vec![z] }),
        2 => (arb_axis(), 0..=SIZE, 1..3usize, any::<bool>()).prop_map(|(dimension, base, quantity, after)| {
            Command::AddColumnsRows {
                sheet_id: SHEET,
                dimension,
                base,
                quantity,
                position: if after { InsertPosition::After } else { InsertPosition::Before },
            }
        }),
        2 => (arb_axis(), prop::collection::vec(0..=SIZE, 1..3))
            .prop_map(|(dimension, elements)| Command::RemoveColumnsRows { sheet_id: SHEET, dimension, elements }),
        2 => (arb_zone(), any::<bool>())
            .prop_map(|(z, force)| Command::AddMerge { sheet_id: SHEET, target: vec![z], force }),
        1 => arb_zone().prop_map(|z| Command::RemoveMerge { sheet_id: SHEET, target: vec![z] }),
        1 => arb_zone().prop_map(|z| Command::SetFormatting {
            sheet_id: SHEET,
            target: vec![z],
            style: Some(Style { bold: Some(true), ..Style::default() }),
            format: None,
        }),
        1 => arb_zone().prop_map(|z| Command::ClearFormatting { sheet_id: SHEET, target: vec![z] }),
        1 => (arb_axis(), prop::collection::vec(0..=SIZE, 1..3))
            .prop_map(|(dimension, elements)| Command::HideColumnsRows { sheet_id: SHEET, dimension, elements }),
        1 => arb_zone().prop_map(|zone| Command::CreateTable { sheet_id: SHEET, zone, has_header: true }),
    ]
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// Everything a caller can see: the exported document plus every value.
fn observe(book: &Workbook) -> (String, Vec<Value>) {
    let sheet = book.sheet(SHEET).unwrap();
    let mut values = Vec::new();
    for row in 0..sheet.rows() {
        for col in 0..sheet.cols() {
            values.push(book.value(SHEET, col, row));
        }
    }
    (book.to_json().unwrap(), values)
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config())]

    #[test]
    fn prop_undo_restores_and_redo_replays(commands in prop::collection::vec(arb_command(), 1..12)) {
        let mut book = common::small_book(SIZE, SIZE);

        for command in commands {
            let before = observe(&book);
            if book.dispatch(command.clone()).is_err() {
                prop_assert_eq!(observe(&book), before, "rejected {:?} changed the book", command);
                continue;
            }
            let after = observe(&book);

            book.undo().unwrap();
            prop_assert_eq!(observe(&book), before, "undo of {:?}", command);
            book.redo().unwrap();
            prop_assert_eq!(observe(&book), after, "redo of {:?}", command);
        }
    }

    #[test]
    fn prop_undo_all_returns_to_empty_book(commands in prop::collection::vec(arb_command(), 1..12)) {
        let mut book = common::small_book(SIZE, SIZE);
        let initial = observe(&book);

        for command in commands {
            let _ = book.dispatch(command);
        }
        while book.can_undo() {
            book.undo().unwrap();
        }
        prop_assert_eq!(observe(&book), initial);
    }
}
