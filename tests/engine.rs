//! Workbook engine integration tests over real .xlsx files.

mod common;

use std::fs;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use shift_scanner::{ColumnRef, Section, UpdateError, UpdateInstruction, WorkbookEngine};

use common::{SHEET_DISCOUNT_DETAIL, SHEET_PRICING};

fn col(label: &str) -> ColumnRef {
    ColumnRef::new(label).unwrap()
}

fn cell_update(row: u32, column: &str, value: f64) -> UpdateInstruction {
    UpdateInstruction::Cell {
        sheet: SHEET_PRICING.to_string(),
        row,
        column: col(column),
        value,
    }
}

/// Saved-file cell value, read back through calamine (1-based row).
fn saved_cell(path: &Path, sheet: &str, row: u32, column: &str) -> Option<f64> {
    let mut workbook = open_workbook_auto(path).unwrap();
    let range = workbook.worksheet_range(sheet).unwrap();
    let value = range.get_value((row - 1, col(column).index()));
    match value {
        Some(Data::Float(f)) => Some(*f),
        Some(Data::Int(i)) => Some(*i as f64),
        _ => None,
    }
}

fn assert_cell(path: &Path, sheet: &str, row: u32, column: &str, expected: f64) {
    let actual = saved_cell(path, sheet, row, column)
        .unwrap_or_else(|| panic!("no numeric value at {sheet} {column}{row}"));
    assert!(
        (actual - expected).abs() < 1e-9,
        "{sheet} {column}{row}: expected {expected}, got {actual}"
    );
}

#[test]
fn accumulating_cell_sums_across_one_batch() {
    let path = common::temp_path("accumulate.xlsx");
    common::build_shift_workbook(&path);
    let engine = WorkbookEngine::open(&path).unwrap();

    engine
        .apply_updates(&[
            cell_update(81, "E", 1.60),
            cell_update(81, "E", 3.00),
            cell_update(81, "E", 0.50),
        ])
        .unwrap();
    engine.save_workbook().unwrap();

    assert_cell(&path, SHEET_PRICING, 81, "E", 5.10);
    fs::remove_file(&path).unwrap();
}

#[test]
fn accumulating_cell_resets_between_batches() {
    let path = common::temp_path("accumulate_reset.xlsx");
    common::build_shift_workbook(&path);
    let engine = WorkbookEngine::open(&path).unwrap();

    engine
        .apply_updates(&[cell_update(81, "E", 1.60), cell_update(81, "E", 3.00)])
        .unwrap();
    // A later batch starts its own running total; the first write replaces
    // the previous batch's sum instead of adding to it.
    engine.apply_updates(&[cell_update(81, "E", 2.00)]).unwrap();
    engine.save_workbook().unwrap();

    assert_cell(&path, SHEET_PRICING, 81, "E", 2.00);
    fs::remove_file(&path).unwrap();
}

#[test]
fn ordinary_cells_are_last_write_wins() {
    let path = common::temp_path("overwrite.xlsx");
    common::build_shift_workbook(&path);
    let engine = WorkbookEngine::open(&path).unwrap();

    engine
        .apply_updates(&[cell_update(80, "E", 12.0), cell_update(80, "E", 7.5)])
        .unwrap();
    engine.save_workbook().unwrap();

    assert_cell(&path, SHEET_PRICING, 80, "E", 7.5);
    fs::remove_file(&path).unwrap();
}

#[test]
fn categorical_lookup_normalizes_machine_labels() {
    let path = common::temp_path("categorical.xlsx");
    common::build_shift_workbook(&path);
    let engine = WorkbookEngine::open(&path).unwrap();

    let lookup = |section, key: &str, value| UpdateInstruction::Categorical {
        sheet: SHEET_PRICING.to_string(),
        section,
        lookup_key: key.to_string(),
        column: col("D"),
        value,
    };

    engine
        .apply_updates(&[
            // "3" matches the "3号" row of each section independently.
            lookup(Section::A, "3", 100.0),
            lookup(Section::B, "3", 50.0),
            // Zero-padded key matches nothing: non-fatal miss.
            lookup(Section::A, "03", 999.0),
        ])
        .unwrap();
    engine.save_workbook().unwrap();

    assert_cell(&path, SHEET_PRICING, 5, "D", 100.0); // section A, 3号
    assert_cell(&path, SHEET_PRICING, 7, "D", 50.0); // section B, 3号
    fs::remove_file(&path).unwrap();
}

#[test]
fn date_lookup_miss_is_non_fatal() {
    let path = common::temp_path("date_miss.xlsx");
    common::build_shift_workbook(&path);
    let engine = WorkbookEngine::open(&path).unwrap();

    engine
        .apply_updates(&[
            UpdateInstruction::DateKeyed {
                sheet: SHEET_DISCOUNT_DETAIL.to_string(),
                date_day: 32,
                columns: vec![(col("X"), 1.0)],
            },
            UpdateInstruction::DateKeyed {
                sheet: SHEET_DISCOUNT_DETAIL.to_string(),
                date_day: 14,
                columns: vec![(col("X"), 411.5), (col("Y"), 5.0)],
            },
        ])
        .unwrap();
    engine.save_workbook().unwrap();

    // Day 14 lives on sheet row 15; the day-32 instruction was skipped.
    assert_cell(&path, SHEET_DISCOUNT_DETAIL, 15, "X", 411.5);
    assert_cell(&path, SHEET_DISCOUNT_DETAIL, 15, "Y", 5.0);
    fs::remove_file(&path).unwrap();
}

#[test]
fn unknown_sheet_aborts_the_whole_batch() {
    let path = common::temp_path("bad_sheet.xlsx");
    common::build_shift_workbook(&path);
    let engine = WorkbookEngine::open(&path).unwrap();

    let result = engine.apply_updates(&[
        cell_update(80, "E", 12.0),
        UpdateInstruction::Cell {
            sheet: "调价后".to_string(),
            row: 5,
            column: col("A"),
            value: 1.0,
        },
    ]);
    assert!(matches!(result, Err(UpdateError::UnknownSheet(_))));

    // Fail-fast: the valid instruction earlier in the batch was not applied.
    engine.save_workbook().unwrap();
    assert_eq!(saved_cell(&path, SHEET_PRICING, 80, "E"), None);
    fs::remove_file(&path).unwrap();
}

#[test]
fn malformed_instructions_fail_validation() {
    let path = common::temp_path("malformed.xlsx");
    common::build_shift_workbook(&path);
    let engine = WorkbookEngine::open(&path).unwrap();

    let empty_key = UpdateInstruction::Categorical {
        sheet: SHEET_PRICING.to_string(),
        section: Section::A,
        lookup_key: "  号".to_string(),
        column: col("D"),
        value: 1.0,
    };
    assert!(matches!(
        engine.apply_updates(&[empty_key]),
        Err(UpdateError::InvalidInstruction(_))
    ));

    let no_columns = UpdateInstruction::DateKeyed {
        sheet: SHEET_DISCOUNT_DETAIL.to_string(),
        date_day: 14,
        columns: vec![],
    };
    assert!(matches!(
        engine.apply_updates(&[no_columns]),
        Err(UpdateError::InvalidInstruction(_))
    ));
    fs::remove_file(&path).unwrap();
}

#[test]
fn closed_workbook_rejects_applies_until_reopened() {
    let path = common::temp_path("lifecycle.xlsx");
    common::build_shift_workbook(&path);
    let engine = WorkbookEngine::open(&path).unwrap();

    engine.close_workbook();
    assert!(!engine.is_open());
    assert!(matches!(
        engine.apply_updates(&[cell_update(80, "E", 1.0)]),
        Err(UpdateError::WorkbookClosed)
    ));
    assert!(matches!(
        engine.save_workbook(),
        Err(UpdateError::WorkbookClosed)
    ));

    engine.reopen().unwrap();
    engine.apply_updates(&[cell_update(80, "E", 1.0)]).unwrap();
    engine.save_workbook().unwrap();
    assert_cell(&path, SHEET_PRICING, 80, "E", 1.0);
    fs::remove_file(&path).unwrap();
}

#[test]
fn saved_file_survives_a_second_open_and_apply() {
    let path = common::temp_path("roundtrip.xlsx");
    common::build_shift_workbook(&path);

    let engine = WorkbookEngine::open(&path).unwrap();
    engine.apply_updates(&[cell_update(90, "C", 43.82)]).unwrap();
    engine.save_workbook().unwrap();
    drop(engine);

    // The stripped, saved file must behave like a fresh workbook.
    let engine = WorkbookEngine::open(&path).unwrap();
    engine
        .apply_updates(&[UpdateInstruction::Categorical {
            sheet: SHEET_PRICING.to_string(),
            section: Section::C,
            lookup_key: "1".to_string(),
            column: col("D"),
            value: 20.0,
        }])
        .unwrap();
    engine.save_workbook().unwrap();

    assert_cell(&path, SHEET_PRICING, 90, "C", 43.82);
    assert_cell(&path, SHEET_PRICING, 8, "D", 20.0);
    fs::remove_file(&path).unwrap();
}
