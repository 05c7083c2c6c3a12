//! Shared fixtures: workbooks built with rust_xlsxwriter in the OS temp dir.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use rust_xlsxwriter::Workbook;

pub const SHEET_PRICING: &str = "调价前";
pub const SHEET_DISCOUNT_DETAIL: &str = "油品优惠明细 2";

/// Unique-per-process temp file path, so parallel test binaries don't clash.
pub fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("shift_scanner_{}_{}", std::process::id(), name))
}

/// Shift workbook with the fixed business layout: a pricing sheet with
/// fuel-type sections (markers in column A, pump labels in column B) and a
/// discount detail sheet with one row per calendar day (day in column B).
pub fn build_shift_workbook(path: &Path) {
    let mut workbook = Workbook::new();

    let pricing = workbook.add_worksheet();
    pricing.set_name(SHEET_PRICING).unwrap();
    pricing.write_string(0, 1, "机号").unwrap();
    pricing.write_string(1, 1, "升数统计").unwrap();
    // Section A (diesel): rows 3-5, section B: rows 6-7, section C: row 8.
    pricing.write_string(2, 0, "A").unwrap();
    pricing.write_string(2, 1, "1号").unwrap();
    pricing.write_string(3, 1, "2号").unwrap();
    pricing.write_string(4, 1, "3号").unwrap();
    pricing.write_string(5, 0, "B").unwrap();
    pricing.write_string(5, 1, "1号").unwrap();
    pricing.write_string(6, 1, "3号").unwrap();
    pricing.write_string(7, 0, "C").unwrap();
    pricing.write_string(7, 1, "1号").unwrap();
    // Labels next to the fixed settlement cells.
    pricing.write_string(79, 0, "POS结算").unwrap();
    pricing.write_string(80, 0, "手续费").unwrap();
    pricing.write_string(89, 0, "货车帮结算").unwrap();

    let detail = workbook.add_worksheet();
    detail.set_name(SHEET_DISCOUNT_DETAIL).unwrap();
    detail.write_string(0, 1, "日期").unwrap();
    for day in 1..=31u32 {
        detail.write_number(day, 1, f64::from(day)).unwrap();
    }

    workbook.save(path).unwrap();
}
