//! Per-category extraction: raw recognized fields in, derived business
//! figures and update instructions out.

pub mod receipt;
pub mod table;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::ShiftConfig;
use crate::error::ExtractionError;
use crate::types::{column, ProcessedValues, RawExtractionResult, Section, UpdateInstruction};

/// Rounding applied to every derived business figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundingMode {
    HalfAwayFromZero,
    HalfToEven,
}

/// Active mode. Confirm with accounting before changing.
pub const ROUNDING: RoundingMode = RoundingMode::HalfAwayFromZero;

/// Round to 2 decimal places under [`ROUNDING`].
pub fn round2(value: f64) -> f64 {
    let scaled = value * 100.0;
    let rounded = match ROUNDING {
        RoundingMode::HalfAwayFromZero => scaled.round(),
        RoundingMode::HalfToEven => {
            let floor = scaled.floor();
            if (scaled - floor - 0.5).abs() < f64::EPSILON {
                if floor.rem_euclid(2.0) == 0.0 {
                    floor
                } else {
                    floor + 1.0
                }
            } else {
                scaled.round()
            }
        }
    };
    rounded / 100.0
}

/// A single shift's aggregate figures are apportioned across three
/// accounting slots, so every settlement-type amount is divided by three.
pub fn split_three_ways(value: f64) -> f64 {
    round2(value / 3.0)
}

/// Every recognized source category. Unknown labels are rejected at the
/// boundary instead of silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    // Vision-recognized receipt/screenshot categories.
    Huochebang,
    Didi,
    Guotong1,
    Guotong2,
    Tuanyou,
    Pos,
    Supermarket,
    // Exported-table categories.
    FuelTimeStats,
    FuelDiscounts,
    RefuelDetails,
    Douyin,
    Tonglian,
    RechargeDetails,
}

impl Category {
    pub fn from_label(label: &str) -> Result<Category, ExtractionError> {
        match label.trim() {
            "货车帮" => Ok(Category::Huochebang),
            "滴滴加油" => Ok(Category::Didi),
            "国通1" => Ok(Category::Guotong1),
            "国通2" => Ok(Category::Guotong2),
            "团油" => Ok(Category::Tuanyou),
            "POS" => Ok(Category::Pos),
            "超市销售收入" => Ok(Category::Supermarket),
            "油品时间统计" => Ok(Category::FuelTimeStats),
            "油品优惠" => Ok(Category::FuelDiscounts),
            "加油明细" => Ok(Category::RefuelDetails),
            "抖音" => Ok(Category::Douyin),
            "通联" => Ok(Category::Tonglian),
            "充值明细" => Ok(Category::RechargeDetails),
            other => Err(ExtractionError::UnknownCategory(other.to_string())),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Category::Huochebang => "货车帮",
            Category::Didi => "滴滴加油",
            Category::Guotong1 => "国通1",
            Category::Guotong2 => "国通2",
            Category::Tuanyou => "团油",
            Category::Pos => "POS",
            Category::Supermarket => "超市销售收入",
            Category::FuelTimeStats => "油品时间统计",
            Category::FuelDiscounts => "油品优惠",
            Category::RefuelDetails => "加油明细",
            Category::Douyin => "抖音",
            Category::Tonglian => "通联",
            Category::RechargeDetails => "充值明细",
        }
    }

    /// True for categories read from exported table files rather than images.
    pub fn is_table(&self) -> bool {
        matches!(
            self,
            Category::FuelTimeStats
                | Category::FuelDiscounts
                | Category::RefuelDetails
                | Category::Douyin
                | Category::Tonglian
                | Category::RechargeDetails
        )
    }

    /// Raw field names the vision service is asked to recognize. Empty for
    /// table categories.
    pub fn expected_fields(&self) -> &'static [&'static str] {
        match self {
            Category::Huochebang => &["柴油统计", "油站直降", "油站折扣", "服务费", "结算金额"],
            Category::Didi => &["油品数量", "油品优惠合计", "油品预收金额", "油品应收金额"],
            Category::Guotong1 | Category::Guotong2 => &["订单金额", "退款订单金额"],
            Category::Tuanyou => &["加油升数汇总", "通道费汇总", "实际结算金额汇总", "加油金额汇总"],
            Category::Pos => &["结算总金额"],
            Category::Supermarket => &["现金"],
            _ => &[],
        }
    }
}

/// Result of one source's extraction: derived figures for display plus the
/// workbook mutations they imply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionOutcome {
    pub processed: ProcessedValues,
    pub updates: Vec<UpdateInstruction>,
}

/// Run the extractor for a vision-sourced category.
pub fn extract_receipt(
    category: Category,
    raw: &RawExtractionResult,
    config: &ShiftConfig,
) -> Result<ExtractionOutcome, ExtractionError> {
    match category {
        Category::Huochebang => receipt::huochebang(raw, config),
        Category::Didi => receipt::didi(raw, config),
        Category::Guotong1 => receipt::guotong(raw, 92),
        Category::Guotong2 => receipt::guotong(raw, 93),
        Category::Tuanyou => receipt::tuanyou(raw, config),
        Category::Pos => receipt::pos(raw),
        Category::Supermarket => receipt::supermarket(raw),
        _ => Err(ExtractionError::UnsupportedSource {
            category: category.label(),
        }),
    }
}

/// Run the extractor for a table-sourced category.
pub fn extract_table(
    category: Category,
    path: &Path,
    config: &ShiftConfig,
) -> Result<ExtractionOutcome, ExtractionError> {
    match category {
        Category::FuelTimeStats => table::fuel_time_stats(path),
        Category::FuelDiscounts => table::fuel_discounts(path, config),
        Category::RefuelDetails => table::refuel_details(path),
        Category::Douyin => table::douyin(path, config),
        Category::Tonglian => table::tonglian(path),
        Category::RechargeDetails => table::recharge_details(path),
        _ => Err(ExtractionError::UnsupportedSource {
            category: category.label(),
        }),
    }
}

pub(crate) fn cell_update(sheet: &str, row: u32, col: &'static str, value: f64) -> UpdateInstruction {
    UpdateInstruction::Cell {
        sheet: sheet.to_string(),
        row,
        column: column(col),
        value,
    }
}

pub(crate) fn categorical_update(
    sheet: &str,
    section: Section,
    lookup_key: String,
    col: &'static str,
    value: f64,
) -> UpdateInstruction {
    UpdateInstruction::Categorical {
        sheet: sheet.to_string(),
        section,
        lookup_key,
        column: column(col),
        value,
    }
}

pub(crate) fn date_keyed_update(
    sheet: &str,
    date_day: u32,
    columns: &[(&'static str, f64)],
) -> UpdateInstruction {
    UpdateInstruction::DateKeyed {
        sheet: sheet.to_string(),
        date_day,
        columns: columns
            .iter()
            .map(|(col, value)| (column(col), *value))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round2_half_away_from_zero() {
        assert_eq!(round2(43.816_666), 43.82);
        assert_eq!(round2(0.125), 0.13);
        assert_eq!(round2(0.375), 0.38);
        assert_eq!(round2(-0.125), -0.13);
    }

    #[test]
    fn split_three_ways_matches_ledger_rule() {
        assert_eq!(split_three_ways(131.45), 43.82);
        assert_eq!(split_three_ways(900.0), 300.0);
    }

    #[test]
    fn label_round_trip() {
        for category in [
            Category::Huochebang,
            Category::Didi,
            Category::Guotong1,
            Category::Guotong2,
            Category::Tuanyou,
            Category::Pos,
            Category::Supermarket,
            Category::FuelTimeStats,
            Category::FuelDiscounts,
            Category::RefuelDetails,
            Category::Douyin,
            Category::Tonglian,
            Category::RechargeDetails,
        ] {
            assert_eq!(Category::from_label(category.label()).unwrap(), category);
        }
    }

    #[test]
    fn unknown_label_is_rejected() {
        assert!(matches!(
            Category::from_label("会员卡"),
            Err(ExtractionError::UnknownCategory(_))
        ));
    }

    #[test]
    fn receipt_and_table_kinds_do_not_cross() {
        let config = crate::config::ShiftConfig::new(
            chrono::NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            chrono::NaiveDate::from_ymd_opt(2025, 3, 14)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
            chrono::NaiveDate::from_ymd_opt(2025, 3, 15)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
            7.35,
        )
        .unwrap();
        let raw = RawExtractionResult::default();
        assert!(matches!(
            extract_receipt(Category::Douyin, &raw, &config),
            Err(ExtractionError::UnsupportedSource { .. })
        ));
        assert!(matches!(
            extract_table(Category::Pos, Path::new("x.xlsx"), &config),
            Err(ExtractionError::UnsupportedSource { .. })
        ));
    }
}
