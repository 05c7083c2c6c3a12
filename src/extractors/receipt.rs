//! Vision-sourced category extractors. Each consumes the raw recognized
//! fields for one receipt/screenshot and emits the workbook updates for it.

use chrono::Datelike;

use super::{
    cell_update, date_keyed_update, round2, split_three_ways, ExtractionOutcome,
};
use crate::config::ShiftConfig;
use crate::error::ExtractionError;
use crate::parse::parse_numeric;
use crate::types::{ProcessedValues, RawExtractionResult, SHEET_DISCOUNT_DETAIL, SHEET_PRICING};

/// 货车帮: third-party fuel aggregator statement. Direct and station
/// discounts sum into one diesel discount figure.
pub(super) fn huochebang(
    raw: &RawExtractionResult,
    config: &ShiftConfig,
) -> Result<ExtractionOutcome, ExtractionError> {
    const LABEL: &str = "货车帮";
    let diesel_volume = parse_numeric(raw.field(LABEL, "柴油统计")?, Some("升"), 0.0);
    let direct_discount = parse_numeric(raw.field(LABEL, "油站直降")?, Some("元"), 0.0);
    let station_discount = parse_numeric(raw.field(LABEL, "油站折扣")?, Some("元"), 0.0);
    let diesel_discount = round2(direct_discount + station_discount);
    let handling_fee = parse_numeric(raw.field(LABEL, "服务费")?, Some("元"), 0.0);
    let settlement_amount = parse_numeric(raw.field(LABEL, "结算金额")?, Some("元"), 0.0);

    let mut processed = ProcessedValues::new();
    processed.insert("diesel_stats".to_string(), split_three_ways(diesel_volume));
    processed.insert(
        "diesel_discount".to_string(),
        split_three_ways(diesel_discount),
    );
    processed.insert("handling_fee".to_string(), split_three_ways(handling_fee));
    processed.insert(
        "settlement_amount".to_string(),
        split_three_ways(settlement_amount),
    );

    let updates = vec![
        cell_update(SHEET_PRICING, 81, "E", processed["handling_fee"]),
        cell_update(SHEET_PRICING, 90, "C", processed["settlement_amount"]),
        date_keyed_update(
            SHEET_DISCOUNT_DETAIL,
            config.date.day(),
            &[
                ("X", processed["diesel_stats"]),
                ("Y", processed["diesel_discount"]),
            ],
        ),
    ];

    Ok(ExtractionOutcome { processed, updates })
}

/// 滴滴加油: the handling fee is the spread between prepaid and receivable.
pub(super) fn didi(
    raw: &RawExtractionResult,
    config: &ShiftConfig,
) -> Result<ExtractionOutcome, ExtractionError> {
    const LABEL: &str = "滴滴加油";
    let gas_volume = parse_numeric(raw.field(LABEL, "油品数量")?, None, 0.0);
    let gas_discount = parse_numeric(raw.field(LABEL, "油品优惠合计")?, None, 0.0);
    let prepaid = parse_numeric(raw.field(LABEL, "油品预收金额")?, None, 0.0);
    let receivable = parse_numeric(raw.field(LABEL, "油品应收金额")?, None, 0.0);
    let handling_fee = prepaid - receivable;

    let mut processed = ProcessedValues::new();
    processed.insert("gas_stats".to_string(), split_three_ways(gas_volume));
    processed.insert("gas_discount".to_string(), split_three_ways(gas_discount));
    processed.insert("handling_fee".to_string(), split_three_ways(handling_fee));
    processed.insert(
        "settlement_amount".to_string(),
        split_three_ways(receivable),
    );

    let updates = vec![
        cell_update(SHEET_PRICING, 81, "E", processed["handling_fee"]),
        cell_update(SHEET_PRICING, 88, "C", processed["settlement_amount"]),
        date_keyed_update(
            SHEET_DISCOUNT_DETAIL,
            config.date.day(),
            &[
                ("M", processed["gas_stats"]),
                ("N", processed["gas_discount"]),
            ],
        ),
    ];

    Ok(ExtractionOutcome { processed, updates })
}

/// 国通 1/2: order total minus refunds, each sibling writing its own row.
pub(super) fn guotong(
    raw: &RawExtractionResult,
    target_row: u32,
) -> Result<ExtractionOutcome, ExtractionError> {
    const LABEL: &str = "国通";
    let orders = parse_numeric(raw.field(LABEL, "订单金额")?, None, 0.0);
    let refunds = parse_numeric(raw.field(LABEL, "退款订单金额")?, None, 0.0);

    let mut processed = ProcessedValues::new();
    processed.insert(
        "settlement_amount".to_string(),
        split_three_ways(orders - refunds),
    );

    let updates = vec![cell_update(
        SHEET_PRICING,
        target_row,
        "H",
        processed["settlement_amount"],
    )];

    Ok(ExtractionOutcome { processed, updates })
}

/// 团油: the discount is whatever of the gross refuel amount neither the
/// settlement nor the channel fee accounts for.
pub(super) fn tuanyou(
    raw: &RawExtractionResult,
    config: &ShiftConfig,
) -> Result<ExtractionOutcome, ExtractionError> {
    const LABEL: &str = "团油";
    let gas_volume = parse_numeric(raw.field(LABEL, "加油升数汇总")?, Some("升"), 0.0);
    let handling_fee = parse_numeric(raw.field(LABEL, "通道费汇总")?, Some("元"), 0.0);
    let settlement_amount = parse_numeric(raw.field(LABEL, "实际结算金额汇总")?, Some("元"), 0.0);
    let gross_amount = parse_numeric(raw.field(LABEL, "加油金额汇总")?, Some("元"), 0.0);
    let gas_discount = gross_amount - settlement_amount - handling_fee;

    let mut processed = ProcessedValues::new();
    processed.insert("gas_stats".to_string(), split_three_ways(gas_volume));
    processed.insert("gas_discount".to_string(), split_three_ways(gas_discount));
    processed.insert("handling_fee".to_string(), split_three_ways(handling_fee));
    processed.insert(
        "settlement_amount".to_string(),
        split_three_ways(settlement_amount),
    );

    let updates = vec![
        cell_update(SHEET_PRICING, 81, "E", processed["handling_fee"]),
        cell_update(SHEET_PRICING, 89, "C", processed["settlement_amount"]),
        date_keyed_update(
            SHEET_DISCOUNT_DETAIL,
            config.date.day(),
            &[
                ("T", processed["gas_stats"]),
                ("U", processed["gas_discount"]),
            ],
        ),
    ];

    Ok(ExtractionOutcome { processed, updates })
}

/// POS terminal daily settlement.
pub(super) fn pos(raw: &RawExtractionResult) -> Result<ExtractionOutcome, ExtractionError> {
    const LABEL: &str = "POS";
    let settlement = parse_numeric(raw.field(LABEL, "结算总金额")?, None, 0.0);

    let mut processed = ProcessedValues::new();
    processed.insert("settlement_amount".to_string(), split_three_ways(settlement));

    let updates = vec![cell_update(
        SHEET_PRICING,
        80,
        "E",
        processed["settlement_amount"],
    )];

    Ok(ExtractionOutcome { processed, updates })
}

/// 超市销售收入: cash takings of the station shop.
pub(super) fn supermarket(raw: &RawExtractionResult) -> Result<ExtractionOutcome, ExtractionError> {
    const LABEL: &str = "超市销售收入";
    let cash = parse_numeric(raw.field(LABEL, "现金")?, None, 0.0);

    let mut processed = ProcessedValues::new();
    processed.insert("settlement_amount".to_string(), split_three_ways(cash));

    let updates = vec![cell_update(
        SHEET_PRICING,
        71,
        "H",
        processed["settlement_amount"],
    )];

    Ok(ExtractionOutcome { processed, updates })
}
