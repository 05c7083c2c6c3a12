//! Table-sourced category extractors. Reading is separated from the
//! aggregation itself, so the business rules stay testable without files.

use std::path::Path;

use chrono::NaiveDateTime;
use regex::Regex;
use tracing::warn;

use super::{
    categorical_update, cell_update, date_keyed_update, split_three_ways, ExtractionOutcome,
};
use crate::config::ShiftConfig;
use crate::error::ExtractionError;
use crate::tables::{cell_datetime, cell_f64, cell_str, Table};
use crate::types::{
    ProcessedValues, Section, SHEET_DISCOUNT_DETAIL, SHEET_PRICING,
};

use chrono::Datelike;

/// 油品时间统计: per-pump refuel volumes grouped into fuel-type sections.
/// Two title rows precede the data; columns B, C, D are machine number,
/// fuel type, and liters.
pub(super) fn fuel_time_stats(path: &Path) -> Result<ExtractionOutcome, ExtractionError> {
    let table = Table::open_positional(path, 2)?;
    let mut rows = Vec::new();
    for row in table.data_rows() {
        if table.row_is_blank(row, &[1, 2, 3]) {
            continue;
        }
        rows.push(PumpRow {
            machine: cell_str(table.value(row, 1)).unwrap_or_default().trim().to_string(),
            fuel: cell_str(table.value(row, 2)).unwrap_or_default(),
            volume: cell_f64(table.value(row, 3)),
        });
    }
    Ok(pump_volume_updates(&rows))
}

pub(crate) struct PumpRow {
    pub machine: String,
    pub fuel: String,
    pub volume: Option<f64>,
}

pub(crate) fn pump_volume_updates(rows: &[PumpRow]) -> ExtractionOutcome {
    let mut updates = Vec::new();
    for row in rows {
        let Some(volume) = row.volume else {
            continue;
        };
        let Some(section) = Section::from_fuel_type(&row.fuel) else {
            continue;
        };
        if row.machine.is_empty() {
            continue;
        }
        updates.push(categorical_update(
            SHEET_PRICING,
            section,
            row.machine.clone(),
            "D",
            split_three_ways(volume),
        ));
    }
    ExtractionOutcome {
        processed: ProcessedValues::new(),
        updates,
    }
}

/// 油品优惠: discounts summed by fuel-type prefix into gasoline vs diesel.
pub(super) fn fuel_discounts(
    path: &Path,
    config: &ShiftConfig,
) -> Result<ExtractionOutcome, ExtractionError> {
    let table = Table::open_with_header(path, 0)?;
    let c_product = table.column("油品")?;
    let c_discount = table.column("优惠")?;
    let mut rows = Vec::new();
    for row in table.data_rows() {
        if table.row_is_blank(row, &[c_product, c_discount]) {
            continue;
        }
        rows.push((
            cell_str(table.value(row, c_product)).unwrap_or_default(),
            cell_f64(table.value(row, c_discount)).unwrap_or(0.0),
        ));
    }
    Ok(discount_updates(&rows, config))
}

pub(crate) fn discount_updates(rows: &[(String, f64)], config: &ShiftConfig) -> ExtractionOutcome {
    let mut gasoline = 0.0;
    let mut diesel = 0.0;
    for (product, discount) in rows {
        let product = product.trim();
        if product.contains("92#") || product.contains("95#") {
            gasoline += discount;
        } else if product.contains("0#") {
            diesel += discount;
        }
    }

    let mut processed = ProcessedValues::new();
    processed.insert("gasoline_discount".to_string(), split_three_ways(gasoline));
    processed.insert("diesel_discount".to_string(), split_three_ways(diesel));

    let updates = vec![date_keyed_update(
        SHEET_DISCOUNT_DETAIL,
        config.date.day(),
        &[
            ("D", processed["diesel_discount"]),
            ("G", processed["gasoline_discount"]),
        ],
    )];

    ExtractionOutcome { processed, updates }
}

/// 加油明细: settlement amounts split by payment method. Matching is by
/// substring, since exports decorate the method with channel suffixes.
pub(super) fn refuel_details(path: &Path) -> Result<ExtractionOutcome, ExtractionError> {
    let table = Table::open_with_header(path, 2)?;
    let c_amount = table.column("结算金额")?;
    let c_method = table.column("收款方式")?;
    let mut rows = Vec::new();
    for row in table.data_rows() {
        if table.row_is_blank(row, &[c_amount, c_method]) {
            continue;
        }
        rows.push((
            cell_f64(table.value(row, c_amount)).unwrap_or(0.0),
            cell_str(table.value(row, c_method)).unwrap_or_default(),
        ));
    }
    Ok(refuel_updates(&rows))
}

pub(crate) fn refuel_updates(rows: &[(f64, String)]) -> ExtractionOutcome {
    let mut customer = 0.0;
    let mut electric = 0.0;
    for (amount, method) in rows {
        if method.contains("充值卡收款") {
            customer += amount;
        } else if method.contains("电子卡收款") {
            electric += amount;
        }
    }

    let mut processed = ProcessedValues::new();
    processed.insert("customer_discount".to_string(), split_three_ways(customer));
    processed.insert("electric_discount".to_string(), split_three_ways(electric));

    let updates = vec![
        cell_update(SHEET_PRICING, 76, "H", processed["customer_discount"]),
        cell_update(SHEET_PRICING, 78, "H", processed["electric_discount"]),
    ];

    ExtractionOutcome { processed, updates }
}

/// One verified short-video voucher transaction.
pub(crate) struct VoucherRow {
    pub time: NaiveDateTime,
    pub product: String,
    pub quantity: f64,
    pub received: f64,
    pub merchant: f64,
}

/// 抖音: voucher reconciliation. Face values are read off the product name
/// (e.g. "100元代金券"); rows outside the shift window are ignored.
pub(super) fn douyin(
    path: &Path,
    config: &ShiftConfig,
) -> Result<ExtractionOutcome, ExtractionError> {
    let table = Table::open_with_header(path, 0)?;
    let c_time = table.column("核销时间")?;
    let c_product = table.column("商品名称")?;
    let c_quantity = table.column("实际核销数量")?;
    let c_received = table.column("订单实收")?;
    let c_merchant = table.column("商家应得")?;

    let mut rows = Vec::new();
    for row in table.data_rows() {
        if table.row_is_blank(row, &[c_time, c_product, c_quantity, c_received, c_merchant]) {
            continue;
        }
        let time = cell_datetime(table.value(row, c_time)).ok_or_else(|| {
            ExtractionError::Table(format!("invalid 核销时间 at row {}", row + 1))
        })?;
        rows.push(VoucherRow {
            time,
            product: cell_str(table.value(row, c_product)).unwrap_or_default(),
            quantity: cell_f64(table.value(row, c_quantity)).unwrap_or(0.0),
            received: cell_f64(table.value(row, c_received)).unwrap_or(0.0),
            merchant: cell_f64(table.value(row, c_merchant)).unwrap_or(0.0),
        });
    }
    Ok(aggregate_vouchers(&rows, config))
}

fn voucher_face_value(re: &Regex, product: &str) -> f64 {
    match re
        .captures(product)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
    {
        Some(amount) => amount,
        None => {
            warn!(product, "could not extract voucher amount");
            0.0
        }
    }
}

pub(crate) fn aggregate_vouchers(rows: &[VoucherRow], config: &ShiftConfig) -> ExtractionOutcome {
    let re = Regex::new(r"(\d+)元").expect("voucher amount regex");
    let mut face_value = 0.0;
    let mut received = 0.0;
    let mut merchant = 0.0;
    for row in rows {
        if row.time < config.work_start_time || row.time > config.shift_time {
            continue;
        }
        face_value += voucher_face_value(&re, &row.product) * row.quantity;
        received += row.received;
        merchant += row.merchant;
    }

    let total_discount = face_value - received;
    let handling_fee = received - merchant;
    let gas_quantity = if config.gas_price() > 0.0 {
        face_value / config.gas_price()
    } else {
        0.0
    };

    let mut processed = ProcessedValues::new();
    processed.insert("gas_quantity".to_string(), split_three_ways(gas_quantity));
    processed.insert(
        "total_discount".to_string(),
        split_three_ways(total_discount),
    );
    processed.insert("handling_fee".to_string(), split_three_ways(handling_fee));
    processed.insert("merchant_revenue".to_string(), split_three_ways(merchant));

    let updates = vec![
        cell_update(SHEET_PRICING, 81, "E", processed["handling_fee"]),
        cell_update(SHEET_PRICING, 93, "C", processed["merchant_revenue"]),
        date_keyed_update(
            SHEET_DISCOUNT_DETAIL,
            config.date.day(),
            &[
                ("AV", processed["gas_quantity"]),
                ("AW", processed["total_discount"]),
            ],
        ),
    ];

    ExtractionOutcome { processed, updates }
}

/// 通联: income rows of the payment-channel statement.
pub(super) fn tonglian(path: &Path) -> Result<ExtractionOutcome, ExtractionError> {
    let table = Table::open_with_header(path, 1)?;
    let c_amount = table.column("原始金额")?;
    let c_direction = table.column("收支方向")?;
    let mut rows = Vec::new();
    for row in table.data_rows() {
        if table.row_is_blank(row, &[c_amount, c_direction]) {
            continue;
        }
        rows.push((
            cell_f64(table.value(row, c_amount)).unwrap_or(0.0),
            cell_str(table.value(row, c_direction)).unwrap_or_default(),
        ));
    }
    Ok(tonglian_updates(&rows))
}

pub(crate) fn tonglian_updates(rows: &[(f64, String)]) -> ExtractionOutcome {
    let income: f64 = rows
        .iter()
        .filter(|(_, direction)| direction.trim() == "收入")
        .map(|(amount, _)| amount)
        .sum();

    let mut processed = ProcessedValues::new();
    processed.insert("income".to_string(), split_three_ways(income));

    let updates = vec![cell_update(SHEET_PRICING, 86, "C", processed["income"])];

    ExtractionOutcome { processed, updates }
}

/// 充值明细: card recharges split into online-wallet vs cash payments;
/// blank amount cells count as zero.
pub(super) fn recharge_details(path: &Path) -> Result<ExtractionOutcome, ExtractionError> {
    let table = Table::open_with_header(path, 2)?;
    let c_amount = table.column("充值金额")?;
    let c_bonus = table.column("充值赠送")?;
    let c_method = table.column("付款方式")?;
    let mut rows = Vec::new();
    for row in table.data_rows() {
        if table.row_is_blank(row, &[c_amount, c_bonus, c_method]) {
            continue;
        }
        rows.push(RechargeRow {
            amount: cell_f64(table.value(row, c_amount)).unwrap_or(0.0),
            bonus: cell_f64(table.value(row, c_bonus)).unwrap_or(0.0),
            method: cell_str(table.value(row, c_method)).unwrap_or_default(),
        });
    }
    Ok(recharge_updates(&rows))
}

pub(crate) struct RechargeRow {
    pub amount: f64,
    pub bonus: f64,
    pub method: String,
}

pub(crate) fn recharge_updates(rows: &[RechargeRow]) -> ExtractionOutcome {
    let mut online = 0.0;
    let mut cash = 0.0;
    for row in rows {
        if row.method.contains("微信") || row.method.contains("支付宝") {
            online += row.amount + row.bonus;
        } else if row.method.contains("现金") {
            cash += row.amount + row.bonus;
        }
    }

    let mut processed = ProcessedValues::new();
    processed.insert("online_recharge".to_string(), split_three_ways(online));
    processed.insert("cash_recharge".to_string(), split_three_ways(cash));

    let updates = vec![
        cell_update(SHEET_PRICING, 68, "C", processed["online_recharge"]),
        cell_update(SHEET_PRICING, 73, "C", processed["cash_recharge"]),
    ];

    ExtractionOutcome { processed, updates }
}
