use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ExtractionError, UpdateError};

/// Pre-adjustment pricing sheet: fixed settlement cells plus fuel-type
/// sections with one row per pump.
pub const SHEET_PRICING: &str = "调价前";
/// Per-day fuel-discount detail sheet; day number lives in column B.
pub const SHEET_DISCOUNT_DETAIL: &str = "油品优惠明细 2";

/// Cells that receive the sum of every source's contribution within one
/// batch. Everything else is last-write-wins.
pub const ACCUMULATING_CELLS: &[(&str, u32, &str)] = &[(SHEET_PRICING, 81, "E")];

/// A 1-or-2-letter spreadsheet column label (A..Z, AA..ZZ).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ColumnRef(String);

impl ColumnRef {
    pub fn new(label: &str) -> Result<Self, UpdateError> {
        let label = label.trim().to_uppercase();
        if label.is_empty() || label.len() > 2 || !label.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(UpdateError::InvalidInstruction(format!(
                "invalid column label: {label:?}"
            )));
        }
        Ok(Self(label))
    }

    /// Zero-based column index (A→0, Z→25, AA→26).
    pub fn index(&self) -> u32 {
        let mut result = 0u32;
        for b in self.0.bytes() {
            result = result * 26 + u32::from(b - b'A' + 1);
        }
        result - 1
    }

    /// Inverse of [`ColumnRef::index`] (0→A, 25→Z, 26→AA).
    pub fn from_index(index: u32) -> Self {
        let mut n = index;
        let mut s = String::new();
        loop {
            let r = (n % 26) as u8;
            s.insert(0, (b'A' + r) as char);
            if n < 26 {
                break;
            }
            n = n / 26 - 1;
        }
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ColumnRef {
    type Error = UpdateError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        ColumnRef::new(&value)
    }
}

impl From<ColumnRef> for String {
    fn from(value: ColumnRef) -> Self {
        value.0
    }
}

/// Column from a literal label. Panics on an invalid label, so only for
/// compile-time-known references.
pub fn column(label: &'static str) -> ColumnRef {
    ColumnRef::new(label).expect("valid column literal")
}

/// Fuel-type row grouping on the pricing sheet. A marker cell in column A
/// opens a section that persists until the next marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Section {
    A,
    B,
    C,
}

impl Section {
    /// Section for a fuel-type label (0#柴油 → A, 92#汽油 → B, 95#汽油 → C).
    pub fn from_fuel_type(label: &str) -> Option<Section> {
        match label.trim() {
            "0#柴油" => Some(Section::A),
            "92#汽油" => Some(Section::B),
            "95#汽油" => Some(Section::C),
            _ => None,
        }
    }

    pub fn marker(&self) -> &'static str {
        match self {
            Section::A => "A",
            Section::B => "B",
            Section::C => "C",
        }
    }
}

/// One spreadsheet mutation, addressed one of three ways.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpdateInstruction {
    /// Absolute addressing: one value into one fixed cell (1-based row).
    Cell {
        sheet: String,
        row: u32,
        column: ColumnRef,
        value: f64,
    },
    /// Lookup within a fuel-type section by normalized machine number.
    Categorical {
        sheet: String,
        section: Section,
        lookup_key: String,
        column: ColumnRef,
        value: f64,
    },
    /// All column writes for one calendar day's row, grouped.
    DateKeyed {
        sheet: String,
        date_day: u32,
        columns: Vec<(ColumnRef, f64)>,
    },
}

impl UpdateInstruction {
    pub fn sheet(&self) -> &str {
        match self {
            UpdateInstruction::Cell { sheet, .. }
            | UpdateInstruction::Categorical { sheet, .. }
            | UpdateInstruction::DateKeyed { sheet, .. } => sheet,
        }
    }
}

/// Raw field map returned by the vision service or assembled from a table,
/// keyed by the Chinese business term. Consumed exactly once by an extractor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawExtractionResult(serde_json::Map<String, Value>);

impl RawExtractionResult {
    pub fn from_object(fields: serde_json::Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Required-field access; a missing or null field aborts the category.
    pub fn field(
        &self,
        category: &'static str,
        field: &'static str,
    ) -> Result<&Value, ExtractionError> {
        match self.0.get(field) {
            Some(Value::Null) | None => Err(ExtractionError::MissingField { category, field }),
            Some(value) => Ok(value),
        }
    }
}

/// Derived business figures, keyed by metric name. Ordered so reports and
/// tests are stable.
pub type ProcessedValues = BTreeMap<String, f64>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn column_index_round_trip() {
        for (label, index) in [("A", 0), ("B", 1), ("Z", 25), ("AA", 26), ("AV", 47), ("AW", 48)]
        {
            let col = ColumnRef::new(label).unwrap();
            assert_eq!(col.index(), index, "{label}");
            assert_eq!(ColumnRef::from_index(index), col);
        }
    }

    #[test]
    fn column_label_is_normalized() {
        assert_eq!(ColumnRef::new(" e ").unwrap().as_str(), "E");
    }

    #[test]
    fn column_rejects_garbage() {
        for label in ["", "ABC", "4", "A1", "é"] {
            assert!(ColumnRef::new(label).is_err(), "{label:?}");
        }
    }

    #[test]
    fn section_from_fuel_type() {
        assert_eq!(Section::from_fuel_type(" 0#柴油 "), Some(Section::A));
        assert_eq!(Section::from_fuel_type("92#汽油"), Some(Section::B));
        assert_eq!(Section::from_fuel_type("95#汽油"), Some(Section::C));
        assert_eq!(Section::from_fuel_type("98#汽油"), None);
    }

    #[test]
    fn instruction_serde_round_trip() {
        let instruction = UpdateInstruction::DateKeyed {
            sheet: SHEET_DISCOUNT_DETAIL.to_string(),
            date_day: 14,
            columns: vec![(column("X"), 12.5), (column("Y"), 3.0)],
        };
        let text = serde_json::to_string(&instruction).unwrap();
        let back: UpdateInstruction = serde_json::from_str(&text).unwrap();
        assert_eq!(back, instruction);
    }

    #[test]
    fn missing_and_null_fields_are_errors() {
        let raw = RawExtractionResult::from_object(
            json!({"结算金额": "131.45", "服务费": null})
                .as_object()
                .unwrap()
                .clone(),
        );
        assert!(raw.field("货车帮", "结算金额").is_ok());
        assert!(matches!(
            raw.field("货车帮", "服务费"),
            Err(ExtractionError::MissingField { field: "服务费", .. })
        ));
        assert!(raw.field("货车帮", "柴油统计").is_err());
    }
}
