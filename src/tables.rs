//! Table-file access over calamine: header-row location, named-column
//! lookup, and coercion of heterogeneous cells.

use std::collections::HashMap;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Range, Reader};
use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::error::ExtractionError;

/// First worksheet of an exported table file, with rows addressed by
/// absolute (file) coordinates regardless of where the used range starts.
pub struct Table {
    range: Range<Data>,
    columns: HashMap<String, u32>,
    first_data_row: u32,
}

impl Table {
    fn load_range(path: &Path) -> Result<Range<Data>, ExtractionError> {
        let mut workbook = open_workbook_auto(path)
            .map_err(|e| ExtractionError::Table(format!("Could not open table file: {e}")))?;
        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| ExtractionError::Table("workbook has no sheets".to_string()))?;
        workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| ExtractionError::Table(format!("Could not read sheet: {e}")))
    }

    /// Open with the row at absolute 0-based index `header_row` as the
    /// header; data rows follow it.
    pub fn open_with_header(path: &Path, header_row: u32) -> Result<Self, ExtractionError> {
        let range = Self::load_range(path)?;
        let mut columns = HashMap::new();
        if let Some((_, end_col)) = range.end() {
            for col in 0..=end_col {
                if let Some(name) = cell_str(range.get_value((header_row, col))) {
                    let name = name.trim().to_string();
                    if !name.is_empty() {
                        columns.entry(name).or_insert(col);
                    }
                }
            }
        }
        Ok(Self {
            range,
            columns,
            first_data_row: header_row + 1,
        })
    }

    /// Open without a header; data starts at absolute 0-based row
    /// `first_data_row` and cells are addressed positionally.
    pub fn open_positional(path: &Path, first_data_row: u32) -> Result<Self, ExtractionError> {
        let range = Self::load_range(path)?;
        Ok(Self {
            range,
            columns: HashMap::new(),
            first_data_row,
        })
    }

    /// Absolute column index for a header name.
    pub fn column(&self, name: &str) -> Result<u32, ExtractionError> {
        self.columns
            .get(name)
            .copied()
            .ok_or_else(|| ExtractionError::MissingColumn(name.to_string()))
    }

    /// Absolute 0-based indices of the data rows.
    pub fn data_rows(&self) -> impl Iterator<Item = u32> + '_ {
        let last = self.range.end().map(|(row, _)| row);
        let first = self.first_data_row;
        (first..=last.unwrap_or(0)).filter(move |_| last.is_some())
    }

    pub fn value(&self, row: u32, col: u32) -> Option<&Data> {
        self.range.get_value((row, col))
    }

    /// True when every listed column of the row is empty; exports commonly
    /// end with such filler rows.
    pub fn row_is_blank(&self, row: u32, cols: &[u32]) -> bool {
        cols.iter().all(|&col| {
            cell_str(self.value(row, col))
                .map(|s| s.trim().is_empty())
                .unwrap_or(true)
        })
    }
}

/// Cell as display text. Empty cells yield `None`.
pub fn cell_str(cell: Option<&Data>) -> Option<String> {
    let c = cell?;
    match c {
        Data::String(s) => Some(s.clone()),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                Some(format!("{}", *f as i64))
            } else {
                Some(f.to_string())
            }
        }
        Data::Int(i) => Some(i.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        Data::Empty => None,
        _ => Some(c.to_string()),
    }
}

/// Cell as a number; strings are trimmed and comma-stripped. Anything that
/// does not carry a number yields `None`.
pub fn cell_f64(cell: Option<&Data>) -> Option<f64> {
    let c = cell?;
    match c {
        Data::Float(f) => Some(*f),
        Data::Int(i) => Some(*i as f64),
        Data::DateTime(dt) => Some(dt.as_f64()),
        Data::String(s) => {
            let s = s.trim().replace(',', "");
            if s.is_empty() {
                None
            } else {
                s.parse::<f64>().ok()
            }
        }
        _ => None,
    }
}

/// Cell as a timestamp: Excel serial numbers (1899-12-30 base, fractional
/// day as seconds) or common date-time strings.
pub fn cell_datetime(cell: Option<&Data>) -> Option<NaiveDateTime> {
    let c = cell?;
    match c {
        Data::Float(f) => excel_serial_to_datetime(*f),
        Data::Int(i) => excel_serial_to_datetime(*i as f64),
        Data::DateTime(dt) => excel_serial_to_datetime(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => parse_datetime_string(s),
        Data::String(s) => parse_datetime_string(s),
        _ => None,
    }
}

fn parse_datetime_string(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    for fmt in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn excel_serial_to_datetime(v: f64) -> Option<NaiveDateTime> {
    if !v.is_finite() {
        return None;
    }
    let days = v.floor();
    let secs = ((v - days) * 86_400.0).round() as i64;
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    Some(base + Duration::days(days as i64) + Duration::seconds(secs))
}
