//! Raw-record validation and coercion into typed invoices.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::raw::{
    RawTable, CLIENT_ID, CLIENT_NAME, INVOICE_AMOUNT, INVOICE_DATE, INVOICE_ID, MATERIAL_NAME,
    PAYMENT_ACTUAL_DATE, PAYMENT_DUE_DATE, PAYMENT_METHOD,
};
use crate::target::DelayLabel;
use crate::warnings::{BuildWarning, WarningLog};

pub const DEFAULT_UNKNOWN_CATEGORY: &str = "Unknown";

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("missing raw columns: {missing:?}")]
    MissingRawColumns { missing: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    /// Position in the raw input, used for stable tie-breaking.
    pub row_index: usize,
    pub invoice_id: Option<String>,
    pub client_id: String,
    pub client_name: Option<String>,
    pub invoice_date: Option<NaiveDateTime>,
    pub payment_due_date: Option<NaiveDateTime>,
    pub payment_actual_date: Option<NaiveDateTime>,
    /// Coerced amount used by the features.
    pub invoice_amount: Option<f64>,
    /// Amount cell exactly as uploaded (trimmed), passed through to metadata.
    pub raw_invoice_amount: Option<String>,
    pub payment_method: String,
    pub material_name: String,
    pub label: Option<DelayLabel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBatch {
    pub records: Vec<InvoiceRecord>,
    /// Whether the raw input carried a settlement-date column at all.
    pub has_actual_dates: bool,
    pub has_labels: bool,
}

pub fn validate_raw_schema(table: &RawTable, required: &[&str]) -> Result<(), SchemaError> {
    let missing: Vec<String> = required
        .iter()
        .filter(|field| !table.has_column(field))
        .map(|field| field.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        warn!(
            component = "normalize",
            event = "normalize.schema.missing_columns",
            missing = ?missing
        );
        Err(SchemaError::MissingRawColumns { missing })
    }
}

pub fn normalize_raw(
    table: &RawTable,
    required: &[&str],
    unknown_category: &str,
    warnings: &mut WarningLog,
) -> Result<NormalizedBatch, SchemaError> {
    validate_raw_schema(table, required)?;

    let cols = Columns::resolve(table);
    let mut records = Vec::with_capacity(table.len());

    for row_index in 0..table.len() {
        let text = |col: Option<usize>| col.and_then(|c| table.cell(row_index, c));

        let invoice_date = date_cell(text(cols.invoice_date), INVOICE_DATE, row_index, warnings);
        let payment_due_date =
            date_cell(text(cols.payment_due_date), PAYMENT_DUE_DATE, row_index, warnings);
        let payment_actual_date = date_cell(
            text(cols.payment_actual_date),
            PAYMENT_ACTUAL_DATE,
            row_index,
            warnings,
        );

        let invoice_amount = match text(cols.invoice_amount) {
            Some(raw) => {
                let parsed = parse_amount(raw);
                if parsed.is_none() {
                    warnings.push(BuildWarning::UnparsableAmount {
                        row_index,
                        value: raw.to_string(),
                    });
                }
                parsed
            }
            None => None,
        };

        records.push(InvoiceRecord {
            row_index,
            invoice_id: text(cols.invoice_id).map(|v| v.trim().to_string()),
            client_id: text(cols.client_id)
                .map(|v| v.trim().to_string())
                .unwrap_or_default(),
            client_name: text(cols.client_name).map(|v| v.trim().to_string()),
            invoice_date,
            payment_due_date,
            payment_actual_date,
            invoice_amount,
            raw_invoice_amount: text(cols.invoice_amount).map(|v| v.trim().to_string()),
            payment_method: category_cell(text(cols.payment_method), unknown_category),
            material_name: category_cell(text(cols.material_name), unknown_category),
            label: None,
        });
    }

    if warnings.parse_warnings > 0 {
        warn!(
            component = "normalize",
            event = "normalize.parse_warnings",
            rows = records.len(),
            parse_warnings = warnings.parse_warnings
        );
    }

    Ok(NormalizedBatch {
        records,
        has_actual_dates: cols.payment_actual_date.is_some(),
        has_labels: false,
    })
}

/// Parses the date/time shapes seen in invoice exports. Offsets are
/// normalised to UTC; date-only values land on midnight.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date.and_time(NaiveTime::MIN));
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(ts);
        }
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|ts| ts.naive_utc())
}

/// Amounts must be finite and non-negative.
pub fn parse_amount(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

struct Columns {
    invoice_id: Option<usize>,
    client_id: Option<usize>,
    client_name: Option<usize>,
    invoice_date: Option<usize>,
    payment_due_date: Option<usize>,
    payment_actual_date: Option<usize>,
    invoice_amount: Option<usize>,
    payment_method: Option<usize>,
    material_name: Option<usize>,
}

impl Columns {
    fn resolve(table: &RawTable) -> Self {
        Self {
            invoice_id: table.column_index(INVOICE_ID),
            client_id: table.column_index(CLIENT_ID),
            client_name: table.column_index(CLIENT_NAME),
            invoice_date: table.column_index(INVOICE_DATE),
            payment_due_date: table.column_index(PAYMENT_DUE_DATE),
            payment_actual_date: table.column_index(PAYMENT_ACTUAL_DATE),
            invoice_amount: table.column_index(INVOICE_AMOUNT),
            payment_method: table.column_index(PAYMENT_METHOD),
            material_name: table.column_index(MATERIAL_NAME),
        }
    }
}

fn date_cell(
    raw: Option<&str>,
    field: &str,
    row_index: usize,
    warnings: &mut WarningLog,
) -> Option<NaiveDateTime> {
    let raw = raw?;
    let parsed = parse_timestamp(raw);
    if parsed.is_none() {
        warnings.push(BuildWarning::UnparsableDate {
            row_index,
            field: field.to_string(),
            value: raw.to_string(),
        });
    }
    parsed
}

fn category_cell(raw: Option<&str>, unknown_category: &str) -> String {
    match raw.map(str::trim) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => unknown_category.to_string(),
    }
}
