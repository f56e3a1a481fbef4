//! Raw invoice tables: the input contract, CSV and SQLite ledger readers, and
//! header-only template export.

use std::fs;
use std::io::Read;
use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub const INVOICE_ID: &str = "invoice_id";
pub const CLIENT_ID: &str = "client_id";
pub const CLIENT_NAME: &str = "client_name";
pub const INVOICE_DATE: &str = "invoice_date";
pub const PAYMENT_DUE_DATE: &str = "payment_due_date";
pub const INVOICE_AMOUNT: &str = "invoice_amount";
pub const MATERIAL_NAME: &str = "material_name";
pub const PAYMENT_METHOD: &str = "payment_method";
pub const PAYMENT_ACTUAL_DATE: &str = "payment_actual_date";

pub const RAW_REQUIRED: [&str; 8] = [
    INVOICE_ID,
    CLIENT_ID,
    CLIENT_NAME,
    INVOICE_DATE,
    PAYMENT_DUE_DATE,
    INVOICE_AMOUNT,
    MATERIAL_NAME,
    PAYMENT_METHOD,
];

/// Used only to derive the evaluation target.
pub const RAW_OPTIONAL: [&str; 1] = [PAYMENT_ACTUAL_DATE];

/// Name of the append-only ledger table read by [`load_raw_from_store`].
pub const LEDGER_TABLE: &str = "invoices";

#[derive(Debug, Error)]
pub enum RawInputError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("raw input has no header row")]
    MissingHeader,
}

/// Untyped raw records. Cells are text; blank cells are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers
                .into_iter()
                .map(|h| h.into().trim().trim_start_matches('\u{feff}').to_string())
                .collect(),
            rows: Vec::new(),
        }
    }

    /// Appends a row, padding short rows with nulls and dropping cells past
    /// the last header.
    pub fn push_row<I, S>(&mut self, cells: I)
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        let mut row: Vec<Option<String>> = cells
            .into_iter()
            .take(self.headers.len())
            .map(|cell| {
                cell.map(Into::into)
                    .filter(|value: &String| !value.trim().is_empty())
            })
            .collect();
        row.resize(self.headers.len(), None);
        self.rows.push(row);
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows.get(row)?.get(col)?.as_deref()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub fn read_raw_csv<R: Read>(reader: R) -> Result<RawTable, RawInputError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Err(RawInputError::MissingHeader);
    }

    let mut table = RawTable::new(headers.iter());
    for record in reader.records() {
        let record = record?;
        table.push_row(record.iter().map(Some));
    }

    Ok(table)
}

pub fn read_raw_csv_path(path: &Path) -> Result<RawTable, RawInputError> {
    let file = fs::File::open(path)?;
    let table = read_raw_csv(file)?;
    info!(
        component = "raw",
        event = "raw.csv.loaded",
        path = %path.display(),
        columns = table.headers.len(),
        rows = table.len()
    );
    Ok(table)
}

/// Reads the whole `invoices` ledger in insertion order.
pub fn load_raw_from_store(store_path: &Path) -> Result<RawTable, RawInputError> {
    let conn = Connection::open(store_path)?;
    let mut stmt = conn.prepare(&format!("SELECT * FROM {LEDGER_TABLE} ORDER BY rowid ASC"))?;
    let headers: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let column_count = headers.len();
    let mut table = RawTable::new(headers);

    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut cells = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            cells.push(cell_text(row.get_ref(idx)?));
        }
        table.push_row(cells);
    }

    info!(
        component = "raw",
        event = "raw.store.loaded",
        store_path = %store_path.display(),
        columns = table.headers.len(),
        rows = table.len()
    );

    Ok(table)
}

fn cell_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => None,
        ValueRef::Integer(v) => Some(v.to_string()),
        ValueRef::Real(v) => Some(v.to_string()),
        ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Header-only CSV for the raw upload format (required then optional fields).
pub fn raw_template_csv() -> Result<String, RawInputError> {
    let headers: Vec<&str> = RAW_REQUIRED.iter().chain(RAW_OPTIONAL.iter()).copied().collect();
    header_only_csv(&headers)
}

/// Writes a single header row, dropping repeated names while keeping the
/// first occurrence's position.
pub fn header_only_csv(headers: &[&str]) -> Result<String, RawInputError> {
    let mut seen = Vec::with_capacity(headers.len());
    for header in headers {
        if !seen.contains(header) {
            seen.push(*header);
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&seen)?;
    let bytes = writer
        .into_inner()
        .map_err(|err| RawInputError::Io(err.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
