//! Raw invoices to a scorer-ready feature table.

use std::io::Write;

use chrono::{NaiveDateTime, NaiveTime};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::calendar::{calendar_features, CalendarFeatures, CALENDAR_COLUMNS};
use crate::encoding::CategoricalEncoder;
use crate::history::{
    aggregate_history, partition_chronological, HistoryConfig, HISTORY_COLUMNS,
    MAX_TRAILING_WINDOW_DAYS,
};
use crate::normalize::{normalize_raw, InvoiceRecord, SchemaError, DEFAULT_UNKNOWN_CATEGORY};
use crate::raw::{RawInputError, RawTable, INVOICE_AMOUNT, RAW_REQUIRED};
use crate::schema::{
    align_to_schema, ContractError, FeatureSchema, FeatureTable, ModelContract, METADATA_COLUMNS,
    TARGET_COLUMN,
};
use crate::target::derive_targets;
use crate::warnings::{BuildWarning, WarningLog, MAX_REPORTED_WARNINGS};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowOrder {
    /// Client, then invoice date.
    #[default]
    Partitioned,
    /// Same order as the raw input.
    Input,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureBuildConfig {
    pub history: HistoryConfig,
    pub unknown_category: String,
    pub row_order: RowOrder,
    pub max_reported_warnings: usize,
}

impl Default for FeatureBuildConfig {
    fn default() -> Self {
        Self {
            history: HistoryConfig::default(),
            unknown_category: DEFAULT_UNKNOWN_CATEGORY.to_string(),
            row_order: RowOrder::Partitioned,
            max_reported_warnings: MAX_REPORTED_WARNINGS,
        }
    }
}

#[derive(Debug, Error)]
pub enum FeatureBuildError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error(transparent)]
    RawInput(#[from] RawInputError),
    #[error("invalid feature build config: {0}")]
    InvalidConfig(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowMetadata {
    pub invoice_id: Option<String>,
    pub client_id: String,
    pub client_name: Option<String>,
    pub invoice_date: Option<NaiveDateTime>,
    /// Uploaded amount text, kept even when it could not be used as a feature.
    pub invoice_amount: Option<String>,
    pub material_name: String,
    pub payment_method: String,
    pub target: Option<u8>,
}

impl RowMetadata {
    fn from_record(record: &InvoiceRecord) -> Self {
        Self {
            invoice_id: record.invoice_id.clone(),
            client_id: record.client_id.clone(),
            client_name: record.client_name.clone(),
            invoice_date: record.invoice_date,
            invoice_amount: record.raw_invoice_amount.clone(),
            material_name: record.material_name.clone(),
            payment_method: record.payment_method.clone(),
            target: record.label.map(|label| label.delayed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub metadata: RowMetadata,
    /// One value per schema column, in schema order.
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureBuildReport {
    pub input_rows: u64,
    pub output_rows: u64,
    pub entity_count: u64,
    pub has_target: bool,
    pub parse_warnings: u64,
    pub unknown_category_warnings: u64,
    pub warnings: Vec<BuildWarning>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltFeatures {
    pub schema: FeatureSchema,
    pub rows: Vec<FeatureRow>,
    pub report: FeatureBuildReport,
}

impl BuiltFeatures {
    pub fn to_table(&self) -> FeatureTable {
        FeatureTable {
            columns: self.schema.columns.iter().map(|c| c.name.clone()).collect(),
            rows: self.rows.iter().map(|row| row.values.clone()).collect(),
        }
    }
}

pub fn validate_config(cfg: &FeatureBuildConfig) -> Result<(), FeatureBuildError> {
    if !(1..=MAX_TRAILING_WINDOW_DAYS).contains(&cfg.history.trailing_window_days) {
        return Err(FeatureBuildError::InvalidConfig(format!(
            "trailing_window_days must be in 1..={MAX_TRAILING_WINDOW_DAYS}"
        )));
    }

    if !(cfg.history.amount_z_epsilon.is_finite() && cfg.history.amount_z_epsilon > 0.0) {
        return Err(FeatureBuildError::InvalidConfig(
            "amount_z_epsilon must be a positive finite number".to_string(),
        ));
    }

    if cfg.unknown_category.trim().is_empty() {
        return Err(FeatureBuildError::InvalidConfig(
            "unknown_category must not be blank".to_string(),
        ));
    }

    Ok(())
}

/// Public entry: validates the contract, then builds features whose columns
/// are exactly the contract's `feature_cols`.
pub fn build_features_from_raw(
    raw: &RawTable,
    contract: &ModelContract,
    cfg: &FeatureBuildConfig,
) -> Result<BuiltFeatures, FeatureBuildError> {
    validate_config(cfg)?;
    let schema = contract.schema()?;
    let encoder = contract.encoder()?;
    build_features(raw, &schema, &encoder, cfg)
}

pub fn build_features(
    raw: &RawTable,
    schema: &FeatureSchema,
    encoder: &CategoricalEncoder,
    cfg: &FeatureBuildConfig,
) -> Result<BuiltFeatures, FeatureBuildError> {
    validate_config(cfg)?;

    info!(
        component = "features",
        event = "features.build.start",
        input_rows = raw.len(),
        raw_columns = raw.headers.len(),
        schema_columns = schema.len(),
        fingerprint = %schema.fingerprint,
        row_order = ?cfg.row_order
    );

    let mut warnings = WarningLog::with_cap(cfg.max_reported_warnings);
    let mut batch = normalize_raw(raw, &RAW_REQUIRED, &cfg.unknown_category, &mut warnings)?;
    derive_targets(&mut batch);

    let partition = partition_chronological(&batch.records);
    let history = aggregate_history(&batch.records, &partition, batch.has_labels, &cfg.history);
    let calendar: Vec<CalendarFeatures> = batch.records.par_iter().map(calendar_features).collect();

    let output_order: Vec<usize> = match cfg.row_order {
        RowOrder::Partitioned => partition.order.clone(),
        RowOrder::Input => (0..batch.records.len()).collect(),
    };

    let mut candidates = FeatureTable::new(candidate_columns(encoder));
    let mut metadata = Vec::with_capacity(output_order.len());
    for &idx in &output_order {
        let record = &batch.records[idx];
        let mut values = Vec::with_capacity(candidates.columns.len());
        values.push(record.invoice_amount.unwrap_or(f64::NAN));
        values.extend(history[idx].values());
        values.extend(calendar[idx].values());
        values.extend(encoder.encode_record(record, &mut warnings));
        candidates.rows.push(values);
        metadata.push(RowMetadata::from_record(record));
    }

    let aligned = align_to_schema(&candidates, schema);
    let rows: Vec<FeatureRow> = metadata
        .into_iter()
        .zip(aligned.rows)
        .map(|(metadata, values)| FeatureRow { metadata, values })
        .collect();

    if warnings.unknown_category_warnings > 0 {
        warn!(
            component = "features",
            event = "features.build.unknown_categories",
            unknown_category_warnings = warnings.unknown_category_warnings
        );
    }

    let report = FeatureBuildReport {
        input_rows: raw.len() as u64,
        output_rows: rows.len() as u64,
        entity_count: partition.entity_count() as u64,
        has_target: batch.has_labels,
        parse_warnings: warnings.parse_warnings,
        unknown_category_warnings: warnings.unknown_category_warnings,
        warnings: warnings.retained,
    };

    info!(
        component = "features",
        event = "features.build.finish",
        input_rows = report.input_rows,
        output_rows = report.output_rows,
        entity_count = report.entity_count,
        has_target = report.has_target,
        parse_warnings = report.parse_warnings,
        unknown_category_warnings = report.unknown_category_warnings
    );

    Ok(BuiltFeatures {
        schema: schema.clone(),
        rows,
        report,
    })
}

/// Every column the builder can produce before alignment.
pub fn candidate_columns(encoder: &CategoricalEncoder) -> Vec<String> {
    std::iter::once(INVOICE_AMOUNT)
        .chain(HISTORY_COLUMNS)
        .chain(CALENDAR_COLUMNS)
        .map(str::to_string)
        .chain(encoder.column_names())
        .collect()
}

/// Writes metadata columns (the target only when labels exist) followed by
/// the schema's features.
pub fn write_features_csv<W: Write>(
    writer: W,
    built: &BuiltFeatures,
) -> Result<(), FeatureBuildError> {
    let metadata_columns: Vec<&str> = METADATA_COLUMNS
        .iter()
        .copied()
        .filter(|name| built.report.has_target || *name != TARGET_COLUMN)
        .collect();

    let mut out = csv::Writer::from_writer(writer);
    let header: Vec<&str> = metadata_columns
        .iter()
        .copied()
        .chain(built.schema.columns.iter().map(|c| c.name.as_str()))
        .collect();
    out.write_record(&header)?;

    for row in &built.rows {
        let meta = &row.metadata;
        let mut record = vec![
            meta.invoice_id.clone().unwrap_or_default(),
            meta.client_id.clone(),
            meta.client_name.clone().unwrap_or_default(),
            meta.invoice_date.map(format_timestamp).unwrap_or_default(),
            meta.invoice_amount.clone().unwrap_or_default(),
            meta.material_name.clone(),
            meta.payment_method.clone(),
        ];
        if built.report.has_target {
            record.push(meta.target.map(|t| t.to_string()).unwrap_or_default());
        }
        record.extend(row.values.iter().map(|v| v.to_string()));
        out.write_record(&record)?;
    }

    out.flush()?;
    Ok(())
}

fn format_timestamp(ts: NaiveDateTime) -> String {
    if ts.time() == NaiveTime::MIN {
        ts.format("%Y-%m-%d").to_string()
    } else {
        ts.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}
