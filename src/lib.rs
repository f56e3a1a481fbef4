//! Point-in-time feature builder for invoice-level credit risk scoring.
//!
//! Current implemented scope:
//! - raw invoice intake (CSV upload, SQLite ledger) and header-only templates
//! - normalization, optional delay target, per-client leakage-free history
//! - calendar features, frozen-vocabulary indicators, schema alignment
//! - HTTP routes for upload tooling

mod calendar;
mod encoding;
mod history;
mod normalize;
mod observability;
mod pipeline;
mod raw;
mod schema;
mod server;
mod target;
mod warnings;

pub use calendar::{
    calendar_features, last_day_of_month, last_day_of_quarter, quarter_of, CalendarFeatures,
    CALENDAR_COLUMNS,
};
pub use encoding::{CategoricalEncoder, CategoryVocabulary, NominalField};
pub use history::{
    aggregate_history, partition_chronological, HistoryConfig, HistoryFeatures, Partition,
    DEFAULT_AMOUNT_Z_EPSILON, DEFAULT_TRAILING_WINDOW_DAYS, HISTORY_COLUMNS,
    MAX_TRAILING_WINDOW_DAYS,
};
pub use normalize::{
    normalize_raw, parse_amount, parse_timestamp, validate_raw_schema, InvoiceRecord,
    NormalizedBatch, SchemaError, DEFAULT_UNKNOWN_CATEGORY,
};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_contract_loaded, log_features_written,
    logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError,
};
pub use pipeline::{
    build_features, build_features_from_raw, candidate_columns, validate_config,
    write_features_csv, BuiltFeatures, FeatureBuildConfig, FeatureBuildError, FeatureBuildReport,
    FeatureRow, RowMetadata, RowOrder,
};
pub use raw::{
    header_only_csv, load_raw_from_store, raw_template_csv, read_raw_csv, read_raw_csv_path,
    RawInputError, RawTable, LEDGER_TABLE, RAW_OPTIONAL, RAW_REQUIRED,
};
pub use schema::{
    align_to_schema, assert_schema_compatible, feature_template_csv, ContractError,
    FeatureColumn, FeatureDType, FeatureSchema, FeatureTable, ModelContract,
    FEATURE_SCHEMA_VERSION, METADATA_COLUMNS, TARGET_COLUMN,
};
pub use server::{feature_router, ErrorBody, FeatureService, RawSchemaInfo};
pub use target::{derive_targets, whole_days_between, DelayLabel};
pub use warnings::{BuildWarning, WarningLog, MAX_REPORTED_WARNINGS};
