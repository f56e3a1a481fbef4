//! Scorer-owned feature schema, the model contract it ships in, and the
//! aligner that forces a produced table onto it.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::encoding::{CategoricalEncoder, CategoryVocabulary};
use crate::raw::{
    header_only_csv, RawInputError, CLIENT_ID, CLIENT_NAME, INVOICE_AMOUNT, INVOICE_DATE,
    INVOICE_ID, MATERIAL_NAME, PAYMENT_METHOD,
};

pub const FEATURE_SCHEMA_VERSION: u32 = 1;

pub const TARGET_COLUMN: &str = "target";

/// Passthrough columns carried next to the features, in output order.
pub const METADATA_COLUMNS: [&str; 8] = [
    INVOICE_ID,
    CLIENT_ID,
    CLIENT_NAME,
    INVOICE_DATE,
    INVOICE_AMOUNT,
    MATERIAL_NAME,
    PAYMENT_METHOD,
    TARGET_COLUMN,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureDType {
    F64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub dtype: FeatureDType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<FeatureColumn>,
}

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid contract JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("feature list is empty")]
    EmptyFeatureList,
    #[error("feature name at position {position} is blank")]
    BlankFeatureName { position: usize },
    #[error("feature {0} is listed more than once")]
    DuplicateFeature(String),
    #[error("vocabulary for {0} is declared more than once")]
    DuplicateVocabulary(String),
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
}

impl FeatureSchema {
    pub fn from_feature_names<S: AsRef<str>>(names: &[S]) -> Result<Self, ContractError> {
        if names.is_empty() {
            return Err(ContractError::EmptyFeatureList);
        }

        let mut seen = HashSet::new();
        let mut columns = Vec::with_capacity(names.len());
        for (position, name) in names.iter().enumerate() {
            let name = name.as_ref();
            if name.trim().is_empty() {
                return Err(ContractError::BlankFeatureName { position });
            }
            if !seen.insert(name) {
                return Err(ContractError::DuplicateFeature(name.to_string()));
            }
            columns.push(FeatureColumn {
                name: name.to_string(),
                dtype: FeatureDType::F64,
            });
        }

        let fingerprint = schema_fingerprint(FEATURE_SCHEMA_VERSION, &columns);
        Ok(Self {
            version: FEATURE_SCHEMA_VERSION,
            fingerprint,
            columns,
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &FeatureSchema,
) -> Result<(), ContractError> {
    if expected_version != actual.version {
        return Err(ContractError::SchemaVersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(ContractError::SchemaFingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

fn schema_fingerprint(version: u32, columns: &[FeatureColumn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{version};"));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(":f64;");
    }
    hex::encode(hasher.finalize())
}

/// Metadata shipped next to a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelContract {
    pub feature_cols: Vec<String>,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub vocabulary: Option<Vec<CategoryVocabulary>>,
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

impl ModelContract {
    pub fn new<S: Into<String>>(feature_cols: impl IntoIterator<Item = S>) -> Self {
        Self {
            feature_cols: feature_cols.into_iter().map(Into::into).collect(),
            threshold: None,
            vocabulary: None,
            schema_version: None,
            fingerprint: None,
        }
    }

    pub fn with_vocabulary(mut self, vocabulary: Vec<CategoryVocabulary>) -> Self {
        self.vocabulary = Some(vocabulary);
        self
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ContractError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, ContractError> {
        let raw = fs::read_to_string(path)?;
        let contract = Self::from_json_str(&raw)?;
        info!(
            component = "contract",
            event = "contract.file.read",
            path = %path.display(),
            feature_count = contract.feature_cols.len(),
            has_vocabulary = contract.vocabulary.is_some()
        );
        Ok(contract)
    }

    /// Builds the schema and, when the contract pins a version or
    /// fingerprint, checks it against the listed features.
    pub fn schema(&self) -> Result<FeatureSchema, ContractError> {
        let schema = FeatureSchema::from_feature_names(&self.feature_cols)?;
        let expected_version = self.schema_version.unwrap_or(schema.version);
        let expected_fingerprint = self.fingerprint.as_deref().unwrap_or(&schema.fingerprint);
        assert_schema_compatible(expected_version, expected_fingerprint, &schema)?;
        Ok(schema)
    }

    pub fn encoder(&self) -> Result<CategoricalEncoder, ContractError> {
        match &self.vocabulary {
            Some(vocabularies) => {
                let mut fields = HashSet::new();
                for vocabulary in vocabularies {
                    if !fields.insert(vocabulary.field) {
                        return Err(ContractError::DuplicateVocabulary(
                            vocabulary.field.as_str().to_string(),
                        ));
                    }
                }
                Ok(CategoricalEncoder::new(vocabularies.clone()))
            }
            None => Ok(CategoricalEncoder::from_feature_names(&self.feature_cols)),
        }
    }
}

/// Dense numeric table with named columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn value(&self, row: usize, name: &str) -> Option<f64> {
        let col = self.column_index(name)?;
        self.rows.get(row)?.get(col).copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Inserts missing schema columns as 0.0, drops the rest, reorders to the
/// schema, and zeroes NaN/inf. Aligning an aligned table is a no-op.
pub fn align_to_schema(table: &FeatureTable, schema: &FeatureSchema) -> FeatureTable {
    let mut source: HashMap<&str, usize> = HashMap::with_capacity(table.columns.len());
    for (idx, name) in table.columns.iter().enumerate() {
        source.entry(name.as_str()).or_insert(idx);
    }

    let mapping: Vec<Option<usize>> = schema
        .columns
        .iter()
        .map(|column| source.get(column.name.as_str()).copied())
        .collect();

    let filled = mapping.iter().filter(|m| m.is_none()).count();
    let dropped = table
        .columns
        .iter()
        .filter(|name| schema.index_of(name).is_none())
        .count();

    let rows = table
        .rows
        .iter()
        .map(|row| {
            mapping
                .iter()
                .map(|slot| {
                    let value = slot.and_then(|idx| row.get(idx).copied()).unwrap_or(0.0);
                    if value.is_finite() {
                        value
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect();

    debug!(
        component = "schema",
        event = "schema.aligned",
        schema_columns = schema.len(),
        filled_columns = filled,
        dropped_columns = dropped,
        rows = table.len()
    );

    FeatureTable {
        columns: schema.columns.iter().map(|c| c.name.clone()).collect(),
        rows,
    }
}

/// Header-only CSV of metadata columns followed by the schema's features.
pub fn feature_template_csv(schema: &FeatureSchema) -> Result<String, RawInputError> {
    let headers: Vec<&str> = METADATA_COLUMNS
        .iter()
        .copied()
        .chain(schema.columns.iter().map(|c| c.name.as_str()))
        .collect();
    header_only_csv(&headers)
}
