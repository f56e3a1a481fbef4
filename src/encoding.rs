//! Indicator encoding against a vocabulary frozen at training time.
//!
//! The reference category of each field is simply absent from
//! `categories`, so encoding is a lookup: an unseen value and the reference
//! value both produce an all-zero block.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::normalize::InvoiceRecord;
use crate::raw::{MATERIAL_NAME, PAYMENT_METHOD};
use crate::warnings::{BuildWarning, WarningLog};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NominalField {
    PaymentMethod,
    MaterialName,
}

impl NominalField {
    pub const ALL: [NominalField; 2] = [NominalField::PaymentMethod, NominalField::MaterialName];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PaymentMethod => PAYMENT_METHOD,
            Self::MaterialName => MATERIAL_NAME,
        }
    }

    pub fn value_of(self, record: &InvoiceRecord) -> &str {
        match self {
            Self::PaymentMethod => &record.payment_method,
            Self::MaterialName => &record.material_name,
        }
    }

    fn column_prefix(self) -> String {
        format!("{}_", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryVocabulary {
    pub field: NominalField,
    /// The dropped category, when the contract records it.
    #[serde(default)]
    pub reference: Option<String>,
    pub categories: Vec<String>,
}

impl CategoryVocabulary {
    pub fn new(field: NominalField, reference: Option<String>, categories: Vec<String>) -> Self {
        Self {
            field,
            reference,
            categories,
        }
    }

    /// Freezes a vocabulary from training values: distinct values in sorted
    /// order, the first one becoming the dropped reference.
    pub fn fit<I, S>(field: NominalField, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let distinct: BTreeSet<String> = values
            .into_iter()
            .map(|v| v.as_ref().to_string())
            .collect();
        let mut iter = distinct.into_iter();
        let reference = iter.next();
        Self::new(field, reference, iter.collect())
    }

    /// Recovers the categories from `<field>_<category>` feature names. The
    /// reference never appears among them, so it stays unknown.
    pub fn from_feature_names<S: AsRef<str>>(field: NominalField, names: &[S]) -> Self {
        let prefix = field.column_prefix();
        let categories = names
            .iter()
            .filter_map(|name| name.as_ref().strip_prefix(prefix.as_str()))
            .filter(|category| !category.is_empty())
            .map(str::to_string)
            .collect();
        Self::new(field, None, categories)
    }

    pub fn column_names(&self) -> Vec<String> {
        let prefix = self.field.column_prefix();
        self.categories
            .iter()
            .map(|category| format!("{prefix}{category}"))
            .collect()
    }

    pub fn position(&self, value: &str) -> Option<usize> {
        self.categories.iter().position(|c| c == value)
    }

    /// A value is unknown only when the reference is declared and the value
    /// matches neither it nor any indicator category.
    pub fn is_unknown(&self, value: &str) -> bool {
        match &self.reference {
            Some(reference) => reference != value && self.position(value).is_none(),
            None => false,
        }
    }

    pub fn encode(&self, value: &str) -> Vec<f64> {
        let mut indicators = vec![0.0; self.categories.len()];
        if let Some(idx) = self.position(value) {
            indicators[idx] = 1.0;
        }
        indicators
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalEncoder {
    pub vocabularies: Vec<CategoryVocabulary>,
}

impl CategoricalEncoder {
    pub fn new(vocabularies: Vec<CategoryVocabulary>) -> Self {
        Self { vocabularies }
    }

    /// One vocabulary per nominal field, recovered from the feature names.
    pub fn from_feature_names<S: AsRef<str>>(names: &[S]) -> Self {
        Self::new(
            NominalField::ALL
                .iter()
                .map(|field| CategoryVocabulary::from_feature_names(*field, names))
                .collect(),
        )
    }

    pub fn column_names(&self) -> Vec<String> {
        self.vocabularies
            .iter()
            .flat_map(CategoryVocabulary::column_names)
            .collect()
    }

    pub fn encode_record(&self, record: &InvoiceRecord, warnings: &mut WarningLog) -> Vec<f64> {
        let mut out = Vec::new();
        for vocabulary in &self.vocabularies {
            let value = vocabulary.field.value_of(record);
            if vocabulary.is_unknown(value) {
                debug!(
                    component = "encoding",
                    event = "encoding.unknown_category",
                    field = vocabulary.field.as_str(),
                    value,
                    row_index = record.row_index
                );
                warnings.push(BuildWarning::UnknownCategory {
                    row_index: record.row_index,
                    field: vocabulary.field.as_str().to_string(),
                    value: value.to_string(),
                });
            }
            out.extend(vocabulary.encode(value));
        }
        out
    }
}
