//! Non-fatal conditions absorbed during a build.

use serde::{Deserialize, Serialize};
use tracing::debug;

pub const MAX_REPORTED_WARNINGS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildWarning {
    UnparsableDate {
        row_index: usize,
        field: String,
        value: String,
    },
    UnparsableAmount {
        row_index: usize,
        value: String,
    },
    UnknownCategory {
        row_index: usize,
        field: String,
        value: String,
    },
}

impl BuildWarning {
    pub fn is_parse_warning(&self) -> bool {
        matches!(
            self,
            Self::UnparsableDate { .. } | Self::UnparsableAmount { .. }
        )
    }
}

/// Counts every warning but retains only the first `cap` for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningLog {
    pub parse_warnings: u64,
    pub unknown_category_warnings: u64,
    pub retained: Vec<BuildWarning>,
    cap: usize,
}

impl Default for WarningLog {
    fn default() -> Self {
        Self::with_cap(MAX_REPORTED_WARNINGS)
    }
}

impl WarningLog {
    pub fn with_cap(cap: usize) -> Self {
        Self {
            parse_warnings: 0,
            unknown_category_warnings: 0,
            retained: Vec::new(),
            cap,
        }
    }

    pub fn push(&mut self, warning: BuildWarning) {
        debug!(
            component = "features",
            event = "features.warning",
            warning = ?warning
        );
        if warning.is_parse_warning() {
            self.parse_warnings = self.parse_warnings.saturating_add(1);
        } else {
            self.unknown_category_warnings = self.unknown_category_warnings.saturating_add(1);
        }
        if self.retained.len() < self.cap {
            self.retained.push(warning);
        }
    }

    pub fn total(&self) -> u64 {
        self.parse_warnings
            .saturating_add(self.unknown_category_warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_past_the_retention_cap() {
        let mut log = WarningLog::with_cap(2);
        for row_index in 0..5 {
            log.push(BuildWarning::UnparsableAmount {
                row_index,
                value: "n/a".to_string(),
            });
        }
        log.push(BuildWarning::UnknownCategory {
            row_index: 9,
            field: "payment_method".to_string(),
            value: "Barter".to_string(),
        });

        assert_eq!(log.parse_warnings, 5);
        assert_eq!(log.unknown_category_warnings, 1);
        assert_eq!(log.total(), 6);
        assert_eq!(log.retained.len(), 2);
    }
}
