//! Optional supervised label derived from settlement vs. due dates.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::normalize::NormalizedBatch;

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayLabel {
    /// Whole days settled after the due date; `None` when either date is null.
    pub delay_days: Option<i64>,
    pub delayed: u8,
}

impl DelayLabel {
    pub fn from_dates(due: Option<NaiveDateTime>, actual: Option<NaiveDateTime>) -> Self {
        let delay_days = match (due, actual) {
            (Some(due), Some(actual)) => Some(whole_days_between(due, actual)),
            _ => None,
        };
        Self {
            delay_days,
            delayed: u8::from(delay_days.is_some_and(|days| days > 0)),
        }
    }
}

/// Attaches labels when the batch carries settlement dates. A batch without
/// the column is left unlabeled, which is the normal inference-time shape.
pub fn derive_targets(batch: &mut NormalizedBatch) {
    if !batch.has_actual_dates {
        batch.has_labels = false;
        return;
    }

    let mut delayed = 0u64;
    for record in &mut batch.records {
        let label = DelayLabel::from_dates(record.payment_due_date, record.payment_actual_date);
        delayed += u64::from(label.delayed);
        record.label = Some(label);
    }
    batch.has_labels = true;

    info!(
        component = "target",
        event = "target.derived",
        rows = batch.records.len(),
        delayed
    );
}

/// Floor of the elapsed time in days, matching calendar-day subtraction for
/// date-only values.
pub fn whole_days_between(from: NaiveDateTime, to: NaiveDateTime) -> i64 {
    (to - from).num_seconds().div_euclid(SECONDS_PER_DAY)
}
