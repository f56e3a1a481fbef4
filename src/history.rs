//! Point-in-time client history.
//!
//! Records are partitioned per client and ordered chronologically; each
//! client's run is then folded with an [`EntityState`] that only ever holds
//! strictly earlier invoices. The value emitted for the k-th invoice of a
//! client is computed before that invoice is absorbed, so nothing at or after
//! its own timestamp can leak into it.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::ops::Range;

use chrono::{Duration as ChronoDuration, NaiveDateTime};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::normalize::InvoiceRecord;

pub const DEFAULT_TRAILING_WINDOW_DAYS: i64 = 90;
pub const DEFAULT_AMOUNT_Z_EPSILON: f64 = 1e-6;
/// One century; longer windows are indistinguishable from expanding history.
pub const MAX_TRAILING_WINDOW_DAYS: i64 = 36_500;

/// Feature names in the order of [`HistoryFeatures::values`].
pub const HISTORY_COLUMNS: [&str; 8] = [
    "client_prev_txn_count",
    "client_prev_total_value",
    "client_prev_delay_rate",
    "client_prev_avg_delay",
    "client_amount_mean",
    "client_amount_std",
    "client_amount_z",
    "client_rolling_90_value",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    pub trailing_window_days: i64,
    pub amount_z_epsilon: f64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            trailing_window_days: DEFAULT_TRAILING_WINDOW_DAYS,
            amount_z_epsilon: DEFAULT_AMOUNT_Z_EPSILON,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryFeatures {
    pub prior_count: u64,
    pub prior_total_amount: f64,
    pub prior_mean_delay: f64,
    pub prior_delay_rate: f64,
    pub prior_amount_mean: f64,
    pub prior_amount_std: f64,
    pub amount_z: f64,
    pub trailing_amount: f64,
}

impl HistoryFeatures {
    pub fn values(&self) -> [f64; 8] {
        [
            self.prior_count as f64,
            self.prior_total_amount,
            self.prior_delay_rate,
            self.prior_mean_delay,
            self.prior_amount_mean,
            self.prior_amount_std,
            self.amount_z,
            self.trailing_amount,
        ]
    }
}

/// Chronological layout of a batch: `order[k]` is the input position of the
/// k-th record after sorting, and each run spans one client inside `order`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub order: Vec<usize>,
    pub runs: Vec<Range<usize>>,
}

impl Partition {
    pub fn entity_count(&self) -> usize {
        self.runs.len()
    }
}

/// Stable sort by (client, invoice date) with undated invoices last within
/// their client. Invoices without a client id each form their own run, so
/// they never share history.
pub fn partition_chronological(records: &[InvoiceRecord]) -> Partition {
    let mut order: Vec<usize> = (0..records.len()).collect();
    order.sort_by(|&a, &b| {
        let (left, right) = (&records[a], &records[b]);
        left.client_id
            .cmp(&right.client_id)
            .then_with(|| event_order(left.invoice_date, right.invoice_date))
    });

    let mut runs = Vec::new();
    let mut start = 0;
    for k in 1..=order.len() {
        let run_client = &records[order[start]].client_id;
        let boundary = k == order.len()
            || run_client.is_empty()
            || records[order[k]].client_id != *run_client;
        if boundary {
            runs.push(start..k);
            start = k;
        }
    }

    Partition { order, runs }
}

fn event_order(left: Option<NaiveDateTime>, right: Option<NaiveDateTime>) -> Ordering {
    match (left, right) {
        (Some(l), Some(r)) => l.cmp(&r),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Folds every client run in parallel. The result is indexed by input
/// position, one entry per record.
pub fn aggregate_history(
    records: &[InvoiceRecord],
    partition: &Partition,
    has_labels: bool,
    cfg: &HistoryConfig,
) -> Vec<HistoryFeatures> {
    let window = ChronoDuration::try_days(cfg.trailing_window_days)
        .unwrap_or_else(ChronoDuration::max_value);
    let per_entity: Vec<Vec<(usize, HistoryFeatures)>> = partition
        .runs
        .par_iter()
        .map(|run| {
            let indices = &partition.order[run.clone()];
            fold_entity(records, indices, has_labels, window, cfg.amount_z_epsilon)
        })
        .collect();

    let mut out = vec![HistoryFeatures::default(); records.len()];
    for (idx, features) in per_entity.into_iter().flatten() {
        out[idx] = features;
    }

    debug!(
        component = "history",
        event = "history.aggregated",
        entities = partition.entity_count(),
        rows = records.len(),
        has_labels
    );

    out
}

fn fold_entity(
    records: &[InvoiceRecord],
    indices: &[usize],
    has_labels: bool,
    window: ChronoDuration,
    epsilon: f64,
) -> Vec<(usize, HistoryFeatures)> {
    let (_, emitted) = indices.iter().fold(
        (EntityState::default(), Vec::with_capacity(indices.len())),
        |(state, mut emitted), &idx| {
            let (next, features) = state.step(&records[idx], has_labels, window, epsilon);
            emitted.push((idx, features));
            (next, emitted)
        },
    );
    emitted
}

#[derive(Debug, Clone, Copy, Default)]
struct RunningMoments {
    n: u64,
    sum: f64,
    mean: f64,
    m2: f64,
}

impl RunningMoments {
    fn push(self, value: f64) -> Self {
        let n = self.n + 1;
        let delta = value - self.mean;
        let mean = self.mean + delta / n as f64;
        Self {
            n,
            sum: self.sum + value,
            mean,
            m2: self.m2 + delta * (value - mean),
        }
    }

    fn mean(&self) -> Option<f64> {
        (self.n > 0).then_some(self.mean)
    }

    /// Sample standard deviation (n - 1 denominator).
    fn std(&self) -> Option<f64> {
        (self.n > 1).then(|| (self.m2 / (self.n - 1) as f64).sqrt())
    }
}

#[derive(Debug, Clone, Default)]
struct EntityState {
    seen: u64,
    amounts: RunningMoments,
    delay_days: RunningMoments,
    delayed: RunningMoments,
    /// Dated prior invoices with an amount, oldest first.
    window: VecDeque<(NaiveDateTime, f64)>,
}

impl EntityState {
    fn step(
        mut self,
        record: &InvoiceRecord,
        has_labels: bool,
        window: ChronoDuration,
        epsilon: f64,
    ) -> (Self, HistoryFeatures) {
        let trailing_amount = match record.invoice_date {
            Some(event) => {
                // No lower bound when the window reaches past the calendar's start.
                if let Some(lower) = event.checked_sub_signed(window) {
                    while self.window.front().is_some_and(|(ts, _)| *ts < lower) {
                        self.window.pop_front();
                    }
                }
                self.window
                    .iter()
                    .filter(|(ts, _)| *ts < event)
                    .map(|(_, amount)| amount)
                    .sum::<f64>()
            }
            None => 0.0,
        };

        let amount_z = match (record.invoice_amount, self.amounts.std()) {
            (Some(amount), Some(std)) => (amount - self.amounts.mean) / (std + epsilon),
            _ => 0.0,
        };

        let (prior_mean_delay, prior_delay_rate) = if has_labels {
            (
                self.delay_days.mean().unwrap_or(0.0),
                self.delayed.mean().unwrap_or(0.0),
            )
        } else {
            (0.0, 0.0)
        };

        let features = HistoryFeatures {
            prior_count: self.seen,
            prior_total_amount: self.amounts.sum,
            prior_mean_delay,
            prior_delay_rate,
            prior_amount_mean: self.amounts.mean().unwrap_or(0.0),
            prior_amount_std: self.amounts.std().unwrap_or(0.0),
            amount_z,
            trailing_amount,
        };

        (self.absorb(record), features)
    }

    fn absorb(mut self, record: &InvoiceRecord) -> Self {
        self.seen += 1;
        if let Some(amount) = record.invoice_amount {
            self.amounts = self.amounts.push(amount);
            if let Some(event) = record.invoice_date {
                self.window.push_back((event, amount));
            }
        }
        if let Some(label) = record.label {
            if let Some(days) = label.delay_days {
                self.delay_days = self.delay_days.push(days as f64);
            }
            self.delayed = self.delayed.push(f64::from(label.delayed));
        }
        self
    }
}
