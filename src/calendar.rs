//! Row-local date arithmetic. Nothing here looks at other invoices, so the
//! extractor can run over records in any order.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::normalize::InvoiceRecord;
use crate::target::whole_days_between;

pub const CALENDAR_COLUMNS: [&str; 10] = [
    "term_days",
    "month",
    "quarter",
    "year",
    "is_month_end",
    "is_quarter_end",
    "days_to_month_end",
    "due_dow",
    "inv_dow",
    "log_amount",
];

/// Undefined values (missing dates or amount) are NaN; alignment zeroes them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalendarFeatures {
    pub term_days: f64,
    pub month: f64,
    pub quarter: f64,
    pub year: f64,
    pub is_month_end: f64,
    pub is_quarter_end: f64,
    pub days_to_month_end: f64,
    pub inv_dow: f64,
    pub due_dow: f64,
    pub log_amount: f64,
}

impl CalendarFeatures {
    pub fn values(&self) -> [f64; 10] {
        [
            self.term_days,
            self.month,
            self.quarter,
            self.year,
            self.is_month_end,
            self.is_quarter_end,
            self.days_to_month_end,
            self.due_dow,
            self.inv_dow,
            self.log_amount,
        ]
    }
}

pub fn calendar_features(record: &InvoiceRecord) -> CalendarFeatures {
    let event = record.invoice_date.map(|ts| ts.date());
    let due = record.payment_due_date.map(|ts| ts.date());

    let term_days = match (record.invoice_date, record.payment_due_date) {
        (Some(event), Some(due)) => whole_days_between(event, due) as f64,
        _ => f64::NAN,
    };

    let month_end = event.and_then(last_day_of_month);
    let quarter_end = event.and_then(last_day_of_quarter);

    CalendarFeatures {
        term_days,
        month: event.map_or(f64::NAN, |d| f64::from(d.month())),
        quarter: event.map_or(f64::NAN, |d| f64::from(quarter_of(d))),
        year: event.map_or(f64::NAN, |d| f64::from(d.year())),
        is_month_end: flag(event, month_end),
        is_quarter_end: flag(event, quarter_end),
        days_to_month_end: match (event, month_end) {
            (Some(d), Some(end)) => (end - d).num_days() as f64,
            _ => f64::NAN,
        },
        inv_dow: event.map_or(f64::NAN, weekday_index),
        due_dow: due.map_or(f64::NAN, weekday_index),
        log_amount: record
            .invoice_amount
            .map_or(f64::NAN, |amount| amount.max(0.0).ln_1p()),
    }
}

pub fn quarter_of(date: NaiveDate) -> u32 {
    (date.month() - 1) / 3 + 1
}

pub fn last_day_of_month(date: NaiveDate) -> Option<NaiveDate> {
    first_of_following_month(date.year(), date.month())?.pred_opt()
}

pub fn last_day_of_quarter(date: NaiveDate) -> Option<NaiveDate> {
    let last_month = quarter_of(date) * 3;
    first_of_following_month(date.year(), last_month)?.pred_opt()
}

fn first_of_following_month(year: i32, month: u32) -> Option<NaiveDate> {
    if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
}

// Month-end and quarter-end both compare calendar dates exactly.
fn flag(date: Option<NaiveDate>, boundary: Option<NaiveDate>) -> f64 {
    match (date, boundary) {
        (Some(d), Some(b)) => f64::from(u8::from(d == b)),
        _ => f64::NAN,
    }
}

fn weekday_index(date: NaiveDate) -> f64 {
    f64::from(date.weekday().num_days_from_monday())
}
