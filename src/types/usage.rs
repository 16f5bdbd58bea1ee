//! Usage record, transaction and price types

use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a single routed API call
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Completed,
    Error,
}

impl RecordStatus {
    /// `completed` and `error` never change again
    pub fn is_terminal(self) -> bool {
        !matches!(self, RecordStatus::Pending)
    }
}

/// One attempted API call as persisted by the record store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub cached_tokens: Option<u64>,
    pub status: RecordStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Back-reference to the transaction that billed this call
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub tokens_per_second: Option<f64>,
    #[serde(default)]
    pub time_to_first_token_ms: Option<f64>,
}

impl UsageRecord {
    pub fn input(&self) -> u64 {
        self.input_tokens.unwrap_or(0)
    }

    pub fn output(&self) -> u64 {
        self.output_tokens.unwrap_or(0)
    }

    pub fn cached(&self) -> u64 {
        self.cached_tokens.unwrap_or(0)
    }

    /// Input + output tokens (cached tokens are reported separately)
    pub fn total_tokens(&self) -> u64 {
        self.input().saturating_add(self.output())
    }

    pub fn is_completed(&self) -> bool {
        self.status == RecordStatus::Completed
    }

    /// Convert UTC timestamp to local timezone date.
    /// Ensures day bucketing matches the user's local calendar.
    pub fn local_date(&self) -> NaiveDate {
        self.date_in(&Local)
    }

    /// Calendar date of the record in an arbitrary timezone
    pub fn date_in<Tz: TimeZone>(&self, tz: &Tz) -> NaiveDate {
        self.timestamp.with_timezone(tz).date_naive()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Credit,
    Debit,
}

/// One ledger entry against a user's balance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: String,
    /// Stored amount; the sign convention is carried by `kind`
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    /// Usage record that caused this entry (None for top-ups and purchases)
    #[serde(default)]
    pub usage_record_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Balance delta: credits positive, debits negative, whatever the stored sign
    pub fn signed_amount(&self) -> f64 {
        match self.kind {
            TransactionType::Credit => self.amount.abs(),
            TransactionType::Debit => -self.amount.abs(),
        }
    }
}

/// Per-token pricing for one (provider, model) pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceEntry {
    pub provider: String,
    pub model: String,
    pub input_price: f64,
    pub output_price: f64,
    #[serde(default)]
    pub cached_price: Option<f64>,
}

/// Inclusive time window used for retrieval and distributions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl UsageWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Whole UTC days from `start` 00:00:00 to `end` 23:59:59
    pub fn from_dates(start: NaiveDate, end: NaiveDate) -> Self {
        Self::from_dates_in(start, end, &Utc)
    }

    /// Whole calendar days in `tz`. Local times skipped by a DST jump fall
    /// back to their UTC reading.
    pub fn from_dates_in<Tz: TimeZone>(start: NaiveDate, end: NaiveDate, tz: &Tz) -> Self {
        let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
        let start = start.and_time(NaiveTime::MIN);
        let end = end.and_time(end_of_day);
        Self {
            start: tz
                .from_local_datetime(&start)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| start.and_utc()),
            end: tz
                .from_local_datetime(&end)
                .latest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| end.and_utc()),
        }
    }

    /// Unbounded window
    pub fn all() -> Self {
        Self {
            start: DateTime::<Utc>::MIN_UTC,
            end: DateTime::<Utc>::MAX_UTC,
        }
    }

    /// Inclusive on both ends. An inverted window contains nothing.
    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        *ts >= self.start && *ts <= self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}
