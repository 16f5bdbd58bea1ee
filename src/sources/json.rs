//! JSON/JSONL directory source
//!
//! Layout under the data directory:
//!
//! ```text
//! records/*.jsonl             one usage record per line
//! transactions.jsonl          one transaction per line
//! prices.json                 array of price entries
//! distribution-provider.json  optional store-side rows (same for `-model`)
//! ```
//!
//! Rows are exported straight from the record store, so columns may be null,
//! snake_case or camelCase, and amounts may arrive as decimal strings.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use rayon::prelude::*;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{retain_window, RecordSource};
use crate::types::{
    GroupBy, PriceEntry, RecordStatus, Result, RoutestatError, StoredDistributionRow, Transaction,
    TransactionType, UsageRecord, UsageWindow,
};

const RECORDS_PATTERN: &str = "records/*.jsonl";
const TRANSACTIONS_FILE: &str = "transactions.jsonl";
const PRICES_FILE: &str = "prices.json";

#[derive(Deserialize)]
struct RawRecord {
    id: String,
    #[serde(alias = "created_at", alias = "createdAt")]
    timestamp: String,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default, alias = "inputTokens")]
    input_tokens: Option<u64>,
    #[serde(default, alias = "outputTokens")]
    output_tokens: Option<u64>,
    #[serde(default, alias = "cachedTokens")]
    cached_tokens: Option<u64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, alias = "errorMessage")]
    error_message: Option<String>,
    #[serde(default, alias = "transactionId")]
    transaction_id: Option<String>,
    #[serde(default, alias = "latencyMs", alias = "latency")]
    latency_ms: Option<f64>,
    #[serde(default, alias = "tokensPerSecond", alias = "throughput")]
    tokens_per_second: Option<f64>,
    #[serde(default, alias = "timeToFirstTokenMs", alias = "ttft_ms")]
    time_to_first_token_ms: Option<f64>,
}

/// Numeric columns come back as strings from decimal types
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawAmount {
    Number(f64),
    Text(String),
}

impl RawAmount {
    fn value(&self) -> Option<f64> {
        match self {
            RawAmount::Number(n) => Some(*n),
            RawAmount::Text(s) => s.trim().parse().ok().filter(|v: &f64| v.is_finite()),
        }
    }
}

#[derive(Deserialize)]
struct RawTransaction {
    id: String,
    amount: RawAmount,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, alias = "usageRecordId", alias = "request_id")]
    usage_record_id: Option<String>,
    #[serde(alias = "created_at", alias = "createdAt")]
    timestamp: String,
}

/// Accepts RFC 3339 or a zone-less `YYYY-MM-DD HH:MM:SS[.f]` read as UTC
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn parse_status(value: Option<&str>) -> Option<RecordStatus> {
    match value.map(str::to_ascii_lowercase).as_deref() {
        None | Some("completed") | Some("success") => Some(RecordStatus::Completed),
        Some("pending") => Some(RecordStatus::Pending),
        Some("error") | Some("failed") => Some(RecordStatus::Error),
        Some(_) => None,
    }
}

impl RawRecord {
    fn into_record(self) -> Option<UsageRecord> {
        let Some(timestamp) = parse_timestamp(&self.timestamp) else {
            warn!(id = %self.id, "invalid timestamp '{}', skipping record", self.timestamp);
            return None;
        };
        let Some(status) = parse_status(self.status.as_deref()) else {
            warn!(id = %self.id, "unknown status {:?}, skipping record", self.status);
            return None;
        };

        Some(UsageRecord {
            id: self.id,
            timestamp,
            provider: self.provider.unwrap_or_else(|| "unknown".into()),
            model: self.model.unwrap_or_else(|| "unknown".into()),
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cached_tokens: self.cached_tokens,
            status,
            error_message: self.error_message,
            transaction_id: self.transaction_id,
            latency_ms: self.latency_ms,
            tokens_per_second: self.tokens_per_second,
            time_to_first_token_ms: self.time_to_first_token_ms,
        })
    }
}

impl RawTransaction {
    fn into_transaction(self) -> Option<Transaction> {
        let Some(timestamp) = parse_timestamp(&self.timestamp) else {
            warn!(id = %self.id, "invalid timestamp '{}', skipping transaction", self.timestamp);
            return None;
        };
        let Some(amount) = self.amount.value() else {
            warn!(id = %self.id, "invalid amount {:?}, skipping transaction", self.amount);
            return None;
        };
        let kind = match self.kind.to_ascii_lowercase().as_str() {
            "credit" => TransactionType::Credit,
            "debit" => TransactionType::Debit,
            other => {
                warn!(id = %self.id, "unknown transaction type '{}', skipping", other);
                return None;
            }
        };
        Some(Transaction {
            id: self.id,
            amount,
            kind,
            usage_record_id: self.usage_record_id,
            timestamp,
        })
    }
}

/// Parse every non-empty line of a JSONL file, skipping lines that fail
fn parse_jsonl<T, U, F>(path: &Path, convert: F) -> Result<Vec<U>>
where
    T: for<'de> Deserialize<'de>,
    F: Fn(T) -> Option<U>,
{
    let content = fs::read(path)?;
    let mut skipped = 0usize;
    let mut rows = Vec::new();

    for line in content.split(|b| *b == b'\n') {
        let mut line = line.to_vec();
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match simd_json::from_slice::<T>(&mut line) {
            Ok(raw) => match convert(raw) {
                Some(row) => rows.push(row),
                None => skipped += 1,
            },
            Err(_) => skipped += 1,
        }
    }

    if skipped > 0 {
        debug!(path = %path.display(), skipped, "skipped unreadable lines");
    }
    Ok(rows)
}

/// Record store export laid out as JSON files in one directory
pub struct JsonDirSource {
    data_dir: PathBuf,
}

impl JsonDirSource {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn collect_record_files(&self) -> Vec<PathBuf> {
        let pattern = self.data_dir.join(RECORDS_PATTERN);
        let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
            .map(|paths| paths.filter_map(|e| e.ok()).collect())
            .unwrap_or_default();
        files.sort();
        files
    }

    /// Parse record files in parallel, keeping the first row per id
    fn load_records(&self) -> Vec<UsageRecord> {
        let files = self.collect_record_files();
        debug!(files = files.len(), "loading usage records");

        let per_file: Vec<Vec<UsageRecord>> = files
            .par_iter()
            .map(|f| match parse_jsonl(f, RawRecord::into_record) {
                Ok(records) => records,
                Err(e) => {
                    warn!(path = %f.display(), "failed to read record file: {}", e);
                    Vec::new()
                }
            })
            .collect();

        let mut seen: HashSet<String> = HashSet::new();
        let mut records = Vec::new();
        for record in per_file.into_iter().flatten() {
            if seen.insert(record.id.clone()) {
                records.push(record);
            }
        }
        records
    }

    fn read_json_array<T: for<'de> Deserialize<'de>>(&self, path: &Path) -> Result<Vec<T>> {
        let mut content = fs::read(path)?;
        simd_json::from_slice(&mut content).map_err(|e| {
            RoutestatError::Parse(format!("{}: {}", path.display(), e))
        })
    }
}

impl RecordSource for JsonDirSource {
    fn name(&self) -> &str {
        "json-dir"
    }

    fn records(&self, window: &UsageWindow) -> Result<Vec<UsageRecord>> {
        if !self.data_dir.exists() {
            warn!(dir = %self.data_dir.display(), "data directory does not exist");
            return Ok(Vec::new());
        }
        Ok(retain_window(self.load_records(), window))
    }

    fn transactions(&self, window: &UsageWindow) -> Result<Vec<Transaction>> {
        let path = self.data_dir.join(TRANSACTIONS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut transactions = parse_jsonl(&path, RawTransaction::into_transaction)?;
        transactions.retain(|t| window.contains(&t.timestamp));
        transactions.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(transactions)
    }

    fn prices(&self) -> Result<Vec<PriceEntry>> {
        let path = self.data_dir.join(PRICES_FILE);
        if !path.exists() {
            warn!(path = %path.display(), "no price table, every record will be unmatched");
            return Ok(Vec::new());
        }
        self.read_json_array(&path)
    }

    fn stored_distribution(&self, group_by: GroupBy) -> Result<Option<Vec<StoredDistributionRow>>> {
        let name = match group_by {
            GroupBy::Provider => "distribution-provider.json",
            GroupBy::Model => "distribution-model.json",
        };
        let path = self.data_dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        self.read_json_array(&path).map(Some)
    }
}
