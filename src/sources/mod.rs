//! Retrieval of persisted records, transactions and prices

mod json;

pub use json::JsonDirSource;

use crate::types::{
    GroupBy, PriceEntry, Result, StoredDistributionRow, Transaction, UsageRecord, UsageWindow,
};

/// Read-only access to one user's persisted usage data
pub trait RecordSource: Send + Sync {
    /// Source name for log output
    fn name(&self) -> &str;

    /// Usage records with a timestamp inside `window`
    fn records(&self, window: &UsageWindow) -> Result<Vec<UsageRecord>>;

    /// Transactions with a timestamp inside `window`
    fn transactions(&self, window: &UsageWindow) -> Result<Vec<Transaction>>;

    fn prices(&self) -> Result<Vec<PriceEntry>>;

    /// Distribution rows precomputed by the store, if it keeps any
    fn stored_distribution(&self, _group_by: GroupBy) -> Result<Option<Vec<StoredDistributionRow>>> {
        Ok(None)
    }
}

/// Keep records inside `window`, oldest first
pub fn retain_window(mut records: Vec<UsageRecord>, window: &UsageWindow) -> Vec<UsageRecord> {
    records.retain(|r| window.contains(&r.timestamp));
    records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    records
}
