//! Aggregate structures handed to the presentation layer
//!
//! Everything here is plain data, rebuilt from scratch for every request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TransactionType;

/// Match counters reported alongside derived costs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PricingStats {
    pub total: u64,
    pub matched: u64,
    pub unmatched: u64,
}

/// Cost by day-of-month for one calendar month
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailyCosts {
    pub year: i32,
    pub month: u32,
    /// Index 0 is day 1; length is always the number of days in the month
    pub daily_costs: Vec<f64>,
    pub total_cost: f64,
    /// Records inside the range that did not contribute because they are pending
    pub excluded_pending: u64,
    /// Records inside the range that did not contribute because they failed
    pub excluded_error: u64,
    pub pricing: PricingStats,
}

impl DailyCosts {
    /// Day-of-month (1-based) cost, None when out of range
    pub fn day(&self, day: u32) -> Option<f64> {
        let idx = usize::try_from(day.checked_sub(1)?).ok()?;
        self.daily_costs.get(idx).copied()
    }
}

/// Distribution grouping key
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    Provider,
    Model,
}

/// One group of the cost/token distribution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DistributionRow {
    #[serde(rename = "groupKey")]
    pub group_key: String,
    pub total_cost: f64,
    pub total_tokens: u64,
}

/// A distribution row as returned by the record store, where the token total may be absent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredDistributionRow {
    #[serde(rename = "groupKey", alias = "group_key")]
    pub group_key: String,
    pub total_cost: f64,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

/// Open-source vs closed-source provider classification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    OpenSource,
    ClosedSource,
}

/// Per-provider aggregate metrics, input to scoring
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMetrics {
    pub provider: String,
    /// Priced cost over priced tokens of completed calls; None when nothing was priced
    #[serde(default)]
    pub cost_per_token: Option<f64>,
    #[serde(default)]
    pub avg_latency_ms: Option<f64>,
    /// completed / (completed + error), 0..=1
    pub success_rate: f64,
    pub total_requests: u64,
    #[serde(default)]
    pub tokens_per_second: Option<f64>,
    #[serde(default)]
    pub time_to_first_token_ms: Option<f64>,
    /// completed / all requests including pending, 0..=1
    pub completion_rate: f64,
    /// Share of all requests routed to this provider, 0..=1
    pub selection_frequency: f64,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Sub-scores on a 0-100 scale plus the weighted total
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderScore {
    pub cost_efficiency: f64,
    pub performance: f64,
    pub reliability: f64,
    pub usage_popularity: f64,
    pub total_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStats {
    #[serde(flatten)]
    pub metrics: ProviderMetrics,
    pub category: Category,
    pub score: ProviderScore,
}

/// The provider holding the extremum of one named metric
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Champion {
    pub provider: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RankingSummary {
    pub best_open_source: Option<Champion>,
    pub best_closed_source: Option<Champion>,
    /// Highest total score across both categories
    pub best_overall: Option<Champion>,
    /// Lowest cost per token
    pub most_cost_efficient: Option<Champion>,
    /// Highest tokens per second
    pub fastest_response: Option<Champion>,
    /// Highest completion rate
    pub most_reliable: Option<Champion>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRanking {
    pub open_source: Vec<ProviderStats>,
    pub closed_source: Vec<ProviderStats>,
    pub summary: RankingSummary,
}

impl ProviderRanking {
    pub fn is_empty(&self) -> bool {
        self.open_source.is_empty() && self.closed_source.is_empty()
    }
}

/// Dashboard classification of a ledger or usage event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    SuccessfulCall,
    FailedCall,
    Credit,
    ManualAdjustment,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: ActivityKind,
    /// Signed balance delta (0 for failed calls without a transaction)
    pub amount: f64,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub usage_record_id: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub transaction_type: Option<TransactionType>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct LedgerSummary {
    pub total_credits: f64,
    pub total_debits: f64,
    pub net: f64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub credits: u64,
    pub manual_adjustments: u64,
}

/// Full output of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub generated_at: DateTime<Utc>,
    pub currency: String,
    pub daily: DailyCosts,
    pub by_provider: Vec<DistributionRow>,
    pub by_model: Vec<DistributionRow>,
    pub ranking: ProviderRanking,
    pub ledger: LedgerSummary,
    pub pricing: PricingStats,
}
