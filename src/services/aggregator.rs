//! Aggregator service for computing usage statistics
//!
//! Every function here is a pure pass over already-priced records: no I/O,
//! no shared state, identical output for identical input.

use std::collections::{HashMap, HashSet};

use chrono::{Datelike, Local, NaiveDate, TimeZone};
use tracing::debug;

use crate::services::pricing::CostReport;
use crate::types::{
    ActivityEntry, ActivityKind, DailyCosts, DistributionRow, GroupBy, LedgerSummary,
    PricingStats, ProviderMetrics, RecordStatus, StoredDistributionRow, Transaction,
    TransactionType, UsageRecord, UsageWindow,
};

/// Number of days in a calendar month, None for an invalid year/month
pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year.checked_add(1)?, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    u32::try_from(next.signed_duration_since(first).num_days()).ok()
}

fn group_key(record: &UsageRecord, group_by: GroupBy) -> &str {
    match group_by {
        GroupBy::Provider => &record.provider,
        GroupBy::Model => &record.model,
    }
}

fn in_distribution(record: &UsageRecord, window: &UsageWindow) -> bool {
    record.is_completed() && window.contains(&record.timestamp)
}

#[derive(Default)]
struct ProviderAccumulator {
    requests: u64,
    completed: u64,
    errors: u64,
    cost: f64,
    tokens: u64,
    priced_cost: f64,
    priced_tokens: u64,
    latency_sum: f64,
    latency_count: u64,
    tps_sum: f64,
    tps_count: u64,
    ttft_sum: f64,
    ttft_count: u64,
}

fn mean(sum: f64, count: u64) -> Option<f64> {
    (count > 0).then(|| sum / count as f64)
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Aggregator for computing usage statistics
pub struct Aggregator;

impl Aggregator {
    /// Cost per day-of-month, bucketed by the local calendar day
    pub fn daily_costs(
        report: &CostReport<'_>,
        from: NaiveDate,
        to: NaiveDate,
        year: i32,
        month: u32,
    ) -> DailyCosts {
        Self::daily_costs_in(report, from, to, year, month, &Local)
    }

    /// Cost per day-of-month in `tz`, zero-filled for every day of the month.
    ///
    /// `from..=to` is clipped to the month; an inverted or disjoint range
    /// yields all zeros. Only completed records add cost; pending and failed
    /// records inside the range are counted instead.
    pub fn daily_costs_in<Tz: TimeZone>(
        report: &CostReport<'_>,
        from: NaiveDate,
        to: NaiveDate,
        year: i32,
        month: u32,
        tz: &Tz,
    ) -> DailyCosts {
        let month = month.clamp(1, 12);
        let days = days_in_month(year, month).unwrap_or(0);

        let mut result = DailyCosts {
            year,
            month,
            daily_costs: vec![0.0; days as usize],
            total_cost: 0.0,
            excluded_pending: 0,
            excluded_error: 0,
            pricing: PricingStats::default(),
        };

        let bounds = NaiveDate::from_ymd_opt(year, month, 1)
            .zip(NaiveDate::from_ymd_opt(year, month, days.max(1)));
        let Some((first, last)) = bounds else {
            return result;
        };
        let start = from.max(first);
        let end = to.min(last);
        if start > end {
            debug!(%from, %to, year, month, "date range does not overlap month");
            return result;
        }

        for priced in report.iter() {
            let date = priced.record.date_in(tz);
            if date < start || date > end {
                continue;
            }

            result.pricing.total += 1;
            if priced.priced {
                result.pricing.matched += 1;
            } else {
                result.pricing.unmatched += 1;
            }

            match priced.record.status {
                RecordStatus::Completed => {
                    result.daily_costs[date.day0() as usize] += priced.cost;
                    result.total_cost += priced.cost;
                }
                RecordStatus::Pending => result.excluded_pending += 1,
                RecordStatus::Error => result.excluded_error += 1,
            }
        }

        result
    }

    /// Total cost and tokens per provider or model over `window`.
    ///
    /// Sorted by cost descending, then key ascending.
    pub fn distribution(
        report: &CostReport<'_>,
        window: &UsageWindow,
        group_by: GroupBy,
    ) -> Vec<DistributionRow> {
        let mut groups: HashMap<&str, DistributionRow> = HashMap::new();

        for priced in report.iter() {
            if !in_distribution(priced.record, window) {
                continue;
            }
            let key = group_key(priced.record, group_by);
            let row = groups.entry(key).or_insert_with(|| DistributionRow {
                group_key: key.to_string(),
                total_cost: 0.0,
                total_tokens: 0,
            });
            row.total_cost += priced.cost;
            row.total_tokens = row.total_tokens.saturating_add(priced.record.total_tokens());
        }

        let mut rows: Vec<DistributionRow> = groups.into_values().collect();
        Self::sort_rows(&mut rows);
        rows
    }

    /// Input + output tokens per group, recomputed from raw records
    pub fn token_totals(
        records: &[UsageRecord],
        window: &UsageWindow,
        group_by: GroupBy,
    ) -> HashMap<String, u64> {
        let mut totals: HashMap<String, u64> = HashMap::new();
        for record in records.iter().filter(|r| in_distribution(r, window)) {
            let total = totals
                .entry(group_key(record, group_by).to_string())
                .or_default();
            *total = total.saturating_add(record.total_tokens());
        }
        totals
    }

    /// Fill missing token totals in store-provided rows from the raw records.
    ///
    /// Rows that already carry a total keep it; costs are never touched.
    pub fn backfill_tokens(
        rows: Vec<StoredDistributionRow>,
        records: &[UsageRecord],
        window: &UsageWindow,
        group_by: GroupBy,
    ) -> Vec<DistributionRow> {
        let needs_backfill = rows.iter().any(|r| r.total_tokens.is_none());
        let recomputed = if needs_backfill {
            Self::token_totals(records, window, group_by)
        } else {
            HashMap::new()
        };

        let mut result: Vec<DistributionRow> = rows
            .into_iter()
            .map(|row| {
                let total_tokens = row
                    .total_tokens
                    .unwrap_or_else(|| recomputed.get(&row.group_key).copied().unwrap_or(0));
                DistributionRow {
                    group_key: row.group_key,
                    total_cost: row.total_cost,
                    total_tokens,
                }
            })
            .collect();
        Self::sort_rows(&mut result);
        result
    }

    fn sort_rows(rows: &mut [DistributionRow]) {
        rows.sort_by(|a, b| {
            b.total_cost
                .total_cmp(&a.total_cost)
                .then_with(|| a.group_key.cmp(&b.group_key))
        });
    }

    /// Per-provider metrics in first-seen order
    pub fn provider_metrics(report: &CostReport<'_>) -> Vec<ProviderMetrics> {
        let mut order: Vec<&str> = Vec::new();
        let mut accs: HashMap<&str, ProviderAccumulator> = HashMap::new();

        for priced in report.iter() {
            let record = priced.record;
            let provider = record.provider.as_str();
            let acc = accs.entry(provider).or_insert_with(|| {
                order.push(provider);
                ProviderAccumulator::default()
            });

            acc.requests += 1;
            match record.status {
                RecordStatus::Completed => {
                    acc.completed += 1;
                    acc.cost += priced.cost;
                    acc.tokens = acc.tokens.saturating_add(record.total_tokens());
                    if priced.priced {
                        acc.priced_cost += priced.cost;
                        acc.priced_tokens =
                            acc.priced_tokens.saturating_add(record.total_tokens());
                    }
                    if let Some(latency) = record.latency_ms {
                        acc.latency_sum += latency;
                        acc.latency_count += 1;
                    }
                    if let Some(tps) = record.tokens_per_second {
                        acc.tps_sum += tps;
                        acc.tps_count += 1;
                    }
                    if let Some(ttft) = record.time_to_first_token_ms {
                        acc.ttft_sum += ttft;
                        acc.ttft_count += 1;
                    }
                }
                RecordStatus::Error => acc.errors += 1,
                RecordStatus::Pending => {}
            }
        }

        let all_requests = report.records.len() as u64;

        order
            .into_iter()
            .filter_map(|provider| {
                let acc = accs.remove(provider)?;
                Some(ProviderMetrics {
                    provider: provider.to_string(),
                    cost_per_token: (acc.priced_tokens > 0)
                        .then(|| acc.priced_cost / acc.priced_tokens as f64),
                    avg_latency_ms: mean(acc.latency_sum, acc.latency_count),
                    success_rate: ratio(acc.completed, acc.completed + acc.errors),
                    total_requests: acc.requests,
                    tokens_per_second: mean(acc.tps_sum, acc.tps_count),
                    time_to_first_token_ms: mean(acc.ttft_sum, acc.ttft_count),
                    completion_rate: ratio(acc.completed, acc.requests),
                    selection_frequency: ratio(acc.requests, all_requests),
                    total_cost: acc.cost,
                    total_tokens: acc.tokens,
                })
            })
            .collect()
    }

    /// Classify transactions and failed calls into a newest-first activity feed
    pub fn activity(records: &[UsageRecord], transactions: &[Transaction]) -> Vec<ActivityEntry> {
        let by_id: HashMap<&str, &UsageRecord> =
            records.iter().map(|r| (r.id.as_str(), r)).collect();
        let by_transaction: HashMap<&str, &UsageRecord> = records
            .iter()
            .filter_map(|r| r.transaction_id.as_deref().map(|tx| (tx, r)))
            .collect();

        let mut linked: HashSet<&str> = HashSet::new();
        let mut entries: Vec<ActivityEntry> = Vec::with_capacity(transactions.len());

        for tx in transactions {
            let record = tx
                .usage_record_id
                .as_deref()
                .and_then(|id| by_id.get(id))
                .or_else(|| by_transaction.get(tx.id.as_str()))
                .copied();
            if let Some(record) = record {
                linked.insert(record.id.as_str());
            }

            let kind = match (tx.usage_record_id.is_some() || record.is_some(), tx.kind) {
                (true, _) => match record {
                    Some(r) if r.status == RecordStatus::Error => ActivityKind::FailedCall,
                    _ => ActivityKind::SuccessfulCall,
                },
                (false, TransactionType::Credit) => ActivityKind::Credit,
                (false, TransactionType::Debit) => ActivityKind::ManualAdjustment,
            };

            entries.push(ActivityEntry {
                timestamp: tx.timestamp,
                kind,
                amount: tx.signed_amount(),
                transaction_id: Some(tx.id.clone()),
                usage_record_id: record
                    .map(|r| r.id.clone())
                    .or_else(|| tx.usage_record_id.clone()),
                provider: record.map(|r| r.provider.clone()),
                model: record.map(|r| r.model.clone()),
                error_message: record.and_then(|r| r.error_message.clone()),
                transaction_type: Some(tx.kind),
            });
        }

        // Failed calls are never billed, so most have no transaction
        for record in records {
            if record.status != RecordStatus::Error || linked.contains(record.id.as_str()) {
                continue;
            }
            entries.push(ActivityEntry {
                timestamp: record.timestamp,
                kind: ActivityKind::FailedCall,
                amount: 0.0,
                transaction_id: None,
                usage_record_id: Some(record.id.clone()),
                provider: Some(record.provider.clone()),
                model: Some(record.model.clone()),
                error_message: record.error_message.clone(),
                transaction_type: None,
            });
        }

        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries
    }

    /// Balance totals and per-kind counts over an activity feed
    pub fn ledger(entries: &[ActivityEntry]) -> LedgerSummary {
        let mut summary = LedgerSummary::default();

        for entry in entries {
            if entry.amount > 0.0 {
                summary.total_credits += entry.amount;
            } else {
                summary.total_debits += -entry.amount;
            }
            summary.net += entry.amount;

            match entry.kind {
                ActivityKind::SuccessfulCall => summary.successful_calls += 1,
                ActivityKind::FailedCall => summary.failed_calls += 1,
                ActivityKind::Credit => summary.credits += 1,
                ActivityKind::ManualAdjustment => summary.manual_adjustments += 1,
            }
        }

        summary
    }
}
