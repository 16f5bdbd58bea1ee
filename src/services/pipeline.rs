//! Report pipeline: pricing → aggregation → ranking
//!
//! Takes already-retrieved records and runs the pure stages in order. Nothing
//! is kept between runs.

use chrono::{Local, NaiveDate, TimeZone, Utc};
use tracing::info;

use crate::services::aggregator::{days_in_month, Aggregator};
use crate::services::pricing::PricingService;
use crate::services::ranking::ProviderRanker;
use crate::types::{GroupBy, Transaction, UsageRecord, UsageReport, UsageWindow};

/// Month and optional sub-range a report covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportRequest {
    pub year: i32,
    pub month: u32,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl ReportRequest {
    pub fn month(year: i32, month: u32) -> Self {
        Self {
            year,
            month,
            from: None,
            to: None,
        }
    }

    /// Effective date range; defaults to the whole month
    pub fn range(&self) -> (NaiveDate, NaiveDate) {
        let month = self.month.clamp(1, 12);
        let days = days_in_month(self.year, month).unwrap_or(1);
        let first = NaiveDate::from_ymd_opt(self.year, month, 1).unwrap_or(NaiveDate::MIN);
        let last = NaiveDate::from_ymd_opt(self.year, month, days).unwrap_or(first);
        (self.from.unwrap_or(first), self.to.unwrap_or(last))
    }

    /// Snapshot key for this request over `scope`, ranked by `ranker`
    pub fn cache_key(&self, scope: &str, ranker: &ProviderRanker) -> String {
        let (from, to) = self.range();
        format!("report-{}-{}-{}-{}", scope, from, to, ranker.fingerprint())
    }
}

/// Runs the three stages over one user's records
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    pricing: PricingService,
    ranker: ProviderRanker,
}

impl Pipeline {
    pub fn new(pricing: PricingService, ranker: ProviderRanker) -> Self {
        Self { pricing, ranker }
    }

    pub fn pricing(&self) -> &PricingService {
        &self.pricing
    }

    pub fn ranker(&self) -> &ProviderRanker {
        &self.ranker
    }

    /// Build a report with days bucketed in the local timezone
    pub fn run(
        &self,
        request: &ReportRequest,
        records: &[UsageRecord],
        transactions: &[Transaction],
    ) -> UsageReport {
        self.run_in(request, records, transactions, &Local)
    }

    pub fn run_in<Tz: TimeZone>(
        &self,
        request: &ReportRequest,
        records: &[UsageRecord],
        transactions: &[Transaction],
        tz: &Tz,
    ) -> UsageReport {
        let (from, to) = request.range();
        let window = UsageWindow::from_dates_in(from, to, tz);

        let costs = self.pricing.derive(records);
        let daily =
            Aggregator::daily_costs_in(&costs, from, to, request.year, request.month, tz);

        let scoped = costs.filter(|r| window.contains(&r.timestamp));
        let by_provider = Aggregator::distribution(&scoped, &window, GroupBy::Provider);
        let by_model = Aggregator::distribution(&scoped, &window, GroupBy::Model);
        let ranking = self.ranker.rank(Aggregator::provider_metrics(&scoped));

        let scoped_records: Vec<UsageRecord> =
            scoped.iter().map(|p| p.record.clone()).collect();
        let scoped_transactions: Vec<Transaction> = transactions
            .iter()
            .filter(|t| window.contains(&t.timestamp))
            .cloned()
            .collect();
        let activity = Aggregator::activity(&scoped_records, &scoped_transactions);
        let ledger = Aggregator::ledger(&activity);

        info!(
            records = scoped.stats.total,
            unmatched = scoped.stats.unmatched,
            providers = by_provider.len(),
            "report built for {}-{:02}",
            request.year,
            request.month
        );

        UsageReport {
            generated_at: Utc::now(),
            currency: crate::services::exchange::BASE_CURRENCY.to_string(),
            daily,
            by_provider,
            by_model,
            ranking,
            ledger,
            pricing: scoped.stats,
        }
    }
}
