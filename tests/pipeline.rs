//! End-to-end runs over the fixture data directory

use std::path::PathBuf;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use tempfile::TempDir;

use routestat::services::{
    Aggregator, ExchangeRateService, ManualClock, Pipeline, PricingService, ProviderRanker,
    RateProvider, ReadThroughCache, ReportRequest, SnapshotStore,
};
use routestat::sources::{JsonDirSource, RecordSource};
use routestat::types::{ActivityKind, GroupBy, Result, UsageReport, UsageWindow};

fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("data")
}

fn april() -> UsageWindow {
    UsageWindow::from_dates(
        NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 4, 30).unwrap(),
    )
}

fn april_report() -> UsageReport {
    let source = JsonDirSource::new(fixture_dir());
    let records = source.records(&april()).unwrap();
    let transactions = source.transactions(&april()).unwrap();
    let pipeline = Pipeline::new(
        PricingService::new(source.prices().unwrap()),
        ProviderRanker::default(),
    );
    pipeline.run_in(&ReportRequest::month(2024, 4), &records, &transactions, &Utc)
}

#[test]
fn test_fixture_records_loaded() {
    let source = JsonDirSource::new(fixture_dir());

    let records = source.records(&april()).unwrap();

    // r1 appears twice, r7 is in May, r8 has an unknown status
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["r1", "r2", "r3", "r4", "r5", "r6"]);
}

#[test]
fn test_daily_costs() {
    let report = april_report();
    let daily = &report.daily;

    assert_eq!(daily.daily_costs.len(), 30);
    assert!((daily.daily_costs[4] - 0.047).abs() < 1e-9);
    assert!((daily.daily_costs[8] - 0.010).abs() < 1e-9);
    assert!((daily.total_cost - 0.057).abs() < 1e-9);
    assert_eq!(daily.pricing.total, 6);
    assert_eq!(daily.pricing.matched, 5);
    assert_eq!(daily.pricing.unmatched, 1);
    assert_eq!(daily.excluded_pending, 1);
    assert_eq!(daily.excluded_error, 1);
}

#[test]
fn test_duplicate_price_entry_ignored() {
    let report = april_report();

    // The second gpt-4o entry would price r1 at 1700.0
    let openai = &report.by_provider[0];
    assert_eq!(openai.group_key, "openai");
    assert!((openai.total_cost - 0.026).abs() < 1e-9);
}

#[test]
fn test_distributions() {
    let report = april_report();

    let providers: Vec<(&str, u64)> = report
        .by_provider
        .iter()
        .map(|r| (r.group_key.as_str(), r.total_tokens))
        .collect();
    assert_eq!(
        providers,
        vec![("openai", 2100), ("anthropic", 3000), ("groq", 15000)]
    );

    let unpriced = report
        .by_model
        .iter()
        .find(|r| r.group_key == "gpt-4o-mini")
        .unwrap();
    assert_eq!(unpriced.total_cost, 0.0);
    assert_eq!(unpriced.total_tokens, 600);
}

#[test]
fn test_stored_distribution_backfilled() {
    let source = JsonDirSource::new(fixture_dir());
    let records = source.records(&april()).unwrap();
    let stored = source
        .stored_distribution(GroupBy::Provider)
        .unwrap()
        .unwrap();

    let rows = Aggregator::backfill_tokens(stored, &records, &april(), GroupBy::Provider);

    let tokens: Vec<(&str, u64)> = rows
        .iter()
        .map(|r| (r.group_key.as_str(), r.total_tokens))
        .collect();
    // Stored totals are kept as-is, missing ones come from the records
    assert_eq!(
        tokens,
        vec![("openai", 2100), ("anthropic", 2999), ("groq", 15000)]
    );
}

#[test]
fn test_ranking() {
    let report = april_report();
    let ranking = &report.ranking;

    assert_eq!(ranking.open_source.len(), 1);
    assert_eq!(ranking.open_source[0].metrics.provider, "groq");
    let closed: Vec<&str> = ranking
        .closed_source
        .iter()
        .map(|s| s.metrics.provider.as_str())
        .collect();
    assert_eq!(closed, vec!["openai", "anthropic"]);

    let groq = &ranking.open_source[0];
    assert!((groq.metrics.success_rate - 0.5).abs() < 1e-9);
    assert!((groq.score.cost_efficiency - 100.0).abs() < 1e-9);
    assert!((groq.score.total_score - 91.25).abs() < 1e-6);

    let summary = &ranking.summary;
    assert_eq!(summary.best_overall.as_ref().unwrap().provider, "groq");
    assert_eq!(summary.best_open_source.as_ref().unwrap().provider, "groq");
    assert_eq!(summary.best_closed_source.as_ref().unwrap().provider, "openai");
    assert_eq!(summary.most_cost_efficient.as_ref().unwrap().provider, "groq");
    assert_eq!(summary.fastest_response.as_ref().unwrap().provider, "groq");
    assert_eq!(summary.most_reliable.as_ref().unwrap().provider, "openai");
}

#[test]
fn test_activity_and_ledger() {
    let source = JsonDirSource::new(fixture_dir());
    let records = source.records(&april()).unwrap();
    let transactions = source.transactions(&april()).unwrap();

    let activity = Aggregator::activity(&records, &transactions);

    let kinds: Vec<ActivityKind> = activity.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ActivityKind::ManualAdjustment,
            ActivityKind::FailedCall,
            ActivityKind::SuccessfulCall,
            ActivityKind::SuccessfulCall,
            ActivityKind::SuccessfulCall,
            ActivityKind::Credit,
        ]
    );
    assert_eq!(activity[1].error_message.as_deref(), Some("upstream timeout"));
    assert_eq!(activity[1].amount, 0.0);

    let ledger = Aggregator::ledger(&activity);
    assert!((ledger.total_credits - 20.0).abs() < 1e-9);
    assert!((ledger.total_debits - 2.557).abs() < 1e-9);
    assert!((ledger.net - 17.443).abs() < 1e-9);
    assert_eq!(ledger.successful_calls, 3);
    assert_eq!(ledger.failed_calls, 1);
    assert_eq!(ledger.credits, 1);
    assert_eq!(ledger.manual_adjustments, 1);
}

#[test]
fn test_report_snapshot_roundtrip() {
    let temp = TempDir::new().unwrap();
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    let mut store = SnapshotStore::with_dir(temp.path().to_path_buf(), &clock);
    let key = ReportRequest::month(2024, 4).cache_key("fixtures", &ProviderRanker::default());
    let mut builds = 0;

    let first: UsageReport = store
        .get_or_fetch(key.clone(), Duration::minutes(5), || {
            builds += 1;
            Ok(april_report())
        })
        .unwrap();
    let second: UsageReport = store
        .get_or_fetch(key, Duration::minutes(5), || {
            builds += 1;
            Ok(april_report())
        })
        .unwrap();

    assert_eq!(builds, 1);
    assert_eq!(first.generated_at, second.generated_at);
    assert_eq!(first.by_provider.len(), second.by_provider.len());
    assert!((first.daily.total_cost - second.daily.total_cost).abs() < 1e-12);
    assert_eq!(
        second.ranking.summary.best_overall.map(|c| c.provider),
        Some("groq".to_string())
    );
}

struct FixedRate(f64);

impl RateProvider for FixedRate {
    fn fetch_rate(&self, _base: &str, _quote: &str) -> Result<f64> {
        Ok(self.0)
    }
}

#[test]
fn test_report_converted_to_currency() {
    let mut report = april_report();
    let score = report.ranking.open_source[0].score.total_score;
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    let mut rates = ExchangeRateService::with_clock(FixedRate(2.0), &clock, Duration::hours(1));

    rates.convert_report(&mut report, "eur").unwrap();

    assert_eq!(report.currency, "EUR");
    assert!((report.daily.total_cost - 0.114).abs() < 1e-9);
    assert!((report.ledger.total_credits - 40.0).abs() < 1e-9);
    assert!((report.ranking.open_source[0].score.total_score - score).abs() < 1e-9);
}
