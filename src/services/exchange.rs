//! Exchange rate conversion for report totals
//!
//! Costs are derived in USD. Rates are fetched per currency and kept in a
//! [`ReadThroughCache`] owned by the service: a [`TtlCache`] in memory or a
//! [`SnapshotStore`] on disk. An expired rate is still served when a refresh
//! fails.

use std::collections::HashMap;

use chrono::Duration;
use serde::Deserialize;
use tracing::debug;

use crate::services::cache::{Clock, ReadThroughCache, SystemClock, TtlCache};
use crate::services::snapshot::SnapshotStore;
use crate::types::{Result, RoutestatError, UsageReport};

/// Currency every derived cost is expressed in
pub const BASE_CURRENCY: &str = "USD";

/// HTTP request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Source of `base → quote` rates
pub trait RateProvider {
    fn fetch_rate(&self, base: &str, quote: &str) -> Result<f64>;
}

/// Rates endpoint response (minimal fields)
#[derive(Debug, Deserialize)]
struct RatesResponse {
    rates: HashMap<String, f64>,
}

/// Fetches `{url}/{base}` and reads `rates[quote]`
#[derive(Debug, Clone)]
pub struct HttpRateProvider {
    url: String,
}

impl HttpRateProvider {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl RateProvider for HttpRateProvider {
    fn fetch_rate(&self, base: &str, quote: &str) -> Result<f64> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| RoutestatError::ExchangeRate(format!("HTTP client error: {}", e)))?;

        let url = format!("{}/{}", self.url.trim_end_matches('/'), base);
        let response = client
            .get(&url)
            .send()
            .map_err(|e| RoutestatError::ExchangeRate(format!("HTTP request failed: {}", e)))?;

        let body: RatesResponse = response
            .json()
            .map_err(|e| RoutestatError::ExchangeRate(format!("JSON parse error: {}", e)))?;

        body.rates
            .get(quote)
            .copied()
            .ok_or_else(|| RoutestatError::ExchangeRate(format!("no rate for {}", quote)))
    }
}

/// Converts USD amounts using rates held in any [`ReadThroughCache`]
pub struct ExchangeRateService<P: RateProvider, S: ReadThroughCache<String, f64>> {
    provider: P,
    cache: S,
    ttl: Duration,
}

impl<P: RateProvider> ExchangeRateService<P, SnapshotStore<SystemClock>> {
    /// Rates persisted under `~/.routestat/rates`, shared across runs
    pub fn persistent(provider: P, ttl: Duration) -> Result<Self> {
        Ok(Self::new(provider, SnapshotStore::in_home("rates")?, ttl))
    }
}

impl<P: RateProvider, C: Clock> ExchangeRateService<P, TtlCache<String, f64, C>> {
    /// Rates kept in memory for the lifetime of the service
    pub fn with_clock(provider: P, clock: C, ttl: Duration) -> Self {
        Self::new(provider, TtlCache::with_clock(clock), ttl)
    }
}

impl<P: RateProvider, S: ReadThroughCache<String, f64>> ExchangeRateService<P, S> {
    pub fn new(provider: P, cache: S, ttl: Duration) -> Self {
        Self {
            provider,
            cache,
            ttl,
        }
    }

    /// USD → `currency` rate; 1.0 for USD itself
    pub fn rate(&mut self, currency: &str) -> Result<f64> {
        let currency = currency.to_ascii_uppercase();
        if currency == BASE_CURRENCY {
            return Ok(1.0);
        }

        let provider = &self.provider;
        let key = format!("rate-{}-{}", BASE_CURRENCY, currency);
        // Invalid rates fail the fetch, so they are never stored
        let rate = self.cache.get_or_fetch(key, self.ttl, || {
            debug!(currency = %currency, "fetching exchange rate");
            let rate = provider.fetch_rate(BASE_CURRENCY, &currency)?;
            validate_rate(rate, &currency)
        })?;

        validate_rate(rate, &currency)
    }

    pub fn convert(&mut self, amount_usd: f64, currency: &str) -> Result<f64> {
        Ok(amount_usd * self.rate(currency)?)
    }

    /// Express every monetary figure of `report` in `currency`
    pub fn convert_report(&mut self, report: &mut UsageReport, currency: &str) -> Result<()> {
        let rate = self.rate(currency)?;
        scale_report(report, rate);
        report.currency = currency.to_ascii_uppercase();
        Ok(())
    }
}

fn validate_rate(rate: f64, currency: &str) -> Result<f64> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(RoutestatError::ExchangeRate(format!(
            "invalid rate {} for {}",
            rate, currency
        )));
    }
    Ok(rate)
}

/// Multiply monetary fields by `rate`. Scores are ratios and stay unchanged.
pub fn scale_report(report: &mut UsageReport, rate: f64) {
    for cost in report.daily.daily_costs.iter_mut() {
        *cost *= rate;
    }
    report.daily.total_cost *= rate;

    for row in report
        .by_provider
        .iter_mut()
        .chain(report.by_model.iter_mut())
    {
        row.total_cost *= rate;
    }

    for stats in report
        .ranking
        .open_source
        .iter_mut()
        .chain(report.ranking.closed_source.iter_mut())
    {
        stats.metrics.total_cost *= rate;
        if let Some(cost) = stats.metrics.cost_per_token.as_mut() {
            *cost *= rate;
        }
    }
    if let Some(champion) = report.ranking.summary.most_cost_efficient.as_mut() {
        champion.value *= rate;
    }

    report.ledger.total_credits *= rate;
    report.ledger.total_debits *= rate;
    report.ledger.net *= rate;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cache::ManualClock;
    use chrono::{TimeZone, Utc};
    use std::cell::Cell;
    use tempfile::TempDir;

    struct FakeProvider {
        rate: f64,
        calls: Cell<u32>,
        fail: Cell<bool>,
    }

    impl FakeProvider {
        fn new(rate: f64) -> Self {
            Self {
                rate,
                calls: Cell::new(0),
                fail: Cell::new(false),
            }
        }
    }

    impl RateProvider for &FakeProvider {
        fn fetch_rate(&self, base: &str, _quote: &str) -> Result<f64> {
            assert_eq!(base, "USD");
            self.calls.set(self.calls.get() + 1);
            if self.fail.get() {
                return Err(RoutestatError::ExchangeRate("offline".into()));
            }
            Ok(self.rate)
        }
    }

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_usd_needs_no_fetch() {
        let provider = FakeProvider::new(0.9);
        let clock = clock();
        let mut service = ExchangeRateService::with_clock(&provider, &clock, Duration::hours(1));

        assert_eq!(service.rate("usd").unwrap(), 1.0);
        assert_eq!(provider.calls.get(), 0);
    }

    #[test]
    fn test_rate_cached_within_ttl() {
        let provider = FakeProvider::new(0.9);
        let clock = clock();
        let mut service = ExchangeRateService::with_clock(&provider, &clock, Duration::hours(1));

        assert!((service.convert(10.0, "EUR").unwrap() - 9.0).abs() < 1e-9);
        clock.advance(Duration::minutes(59));
        assert!((service.convert(20.0, "eur").unwrap() - 18.0).abs() < 1e-9);

        assert_eq!(provider.calls.get(), 1);
    }

    #[test]
    fn test_rate_refetched_after_ttl() {
        let provider = FakeProvider::new(0.9);
        let clock = clock();
        let mut service = ExchangeRateService::with_clock(&provider, &clock, Duration::hours(1));

        service.rate("EUR").unwrap();
        clock.advance(Duration::hours(2));
        service.rate("EUR").unwrap();

        assert_eq!(provider.calls.get(), 2);
    }

    #[test]
    fn test_expired_rate_served_when_offline() {
        let provider = FakeProvider::new(0.9);
        let clock = clock();
        let mut service = ExchangeRateService::with_clock(&provider, &clock, Duration::hours(1));

        service.rate("EUR").unwrap();
        clock.advance(Duration::hours(2));
        provider.fail.set(true);

        assert!((service.rate("EUR").unwrap() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_offline_without_cache_errors() {
        let provider = FakeProvider::new(0.9);
        provider.fail.set(true);
        let clock = clock();
        let mut service = ExchangeRateService::with_clock(&provider, &clock, Duration::hours(1));

        assert!(service.rate("JPY").is_err());
    }

    #[test]
    fn test_invalid_rate_rejected() {
        let provider = FakeProvider::new(0.0);
        let clock = clock();
        let mut service = ExchangeRateService::with_clock(&provider, &clock, Duration::hours(1));

        assert!(service.rate("EUR").is_err());
        // Not cached, so the next call fetches again
        assert!(service.rate("EUR").is_err());
        assert_eq!(provider.calls.get(), 2);
    }

    #[test]
    fn test_persisted_rate_shared_across_services() {
        let temp = TempDir::new().unwrap();
        let provider = FakeProvider::new(0.9);
        let clock = clock();

        let store = SnapshotStore::with_dir(temp.path().to_path_buf(), &clock);
        let mut first = ExchangeRateService::new(&provider, store, Duration::hours(1));
        assert!((first.rate("EUR").unwrap() - 0.9).abs() < 1e-9);
        drop(first);

        // A later run over the same directory reads the stored rate
        let store = SnapshotStore::with_dir(temp.path().to_path_buf(), &clock);
        let mut second = ExchangeRateService::new(&provider, store, Duration::hours(1));
        clock.advance(Duration::minutes(30));
        assert!((second.rate("eur").unwrap() - 0.9).abs() < 1e-9);

        assert_eq!(provider.calls.get(), 1);
    }

    #[test]
    fn test_persisted_rate_refetched_after_ttl() {
        let temp = TempDir::new().unwrap();
        let provider = FakeProvider::new(0.9);
        let clock = clock();
        let store = SnapshotStore::with_dir(temp.path().to_path_buf(), &clock);
        let mut service = ExchangeRateService::new(&provider, store, Duration::hours(1));

        service.rate("EUR").unwrap();
        clock.advance(Duration::hours(2));
        provider.fail.set(true);

        // Expired on disk, served while the provider is down
        assert!((service.rate("EUR").unwrap() - 0.9).abs() < 1e-9);
        assert_eq!(provider.calls.get(), 2);
    }
}
