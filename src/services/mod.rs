//! Pricing, aggregation and ranking stages plus the caches around them

pub mod aggregator;
pub mod cache;
pub mod catalog;
pub mod exchange;
pub mod pipeline;
pub mod pricing;
pub mod ranking;
pub mod snapshot;

pub use aggregator::Aggregator;
pub use cache::{Clock, Lookup, ManualClock, ReadThroughCache, SystemClock, TtlCache};
pub use catalog::ProviderCatalog;
pub use exchange::{ExchangeRateService, HttpRateProvider, RateProvider};
pub use pipeline::{Pipeline, ReportRequest};
pub use pricing::{CostReport, PricingService};
pub use ranking::{ProviderRanker, ScoringWeights};
pub use snapshot::SnapshotStore;
