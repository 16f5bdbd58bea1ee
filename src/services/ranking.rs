//! Provider scoring and ranking
//!
//! Every sub-score is normalized to 0-100 against the full provider set
//! before weighting, so the weights are directly comparable:
//!
//! - cost efficiency: cheapest non-zero cost-per-token scores 100, others
//!   scale by `cheapest / own`; a zero cost-per-token scores 100, a provider
//!   with no priced calls scores 0 and never wins the cost champion
//! - reliability: success rate × 100
//! - performance: mean of the latency score (fastest scores 100, others scale
//!   by `fastest / own`, unknown latency scores 0) and reliability
//! - usage popularity: `requests / busiest provider's requests` × 100

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::services::catalog::ProviderCatalog;
use crate::types::{
    Category, Champion, ProviderMetrics, ProviderRanking, ProviderScore, ProviderStats,
    RankingSummary, Result, RoutestatError,
};

/// Weights applied to the normalized sub-scores
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoringWeights {
    pub cost_efficiency: f64,
    pub performance: f64,
    pub usage_popularity: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            cost_efficiency: 0.40,
            performance: 0.35,
            usage_popularity: 0.25,
        }
    }
}

impl ScoringWeights {
    /// Weights must be non-negative and sum to 1.0
    pub fn validate(&self) -> Result<()> {
        let weights = [self.cost_efficiency, self.performance, self.usage_popularity];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(RoutestatError::Config(format!(
                "scoring weights must be non-negative: {:?}",
                self
            )));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 0.001 {
            return Err(RoutestatError::Config(format!(
                "scoring weights must sum to 1.0, got {:.3}",
                sum
            )));
        }
        Ok(())
    }
}

/// Reference extremes of the provider set used for normalization
struct Baseline {
    min_cost: Option<f64>,
    min_latency: Option<f64>,
    max_requests: u64,
}

impl Baseline {
    fn of(metrics: &[ProviderMetrics]) -> Self {
        let min_positive = |values: &mut dyn Iterator<Item = f64>| {
            values
                .filter(|v| *v > 0.0 && v.is_finite())
                .min_by(|a, b| a.total_cmp(b))
        };
        Self {
            min_cost: min_positive(&mut metrics.iter().filter_map(|m| m.cost_per_token)),
            min_latency: min_positive(&mut metrics.iter().filter_map(|m| m.avg_latency_ms)),
            max_requests: metrics.iter().map(|m| m.total_requests).max().unwrap_or(0),
        }
    }
}

fn inverse_score(value: f64, best: Option<f64>) -> f64 {
    if value <= 0.0 {
        return 100.0;
    }
    match best {
        Some(best) => (best / value * 100.0).clamp(0.0, 100.0),
        None => 100.0,
    }
}

/// Scores and ranks providers by category
#[derive(Debug, Clone, Default)]
pub struct ProviderRanker {
    weights: ScoringWeights,
    catalog: ProviderCatalog,
}

impl ProviderRanker {
    pub fn new(weights: ScoringWeights, catalog: ProviderCatalog) -> Self {
        Self { weights, catalog }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Short stable digest of the weights and open-source additions.
    /// Two rankers that can order providers differently never share one.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for weight in [
            self.weights.cost_efficiency,
            self.weights.performance,
            self.weights.usage_popularity,
        ] {
            hasher.update(weight.to_bits().to_le_bytes());
        }
        for name in self.catalog.extra_open_source() {
            hasher.update(name.as_bytes());
            hasher.update([0]);
        }
        hex::encode(&hasher.finalize()[..6])
    }

    /// Score each provider against the whole set, in input order
    pub fn score_all(&self, metrics: &[ProviderMetrics]) -> Vec<ProviderScore> {
        let baseline = Baseline::of(metrics);
        metrics
            .iter()
            .map(|m| self.score(m, &baseline))
            .collect()
    }

    fn score(&self, metrics: &ProviderMetrics, baseline: &Baseline) -> ProviderScore {
        let cost_efficiency = match metrics.cost_per_token {
            Some(cost) => inverse_score(cost, baseline.min_cost),
            None => 0.0,
        };
        let latency = match metrics.avg_latency_ms {
            Some(latency) => inverse_score(latency, baseline.min_latency),
            None => 0.0,
        };
        let reliability = metrics.success_rate.clamp(0.0, 1.0) * 100.0;
        let performance = (latency + reliability) / 2.0;
        let usage_popularity = if baseline.max_requests == 0 {
            0.0
        } else {
            metrics.total_requests as f64 / baseline.max_requests as f64 * 100.0
        };

        let total_score = self.weights.cost_efficiency * cost_efficiency
            + self.weights.performance * performance
            + self.weights.usage_popularity * usage_popularity;

        ProviderScore {
            cost_efficiency,
            performance,
            reliability,
            usage_popularity,
            total_score,
        }
    }

    /// Categorized ranking with champion picks. Empty input gives an empty ranking.
    pub fn rank(&self, metrics: Vec<ProviderMetrics>) -> ProviderRanking {
        let scores = self.score_all(&metrics);
        let stats: Vec<ProviderStats> = metrics
            .into_iter()
            .zip(scores)
            .map(|(metrics, score)| ProviderStats {
                category: self.catalog.category(&metrics.provider),
                metrics,
                score,
            })
            .collect();

        let summary = RankingSummary {
            best_overall: champion(&stats, |s| Some(s.score.total_score), Ordering::Greater),
            most_cost_efficient: champion(&stats, |s| s.metrics.cost_per_token, Ordering::Less),
            fastest_response: champion(&stats, |s| s.metrics.tokens_per_second, Ordering::Greater),
            most_reliable: champion(&stats, |s| Some(s.metrics.completion_rate), Ordering::Greater),
            ..RankingSummary::default()
        };

        let (mut open_source, mut closed_source): (Vec<_>, Vec<_>) = stats
            .into_iter()
            .partition(|s| s.category == Category::OpenSource);
        sort_by_score(&mut open_source);
        sort_by_score(&mut closed_source);

        debug!(
            open_source = open_source.len(),
            closed_source = closed_source.len(),
            "ranked providers"
        );

        ProviderRanking {
            summary: RankingSummary {
                best_open_source: open_source.first().map(total_champion),
                best_closed_source: closed_source.first().map(total_champion),
                ..summary
            },
            open_source,
            closed_source,
        }
    }
}

/// Descending total score, ties by provider name ascending
fn sort_by_score(stats: &mut [ProviderStats]) {
    stats.sort_by(|a, b| {
        b.score
            .total_score
            .total_cmp(&a.score.total_score)
            .then_with(|| a.metrics.provider.cmp(&b.metrics.provider))
    });
}

fn total_champion(stats: &ProviderStats) -> Champion {
    Champion {
        provider: stats.metrics.provider.clone(),
        value: stats.score.total_score,
    }
}

/// First provider (in input order) holding the extremum of `metric`.
/// `want` is `Greater` for a maximum and `Less` for a minimum.
fn champion<F>(stats: &[ProviderStats], metric: F, want: Ordering) -> Option<Champion>
where
    F: Fn(&ProviderStats) -> Option<f64>,
{
    let mut best: Option<(&ProviderStats, f64)> = None;
    for s in stats {
        let Some(value) = metric(s).filter(|v| !v.is_nan()) else {
            continue;
        };
        match best {
            Some((_, current)) if value.total_cmp(&current) != want => {}
            _ => best = Some((s, value)),
        }
    }
    best.map(|(s, value)| Champion {
        provider: s.metrics.provider.clone(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_metrics(provider: &str, cost_per_token: f64, success_rate: f64) -> ProviderMetrics {
        ProviderMetrics {
            provider: provider.into(),
            cost_per_token: Some(cost_per_token),
            avg_latency_ms: Some(500.0),
            success_rate,
            total_requests: 100,
            tokens_per_second: Some(50.0),
            time_to_first_token_ms: Some(200.0),
            completion_rate: success_rate,
            selection_frequency: 0.5,
            total_cost: 0.0,
            total_tokens: 0,
        }
    }

    fn ranker() -> ProviderRanker {
        ProviderRanker::default()
    }

    #[test]
    fn test_default_weights_valid() {
        assert!(ScoringWeights::default().validate().is_ok());
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let weights = ScoringWeights {
            cost_efficiency: 0.5,
            performance: 0.5,
            usage_popularity: 0.5,
        };
        assert!(weights.validate().is_err());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let weights = ScoringWeights {
            cost_efficiency: 1.2,
            performance: -0.2,
            usage_popularity: 0.0,
        };
        assert!(weights.validate().is_err());
    }

    #[test]
    fn test_cheaper_and_more_reliable_ranks_first() {
        let a = make_metrics("provider-a", 0.001, 0.99);
        let b = make_metrics("provider-b", 0.01, 0.80);

        let scores = ranker().score_all(&[a.clone(), b.clone()]);
        assert!(scores[0].cost_efficiency > scores[1].cost_efficiency);
        assert!(scores[0].total_score > scores[1].total_score);

        let ranking = ranker().rank(vec![b, a]);
        assert_eq!(ranking.closed_source[0].metrics.provider, "provider-a");
        assert_eq!(ranking.closed_source[1].metrics.provider, "provider-b");
    }

    #[test]
    fn test_sub_scores_on_common_scale() {
        let mut fast = make_metrics("fast", 0.001, 1.0);
        fast.avg_latency_ms = Some(100.0);
        let mut slow = make_metrics("slow", 0.004, 0.5);
        slow.avg_latency_ms = Some(400.0);
        slow.total_requests = 25;

        let scores = ranker().score_all(&[fast, slow]);

        assert!((scores[0].cost_efficiency - 100.0).abs() < 1e-9);
        assert!((scores[1].cost_efficiency - 25.0).abs() < 1e-9);
        assert!((scores[0].reliability - 100.0).abs() < 1e-9);
        assert!((scores[0].performance - 100.0).abs() < 1e-9);
        // latency 25, reliability 50
        assert!((scores[1].performance - 37.5).abs() < 1e-9);
        assert!((scores[1].usage_popularity - 25.0).abs() < 1e-9);
        assert!((scores[0].total_score - 100.0).abs() < 1e-9);
        let expected = 0.40 * 25.0 + 0.35 * 37.5 + 0.25 * 25.0;
        assert!((scores[1].total_score - expected).abs() < 1e-9);
        for score in &scores {
            for v in [
                score.cost_efficiency,
                score.performance,
                score.reliability,
                score.usage_popularity,
                score.total_score,
            ] {
                assert!((0.0..=100.0).contains(&v));
            }
        }
    }

    #[test]
    fn test_unknown_latency_scores_zero() {
        let mut unknown = make_metrics("unknown", 0.001, 1.0);
        unknown.avg_latency_ms = None;

        let scores = ranker().score_all(&[unknown]);

        assert!((scores[0].performance - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_rank_splits_categories_and_sorts() {
        let metrics = vec![
            make_metrics("openai", 0.01, 0.9),
            make_metrics("groq", 0.002, 0.95),
            make_metrics("anthropic", 0.005, 0.99),
            make_metrics("together", 0.001, 0.97),
        ];

        let ranking = ranker().rank(metrics);

        assert_eq!(ranking.open_source.len(), 2);
        assert_eq!(ranking.closed_source.len(), 2);
        for list in [&ranking.open_source, &ranking.closed_source] {
            assert!(list
                .windows(2)
                .all(|w| w[0].score.total_score >= w[1].score.total_score));
        }
        assert_eq!(ranking.open_source[0].metrics.provider, "together");
        assert_eq!(ranking.closed_source[0].metrics.provider, "anthropic");
        assert_eq!(
            ranking.summary.best_open_source.as_ref().map(|c| c.provider.as_str()),
            Some("together")
        );
        assert_eq!(
            ranking.summary.best_closed_source.as_ref().map(|c| c.provider.as_str()),
            Some("anthropic")
        );
    }

    #[test]
    fn test_ties_broken_by_name() {
        let metrics = vec![
            make_metrics("zeta", 0.001, 0.9),
            make_metrics("alpha", 0.001, 0.9),
            make_metrics("mid", 0.001, 0.9),
        ];

        let ranking = ranker().rank(metrics);

        let names: Vec<&str> = ranking
            .closed_source
            .iter()
            .map(|s| s.metrics.provider.as_str())
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_champions() {
        let mut cheap = make_metrics("cheap", 0.0005, 0.7);
        cheap.tokens_per_second = Some(20.0);
        let mut fast = make_metrics("fast", 0.01, 0.9);
        fast.tokens_per_second = Some(300.0);
        let mut steady = make_metrics("steady", 0.005, 1.0);
        steady.tokens_per_second = None;

        let ranking = ranker().rank(vec![cheap, fast, steady]);
        let summary = &ranking.summary;

        assert_eq!(summary.most_cost_efficient.as_ref().unwrap().provider, "cheap");
        assert_eq!(summary.fastest_response.as_ref().unwrap().provider, "fast");
        assert!((summary.fastest_response.as_ref().unwrap().value - 300.0).abs() < 1e-9);
        assert_eq!(summary.most_reliable.as_ref().unwrap().provider, "steady");
        assert!(summary.best_overall.is_some());
    }

    #[test]
    fn test_unpriced_provider_not_cost_efficient() {
        let openai = make_metrics("openai", 0.002, 0.9);
        let mut ghost = make_metrics("ghost", 0.0, 0.0);
        ghost.cost_per_token = None;
        ghost.total_requests = 1;
        let mut mystery = make_metrics("mystery", 0.0, 1.0);
        mystery.cost_per_token = None;

        let ranking = ranker().rank(vec![ghost, mystery, openai]);
        let summary = &ranking.summary;

        assert_eq!(summary.most_cost_efficient.as_ref().unwrap().provider, "openai");
        let cost_of = |name: &str| {
            ranking
                .closed_source
                .iter()
                .find(|s| s.metrics.provider == name)
                .map(|s| s.score.cost_efficiency)
                .unwrap()
        };
        assert!((cost_of("openai") - 100.0).abs() < 1e-9);
        assert_eq!(cost_of("ghost"), 0.0);
        assert_eq!(cost_of("mystery"), 0.0);
        assert_eq!(summary.best_overall.as_ref().unwrap().provider, "openai");
    }

    #[test]
    fn test_no_priced_providers_has_no_cost_champion() {
        let mut mystery = make_metrics("mystery", 0.0, 1.0);
        mystery.cost_per_token = None;

        let ranking = ranker().rank(vec![mystery]);

        assert!(ranking.summary.most_cost_efficient.is_none());
        assert_eq!(ranking.closed_source[0].score.cost_efficiency, 0.0);
    }

    #[test]
    fn test_champion_ties_keep_first() {
        let metrics = vec![
            make_metrics("zeta", 0.001, 0.9),
            make_metrics("alpha", 0.001, 0.9),
        ];

        let ranking = ranker().rank(metrics);
        let summary = &ranking.summary;

        assert_eq!(summary.most_cost_efficient.as_ref().unwrap().provider, "zeta");
        assert_eq!(summary.fastest_response.as_ref().unwrap().provider, "zeta");
        assert_eq!(summary.most_reliable.as_ref().unwrap().provider, "zeta");
        assert_eq!(summary.best_overall.as_ref().unwrap().provider, "zeta");
        // Category ranking still breaks ties by name
        assert_eq!(summary.best_closed_source.as_ref().unwrap().provider, "alpha");
    }

    #[test]
    fn test_empty_ranking() {
        let ranking = ranker().rank(Vec::new());

        assert!(ranking.is_empty());
        assert_eq!(ranking.summary, RankingSummary::default());
    }

    #[test]
    fn test_fingerprint_tracks_ranking_settings() {
        let base = ranker().fingerprint();
        assert_eq!(base.len(), 12);
        assert_eq!(base, ProviderRanker::default().fingerprint());

        let reweighted = ProviderRanker::new(
            ScoringWeights {
                cost_efficiency: 0.5,
                performance: 0.25,
                usage_popularity: 0.25,
            },
            ProviderCatalog::new(),
        );
        assert_ne!(reweighted.fingerprint(), base);

        let extended = ProviderRanker::new(
            ScoringWeights::default(),
            ProviderCatalog::with_open_source(["acme"]),
        );
        assert_ne!(extended.fingerprint(), base);
        // Order and case of the configured list do not matter
        assert_eq!(
            ProviderRanker::new(
                ScoringWeights::default(),
                ProviderCatalog::with_open_source(["b", "A"]),
            )
            .fingerprint(),
            ProviderRanker::new(
                ScoringWeights::default(),
                ProviderCatalog::with_open_source(["a", "B"]),
            )
            .fingerprint()
        );
    }

    #[test]
    fn test_custom_weights_change_order() {
        let popular = {
            let mut m = make_metrics("popular", 0.01, 0.9);
            m.total_requests = 1000;
            m
        };
        let cheap = {
            let mut m = make_metrics("cheap", 0.001, 0.9);
            m.total_requests = 10;
            m
        };
        let popularity_only = ProviderRanker::new(
            ScoringWeights {
                cost_efficiency: 0.0,
                performance: 0.0,
                usage_popularity: 1.0,
            },
            ProviderCatalog::new(),
        );

        let ranking = popularity_only.rank(vec![cheap.clone(), popular.clone()]);
        assert_eq!(ranking.closed_source[0].metrics.provider, "popular");

        let ranking = ranker().rank(vec![popular, cheap]);
        assert_eq!(ranking.closed_source[0].metrics.provider, "cheap");
    }
}
