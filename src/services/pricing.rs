//! Pricing service for cost calculation
//!
//! Derives a monetary cost for every usage record from its token counts and
//! the (provider, model) price table. Lookups are exact; records without a
//! price entry are priced at zero and counted as unmatched.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::types::{PriceEntry, PricingStats, UsageRecord};

/// (provider, model) → price lookup
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    by_provider: HashMap<String, HashMap<String, PriceEntry>>,
    duplicates: usize,
}

impl PriceTable {
    /// Build the lookup. When the catalog repeats a key the first entry wins.
    pub fn new(entries: impl IntoIterator<Item = PriceEntry>) -> Self {
        let mut table = Self::default();
        for entry in entries {
            let models = table.by_provider.entry(entry.provider.clone()).or_default();
            if models.contains_key(&entry.model) {
                table.duplicates += 1;
                continue;
            }
            models.insert(entry.model.clone(), entry);
        }
        if table.duplicates > 0 {
            debug!(
                duplicates = table.duplicates,
                "price catalog contains duplicate keys, kept first"
            );
        }
        table
    }

    /// Exact, case-sensitive lookup
    pub fn get(&self, provider: &str, model: &str) -> Option<&PriceEntry> {
        self.by_provider.get(provider)?.get(model)
    }

    /// Number of distinct (provider, model) keys
    pub fn len(&self) -> usize {
        self.by_provider.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries dropped because an earlier entry had the same key
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}

/// A record paired with its derived cost
#[derive(Debug, Clone, Copy)]
pub struct PricedRecord<'a> {
    pub record: &'a UsageRecord,
    pub cost: f64,
    pub priced: bool,
}

/// Output of [`PricingService::derive`]
#[derive(Debug, Clone, Default)]
pub struct CostReport<'a> {
    pub records: Vec<PricedRecord<'a>>,
    pub stats: PricingStats,
}

impl<'a> CostReport<'a> {
    /// Sum of derived costs over every record, whatever its status
    pub fn total_cost(&self) -> f64 {
        self.records.iter().map(|p| p.cost).sum()
    }

    /// Sum of derived costs over completed records only
    pub fn completed_cost(&self) -> f64 {
        self.records
            .iter()
            .filter(|p| p.record.is_completed())
            .map(|p| p.cost)
            .sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PricedRecord<'a>> {
        self.records.iter()
    }

    /// Subset of records with recomputed counters
    pub fn filter<F>(&self, mut keep: F) -> CostReport<'a>
    where
        F: FnMut(&UsageRecord) -> bool,
    {
        let mut stats = PricingStats::default();
        let records: Vec<PricedRecord<'a>> = self
            .records
            .iter()
            .filter(|p| keep(p.record))
            .copied()
            .collect();
        for p in &records {
            stats.total += 1;
            if p.priced {
                stats.matched += 1;
            } else {
                stats.unmatched += 1;
            }
        }
        CostReport { records, stats }
    }
}

/// Pricing service for calculating token costs
#[derive(Debug, Clone, Default)]
pub struct PricingService {
    table: PriceTable,
}

impl PricingService {
    pub fn new(entries: impl IntoIterator<Item = PriceEntry>) -> Self {
        Self {
            table: PriceTable::new(entries),
        }
    }

    pub fn with_table(table: PriceTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &PriceTable {
        &self.table
    }

    /// Cost of one record, None when no price entry matches
    pub fn calculate_cost(&self, record: &UsageRecord) -> Option<f64> {
        let pricing = self.table.get(&record.provider, &record.model)?;
        let cached_cost = pricing.cached_price.unwrap_or(0.0);

        Some(
            (record.input() as f64 * pricing.input_price)
                + (record.output() as f64 * pricing.output_price)
                + (record.cached() as f64 * cached_cost),
        )
    }

    /// Price every record, counting matched and unmatched lookups
    pub fn derive<'a>(&self, records: &'a [UsageRecord]) -> CostReport<'a> {
        let mut stats = PricingStats::default();
        let mut priced = Vec::with_capacity(records.len());

        for record in records {
            stats.total += 1;
            let (cost, matched) = match self.calculate_cost(record) {
                Some(cost) => (cost, true),
                None => (0.0, false),
            };
            if matched {
                stats.matched += 1;
            } else {
                stats.unmatched += 1;
            }
            priced.push(PricedRecord {
                record,
                cost,
                priced: matched,
            });
        }

        if stats.unmatched > 0 {
            warn!(
                total = stats.total,
                matched = stats.matched,
                unmatched = stats.unmatched,
                "records without a price entry were priced at zero"
            );
        } else {
            debug!(total = stats.total, "all records priced");
        }

        CostReport {
            records: priced,
            stats,
        }
    }
}
