use std::path::PathBuf;

use anyhow::Context as _;
use chrono::{Datelike, Local, NaiveDate};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{debug, info, warn};

use routestat::config::Settings;
use routestat::services::{
    Aggregator, ExchangeRateService, HttpRateProvider, Pipeline, PricingService, ReadThroughCache,
    ReportRequest, SnapshotStore,
};
use routestat::sources::{JsonDirSource, RecordSource};
use routestat::types::{
    ActivityEntry, DailyCosts, DistributionRow, GroupBy, LedgerSummary, ProviderRanking,
    UsageReport, UsageWindow,
};

/// Usage, cost and provider rankings for routed AI calls
#[derive(Parser)]
#[command(name = "routestat")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.routestat/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory, overriding the config file
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone, Default)]
struct RangeArgs {
    /// Year (default: current)
    #[arg(long)]
    year: Option<i32>,

    /// Month 1-12 (default: current)
    #[arg(long)]
    month: Option<u32>,

    /// First day, YYYY-MM-DD (default: start of month)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Last day, YYYY-MM-DD (default: end of month)
    #[arg(long)]
    to: Option<NaiveDate>,
}

impl RangeArgs {
    fn request(&self) -> ReportRequest {
        let today = Local::now().date_naive();
        ReportRequest {
            year: self.year.unwrap_or(today.year()),
            month: self.month.unwrap_or(today.month()),
            from: self.from,
            to: self.to,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum ByArg {
    Provider,
    Model,
}

impl From<ByArg> for GroupBy {
    fn from(by: ByArg) -> Self {
        match by {
            ByArg::Provider => GroupBy::Provider,
            ByArg::Model => GroupBy::Model,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Cost per day of one month
    Daily {
        #[command(flatten)]
        range: RangeArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Cost and tokens per provider or model
    Distribution {
        #[command(flatten)]
        range: RangeArgs,

        #[arg(long, value_enum, default_value = "provider")]
        by: ByArg,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Providers scored and ranked by category
    Ranking {
        #[command(flatten)]
        range: RangeArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Full report, served from the snapshot store while fresh
    Report {
        #[command(flatten)]
        range: RangeArgs,

        /// Ignore any stored snapshot
        #[arg(long)]
        refresh: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Calls, credits and adjustments, newest first
    Activity {
        #[command(flatten)]
        range: RangeArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub fn run(self) -> anyhow::Result<()> {
        let settings = match &self.config {
            Some(path) => Settings::from_path(path),
            None => Settings::load(),
        }
        .context("loading settings")?;
        let data_dir = self.data_dir.unwrap_or_else(|| settings.data_dir.clone());
        let source = JsonDirSource::new(data_dir);
        debug!(source = source.name(), dir = %source.data_dir().display(), "reading usage data");

        match self.command {
            Commands::Daily { range, json } => run_daily(&settings, &source, &range, json),
            Commands::Distribution { range, by, json } => {
                run_distribution(&source, &range, by.into(), json)
            }
            Commands::Ranking { range, json } => run_ranking(&settings, &source, &range, json),
            Commands::Report {
                range,
                refresh,
                json,
            } => run_report(&settings, &source, &range, refresh, json),
            Commands::Activity { range, json } => run_activity(&source, &range, json),
        }
    }
}

fn window_for(request: &ReportRequest) -> UsageWindow {
    let (from, to) = request.range();
    UsageWindow::from_dates_in(from, to, &Local)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_daily(
    settings: &Settings,
    source: &JsonDirSource,
    range: &RangeArgs,
    json: bool,
) -> anyhow::Result<()> {
    let request = range.request();
    let (from, to) = request.range();
    let records = source.records(&window_for(&request))?;
    let pipeline = Pipeline::new(PricingService::new(source.prices()?), settings.ranker());

    let costs = pipeline.pricing().derive(&records);
    let daily = Aggregator::daily_costs(&costs, from, to, request.year, request.month);

    if json {
        print_json(&daily)
    } else {
        print_daily(&daily, "USD");
        Ok(())
    }
}

fn run_distribution(
    source: &JsonDirSource,
    range: &RangeArgs,
    group_by: GroupBy,
    json: bool,
) -> anyhow::Result<()> {
    let window = window_for(&range.request());
    let records = source.records(&window)?;

    let rows = match source.stored_distribution(group_by)? {
        Some(stored) => {
            info!(rows = stored.len(), "using store-provided distribution");
            Aggregator::backfill_tokens(stored, &records, &window, group_by)
        }
        None => {
            let pricing = PricingService::new(source.prices()?);
            Aggregator::distribution(&pricing.derive(&records), &window, group_by)
        }
    };

    if json {
        print_json(&rows)
    } else {
        print_distribution(&rows, "USD");
        Ok(())
    }
}

fn run_ranking(
    settings: &Settings,
    source: &JsonDirSource,
    range: &RangeArgs,
    json: bool,
) -> anyhow::Result<()> {
    let records = source.records(&window_for(&range.request()))?;
    let pricing = PricingService::new(source.prices()?);
    let ranking = settings
        .ranker()
        .rank(Aggregator::provider_metrics(&pricing.derive(&records)));

    if json {
        print_json(&ranking)
    } else {
        print_ranking(&ranking);
        Ok(())
    }
}

fn run_report(
    settings: &Settings,
    source: &JsonDirSource,
    range: &RangeArgs,
    refresh: bool,
    json: bool,
) -> anyhow::Result<()> {
    let request = range.request();
    let mut store = SnapshotStore::new()?;
    let ranker = settings.ranker();
    let key = request.cache_key(&source.data_dir().to_string_lossy(), &ranker);
    if refresh {
        store.clear(&key)?;
    }

    let mut report: UsageReport = store.get_or_fetch(key, settings.snapshot_ttl(), || {
        let window = window_for(&request);
        let records = source.records(&window)?;
        let transactions = source.transactions(&window)?;
        let pipeline = Pipeline::new(PricingService::new(source.prices()?), ranker);
        Ok(pipeline.run(&request, &records, &transactions))
    })?;

    if !settings.currency.eq_ignore_ascii_case(&report.currency) {
        let provider = HttpRateProvider::new(settings.exchange_rate_url.clone());
        let converted = ExchangeRateService::persistent(provider, settings.exchange_rate_ttl())
            .and_then(|mut rates| rates.convert_report(&mut report, &settings.currency));
        if let Err(e) = converted {
            warn!("showing {} amounts: {}", report.currency, e);
        }
    }

    if json {
        return print_json(&report);
    }

    println!(
        "Report {}-{:02} (generated {})",
        report.daily.year,
        report.daily.month,
        report.generated_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
    );
    print_daily(&report.daily, &report.currency);
    println!();
    print_distribution(&report.by_provider, &report.currency);
    println!();
    print_ranking(&report.ranking);
    println!();
    print_ledger(&report.ledger, &report.currency);
    Ok(())
}

fn run_activity(source: &JsonDirSource, range: &RangeArgs, json: bool) -> anyhow::Result<()> {
    let window = window_for(&range.request());
    let records = source.records(&window)?;
    let transactions = source.transactions(&window)?;
    let activity = Aggregator::activity(&records, &transactions);

    if json {
        return print_json(&activity);
    }
    print_activity(&activity);
    println!();
    print_ledger(&Aggregator::ledger(&activity), "USD");
    Ok(())
}

fn print_daily(daily: &DailyCosts, currency: &str) {
    for (i, cost) in daily.daily_costs.iter().enumerate() {
        if *cost > 0.0 {
            println!("{}-{:02}-{:02}  {:>12.4} {}", daily.year, daily.month, i + 1, cost, currency);
        }
    }
    println!("Total: {:.4} {}", daily.total_cost, currency);
    if daily.pricing.unmatched > 0 {
        println!(
            "{} of {} records had no price entry",
            daily.pricing.unmatched, daily.pricing.total
        );
    }
    if daily.excluded_pending + daily.excluded_error > 0 {
        println!(
            "Excluded: {} pending, {} failed",
            daily.excluded_pending, daily.excluded_error
        );
    }
}

fn print_distribution(rows: &[DistributionRow], currency: &str) {
    for row in rows {
        println!(
            "{:<32} {:>12.4} {} {:>12} tokens",
            row.group_key, row.total_cost, currency, row.total_tokens
        );
    }
}

fn print_ranking(ranking: &ProviderRanking) {
    for (label, stats) in [
        ("Open source", &ranking.open_source),
        ("Closed source", &ranking.closed_source),
    ] {
        println!("{}:", label);
        for (i, s) in stats.iter().enumerate() {
            println!(
                "  {}. {:<20} score {:>6.2}  cost {:>6.2}  perf {:>6.2}  popularity {:>6.2}",
                i + 1,
                s.metrics.provider,
                s.score.total_score,
                s.score.cost_efficiency,
                s.score.performance,
                s.score.usage_popularity
            );
        }
    }
    if let Some(best) = &ranking.summary.best_overall {
        println!("Best overall: {} ({:.2})", best.provider, best.value);
    }
}

fn print_activity(entries: &[ActivityEntry]) {
    for entry in entries {
        let subject = entry
            .provider
            .as_deref()
            .map(|p| format!("{}/{}", p, entry.model.as_deref().unwrap_or("-")))
            .unwrap_or_default();
        println!(
            "{}  {:<18} {:>10.4}  {}",
            entry.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            format!("{:?}", entry.kind),
            entry.amount,
            subject
        );
    }
}

fn print_ledger(ledger: &LedgerSummary, currency: &str) {
    println!(
        "Credits {:.4} {c}  Debits {:.4} {c}  Net {:.4} {c}",
        ledger.total_credits,
        ledger.total_debits,
        ledger.net,
        c = currency
    );
    println!(
        "{} successful, {} failed, {} credits, {} adjustments",
        ledger.successful_calls, ledger.failed_calls, ledger.credits, ledger.manual_adjustments
    );
}
