//! deltalens-report - render top insights from a stored cross-period snapshot

use deltalens_core::insights::{weekly_insights, CrossPeriodInsights, Headline, InsightKind};
use deltalens_core::kpi::CrossPeriodInsightsKpi;
use deltalens_core::pipeline::mailer;
use deltalens_core::store::{self, get_json};
use deltalens_core::{Config, Error, SnapshotKey, SnapshotKind};
use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser)]
#[command(name = "deltalens-report")]
#[command(about = "Show week-over-week insights for one query")]
#[command(version)]
struct Args {
    /// Project id
    project: i64,

    /// Start date of the later period (YYYYMMDD, UTC)
    date: String,

    /// Query id
    query: i64,

    /// K the snapshot was computed with (defaults to [insights] top_k)
    #[arg(short)]
    k: Option<i64>,

    /// Read the mailer keyspace
    #[arg(long)]
    mailer: bool,

    /// The query is a funnel (goal is the base-and-target count)
    #[arg(long)]
    funnel: bool,

    /// The query is a KPI group
    #[arg(long, conflicts_with = "funnel")]
    kpi: bool,

    /// Number of records per insight kind (defaults to [insights] report_records)
    #[arg(short = 'n', long)]
    records: Option<usize>,

    /// Output format: text (default) or json
    #[arg(short, long, default_value = "text")]
    format: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();
    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        deltalens_core::logging::init(&config.logging).context("failed to initialize logging")?;
    let settings = config.settings();

    let store = store::open(&config.store).context("failed to open snapshot store")?;
    let key = SnapshotKey {
        project_id: args.project,
        date: args.date.clone(),
        query_id: args.query,
        k: args.k.unwrap_or(settings.top_k),
        kind: SnapshotKind::Cpi,
        mailer: args.mailer,
    };
    let records = args.records.unwrap_or(settings.report_records);

    if args.kpi {
        let cpi: Vec<CrossPeriodInsightsKpi> = get_json(store.as_ref(), &key)
            .context("failed to read snapshot")?
            .ok_or_else(|| Error::SnapshotNotFound(key.to_string()))?;
        if args.format == "json" {
            println!("{}", serde_json::to_string_pretty(&cpi)?);
        } else {
            print_kpi_report(&args, &cpi, records);
        }
        return Ok(());
    }

    let cpi: CrossPeriodInsights = get_json(store.as_ref(), &key)
        .context("failed to read snapshot")?
        .ok_or_else(|| Error::SnapshotNotFound(key.to_string()))?;
    let report = weekly_insights(&cpi, records, args.funnel);

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_title(&args);
    println!("  Base:       {}", format_headline(&report.base));
    println!("  Goal:       {}", format_headline(&report.goal));
    println!("  Conversion: {}", format_headline(&report.conv));

    for (kind, title) in [
        (InsightKind::Conversion, "Conversion drivers"),
        (InsightKind::Distribution, "Distribution shifts"),
    ] {
        let mut rows = report.records_of(kind).peekable();
        if rows.peek().is_none() {
            continue;
        }
        println!("\n{}:", title);
        for record in rows {
            println!(
                "  {} = {} ({}, {}) {}  score {:.4}",
                record.key,
                record.value,
                record.entity.as_str(),
                record.side,
                format_headline(&record.actual_values),
                record.score
            );
            if let Some(ref conv) = record.change_in_conversion {
                println!("      conversion {}", format_headline(conv));
            }
        }
    }
    Ok(())
}

fn print_title(args: &Args) {
    let title = if args.mailer {
        mailer::headline(args.query).unwrap_or("Mailer query")
    } else {
        "Query"
    };
    println!(
        "{} {} (project {}, week of {})",
        title, args.query, args.project, args.date
    );
}

fn print_kpi_report(args: &Args, cpi: &[CrossPeriodInsightsKpi], records: usize) {
    print_title(args);
    for kpi in cpi {
        let global = &kpi.target.global;
        println!(
            "  {}/{}: {:.2} -> {:.2} ({:+.1}%)",
            kpi.category, kpi.name, global.first, global.second, global.perc
        );
        let mut features: Vec<_> = kpi.target.feat.entries().collect();
        features.sort_by(|a, b| b.2.perc.abs().total_cmp(&a.2.perc.abs()));
        for (key, value, diff) in features.into_iter().take(records) {
            println!(
                "      {} = {}: {:.2} -> {:.2} ({:+.1}%)",
                key, value, diff.first, diff.second, diff.perc
            );
        }
    }
}

fn format_headline(headline: &Headline) -> String {
    format!(
        "{:.2} -> {:.2} ({:+.1}%)",
        headline.w1, headline.w2, headline.percentage
    )
}
