//! deltalens-analyze - CLI tool to run delta insights jobs
//!
//! Runs every unit of a job file over the job's window and the window one
//! shift earlier, writes within-period and cross-period snapshots, and prints
//! the run summary.

use deltalens_core::kpi::{list_metrics, list_metrics_for_category};
use deltalens_core::pipeline::{Job, Pipeline, RunSummary, UnitOutcome, UnitStatus};
use deltalens_core::{store, Config, DirectorySource, RecordSource, SnapshotStore};
use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Parser)]
#[command(name = "deltalens-analyze")]
#[command(about = "Compare query results across two periods")]
#[command(version)]
struct Args {
    /// Job file (JSON) describing the project, window and units
    #[arg(long, required_unless_present = "list_metrics")]
    job: Option<PathBuf>,

    /// Units evaluated concurrently
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,

    /// Root of the record tree (defaults to $XDG_DATA_HOME/deltalens/records)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// List known KPIs without running anything
    #[arg(long)]
    list_metrics: bool,

    /// Restrict --list-metrics to one display category
    #[arg(long, requires = "list_metrics")]
    category: Option<String>,

    /// Output format: text (default) or json
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Verbose output (show every status entry)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        deltalens_core::logging::init(&config.logging).context("failed to initialize logging")?;

    if args.list_metrics {
        print_metrics(args.category.as_deref(), &args.format)?;
        return Ok(());
    }

    let job_path = args.job.as_ref().context("--job is required")?;
    let raw = std::fs::read(job_path)
        .with_context(|| format!("failed to read job file {}", job_path.display()))?;
    let job = Job::from_json(&raw).context("failed to parse job file")?;

    let settings = job.settings(&config.settings());
    let periods = job
        .periods(&settings, chrono::Utc::now().timestamp())
        .context("invalid job window")?;

    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(|| Config::data_dir().join("records"));
    let source: Arc<dyn RecordSource> = Arc::new(DirectorySource::new(data_dir));
    let store: Arc<dyn SnapshotStore> =
        Arc::from(store::open(&config.store).context("failed to open snapshot store")?);

    let units = job.units(&settings);
    let pb = ProgressBar::new(units.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("invalid progress template")?
            .progress_chars("#>-"),
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let job = Arc::new(job);
    let settings = Arc::new(settings);
    let semaphore = Arc::new(Semaphore::new(args.jobs.max(1)));
    let mut summary = RunSummary::new(job.project_id, periods);

    tracing::info!(
        run_id = %summary.run_id,
        project_id = job.project_id,
        units = units.len(),
        jobs = args.jobs,
        "deltalens-analyze starting"
    );

    let outcomes: Vec<UnitOutcome> = runtime.block_on(async {
        let mut handles = Vec::new();
        for (query_id, kind, unit) in units {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("unit scheduler closed")?;
            let (source, store, settings, job, pb) = (
                source.clone(),
                store.clone(),
                settings.clone(),
                job.clone(),
                pb.clone(),
            );
            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                pb.set_message(format!("query {}", query_id));
                let outcome = match unit {
                    Ok(unit) => Pipeline::new(source.as_ref(), store.as_ref(), &settings)
                        .run_unit(&job, &unit, periods),
                    Err(e) => {
                        tracing::error!(query_id, error = %e, "invalid unit definition");
                        UnitOutcome::failed(query_id, kind, &e)
                    }
                };
                pb.inc(1);
                outcome
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(handle.await.context("unit task panicked")?);
        }
        Ok::<_, anyhow::Error>(outcomes)
    })?;

    pb.finish_and_clear();
    for outcome in outcomes {
        summary.record(outcome);
    }

    tracing::info!(
        run_id = %summary.run_id,
        failed = summary.failed(),
        "deltalens-analyze complete"
    );

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_text_summary(&summary, args.verbose);
    }

    Ok(())
}

fn print_text_summary(summary: &RunSummary, verbose: bool) {
    println!("Run {} (project {})", summary.run_id, summary.project_id);
    println!(
        "Periods: {} vs {}",
        summary.periods.first.date_key(),
        summary.periods.second.date_key()
    );

    for result in &summary.units {
        let status_icon = match result.status {
            UnitStatus::Success => "+",
            UnitStatus::Error => "!",
        };
        println!(
            "  [{}] query {} ({}, {}ms)",
            status_icon,
            result.query_id,
            result.kind.as_str(),
            result.duration_ms
        );
        if let Some(ref e) = result.error_message {
            let stage = result.stage.map(|s| s.as_str()).unwrap_or("-");
            println!("      Error in {}: {}", stage, e);
        }
    }

    if verbose && !summary.status.is_empty() {
        println!("\nStatus:");
        for (key, message) in &summary.status {
            println!("  {}: {}", key, message);
        }
    }

    println!("\n---");
    println!(
        "{} unit(s), {} failed, {} status entr{}",
        summary.units.len(),
        summary.failed(),
        summary.status.len(),
        if summary.status.len() == 1 { "y" } else { "ies" }
    );
}

fn print_metrics(category: Option<&str>, format: &str) -> Result<()> {
    let metrics = match category {
        Some(category) => list_metrics_for_category(category),
        None => list_metrics(),
    };
    if let Some(category) = category {
        if metrics.is_empty() {
            anyhow::bail!("No metrics known for category '{}'", category);
        }
    }

    if format == "json" {
        let output = serde_json::json!(metrics
            .iter()
            .map(|m| {
                serde_json::json!({
                    "category": m.category,
                    "name": m.name,
                    "kind": m.value_kind.as_str(),
                    "summary": m.summary,
                })
            })
            .collect::<Vec<_>>());
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let mut current = "";
    for metric in &metrics {
        if metric.category != current {
            current = metric.category;
            println!("{}:", current);
        }
        println!(
            "  - {:<40} {:<8} {}",
            metric.name,
            metric.value_kind.as_str(),
            metric.summary
        );
    }
    Ok(())
}
