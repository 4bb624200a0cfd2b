//! Two-period orchestration of query units.
//!
//! A [`Job`] names a project, the later of the two compared windows and the
//! units to evaluate. [`Pipeline::run`] drives every unit through
//!
//! 1. pass 1 over both periods (criteria units) or group evaluation (KPI units),
//! 2. the feature whitelist union and pass 2,
//! 3. within-period snapshot puts, the cross-period diff and its put,
//!
//! recording one [`UnitRunResult`] per unit. A failing unit leaves a status
//! entry and never stops its siblings.

pub mod mailer;

use crate::config::InsightsSettings;
use crate::error::{Error, Result};
use crate::insights::{
    compute_cross_period_insights, compute_within_period_insights, FeatureWhitelist, Pass,
    WithinPeriodInsights,
};
use crate::kpi::custom::CustomMetric;
use crate::kpi::{compute_cross_period_kpis, KpiEvaluator, KpiSnapshot};
use crate::query::{KpiQueryGroup, MultiFunnelQuery, Query, QueryShape};
use crate::source::RecordSource;
use crate::store::{get_json, put_json, SnapshotKey, SnapshotKind, SnapshotStore};
use crate::types::{Period, PeriodPair};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Instant;
use uuid::Uuid;

// ============================================
// Jobs
// ============================================

/// How a unit's `query` is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Event,
    EventOccurrence,
    Funnel,
    Kpi,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Event => "event",
            UnitKind::EventOccurrence => "event_occurrence",
            UnitKind::Funnel => "funnel",
            UnitKind::Kpi => "kpi",
        }
    }
}

/// One entry of a job file. The query body is decoded per unit so a
/// malformed definition only fails its own unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobUnit {
    pub query_id: i64,
    pub kind: UnitKind,
    #[serde(default)]
    pub query: serde_json::Value,
}

impl JobUnit {
    pub fn resolve(&self) -> Result<Unit> {
        let query = match self.kind {
            UnitKind::Event => UnitQuery::Insights(QueryShape::TwoSided(Query {
                id: self.query_id,
                ..decode::<Query>(&self.query)?
            })),
            UnitKind::EventOccurrence => UnitQuery::Insights(QueryShape::EventOccurrence(Query {
                id: self.query_id,
                ..decode::<Query>(&self.query)?
            })),
            UnitKind::Funnel => UnitQuery::Insights(QueryShape::Funnel(MultiFunnelQuery {
                id: self.query_id,
                ..decode::<MultiFunnelQuery>(&self.query)?
            })),
            UnitKind::Kpi => UnitQuery::Kpi(KpiQueryGroup {
                id: self.query_id,
                ..decode::<KpiQueryGroup>(&self.query)?
            }),
        };
        Ok(Unit {
            query_id: self.query_id,
            mailer: false,
            query,
        })
    }
}

fn decode<T: DeserializeOwned>(value: &serde_json::Value) -> Result<T> {
    T::deserialize(value).map_err(|e| Error::Query(e.to_string()))
}

/// A batch of units over one pair of periods.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Job {
    pub project_id: i64,
    /// Start of the later window, unix seconds.
    pub start: i64,
    /// End of the later window, unix seconds.
    pub end: i64,
    /// Overrides `[insights] top_k`.
    #[serde(default)]
    pub k: Option<i64>,
    #[serde(default)]
    pub units: Vec<JobUnit>,
    /// Evaluate the built-in mailer queries instead of `units`.
    #[serde(default)]
    pub mailer: bool,
    /// Use a stored period-1 snapshot instead of rescanning period 1.
    #[serde(default)]
    pub reuse_first_period: bool,
    /// Definitions for the `profile` KPI category.
    #[serde(default)]
    pub custom_metrics: Vec<CustomMetric>,
}

impl Job {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Later window `[start, end]` and the same window shifted back by
    /// `period_shift_secs`. An end in the future is rejected.
    pub fn periods(&self, settings: &InsightsSettings, now: i64) -> Result<PeriodPair> {
        if self.end > now {
            return Err(Error::Config(format!(
                "invalid end timestamp {}: later than now ({})",
                self.end, now
            )));
        }
        if self.start > self.end {
            return Err(Error::Config(format!(
                "invalid window: start {} after end {}",
                self.start, self.end
            )));
        }
        let second = Period::new(self.start, self.end);
        Ok(PeriodPair {
            first: second.shifted_back(settings.period_shift_secs),
            second,
        })
    }

    /// Settings with the job's K applied.
    pub fn settings(&self, base: &InsightsSettings) -> InsightsSettings {
        match self.k {
            Some(k) => base.clone().with_top_k(k),
            None => base.clone(),
        }
    }

    /// Resolved units in evaluation order. A query id listed twice is only
    /// kept the first time.
    pub fn units(&self, settings: &InsightsSettings) -> Vec<(i64, UnitKind, Result<Unit>)> {
        let resolved: Vec<(i64, UnitKind, Result<Unit>)> = if self.mailer {
            mailer::mailer_units(&settings.session_event)
                .into_iter()
                .map(|unit| (unit.query_id, unit.kind(), Ok(unit)))
                .collect()
        } else {
            self.units
                .iter()
                .map(|u| (u.query_id, u.kind, u.resolve()))
                .collect()
        };
        let mut seen = HashSet::new();
        resolved
            .into_iter()
            .filter(|(query_id, _, _)| {
                let first = seen.insert(*query_id);
                if !first {
                    tracing::debug!(query_id, "query already listed in this job");
                }
                first
            })
            .collect()
    }
}

/// Decoded query of a unit.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitQuery {
    Insights(QueryShape),
    Kpi(KpiQueryGroup),
}

/// A unit ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub query_id: i64,
    /// Snapshots go under the mailer keyspace.
    pub mailer: bool,
    pub query: UnitQuery,
}

impl Unit {
    pub fn kind(&self) -> UnitKind {
        match &self.query {
            UnitQuery::Insights(QueryShape::TwoSided(_)) => UnitKind::Event,
            UnitQuery::Insights(QueryShape::EventOccurrence(_)) => UnitKind::EventOccurrence,
            UnitQuery::Insights(QueryShape::Funnel(_)) => UnitKind::Funnel,
            UnitQuery::Kpi(_) => UnitKind::Kpi,
        }
    }
}

// ============================================
// Run results
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Success,
    Error,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Success => "success",
            UnitStatus::Error => "error",
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step a unit failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pass1,
    Pass2,
    CrossPeriod,
    Kpi,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pass1 => "pass1",
            Stage::Pass2 => "pass2",
            Stage::CrossPeriod => "cross_period",
            Stage::Kpi => "kpi",
        }
    }

    /// Key of the run status entry for a failure of `query_id` in this stage.
    pub fn status_key(&self, query_id: i64) -> String {
        match self {
            Stage::Pass1 => format!("error-wpi-pass1-{}", query_id),
            Stage::Pass2 => format!("error-wpi-pass2-{}", query_id),
            Stage::CrossPeriod => format!("error-cpi-{}", query_id),
            Stage::Kpi => format!("error-kpi-query-{}", query_id),
        }
    }
}

/// Result of running one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRunResult {
    pub query_id: i64,
    pub kind: UnitKind,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub status: UnitStatus,
    pub error_message: Option<String>,
    pub stage: Option<Stage>,
}

/// A unit's result plus the status entries it contributes to the run.
#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub result: UnitRunResult,
    pub status: BTreeMap<String, String>,
}

impl UnitOutcome {
    /// Outcome of a unit that failed before it could run.
    pub fn failed(query_id: i64, kind: UnitKind, error: &Error) -> Self {
        let stage = initial_stage(kind);
        Self {
            result: UnitRunResult {
                query_id,
                kind,
                started_at: Utc::now(),
                duration_ms: 0,
                status: UnitStatus::Error,
                error_message: Some(error.to_string()),
                stage: Some(stage),
            },
            status: BTreeMap::from([(stage.status_key(query_id), error.to_string())]),
        }
    }
}

fn initial_stage(kind: UnitKind) -> Stage {
    match kind {
        UnitKind::Kpi => Stage::Kpi,
        _ => Stage::Pass1,
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub project_id: i64,
    pub periods: PeriodPair,
    pub units: Vec<UnitRunResult>,
    /// Failure entries keyed `error-<stage>-<query>`, plus per-metric KPI failures.
    pub status: BTreeMap<String, String>,
}

impl RunSummary {
    pub fn new(project_id: i64, periods: PeriodPair) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            project_id,
            periods,
            units: Vec::new(),
            status: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, outcome: UnitOutcome) {
        self.status.extend(outcome.status);
        self.units.push(outcome.result);
    }

    pub fn failed(&self) -> usize {
        self.units
            .iter()
            .filter(|u| u.status == UnitStatus::Error)
            .count()
    }
}

struct StageError {
    stage: Stage,
    error: Error,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, StageError>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, StageError> {
        self.map_err(|error| StageError { stage, error })
    }
}

// ============================================
// Pipeline
// ============================================

/// Runs units of one project against a record source and a snapshot store.
pub struct Pipeline<'a> {
    source: &'a dyn RecordSource,
    store: &'a dyn SnapshotStore,
    settings: &'a InsightsSettings,
}

impl<'a> Pipeline<'a> {
    /// `settings` should already carry the job's K (see [`Job::settings`]).
    pub fn new(
        source: &'a dyn RecordSource,
        store: &'a dyn SnapshotStore,
        settings: &'a InsightsSettings,
    ) -> Self {
        Self {
            source,
            store,
            settings,
        }
    }

    /// Runs every unit of `job` in order. Fails only when the job itself is
    /// invalid; unit failures are recorded in the summary.
    pub fn run(&self, job: &Job, now: i64) -> Result<RunSummary> {
        let settings = job.settings(self.settings);
        let periods = job.periods(&settings, now)?;
        let scoped = Pipeline::new(self.source, self.store, &settings);
        let mut summary = RunSummary::new(job.project_id, periods);

        tracing::info!(
            run_id = %summary.run_id,
            project_id = job.project_id,
            k = settings.top_k,
            mailer = job.mailer,
            "Starting delta insights run"
        );

        for (query_id, kind, unit) in job.units(&settings) {
            let outcome = match unit {
                Ok(unit) => scoped.run_unit(job, &unit, periods),
                Err(e) => {
                    tracing::error!(query_id, error = %e, "invalid unit definition");
                    UnitOutcome::failed(query_id, kind, &e)
                }
            };
            summary.record(outcome);
        }

        tracing::info!(
            run_id = %summary.run_id,
            units = summary.units.len(),
            failed = summary.failed(),
            "Delta insights run complete"
        );
        Ok(summary)
    }

    /// Runs one unit over both periods.
    pub fn run_unit(&self, job: &Job, unit: &Unit, periods: PeriodPair) -> UnitOutcome {
        let started_at = Utc::now();
        let timer = Instant::now();
        let mut status = BTreeMap::new();

        let outcome = match &unit.query {
            UnitQuery::Insights(shape) => self.run_insights(job, unit, shape, periods),
            UnitQuery::Kpi(group) => self.run_kpi(job, unit, group, periods, &mut status),
        };
        let duration_ms = timer.elapsed().as_millis() as i64;

        let (run_status, error_message, stage) = match outcome {
            Ok(()) => {
                tracing::info!(query_id = unit.query_id, duration_ms, "unit complete");
                (UnitStatus::Success, None, None)
            }
            Err(StageError { stage, error }) => {
                tracing::error!(
                    query_id = unit.query_id,
                    stage = stage.as_str(),
                    error = %error,
                    "unit failed"
                );
                status.insert(stage.status_key(unit.query_id), error.to_string());
                (UnitStatus::Error, Some(error.to_string()), Some(stage))
            }
        };

        UnitOutcome {
            result: UnitRunResult {
                query_id: unit.query_id,
                kind: unit.kind(),
                started_at,
                duration_ms,
                status: run_status,
                error_message,
                stage,
            },
            status,
        }
    }

    fn key(&self, job: &Job, unit: &Unit, period: Period, kind: SnapshotKind) -> SnapshotKey {
        SnapshotKey::new(job.project_id, period, unit.query_id, self.settings.top_k, kind)
            .with_mailer(unit.mailer)
    }

    /// Stored snapshot of `key` when it exists and was made by the same query.
    fn reusable<T: DeserializeOwned>(
        &self,
        key: &SnapshotKey,
        fingerprint: &str,
        fingerprint_of: impl Fn(&T) -> &str,
    ) -> Option<T> {
        match get_json::<T>(self.store, key) {
            Ok(Some(snapshot)) if fingerprint_of(&snapshot) == fingerprint => {
                tracing::info!(key = %key, "reusing stored period 1 snapshot");
                Some(snapshot)
            }
            Ok(Some(_)) => {
                tracing::warn!(key = %key, "stored period 1 snapshot is for another query shape");
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cannot reuse period 1 snapshot");
                None
            }
        }
    }

    fn scan(
        &self,
        project_id: i64,
        shape: &QueryShape,
        period: Period,
        pass: Pass<'_>,
    ) -> Result<WithinPeriodInsights> {
        let reader = self.source.events(project_id, period)?;
        compute_within_period_insights(reader, period, shape, self.settings, pass)
    }

    fn run_insights(
        &self,
        job: &Job,
        unit: &Unit,
        shape: &QueryShape,
        periods: PeriodPair,
    ) -> std::result::Result<(), StageError> {
        shape.validate().at(Stage::Pass1)?;
        let fingerprint = shape.fingerprint();

        let reused = if job.reuse_first_period {
            self.reusable::<WithinPeriodInsights>(
                &self.key(job, unit, periods.first, SnapshotKind::Wpi),
                &fingerprint,
                |w| w.fingerprint.as_str(),
            )
        } else {
            None
        };

        let first_discovery = match reused {
            Some(_) => None,
            None => Some(
                self.scan(job.project_id, shape, periods.first, Pass::Discover)
                    .at(Stage::Pass1)?,
            ),
        };
        let second_discovery = self
            .scan(job.project_id, shape, periods.second, Pass::Discover)
            .at(Stage::Pass1)?;

        let mut whitelist = FeatureWhitelist::new();
        for wpi in [reused.as_ref().or(first_discovery.as_ref()), Some(&second_discovery)]
            .into_iter()
            .flatten()
        {
            for section in wpi.sections() {
                whitelist.absorb(section);
            }
        }
        tracing::info!(query_id = unit.query_id, features = whitelist.len(), "whitelist built");

        let wpi1 = match reused {
            Some(wpi) => wpi,
            None => {
                let wpi = self
                    .scan(job.project_id, shape, periods.first, Pass::Restricted(&whitelist))
                    .at(Stage::Pass2)?;
                let key = self.key(job, unit, periods.first, SnapshotKind::Wpi);
                put_json(self.store, &key, &wpi).at(Stage::Pass2)?;
                wpi
            }
        };
        let wpi2 = self
            .scan(job.project_id, shape, periods.second, Pass::Restricted(&whitelist))
            .at(Stage::Pass2)?;
        let key = self.key(job, unit, periods.second, SnapshotKind::Wpi);
        put_json(self.store, &key, &wpi2).at(Stage::Pass2)?;

        let cpi = compute_cross_period_insights(&wpi1, &wpi2).at(Stage::CrossPeriod)?;
        let key = self.key(job, unit, periods.second, SnapshotKind::Cpi);
        put_json(self.store, &key, &cpi).at(Stage::CrossPeriod)?;
        Ok(())
    }

    fn run_kpi(
        &self,
        job: &Job,
        unit: &Unit,
        group: &KpiQueryGroup,
        periods: PeriodPair,
        status: &mut BTreeMap<String, String>,
    ) -> std::result::Result<(), StageError> {
        let evaluator = KpiEvaluator::new(self.source, self.settings, job.project_id)
            .with_custom_metrics(&job.custom_metrics)
            .with_periods(periods);
        let fingerprint = group.fingerprint();

        let reused = if job.reuse_first_period {
            self.reusable::<KpiSnapshot>(
                &self.key(job, unit, periods.first, SnapshotKind::Wpi),
                &fingerprint,
                |s| s.fingerprint.as_str(),
            )
        } else {
            None
        };

        let first = match reused {
            Some(snapshot) => snapshot,
            None => {
                let snapshot = evaluator.evaluate_group(group, periods.first);
                let key = self.key(job, unit, periods.first, SnapshotKind::Wpi);
                put_json(self.store, &key, &snapshot).at(Stage::Kpi)?;
                snapshot
            }
        };
        let second = evaluator.evaluate_group(group, periods.second);
        let key = self.key(job, unit, periods.second, SnapshotKind::Wpi);
        put_json(self.store, &key, &second).at(Stage::Kpi)?;

        status.extend(first.status.clone());
        status.extend(second.status.clone());

        let cpi = compute_cross_period_kpis(&first, &second).at(Stage::Kpi)?;
        let key = self.key(job, unit, periods.second, SnapshotKind::Cpi);
        put_json(self.store, &key, &cpi).at(Stage::Kpi)?;
        Ok(())
    }
}
