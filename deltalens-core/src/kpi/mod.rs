//! KPI engine: named business metrics per period and their cross-period diffs.
//!
//! Unlike the insights path there is no matcher stage. Every record that
//! qualifies for a metric is accumulated directly, per feature value, by one
//! of three evaluators:
//!
//! - [`events`] for website sessions, page views and form submissions
//! - [`channel`] for ad-platform documents, one channel or all of them
//! - [`custom`] for project-defined metrics over profile records
//!
//! [`KpiEvaluator`] runs a whole query group for one period and isolates
//! failures per metric.

pub mod accumulator;
pub mod channel;
pub mod custom;
pub mod events;
pub mod filter;
pub mod registry;

use crate::config::InsightsSettings;
use crate::error::{Error, Result};
use crate::insights::distribution::f64_or_zero;
use crate::insights::stats::{finite_or_zero, js_divergence, smart_divide};
use crate::insights::{DiffMetric, FeatureTable};
use crate::query::{KpiFilter, KpiQuery, KpiQueryGroup};
use crate::source::{RecordSource, ScanStats};
use crate::types::{Period, PeriodPair};
use channel::{evaluate_all_channels, evaluate_channel_metric, Channel};
use custom::{discover_properties, evaluate_custom_metric, CustomMetric};
use events::{evaluate_event_metrics, find_recipe, EventCategory, EventContext};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub use channel::ChannelSpec;
pub use registry::{list_metrics, list_metrics_for_category, KpiDescriptor, KpiValueKind};

pub const ALL_CHANNELS_CATEGORY: &str = "all_channels_metrics";
pub const PROFILE_CATEGORY: &str = "profile";

/// Global value and per-feature values of one metric in one period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricInfo {
    #[serde(default, deserialize_with = "f64_or_zero")]
    pub global: f64,
    #[serde(default)]
    pub feat: FeatureTable<f64>,
}

impl MetricInfo {
    /// Adds `other` slot by slot.
    pub fn accumulate(&mut self, other: &MetricInfo) {
        self.global += other.global;
        for (key, value, v) in other.feat.entries() {
            *self.feat.upsert(key, value) += *v;
        }
    }
}

/// Family of records a KPI is computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Spectrum {
    #[default]
    Events,
    Campaign,
    Custom,
}

impl Spectrum {
    pub fn of(display_category: &str) -> Self {
        if EventCategory::from_display(display_category).is_some() {
            Spectrum::Events
        } else if display_category == PROFILE_CATEGORY {
            Spectrum::Custom
        } else {
            Spectrum::Campaign
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WithinPeriodInsightsKpi {
    pub categ: Spectrum,
    /// Display category the metric belongs to.
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub name: String,
    pub metric: MetricInfo,
    pub scale: MetricInfo,
}

/// Every KPI of a query group for one period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiSnapshot {
    pub period: Option<Period>,
    #[serde(default)]
    pub fingerprint: String,
    pub metrics: Vec<WithinPeriodInsightsKpi>,
    /// `error-kpi-<group>-<n>` entries of metrics that failed.
    #[serde(default)]
    pub status: BTreeMap<String, String>,
    #[serde(default)]
    pub scan: ScanStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpiMetricInfo {
    pub global: DiffMetric,
    pub feat: FeatureTable<DiffMetric>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossPeriodInsightsKpi {
    pub periods: Option<PeriodPair>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub name: String,
    pub target: CpiMetricInfo,
    /// KPIs have no base side; this mirrors `target`.
    #[serde(default)]
    pub base_target: CpiMetricInfo,
    pub scale: CpiMetricInfo,
    /// Divergence of each feature value's share of the scale.
    pub jsd: FeatureTable<f64>,
    pub categ: Spectrum,
}

/// Diffs over the union of both periods' feature values; a value missing
/// from one period reads as 0 there.
pub fn diff_metric_info(first: &MetricInfo, second: &MetricInfo) -> CpiMetricInfo {
    let mut diff = CpiMetricInfo {
        global: DiffMetric::compute_kpi(first.global, second.global),
        feat: FeatureTable::new(),
    };
    for (key, value) in union_slots(&first.feat, &second.feat) {
        let v1 = first.feat.get(&key, &value).copied().unwrap_or_default();
        let v2 = second.feat.get(&key, &value).copied().unwrap_or_default();
        diff.feat.insert(&key, &value, DiffMetric::compute_kpi(v1, v2));
    }
    diff
}

fn union_slots(
    first: &FeatureTable<f64>,
    second: &FeatureTable<f64>,
) -> BTreeSet<(String, String)> {
    first
        .entries()
        .chain(second.entries())
        .map(|(k, v, _)| (k.clone(), v.clone()))
        .collect()
}

fn share(scale: &MetricInfo, key: &str, value: &str) -> f64 {
    let count = scale.feat.get(key, value).copied().unwrap_or_default();
    finite_or_zero(smart_divide(count, scale.global)).clamp(0.0, 1.0)
}

pub fn compute_cross_period_kpi(
    first: &WithinPeriodInsightsKpi,
    second: &WithinPeriodInsightsKpi,
    periods: Option<PeriodPair>,
) -> CrossPeriodInsightsKpi {
    let mut jsd = FeatureTable::new();
    for (key, value) in union_slots(&first.scale.feat, &second.scale.feat) {
        let p = share(&first.scale, &key, &value);
        let q = share(&second.scale, &key, &value);
        jsd.insert(&key, &value, js_divergence(p, q));
    }
    let target = diff_metric_info(&first.metric, &second.metric);
    CrossPeriodInsightsKpi {
        periods,
        category: second.category.clone(),
        name: second.name.clone(),
        base_target: target.clone(),
        target,
        scale: diff_metric_info(&first.scale, &second.scale),
        jsd,
        categ: second.categ,
    }
}

/// Pairs the KPIs of two snapshots of the same query group, in order.
pub fn compute_cross_period_kpis(
    first: &KpiSnapshot,
    second: &KpiSnapshot,
) -> Result<Vec<CrossPeriodInsightsKpi>> {
    if first.fingerprint != second.fingerprint {
        return Err(Error::ShapeMismatch(format!(
            "kpi snapshot fingerprints differ: {} vs {}",
            first.fingerprint, second.fingerprint
        )));
    }
    if first.metrics.len() != second.metrics.len() {
        return Err(Error::ShapeMismatch(format!(
            "kpi snapshots hold {} and {} metrics",
            first.metrics.len(),
            second.metrics.len()
        )));
    }
    let periods = match (first.period, second.period) {
        (Some(first), Some(second)) => Some(PeriodPair { first, second }),
        _ => None,
    };
    Ok(first
        .metrics
        .iter()
        .zip(&second.metrics)
        .map(|(a, b)| compute_cross_period_kpi(a, b, periods))
        .collect())
}

// ============================================
// Query group evaluation
// ============================================

type Evaluated = Result<(MetricInfo, MetricInfo, ScanStats)>;

/// Evaluates KPI query groups of one project against a record source.
pub struct KpiEvaluator<'a> {
    source: &'a dyn RecordSource,
    settings: &'a InsightsSettings,
    project_id: i64,
    custom_metrics: &'a [CustomMetric],
    /// Periods whose profile records decide the custom-metric breakdowns.
    periods: Option<PeriodPair>,
}

impl<'a> KpiEvaluator<'a> {
    pub fn new(
        source: &'a dyn RecordSource,
        settings: &'a InsightsSettings,
        project_id: i64,
    ) -> Self {
        Self {
            source,
            settings,
            project_id,
            custom_metrics: &[],
            periods: None,
        }
    }

    /// Definitions looked up by the `profile` category.
    pub fn with_custom_metrics(mut self, custom_metrics: &'a [CustomMetric]) -> Self {
        self.custom_metrics = custom_metrics;
        self
    }

    /// Both compared periods. Custom-metric breakdowns are narrowed over the
    /// pair so each period is split by the same properties; without it only
    /// the evaluated period is considered.
    pub fn with_periods(mut self, periods: PeriodPair) -> Self {
        self.periods = Some(periods);
        self
    }

    /// Evaluates every aggregate query of `group` for `period`.
    ///
    /// Each metric yields exactly one entry, so snapshots of the same group
    /// always line up; a failed metric yields an empty entry plus a status
    /// record.
    pub fn evaluate_group(&self, group: &KpiQueryGroup, period: Period) -> KpiSnapshot {
        let mut snapshot = KpiSnapshot {
            period: Some(period),
            fingerprint: group.fingerprint(),
            ..Default::default()
        };
        let mut n = 0;
        for query in group.aggregate_queries() {
            let filters: Vec<KpiFilter> = group
                .global_filters
                .iter()
                .chain(&query.filters)
                .cloned()
                .collect();
            let props = self.properties_for(query);
            let categ = Spectrum::of(&query.display_category);
            let _span = tracing::info_span!(
                "kpi_query",
                query_id = group.id,
                category = %query.display_category,
                period = %period.date_key()
            )
            .entered();

            for (metric, result) in query
                .metrics
                .iter()
                .zip(self.evaluate_query(query, period, &filters, &props))
            {
                let mut wpi = WithinPeriodInsightsKpi {
                    categ,
                    category: query.display_category.clone(),
                    name: metric.clone(),
                    ..Default::default()
                };
                match result {
                    Ok((info, scale, stats)) => {
                        wpi.metric = info;
                        wpi.scale = scale;
                        snapshot.scan.add(stats);
                    }
                    Err(e) => {
                        tracing::warn!(metric = %metric, error = %e, "kpi metric failed");
                        snapshot
                            .status
                            .insert(format!("error-kpi-{}-{}", group.id, n), e.to_string());
                    }
                }
                snapshot.metrics.push(wpi);
                n += 1;
            }
        }
        tracing::info!(
            query_id = group.id,
            metrics = snapshot.metrics.len(),
            failed = snapshot.status.len(),
            "kpi group evaluated"
        );
        snapshot
    }

    fn properties_for(&self, query: &KpiQuery) -> Vec<String> {
        if !query.properties.is_empty() {
            return query.properties.clone();
        }
        let category = query.display_category.as_str();
        let defaults: &[&str] = if let Some(category) = EventCategory::from_display(category) {
            category.default_properties()
        } else if let Some(channel) = Channel::from_display_category(category) {
            channel.spec().default_properties()
        } else if category == ALL_CHANNELS_CATEGORY {
            &["campaign#name"]
        } else {
            &[]
        };
        defaults.iter().map(|p| p.to_string()).collect()
    }

    /// Keeps the `props` that survive discovery in either period.
    fn narrow_custom_properties(
        &self,
        metric: &CustomMetric,
        period: Period,
        props: &[String],
    ) -> Result<Vec<String>> {
        if props.is_empty() {
            return Ok(Vec::new());
        }
        let periods = match self.periods {
            Some(pair) => vec![pair.second, pair.first],
            None => vec![period],
        };
        let mut kept = BTreeSet::new();
        for p in periods {
            let reader = self.source.profiles(self.project_id, p)?;
            kept.extend(discover_properties(reader, metric, p, self.settings.top_k)?);
        }
        let narrowed: Vec<String> = props
            .iter()
            .filter(|prop| {
                let name = prop.split_once('#').map(|(_, name)| name).unwrap_or(prop.as_str());
                kept.contains(name)
            })
            .cloned()
            .collect();
        tracing::debug!(
            metric = %metric.name,
            requested = props.len(),
            kept = narrowed.len(),
            "custom metric breakdowns narrowed"
        );
        Ok(narrowed)
    }

    /// One result per metric of `query`, in order.
    fn evaluate_query(
        &self,
        query: &KpiQuery,
        period: Period,
        filters: &[KpiFilter],
        props: &[String],
    ) -> Vec<Evaluated> {
        let category = query.display_category.as_str();
        if let Some(event_category) = EventCategory::from_display(category) {
            return self.evaluate_events(event_category, query, period, filters, props);
        }
        query
            .metrics
            .iter()
            .map(|metric| {
                if let Some(channel) = Channel::from_display_category(category) {
                    registry::validate_metric(category, metric)?;
                    let reader = self
                        .source
                        .channel_documents(self.project_id, period, channel.as_str())?;
                    evaluate_channel_metric(reader, channel, metric, filters, props)
                } else if category == ALL_CHANNELS_CATEGORY {
                    registry::validate_metric(category, metric)?;
                    evaluate_all_channels(
                        |channel| {
                            self.source
                                .channel_documents(self.project_id, period, channel.as_str())
                        },
                        metric,
                        filters,
                        props,
                    )
                } else if category == PROFILE_CATEGORY {
                    let definition = self
                        .custom_metrics
                        .iter()
                        .find(|m| &m.name == metric)
                        .ok_or_else(|| Error::UnknownMetric {
                            category: category.to_string(),
                            metric: metric.clone(),
                        })?;
                    let props = self.narrow_custom_properties(definition, period, props)?;
                    let reader = self.source.profiles(self.project_id, period)?;
                    evaluate_custom_metric(reader, definition, period, filters, &props)
                } else {
                    Err(Error::UnknownCategory(category.to_string()))
                }
            })
            .collect()
    }

    /// Evaluates all known metrics of an event category in one scan.
    fn evaluate_events(
        &self,
        category: EventCategory,
        query: &KpiQuery,
        period: Period,
        filters: &[KpiFilter],
        props: &[String],
    ) -> Vec<Evaluated> {
        let recipes: Vec<Option<_>> = query
            .metrics
            .iter()
            .map(|m| find_recipe(category, m))
            .collect();
        let known: Vec<_> = recipes.iter().flatten().copied().collect();
        let ctx = EventContext {
            kpi: &self.settings.kpi,
            session_event: &self.settings.session_event,
            page_url: &query.page_url,
        };

        let scanned = if known.is_empty() {
            Ok((Vec::new(), ScanStats::default()))
        } else {
            self.source
                .events(self.project_id, period)
                .and_then(|reader| evaluate_event_metrics(reader, &known, &ctx, filters, props))
        };

        match scanned {
            Ok((results, stats)) => {
                let mut results = results.into_iter();
                let mut stats = Some(stats);
                recipes
                    .iter()
                    .zip(&query.metrics)
                    .map(|(recipe, metric)| match recipe {
                        Some(_) => {
                            let (info, scale) = results.next().unwrap_or_default();
                            // The scan is reported once, on the first metric.
                            Ok((info, scale, stats.take().unwrap_or_default()))
                        }
                        None => Err(Error::UnknownMetric {
                            category: category.as_str().to_string(),
                            metric: metric.clone(),
                        }),
                    })
                    .collect()
            }
            Err(e) => {
                let message = e.to_string();
                query
                    .metrics
                    .iter()
                    .map(|_| Err(Error::Query(message.clone())))
                    .collect()
            }
        }
    }
}
