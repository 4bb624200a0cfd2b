//! Custom metrics over profile records.

use super::accumulator::{present_features, Amount, FeatureAccumulator, Fraction};
use super::filter::passes_filters;
use super::MetricInfo;
use crate::error::{Error, Result};
use crate::insights::selection::{prefilter_features, select_top_k};
use crate::insights::{SectionMetrics, USERS};
use crate::matcher::TARGET_PREFIX;
use crate::query::KpiFilter;
use crate::source::{scan_jsonl, try_scan_jsonl, ScanStats};
use crate::types::{format_value, value_as_f64, Period, ProfileRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::io::BufRead;
use std::str::FromStr;

/// Timestamps above this are read as milliseconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Count,
    Unique,
    Sum,
    Average,
}

impl FromStr for AggregateFunction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "count" => Ok(AggregateFunction::Count),
            "unique" => Ok(AggregateFunction::Unique),
            "sum" => Ok(AggregateFunction::Sum),
            "average" => Ok(AggregateFunction::Average),
            other => Err(Error::UnknownOperation(other.to_string())),
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Unique => "unique",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Average => "average",
        })
    }
}

/// Project-defined metric over profile records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomMetric {
    pub name: String,
    #[serde(rename = "agFn")]
    pub aggregate_function: AggregateFunction,
    /// Property summed or averaged; unused by count and unique.
    #[serde(rename = "agPr", default)]
    pub aggregate_property: String,
    /// Property holding the timestamp that places a record in a period.
    #[serde(rename = "daFi")]
    pub date_field: String,
    #[serde(rename = "fil", default)]
    pub filters: Vec<KpiFilter>,
}

/// Seconds, whether `ts` was written in seconds or milliseconds.
pub fn normalize_timestamp(ts: i64) -> i64 {
    if ts > MILLIS_THRESHOLD {
        ts / 1000
    } else {
        ts
    }
}

/// Whether the record's date field places it inside `period`.
fn dated_within(record: &ProfileRecord, metric: &CustomMetric, period: Period) -> bool {
    record
        .properties
        .get(&metric.date_field)
        .and_then(value_as_f64)
        .map(|ts| period.contains(normalize_timestamp(ts as i64)))
        .unwrap_or(false)
}

/// Profile properties worth breaking `metric` down by in `period`.
///
/// Every property of the in-period records is counted, then prefiltered and
/// capped to the top `k` values like pass 1 of a criteria query. A property
/// survives when any of its values does.
pub fn discover_properties<R: BufRead>(
    reader: R,
    metric: &CustomMetric,
    period: Period,
    k: i64,
) -> Result<BTreeSet<String>> {
    let mut target = SectionMetrics::default();
    let mut records = 0.0;
    scan_jsonl(reader, |record: ProfileRecord| {
        if !dated_within(&record, metric, period) {
            return;
        }
        records += 1.0;
        for (name, value) in &record.properties {
            let key = format!("{}{}", TARGET_PREFIX, name);
            target.feat.upsert(&key, &format_value(value)).users += 1.0;
        }
    })?;
    target.global.insert(USERS.to_string(), records);

    prefilter_features(&mut target.feat);
    select_top_k(
        &mut SectionMetrics::default(),
        &mut target,
        &mut SectionMetrics::default(),
        k,
    );
    Ok(target
        .feat
        .keys()
        .filter_map(|key| key.strip_prefix(TARGET_PREFIX))
        .map(str::to_string)
        .collect())
}

/// Evaluates one custom metric over a period's profile records.
///
/// `filters` are the query's filters; the metric's own filters are appended.
pub fn evaluate_custom_metric<R: BufRead>(
    reader: R,
    metric: &CustomMetric,
    period: Period,
    filters: &[KpiFilter],
    props: &[String],
) -> Result<(MetricInfo, MetricInfo, ScanStats)> {
    let chain: Vec<KpiFilter> = filters
        .iter()
        .chain(metric.filters.iter())
        .cloned()
        .collect();
    let mut acc = FeatureAccumulator::new();

    let stats = try_scan_jsonl(reader, |record: ProfileRecord| {
        if !dated_within(&record, metric, period) {
            tracing::trace!(id = %record.id, "profile outside period");
            return Ok(());
        }
        if !passes_filters(&chain, |f| record.properties.get(&f.property_name))? {
            return Ok(());
        }

        let features = present_features(props, |_, name| record.properties.get(name));
        acc.count_scale(&features);

        let aggregate = record
            .properties
            .get(&metric.aggregate_property)
            .map(|v| value_as_f64(v).unwrap_or_default());
        match metric.aggregate_function {
            AggregateFunction::Count | AggregateFunction::Unique => {
                acc.add(&record.id, &features, Amount::Value(1.0), Amount::Value(0.0), true);
            }
            AggregateFunction::Sum => {
                if let Some(value) = aggregate {
                    acc.add(&record.id, &features, Amount::Value(value), Amount::Value(0.0), true);
                }
            }
            AggregateFunction::Average => {
                if let Some(value) = aggregate {
                    acc.add(&record.id, &features, Amount::Value(value), Amount::Value(1.0), true);
                }
            }
        }
        Ok(())
    })?;

    let (metric_info, scale) = match metric.aggregate_function {
        AggregateFunction::Average => acc.finish(|f: Fraction| f.ratio()),
        _ => acc.finish(|f: Fraction| f.numerator),
    };
    Ok((metric_info, scale, stats))
}
