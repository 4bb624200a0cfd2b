//! Top-N weekly insights rendered from a cross-period snapshot.

use super::cross_period::{CrossPeriodInsights, DiffSection};
use super::distribution::{FeatureTable, USERS};
use super::stats::DiffMetric;
use crate::types::PropertyEntity;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Week-over-week movement of one number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Headline {
    pub w1: f64,
    pub w2: f64,
    #[serde(rename = "isIncrease")]
    pub is_increase: bool,
    pub percentage: f64,
}

impl From<&DiffMetric> for Headline {
    fn from(diff: &DiffMetric) -> Self {
        Self {
            w1: diff.first,
            w2: diff.second,
            is_increase: diff.perc > 0.0,
            percentage: diff.perc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Conversion,
    Distribution,
}

/// One ranked feature value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightRecord {
    /// Property name without side or entity tags.
    pub key: String,
    pub value: String,
    pub entity: PropertyEntity,
    /// `s` or `t`.
    pub side: String,
    pub actual_values: Headline,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_in_conversion: Option<Headline>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_in_prevalence: Option<Headline>,
    /// Delta-ratio for conversion records, JS divergence for distribution ones.
    pub score: f64,
    #[serde(rename = "type")]
    pub kind: InsightKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeeklyInsights {
    pub base: Headline,
    pub goal: Headline,
    pub conv: Headline,
    pub actual_metrics: Vec<InsightRecord>,
}

impl WeeklyInsights {
    pub fn records_of(&self, kind: InsightKind) -> impl Iterator<Item = &InsightRecord> {
        self.actual_metrics.iter().filter(move |r| r.kind == kind)
    }
}

/// Splits `s#up#$country` into `("s", User, "$country")`.
pub fn split_feature_key(key: &str) -> Option<(&str, PropertyEntity, &str)> {
    let mut parts = key.splitn(3, '#');
    let side = parts.next()?;
    let entity = parts.next()?.parse().ok()?;
    let name = parts.next()?;
    Some((side, entity, name))
}

fn headline(section: &DiffSection, global_key: &str) -> Headline {
    section
        .global
        .get(global_key)
        .map(Headline::from)
        .unwrap_or_default()
}

/// Ranks `section`'s features by `score`, keeping the first `limit` distinct values.
fn ranked_records(
    section: &DiffSection,
    scores: &FeatureTable<f64>,
    kind: InsightKind,
    limit: usize,
    annotate: impl Fn(&str, &str, &mut InsightRecord),
) -> Vec<InsightRecord> {
    let mut seen_values: HashSet<&str> = HashSet::new();
    let mut records = Vec::new();
    for (key, value, diff) in section.feat.entries() {
        if value.is_empty() || !seen_values.insert(value.as_str()) {
            continue;
        }
        let Some((side, entity, name)) = split_feature_key(key) else {
            tracing::debug!(key = %key, "skipping untagged feature key");
            continue;
        };
        let mut record = InsightRecord {
            key: name.to_string(),
            value: value.clone(),
            entity,
            side: side.to_string(),
            actual_values: Headline::from(diff),
            change_in_conversion: None,
            change_in_prevalence: None,
            score: scores.get(key, value).copied().unwrap_or_default(),
            kind,
        };
        annotate(key, value, &mut record);
        records.push(record);
    }
    records.sort_by(|a, b| b.score.total_cmp(&a.score));
    records.truncate(limit);
    records
}

/// Builds the weekly report: headline figures plus the top `records` conversion
/// and distribution insights.
///
/// The goal figure is the Target count for event queries and the
/// BaseAndTarget count for funnels.
pub fn weekly_insights(cpi: &CrossPeriodInsights, records: usize, funnel: bool) -> WeeklyInsights {
    let goal_section = if funnel { &cpi.base_target } else { &cpi.target };

    let conversion = ranked_records(
        &cpi.base_target,
        &cpi.delrat,
        InsightKind::Conversion,
        records,
        |key, value, record| {
            record.change_in_conversion = Some(
                cpi.conv
                    .feat
                    .get(key, value)
                    .map(Headline::from)
                    .unwrap_or_default(),
            );
            record.change_in_prevalence = Some(
                cpi.base
                    .feat
                    .get(key, value)
                    .map(Headline::from)
                    .unwrap_or_default(),
            );
        },
    );
    let distribution = ranked_records(
        &cpi.target,
        &cpi.jsd.target,
        InsightKind::Distribution,
        records,
        |_, _, _| {},
    );

    WeeklyInsights {
        base: headline(&cpi.base, USERS),
        goal: headline(goal_section, USERS),
        conv: headline(&cpi.conv, "ratio"),
        actual_metrics: conversion.into_iter().chain(distribution).collect(),
    }
}
