//! Within-period aggregation of matched users into categorical distributions.

use super::distribution::{FeatureTable, RatioMetrics, SectionMetrics, ValueStats, USERS};
use super::selection::{prefilter_features, select_top_k, FeatureWhitelist};
use super::stats::smart_divide;
use crate::config::InsightsSettings;
use crate::error::Result;
use crate::matcher::{match_user, PerEventProperties, Sessionizer, BASE_PREFIX, TARGET_PREFIX};
use crate::query::QueryShape;
use crate::source::{scan_jsonl, ScanStats};
use crate::types::{format_value, Event, Period, Properties, PropertyEntity};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::time::Instant;

/// Which of the two scans is running.
#[derive(Debug, Clone, Copy)]
pub enum Pass<'a> {
    /// Pass 1: every feature is counted, then prefiltered and capped to top-K.
    Discover,
    /// Pass 2: only whitelisted `(key, value)` pairs are counted.
    Restricted(&'a FeatureWhitelist),
}

impl Pass<'_> {
    pub fn number(&self) -> u8 {
        match self {
            Pass::Discover => 1,
            Pass::Restricted(_) => 2,
        }
    }
}

/// Snapshot of one query over one period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WithinPeriodInsights {
    pub period: Option<Period>,
    /// Fingerprint of the query shape that produced the snapshot.
    #[serde(default)]
    pub fingerprint: String,
    pub base: SectionMetrics,
    pub target: SectionMetrics,
    pub base_target: SectionMetrics,
    #[serde(default)]
    pub conv: RatioMetrics,
    #[serde(default)]
    pub scan: ScanStats,
}

impl WithinPeriodInsights {
    pub fn sections(&self) -> [&SectionMetrics; 3] {
        [&self.base, &self.target, &self.base_target]
    }
}

/// Streaming accumulator for one section.
#[derive(Debug, Default)]
struct SectionAccumulator {
    metrics: SectionMetrics,
}

impl SectionAccumulator {
    fn add(&mut self, summary: &PerEventProperties, pass: Pass<'_>) {
        *self.metrics.global.entry(USERS.to_string()).or_default() += 1.0;
        add_properties(
            &mut self.metrics.feat,
            &summary.user_properties,
            PropertyEntity::User,
            pass,
        );
        add_properties(
            &mut self.metrics.feat,
            &summary.event_properties,
            PropertyEntity::Event,
            pass,
        );
    }

    fn finish(mut self) -> SectionMetrics {
        let total = self.metrics.users();
        self.metrics.feat.retain(|_, _, stats| {
            stats.prev = smart_divide(stats.users, total);
            true
        });
        self.metrics
    }
}

/// `s#name` from the user map becomes `s#up#name`; event keys get `ep`.
pub fn feature_key(prefixed: &str, entity: PropertyEntity) -> Option<String> {
    let (side, name) = prefixed.split_once('#')?;
    Some(format!("{}#{}#{}", side, entity.tag(), name))
}

fn add_properties(
    features: &mut FeatureTable<ValueStats>,
    properties: &Properties,
    entity: PropertyEntity,
    pass: Pass<'_>,
) {
    for (key, value) in properties {
        let Some(key) = feature_key(key, entity) else {
            continue;
        };
        let value = format_value(value);
        if let Pass::Restricted(whitelist) = pass {
            if !whitelist.contains(&key, &value) {
                continue;
            }
        }
        features.upsert(&key, &value).users += 1.0;
    }
}

/// Per-user summaries routed to their sections.
#[derive(Debug, Default)]
struct SummaryRouter {
    base: SectionAccumulator,
    target: SectionAccumulator,
    base_target: SectionAccumulator,
}

impl SummaryRouter {
    fn route(&mut self, summaries: Vec<PerEventProperties>, pass: Pass<'_>) {
        for summary in summaries {
            if summary.base_flag {
                self.base.add(&summary.only_prefixed(BASE_PREFIX), pass);
            }
            if summary.target_flag {
                self.target.add(&summary.only_prefixed(TARGET_PREFIX), pass);
            }
            if summary.base_and_target_flag {
                self.base_target.add(&summary, pass);
            }
        }
    }
}

/// Global and per-feature conversion ratios from Base and BaseAndTarget counts.
pub fn compute_conversion(base: &SectionMetrics, base_target: &SectionMetrics) -> RatioMetrics {
    let mut conv = RatioMetrics::default();
    conv.global.insert(
        "ratio".to_string(),
        smart_divide(base_target.users(), base.users()),
    );
    for (key, values) in &base.feat {
        let Some(bt_values) = base_target.feat.values_of(key) else {
            continue;
        };
        for (value, stats) in values {
            if let Some(bt_stats) = bt_values.get(value) {
                conv.feat
                    .insert(key, value, smart_divide(bt_stats.users, stats.users));
            }
        }
    }
    conv
}

/// Scans one period's event stream and aggregates the query's matches.
///
/// Events must be grouped by user. Each user is sessionized and matched when
/// the next user starts and once more at end of input.
pub fn compute_within_period_insights<R: BufRead>(
    reader: R,
    period: Period,
    shape: &QueryShape,
    settings: &InsightsSettings,
    pass: Pass<'_>,
) -> Result<WithinPeriodInsights> {
    let started = Instant::now();
    let mut router = SummaryRouter::default();
    let mut current_user: Option<String> = None;
    let mut sessionizer = Sessionizer::new(&settings.session_event);
    let mut users = 0u64;

    let scan = scan_jsonl(reader, |mut event: Event| {
        event.sanitize_screen_size();
        match &current_user {
            Some(user) if *user == event.user_id => {}
            Some(_) => {
                let finished = std::mem::replace(
                    &mut sessionizer,
                    Sessionizer::new(&settings.session_event),
                );
                router.route(
                    match_user(shape, &finished.finish(), &settings.blacklist),
                    pass,
                );
                users += 1;
                current_user = Some(event.user_id.clone());
            }
            None => current_user = Some(event.user_id.clone()),
        }
        sessionizer.push(event);
    })?;

    if current_user.is_some() {
        router.route(
            match_user(shape, &sessionizer.finish(), &settings.blacklist),
            pass,
        );
        users += 1;
    }

    let mut insights = WithinPeriodInsights {
        period: Some(period),
        fingerprint: shape.fingerprint(),
        base: router.base.finish(),
        target: router.target.finish(),
        base_target: router.base_target.finish(),
        conv: RatioMetrics::default(),
        scan,
    };

    match pass {
        Pass::Discover => {
            prefilter_features(&mut insights.base.feat);
            prefilter_features(&mut insights.target.feat);
            prefilter_features(&mut insights.base_target.feat);
            select_top_k(
                &mut insights.base,
                &mut insights.target,
                &mut insights.base_target,
                settings.top_k,
            );
        }
        Pass::Restricted(_) => {
            insights.conv = compute_conversion(&insights.base, &insights.base_target);
        }
    }

    tracing::info!(
        query_id = shape.id(),
        period = %period.date_key(),
        pass = pass.number(),
        users,
        base_users = insights.base.users(),
        target_users = insights.target.users(),
        base_target_users = insights.base_target.users(),
        lines = scan.lines,
        skipped = scan.skipped,
        duration_ms = started.elapsed().as_millis() as u64,
        "within-period insights computed"
    );

    Ok(insights)
}
