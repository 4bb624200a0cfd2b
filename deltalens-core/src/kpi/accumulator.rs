//! Per-slot accumulation shared by the event, channel and profile evaluators.
//!
//! A slot is either the global value or one `(feature key, feature value)`
//! pair. Every slot holds a [`Fraction`]; sum metrics only read the numerator.

use super::MetricInfo;
use crate::insights::FeatureTable;
use crate::types::format_value;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Running numerator and denominator of one slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Fraction {
    pub numerator: f64,
    pub denominator: f64,
}

impl Fraction {
    pub fn new(numerator: f64, denominator: f64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// `numerator / denominator`, or 0 when either side is 0.
    pub fn ratio(&self) -> f64 {
        if self.numerator == 0.0 || self.denominator == 0.0 {
            0.0
        } else {
            self.numerator / self.denominator
        }
    }
}

/// What a record adds to one side of a slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Amount {
    Value(f64),
    /// 1 the first time the record's user reaches the slot, 0 afterwards.
    FirstSeen,
}

/// `(feature key, formatted value)` pairs a record carries.
pub type FeatureValues = Vec<(String, String)>;

/// Collects the values a record has for each of `props` (`tag#name`).
///
/// `lookup` resolves a tag and a property name to the record's value.
pub fn present_features<'a>(
    props: &[String],
    lookup: impl Fn(&str, &str) -> Option<&'a Value>,
) -> FeatureValues {
    props
        .iter()
        .filter_map(|prop| {
            let (tag, name) = prop.split_once('#')?;
            let value = lookup(tag, name)?;
            Some((prop.clone(), format_value(value)))
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct FeatureAccumulator {
    global: Fraction,
    feat: FeatureTable<Fraction>,
    seen_global: HashSet<String>,
    seen_feat: HashSet<(String, String, String)>,
    scale: MetricInfo,
}

impl FeatureAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one qualifying record in the scale table.
    pub fn count_scale(&mut self, features: &[(String, String)]) {
        self.count_scale_where(features, true);
    }

    /// Like [`count_scale`](Self::count_scale), leaving the global count
    /// untouched unless `include_global`.
    pub fn count_scale_where(&mut self, features: &[(String, String)], include_global: bool) {
        if include_global {
            self.scale.global += 1.0;
        }
        for (key, value) in features {
            *self.scale.feat.upsert(key, value) += 1.0;
        }
    }

    fn resolve_global(&mut self, amount: Amount, user_id: &str) -> f64 {
        match amount {
            Amount::Value(v) => v,
            Amount::FirstSeen => {
                if self.seen_global.insert(user_id.to_string()) {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    fn resolve_feature(&mut self, amount: Amount, user_id: &str, key: &str, value: &str) -> f64 {
        match amount {
            Amount::Value(v) => v,
            Amount::FirstSeen => {
                let slot = (key.to_string(), value.to_string(), user_id.to_string());
                if self.seen_feat.insert(slot) {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Adds one record to the global slot (when `include_global`) and to the
    /// slot of every feature value it carries.
    pub fn add(
        &mut self,
        user_id: &str,
        features: &[(String, String)],
        numerator: Amount,
        denominator: Amount,
        include_global: bool,
    ) {
        if include_global {
            let n = self.resolve_global(numerator, user_id);
            let d = self.resolve_global(denominator, user_id);
            self.global.numerator += n;
            self.global.denominator += d;
        }
        for (key, value) in features {
            let n = self.resolve_feature(numerator, user_id, key, value);
            let d = self.resolve_feature(denominator, user_id, key, value);
            let slot = self.feat.upsert(key, value);
            slot.numerator += n;
            slot.denominator += d;
        }
    }

    /// Evaluates every slot; feature values that evaluate to 0 are dropped.
    pub fn finish(self, evaluate: impl Fn(Fraction) -> f64) -> (MetricInfo, MetricInfo) {
        let mut metric = MetricInfo {
            global: evaluate(self.global),
            feat: FeatureTable::new(),
        };
        for (key, value, slot) in self.feat.entries() {
            let v = evaluate(*slot);
            if v != 0.0 && v.is_finite() {
                metric.feat.insert(key, value, v);
            }
        }
        (metric, self.scale)
    }
}
