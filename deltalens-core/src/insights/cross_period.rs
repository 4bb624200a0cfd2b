//! Comparison of two within-period snapshots of the same query.

use super::distribution::{FeatureTable, RatioMetrics, SectionMetrics, USERS};
use super::stats::{finite_or_zero, js_divergence, smart_divide, DiffMetric};
use super::within_period::WithinPeriodInsights;
use crate::error::{Error, Result};
use crate::types::PeriodPair;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Global and per-feature diffs of one section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffSection {
    pub global: BTreeMap<String, DiffMetric>,
    pub feat: FeatureTable<DiffMetric>,
}

/// Per-feature JS divergence of the Base and Target prevalences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsdSection {
    pub base: FeatureTable<f64>,
    pub target: FeatureTable<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossPeriodInsights {
    pub periods: Option<PeriodPair>,
    pub base: DiffSection,
    pub target: DiffSection,
    pub base_target: DiffSection,
    #[serde(default)]
    pub conv: DiffSection,
    pub delrat: FeatureTable<f64>,
    pub jsd: JsdSection,
}

/// Diffs `#users` and every period-1 feature value against period 2.
pub fn diff_section(first: &SectionMetrics, second: &SectionMetrics) -> DiffSection {
    let mut diff = DiffSection::default();
    diff.global.insert(
        USERS.to_string(),
        DiffMetric::compute(first.users(), second.users()),
    );
    for (key, value, stats) in first.feat.entries() {
        diff.feat.insert(
            key,
            value,
            DiffMetric::compute(stats.users, second.feature_users(key, value)),
        );
    }
    diff
}

/// Same iteration rule as [`diff_section`], over conversion ratios.
pub fn diff_conversion(first: &RatioMetrics, second: &RatioMetrics) -> DiffSection {
    let ratio = |m: &RatioMetrics| m.global.get("ratio").copied().unwrap_or_default();
    let mut diff = DiffSection::default();
    diff.global.insert(
        "ratio".to_string(),
        DiffMetric::compute(ratio(first), ratio(second)),
    );
    for (key, value, r1) in first.feat.entries() {
        let r2 = second.feat.get(key, value).copied().unwrap_or_default();
        diff.feat.insert(key, value, DiffMetric::compute(*r1, r2));
    }
    diff
}

/// Share of the conversion shift attributable to each period-1 Base feature value.
///
/// Each slice's period-1 conversion rate predicts its period-2 conversions; the
/// same is done for the complement population. The score is the slice's
/// deviation from prediction relative to both deviations together.
pub fn delta_ratios(wpi1: &WithinPeriodInsights, wpi2: &WithinPeriodInsights) -> FeatureTable<f64> {
    let u1 = wpi1.base.users();
    let u2 = wpi2.base.users();
    let m1 = wpi1.base_target.users();
    let m2 = wpi2.base_target.users();

    let mut delrat = FeatureTable::new();
    for (key, value, stats) in wpi1.base.feat.entries() {
        let f1 = stats.users;
        let f2 = wpi2.base.feature_users(key, value);
        let fm1 = wpi1.base_target.feature_users(key, value);
        let fm2 = wpi2.base_target.feature_users(key, value);

        let (notf1, notfm1) = (u1 - f1, m1 - fm1);
        let (notf2, notfm2) = (u2 - f2, m2 - fm2);

        // Multiply before dividing so unchanged inputs predict exactly.
        let fm2_pred = smart_divide(f2 * fm1, f1);
        let notfm2_pred = smart_divide(notf2 * notfm1, notf1);
        let d_fm = (fm2_pred - fm2).abs();
        let d_notfm = (notfm2_pred - notfm2).abs();

        delrat.insert(key, value, finite_or_zero(smart_divide(d_fm, d_fm + d_notfm)));
    }
    delrat
}

fn jsd_table(first: &SectionMetrics, second: &SectionMetrics) -> FeatureTable<f64> {
    let mut table = FeatureTable::new();
    for (key, value, stats) in first.feat.entries() {
        table.insert(
            key,
            value,
            js_divergence(stats.prev, second.feature_prev(key, value)),
        );
    }
    table
}

/// Compares two snapshots; both must come from the same query shape.
pub fn compute_cross_period_insights(
    wpi1: &WithinPeriodInsights,
    wpi2: &WithinPeriodInsights,
) -> Result<CrossPeriodInsights> {
    if wpi1.fingerprint != wpi2.fingerprint {
        return Err(Error::ShapeMismatch(format!(
            "snapshot fingerprints differ: {} vs {}",
            wpi1.fingerprint, wpi2.fingerprint
        )));
    }

    let periods = match (wpi1.period, wpi2.period) {
        (Some(first), Some(second)) => Some(PeriodPair { first, second }),
        _ => None,
    };

    let cpi = CrossPeriodInsights {
        periods,
        base: diff_section(&wpi1.base, &wpi2.base),
        target: diff_section(&wpi1.target, &wpi2.target),
        base_target: diff_section(&wpi1.base_target, &wpi2.base_target),
        conv: diff_conversion(&wpi1.conv, &wpi2.conv),
        delrat: delta_ratios(wpi1, wpi2),
        jsd: JsdSection {
            base: jsd_table(&wpi1.base, &wpi2.base),
            target: jsd_table(&wpi1.target, &wpi2.target),
        },
    };

    tracing::debug!(
        features = cpi.delrat.len(),
        base_change = cpi.base.global.get(USERS).map(|d| d.perc).unwrap_or_default(),
        "cross-period insights computed"
    );
    Ok(cpi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insights::distribution::ValueStats;
    use crate::types::Period;

    fn section(total: f64, entries: &[(&str, &str, f64)]) -> SectionMetrics {
        let mut s = SectionMetrics::default();
        s.global.insert(USERS.to_string(), total);
        for (k, v, c) in entries {
            s.feat.insert(
                k,
                v,
                ValueStats {
                    users: *c,
                    prev: smart_divide(*c, total),
                },
            );
        }
        s
    }

    fn snapshot(base: SectionMetrics, bt: SectionMetrics, from: i64) -> WithinPeriodInsights {
        WithinPeriodInsights {
            period: Some(Period::new(from, from + 99)),
            fingerprint: "abc".into(),
            target: base.clone(),
            base,
            base_target: bt,
            ..Default::default()
        }
    }

    #[test]
    fn test_identical_periods_have_zero_delta_ratio() {
        let base = section(30.0, &[("s#up#c", "IN", 7.0), ("s#up#c", "US", 23.0)]);
        let bt = section(11.0, &[("s#up#c", "IN", 3.0), ("s#up#c", "US", 8.0)]);
        let wpi1 = snapshot(base.clone(), bt.clone(), 0);
        let wpi2 = snapshot(base, bt, 100);

        let cpi = compute_cross_period_insights(&wpi1, &wpi2).unwrap();
        for (_, _, score) in cpi.delrat.entries() {
            assert_eq!(*score, 0.0);
        }
        for (_, _, jsd) in cpi.jsd.base.entries() {
            assert_eq!(*jsd, 0.0);
        }
        assert_eq!(cpi.periods.unwrap().second.from, 100);
    }

    #[test]
    fn test_shift_in_one_slice_is_attributed_to_it() {
        // IN converts 2/10 then 8/10; US holds 5/10.
        let wpi1 = snapshot(
            section(20.0, &[("s#up#c", "IN", 10.0), ("s#up#c", "US", 10.0)]),
            section(7.0, &[("s#up#c", "IN", 2.0), ("s#up#c", "US", 5.0)]),
            0,
        );
        let wpi2 = snapshot(
            section(20.0, &[("s#up#c", "IN", 10.0), ("s#up#c", "US", 10.0)]),
            section(13.0, &[("s#up#c", "IN", 8.0), ("s#up#c", "US", 5.0)]),
            100,
        );
        let cpi = compute_cross_period_insights(&wpi1, &wpi2).unwrap();
        let d_in = *cpi.delrat.get("s#up#c", "IN").unwrap();
        let d_us = *cpi.delrat.get("s#up#c", "US").unwrap();
        assert!((d_in - 1.0).abs() < 1e-12);
        assert_eq!(d_us, 0.0);
    }

    #[test]
    fn test_feature_only_in_second_period_is_omitted() {
        let wpi1 = snapshot(section(10.0, &[("s#up#c", "IN", 4.0)]), section(0.0, &[]), 0);
        let wpi2 = snapshot(
            section(10.0, &[("s#up#c", "IN", 4.0), ("s#up#c", "US", 6.0)]),
            section(0.0, &[]),
            100,
        );
        let cpi = compute_cross_period_insights(&wpi1, &wpi2).unwrap();
        assert!(cpi.base.feat.get("s#up#c", "IN").is_some());
        assert!(cpi.base.feat.get("s#up#c", "US").is_none());
    }

    #[test]
    fn test_global_diff() {
        let wpi1 = snapshot(section(10.0, &[]), section(0.0, &[]), 0);
        let wpi2 = snapshot(section(15.0, &[]), section(0.0, &[]), 100);
        let cpi = compute_cross_period_insights(&wpi1, &wpi2).unwrap();
        let users = cpi.base.global[USERS];
        assert_eq!(users.perc, 50.0);
        assert_eq!(users.factor, 1.5);
    }

    #[test]
    fn test_fingerprint_mismatch_is_rejected() {
        let wpi1 = snapshot(section(1.0, &[]), section(0.0, &[]), 0);
        let mut wpi2 = wpi1.clone();
        wpi2.fingerprint = "other".into();
        assert!(matches!(
            compute_cross_period_insights(&wpi1, &wpi2),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_conversion_diff() {
        let mut c1 = RatioMetrics::default();
        c1.global.insert("ratio".into(), 0.2);
        c1.feat.insert("s#up#c", "IN", 0.5);
        let mut c2 = RatioMetrics::default();
        c2.global.insert("ratio".into(), 0.4);
        let diff = diff_conversion(&c1, &c2);
        assert_eq!(diff.global["ratio"].factor, 2.0);
        assert_eq!(diff.feat.get("s#up#c", "IN").unwrap().second, 0.0);
    }
}
