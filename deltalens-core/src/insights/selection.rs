//! Feature selection: prefilter, per-period top-K capping and the cross-period whitelist.

use super::distribution::{FeatureTable, SectionMetrics, ValueStats};
use super::stats::smart_divide;
use crate::matcher::{BASE_PREFIX, TARGET_PREFIX};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Synthetic value collecting every pruned value of a key.
pub const OTHERS_VALUE: &str = "$others";

// ============================================
// Prefilter
// ============================================

/// Rank-frequency shape of one feature key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RankFrequency {
    /// Values with a non-zero count.
    pub non_null_unique: usize,
    /// Values seen more than once.
    pub multi_occurrence: usize,
    /// Values seen exactly once.
    pub single_occurrence: usize,
}

impl RankFrequency {
    pub fn of(values: &BTreeMap<String, ValueStats>) -> Self {
        let mut rf = RankFrequency::default();
        for stats in values.values() {
            let count = stats.users as i64;
            if count == 1 {
                rf.single_occurrence += 1;
            } else if count > 1 {
                rf.multi_occurrence += 1;
            }
            if count != 0 {
                rf.non_null_unique += 1;
            }
        }
        rf
    }

    /// A key needs at least two values that each occur more than once.
    pub fn is_discriminative(&self) -> bool {
        self.non_null_unique != 1 && self.multi_occurrence > 1
    }
}

/// Digits with at most one decimal point. The empty string qualifies.
pub fn is_number_like(value: &str) -> bool {
    let mut dots = 0;
    for c in value.chars() {
        match c {
            '0'..='9' => {}
            '.' => {
                dots += 1;
                if dots > 1 {
                    return false;
                }
            }
            _ => return false,
        }
    }
    true
}

/// Every value of the key looks like a number.
pub fn is_numeric_feature(values: &BTreeMap<String, ValueStats>) -> bool {
    values.keys().all(|v| is_number_like(v))
}

/// Drops keys that are numeric or carry too little signal.
pub fn prefilter_features(features: &mut FeatureTable<ValueStats>) {
    let rejected: Vec<String> = features
        .iter()
        .filter(|(_, values)| {
            is_numeric_feature(values) || !RankFrequency::of(values).is_discriminative()
        })
        .map(|(key, _)| key.clone())
        .collect();
    for key in rejected {
        tracing::trace!(key = %key, "prefilter rejected feature");
        features.remove_key(&key);
    }
}

// ============================================
// Top-K
// ============================================

/// K-th largest value, 0 for `k <= 1`, and the minimum when `k` exceeds the list.
pub fn find_kth_max(mut counts: Vec<f64>, k: i64) -> f64 {
    if counts.is_empty() {
        return 0.0;
    }
    let n = counts.len() as i64;
    let mut k_index = k - 1;
    if k_index > n - 1 {
        k_index = n - 1;
    } else if k_index <= 0 {
        return 0.0;
    }
    let k_index = k_index as usize;
    counts.select_nth_unstable_by(k_index, |a, b| b.total_cmp(a));
    counts[k_index]
}

/// Pooled K-th largest counts of `s#` keys and of `t#` keys.
pub fn find_top_k_thresholds(features: &FeatureTable<ValueStats>, k: i64) -> (f64, f64) {
    let pooled = |prefix: &str| -> Vec<f64> {
        features
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .flat_map(|(_, values)| values.values().map(|s| s.users))
            .collect()
    };
    (
        find_kth_max(pooled(BASE_PREFIX), k),
        find_kth_max(pooled(TARGET_PREFIX), k),
    )
}

/// Removes values below the threshold of their side and folds them into `$others`.
pub fn filter_feature_counts(
    features: &mut FeatureTable<ValueStats>,
    total: f64,
    base_threshold: f64,
    target_threshold: f64,
) {
    let keys: Vec<String> = features.keys().cloned().collect();
    for key in keys {
        let threshold = if key.starts_with(BASE_PREFIX) {
            base_threshold
        } else if key.starts_with(TARGET_PREFIX) {
            target_threshold
        } else {
            continue;
        };
        let Some(values) = features.remove_key(&key) else {
            continue;
        };

        let mut others = 0.0;
        let mut pruned = false;
        let mut kept: BTreeMap<String, ValueStats> = BTreeMap::new();
        for (value, stats) in values {
            if stats.users < threshold {
                others += stats.users;
                pruned = true;
            } else {
                kept.insert(value, stats);
            }
        }
        if kept.is_empty() {
            continue;
        }
        for (value, stats) in kept {
            features.insert(&key, &value, stats);
        }
        if pruned {
            let bucket = features.upsert(&key, OTHERS_VALUE);
            bucket.users += others;
            bucket.prev = smart_divide(bucket.users, total);
        }
    }
}

/// Caps every section to values at or above its pooled K-th largest count.
/// `k < 0` disables capping.
pub fn select_top_k(
    base: &mut SectionMetrics,
    target: &mut SectionMetrics,
    base_target: &mut SectionMetrics,
    k: i64,
) {
    if k < 0 {
        return;
    }
    let k_usize = k as usize;

    if k_usize < base.feat.len() {
        let (base_thr, _) = find_top_k_thresholds(&base.feat, k);
        let total = base.users();
        filter_feature_counts(&mut base.feat, total, base_thr, 0.0);
    }
    if k_usize < base_target.feat.len() {
        let (base_thr, target_thr) = find_top_k_thresholds(&base_target.feat, k);
        let total = base_target.users();
        filter_feature_counts(&mut base_target.feat, total, base_thr, target_thr);
    }
    if k_usize < target.feat.len() {
        let (_, target_thr) = find_top_k_thresholds(&target.feat, k);
        let total = target.users();
        filter_feature_counts(&mut target.feat, total, 0.0, target_thr);
    }
}

// ============================================
// Whitelist
// ============================================

/// `(key, value)` pairs that survived pass 1 in either period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureWhitelist {
    inner: BTreeMap<String, BTreeSet<String>>,
}

impl FeatureWhitelist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every `(key, value)` of a section.
    pub fn absorb(&mut self, section: &SectionMetrics) {
        for (key, value, _) in section.feat.entries() {
            self.inner
                .entry(key.clone())
                .or_default()
                .insert(value.clone());
        }
    }

    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.inner
            .get(key)
            .map(|values| values.contains(value))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insights::distribution::USERS;

    fn stats(users: f64) -> ValueStats {
        ValueStats { users, prev: 0.0 }
    }

    fn section(total: f64, entries: &[(&str, &str, f64)]) -> SectionMetrics {
        let mut s = SectionMetrics::default();
        s.global.insert(USERS.to_string(), total);
        for (k, v, c) in entries {
            s.feat.insert(k, v, stats(*c));
        }
        s
    }

    #[test]
    fn test_number_like() {
        assert!(is_number_like("123"));
        assert!(is_number_like("1.5"));
        assert!(is_number_like(".5"));
        assert!(is_number_like(""));
        assert!(!is_number_like("1.2.3"));
        assert!(!is_number_like("Chrome"));
        assert!(!is_number_like("Y"));
    }

    #[test]
    fn test_prefilter_rejects_single_value_and_numeric() {
        let mut s = section(
            10.0,
            &[
                ("s#up#$country", "IN", 5.0),
                ("s#up#$country", "US", 3.0),
                ("s#up#$country", "UK", 1.0),
                ("s#up#$os", "Linux", 10.0),
                ("s#ep#$count", "1", 4.0),
                ("s#ep#$count", "2", 6.0),
                ("s#ep#$rare", "a", 2.0),
                ("s#ep#$rare", "b", 1.0),
            ],
        );
        prefilter_features(&mut s.feat);
        assert!(s.feat.contains_key("s#up#$country"));
        assert!(!s.feat.contains_key("s#up#$os"));
        assert!(!s.feat.contains_key("s#ep#$count"));
        // Only one value occurs more than once.
        assert!(!s.feat.contains_key("s#ep#$rare"));
    }

    #[test]
    fn test_find_kth_max() {
        assert_eq!(find_kth_max(vec![5.0, 1.0, 3.0, 4.0], 2), 4.0);
        assert_eq!(find_kth_max(vec![5.0, 1.0, 3.0], 10), 1.0);
        assert_eq!(find_kth_max(vec![5.0, 1.0, 3.0], 1), 0.0);
        assert_eq!(find_kth_max(vec![], 3), 0.0);
    }

    #[test]
    fn test_top_k_minus_one_is_noop() {
        let mut base = section(10.0, &[("s#a", "x", 1.0), ("s#b", "y", 9.0)]);
        let before = base.clone();
        let mut target = SectionMetrics::default();
        let mut bt = SectionMetrics::default();
        select_top_k(&mut base, &mut target, &mut bt, -1);
        assert_eq!(base, before);
    }

    #[test]
    fn test_top_k_preserves_key_totals() {
        let mut base = section(
            20.0,
            &[
                ("s#up#a", "x", 8.0),
                ("s#up#a", "y", 2.0),
                ("s#up#a", "z", 1.0),
                ("s#up#b", "p", 6.0),
                ("s#up#b", "q", 3.0),
                ("s#up#c", "r", 1.0),
            ],
        );
        let original_a: f64 = [8.0, 2.0, 1.0].iter().sum();
        let mut target = SectionMetrics::default();
        let mut bt = SectionMetrics::default();
        select_top_k(&mut base, &mut target, &mut bt, 2);

        // Pooled counts 8,6,3,2,1,1: the 2nd largest is 6.
        let a = base.feat.values_of("s#up#a").unwrap();
        assert!(a.contains_key("x"));
        assert!(!a.contains_key("y"));
        let kept: f64 = a.values().map(|s| s.users).sum();
        assert_eq!(kept, original_a);
        assert_eq!(a[OTHERS_VALUE].users, 3.0);
        assert_eq!(a[OTHERS_VALUE].prev, 3.0 / 20.0);
        // Every value below threshold: key dropped.
        assert!(!base.feat.contains_key("s#up#c"));
    }

    #[test]
    fn test_whitelist_union() {
        let p1 = section(5.0, &[("s#up#a", "x", 2.0)]);
        let p2 = section(5.0, &[("s#up#a", "y", 2.0), ("t#ep#b", "z", 2.0)]);
        let mut whitelist = FeatureWhitelist::new();
        whitelist.absorb(&p1);
        whitelist.absorb(&p2);
        assert!(whitelist.contains("s#up#a", "x"));
        assert!(whitelist.contains("s#up#a", "y"));
        assert!(whitelist.contains("t#ep#b", "z"));
        assert!(!whitelist.contains("t#ep#b", "x"));
        assert_eq!(whitelist.len(), 3);
    }
}
