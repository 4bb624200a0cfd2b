//! Sparse categorical distribution tables.
//!
//! A [`FeatureTable`] maps feature-key → feature-value → stat. Entries are created
//! on first upsert, and removing the last value of a key removes the key, so a
//! populated key never has an empty value set.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::btree_map::{self, BTreeMap};

/// Global count name shared by every section.
pub const USERS: &str = "#users";

/// Two-level sparse table keyed by feature key then feature value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureTable<T> {
    inner: BTreeMap<String, BTreeMap<String, T>>,
}

impl<T> Default for FeatureTable<T> {
    fn default() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }
}

impl<T> FeatureTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for `(key, value)`, created with `T::default()` when missing.
    pub fn upsert(&mut self, key: &str, value: &str) -> &mut T
    where
        T: Default,
    {
        self.inner
            .entry(key.to_string())
            .or_default()
            .entry(value.to_string())
            .or_default()
    }

    pub fn insert(&mut self, key: &str, value: &str, stat: T) {
        self.inner
            .entry(key.to_string())
            .or_default()
            .insert(value.to_string(), stat);
    }

    pub fn get(&self, key: &str, value: &str) -> Option<&T> {
        self.inner.get(key).and_then(|values| values.get(value))
    }

    pub fn values_of(&self, key: &str) -> Option<&BTreeMap<String, T>> {
        self.inner.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Removes one entry, pruning the key when it becomes empty.
    pub fn remove(&mut self, key: &str, value: &str) -> Option<T> {
        let values = self.inner.get_mut(key)?;
        let removed = values.remove(value);
        if values.is_empty() {
            self.inner.remove(key);
        }
        removed
    }

    pub fn remove_key(&mut self, key: &str) -> Option<BTreeMap<String, T>> {
        self.inner.remove(key)
    }

    /// Keeps entries for which `f` returns true, pruning emptied keys.
    pub fn retain(&mut self, mut f: impl FnMut(&str, &str, &mut T) -> bool) {
        self.inner.retain(|key, values| {
            values.retain(|value, stat| f(key, value, stat));
            !values.is_empty()
        });
    }

    /// Number of feature keys.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.inner.keys()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, BTreeMap<String, T>> {
        self.inner.iter()
    }

    /// Flat `(key, value, stat)` view.
    pub fn entries(&self) -> impl Iterator<Item = (&String, &String, &T)> {
        self.inner
            .iter()
            .flat_map(|(k, values)| values.iter().map(move |(v, s)| (k, v, s)))
    }
}

impl<'a, T> IntoIterator for &'a FeatureTable<T> {
    type Item = (&'a String, &'a BTreeMap<String, T>);
    type IntoIter = btree_map::Iter<'a, String, BTreeMap<String, T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}

/// Deserializes a number that may have been written as `null` (non-finite).
pub(crate) fn f64_or_zero<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<f64>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Count and prevalence of one feature value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueStats {
    #[serde(rename = "#users", deserialize_with = "f64_or_zero")]
    pub users: f64,
    #[serde(default, deserialize_with = "f64_or_zero")]
    pub prev: f64,
}

/// Global counts plus per-feature distribution of one side of a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionMetrics {
    pub global: BTreeMap<String, f64>,
    pub feat: FeatureTable<ValueStats>,
}

impl SectionMetrics {
    /// Total `#users` of the section.
    pub fn users(&self) -> f64 {
        self.global.get(USERS).copied().unwrap_or_default()
    }

    /// `#users` of one feature value, 0 when absent.
    pub fn feature_users(&self, key: &str, value: &str) -> f64 {
        self.feat
            .get(key, value)
            .map(|s| s.users)
            .unwrap_or_default()
    }

    pub fn feature_prev(&self, key: &str, value: &str) -> f64 {
        self.feat.get(key, value).map(|s| s.prev).unwrap_or_default()
    }
}

/// Conversion ratios: a global `ratio` and one ratio per feature value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatioMetrics {
    pub global: BTreeMap<String, f64>,
    pub feat: FeatureTable<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_and_get() {
        let mut table: FeatureTable<f64> = FeatureTable::new();
        *table.upsert("s#up#$country", "IN") += 1.0;
        *table.upsert("s#up#$country", "IN") += 1.0;
        *table.upsert("s#up#$country", "US") += 1.0;
        assert_eq!(table.get("s#up#$country", "IN"), Some(&2.0));
        assert_eq!(table.len(), 1);
        assert_eq!(table.entries().count(), 2);
        assert_eq!(table.get("missing", "IN"), None);
    }

    #[test]
    fn test_remove_prunes_empty_key() {
        let mut table: FeatureTable<f64> = FeatureTable::new();
        table.insert("k", "a", 1.0);
        table.insert("k", "b", 1.0);
        table.remove("k", "a");
        assert!(table.contains_key("k"));
        table.remove("k", "b");
        assert!(!table.contains_key("k"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_retain_prunes_empty_key() {
        let mut table: FeatureTable<f64> = FeatureTable::new();
        table.insert("k1", "a", 1.0);
        table.insert("k2", "a", 5.0);
        table.retain(|_, _, v| *v > 2.0);
        assert_eq!(table.keys().collect::<Vec<_>>(), vec!["k2"]);
    }

    #[test]
    fn test_section_json_shape() {
        let mut section = SectionMetrics::default();
        section.global.insert(USERS.to_string(), 4.0);
        section.feat.insert(
            "s#ep#$source",
            "google",
            ValueStats {
                users: 2.0,
                prev: 0.5,
            },
        );
        let json = serde_json::to_value(&section).unwrap();
        assert_eq!(json["global"]["#users"], 4.0);
        assert_eq!(json["feat"]["s#ep#$source"]["google"]["prev"], 0.5);

        let back: SectionMetrics = serde_json::from_value(json).unwrap();
        assert_eq!(back.users(), 4.0);
        assert_eq!(back.feature_users("s#ep#$source", "google"), 2.0);
    }

    #[test]
    fn test_null_prev_reads_as_zero() {
        let stats: ValueStats = serde_json::from_str(r##"{"#users": 3, "prev": null}"##).unwrap();
        assert_eq!(stats.prev, 0.0);
    }
}
