//! Criteria and funnel matching over one user's sessions.
//!
//! ```text
//!   events of one user ──▶ Sessionizer ──▶ UserSessions
//!                                              │
//!                     ┌────────────────────────┼─────────────────────────┐
//!                     ▼                        ▼                         ▼
//!               query_user            query_user_funnel       query_user_event_occurrence
//!            (base ─▶ target)       (base ─▶ … ─▶ target)        (every target match)
//!                     │                        │                         │
//!                     └────────────▶ PerEventProperties ◀────────────────┘
//!                                  (flags + s#/t# properties)
//! ```

pub mod criteria;
pub mod filter;
pub mod query_user;
pub mod session;

pub use criteria::CriteriaResult;
pub use filter::{event_matches_criterion, event_matches_filters};
pub use query_user::{query_user, query_user_event_occurrence, query_user_funnel};
pub use session::{sessionize, Sessionizer, UserSessions};

use crate::query::QueryShape;
use crate::types::{Event, Properties};
use std::collections::HashSet;

/// Prefix of properties taken from the base-side event.
pub const BASE_PREFIX: &str = "s#";
/// Prefix of properties taken from the target-side event.
pub const TARGET_PREFIX: &str = "t#";

/// Outcome of matching one user (or one occurrence) against a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerEventProperties {
    pub base_flag: bool,
    pub target_flag: bool,
    pub base_and_target_flag: bool,
    /// `s#`/`t#`-prefixed event properties.
    pub event_properties: Properties,
    /// `s#`/`t#`-prefixed user properties.
    pub user_properties: Properties,
}

impl PerEventProperties {
    /// Copies base properties under `s#` and target properties under `t#`.
    /// A target key whose `s#` twin already exists is dropped.
    pub fn merge(
        &mut self,
        base: Option<&Event>,
        target: Option<&Event>,
        skip_base: bool,
        blacklist: &HashSet<String>,
    ) {
        let base = base.filter(|_| !skip_base);
        merge_map(
            &mut self.event_properties,
            base.map(|e| &e.event_properties),
            target.map(|e| &e.event_properties),
            blacklist,
        );
        merge_map(
            &mut self.user_properties,
            base.map(|e| &e.user_properties),
            target.map(|e| &e.user_properties),
            blacklist,
        );
    }

    /// Copy keeping only keys with `prefix`; flags are cleared.
    pub fn only_prefixed(&self, prefix: &str) -> PerEventProperties {
        let keep = |props: &Properties| -> Properties {
            props
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        PerEventProperties {
            event_properties: keep(&self.event_properties),
            user_properties: keep(&self.user_properties),
            ..Default::default()
        }
    }
}

fn merge_map(
    out: &mut Properties,
    base: Option<&Properties>,
    target: Option<&Properties>,
    blacklist: &HashSet<String>,
) {
    if let Some(base) = base {
        for (key, value) in base.iter().filter(|(k, _)| !blacklist.contains(*k)) {
            out.insert(format!("{}{}", BASE_PREFIX, key), value.clone());
        }
    }
    if let Some(target) = target {
        for (key, value) in target.iter().filter(|(k, _)| !blacklist.contains(*k)) {
            if out.contains_key(&format!("{}{}", BASE_PREFIX, key)) {
                continue;
            }
            out.insert(format!("{}{}", TARGET_PREFIX, key), value.clone());
        }
    }
}

/// Matches one user against any query shape.
///
/// Two-sided and funnel queries yield exactly one summary; event-occurrence
/// queries yield one per target match.
pub fn match_user(
    shape: &QueryShape,
    user: &UserSessions,
    blacklist: &HashSet<String>,
) -> Vec<PerEventProperties> {
    match shape {
        QueryShape::TwoSided(query) => vec![query_user(user, query, blacklist)],
        QueryShape::Funnel(query) => vec![query_user_funnel(user, query, blacklist)],
        QueryShape::EventOccurrence(query) => query_user_event_occurrence(user, query, blacklist),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_only_prefixed() {
        let mut summary = PerEventProperties {
            base_flag: true,
            ..Default::default()
        };
        summary.event_properties.insert("s#a".into(), json!(1));
        summary.event_properties.insert("t#b".into(), json!(2));
        summary.user_properties.insert("t#c".into(), json!(3));

        let base = summary.only_prefixed(BASE_PREFIX);
        assert_eq!(base.event_properties.len(), 1);
        assert!(base.user_properties.is_empty());
        assert!(!base.base_flag);

        let target = summary.only_prefixed(TARGET_PREFIX);
        assert_eq!(target.event_properties.len(), 1);
        assert_eq!(target.user_properties.len(), 1);
    }
}
