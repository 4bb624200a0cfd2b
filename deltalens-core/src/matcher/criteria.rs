//! Per-user match state for one side of a query.

use super::filter::event_matches_criterion;
use crate::query::{CriteriaOperator, EventsCriteria};
use crate::types::Event;

/// Mutable accumulator for one [`EventsCriteria`] over one user's stream.
///
/// Base-like sides lock on their first satisfaction; target-like sides keep
/// updating `most_recent` on every later match.
#[derive(Debug, Clone)]
pub struct CriteriaResult {
    /// Sequential match id of the last match of each criterion.
    match_ids: Vec<Option<usize>>,
    num_matched: usize,
    any: bool,
    all: bool,
    matched: bool,
    first_event: Option<Event>,
    most_recent: Option<Event>,
}

impl CriteriaResult {
    pub fn new(criteria: &EventsCriteria) -> Self {
        Self {
            match_ids: vec![None; criteria.criteria.len()],
            num_matched: 0,
            any: false,
            all: false,
            matched: false,
            first_event: None,
            most_recent: None,
        }
    }

    /// Folds one event in. Returns true when this event satisfies the criteria.
    pub fn update(&mut self, event: &Event, criteria: &EventsCriteria, is_base: bool) -> bool {
        if self.matched && is_base {
            return false;
        }

        if criteria.is_catch_all() {
            tracing::trace!(event = %event.name, "catch-all criteria matched");
            self.any = true;
            self.all = true;
            if self.first_event.is_none() {
                self.first_event = Some(event.clone());
            }
            self.matched = true;
            self.most_recent = Some(event.clone());
            return true;
        }

        for (i, criterion) in criteria.criteria.iter().enumerate() {
            if !event_matches_criterion(event, criterion) {
                continue;
            }
            self.match_ids[i] = Some(self.num_matched);
            self.num_matched += 1;
            self.any = true;
            self.most_recent = Some(event.clone());
            self.all = self.match_ids.iter().all(Option::is_some);

            let satisfied = match criteria.op {
                CriteriaOperator::And => self.all,
                CriteriaOperator::Or => self.any,
            };
            if satisfied {
                if self.first_event.is_none() {
                    self.first_event = Some(event.clone());
                }
                self.matched = true;
                return true;
            }
        }
        false
    }

    pub fn is_matched(&self) -> bool {
        self.matched
    }

    pub fn first_event(&self) -> Option<&Event> {
        self.first_event.as_ref()
    }

    pub fn most_recent(&self) -> Option<&Event> {
        self.most_recent.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::EventCriterion;

    fn ev(name: &str, ts: i64) -> Event {
        Event {
            name: name.into(),
            timestamp: ts,
            ..Default::default()
        }
    }

    fn criteria(op: CriteriaOperator, names: &[&str]) -> EventsCriteria {
        EventsCriteria {
            id: 0,
            op,
            criteria: names
                .iter()
                .map(|n| EventCriterion {
                    id: 0,
                    name: n.to_string(),
                    equality: true,
                    filters: vec![],
                })
                .collect(),
        }
    }

    #[test]
    fn test_base_locks_on_first_match() {
        let c = criteria(CriteriaOperator::Or, &["a"]);
        let mut result = CriteriaResult::new(&c);
        assert!(result.update(&ev("a", 1), &c, true));
        assert!(!result.update(&ev("a", 2), &c, true));
        assert_eq!(result.first_event().unwrap().timestamp, 1);
        assert_eq!(result.most_recent().unwrap().timestamp, 1);
    }

    #[test]
    fn test_target_tracks_most_recent() {
        let c = criteria(CriteriaOperator::Or, &["a"]);
        let mut result = CriteriaResult::new(&c);
        assert!(result.update(&ev("a", 1), &c, false));
        assert!(result.update(&ev("a", 2), &c, false));
        assert_eq!(result.first_event().unwrap().timestamp, 1);
        assert_eq!(result.most_recent().unwrap().timestamp, 2);
    }

    #[test]
    fn test_and_requires_every_distinct_criterion() {
        let c = criteria(CriteriaOperator::And, &["a", "b"]);
        let mut result = CriteriaResult::new(&c);
        assert!(!result.update(&ev("a", 1), &c, true));
        // A repeat of the same criterion does not complete the set.
        assert!(!result.update(&ev("a", 2), &c, true));
        assert!(!result.is_matched());
        assert!(result.update(&ev("b", 3), &c, true));
        assert_eq!(result.first_event().unwrap().name, "b");
    }

    #[test]
    fn test_catch_all_matches_first_event() {
        let c = EventsCriteria::default();
        let mut result = CriteriaResult::new(&c);
        assert!(result.update(&ev("anything", 5), &c, true));
        assert!(result.is_matched());
        assert_eq!(result.first_event().unwrap().name, "anything");
        assert!(!result.update(&ev("other", 6), &c, true));
    }

    #[test]
    fn test_non_matching_event() {
        let c = criteria(CriteriaOperator::Or, &["a"]);
        let mut result = CriteriaResult::new(&c);
        assert!(!result.update(&ev("b", 1), &c, false));
        assert!(result.most_recent().is_none());
    }
}
