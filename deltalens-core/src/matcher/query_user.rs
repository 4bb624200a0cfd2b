//! Per-user evaluation of two-sided queries, funnels and event occurrences.

use super::criteria::CriteriaResult;
use super::session::UserSessions;
use super::PerEventProperties;
use crate::query::{MultiFunnelQuery, Query};
use crate::types::SESSION_EVENT;
use std::collections::HashSet;

/// Position of a matched event: timestamp and global event index.
type MatchPoint = (i64, usize);

/// Did the user do base, then (at a later or equal time, on another event) target?
pub fn query_user(
    user: &UserSessions,
    query: &Query,
    blacklist: &HashSet<String>,
) -> PerEventProperties {
    let session_target = query.target.targets_event(SESSION_EVENT);
    let mut base_result = CriteriaResult::new(&query.base);
    let mut target_result = CriteriaResult::new(&query.target);
    let mut base_at: Option<MatchPoint> = None;
    let mut target_at: Option<MatchPoint> = None;

    let linked = |base_at: Option<MatchPoint>, target_at: Option<MatchPoint>| {
        match (base_at, target_at) {
            (Some((bts, bidx)), Some((tts, tidx))) => bts <= tts && bidx != tidx,
            _ => false,
        }
    };

    let mut offset = 0;
    'sessions: for session in user.extended() {
        for (i, event) in session.iter().enumerate() {
            let index = offset + i;
            if base_result.update(event, &query.base, true) {
                base_at = Some((event.timestamp, index));
            }
            if target_result.update(event, &query.target, false) {
                target_at = Some((event.timestamp, index));
            }
            if linked(base_at, target_at) {
                break;
            }
        }
        if base_result.is_matched() && target_result.is_matched() && linked(base_at, target_at) {
            break 'sessions;
        }
        offset += session.len();
    }

    let mut summary = PerEventProperties {
        base_flag: base_result.is_matched(),
        target_flag: target_result.is_matched(),
        ..Default::default()
    };
    summary.base_and_target_flag =
        summary.base_flag && summary.target_flag && linked(base_at, target_at);

    if summary.base_and_target_flag {
        summary.merge(
            base_result.most_recent(),
            target_result.most_recent(),
            session_target,
            blacklist,
        );
    }
    if summary.base_flag {
        summary.merge(base_result.most_recent(), None, session_target, blacklist);
    }
    if summary.target_flag {
        summary.merge(None, target_result.first_event(), session_target, blacklist);
    }
    summary
}

/// Ordered N-stage funnel.
///
/// Candidate lists per stage grow session by session; after each session the
/// chain is searched again from the earliest base match.
pub fn query_user_funnel(
    user: &UserSessions,
    query: &MultiFunnelQuery,
    blacklist: &HashSet<String>,
) -> PerEventProperties {
    let session_target = query.target.targets_event(SESSION_EVENT);
    let stages = query.stages();
    let mut candidates: Vec<Vec<MatchPoint>> = vec![Vec::new(); stages.len()];
    let mut complete = false;

    let mut offset = 0;
    for session in user.extended() {
        for (i, event) in session.iter().enumerate() {
            for (stage_idx, stage) in stages.iter().enumerate() {
                // Every event is judged on its own against every stage.
                let mut result = CriteriaResult::new(stage);
                if result.update(event, stage, stage_idx == 0) {
                    candidates[stage_idx].push((event.timestamp, offset + i));
                }
            }
        }
        if find_chain(&candidates) {
            complete = true;
            break;
        }
        offset += session.len();
    }

    let events = user.events();
    let first_base = candidates[0].first().map(|&(_, idx)| events[idx]);
    let last_target = candidates
        .last()
        .and_then(|c| c.last())
        .map(|&(_, idx)| events[idx]);

    let mut summary = PerEventProperties::default();
    if complete {
        summary.base_and_target_flag = true;
        summary.merge(first_base, last_target, session_target, blacklist);
    }
    if first_base.is_some() {
        summary.base_flag = true;
        summary.merge(first_base, None, session_target, blacklist);
    }
    if last_target.is_some() {
        summary.target_flag = true;
        summary.merge(None, last_target, session_target, blacklist);
    }
    summary
}

/// Earliest-candidate chain across every stage.
fn find_chain(candidates: &[Vec<MatchPoint>]) -> bool {
    let Some(&(mut ts, mut idx)) = candidates.first().and_then(|c| c.first()) else {
        return false;
    };
    for stage in &candidates[1..] {
        match stage.iter().find(|&&(t, i)| t >= ts && i != idx) {
            Some(&(t, i)) => {
                ts = t;
                idx = i;
            }
            None => return false,
        }
    }
    candidates.len() > 1
}

/// Every target match of the user, each as its own `t#`-tagged summary.
pub fn query_user_event_occurrence(
    user: &UserSessions,
    query: &Query,
    blacklist: &HashSet<String>,
) -> Vec<PerEventProperties> {
    let session_target = query.target.targets_event(SESSION_EVENT);
    let mut target_result = CriteriaResult::new(&query.target);
    let mut summaries = Vec::new();

    for event in user.extended().flatten() {
        if target_result.update(event, &query.target, false) {
            let mut summary = PerEventProperties {
                target_flag: true,
                ..Default::default()
            };
            summary.merge(None, Some(event), session_target, blacklist);
            summaries.push(summary);
        }
    }
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::session::sessionize;
    use crate::query::EventsCriteria;
    use crate::types::Event;
    use serde_json::json;

    fn ev(name: &str, ts: i64) -> Event {
        Event {
            user_id: "u1".into(),
            name: name.into(),
            timestamp: ts,
            ..Default::default()
        }
    }

    fn ev_with(name: &str, ts: i64, key: &str, value: &str) -> Event {
        let mut event = ev(name, ts);
        event.event_properties.insert(key.into(), json!(value));
        event
    }

    fn no_blacklist() -> HashSet<String> {
        HashSet::new()
    }

    #[test]
    fn test_base_then_target_links() {
        let user = sessionize(vec![ev("$session", 0), ev("A", 1), ev("B", 2)], "$session");
        let query = Query::new(EventsCriteria::single("A"), EventsCriteria::single("B"));
        let summary = query_user(&user, &query, &no_blacklist());
        assert!(summary.base_flag);
        assert!(summary.target_flag);
        assert!(summary.base_and_target_flag);
    }

    #[test]
    fn test_target_before_base_does_not_link() {
        let user = sessionize(vec![ev("$session", 0), ev("B", 2), ev("A", 5)], "$session");
        let query = Query::new(EventsCriteria::single("A"), EventsCriteria::single("B"));
        let summary = query_user(&user, &query, &no_blacklist());
        assert!(summary.base_flag);
        assert!(summary.target_flag);
        assert!(!summary.base_and_target_flag);
    }

    #[test]
    fn test_same_event_cannot_satisfy_both_sides() {
        let user = sessionize(vec![ev("A", 1)], "$session");
        let query = Query::new(EventsCriteria::single("A"), EventsCriteria::single("A"));
        let summary = query_user(&user, &query, &no_blacklist());
        assert!(summary.base_flag && summary.target_flag);
        assert!(!summary.base_and_target_flag);
    }

    #[test]
    fn test_merge_prefers_base_on_collision() {
        let user = sessionize(
            vec![
                ev_with("A", 1, "$browser", "Chrome"),
                ev_with("B", 2, "$browser", "Firefox"),
            ],
            "$session",
        );
        let query = Query::new(EventsCriteria::single("A"), EventsCriteria::single("B"));
        let summary = query_user(&user, &query, &no_blacklist());
        assert_eq!(summary.event_properties["s#$browser"], json!("Chrome"));
        assert!(!summary.event_properties.contains_key("t#$browser"));
        assert!(!summary
            .event_properties
            .values()
            .any(|v| v == &json!("Firefox")));
    }

    #[test]
    fn test_target_only_tags_with_t() {
        let user = sessionize(vec![ev_with("B", 2, "$browser", "Firefox")], "$session");
        let query = Query::new(EventsCriteria::single("A"), EventsCriteria::single("B"));
        let summary = query_user(&user, &query, &no_blacklist());
        assert!(!summary.base_flag);
        assert!(summary.target_flag);
        assert_eq!(summary.event_properties["t#$browser"], json!("Firefox"));
    }

    #[test]
    fn test_session_target_drops_base_properties() {
        let user = sessionize(
            vec![
                ev_with("$session", 1, "$source", "google"),
                ev_with("$session", 2, "$source", "bing"),
            ],
            "$session",
        );
        let query = Query::new(
            EventsCriteria::single("$session"),
            EventsCriteria::single("$session"),
        );
        let summary = query_user(&user, &query, &no_blacklist());
        assert!(summary.base_and_target_flag);
        assert!(!summary.event_properties.contains_key("s#$source"));
        assert_eq!(summary.event_properties["t#$source"], json!("google"));
    }

    #[test]
    fn test_blacklist_applied_at_merge() {
        let user = sessionize(vec![ev_with("A", 1, "$ip", "10.0.0.1")], "$session");
        let query = Query::new(EventsCriteria::single("A"), EventsCriteria::single("B"));
        let blacklist: HashSet<String> = ["$ip".to_string()].into_iter().collect();
        let summary = query_user(&user, &query, &blacklist);
        assert!(summary.base_flag);
        assert!(summary.event_properties.is_empty());
    }

    #[test]
    fn test_three_stage_funnel() {
        let user = sessionize(
            vec![
                ev("$session", 0),
                ev_with("A", 1, "$source", "ads"),
                ev("M", 2),
                ev_with("B", 3, "$plan", "pro"),
            ],
            "$session",
        );
        let query = MultiFunnelQuery {
            id: 1,
            base: EventsCriteria::single("A"),
            intermediate: vec![EventsCriteria::single("M")],
            target: EventsCriteria::single("B"),
        };
        let summary = query_user_funnel(&user, &query, &no_blacklist());
        assert!(summary.base_and_target_flag);
        assert!(summary.base_flag);
        assert!(summary.target_flag);
        assert_eq!(summary.event_properties["s#$source"], json!("ads"));
        assert_eq!(summary.event_properties["t#$plan"], json!("pro"));
    }

    #[test]
    fn test_funnel_out_of_order_is_incomplete() {
        let user = sessionize(vec![ev("A", 1), ev("B", 2), ev("M", 3)], "$session");
        let query = MultiFunnelQuery {
            id: 1,
            base: EventsCriteria::single("A"),
            intermediate: vec![EventsCriteria::single("M")],
            target: EventsCriteria::single("B"),
        };
        let summary = query_user_funnel(&user, &query, &no_blacklist());
        assert!(!summary.base_and_target_flag);
        assert!(summary.base_flag);
        assert!(summary.target_flag);
    }

    #[test]
    fn test_funnel_chain_spans_sessions() {
        let user = sessionize(
            vec![
                ev("$session", 0),
                ev("A", 1),
                ev("$session", 10),
                ev("M", 11),
                ev("B", 12),
            ],
            "$session",
        );
        let query = MultiFunnelQuery {
            id: 1,
            base: EventsCriteria::single("A"),
            intermediate: vec![EventsCriteria::single("M")],
            target: EventsCriteria::single("B"),
        };
        assert!(query_user_funnel(&user, &query, &no_blacklist()).base_and_target_flag);
    }

    #[test]
    fn test_event_occurrence_yields_every_match() {
        let user = sessionize(
            vec![
                ev_with("B", 1, "$plan", "free"),
                ev("A", 2),
                ev_with("B", 3, "$plan", "pro"),
            ],
            "$session",
        );
        let query = Query::new(EventsCriteria::single("A"), EventsCriteria::single("B"));
        let summaries = query_user_event_occurrence(&user, &query, &no_blacklist());
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].event_properties["t#$plan"], json!("free"));
        assert_eq!(summaries[1].event_properties["t#$plan"], json!("pro"));
    }
}
