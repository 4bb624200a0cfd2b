//! Website session, page-view and form-submission metrics.
//!
//! Every metric is one [`EventMetricRecipe`]: which events it reads, an extra
//! qualifier, and the numerator/denominator each qualifying event adds. All
//! recipes of a query are evaluated in a single scan of the period's events.

use super::accumulator::{present_features, Amount, FeatureAccumulator, FeatureValues, Fraction};
use super::filter::passes_filters;
use super::MetricInfo;
use crate::config::KpiConfig;
use crate::error::Result;
use crate::query::KpiFilter;
use crate::source::{try_scan_jsonl, ScanStats};
use crate::types::{Event, PropertyEntity};
use serde_json::Value;
use std::io::BufRead;

pub const FORM_SUBMITTED_EVENT: &str = "$form_submitted";
pub const IS_FIRST_SESSION: &str = "$is_first_session";
pub const SESSION_SPENT_TIME: &str = "$session_spent_time";
pub const PAGE_COUNT: &str = "$page_count";
pub const INITIAL_PAGE_LOAD_TIME: &str = "$initial_page_load_time";
pub const INITIAL_PAGE_URL: &str = "$initial_page_url";
pub const SESSION_LATEST_PAGE_URL: &str = "$session_latest_page_url";
pub const PAGE_LOAD_TIME: &str = "$page_load_time";
pub const PAGE_SPENT_TIME: &str = "$page_spent_time";
pub const PAGE_SCROLL_PERCENT: &str = "$page_scroll_percent";

/// Event-backed display categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    WebsiteSession,
    PageViews,
    FormSubmissions,
}

impl EventCategory {
    pub fn from_display(display_category: &str) -> Option<Self> {
        match display_category {
            "website_session" => Some(EventCategory::WebsiteSession),
            "page_views" => Some(EventCategory::PageViews),
            "form_submissions" | "form_submission" => Some(EventCategory::FormSubmissions),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::WebsiteSession => "website_session",
            EventCategory::PageViews => "page_views",
            EventCategory::FormSubmissions => "form_submissions",
        }
    }

    /// Breakdown properties used when a query names none.
    pub fn default_properties(&self) -> &'static [&'static str] {
        match self {
            EventCategory::WebsiteSession => &[
                "ep#$source",
                "ep#$medium",
                "ep#$campaign",
                "ep#$adgroup",
                "ep#$keyword",
                "ep#$channel",
                "ep#$content",
                "ep#$term",
                "ep#$initial_page_url",
                "up#$os",
                "up#$browser",
                "up#$country",
                "up#$region",
                "up#$city",
            ],
            EventCategory::PageViews => &[
                "up#$os",
                "up#$browser",
                "up#$country",
                "up#$region",
                "up#$city",
            ],
            EventCategory::FormSubmissions => &[
                "ep#$page_url",
                "up#$os",
                "up#$browser",
                "up#$country",
                "up#$region",
                "up#$city",
            ],
        }
    }
}

/// Per-query inputs of the recipe predicates.
#[derive(Debug, Clone, Copy)]
pub struct EventContext<'a> {
    pub kpi: &'a KpiConfig,
    pub session_event: &'a str,
    /// Page the page-view metrics are about.
    pub page_url: &'a str,
}

/// Events a recipe reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Session,
    FormSubmitted,
    /// Events named by the query's page URL.
    Page,
}

impl EventSource {
    fn accepts(&self, event: &Event, ctx: &EventContext<'_>) -> bool {
        match self {
            EventSource::Session => event.name == ctx.session_event,
            EventSource::FormSubmitted => event.name == FORM_SUBMITTED_EVENT,
            EventSource::Page => !ctx.page_url.is_empty() && event.name == ctx.page_url,
        }
    }
}

/// Contribution of one qualifying event to a side of a slot.
#[derive(Clone, Copy)]
pub enum Term {
    One,
    /// 1 per distinct user in the slot.
    Users,
    /// Numeric event property; missing reads as 0.
    Property(&'static str),
    /// 1 when the predicate holds.
    Indicator(fn(&Event, &EventContext<'_>) -> bool),
}

impl Term {
    fn amount(&self, event: &Event, ctx: &EventContext<'_>) -> Amount {
        match self {
            Term::One => Amount::Value(1.0),
            Term::Users => Amount::FirstSeen,
            Term::Property(key) => Amount::Value(event.event_number(key).unwrap_or_default()),
            Term::Indicator(holds) => Amount::Value(if holds(event, ctx) { 1.0 } else { 0.0 }),
        }
    }
}

/// How the two sides of a finished slot become the metric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combine {
    Sum,
    Ratio,
    /// Numerator minus denominator.
    Difference,
}

pub struct EventMetricRecipe {
    pub category: EventCategory,
    pub name: &'static str,
    pub source: EventSource,
    pub qualifies: fn(&Event, &EventContext<'_>) -> bool,
    pub numerator: Term,
    /// `None` for plain sums.
    pub denominator: Option<Term>,
    pub combine: Combine,
}

impl EventMetricRecipe {
    /// Whether distinct users, not events, are counted on some side.
    pub fn is_unique(&self) -> bool {
        matches!(self.numerator, Term::Users) || matches!(self.denominator, Some(Term::Users))
    }

    fn evaluate(&self, slot: Fraction) -> f64 {
        match self.combine {
            Combine::Sum => slot.numerator,
            Combine::Ratio => slot.ratio(),
            Combine::Difference => slot.numerator - slot.denominator,
        }
    }
}

// ============================================
// Predicates
// ============================================

fn always(_: &Event, _: &EventContext<'_>) -> bool {
    true
}

fn first_session_flag(event: &Event) -> Option<bool> {
    match event.event_properties.get(IS_FIRST_SESSION)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn is_first_session(event: &Event, _: &EventContext<'_>) -> bool {
    first_session_flag(event) == Some(true)
}

fn is_engaged_session(event: &Event, ctx: &EventContext<'_>) -> bool {
    let spent = event.event_number(SESSION_SPENT_TIME).unwrap_or_default();
    let pages = event.event_number(PAGE_COUNT).unwrap_or_default();
    spent > ctx.kpi.engaged_session_secs || pages > ctx.kpi.engaged_session_pages
}

fn is_bounce(event: &Event, _: &EventContext<'_>) -> bool {
    event.event_number(PAGE_COUNT) == Some(1.0)
}

fn has_spent_time(event: &Event, _: &EventContext<'_>) -> bool {
    event.event_number(SESSION_SPENT_TIME).is_some()
}

fn has_initial_load_time(event: &Event, _: &EventContext<'_>) -> bool {
    event.event_number(INITIAL_PAGE_LOAD_TIME).is_some()
}

fn url_is_page(event: &Event, key: &str, ctx: &EventContext<'_>) -> bool {
    !ctx.page_url.is_empty()
        && event.event_properties.get(key).and_then(Value::as_str) == Some(ctx.page_url)
}

fn enters_page(event: &Event, ctx: &EventContext<'_>) -> bool {
    url_is_page(event, INITIAL_PAGE_URL, ctx)
}

fn exits_page(event: &Event, ctx: &EventContext<'_>) -> bool {
    url_is_page(event, SESSION_LATEST_PAGE_URL, ctx)
}

fn is_engaged_page_view(event: &Event, ctx: &EventContext<'_>) -> bool {
    let spent = event.event_number(PAGE_SPENT_TIME).unwrap_or_default();
    let scroll = event.event_number(PAGE_SCROLL_PERCENT).unwrap_or_default();
    spent > ctx.kpi.engaged_page_secs || scroll > ctx.kpi.engaged_page_scroll_percent
}

fn has_page_load_time(event: &Event, _: &EventContext<'_>) -> bool {
    event.event_number(PAGE_LOAD_TIME).is_some()
}

fn has_page_spent_time(event: &Event, _: &EventContext<'_>) -> bool {
    event.event_number(PAGE_SPENT_TIME).is_some()
}

// ============================================
// Recipes
// ============================================

const fn recipe(
    category: EventCategory,
    name: &'static str,
    source: EventSource,
    qualifies: fn(&Event, &EventContext<'_>) -> bool,
    numerator: Term,
    denominator: Option<Term>,
) -> EventMetricRecipe {
    let combine = match denominator {
        Some(_) => Combine::Ratio,
        None => Combine::Sum,
    };
    EventMetricRecipe {
        category,
        name,
        source,
        qualifies,
        numerator,
        denominator,
        combine,
    }
}

const fn difference(
    category: EventCategory,
    name: &'static str,
    source: EventSource,
    minuend: Term,
    subtrahend: Term,
) -> EventMetricRecipe {
    EventMetricRecipe {
        category,
        name,
        source,
        qualifies: always,
        numerator: minuend,
        denominator: Some(subtrahend),
        combine: Combine::Difference,
    }
}

use EventCategory::{FormSubmissions, PageViews, WebsiteSession};
use EventSource::{FormSubmitted, Page, Session};

pub static EVENT_METRICS: &[EventMetricRecipe] = &[
    recipe(WebsiteSession, "total_sessions", Session, always, Term::One, None),
    recipe(WebsiteSession, "unique_users", Session, always, Term::Users, None),
    recipe(WebsiteSession, "new_users", Session, is_first_session, Term::Users, None),
    // Distinct session users less first sessions, per slot.
    difference(
        WebsiteSession,
        "repeat_users",
        Session,
        Term::Users,
        Term::Indicator(is_first_session),
    ),
    recipe(WebsiteSession, "sessions_per_user", Session, always, Term::One, Some(Term::Users)),
    recipe(WebsiteSession, "engaged_sessions", Session, is_engaged_session, Term::One, None),
    recipe(WebsiteSession, "engaged_users", Session, is_engaged_session, Term::Users, None),
    recipe(
        WebsiteSession,
        "engaged_sessions_per_user",
        Session,
        is_engaged_session,
        Term::One,
        Some(Term::Users),
    ),
    recipe(
        WebsiteSession,
        "total_time_on_site",
        Session,
        always,
        Term::Property(SESSION_SPENT_TIME),
        None,
    ),
    recipe(
        WebsiteSession,
        "average_session_duration",
        Session,
        has_spent_time,
        Term::Property(SESSION_SPENT_TIME),
        Some(Term::One),
    ),
    recipe(
        WebsiteSession,
        "average_page_views_per_session",
        Session,
        always,
        Term::Property(PAGE_COUNT),
        Some(Term::One),
    ),
    recipe(
        WebsiteSession,
        "average_initial_page_load_time",
        Session,
        has_initial_load_time,
        Term::Property(INITIAL_PAGE_LOAD_TIME),
        Some(Term::One),
    ),
    recipe(
        WebsiteSession,
        "bounce_rate",
        Session,
        always,
        Term::Indicator(is_bounce),
        Some(Term::One),
    ),
    recipe(
        WebsiteSession,
        "engagement_rate",
        Session,
        always,
        Term::Indicator(is_engaged_session),
        Some(Term::One),
    ),
    recipe(PageViews, "entrances", Session, enters_page, Term::One, None),
    recipe(PageViews, "exits", Session, exits_page, Term::One, None),
    recipe(PageViews, "page_views", Page, always, Term::One, None),
    recipe(PageViews, "unique_users", Page, always, Term::Users, None),
    recipe(PageViews, "page_views_per_user", Page, always, Term::One, Some(Term::Users)),
    recipe(
        PageViews,
        "average_page_load_time",
        Page,
        has_page_load_time,
        Term::Property(PAGE_LOAD_TIME),
        Some(Term::One),
    ),
    recipe(
        PageViews,
        "average_vertical_scroll_percentage",
        Page,
        always,
        Term::Property(PAGE_SCROLL_PERCENT),
        Some(Term::One),
    ),
    recipe(
        PageViews,
        "average_time_on_page",
        Page,
        has_page_spent_time,
        Term::Property(PAGE_SPENT_TIME),
        Some(Term::One),
    ),
    recipe(PageViews, "engaged_page_views", Page, is_engaged_page_view, Term::One, None),
    recipe(PageViews, "engaged_users", Page, is_engaged_page_view, Term::Users, None),
    recipe(
        PageViews,
        "engagement_rate",
        Page,
        always,
        Term::Indicator(is_engaged_page_view),
        Some(Term::One),
    ),
    recipe(FormSubmissions, "count", FormSubmitted, always, Term::One, None),
    recipe(FormSubmissions, "unique_users", FormSubmitted, always, Term::Users, None),
    recipe(
        FormSubmissions,
        "count_per_user",
        FormSubmitted,
        always,
        Term::One,
        Some(Term::Users),
    ),
];

pub fn find_recipe(category: EventCategory, metric: &str) -> Option<&'static EventMetricRecipe> {
    EVENT_METRICS
        .iter()
        .find(|r| r.category == category && r.name == metric)
}

// ============================================
// Evaluation
// ============================================

/// Value of a filter's property; an untagged filter reads either map.
fn filter_value<'e>(event: &'e Event, filter: &KpiFilter) -> Option<&'e Value> {
    match filter.entity() {
        Some(entity) => event.properties(entity).get(&filter.property_name),
        None => event
            .event_properties
            .get(&filter.property_name)
            .or_else(|| event.user_properties.get(&filter.property_name)),
    }
}

fn event_features(event: &Event, props: &[String]) -> FeatureValues {
    present_features(props, |tag, name| {
        let entity: PropertyEntity = tag.parse().ok()?;
        event.properties(entity).get(name)
    })
}

/// Evaluates `recipes` over one period's events in a single pass.
///
/// Returns `(metric, scale)` per recipe, in order.
pub fn evaluate_event_metrics<R: BufRead>(
    reader: R,
    recipes: &[&EventMetricRecipe],
    ctx: &EventContext<'_>,
    filters: &[KpiFilter],
    props: &[String],
) -> Result<(Vec<(MetricInfo, MetricInfo)>, ScanStats)> {
    let mut accumulators: Vec<FeatureAccumulator> =
        recipes.iter().map(|_| FeatureAccumulator::new()).collect();

    let stats = try_scan_jsonl(reader, |event: Event| {
        let wanted: Vec<usize> = recipes
            .iter()
            .enumerate()
            .filter(|(_, r)| r.source.accepts(&event, ctx) && (r.qualifies)(&event, ctx))
            .map(|(i, _)| i)
            .collect();
        if wanted.is_empty() || !passes_filters(filters, |f| filter_value(&event, f))? {
            return Ok(());
        }

        let features = event_features(&event, props);
        for i in wanted {
            let recipe = recipes[i];
            let numerator = recipe.numerator.amount(&event, ctx);
            let denominator = recipe
                .denominator
                .map(|t| t.amount(&event, ctx))
                .unwrap_or(Amount::Value(0.0));
            let acc = &mut accumulators[i];
            acc.count_scale(&features);
            acc.add(&event.user_id, &features, numerator, denominator, true);
        }
        Ok(())
    })?;

    let results = accumulators
        .into_iter()
        .zip(recipes)
        .map(|(acc, recipe)| acc.finish(|slot| recipe.evaluate(slot)))
        .collect();
    Ok((results, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn session(uid: &str, spent: f64, pages: i64, first: bool, source: &str) -> String {
        format!(
            r#"{{"uid":"{}","en":"$session","et":1,"epr":{{"$session_spent_time":{},"$page_count":{},"$is_first_session":{},"$source":"{}","$initial_page_url":"a.com/pricing","$session_latest_page_url":"a.com/docs"}},"upr":{{"$country":"IN"}}}}"#,
            uid, spent, pages, first, source
        )
    }

    fn page_view(uid: &str, url: &str, spent: f64, scroll: f64) -> String {
        format!(
            r#"{{"uid":"{}","en":"{}","et":2,"epr":{{"$page_spent_time":{},"$page_scroll_percent":{}}},"upr":{{"$country":"US"}}}}"#,
            uid, url, spent, scroll
        )
    }

    fn run(
        lines: &[String],
        category: EventCategory,
        metrics: &[&str],
        page_url: &str,
        filters: &[KpiFilter],
    ) -> Vec<(MetricInfo, MetricInfo)> {
        let kpi = KpiConfig::default();
        let ctx = EventContext {
            kpi: &kpi,
            session_event: "$session",
            page_url,
        };
        let recipes: Vec<&EventMetricRecipe> = metrics
            .iter()
            .map(|m| find_recipe(category, m).unwrap())
            .collect();
        let props = vec!["ep#$source".to_string(), "up#$country".to_string()];
        let (results, _) = evaluate_event_metrics(
            Cursor::new(lines.join("\n")),
            &recipes,
            &ctx,
            filters,
            &props,
        )
        .unwrap();
        results
    }

    fn sample_sessions() -> Vec<String> {
        vec![
            session("u1", 30.0, 1, true, "google"),
            session("u1", 5.0, 4, false, "google"),
            session("u2", 2.0, 1, true, "bing"),
            session("u3", 0.0, 2, false, "google"),
        ]
    }

    #[test]
    fn test_session_counts() {
        let results = run(
            &sample_sessions(),
            EventCategory::WebsiteSession,
            &["total_sessions", "unique_users", "new_users", "repeat_users", "engaged_users"],
            "",
            &[],
        );
        assert_eq!(results[0].0.global, 4.0);
        assert_eq!(results[0].0.feat.get("ep#$source", "google"), Some(&3.0));
        assert_eq!(results[1].0.global, 3.0);
        assert_eq!(results[1].0.feat.get("ep#$source", "google"), Some(&2.0));
        assert_eq!(results[2].0.global, 2.0);
        // Three users, two first sessions.
        assert_eq!(results[3].0.global, 1.0);
        assert_eq!(results[3].0.feat.get("ep#$source", "google"), Some(&1.0));
        assert!(results[3].0.feat.get("ep#$source", "bing").is_none());
        // u1 is engaged twice, counted once.
        assert_eq!(results[4].0.global, 1.0);
        assert_eq!(results[0].1.global, 4.0);
    }

    fn repeat_users(lines: &[String]) -> f64 {
        let results = run(lines, EventCategory::WebsiteSession, &["repeat_users"], "", &[]);
        results[0].0.global
    }

    #[test]
    fn test_repeat_users_without_first_session_flag() {
        let line = r#"{"uid":"u1","en":"$session","et":1,"epr":{"$page_count":2}}"#;
        assert_eq!(repeat_users(&[line.to_string()]), 1.0);
    }

    #[test]
    fn test_new_user_returning_is_not_repeat() {
        let lines = vec![
            session("u2", 10.0, 1, true, "google"),
            session("u2", 10.0, 3, false, "google"),
        ];
        assert_eq!(repeat_users(&lines), 0.0);
    }

    #[test]
    fn test_session_ratios() {
        let results = run(
            &sample_sessions(),
            EventCategory::WebsiteSession,
            &[
                "sessions_per_user",
                "bounce_rate",
                "average_page_views_per_session",
                "engagement_rate",
            ],
            "",
            &[],
        );
        assert_eq!(results[0].0.global, 4.0 / 3.0);
        assert_eq!(results[0].0.feat.get("ep#$source", "bing"), Some(&1.0));
        assert_eq!(results[1].0.global, 0.5);
        assert_eq!(results[2].0.global, 2.0);
        assert_eq!(results[3].0.global, 0.5);
        // No engaged bing session: the zero entry is dropped.
        assert!(results[3].0.feat.get("ep#$source", "bing").is_none());
    }

    #[test]
    fn test_filters_restrict_records() {
        let filters = vec![KpiFilter {
            property_name: "$source".into(),
            entity: "event".into(),
            condition: "equals".into(),
            value: "google".into(),
            logical_op: "AND".into(),
            property_data_type: "categorical".into(),
            ..Default::default()
        }];
        let results = run(
            &sample_sessions(),
            EventCategory::WebsiteSession,
            &["total_sessions"],
            "",
            &filters,
        );
        assert_eq!(results[0].0.global, 3.0);
        assert!(results[0].0.feat.get("ep#$source", "bing").is_none());
    }

    #[test]
    fn test_page_view_metrics() {
        let mut lines = sample_sessions();
        lines.push(page_view("u1", "a.com/pricing", 20.0, 10.0));
        lines.push(page_view("u1", "a.com/pricing", 1.0, 80.0));
        lines.push(page_view("u2", "a.com/pricing", 1.0, 10.0));
        lines.push(page_view("u2", "a.com/docs", 50.0, 90.0));
        let results = run(
            &lines,
            EventCategory::PageViews,
            &[
                "page_views",
                "unique_users",
                "entrances",
                "exits",
                "engaged_page_views",
                "average_vertical_scroll_percentage",
            ],
            "a.com/pricing",
            &[],
        );
        assert_eq!(results[0].0.global, 3.0);
        assert_eq!(results[1].0.global, 2.0);
        assert_eq!(results[2].0.global, 4.0);
        assert_eq!(results[3].0.global, 0.0);
        assert_eq!(results[4].0.global, 2.0);
        assert_eq!(results[5].0.global, 100.0 / 3.0);
    }

    #[test]
    fn test_form_submissions() {
        let lines = vec![
            r#"{"uid":"u1","en":"$form_submitted","et":1,"epr":{"$source":"google"}}"#.to_string(),
            r#"{"uid":"u1","en":"$form_submitted","et":2,"epr":{"$source":"google"}}"#.to_string(),
            r#"{"uid":"u2","en":"$form_submitted","et":3}"#.to_string(),
        ];
        let results = run(
            &lines,
            EventCategory::FormSubmissions,
            &["count", "count_per_user"],
            "",
            &[],
        );
        assert_eq!(results[0].0.global, 3.0);
        assert_eq!(results[1].0.global, 1.5);
        assert_eq!(results[1].0.feat.get("ep#$source", "google"), Some(&2.0));
    }

    #[test]
    fn test_find_recipe() {
        assert!(find_recipe(EventCategory::PageViews, "exits").is_some());
        assert!(find_recipe(EventCategory::FormSubmissions, "exits").is_none());
        assert!(find_recipe(EventCategory::WebsiteSession, "unique_users")
            .unwrap()
            .is_unique());
    }
}
