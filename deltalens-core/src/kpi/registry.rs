//! Registry of the KPIs the engine can evaluate, for discovery and validation.

use crate::error::{Error, Result};

/// How a KPI's value is formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KpiValueKind {
    Count,
    Ratio,
    Average,
    Sum,
}

impl KpiValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            KpiValueKind::Count => "count",
            KpiValueKind::Ratio => "ratio",
            KpiValueKind::Average => "average",
            KpiValueKind::Sum => "sum",
        }
    }
}

/// Descriptor of one KPI of a display category.
#[derive(Debug, Clone)]
pub struct KpiDescriptor {
    pub category: &'static str,
    pub name: &'static str,
    pub value_kind: KpiValueKind,
    pub summary: &'static str,
}

const fn kpi(
    category: &'static str,
    name: &'static str,
    value_kind: KpiValueKind,
    summary: &'static str,
) -> KpiDescriptor {
    KpiDescriptor {
        category,
        name,
        value_kind,
        summary,
    }
}

use KpiValueKind::{Average, Count, Ratio, Sum};

const SESSION_METRICS: &[KpiDescriptor] = &[
    kpi("website_session", "total_sessions", Count, "Sessions started."),
    kpi("website_session", "unique_users", Count, "Distinct users with a session."),
    kpi("website_session", "new_users", Count, "Distinct users on their first session."),
    kpi("website_session", "repeat_users", Count, "Distinct users on a returning session."),
    kpi("website_session", "engaged_sessions", Count, "Sessions past the time or page threshold."),
    kpi("website_session", "engaged_users", Count, "Distinct users with an engaged session."),
    kpi("website_session", "sessions_per_user", Ratio, "Sessions per distinct user."),
    kpi(
        "website_session",
        "engaged_sessions_per_user",
        Ratio,
        "Engaged sessions per distinct user.",
    ),
    kpi("website_session", "bounce_rate", Ratio, "Percentage of single-page sessions."),
    kpi("website_session", "engagement_rate", Ratio, "Percentage of engaged sessions."),
    kpi("website_session", "total_time_on_site", Sum, "Seconds spent across sessions."),
    kpi("website_session", "average_session_duration", Average, "Seconds per session."),
    kpi("website_session", "average_page_views_per_session", Average, "Pages viewed per session."),
    kpi(
        "website_session",
        "average_initial_page_load_time",
        Average,
        "Load time of the landing page.",
    ),
];

const PAGE_METRICS: &[KpiDescriptor] = &[
    kpi("page_views", "page_views", Count, "Views of the page."),
    kpi("page_views", "unique_users", Count, "Distinct users viewing the page."),
    kpi("page_views", "entrances", Count, "Sessions that started on the page."),
    kpi("page_views", "exits", Count, "Sessions that ended on the page."),
    kpi("page_views", "engaged_page_views", Count, "Views past the time or scroll threshold."),
    kpi("page_views", "engaged_users", Count, "Distinct users with an engaged view."),
    kpi("page_views", "page_views_per_user", Ratio, "Views per distinct user."),
    kpi("page_views", "engagement_rate", Ratio, "Percentage of engaged views."),
    kpi("page_views", "average_page_load_time", Average, "Load time of the page."),
    kpi("page_views", "average_vertical_scroll_percentage", Average, "Scroll depth per view."),
    kpi("page_views", "average_time_on_page", Average, "Seconds spent per view."),
];

const FORM_METRICS: &[KpiDescriptor] = &[
    kpi("form_submissions", "count", Count, "Forms submitted."),
    kpi("form_submissions", "unique_users", Count, "Distinct users submitting a form."),
    kpi("form_submissions", "count_per_user", Ratio, "Submissions per distinct user."),
];

const GOOGLE_ADS_METRICS: &[KpiDescriptor] = &[
    kpi("google_ads_metrics", "impressions", Sum, "Ad impressions."),
    kpi("google_ads_metrics", "clicks", Sum, "Ad clicks."),
    kpi("google_ads_metrics", "spend", Sum, "Cost in account currency."),
    kpi("google_ads_metrics", "conversion", Sum, "Conversions."),
    kpi("google_ads_metrics", "conversion_value", Sum, "Value of conversions."),
    kpi("google_ads_metrics", "click_through_rate", Ratio, "Clicks per 100 impressions."),
    kpi("google_ads_metrics", "cost_per_click", Ratio, "Cost per click."),
    kpi("google_ads_metrics", "conversion_rate", Ratio, "Conversions per 100 clicks."),
    kpi("google_ads_metrics", "cost_per_conversion", Ratio, "Cost per conversion."),
    kpi("google_ads_metrics", "return_on_ad_spend", Ratio, "Conversion value per unit of cost."),
    kpi(
        "google_ads_metrics",
        "search_impression_share",
        Average,
        "Impression-weighted search impression share.",
    ),
    kpi("google_ads_metrics", "search_click_share", Average, "Click-weighted search click share."),
    kpi(
        "google_ads_metrics",
        "search_top_impression_share",
        Average,
        "Impression-weighted top impression share.",
    ),
    kpi(
        "google_ads_metrics",
        "search_absolute_top_impression_share",
        Average,
        "Impression-weighted absolute top impression share.",
    ),
];

const BING_ADS_METRICS: &[KpiDescriptor] = &[
    kpi("bing_ads_metrics", "impressions", Sum, "Ad impressions."),
    kpi("bing_ads_metrics", "clicks", Sum, "Ad clicks."),
    kpi("bing_ads_metrics", "spend", Sum, "Spend in account currency."),
    kpi("bing_ads_metrics", "conversions", Sum, "Conversions."),
    kpi("bing_ads_metrics", "click_through_rate", Ratio, "Clicks per 100 impressions."),
    kpi("bing_ads_metrics", "cost_per_click", Ratio, "Spend per click."),
    kpi("bing_ads_metrics", "conversion_rate", Ratio, "Conversions per 100 clicks."),
    kpi("bing_ads_metrics", "cost_per_conversion", Ratio, "Spend per conversion."),
];

const FACEBOOK_METRICS: &[KpiDescriptor] = &[
    kpi("facebook_metrics", "impressions", Sum, "Ad impressions."),
    kpi("facebook_metrics", "clicks", Sum, "Ad clicks."),
    kpi("facebook_metrics", "spend", Sum, "Spend in account currency."),
    kpi("facebook_metrics", "reach", Sum, "People reached."),
    kpi("facebook_metrics", "link_clicks", Sum, "Clicks on ad links."),
    kpi("facebook_metrics", "frequency", Average, "Impressions per person reached."),
    kpi("facebook_metrics", "cost_per_click", Ratio, "Spend per click."),
    kpi("facebook_metrics", "cost_per_link_click", Ratio, "Spend per link click."),
    kpi("facebook_metrics", "cost_per_thousand_impressions", Ratio, "Spend per 1000 impressions."),
    kpi("facebook_metrics", "click_through_rate", Ratio, "Clicks per 100 impressions."),
    kpi("facebook_metrics", "link_click_through_rate", Ratio, "Link clicks per 100 impressions."),
    kpi("facebook_metrics", "fb_pixel_purchase_count", Sum, "Pixel-tracked purchases."),
    kpi(
        "facebook_metrics",
        "fb_pixel_purchase_revenue",
        Sum,
        "Revenue of pixel-tracked purchases.",
    ),
    kpi("facebook_metrics", "fb_pixel_purchase_roas", Ratio, "Purchase revenue per unit of spend."),
    kpi("facebook_metrics", "fb_pixel_purchase_cost_per_action_type", Ratio, "Spend per purchase."),
];

const LINKEDIN_METRICS: &[KpiDescriptor] = &[
    kpi("linkedin_metrics", "impressions", Sum, "Ad impressions."),
    kpi("linkedin_metrics", "clicks", Sum, "Ad clicks."),
    kpi("linkedin_metrics", "spend", Sum, "Spend in local currency."),
    kpi("linkedin_metrics", "conversions", Sum, "Website conversions."),
    kpi("linkedin_metrics", "click_through_rate", Ratio, "Clicks per 100 impressions."),
    kpi("linkedin_metrics", "cost_per_click", Ratio, "Spend per click."),
    kpi("linkedin_metrics", "conversion_rate", Ratio, "Conversions per 100 clicks."),
    kpi("linkedin_metrics", "cost_per_conversion", Ratio, "Spend per conversion."),
];

const GOOGLE_ORGANIC_METRICS: &[KpiDescriptor] = &[
    kpi("google_organic_metrics", "impressions", Sum, "Search result impressions."),
    kpi("google_organic_metrics", "clicks", Sum, "Search result clicks."),
    kpi("google_organic_metrics", "click_through_rate", Ratio, "Clicks per 100 impressions."),
    kpi("google_organic_metrics", "position_avg", Average, "Mean result position."),
    kpi(
        "google_organic_metrics",
        "position_impression_weighted_avg",
        Average,
        "Impression-weighted result position.",
    ),
];

const ALL_CHANNELS_METRICS: &[KpiDescriptor] = &[
    kpi("all_channels_metrics", "impressions", Sum, "Impressions summed over channels."),
    kpi("all_channels_metrics", "clicks", Sum, "Clicks summed over channels."),
    kpi("all_channels_metrics", "spend", Sum, "Spend summed over channels."),
];

const ALL_METRICS: &[&[KpiDescriptor]] = &[
    SESSION_METRICS,
    PAGE_METRICS,
    FORM_METRICS,
    GOOGLE_ADS_METRICS,
    BING_ADS_METRICS,
    FACEBOOK_METRICS,
    LINKEDIN_METRICS,
    GOOGLE_ORGANIC_METRICS,
    ALL_CHANNELS_METRICS,
];

/// Registry name of a display category, resolving aliases.
pub fn canonical_category(display_category: &str) -> &str {
    match display_category {
        "adwords_metrics" => "google_ads_metrics",
        "form_submission" => "form_submissions",
        other => other,
    }
}

/// List all registered KPIs.
pub fn list_metrics() -> Vec<KpiDescriptor> {
    ALL_METRICS.iter().flat_map(|m| m.iter()).cloned().collect()
}

/// List KPIs of a display category.
pub fn list_metrics_for_category(display_category: &str) -> Vec<KpiDescriptor> {
    let category = canonical_category(display_category);
    ALL_METRICS
        .iter()
        .flat_map(|m| m.iter())
        .filter(|m| m.category == category)
        .cloned()
        .collect()
}

pub fn find_metric(display_category: &str, metric: &str) -> Option<&'static KpiDescriptor> {
    let category = canonical_category(display_category);
    ALL_METRICS
        .iter()
        .flat_map(|m| m.iter())
        .find(|m| m.category == category && m.name == metric)
}

/// Rejects a metric the category does not register.
pub fn validate_metric(display_category: &str, metric: &str) -> Result<&'static KpiDescriptor> {
    find_metric(display_category, metric).ok_or_else(|| Error::UnknownMetric {
        category: display_category.to_string(),
        metric: metric.to_string(),
    })
}
