//! Google Ads documents. Costs are reported in micros.

use super::{CalcOperation as Op, ChannelSpec, ConstantOp, MetricCalculationInfo as Calc, PropInfo};

pub struct Adwords;

const CAMPAIGNS: i64 = 1;
const ADS: i64 = 2;
const AD_GROUPS: i64 = 3;
const CLICK_PERFORMANCE_REPORT: i64 = 4;
const CAMPAIGN_PERFORMANCE_REPORT: i64 = 5;
const AD_PERFORMANCE_REPORT: i64 = 6;
const SEARCH_PERFORMANCE_REPORT: i64 = 7;
const KEYWORD_PERFORMANCE_REPORT: i64 = 8;
const CUSTOMER_ACCOUNT_PROPERTIES: i64 = 9;
const AD_GROUP_PERFORMANCE_REPORT: i64 = 10;

const IMPRESSIONS: PropInfo = PropInfo::field("impressions");
const CLICKS: PropInfo = PropInfo::field("clicks");
const COST: PropInfo = PropInfo::field("cost");
const CONVERSIONS: PropInfo = PropInfo::field("conversions");
const CONVERSION_VALUE: PropInfo = PropInfo::field("conversion_value");

const MICROS: &[(ConstantOp, f64)] = &[(ConstantOp::Quotient, 1_000_000.0)];
const PERCENT: &[(ConstantOp, f64)] = &[(ConstantOp::Product, 100.0)];

static METRICS: &[(&str, Calc)] = &[
    ("impressions", Calc::new(&[IMPRESSIONS], Op::Sum)),
    ("clicks", Calc::new(&[CLICKS], Op::Sum)),
    ("cost", Calc::new(&[COST], Op::Sum).scaled(MICROS)),
    ("conversions", Calc::new(&[CONVERSIONS], Op::Sum)),
    ("conversion_value", Calc::new(&[CONVERSION_VALUE], Op::Sum)),
    ("click_through_rate", Calc::new(&[CLICKS, IMPRESSIONS], Op::Quotient).scaled(PERCENT)),
    ("cost_per_click", Calc::new(&[COST, CLICKS], Op::Quotient).scaled(MICROS)),
    ("conversion_rate", Calc::new(&[CONVERSIONS, CLICKS], Op::Quotient).scaled(PERCENT)),
    ("cost_per_conversion", Calc::new(&[COST, CONVERSIONS], Op::Quotient).scaled(MICROS)),
    (
        "return_on_ad_spend",
        Calc::new(&[CONVERSION_VALUE, COST], Op::Quotient)
            .scaled(&[(ConstantOp::Product, 1_000_000.0)]),
    ),
    (
        "search_impression_share",
        Calc::new(&[SEARCH_IMPRESSION_SHARE, IMPRESSIONS], Op::Quotient),
    ),
    (
        "search_click_share",
        Calc::new(&[SEARCH_CLICK_SHARE, CLICKS], Op::Quotient),
    ),
    (
        "search_top_impression_share",
        Calc::new(&[SEARCH_TOP_IMPRESSION_SHARE, IMPRESSIONS], Op::Quotient),
    ),
    (
        "search_absolute_top_impression_share",
        Calc::new(&[SEARCH_ABSOLUTE_TOP_IMPRESSION_SHARE, IMPRESSIONS], Op::Quotient),
    ),
];

// Share columns are averaged weighted by the volume they refer to.
const SEARCH_IMPRESSION_SHARE: PropInfo =
    PropInfo::weighted_by("search_impression_share", "impressions");
const SEARCH_CLICK_SHARE: PropInfo = PropInfo::weighted_by("search_click_share", "clicks");
const SEARCH_TOP_IMPRESSION_SHARE: PropInfo =
    PropInfo::weighted_by("search_top_impression_share", "impressions");
const SEARCH_ABSOLUTE_TOP_IMPRESSION_SHARE: PropInfo =
    PropInfo::weighted_by("search_absolute_top_impression_share", "impressions");

impl ChannelSpec for Adwords {
    fn source_name(&self) -> &'static str {
        "adwords"
    }

    fn display_name(&self) -> &'static str {
        "Google Ads"
    }

    fn document_type_alias(&self) -> &'static [(&'static str, i64)] {
        &[
            ("campaigns", CAMPAIGNS),
            ("ads", ADS),
            ("ad_groups", AD_GROUPS),
            ("click_performance_report", CLICK_PERFORMANCE_REPORT),
            ("campaign_performance_report", CAMPAIGN_PERFORMANCE_REPORT),
            ("ad_performance_report", AD_PERFORMANCE_REPORT),
            ("search_performance_report", SEARCH_PERFORMANCE_REPORT),
            ("keyword_performance_report", KEYWORD_PERFORMANCE_REPORT),
            ("customer_account_properties", CUSTOMER_ACCOUNT_PROPERTIES),
            ("ad_group_performance_report", AD_GROUP_PERFORMANCE_REPORT),
        ]
    }

    fn required_document_types(&self) -> &'static [i64] {
        &[
            CAMPAIGNS,
            ADS,
            AD_GROUPS,
            CAMPAIGN_PERFORMANCE_REPORT,
            AD_PERFORMANCE_REPORT,
            KEYWORD_PERFORMANCE_REPORT,
            AD_GROUP_PERFORMANCE_REPORT,
        ]
    }

    fn level_prefixes(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("campaign", "campaign"),
            ("ad_group", "ad_group"),
            ("keyword", "keyword"),
            ("ad", "ad"),
        ]
    }

    fn metrics(&self) -> &'static [(&'static str, Calc)] {
        METRICS
    }

    fn default_properties(&self) -> &'static [&'static str] {
        &["campaign#name", "ad_group#name", "keyword#text"]
    }

    fn internal_metric_name(&self, metric: &str) -> Option<&'static str> {
        match metric {
            "spend" => Some("cost"),
            "conversion" => Some("conversions"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_names() {
        let spend = Adwords.metric_calc_info("spend").unwrap();
        assert_eq!(spend.value(2_500_000.0, 1.0), 2.5);
        assert!(Adwords.metric_calc_info("conversion").is_some());
        assert!(Adwords.metric_calc_info("reach").is_none());
    }

    #[test]
    fn test_weighted_share() {
        let info = Adwords.metric_calc_info("search_impression_share").unwrap();
        // 0.5 over 100 impressions and 0.2 over 300
        assert!((info.value(50.0 + 60.0, 400.0) - 0.275).abs() < 1e-12);
    }
}
