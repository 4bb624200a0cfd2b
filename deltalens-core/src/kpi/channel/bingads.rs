use super::{CalcOperation as Op, ChannelSpec, ConstantOp, MetricCalculationInfo as Calc, PropInfo};

pub struct Bingads;

const CAMPAIGNS: i64 = 1;
const AD_GROUPS: i64 = 2;
const KEYWORDS: i64 = 3;
const CAMPAIGN_PERFORMANCE_REPORT: i64 = 4;
const AD_GROUP_PERFORMANCE_REPORT: i64 = 5;
const KEYWORD_PERFORMANCE_REPORT: i64 = 6;
const ACCOUNTS: i64 = 7;

const IMPRESSIONS: PropInfo = PropInfo::field("impressions");
const CLICKS: PropInfo = PropInfo::field("clicks");
const SPEND: PropInfo = PropInfo::field("spend");
const CONVERSIONS: PropInfo = PropInfo::field("conversions");

const PERCENT: &[(ConstantOp, f64)] = &[(ConstantOp::Product, 100.0)];

static METRICS: &[(&str, Calc)] = &[
    ("impressions", Calc::new(&[IMPRESSIONS], Op::Sum)),
    ("clicks", Calc::new(&[CLICKS], Op::Sum)),
    ("spend", Calc::new(&[SPEND], Op::Sum)),
    ("conversions", Calc::new(&[CONVERSIONS], Op::Sum)),
    ("click_through_rate", Calc::new(&[CLICKS, IMPRESSIONS], Op::Quotient).scaled(PERCENT)),
    ("cost_per_click", Calc::new(&[SPEND, CLICKS], Op::Quotient)),
    ("conversion_rate", Calc::new(&[CONVERSIONS, CLICKS], Op::Quotient).scaled(PERCENT)),
    ("cost_per_conversion", Calc::new(&[SPEND, CONVERSIONS], Op::Quotient)),
];

impl ChannelSpec for Bingads {
    fn source_name(&self) -> &'static str {
        "bingads"
    }

    fn display_name(&self) -> &'static str {
        "Bing Ads"
    }

    fn document_type_alias(&self) -> &'static [(&'static str, i64)] {
        &[
            ("campaigns", CAMPAIGNS),
            ("ad_groups", AD_GROUPS),
            ("keywords", KEYWORDS),
            ("campaign_performance_report", CAMPAIGN_PERFORMANCE_REPORT),
            ("ad_group_performance_report", AD_GROUP_PERFORMANCE_REPORT),
            ("keyword_performance_report", KEYWORD_PERFORMANCE_REPORT),
            ("accounts", ACCOUNTS),
        ]
    }

    fn required_document_types(&self) -> &'static [i64] {
        &[
            CAMPAIGNS,
            AD_GROUPS,
            KEYWORDS,
            CAMPAIGN_PERFORMANCE_REPORT,
            AD_GROUP_PERFORMANCE_REPORT,
            KEYWORD_PERFORMANCE_REPORT,
        ]
    }

    fn level_prefixes(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("campaign", "campaign"),
            ("ad_group", "ad_group"),
            ("keyword", "keyword"),
        ]
    }

    fn metrics(&self) -> &'static [(&'static str, Calc)] {
        METRICS
    }

    fn default_properties(&self) -> &'static [&'static str] {
        &["campaign#name", "ad_group#name", "keyword#name"]
    }
}
