//! LinkedIn Ads documents.
//!
//! LinkedIn's hierarchy is shifted by one: campaign groups are the campaign
//! level, campaigns the ad group level and creatives the ad level.

use super::{CalcOperation as Op, ChannelSpec, ConstantOp, MetricCalculationInfo as Calc, PropInfo};

pub struct Linkedin;

const CREATIVE: i64 = 1;
const CAMPAIGN_GROUP: i64 = 2;
const CAMPAIGN: i64 = 3;
const CREATIVE_INSIGHTS: i64 = 4;
const CAMPAIGN_GROUP_INSIGHTS: i64 = 5;
const CAMPAIGN_INSIGHTS: i64 = 6;
const AD_ACCOUNT: i64 = 7;
const MEMBER_COMPANY_INSIGHTS: i64 = 8;

/// Stand-in for a zero count in a denominator.
const ZERO_DENOMINATOR: f64 = 100_000.0;

const IMPRESSIONS: PropInfo = PropInfo::field("impressions");
const CLICKS: PropInfo = PropInfo::field("clicks");
const SPEND: PropInfo = PropInfo::field("costInLocalCurrency");
const CONVERSIONS: PropInfo = PropInfo::field("externalWebsiteConversions");
const CLICKS_DENOMINATOR: PropInfo = CLICKS.replacing(&[(0.0, ZERO_DENOMINATOR)]);
const CONVERSIONS_DENOMINATOR: PropInfo = CONVERSIONS.replacing(&[(0.0, ZERO_DENOMINATOR)]);

const PERCENT: &[(ConstantOp, f64)] = &[(ConstantOp::Product, 100.0)];

static METRICS: &[(&str, Calc)] = &[
    ("impressions", Calc::new(&[IMPRESSIONS], Op::Sum)),
    ("clicks", Calc::new(&[CLICKS], Op::Sum)),
    ("spend", Calc::new(&[SPEND], Op::Sum)),
    ("conversions", Calc::new(&[CONVERSIONS], Op::Sum)),
    ("click_through_rate", Calc::new(&[CLICKS, IMPRESSIONS], Op::Quotient).scaled(PERCENT)),
    ("cost_per_click", Calc::new(&[SPEND, CLICKS_DENOMINATOR], Op::Quotient)),
    ("conversion_rate", Calc::new(&[CONVERSIONS, CLICKS], Op::Quotient).scaled(PERCENT)),
    ("cost_per_conversion", Calc::new(&[SPEND, CONVERSIONS_DENOMINATOR], Op::Quotient)),
];

impl ChannelSpec for Linkedin {
    fn source_name(&self) -> &'static str {
        "linkedin"
    }

    fn display_name(&self) -> &'static str {
        "LinkedIn Ads"
    }

    fn document_type_alias(&self) -> &'static [(&'static str, i64)] {
        &[
            ("creative", CREATIVE),
            ("campaign_group", CAMPAIGN_GROUP),
            ("campaign", CAMPAIGN),
            ("creative_insights", CREATIVE_INSIGHTS),
            ("campaign_group_insights", CAMPAIGN_GROUP_INSIGHTS),
            ("campaign_insights", CAMPAIGN_INSIGHTS),
            ("ad_account", AD_ACCOUNT),
            ("member_company_insights", MEMBER_COMPANY_INSIGHTS),
        ]
    }

    fn required_document_types(&self) -> &'static [i64] {
        &[
            CREATIVE,
            CAMPAIGN_GROUP,
            CAMPAIGN,
            CREATIVE_INSIGHTS,
            CAMPAIGN_GROUP_INSIGHTS,
            CAMPAIGN_INSIGHTS,
        ]
    }

    fn level_prefixes(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("campaign", "campaign_group"),
            ("ad_group", "campaign"),
            ("ad", "creative"),
        ]
    }

    fn metrics(&self) -> &'static [(&'static str, Calc)] {
        METRICS
    }

    fn default_properties(&self) -> &'static [&'static str] {
        &["campaign#id", "campaign#name", "ad_group#id", "ad_group#name"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_clicks_use_sentinel() {
        let cpc = Linkedin.metric_calc_info("cost_per_click").unwrap();
        assert!((cpc.value(50.0, 0.0) - 0.0005).abs() < 1e-12);
        assert_eq!(cpc.value(50.0, 10.0), 5.0);
    }

    #[test]
    fn test_shifted_names() {
        assert_eq!(
            Linkedin.property_report_name("name", "campaign").unwrap(),
            "campaign_group_name"
        );
        assert_eq!(Linkedin.property_report_name("name", "ad_group").unwrap(), "campaign_name");
        assert_eq!(Linkedin.property_filter_name("campaign#campaign_group_name"), "campaign#name");
        assert_eq!(Linkedin.property_filter_name("ad_group#campaign_id"), "ad_group#id");
    }
}
