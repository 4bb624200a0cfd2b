//! Facebook Ads documents. Ad sets play the ad group level.

use super::{
    CalcOperation as Op, ChannelSpec, ConstantOp, Dependency, MetricCalculationInfo as Calc,
    PropInfo,
};

pub struct Facebook;

const CAMPAIGN: i64 = 1;
const AD: i64 = 2;
const AD_SET: i64 = 3;
const AD_INSIGHTS: i64 = 4;
const CAMPAIGN_INSIGHTS: i64 = 5;
const AD_SET_INSIGHTS: i64 = 6;
const AD_ACCOUNT: i64 = 7;

const IMPRESSIONS: PropInfo = PropInfo::field("impressions");
const CLICKS: PropInfo = PropInfo::field("clicks");
const SPEND: PropInfo = PropInfo::field("spend");
const REACH: PropInfo = PropInfo::field("reach");
const LINK_CLICKS: PropInfo = PropInfo::field("inline_link_clicks");
const PURCHASES: PropInfo = PropInfo::field("actions_offsite_conversion.fb_pixel_purchase");
const PURCHASE_VALUE: PropInfo =
    PropInfo::field("action_values_offsite_conversion.fb_pixel_purchase");
// Frequency is undefined for rows that reached nobody.
const FREQUENCY: PropInfo = PropInfo::when("frequency", "reach", Dependency::NotEqual(0.0));

const PERCENT: &[(ConstantOp, f64)] = &[(ConstantOp::Product, 100.0)];

static METRICS: &[(&str, Calc)] = &[
    ("impressions", Calc::new(&[IMPRESSIONS], Op::Sum)),
    ("clicks", Calc::new(&[CLICKS], Op::Sum)),
    ("spend", Calc::new(&[SPEND], Op::Sum)),
    ("reach", Calc::new(&[REACH], Op::Sum)),
    ("link_clicks", Calc::new(&[LINK_CLICKS], Op::Sum)),
    ("frequency", Calc::new(&[FREQUENCY], Op::Average)),
    ("cost_per_click", Calc::new(&[SPEND, CLICKS], Op::Quotient)),
    ("cost_per_link_click", Calc::new(&[SPEND, LINK_CLICKS], Op::Quotient)),
    (
        "cost_per_thousand_impressions",
        Calc::new(&[SPEND, IMPRESSIONS], Op::Quotient).scaled(&[(ConstantOp::Product, 1000.0)]),
    ),
    ("click_through_rate", Calc::new(&[CLICKS, IMPRESSIONS], Op::Quotient).scaled(PERCENT)),
    (
        "link_click_through_rate",
        Calc::new(&[LINK_CLICKS, IMPRESSIONS], Op::Quotient).scaled(PERCENT),
    ),
    ("fb_pixel_purchase_count", Calc::new(&[PURCHASES], Op::Sum)),
    ("fb_pixel_purchase_revenue", Calc::new(&[PURCHASE_VALUE], Op::Sum)),
    ("fb_pixel_purchase_roas", Calc::new(&[PURCHASE_VALUE, SPEND], Op::Quotient)),
    ("fb_pixel_purchase_cost_per_action_type", Calc::new(&[SPEND, PURCHASES], Op::Quotient)),
];

impl ChannelSpec for Facebook {
    fn source_name(&self) -> &'static str {
        "facebook"
    }

    fn display_name(&self) -> &'static str {
        "Facebook Ads"
    }

    fn document_type_alias(&self) -> &'static [(&'static str, i64)] {
        &[
            ("campaign", CAMPAIGN),
            ("ad", AD),
            ("ad_set", AD_SET),
            ("ad_insights", AD_INSIGHTS),
            ("campaign_insights", CAMPAIGN_INSIGHTS),
            ("ad_set_insights", AD_SET_INSIGHTS),
            ("ad_account", AD_ACCOUNT),
        ]
    }

    fn required_document_types(&self) -> &'static [i64] {
        &[CAMPAIGN, AD, AD_SET, AD_INSIGHTS, CAMPAIGN_INSIGHTS, AD_SET_INSIGHTS]
    }

    fn level_prefixes(&self) -> &'static [(&'static str, &'static str)] {
        &[("campaign", "campaign"), ("ad_group", "ad_set"), ("ad", "ad")]
    }

    fn metrics(&self) -> &'static [(&'static str, Calc)] {
        METRICS
    }

    fn default_properties(&self) -> &'static [&'static str] {
        &["campaign#name", "ad_group#name", "ad#name"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kpi::channel::{evaluate_channel_metric, Channel};
    use std::io::Cursor;

    #[test]
    fn test_frequency_skips_unreached_rows() {
        let docs = [
            r#"{"id":"1","type":5,"value":{"campaign_name":"Spring","frequency":2.0,"reach":100}}"#,
            r#"{"id":"2","type":5,"value":{"campaign_name":"Spring","frequency":4.0,"reach":50}}"#,
            r#"{"id":"3","type":5,"value":{"campaign_name":"Dormant","frequency":9.0,"reach":0}}"#,
        ]
        .join("\n");
        let (info, _, _) = evaluate_channel_metric(
            Cursor::new(docs),
            Channel::Facebook,
            "frequency",
            &[],
            &["campaign#name".to_string()],
        )
        .unwrap();
        assert_eq!(info.global, 3.0);
        assert_eq!(info.feat.get("campaign#name", "Spring"), Some(&3.0));
        assert!(info.feat.get("campaign#name", "Dormant").is_none());
    }
}
