//! Google Search Console rows.
//!
//! Organic search has no ad hierarchy: every combined report row sits at the
//! campaign level and its properties (`query`, `page`, `country`, `device`)
//! keep their own names.

use super::{
    CalcOperation as Op, ChannelSpec, ConstantOp, MetricCalculationInfo as Calc, PropInfo,
    CAMPAIGN_LEVEL, ORGANIC_OBJECT_TYPE,
};
use crate::error::{Error, Result};

pub struct GoogleOrganic;

const COMBINED_PERFORMANCE_REPORT: i64 = 1;
const PAGE_PERFORMANCE_REPORT: i64 = 2;

const IMPRESSIONS: PropInfo = PropInfo::field("impressions");
const CLICKS: PropInfo = PropInfo::field("clicks");
const POSITION: PropInfo = PropInfo::field("position");
const WEIGHTED_POSITION: PropInfo = PropInfo::weighted_by("position", "impressions");

static METRICS: &[(&str, Calc)] = &[
    ("impressions", Calc::new(&[IMPRESSIONS], Op::Sum)),
    ("clicks", Calc::new(&[CLICKS], Op::Sum)),
    (
        "click_through_rate",
        Calc::new(&[CLICKS, IMPRESSIONS], Op::Quotient).scaled(&[(ConstantOp::Product, 100.0)]),
    ),
    ("position_avg", Calc::new(&[POSITION], Op::Average)),
    (
        "position_impression_weighted_avg",
        Calc::new(&[WEIGHTED_POSITION, IMPRESSIONS], Op::Quotient),
    ),
];

impl ChannelSpec for GoogleOrganic {
    fn source_name(&self) -> &'static str {
        "google_organic"
    }

    fn display_name(&self) -> &'static str {
        "Google Ads"
    }

    fn document_type_alias(&self) -> &'static [(&'static str, i64)] {
        &[
            ("combined_performance_report", COMBINED_PERFORMANCE_REPORT),
            ("page_performance_report", PAGE_PERFORMANCE_REPORT),
        ]
    }

    fn required_document_types(&self) -> &'static [i64] {
        &[COMBINED_PERFORMANCE_REPORT]
    }

    fn level_prefixes(&self) -> &'static [(&'static str, &'static str)] {
        &[(ORGANIC_OBJECT_TYPE, "combined")]
    }

    fn metrics(&self) -> &'static [(&'static str, Calc)] {
        METRICS
    }

    fn default_properties(&self) -> &'static [&'static str] {
        &[
            "organic_property#query",
            "organic_property#page",
            "organic_property#country",
            "organic_property#device",
        ]
    }

    fn object_level(&self, object_type: &str) -> Option<u8> {
        (object_type == ORGANIC_OBJECT_TYPE).then_some(CAMPAIGN_LEVEL)
    }

    fn property_report_name(&self, prop: &str, object_type: &str) -> Result<String> {
        if object_type == ORGANIC_OBJECT_TYPE {
            Ok(prop.to_string())
        } else {
            Err(Error::UnknownObjectType(object_type.to_string()))
        }
    }

    fn property_filter_name(&self, key: &str) -> String {
        key.to_string()
    }
}
