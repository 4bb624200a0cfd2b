//! Within-period aggregation, feature selection and cross-period comparison.
//!
//! A query is scanned twice per period. Pass 1 discovers candidate features;
//! their union over both periods becomes the whitelist that pass 2 is
//! restricted to, so the two snapshots describe the same feature universe.

pub mod cross_period;
pub mod distribution;
pub mod report;
pub mod selection;
pub mod stats;
pub mod within_period;

pub use cross_period::{compute_cross_period_insights, CrossPeriodInsights, DiffSection, JsdSection};
pub use distribution::{FeatureTable, RatioMetrics, SectionMetrics, ValueStats, USERS};
pub use report::{weekly_insights, Headline, InsightKind, InsightRecord, WeeklyInsights};
pub use selection::{FeatureWhitelist, OTHERS_VALUE};
pub use stats::{js_divergence, percent_change, smart_divide, DiffMetric};
pub use within_period::{compute_within_period_insights, Pass, WithinPeriodInsights};
