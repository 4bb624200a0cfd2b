//! Ad-channel KPIs over normalized channel documents.
//!
//! Every channel exposes the same capability through [`ChannelSpec`]: which
//! document types it reads, how a document type name maps to a level
//! (campaign, ad group, keyword/ad), how filter property names translate to
//! the field names documents carry, and a static table of metric recipes.
//! [`evaluate_channel_metric`] is the one accumulation pass shared by all of
//! them.
//!
//! Documents come in two kinds. Reports (`*_performance_report`,
//! `*_insights`) carry the numbers; the remaining entity documents
//! (campaigns, ad groups, ...) only contribute attributes, which are joined
//! onto reports of the same level by document id.

mod adwords;
mod bingads;
mod facebook;
mod google_organic;
mod linkedin;

use super::accumulator::{present_features, Amount, FeatureAccumulator, Fraction};
use super::filter::{condition_holds, passes_filters};
use super::MetricInfo;
use crate::error::{Error, Result};
use crate::query::KpiFilter;
use crate::source::{try_scan_jsonl, ScanStats};
use crate::types::{value_as_f64, ChannelDocument, Properties};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::io::BufRead;
use std::str::FromStr;

pub const CAMPAIGN_LEVEL: u8 = 3;
pub const AD_GROUP_LEVEL: u8 = 2;
pub const KEYWORD_LEVEL: u8 = 1;
pub const AD_LEVEL: u8 = 1;

/// Filter object type matched against the channel's display name.
pub const CHANNEL_OBJECT_TYPE: &str = "channel";
/// Filter object type of organic search properties.
pub const ORGANIC_OBJECT_TYPE: &str = "organic_property";
/// Feature key of the per-channel breakdown in all-channel metrics.
pub const CHANNEL_NAME_FEATURE: &str = "channel#channel_name";

/// Level of a paid-channel object type.
pub fn level_of(object_type: &str) -> Option<u8> {
    match object_type {
        "campaign" => Some(CAMPAIGN_LEVEL),
        "ad_group" => Some(AD_GROUP_LEVEL),
        "keyword" => Some(KEYWORD_LEVEL),
        "ad" => Some(AD_LEVEL),
        _ => None,
    }
}

// ============================================
// Metric recipes
// ============================================

/// How the accumulated property values combine into the metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalcOperation {
    Sum,
    Quotient,
    Average,
}

/// Post-scaling step applied to the combined value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstantOp {
    Sum,
    Quotient,
    Product,
    Difference,
}

impl FromStr for ConstantOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sum" => Ok(ConstantOp::Sum),
            "quotient" => Ok(ConstantOp::Quotient),
            "product" => Ok(ConstantOp::Product),
            "difference" => Ok(ConstantOp::Difference),
            other => Err(Error::UnknownOperation(other.to_string())),
        }
    }
}

impl fmt::Display for ConstantOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConstantOp::Sum => "sum",
            ConstantOp::Quotient => "quotient",
            ConstantOp::Product => "product",
            ConstantOp::Difference => "difference",
        })
    }
}

/// Applies one constant step. Dividing by 0 yields 0.
pub fn perform_operation(op: ConstantOp, value: f64, constant: f64) -> f64 {
    match op {
        ConstantOp::Sum => value + constant,
        ConstantOp::Difference => value - constant,
        ConstantOp::Product => value * constant,
        ConstantOp::Quotient => {
            if constant == 0.0 {
                0.0
            } else {
                value / constant
            }
        }
    }
}

/// Relation between a property and a second field of the same document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dependency {
    /// Use the property only when the field equals the value.
    Equals(f64),
    /// Use the property only when the field differs from the value.
    NotEqual(f64),
    /// Multiply the property by the field.
    Product,
}

/// One document field read by a recipe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropInfo {
    pub name: &'static str,
    pub dependent: Option<(&'static str, Dependency)>,
    /// `(from, to)` substitutions applied to the accumulated value.
    pub replace_values: &'static [(f64, f64)],
}

impl PropInfo {
    pub const fn field(name: &'static str) -> Self {
        Self {
            name,
            dependent: None,
            replace_values: &[],
        }
    }

    pub const fn weighted_by(name: &'static str, weight: &'static str) -> Self {
        Self {
            name,
            dependent: Some((weight, Dependency::Product)),
            replace_values: &[],
        }
    }

    pub const fn when(name: &'static str, key: &'static str, dependency: Dependency) -> Self {
        Self {
            name,
            dependent: Some((key, dependency)),
            replace_values: &[],
        }
    }

    pub const fn replacing(mut self, replace_values: &'static [(f64, f64)]) -> Self {
        self.replace_values = replace_values;
        self
    }

    fn substitute(&self, value: f64) -> f64 {
        self.replace_values
            .iter()
            .find(|(from, _)| *from == value)
            .map(|(_, to)| *to)
            .unwrap_or(value)
    }

    /// Value this property contributes for one document, or `None` when the
    /// document is not eligible for it.
    fn read(&self, doc: &Properties, extra: &Properties) -> Option<f64> {
        let mut factor = 1.0;
        if let Some((key, dependency)) = self.dependent {
            let dep = lookup_either(doc, extra, key).and_then(value_as_f64)?;
            match dependency {
                Dependency::Equals(expected) if dep != expected => return None,
                Dependency::NotEqual(excluded) if dep == excluded => return None,
                Dependency::Product => factor = dep,
                _ => {}
            }
        }
        let value = lookup_either(doc, extra, self.name).and_then(value_as_f64)?;
        Some(value * factor)
    }
}

/// Recipe of one channel metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricCalculationInfo {
    pub props: &'static [PropInfo],
    pub operation: CalcOperation,
    pub constants: &'static [(ConstantOp, f64)],
}

impl MetricCalculationInfo {
    pub const fn new(props: &'static [PropInfo], operation: CalcOperation) -> Self {
        Self {
            props,
            operation,
            constants: &[],
        }
    }

    pub const fn scaled(mut self, constants: &'static [(ConstantOp, f64)]) -> Self {
        self.constants = constants;
        self
    }

    /// Combines accumulated numerator and denominator into the metric value.
    pub fn value(&self, first: f64, second: f64) -> f64 {
        let first = self.props.first().map_or(first, |p| p.substitute(first));
        let second = self.props.get(1).map_or(second, |p| p.substitute(second));
        let mut value = match self.operation {
            CalcOperation::Sum => first,
            CalcOperation::Quotient | CalcOperation::Average => {
                if first == 0.0 || second == 0.0 {
                    0.0
                } else {
                    first / second
                }
            }
        };
        for (op, constant) in self.constants {
            value = perform_operation(*op, value, *constant);
        }
        value
    }
}

fn lookup_either<'a>(doc: &'a Properties, extra: &'a Properties, key: &str) -> Option<&'a Value> {
    doc.get(key).or_else(|| extra.get(key))
}

// ============================================
// Channel capability
// ============================================

/// Role of a document type within a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocKind {
    /// Performance report rows carrying metric values.
    Report,
    /// Entity documents whose fields are joined onto reports.
    Entity,
}

pub trait ChannelSpec: Sync {
    /// Name of the channel's document stream.
    fn source_name(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    /// `(name, type)` of every document type the channel produces.
    fn document_type_alias(&self) -> &'static [(&'static str, i64)];

    /// Document types the evaluator reads; everything else is skipped.
    fn required_document_types(&self) -> &'static [i64];

    /// `(object type, prefix)`: document type names starting with the prefix
    /// belong to the object type's level, and the object's fields carry the
    /// prefix in reports.
    fn level_prefixes(&self) -> &'static [(&'static str, &'static str)];

    fn metrics(&self) -> &'static [(&'static str, MetricCalculationInfo)];

    /// Breakdown properties used when a query names none.
    fn default_properties(&self) -> &'static [&'static str];

    /// Internal name of a metric exposed under another name.
    fn internal_metric_name(&self, _metric: &str) -> Option<&'static str> {
        None
    }

    fn metric_calc_info(&self, metric: &str) -> Option<&'static MetricCalculationInfo> {
        let name = self.internal_metric_name(metric).unwrap_or(metric);
        self.metrics()
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, info)| info)
    }

    fn object_level(&self, object_type: &str) -> Option<u8> {
        level_of(object_type)
    }

    /// Field name reports use for `prop` of `object_type`, e.g.
    /// `("name", "campaign")` to `campaign_name`.
    fn property_report_name(&self, prop: &str, object_type: &str) -> Result<String> {
        self.level_prefixes()
            .iter()
            .find(|(ty, _)| *ty == object_type)
            .map(|(_, prefix)| format!("{}_{}", prefix, prop))
            .ok_or_else(|| Error::UnknownObjectType(object_type.to_string()))
    }

    /// Inverse of [`property_report_name`](Self::property_report_name) on a
    /// `tag#field` feature key.
    fn property_filter_name(&self, key: &str) -> String {
        let Some((tag, field)) = key.split_once('#') else {
            return key.to_string();
        };
        self.level_prefixes()
            .iter()
            .find(|(ty, _)| *ty == tag)
            .and_then(|(_, prefix)| field.strip_prefix(prefix))
            .and_then(|rest| rest.strip_prefix('_'))
            .map(|prop| format!("{}#{}", tag, prop))
            .unwrap_or_else(|| key.to_string())
    }

    fn document_type_name(&self, doc_type: i64) -> Option<&'static str> {
        self.document_type_alias()
            .iter()
            .find(|(_, ty)| *ty == doc_type)
            .map(|(name, _)| *name)
    }

    /// Level and kind of a document type; `None` for types with no level.
    fn classify_document(&self, doc_type: i64) -> Option<(u8, DocKind)> {
        let name = self.document_type_name(doc_type)?;
        let level = self
            .level_prefixes()
            .iter()
            .filter(|(_, prefix)| name.starts_with(prefix))
            .filter_map(|(ty, _)| self.object_level(ty))
            .max()?;
        let kind = if name.ends_with("performance_report") || name.ends_with("insights") {
            DocKind::Report
        } else {
            DocKind::Entity
        };
        Some((level, kind))
    }
}

/// Ad platforms with a channel evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Adwords,
    Bingads,
    Facebook,
    Linkedin,
    GoogleOrganic,
}

impl Channel {
    /// Evaluation order of all-channel metrics.
    pub const ALL: [Channel; 5] = [
        Channel::Adwords,
        Channel::Bingads,
        Channel::Linkedin,
        Channel::Facebook,
        Channel::GoogleOrganic,
    ];

    pub fn spec(self) -> &'static dyn ChannelSpec {
        match self {
            Channel::Adwords => &adwords::Adwords,
            Channel::Bingads => &bingads::Bingads,
            Channel::Facebook => &facebook::Facebook,
            Channel::Linkedin => &linkedin::Linkedin,
            Channel::GoogleOrganic => &google_organic::GoogleOrganic,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.spec().source_name()
    }

    pub fn from_display_category(category: &str) -> Option<Self> {
        match category {
            "google_ads_metrics" | "adwords_metrics" => Some(Channel::Adwords),
            "bing_ads_metrics" => Some(Channel::Bingads),
            "facebook_metrics" => Some(Channel::Facebook),
            "linkedin_metrics" => Some(Channel::Linkedin),
            "google_organic_metrics" => Some(Channel::GoogleOrganic),
            _ => None,
        }
    }

    pub fn display_category(self) -> &'static str {
        match self {
            Channel::Adwords => "google_ads_metrics",
            Channel::Bingads => "bing_ads_metrics",
            Channel::Facebook => "facebook_metrics",
            Channel::Linkedin => "linkedin_metrics",
            Channel::GoogleOrganic => "google_organic_metrics",
        }
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::Config(format!("unknown channel: {}", s)))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================
// Evaluation
// ============================================

/// Finest level the filters address; `organic_property` pins the campaign level.
pub fn query_level(spec: &dyn ChannelSpec, filters: &[KpiFilter]) -> Result<u8> {
    let mut level = CAMPAIGN_LEVEL;
    for filter in filters {
        match filter.object_type.as_str() {
            CHANNEL_OBJECT_TYPE => continue,
            ORGANIC_OBJECT_TYPE => return Ok(CAMPAIGN_LEVEL),
            other => {
                let object_level = spec
                    .object_level(other)
                    .ok_or_else(|| Error::UnknownObjectType(other.to_string()))?;
                level = level.min(object_level);
            }
        }
    }
    Ok(level)
}

/// Whether every `channel` filter accepts this channel's display name.
fn channel_filters_hold(spec: &dyn ChannelSpec, filters: &[KpiFilter]) -> Result<bool> {
    let display = Value::String(spec.display_name().to_string());
    for filter in filters
        .iter()
        .filter(|f| f.object_type == CHANNEL_OBJECT_TYPE)
    {
        if !condition_holds(filter, filter.operator()?, &display)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Document filters with property names rewritten to report field names.
fn document_filters(spec: &dyn ChannelSpec, filters: &[KpiFilter]) -> Result<Vec<KpiFilter>> {
    filters
        .iter()
        .filter(|f| f.object_type != CHANNEL_OBJECT_TYPE)
        .map(|f| {
            let mut translated = f.clone();
            translated.property_name = spec.property_report_name(&f.property_name, &f.object_type)?;
            Ok(translated)
        })
        .collect()
}

/// `(level, tag#field)` of the breakdown properties visible at `query_level`.
fn level_properties(
    spec: &dyn ChannelSpec,
    props: &[String],
    query_level: u8,
) -> Vec<(u8, String)> {
    props
        .iter()
        .filter_map(|prop| {
            let (tag, name) = prop.split_once('#')?;
            if tag == CHANNEL_OBJECT_TYPE {
                return None;
            }
            let level = spec.object_level(tag)?;
            if level > query_level {
                return None;
            }
            match spec.property_report_name(name, tag) {
                Ok(field) => Some((level, format!("{}#{}", tag, field))),
                Err(e) => {
                    tracing::debug!(
                        channel = spec.source_name(),
                        prop = %prop,
                        error = %e,
                        "skipping property"
                    );
                    None
                }
            }
        })
        .collect()
}

/// A report row cut down to the fields the evaluation reads.
#[derive(Debug)]
struct PendingReport {
    id: String,
    fields: Properties,
}

impl PendingReport {
    /// Document values win over smart properties, as in [`lookup_either`].
    fn project(doc: ChannelDocument, wanted: &BTreeSet<&str>) -> Self {
        let ChannelDocument {
            id,
            value,
            smart_properties,
            ..
        } = doc;
        let fields = wanted
            .iter()
            .filter_map(|key| {
                let v = value.get(*key).or_else(|| smart_properties.get(*key))?;
                Some((key.to_string(), v.clone()))
            })
            .collect();
        Self { id, fields }
    }
}

/// Field names read by the calculation, the filters and the breakdowns.
fn read_fields<'a>(
    calc: &'a MetricCalculationInfo,
    filters: &'a [KpiFilter],
    props: &'a [(u8, String)],
) -> BTreeSet<&'a str> {
    let mut fields = BTreeSet::new();
    for prop in calc.props {
        fields.insert(prop.name);
        if let Some((key, _)) = prop.dependent {
            fields.insert(key);
        }
    }
    fields.extend(filters.iter().map(|f| f.property_name.as_str()));
    fields.extend(props.iter().filter_map(|(_, p)| p.split_once('#').map(|(_, n)| n)));
    fields
}

fn rename_features(spec: &dyn ChannelSpec, info: MetricInfo) -> MetricInfo {
    let mut renamed = MetricInfo {
        global: info.global,
        ..Default::default()
    };
    for (key, value, v) in info.feat.entries() {
        *renamed.feat.upsert(&spec.property_filter_name(key), value) += *v;
    }
    renamed
}

/// Evaluates one metric of a channel over its document stream.
///
/// Documents below the query level only feed feature values; the global value
/// comes from documents at the query level.
pub fn evaluate_channel_metric<R: BufRead>(
    reader: R,
    channel: Channel,
    metric: &str,
    filters: &[KpiFilter],
    props: &[String],
) -> Result<(MetricInfo, MetricInfo, ScanStats)> {
    let spec = channel.spec();
    let calc = spec
        .metric_calc_info(metric)
        .ok_or_else(|| Error::UnknownMetric {
            category: channel.display_category().to_string(),
            metric: metric.to_string(),
        })?;
    if !channel_filters_hold(spec, filters)? {
        tracing::debug!(channel = %channel, "channel filtered out");
        return Ok(Default::default());
    }
    let doc_filters = document_filters(spec, filters)?;
    let level = query_level(spec, &doc_filters)?;
    let props = level_properties(spec, props, level);
    let wanted = read_fields(calc, &doc_filters, &props);

    // Entity documents may follow their reports, so reports wait for the join.
    // Rows at levels that contribute nothing are never kept.
    let mut associated: HashMap<(u8, String), Properties> = HashMap::new();
    let mut reports: BTreeMap<u8, Vec<PendingReport>> = BTreeMap::new();
    let stats = try_scan_jsonl(reader, |doc: ChannelDocument| {
        if !spec.required_document_types().contains(&doc.doc_type) {
            return Ok(());
        }
        let Some((doc_level, kind)) = spec.classify_document(doc.doc_type) else {
            return Ok(());
        };
        if doc_level > level {
            return Ok(());
        }
        match kind {
            DocKind::Entity => {
                if !doc.id.is_empty() && doc.id != "0" {
                    associated
                        .entry((doc_level, doc.id))
                        .or_default()
                        .extend(doc.value);
                }
            }
            DocKind::Report => {
                if doc_level == level || props.iter().any(|(l, _)| *l == doc_level) {
                    reports
                        .entry(doc_level)
                        .or_default()
                        .push(PendingReport::project(doc, &wanted));
                }
            }
        }
        Ok(())
    })?;

    let no_entity = Properties::new();
    let mut acc = FeatureAccumulator::new();
    for (doc_level, pending) in reports {
        let at_query_level = doc_level == level;
        let doc_props: Vec<String> = props
            .iter()
            .filter(|(l, _)| *l == doc_level)
            .map(|(_, p)| p.clone())
            .collect();
        for report in pending {
            let extra = associated
                .get(&(doc_level, report.id))
                .unwrap_or(&no_entity);
            let fields = &report.fields;
            if !passes_filters(&doc_filters, |f| {
                lookup_either(fields, extra, &f.property_name)
            })? {
                continue;
            }
            let features =
                present_features(&doc_props, |_, name| lookup_either(fields, extra, name));

            let (numerator, denominator) = match calc.operation {
                CalcOperation::Sum => {
                    match calc.props.first().and_then(|p| p.read(fields, extra)) {
                        Some(v) if v != 0.0 => (v, 0.0),
                        _ => continue,
                    }
                }
                CalcOperation::Quotient | CalcOperation::Average => {
                    let first = calc.props.first().and_then(|p| p.read(fields, extra));
                    let second = if calc.operation == CalcOperation::Average {
                        first.map(|_| 1.0)
                    } else {
                        calc.props.get(1).and_then(|p| p.read(fields, extra))
                    };
                    let (n, d) = (first.unwrap_or(0.0), second.unwrap_or(0.0));
                    if n == 0.0 && d == 0.0 {
                        continue;
                    }
                    (n, d)
                }
            };
            acc.count_scale_where(&features, at_query_level);
            acc.add(
                "",
                &features,
                Amount::Value(numerator),
                Amount::Value(denominator),
                at_query_level,
            );
        }
    }

    let (info, scale) = acc.finish(|f: Fraction| match calc.operation {
        CalcOperation::Sum => calc.value(f.numerator, 1.0),
        _ => calc.value(f.numerator, f.denominator),
    });
    tracing::debug!(
        channel = %channel,
        metric,
        level,
        global = info.global,
        "channel metric evaluated"
    );
    Ok((rename_features(spec, info), rename_features(spec, scale), stats))
}

/// Sums a metric over every channel that defines it and adds a
/// `channel#channel_name` breakdown by display name.
///
/// A channel whose stream cannot be opened or evaluated is logged and left out.
pub fn evaluate_all_channels<R: BufRead>(
    mut open: impl FnMut(Channel) -> Result<R>,
    metric: &str,
    filters: &[KpiFilter],
    props: &[String],
) -> Result<(MetricInfo, MetricInfo, ScanStats)> {
    let mut total = MetricInfo::default();
    let mut total_scale = MetricInfo::default();
    let mut stats = ScanStats::default();

    for channel in Channel::ALL {
        let spec = channel.spec();
        if spec.metric_calc_info(metric).is_none() {
            tracing::debug!(channel = %channel, metric, "metric not defined for channel");
            continue;
        }
        let result = open(channel)
            .and_then(|reader| evaluate_channel_metric(reader, channel, metric, filters, props));
        let (info, scale, scanned) = match result {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(channel = %channel, metric, error = %e, "skipping channel");
                continue;
            }
        };
        stats.add(scanned);
        if info.global != 0.0 {
            *total.feat.upsert(CHANNEL_NAME_FEATURE, spec.display_name()) += info.global;
            *total_scale
                .feat
                .upsert(CHANNEL_NAME_FEATURE, spec.display_name()) += scale.global;
        }
        total.accumulate(&info);
        total_scale.accumulate(&scale);
    }
    Ok((total, total_scale, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn filter(object_type: &str, name: &str, condition: &str, value: &str) -> KpiFilter {
        KpiFilter {
            object_type: object_type.into(),
            property_name: name.into(),
            property_data_type: "categorical".into(),
            condition: condition.into(),
            value: value.into(),
            logical_op: "AND".into(),
            ..Default::default()
        }
    }

    fn adwords_docs() -> String {
        [
            // campaign entity, then two campaign report rows and an ad group row
            r#"{"id":"11","source":"adwords","type":1,"value":{"campaign_name":"Brand","campaign_status":"enabled"}}"#,
            r#"{"id":"11","source":"adwords","type":5,"value":{"impressions":1000,"clicks":50,"cost":25000000}}"#,
            r#"{"id":"12","source":"adwords","type":5,"value":{"campaign_name":"Generic","impressions":3000,"clicks":30,"cost":"15000000"}}"#,
            r#"{"id":"21","source":"adwords","type":10,"value":{"ad_group_name":"Shoes","impressions":800,"clicks":40,"cost":20000000}}"#,
            r#"{"id":"99","source":"adwords","type":7,"value":{"impressions":5}}"#,
            "not json",
        ]
        .join("\n")
    }

    fn run(
        metric: &str,
        filters: &[KpiFilter],
        props: &[&str],
    ) -> (MetricInfo, MetricInfo, ScanStats) {
        let props: Vec<String> = props.iter().map(|p| p.to_string()).collect();
        let docs = Cursor::new(adwords_docs());
        evaluate_channel_metric(docs, Channel::Adwords, metric, filters, &props).unwrap()
    }

    #[test]
    fn test_perform_operation() {
        assert_eq!(perform_operation(ConstantOp::Product, 0.25, 100.0), 25.0);
        assert_eq!(perform_operation(ConstantOp::Quotient, 5.0, 0.0), 0.0);
        assert_eq!(perform_operation(ConstantOp::Difference, 5.0, 2.0), 3.0);
        assert!("modulo".parse::<ConstantOp>().is_err());
    }

    #[test]
    fn test_value_applies_replacements_then_constants() {
        const SENTINEL: PropInfo = PropInfo::field("clicks").replacing(&[(0.0, 100_000.0)]);
        const PROPS: &[PropInfo] = &[PropInfo::field("spend"), SENTINEL];
        let info = MetricCalculationInfo::new(PROPS, CalcOperation::Quotient)
            .scaled(&[(ConstantOp::Product, 100.0)]);
        assert!((info.value(50.0, 0.0) - 0.05).abs() < 1e-12);
        assert_eq!(info.value(50.0, 25.0), 200.0);
        assert_eq!(info.value(0.0, 25.0), 0.0);
    }

    #[test]
    fn test_dependent_gates() {
        let raw = r#"{"frequency":2.5,"reach":0,"share":0.5,"impressions":10}"#;
        let doc: Properties = serde_json::from_str(raw).unwrap();
        let extra = Properties::new();
        let gated = PropInfo::when("frequency", "reach", Dependency::NotEqual(0.0));
        assert_eq!(gated.read(&doc, &extra), None);
        let eq = PropInfo::when("frequency", "reach", Dependency::Equals(0.0));
        assert_eq!(eq.read(&doc, &extra), Some(2.5));
        let weighted = PropInfo::weighted_by("share", "impressions");
        assert_eq!(weighted.read(&doc, &extra), Some(5.0));
        let missing = PropInfo::weighted_by("share", "clicks");
        assert_eq!(missing.read(&doc, &extra), None);
    }

    #[test]
    fn test_classify_document() {
        let spec = Channel::Adwords.spec();
        assert_eq!(spec.classify_document(10), Some((AD_GROUP_LEVEL, DocKind::Report)));
        assert_eq!(spec.classify_document(5), Some((CAMPAIGN_LEVEL, DocKind::Report)));
        assert_eq!(spec.classify_document(3), Some((AD_GROUP_LEVEL, DocKind::Entity)));
        assert_eq!(spec.classify_document(7), None);

        let linkedin = Channel::Linkedin.spec();
        // campaign_group_insights is the campaign level on LinkedIn
        assert_eq!(linkedin.classify_document(5), Some((CAMPAIGN_LEVEL, DocKind::Report)));
        assert_eq!(linkedin.classify_document(6), Some((AD_GROUP_LEVEL, DocKind::Report)));
    }

    #[test]
    fn test_query_level() {
        let spec = Channel::Adwords.spec();
        assert_eq!(query_level(spec, &[]).unwrap(), CAMPAIGN_LEVEL);
        let filters = [
            filter("campaign", "campaign_name", "equals", "Brand"),
            filter("keyword", "keyword_text", "equals", "shoes"),
        ];
        assert_eq!(query_level(spec, &filters).unwrap(), KEYWORD_LEVEL);
        let organic = [filter(ORGANIC_OBJECT_TYPE, "page", "equals", "/")];
        assert_eq!(query_level(Channel::GoogleOrganic.spec(), &organic).unwrap(), CAMPAIGN_LEVEL);
        let unknown = [filter("audience", "name", "equals", "x")];
        assert!(matches!(query_level(spec, &unknown), Err(Error::UnknownObjectType(_))));
    }

    #[test]
    fn test_property_names_round_trip() {
        let spec = Channel::Facebook.spec();
        assert_eq!(spec.property_report_name("name", "ad_group").unwrap(), "ad_set_name");
        assert_eq!(spec.property_filter_name("ad_group#ad_set_name"), "ad_group#name");
        assert!(spec.property_report_name("name", "keyword").is_err());
    }

    #[test]
    fn test_sum_metric_joins_entity_fields() {
        let (info, scale, stats) = run("impressions", &[], &["campaign#name", "ad_group#name"]);
        // ad group rows sit below the campaign query level: features only
        assert_eq!(info.global, 4000.0);
        assert_eq!(info.feat.get("campaign#name", "Brand"), Some(&1000.0));
        assert_eq!(info.feat.get("campaign#name", "Generic"), Some(&3000.0));
        assert_eq!(info.feat.get("ad_group#name", "Shoes"), Some(&800.0));
        assert_eq!(scale.global, 2.0);
        assert_eq!(scale.feat.get("ad_group#name", "Shoes"), Some(&1.0));
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn test_report_joins_entity_that_follows_it() {
        let docs = [
            r#"{"id":"21","source":"adwords","type":10,"value":{"impressions":800,"cost":1}}"#,
            r#"{"id":"11","source":"adwords","type":5,"value":{"impressions":1000,"notes":"x"}}"#,
            r#"{"id":"21","source":"adwords","type":3,"value":{"ad_group_name":"Shoes"}}"#,
        ]
        .join("\n");
        let props = vec!["ad_group#name".to_string()];
        let (info, _, _) =
            evaluate_channel_metric(Cursor::new(docs), Channel::Adwords, "impressions", &[], &props)
                .unwrap();
        assert_eq!(info.global, 1000.0);
        assert_eq!(info.feat.get("ad_group#name", "Shoes"), Some(&800.0));
    }

    #[test]
    fn test_pending_report_keeps_read_fields_only() {
        let doc: ChannelDocument = serde_json::from_str(
            r#"{"id":"5","type":5,"value":{"clicks":3,"cost":9,"campaign_name":"Brand"}}"#,
        )
        .unwrap();
        let wanted: BTreeSet<&str> = ["clicks", "campaign_name"].into_iter().collect();
        let pending = PendingReport::project(doc, &wanted);
        assert_eq!(pending.id, "5");
        assert_eq!(pending.fields.len(), 2);
        assert!(pending.fields.get("cost").is_none());
    }

    #[test]
    fn test_micros_and_ratios() {
        let (spend, _, _) = run("spend", &[], &["campaign#name"]);
        assert_eq!(spend.global, 40.0);
        assert_eq!(spend.feat.get("campaign#name", "Brand"), Some(&25.0));

        let (ctr, _, _) = run("click_through_rate", &[], &["campaign#name"]);
        assert!((ctr.global - 2.0).abs() < 1e-9);
        let brand = ctr.feat.get("campaign#name", "Brand").copied().unwrap_or_default();
        assert!((brand - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_filters_narrow_documents() {
        let filters = [filter("campaign", "name", "equals", "brand")];
        let (info, _, _) = run("clicks", &filters, &["campaign#name"]);
        assert_eq!(info.global, 50.0);

        let ad_group = [filter("ad_group", "name", "equals", "Shoes")];
        let (info, _, _) = run("clicks", &ad_group, &["ad_group#name"]);
        assert_eq!(info.global, 40.0);
        assert_eq!(info.feat.get("ad_group#name", "Shoes"), Some(&40.0));
    }

    #[test]
    fn test_channel_filter_and_unknown_metric() {
        let only_bing = [filter(CHANNEL_OBJECT_TYPE, "channel_name", "equals", "Bing Ads")];
        let (info, _, _) = run("clicks", &only_bing, &[]);
        assert_eq!(info, MetricInfo::default());

        let result = evaluate_channel_metric(Cursor::new(""), Channel::Adwords, "reach", &[], &[]);
        assert!(matches!(result, Err(Error::UnknownMetric { .. })));
    }

    #[test]
    fn test_all_channels_sum_with_channel_breakdown() {
        let bing = r#"{"id":"7","source":"bingads","type":4,"value":{"campaign_name":"Brand","clicks":10}}"#;
        let (info, _, _) = evaluate_all_channels(
            |channel| match channel {
                Channel::Adwords => Ok(Cursor::new(adwords_docs())),
                Channel::Bingads => Ok(Cursor::new(bing.to_string())),
                other => Err(Error::Config(format!("no documents for {}", other))),
            },
            "clicks",
            &[],
            &["campaign#name".to_string()],
        )
        .unwrap();
        assert_eq!(info.global, 90.0);
        assert_eq!(info.feat.get("campaign#name", "Brand"), Some(&60.0));
        assert_eq!(info.feat.get(CHANNEL_NAME_FEATURE, "Google Ads"), Some(&80.0));
        assert_eq!(info.feat.get(CHANNEL_NAME_FEATURE, "Bing Ads"), Some(&10.0));
    }
}
