//! Query definitions as they arrive from stored dashboard units.
//!
//! Two families live here:
//!
//! - **Criteria queries** ([`Query`], [`MultiFunnelQuery`]) drive the matcher. Their
//!   operator strings decode straight into enums, so a definition with an unknown
//!   operator fails at load time instead of silently never matching.
//! - **KPI query groups** ([`KpiQueryGroup`]) drive the KPI engine. Their filter
//!   conditions stay strings on the wire and are parsed at evaluation, where an
//!   unknown condition aborts only the metric being computed.

use crate::error::{Error, Result};
use crate::types::{PropertyEntity, SESSION_EVENT};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

// ============================================
// Operators
// ============================================

/// Comparison applied by a single filter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "equals", alias = "=")]
    Equals,
    #[serde(rename = "notEqual", alias = "!=")]
    NotEqual,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "notContains")]
    NotContains,
    #[serde(rename = "greaterThan", alias = ">")]
    GreaterThan,
    #[serde(rename = "lesserThan", alias = "<")]
    LesserThan,
    #[serde(rename = "greaterThanOrEqual", alias = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = "lesserThanOrEqual", alias = "<=")]
    LesserThanOrEqual,
    #[serde(rename = "between")]
    Between,
    #[serde(rename = "notInBetween")]
    NotInBetween,
}

impl FilterOperator {
    /// Negated conditions are satisfied by a missing property.
    pub fn is_negated(&self) -> bool {
        matches!(
            self,
            FilterOperator::NotEqual | FilterOperator::NotContains | FilterOperator::NotInBetween
        )
    }
}

impl FromStr for FilterOperator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let op = match s {
            "equals" | "=" => FilterOperator::Equals,
            "notEqual" | "!=" => FilterOperator::NotEqual,
            "contains" => FilterOperator::Contains,
            "notContains" => FilterOperator::NotContains,
            "greaterThan" | ">" => FilterOperator::GreaterThan,
            "lesserThan" | "<" => FilterOperator::LesserThan,
            "greaterThanOrEqual" | ">=" => FilterOperator::GreaterThanOrEqual,
            "lesserThanOrEqual" | "<=" => FilterOperator::LesserThanOrEqual,
            "between" => FilterOperator::Between,
            "notInBetween" => FilterOperator::NotInBetween,
            other => return Err(Error::UnknownOperator(other.to_string())),
        };
        Ok(op)
    }
}

/// Connective joining a filter value to the ones before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogicalOp {
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
    /// Leading entries usually carry no connective.
    #[default]
    #[serde(rename = "")]
    Unset,
}

impl FromStr for LogicalOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "AND" => Ok(LogicalOp::And),
            "OR" => Ok(LogicalOp::Or),
            other => Err(Error::UnknownLogicalOp(other.to_string())),
        }
    }
}

/// Data type a filter compares as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    Categorical,
    Numerical,
    Datetime,
}

/// Boolean combination of the criteria inside one [`EventsCriteria`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CriteriaOperator {
    #[default]
    And,
    Or,
}

impl fmt::Display for CriteriaOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CriteriaOperator::And => f.write_str("And"),
            CriteriaOperator::Or => f.write_str("Or"),
        }
    }
}

// ============================================
// Criteria queries
// ============================================

/// One `(operator, value, connective)` triple of a filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterValue {
    #[serde(rename = "Operator")]
    pub operator: FilterOperator,
    #[serde(rename = "Value")]
    pub value: String,
    #[serde(rename = "LogicalOp", default)]
    pub logical_op: LogicalOp,
}

/// Window used by datetime filters, unix seconds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateTimeRange {
    #[serde(rename = "fr")]
    pub from: i64,
    pub to: i64,
}

impl DateTimeRange {
    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

/// Filter on one property of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFilterCriterion {
    #[serde(default)]
    pub id: i64,
    pub key: String,
    #[serde(rename = "Type")]
    pub property_type: PropertyType,
    #[serde(rename = "Values", default)]
    pub values: Vec<FilterValue>,
    #[serde(rename = "propmode")]
    pub entity: PropertyEntity,
}

/// Event name test plus property filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventCriterion {
    #[serde(default)]
    pub id: i64,
    #[serde(rename = "en")]
    pub name: String,
    /// `true` requires the name to match, `false` requires it to differ.
    #[serde(rename = "eq", default = "default_true")]
    pub equality: bool,
    #[serde(rename = "filters", default)]
    pub filters: Vec<EventFilterCriterion>,
}

fn default_true() -> bool {
    true
}

/// AND/OR of event criteria; one side of a query or one funnel stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventsCriteria {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub op: CriteriaOperator,
    #[serde(rename = "events", default)]
    pub criteria: Vec<EventCriterion>,
}

impl EventsCriteria {
    /// Criteria matching a single event name without filters.
    pub fn single(name: &str) -> Self {
        Self {
            id: 0,
            op: CriteriaOperator::And,
            criteria: vec![EventCriterion {
                id: 0,
                name: name.to_string(),
                equality: true,
                filters: vec![],
            }],
        }
    }

    /// An empty list matches the first event it sees.
    pub fn is_catch_all(&self) -> bool {
        self.criteria.is_empty()
    }

    /// True when any criterion selects the session marker.
    pub fn targets_event(&self, name: &str) -> bool {
        self.criteria.iter().any(|c| c.equality && c.name == name)
    }

    fn validate(&self, side: &str) -> Result<()> {
        if self.is_catch_all() {
            tracing::warn!(side, "empty criteria list matches the first event unconditionally");
        }
        for criterion in &self.criteria {
            for filter in &criterion.filters {
                validate_filter(filter).map_err(|msg| {
                    Error::Query(format!(
                        "{} criterion {:?}, filter on {:?}: {}",
                        side, criterion.name, filter.key, msg
                    ))
                })?;
            }
        }
        Ok(())
    }
}

fn validate_filter(filter: &EventFilterCriterion) -> std::result::Result<(), String> {
    for value in &filter.values {
        match filter.property_type {
            PropertyType::Numerical => {
                if value.value.trim().parse::<f64>().is_err() {
                    return Err(format!("{:?} is not a number", value.value));
                }
            }
            PropertyType::Datetime => {
                if DateTimeRange::decode(&value.value).is_none() {
                    return Err(format!("{:?} is not a datetime range", value.value));
                }
            }
            PropertyType::Categorical => {}
        }
    }
    Ok(())
}

/// Two-sided "did base, then target" query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub id: i64,
    pub base: EventsCriteria,
    pub target: EventsCriteria,
}

impl Query {
    pub fn new(base: EventsCriteria, target: EventsCriteria) -> Self {
        Self { id: 0, base, target }
    }

    /// Base properties are not reported when the target is the session marker.
    pub fn is_session_target(&self) -> bool {
        self.target.targets_event(SESSION_EVENT)
    }
}

/// Ordered funnel: base, then every intermediate stage, then target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiFunnelQuery {
    #[serde(default)]
    pub id: i64,
    pub base: EventsCriteria,
    #[serde(default)]
    pub intermediate: Vec<EventsCriteria>,
    pub target: EventsCriteria,
}

impl MultiFunnelQuery {
    /// All stages in order.
    pub fn stages(&self) -> Vec<&EventsCriteria> {
        std::iter::once(&self.base)
            .chain(self.intermediate.iter())
            .chain(std::iter::once(&self.target))
            .collect()
    }
}

/// How a criteria query is evaluated per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "query", rename_all = "snake_case")]
pub enum QueryShape {
    /// Base and target matched independently, then linked.
    TwoSided(Query),
    /// Only the target side; every occurrence is its own summary.
    EventOccurrence(Query),
    /// N-stage chain.
    Funnel(MultiFunnelQuery),
}

impl QueryShape {
    pub fn id(&self) -> i64 {
        match self {
            QueryShape::TwoSided(q) | QueryShape::EventOccurrence(q) => q.id,
            QueryShape::Funnel(q) => q.id,
        }
    }

    pub fn is_funnel(&self) -> bool {
        matches!(self, QueryShape::Funnel(_))
    }

    /// Rejects filters that can never evaluate.
    pub fn validate(&self) -> Result<()> {
        match self {
            QueryShape::TwoSided(q) => {
                q.base.validate("base")?;
                q.target.validate("target")
            }
            QueryShape::EventOccurrence(q) => q.target.validate("target"),
            QueryShape::Funnel(q) => {
                for (i, stage) in q.stages().into_iter().enumerate() {
                    stage.validate(&format!("stage {}", i))?;
                }
                Ok(())
            }
        }
    }

    /// sha256 of the canonical JSON form. Snapshots of different shapes never diff.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}

// ============================================
// KPI queries
// ============================================

/// Filter of a KPI query. Conditions are decoded lazily.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KpiFilter {
    #[serde(rename = "objTy", default)]
    pub object_type: String,
    #[serde(rename = "prNa")]
    pub property_name: String,
    #[serde(rename = "prDaTy", default)]
    pub property_data_type: String,
    #[serde(rename = "isPrMa", default)]
    pub is_property_mapping: bool,
    #[serde(rename = "en", default)]
    pub entity: String,
    #[serde(rename = "co")]
    pub condition: String,
    #[serde(rename = "va", default)]
    pub value: String,
    #[serde(rename = "lOp", default)]
    pub logical_op: String,
}

impl KpiFilter {
    pub fn operator(&self) -> Result<FilterOperator> {
        self.condition.parse()
    }

    pub fn logical(&self) -> Result<LogicalOp> {
        self.logical_op.parse()
    }

    /// Property map the filter reads; `None` means either map.
    pub fn entity(&self) -> Option<PropertyEntity> {
        self.entity.parse().ok()
    }
}

/// One KPI query: a display category, its metrics and filters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KpiQuery {
    #[serde(rename = "ca", default)]
    pub category: String,
    #[serde(rename = "dc")]
    pub display_category: String,
    #[serde(rename = "pgUrl", default)]
    pub page_url: String,
    #[serde(rename = "me", default)]
    pub metrics: Vec<String>,
    #[serde(rename = "fil", default)]
    pub filters: Vec<KpiFilter>,
    /// Time-series variant of a query; only the aggregate variant is evaluated.
    #[serde(rename = "gbt", default)]
    pub group_by_timestamp: String,
    /// Overrides the category's default breakdown properties (`ep#name` / `up#name`).
    #[serde(rename = "props", default)]
    pub properties: Vec<String>,
}

/// Group of KPI queries sharing global filters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KpiQueryGroup {
    #[serde(default)]
    pub id: i64,
    #[serde(rename = "cl", default)]
    pub class: String,
    #[serde(rename = "qG", default)]
    pub queries: Vec<KpiQuery>,
    #[serde(rename = "gFil", default)]
    pub global_filters: Vec<KpiFilter>,
}

impl KpiQueryGroup {
    /// Queries that compute one aggregate value per period.
    pub fn aggregate_queries(&self) -> impl Iterator<Item = &KpiQuery> {
        self.queries
            .iter()
            .filter(|q| q.group_by_timestamp.is_empty())
    }

    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}
