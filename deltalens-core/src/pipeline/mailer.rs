//! Built-in queries of the weekly insights mailer.

use super::{Unit, UnitQuery};
use crate::kpi::events::FORM_SUBMITTED_EVENT;
use crate::kpi::ALL_CHANNELS_CATEGORY;
use crate::query::{
    EventCriterion, EventFilterCriterion, EventsCriteria, FilterOperator, FilterValue, KpiQuery,
    KpiQueryGroup, LogicalOp, PropertyType, Query, QueryShape,
};
use crate::types::PropertyEntity;

pub const CONTACT_CREATED_EVENT: &str = "$hubspot_contact_created";
pub const CONTACT_SOURCE_PROPERTY: &str = "$hubspot_contact_hs_analytics_source";

/// Query ids of the mailer, in run order.
pub const MAILER_QUERY_IDS: [i64; 6] = [1, 2, 3, 4, 5, 6];

/// Heading the mailer prints above a query's numbers.
pub fn headline(query_id: i64) -> Option<&'static str> {
    match query_id {
        1 => Some("Website Sessions"),
        2 => Some("Form Submitted"),
        3 => Some("Hubspot Contact Created"),
        4 => Some("All Channel Spend"),
        5 => Some("Website Session - Bounce Rate"),
        6 => Some("Average Session Duration"),
        _ => None,
    }
}

fn occurrence(query_id: i64, session_event: &str, target: EventsCriteria) -> UnitQuery {
    UnitQuery::Insights(QueryShape::EventOccurrence(Query {
        id: query_id,
        base: EventsCriteria::single(session_event),
        target,
    }))
}

fn kpi(query_id: i64, category: &str, display_category: &str, metric: &str) -> UnitQuery {
    UnitQuery::Kpi(KpiQueryGroup {
        id: query_id,
        class: "kpi".to_string(),
        queries: vec![KpiQuery {
            category: category.to_string(),
            display_category: display_category.to_string(),
            metrics: vec![metric.to_string()],
            ..Default::default()
        }],
        global_filters: vec![],
    })
}

/// Contacts created by anything but an offline import.
fn online_contacts() -> EventsCriteria {
    EventsCriteria {
        criteria: vec![EventCriterion {
            id: 0,
            name: CONTACT_CREATED_EVENT.to_string(),
            equality: true,
            filters: vec![EventFilterCriterion {
                id: 0,
                key: CONTACT_SOURCE_PROPERTY.to_string(),
                property_type: PropertyType::Categorical,
                values: vec![FilterValue {
                    operator: FilterOperator::NotEqual,
                    value: "OFFLINE".to_string(),
                    logical_op: LogicalOp::And,
                }],
                entity: PropertyEntity::User,
            }],
        }],
        ..EventsCriteria::single(CONTACT_CREATED_EVENT)
    }
}

/// The six mailer units, stored under the mailer keyspace.
pub fn mailer_units(session_event: &str) -> Vec<Unit> {
    MAILER_QUERY_IDS
        .iter()
        .map(|&query_id| {
            let query = match query_id {
                1 => occurrence(query_id, session_event, EventsCriteria::single(session_event)),
                2 => occurrence(
                    query_id,
                    session_event,
                    EventsCriteria::single(FORM_SUBMITTED_EVENT),
                ),
                3 => occurrence(query_id, session_event, online_contacts()),
                4 => kpi(query_id, "channels", ALL_CHANNELS_CATEGORY, "spend"),
                5 => kpi(query_id, "events", "website_session", "bounce_rate"),
                _ => kpi(query_id, "events", "website_session", "average_session_duration"),
            };
            Unit {
                query_id,
                mailer: true,
                query,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kpi::registry::validate_metric;
    use crate::pipeline::UnitKind;

    #[test]
    fn test_mailer_units() {
        let units = mailer_units("$session");
        assert_eq!(units.len(), 6);
        assert!(units.iter().all(|u| u.mailer));
        let kinds: Vec<UnitKind> = units.iter().map(Unit::kind).collect();
        assert_eq!(&kinds[..3], &[UnitKind::EventOccurrence; 3]);
        assert_eq!(&kinds[3..], &[UnitKind::Kpi; 3]);
        for unit in &units {
            assert!(headline(unit.query_id).is_some());
            match &unit.query {
                UnitQuery::Insights(shape) => shape.validate().unwrap(),
                UnitQuery::Kpi(group) => {
                    for q in &group.queries {
                        for m in &q.metrics {
                            validate_metric(&q.display_category, m).unwrap();
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_contact_query_excludes_offline_imports() {
        let target = online_contacts();
        let filter = &target.criteria[0].filters[0];
        assert_eq!(filter.key, CONTACT_SOURCE_PROPERTY);
        assert_eq!(filter.values[0].operator, FilterOperator::NotEqual);
        assert!(filter.values[0].operator.is_negated());
    }
}
