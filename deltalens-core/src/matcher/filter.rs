//! Property filter evaluation for a single event.

use crate::query::{
    DateTimeRange, EventCriterion, EventFilterCriterion, FilterOperator, FilterValue, LogicalOp,
    PropertyType,
};
use crate::types::{format_value, Event, NONE_VALUE};
use serde_json::Value;

/// True when the event satisfies the criterion's name test and every filter.
pub fn event_matches_criterion(event: &Event, criterion: &EventCriterion) -> bool {
    if criterion.equality != (event.name == criterion.name) {
        return false;
    }
    event_matches_filters(event, &criterion.filters)
}

/// Filters are always ANDed across properties.
pub fn event_matches_filters(event: &Event, filters: &[EventFilterCriterion]) -> bool {
    filters.iter().all(|f| event_matches_filter(event, f))
}

pub fn event_matches_filter(event: &Event, filter: &EventFilterCriterion) -> bool {
    let value = event.properties(filter.entity).get(&filter.key);
    match filter.property_type {
        PropertyType::Categorical => match_categorical(value, &filter.values),
        PropertyType::Numerical => match_numerical(value, &filter.values),
        PropertyType::Datetime => match_datetime(value, &filter.values),
    }
}

/// Left-to-right fold; the first result seeds, later ones join with their connective.
fn fold_results(values: &[FilterValue], results: &[bool]) -> bool {
    let mut so_far = false;
    for (i, (value, result)) in values.iter().zip(results).enumerate() {
        if i == 0 {
            so_far = *result;
            continue;
        }
        match value.logical_op {
            LogicalOp::And => so_far = so_far && *result,
            LogicalOp::Or => so_far = so_far || *result,
            LogicalOp::Unset => {}
        }
    }
    so_far
}

fn match_categorical(value: Option<&Value>, values: &[FilterValue]) -> bool {
    let (mut and_count, mut or_count, mut equals_count, mut contains_count) = (0, 0, 0, 0);
    for v in values {
        match v.logical_op {
            LogicalOp::And => and_count += 1,
            LogicalOp::Or => or_count += 1,
            LogicalOp::Unset => {}
        }
        match v.operator {
            FilterOperator::Equals | FilterOperator::NotEqual => equals_count += 1,
            FilterOperator::Contains | FilterOperator::NotContains => contains_count += 1,
            _ => {}
        }
    }

    // Orderings the query builder cannot express unambiguously.
    if and_count > 1 && or_count >= 1 && equals_count == 0 && contains_count >= 1 {
        return false;
    }
    if and_count == 1
        && or_count >= 1
        && matches!(
            values.first().map(|v| v.operator),
            Some(FilterOperator::NotEqual | FilterOperator::NotContains)
        )
    {
        return false;
    }

    let present = value.is_some();
    let property = value.map(format_value).unwrap_or_else(|| "<nil>".to_string());
    let results: Vec<bool> = values
        .iter()
        .map(|v| {
            if v.value == NONE_VALUE {
                none_matches(&property, present, v.operator)
            } else {
                categorical_matches(v.operator, &property, &v.value)
            }
        })
        .collect();
    fold_results(values, &results)
}

/// `$none` addresses an absent property.
fn none_matches(property: &str, present: bool, operator: FilterOperator) -> bool {
    match operator {
        FilterOperator::Equals | FilterOperator::Contains => !present || property == NONE_VALUE,
        FilterOperator::NotEqual | FilterOperator::NotContains => {
            present && property != NONE_VALUE
        }
        _ => false,
    }
}

/// Case-insensitive string comparison.
pub(crate) fn categorical_matches(
    operator: FilterOperator,
    property: &str,
    expected: &str,
) -> bool {
    let property = property.to_lowercase();
    let expected = expected.to_lowercase();
    match operator {
        FilterOperator::Equals => property == expected,
        FilterOperator::NotEqual => property != expected,
        FilterOperator::Contains => property.contains(&expected),
        FilterOperator::NotContains => !property.contains(&expected),
        _ => false,
    }
}

pub(crate) fn numerical_matches(operator: FilterOperator, property: f64, expected: f64) -> bool {
    match operator {
        FilterOperator::Equals => property == expected,
        FilterOperator::NotEqual => property != expected,
        FilterOperator::GreaterThan => property > expected,
        FilterOperator::LesserThan => property < expected,
        FilterOperator::GreaterThanOrEqual => property >= expected,
        FilterOperator::LesserThanOrEqual => property <= expected,
        _ => false,
    }
}

pub(crate) fn datetime_matches(
    operator: FilterOperator,
    property: i64,
    range: DateTimeRange,
) -> bool {
    let inside = property >= range.from && property <= range.to;
    match operator {
        FilterOperator::Equals | FilterOperator::Between => inside,
        FilterOperator::NotInBetween => !inside,
        _ => false,
    }
}

fn match_numerical(value: Option<&Value>, values: &[FilterValue]) -> bool {
    let Some(property) = value.and_then(|v| format_value(v).trim().parse::<f64>().ok()) else {
        return false;
    };
    let mut results = Vec::with_capacity(values.len());
    for v in values {
        let Ok(expected) = v.value.trim().parse::<f64>() else {
            return false;
        };
        results.push(numerical_matches(v.operator, property, expected));
    }
    fold_results(values, &results)
}

fn match_datetime(value: Option<&Value>, values: &[FilterValue]) -> bool {
    let Some(property) = value.and_then(|v| format_value(v).trim().parse::<i64>().ok()) else {
        return false;
    };
    let mut results = Vec::with_capacity(values.len());
    for v in values {
        let Some(range) = DateTimeRange::decode(&v.value) else {
            return false;
        };
        results.push(datetime_matches(v.operator, property, range));
    }
    fold_results(values, &results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PropertyEntity;
    use serde_json::json;

    fn event_with(key: &str, value: Value) -> Event {
        let mut event = Event {
            name: "$session".into(),
            ..Default::default()
        };
        event.event_properties.insert(key.to_string(), value);
        event
    }

    fn fv(operator: FilterOperator, value: &str, logical_op: LogicalOp) -> FilterValue {
        FilterValue {
            operator,
            value: value.to_string(),
            logical_op,
        }
    }

    fn filter(
        key: &str,
        property_type: PropertyType,
        values: Vec<FilterValue>,
    ) -> EventFilterCriterion {
        EventFilterCriterion {
            id: 0,
            key: key.to_string(),
            property_type,
            values,
            entity: PropertyEntity::Event,
        }
    }

    #[test]
    fn test_categorical_equals_is_case_insensitive() {
        let event = event_with("$browser", json!("Chrome"));
        let f = filter(
            "$browser",
            PropertyType::Categorical,
            vec![fv(FilterOperator::Equals, "chrome", LogicalOp::Unset)],
        );
        assert!(event_matches_filter(&event, &f));
    }

    #[test]
    fn test_categorical_or_chain() {
        let event = event_with("$country", json!("India"));
        let f = filter(
            "$country",
            PropertyType::Categorical,
            vec![
                fv(FilterOperator::Equals, "US", LogicalOp::Unset),
                fv(FilterOperator::Equals, "India", LogicalOp::Or),
            ],
        );
        assert!(event_matches_filter(&event, &f));
    }

    #[test]
    fn test_categorical_rejects_negated_multi_select() {
        let event = event_with("$country", json!("India"));
        let f = filter(
            "$country",
            PropertyType::Categorical,
            vec![
                fv(FilterOperator::NotEqual, "US", LogicalOp::And),
                fv(FilterOperator::NotEqual, "UK", LogicalOp::Or),
            ],
        );
        assert!(!event_matches_filter(&event, &f));
    }

    #[test]
    fn test_none_value() {
        let event = event_with("$country", json!("India"));
        let missing = filter(
            "$city",
            PropertyType::Categorical,
            vec![fv(FilterOperator::Equals, "$none", LogicalOp::Unset)],
        );
        assert!(event_matches_filter(&event, &missing));

        let present = filter(
            "$country",
            PropertyType::Categorical,
            vec![fv(FilterOperator::NotEqual, "$none", LogicalOp::Unset)],
        );
        assert!(event_matches_filter(&event, &present));
    }

    #[test]
    fn test_contains() {
        let event = event_with("$page_url", json!("example.com/Pricing"));
        let f = filter(
            "$page_url",
            PropertyType::Categorical,
            vec![fv(FilterOperator::Contains, "pricing", LogicalOp::Unset)],
        );
        assert!(event_matches_filter(&event, &f));
    }

    #[test]
    fn test_numerical() {
        let event = event_with("$page_count", json!(3));
        let range = filter(
            "$page_count",
            PropertyType::Numerical,
            vec![
                fv(FilterOperator::GreaterThan, "2", LogicalOp::Unset),
                fv(FilterOperator::LesserThanOrEqual, "5", LogicalOp::And),
            ],
        );
        assert!(event_matches_filter(&event, &range));

        let string_number = event_with("$page_count", json!("3"));
        assert!(event_matches_filter(&string_number, &range));

        let missing = Event::default();
        assert!(!event_matches_filter(&missing, &range));
    }

    #[test]
    fn test_datetime() {
        let event = event_with("$joined", json!(150));
        let f = filter(
            "$joined",
            PropertyType::Datetime,
            vec![fv(FilterOperator::Equals, r#"{"fr":100,"to":200}"#, LogicalOp::Unset)],
        );
        assert!(event_matches_filter(&event, &f));

        let outside = event_with("$joined", json!(250));
        assert!(!event_matches_filter(&outside, &f));
    }

    #[test]
    fn test_criterion_equality_flag() {
        let event = event_with("$browser", json!("Chrome"));
        let negated = EventCriterion {
            id: 0,
            name: "$form_submitted".into(),
            equality: false,
            filters: vec![],
        };
        assert!(event_matches_criterion(&event, &negated));

        let named = EventCriterion {
            equality: true,
            ..negated
        };
        assert!(!event_matches_criterion(&event, &named));
    }

    #[test]
    fn test_empty_value_list_never_matches() {
        let event = event_with("$browser", json!("Chrome"));
        let f = filter("$browser", PropertyType::Categorical, vec![]);
        assert!(!event_matches_filter(&event, &f));
    }
}
