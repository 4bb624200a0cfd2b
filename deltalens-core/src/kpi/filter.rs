//! Flat AND/OR filter chain of KPI queries.
//!
//! Conditions are evaluated left to right with no grouping. An `AND` entry
//! first requires everything so far to have passed, then resets the running
//! state; an `OR` entry is skipped once the running state already passed.

use crate::error::{Error, Result};
use crate::matcher::filter::{categorical_matches, datetime_matches, numerical_matches};
use crate::query::{DateTimeRange, FilterOperator, KpiFilter, LogicalOp};
use crate::types::{format_value, value_as_f64};
use serde_json::Value;

/// Runs the chain; `lookup` returns the record's value for a filter's property.
pub fn passes_filters<'a>(
    filters: &[KpiFilter],
    lookup: impl Fn(&KpiFilter) -> Option<&'a Value>,
) -> Result<bool> {
    let mut pass = true;
    for filter in filters {
        match filter.logical()? {
            LogicalOp::And => {
                if !pass {
                    return Ok(false);
                }
                pass = false;
            }
            LogicalOp::Or => {
                if pass {
                    continue;
                }
            }
            LogicalOp::Unset => {
                return Err(Error::UnknownLogicalOp(filter.logical_op.clone()));
            }
        }

        let operator = filter.operator()?;
        match lookup(filter) {
            None => {
                if operator.is_negated() {
                    pass = true;
                }
            }
            Some(value) => {
                if condition_holds(filter, operator, value)? {
                    pass = true;
                }
            }
        }
    }
    Ok(pass)
}

/// Compares one value against a filter, by the filter's data type.
pub fn condition_holds(
    filter: &KpiFilter,
    operator: FilterOperator,
    value: &Value,
) -> Result<bool> {
    match filter.property_data_type.as_str() {
        "numerical" => {
            let expected: f64 = filter.value.trim().parse().map_err(|_| {
                Error::Query(format!(
                    "filter on {} expects a number, got {:?}",
                    filter.property_name, filter.value
                ))
            })?;
            Ok(value_as_f64(value)
                .map(|actual| numerical_matches(operator, actual, expected))
                .unwrap_or(false))
        }
        "datetime" => {
            let range = DateTimeRange::decode(&filter.value).ok_or_else(|| {
                Error::Query(format!(
                    "filter on {} expects a datetime range, got {:?}",
                    filter.property_name, filter.value
                ))
            })?;
            Ok(value_as_f64(value)
                .map(|actual| datetime_matches(operator, actual as i64, range))
                .unwrap_or(false))
        }
        _ => Ok(categorical_matches(
            operator,
            &format_value(value),
            &filter.value,
        )),
    }
}
