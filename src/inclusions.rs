//! Drops results whose requested relations turned out empty.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::domain::Filter;
use crate::error::BridgeError;

/// Scope of every included relation, `{}` when none was given.
pub fn get_inclusions(filter: &Filter) -> BTreeMap<String, Filter> {
    filter
        .include
        .iter()
        .map(|inclusion| {
            (
                inclusion.relation.clone(),
                inclusion.scope.clone().unwrap_or_default(),
            )
        })
        .collect()
}

/// Primary relations that carry a `where` or a nested include, each mapped
/// to its secondary relations that carry a `where`.
pub fn get_inclusion_names(filter: &Filter) -> BTreeMap<String, Vec<String>> {
    get_inclusions(filter)
        .into_iter()
        .filter(|(_, scope)| scope.where_clause.is_some() || !scope.include.is_empty())
        .map(|(primary, scope)| {
            let secondaries = scope
                .include
                .iter()
                .filter(|inclusion| {
                    inclusion
                        .scope
                        .as_ref()
                        .is_some_and(|scope| scope.where_clause.is_some())
                })
                .map(|inclusion| inclusion.relation.clone())
                .collect();
            (primary, secondaries)
        })
        .collect()
}

/// Removes empty parts of a relation value. Objects whose values are all
/// null become `{}` and arrays lose their empty elements.
pub fn clean(value: &Value) -> Value {
    match value {
        Value::Object(map) if map.values().all(Value::is_null) => Value::Object(Map::new()),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(clean)
                .filter(|item| !is_empty(item))
                .collect(),
        ),
        other => other.clone(),
    }
}

pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.values().all(Value::is_null),
        Value::Array(items) => items.iter().all(is_empty),
        _ => false,
    }
}

/// Keeps items whose `primary` relation is non-empty, unchanged.
pub fn filter_on_primary(items: Vec<Value>, primary: &str) -> Vec<Value> {
    items
        .into_iter()
        .filter(|item| item.get(primary).is_some_and(|relation| !is_empty(relation)))
        .collect()
}

/// Keeps items whose `primary.secondary` relation is non-empty, with the
/// secondary replaced by its cleaned value.
pub fn filter_on_secondary(items: Vec<Value>, primary: &str, secondary: &str) -> Vec<Value> {
    items
        .into_iter()
        .filter_map(|mut item| {
            let relation = item.get_mut(primary)?;
            match relation {
                Value::Array(elements) => {
                    let kept: Vec<Value> = elements
                        .drain(..)
                        .filter_map(|element| with_clean_secondary(element, secondary))
                        .collect();
                    if kept.is_empty() {
                        return None;
                    }
                    *elements = kept;
                }
                Value::Object(_) => {
                    *relation = with_clean_secondary(relation.take(), secondary)?;
                }
                _ => return None,
            }
            Some(item)
        })
        .collect()
}

fn with_clean_secondary(mut element: Value, secondary: &str) -> Option<Value> {
    let cleaned = clean(element.get(secondary)?);
    if is_empty(&cleaned) {
        return None;
    }
    element.as_object_mut()?.insert(secondary.to_string(), cleaned);
    Some(element)
}

/// Applies primary or secondary pruning for every relation the filter
/// constrains.
pub fn prune_values(mut items: Vec<Value>, filter: &Filter) -> Vec<Value> {
    for (primary, secondaries) in get_inclusion_names(filter) {
        if secondaries.is_empty() {
            items = filter_on_primary(items, &primary);
        } else {
            for secondary in &secondaries {
                items = filter_on_secondary(items, &primary, secondary);
            }
        }
    }
    items
}

pub fn prune<T>(items: Vec<T>, filter: &Filter) -> Result<Vec<T>, BridgeError>
where
    T: Serialize + DeserializeOwned,
{
    if get_inclusion_names(filter).is_empty() {
        return Ok(items);
    }
    let values = items
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| BridgeError::MalformedPayload(err.to_string()))?;
    prune_values(values, filter)
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| BridgeError::MalformedPayload(err.to_string()))
}
