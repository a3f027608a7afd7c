use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::cache::{CacheLookup, RecordCache, now_millis};
use crate::error::BridgeError;
use crate::store::{Query, Record};
use crate::technique_source::{OntologyGraph, OntologySource};

/// Rewrites a technique where clause (on `pid`/`name`) into the form the
/// catalog understands.
pub trait TechniqueFilter: Send + Sync {
    fn build_filter(&self, where_clause: &Value) -> Result<Value, BridgeError>;
}

/// Pass-through used when no ontology is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreeFormTechniques;

impl TechniqueFilter for FreeFormTechniques {
    fn build_filter(&self, where_clause: &Value) -> Result<Value, BridgeError> {
        Ok(where_clause.clone())
    }
}

const NEGATIONS: &[(&str, &str)] = &[
    ("neq", "eq"),
    ("nin", "inq"),
    ("nlike", "like"),
    ("nilike", "ilike"),
];

/// Resolves technique names and synonyms through a cached copy of the
/// ontology closure, producing `{pid: {inq|nin: [...]}}` predicates.
pub struct CachedTechniques {
    source: Box<dyn OntologySource>,
    cache: RecordCache,
}

impl CachedTechniques {
    pub fn new(source: Box<dyn OntologySource>, cache: RecordCache) -> Self {
        Self { source, cache }
    }

    pub fn cache(&self) -> &RecordCache {
        &self.cache
    }

    pub fn build_filter_at(&self, where_clause: &Value, now_ms: i64) -> Result<Value, BridgeError> {
        if let Some(items) = where_clause.get("and").and_then(Value::as_array) {
            let built = items
                .iter()
                .map(|item| self.build_filter_at(item, now_ms))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(json!({ "and": built }));
        }
        if let Some(items) = where_clause.get("or").and_then(Value::as_array) {
            let all_positive_leaves = items.iter().all(|item| {
                !is_boolean(item) && !to_positive(item).1
            });
            if all_positive_leaves {
                let mut relatives = BTreeSet::new();
                for item in items {
                    relatives.extend(self.leaf_relatives(item, now_ms)?);
                }
                return Ok(json!({ "pid": { "inq": relatives } }));
            }
            let built = items
                .iter()
                .map(|item| self.build_filter_at(item, now_ms))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(json!({ "or": built }));
        }
        self.flat(where_clause, now_ms)
    }

    fn flat(&self, leaf: &Value, now_ms: i64) -> Result<Value, BridgeError> {
        let (_, negated) = to_positive(leaf);
        let relatives = self.leaf_relatives(leaf, now_ms)?;
        let operator = if negated { "nin" } else { "inq" };
        Ok(json!({ "pid": { operator: relatives } }))
    }

    fn leaf_relatives(&self, leaf: &Value, now_ms: i64) -> Result<BTreeSet<String>, BridgeError> {
        let (positive, _) = to_positive(leaf);
        let query = match synonym_of(&positive) {
            Some(synonym) => json!({ "or": [positive, synonym] }),
            None => positive,
        };
        let techniques = self.build_techniques_at(&query, now_ms)?;
        Ok(techniques
            .iter()
            .filter_map(|record| record.get("relatives").and_then(Value::as_array))
            .flatten()
            .filter_map(|id| id.as_str().map(str::to_string))
            .collect())
    }

    /// Returns the cached techniques matching `where_clause`, refetching the
    /// ontology first when the cache is empty or stale.
    pub fn build_techniques_at(&self, where_clause: &Value, now_ms: i64) -> Result<Vec<Record>, BridgeError> {
        let populated = match self.cache.lookup_at(&Query::first(), now_ms)? {
            CacheLookup::Fresh(records) => !records.is_empty(),
            CacheLookup::Evicted => false,
        };
        let stale = populated && {
            let cutoff = now_ms - (self.cache.default_ttl() as i64) * 1000;
            let outdated = Query::matching(json!({ "createdAt": { "lt": cutoff } }));
            match self.cache.lookup_at(&outdated, now_ms)? {
                CacheLookup::Fresh(records) => !records.is_empty(),
                CacheLookup::Evicted => true,
            }
        };
        debug!(populated, stale, collection = self.cache.collection(), "checked technique cache");
        if !populated || stale {
            self.rebuild(now_ms)?;
        }
        self.cache
            .get_at(&Query::matching(where_clause.clone()), now_ms)
    }

    fn rebuild(&self, now_ms: i64) -> Result<(), BridgeError> {
        let nodes = self.source.fetch_nodes()?;
        let graph = OntologyGraph::build(nodes, self.source.leaf_rule());
        let stored = self.cache.replace_all(graph.records(now_ms), None)?;
        info!(techniques = stored, "rebuilt technique cache");
        Ok(())
    }
}

impl TechniqueFilter for CachedTechniques {
    fn build_filter(&self, where_clause: &Value) -> Result<Value, BridgeError> {
        self.build_filter_at(where_clause, now_millis())
    }
}

/// The technique strategy chosen once at startup.
pub enum TechniqueStrategy {
    FreeForm(FreeFormTechniques),
    Cached(Arc<CachedTechniques>),
}

impl Default for TechniqueStrategy {
    fn default() -> Self {
        TechniqueStrategy::FreeForm(FreeFormTechniques)
    }
}

impl TechniqueFilter for TechniqueStrategy {
    fn build_filter(&self, where_clause: &Value) -> Result<Value, BridgeError> {
        match self {
            TechniqueStrategy::FreeForm(strategy) => strategy.build_filter(where_clause),
            TechniqueStrategy::Cached(strategy) => strategy.build_filter(where_clause),
        }
    }
}

fn is_boolean(value: &Value) -> bool {
    value.get("and").is_some() || value.get("or").is_some()
}

/// Swaps negated operators for their positive form, reporting whether any
/// swap happened.
pub fn to_positive(value: &Value) -> (Value, bool) {
    fn walk(value: &Value, negated: &mut bool) -> Value {
        match value {
            Value::Object(map) => {
                let mut out = Map::new();
                for (key, inner) in map {
                    let key = match NEGATIONS.iter().find(|(negative, _)| *negative == key.as_str()) {
                        Some((_, positive)) => {
                            *negated = true;
                            positive.to_string()
                        }
                        None => key.clone(),
                    };
                    out.insert(key, walk(inner, negated));
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }
    let mut negated = false;
    let positive = walk(value, &mut negated);
    (positive, negated)
}

/// The same predicate with `name` renamed to `synonym`, if `name` is present.
pub fn synonym_of(leaf: &Value) -> Option<Value> {
    let map = leaf.as_object()?;
    let name = map.get("name").filter(|value| !value.is_null())?;
    let mut out = Map::new();
    for (key, value) in map {
        if key == "name" {
            out.insert("synonym".to_string(), name.clone());
        } else {
            out.insert(key.clone(), value.clone());
        }
    }
    Some(Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negations_are_normalised() {
        let (positive, negated) = to_positive(&json!({"name": {"nilike": "%x%"}}));
        assert_eq!(positive, json!({"name": {"ilike": "%x%"}}));
        assert!(negated);
        let (_, negated) = to_positive(&json!({"name": "xrd"}));
        assert!(!negated);
    }

    #[test]
    fn synonym_leaf_replaces_name() {
        assert_eq!(
            synonym_of(&json!({"name": "XRD"})),
            Some(json!({"synonym": "XRD"}))
        );
        assert_eq!(synonym_of(&json!({"pid": "1"})), None);
    }
}
