#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use search_bridge::catalog::{CatalogClient, CatalogResource};
use search_bridge::domain::Count;
use search_bridge::error::BridgeError;
use search_bridge::filter_mapper::CatalogFilter;
use search_bridge::ontology::OntologyExpander;
use search_bridge::scoring::{ScoringClient, Scores};
use search_bridge::store;

/// Catalog filters seen by a [`MockCatalog`], shared so tests can inspect
/// them after the catalog moved into a gateway.
#[derive(Clone, Default)]
pub struct QueryLog(Arc<Mutex<Vec<(CatalogResource, Value)>>>);

impl QueryLog {
    fn push(&self, resource: CatalogResource, filter: Value) {
        self.0.lock().unwrap().push((resource, filter));
    }

    pub fn for_resource(&self, resource: CatalogResource) -> Vec<Value> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(queried, _)| *queried == resource)
            .map(|(_, filter)| filter.clone())
            .collect()
    }
}

/// In-memory catalog that evaluates where clauses like the real backend.
#[derive(Default)]
pub struct MockCatalog {
    records: HashMap<CatalogResource, Vec<Value>>,
    log: QueryLog,
}

impl MockCatalog {
    pub fn with(mut self, resource: CatalogResource, records: Vec<Value>) -> Self {
        self.records.insert(resource, records);
        self
    }

    pub fn log(&self) -> QueryLog {
        self.log.clone()
    }

    fn matching(&self, resource: CatalogResource, where_clause: Option<&Value>) -> Vec<Value> {
        self.records
            .get(&resource)
            .into_iter()
            .flatten()
            .filter(|record| where_clause.is_none_or(|where_clause| store::matches(where_clause, record)))
            .cloned()
            .collect()
    }

    fn id_key(resource: CatalogResource) -> &'static str {
        match resource {
            CatalogResource::PublishedData => "doi",
            CatalogResource::Samples => "sampleId",
            _ => "pid",
        }
    }
}

impl CatalogClient for MockCatalog {
    fn find(&self, resource: CatalogResource, filter: &CatalogFilter) -> Result<Vec<Value>, BridgeError> {
        self.log.push(resource, serde_json::to_value(filter).unwrap());
        let skip = filter.skip().unwrap_or(0) as usize;
        let limit = filter.limit().map(|limit| limit as usize).unwrap_or(usize::MAX);
        Ok(self
            .matching(resource, filter.where_clause())
            .into_iter()
            .skip(skip)
            .take(limit)
            .collect())
    }

    fn find_by_id(
        &self,
        resource: CatalogResource,
        id: &str,
        _filter: &CatalogFilter,
    ) -> Result<Option<Value>, BridgeError> {
        let key = Self::id_key(resource);
        Ok(self
            .matching(resource, Some(&json!({ key: id })))
            .into_iter()
            .next())
    }

    fn count(&self, resource: CatalogResource, where_clause: Option<&Value>) -> Result<Count, BridgeError> {
        if let Some(where_clause) = where_clause {
            self.log.push(resource, json!({ "where": where_clause }));
        }
        Ok(Count {
            count: self.matching(resource, where_clause).len() as u64,
        })
    }

    fn find_origdatablocks(&self, dataset_pid: &str, _filter: &CatalogFilter) -> Result<Vec<Value>, BridgeError> {
        Ok(self
            .matching(CatalogResource::Datasets, Some(&json!({ "pid": dataset_pid })))
            .into_iter()
            .filter_map(|dataset| dataset.get("origdatablocks").and_then(Value::as_array).cloned())
            .flatten()
            .collect())
    }
}

/// Scoring service returning fixed scores and recording `(query, group)`.
#[derive(Default)]
pub struct MockScoring {
    scores: Scores,
    pub calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockScoring {
    pub fn with_scores(pairs: &[(&str, f64)]) -> Self {
        Self {
            scores: pairs
                .iter()
                .map(|(id, score)| (id.to_string(), *score))
                .collect(),
            calls: Arc::default(),
        }
    }
}

impl ScoringClient for MockScoring {
    fn score(&self, query: &str, _item_ids: &[String], group: &str) -> Result<Scores, BridgeError> {
        self.calls
            .lock()
            .unwrap()
            .push((query.to_string(), group.to_string()));
        Ok(self.scores.clone())
    }

    fn status(&self) -> Value {
        json!({ "status": 1, "name": "mock scoring" })
    }
}

/// Ontology service answering every expansion with a fixed pid list.
#[derive(Default)]
pub struct MockOntology {
    pids: Vec<String>,
    fail: bool,
    pub requests: Arc<Mutex<Vec<Value>>>,
}

impl MockOntology {
    pub fn expanding_to(pids: &[&str]) -> Self {
        Self {
            pids: pids.iter().map(|pid| pid.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

impl OntologyExpander for MockOntology {
    fn expand(&self, where_clause: &Value) -> Result<Value, BridgeError> {
        self.requests.lock().unwrap().push(where_clause.clone());
        if self.fail {
            return Err(BridgeError::OntologyStatus {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(json!({ "pid": { "inq": self.pids } }))
    }
}
