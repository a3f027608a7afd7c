use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::catalog::{CatalogClient, CatalogResource};
use crate::config::ResolvedConfig;
use crate::domain::{Count, Dataset, Document, File, Filter, Instrument, Sample};
use crate::error::BridgeError;
use crate::filter_mapper::FilterMapper;
use crate::inclusions::prune;
use crate::ontology::{OntologyExpander, expand_techniques_in_filter};
use crate::response_mapper::{ResponseMapper, files};
use crate::scoring::{ScoringClient, Scores};

/// Settings the gateway needs at request time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOptions {
    pub facility: String,
    pub catalog_url: String,
    pub ontology_url: Option<String>,
    pub scoring_url: String,
    pub scoring_enabled: bool,
    pub return_zero_score: bool,
    pub pass_ids_to_scoring: bool,
}

impl From<&ResolvedConfig> for GatewayOptions {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            facility: config.facility.clone(),
            catalog_url: config.catalog_url.clone(),
            ontology_url: config.ontology_url.clone(),
            scoring_url: config.scoring_url.clone(),
            scoring_enabled: config.scoring_enabled,
            return_zero_score: config.return_zero_score,
            pass_ids_to_scoring: config.pass_ids_to_scoring,
        }
    }
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self::from(&ResolvedConfig::default())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub uptime_seconds: u64,
    pub uptime: String,
    pub version: String,
    pub facility: String,
    pub catalog_url: String,
    pub technique_url: Option<String>,
    pub scoring_url: String,
    pub scoring_enabled: bool,
    pub return_zero_score: bool,
    pub pass_documents_to_scoring: bool,
    pub scoring_service: Value,
}

/// Serves the standardized search API from the catalog, the scoring service
/// and the ontology service.
pub struct Gateway<C: CatalogClient, S: ScoringClient, O: OntologyExpander> {
    catalog: C,
    scoring: S,
    ontology: O,
    mapper: FilterMapper,
    options: GatewayOptions,
    started: Instant,
}

impl<C: CatalogClient, S: ScoringClient, O: OntologyExpander> Gateway<C, S, O> {
    pub fn new(catalog: C, scoring: S, ontology: O, mapper: FilterMapper, options: GatewayOptions) -> Self {
        Self {
            catalog,
            scoring,
            ontology,
            mapper,
            options,
            started: Instant::now(),
        }
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    pub fn mapper(&self) -> &FilterMapper {
        &self.mapper
    }

    fn responses(&self) -> ResponseMapper<'_, C> {
        ResponseMapper::new(
            &self.catalog,
            &self.mapper,
            &self.options.facility,
            self.options.scoring_enabled,
        )
    }

    fn scores(&self, query: Option<&str>, ids: Vec<String>, group: &str) -> Result<Scores, BridgeError> {
        match query {
            Some(query) if self.options.scoring_enabled => {
                let scores = self.scoring.score(query, &ids, group)?;
                debug!(group, scored = scores.len(), "merged scores");
                Ok(scores)
            }
            _ => Ok(Scores::new()),
        }
    }

    /// Datasets matching `filter`, scored and sorted when `query` is given.
    /// The limit is applied after pruning empty inclusions.
    pub fn find_datasets(&self, filter: &Filter, query: Option<&str>) -> Result<Vec<Dataset>, BridgeError> {
        let query = query.or(filter.query.as_deref()).filter(|query| !query.trim().is_empty());
        let mut unlimited = filter.clone();
        let limit = unlimited.limit.take();

        let catalog_filter = self.mapper.dataset(&unlimited)?;
        let records = self.catalog.find(CatalogResource::Datasets, &catalog_filter)?;
        info!(found = records.len(), "catalog datasets");
        let ids = records.iter().filter_map(pid_of).collect();
        let scores = self.scores(query, ids, "datasets")?;

        let mut datasets = self.responses().datasets(records, &unlimited, &scores)?;
        if query.is_some() {
            datasets.sort_by(|a, b| b.score.total_cmp(&a.score));
        }
        let mut datasets = prune(datasets, &unlimited)?;
        truncate(&mut datasets, limit);
        Ok(datasets)
    }

    pub fn find_dataset(&self, pid: &str, filter: &Filter) -> Result<Dataset, BridgeError> {
        let catalog_filter = self.mapper.dataset(filter)?;
        let record = self
            .catalog
            .find_by_id(CatalogResource::Datasets, pid, &catalog_filter)?
            .ok_or_else(|| BridgeError::NotFound(format!("dataset {pid}")))?;
        self.responses().dataset(&record, filter, &Scores::new())
    }

    pub fn count_datasets(&self, where_clause: Option<Value>) -> Result<Count, BridgeError> {
        let filter = Filter {
            where_clause,
            ..Filter::default()
        };
        let catalog_filter = self.mapper.dataset(&filter)?;
        let records = self.catalog.find(CatalogResource::Datasets, &catalog_filter)?;
        Ok(Count {
            count: records.len() as u64,
        })
    }

    pub fn find_files(&self, pid: &str, filter: &Filter) -> Result<Vec<File>, BridgeError> {
        let catalog_filter = self.mapper.files(filter);
        let blocks = self.catalog.find_origdatablocks(pid, &catalog_filter)?;
        Ok(files(&blocks))
    }

    pub fn count_files(&self, pid: &str, where_clause: Option<Value>) -> Result<Count, BridgeError> {
        let filter = Filter {
            where_clause,
            ..Filter::default()
        };
        Ok(Count {
            count: self.find_files(pid, &filter)?.len() as u64,
        })
    }

    /// Documents matching `filter`. With scoring enabled and a query, zero
    /// scores are dropped unless configured otherwise, the rest sorted by
    /// score, and the limit applied last.
    pub fn find_documents(&self, filter: &Filter, query: Option<&str>) -> Result<Vec<Document>, BridgeError> {
        let mut filter = filter.clone();
        let query = query
            .map(str::to_string)
            .or_else(|| filter.query.take())
            .filter(|query| !query.trim().is_empty());
        let scored = self.options.scoring_enabled && query.is_some();
        let limit = if scored { filter.limit.take() } else { None };

        let filter = expand_techniques_in_filter(filter, &self.ontology)?;
        let catalog_filter = self.mapper.document(&filter)?;
        let records = self.catalog.find(CatalogResource::PublishedData, &catalog_filter)?;
        info!(found = records.len(), "catalog documents");
        let ids = records
            .iter()
            .filter_map(|record| record.get("doi").and_then(Value::as_str).map(str::to_string))
            .collect();
        let scores = self.scores(query.as_deref(), ids, "documents")?;

        let mut documents = self.responses().documents(records, &filter, &scores)?;
        if scored {
            if !self.options.return_zero_score {
                documents.retain(|document| document.score > 0.0);
            }
            documents.sort_by(|a, b| b.score.total_cmp(&a.score));
        }
        let mut documents = prune(documents, &filter)?;
        truncate(&mut documents, limit.or(filter.limit));
        Ok(documents)
    }

    pub fn find_document(&self, pid: &str, filter: &Filter) -> Result<Document, BridgeError> {
        let catalog_filter = self.mapper.document(filter)?;
        let record = self
            .catalog
            .find_by_id(CatalogResource::PublishedData, pid, &catalog_filter)?
            .ok_or_else(|| BridgeError::NotFound(format!("document {pid}")))?;
        self.responses().document(&record, filter, &Scores::new())
    }

    pub fn count_documents(&self, where_clause: Option<Value>) -> Result<Count, BridgeError> {
        let catalog_filter = self.mapper.document(&Filter {
            where_clause,
            ..Filter::default()
        })?;
        self.catalog
            .count(CatalogResource::PublishedData, catalog_filter.where_clause())
    }

    pub fn find_instruments(&self, filter: &Filter) -> Result<Vec<Instrument>, BridgeError> {
        let catalog_filter = self.mapper.instrument(filter)?;
        let records = self.catalog.find(CatalogResource::Instruments, &catalog_filter)?;
        let responses = self.responses();
        Ok(records.iter().map(|record| responses.instrument(record)).collect())
    }

    pub fn find_instrument(&self, pid: &str, filter: &Filter) -> Result<Instrument, BridgeError> {
        let catalog_filter = self.mapper.instrument(filter)?;
        let record = self
            .catalog
            .find_by_id(CatalogResource::Instruments, pid, &catalog_filter)?
            .ok_or_else(|| BridgeError::NotFound(format!("instrument {pid}")))?;
        Ok(self.responses().instrument(&record))
    }

    pub fn count_instruments(&self, where_clause: Option<Value>) -> Result<Count, BridgeError> {
        let catalog_filter = self.mapper.instrument(&Filter {
            where_clause,
            ..Filter::default()
        })?;
        self.catalog
            .count(CatalogResource::Instruments, catalog_filter.where_clause())
    }

    pub fn find_samples(&self, filter: &Filter) -> Result<Vec<Sample>, BridgeError> {
        let catalog_filter = self.mapper.sample(filter);
        let records = self.catalog.find(CatalogResource::Samples, &catalog_filter)?;
        Ok(records.iter().map(crate::response_mapper::sample).collect())
    }

    pub fn status(&self) -> GatewayStatus {
        let uptime_seconds = self.started.elapsed().as_secs();
        GatewayStatus {
            uptime_seconds,
            uptime: format_uptime(uptime_seconds),
            version: env!("CARGO_PKG_VERSION").to_string(),
            facility: self.options.facility.clone(),
            catalog_url: self.options.catalog_url.clone(),
            technique_url: self.options.ontology_url.clone(),
            scoring_url: self.options.scoring_url.clone(),
            scoring_enabled: self.options.scoring_enabled,
            return_zero_score: self.options.return_zero_score,
            pass_documents_to_scoring: self.options.pass_ids_to_scoring,
            scoring_service: self.scoring.status(),
        }
    }
}

fn pid_of(record: &Value) -> Option<String> {
    record.get("pid").and_then(Value::as_str).map(str::to_string)
}

fn truncate<T>(items: &mut Vec<T>, limit: Option<u64>) {
    if let Some(limit) = limit.filter(|limit| *limit > 0) {
        items.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
    }
}

/// `HH:MM:SS`, with hours allowed past 99.
pub fn format_uptime(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_is_zero_padded() {
        assert_eq!(format_uptime(0), "00:00:00");
        assert_eq!(format_uptime(3_725), "01:02:05");
        assert_eq!(format_uptime(360_000), "100:00:00");
    }

    #[test]
    fn zero_limit_keeps_everything() {
        let mut items = vec![1, 2, 3];
        truncate(&mut items, Some(0));
        assert_eq!(items.len(), 3);
        truncate(&mut items, Some(2));
        assert_eq!(items, vec![1, 2]);
    }
}
