use std::collections::HashSet;

use chrono::{SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::catalog::{CatalogClient, CatalogResource};
use crate::domain::{
    Dataset, Document, Empty, File, Filter, Instrument, Member, Parameter, Person, Related, Sample,
};
use crate::error::BridgeError;
use crate::fan_out::{DEFAULT_WORKERS, fan_out};
use crate::filter_mapper::{CatalogFilter, FilterMapper, ParameterPredicate, parameter_predicates};
use crate::inclusions::get_inclusions;
use crate::scoring::Scores;
use crate::units::{self, number_value};

/// How many dataset/document hops may be resolved on top of the requested
/// entity. A dataset's document (or a document's datasets) is resolved, but
/// the reciprocal relation of that nested entity is not.
pub const MAX_RECIPROCAL_DEPTH: usize = 1;

/// Builds standardized entities from catalog records, querying the catalog
/// again for relations the filter asked for.
pub struct ResponseMapper<'a, C: CatalogClient + ?Sized> {
    catalog: &'a C,
    filters: &'a FilterMapper,
    facility: &'a str,
    scoring_enabled: bool,
    workers: usize,
}

impl<'a, C: CatalogClient + ?Sized> ResponseMapper<'a, C> {
    pub fn new(catalog: &'a C, filters: &'a FilterMapper, facility: &'a str, scoring_enabled: bool) -> Self {
        Self {
            catalog,
            filters,
            facility,
            scoring_enabled,
            workers: DEFAULT_WORKERS,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn datasets(&self, records: Vec<Value>, filter: &Filter, scores: &Scores) -> Result<Vec<Dataset>, BridgeError> {
        fan_out(records, self.workers, |record| self.dataset_at(&record, filter, scores, 0))
    }

    pub fn dataset(&self, record: &Value, filter: &Filter, scores: &Scores) -> Result<Dataset, BridgeError> {
        self.dataset_at(record, filter, scores, 0)
    }

    pub fn documents(&self, records: Vec<Value>, filter: &Filter, scores: &Scores) -> Result<Vec<Document>, BridgeError> {
        fan_out(records, self.workers, |record| self.document_at(&record, filter, scores, 0))
    }

    pub fn document(&self, record: &Value, filter: &Filter, scores: &Scores) -> Result<Document, BridgeError> {
        self.document_at(record, filter, scores, 0)
    }

    pub fn instrument(&self, record: &Value) -> Instrument {
        instrument(record, self.facility)
    }

    fn score(&self, pid: Option<&str>, scores: &Scores) -> f64 {
        if !self.scoring_enabled {
            return 0.0;
        }
        pid.and_then(|pid| scores.get(pid)).copied().unwrap_or(0.0)
    }

    fn dataset_at(&self, record: &Value, filter: &Filter, scores: &Scores, depth: usize) -> Result<Dataset, BridgeError> {
        let pid = str_field(record, "pid");
        let mut dataset = Dataset {
            pid: pid.clone(),
            title: str_field(record, "datasetName"),
            is_public: record.get("isPublished").and_then(Value::as_bool),
            size: present(record, "size"),
            creation_date: str_field(record, "creationTime"),
            score: self.score(pid.as_deref(), scores),
            ..Dataset::default()
        };

        let inclusions = get_inclusions(filter);
        if let Some(scope) = inclusions.get("document") {
            if depth < MAX_RECIPROCAL_DEPTH {
                dataset.document = Some(self.dataset_document(pid.as_deref(), scope, depth)?);
            } else {
                debug!(pid = ?pid, depth, "not resolving reciprocal document");
            }
        }
        if inclusions.contains_key("files") {
            dataset.files = Some(
                record
                    .get("origdatablocks")
                    .and_then(Value::as_array)
                    .map(|blocks| files(blocks))
                    .unwrap_or_default(),
            );
        }
        if inclusions.contains_key("instrument") {
            dataset.instrument = Some(
                record
                    .get("instrument")
                    .map(|instrument| self.instrument(instrument))
                    .unwrap_or_default(),
            );
        }
        if let Some(scope) = inclusions.get("parameters") {
            dataset.parameters = Some(
                record
                    .get("scientificMetadata")
                    .and_then(Value::as_object)
                    .map(|metadata| parameters(metadata, scope))
                    .transpose()?
                    .unwrap_or_default(),
            );
        }
        if let Some(scope) = inclusions.get("samples") {
            dataset.samples = Some(self.dataset_samples(record, scope)?);
        }
        if inclusions.contains_key("techniques") {
            dataset.techniques = Some(
                record
                    .get("techniques")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
            );
        }
        Ok(dataset)
    }

    fn dataset_document(
        &self,
        pid: Option<&str>,
        scope: &Filter,
        depth: usize,
    ) -> Result<Related<Box<Document>>, BridgeError> {
        let Some(pid) = pid else {
            return Ok(Related::Missing(Empty {}));
        };
        let lookup = CatalogFilter::default().scoped_to("pidArray", json!(pid));
        let publications = self.catalog.find(CatalogResource::PublishedData, &lookup)?;
        debug!(pid, found = publications.len(), "resolved dataset document");
        match publications.first() {
            Some(publication) => Ok(Related::Found(Box::new(self.document_at(
                publication,
                scope,
                &Scores::new(),
                depth + 1,
            )?))),
            None => Ok(Related::Missing(Empty {})),
        }
    }

    fn dataset_samples(&self, record: &Value, scope: &Filter) -> Result<Vec<Sample>, BridgeError> {
        let Some(sample_id) = record.get("sampleId").filter(|id| !id.is_null()) else {
            return Ok(Vec::new());
        };
        let query = self.filters.sample(scope).scoped_to("sampleId", sample_id.clone());
        let samples = self.catalog.find(CatalogResource::Samples, &query)?;
        debug!(sample_id = %sample_id, found = samples.len(), "resolved dataset samples");
        Ok(samples.iter().map(sample).collect())
    }

    fn document_at(&self, record: &Value, filter: &Filter, scores: &Scores, depth: usize) -> Result<Document, BridgeError> {
        let doi = str_field(record, "doi");
        let mut document = Document {
            pid: doi.clone(),
            is_public: true,
            kind: "publication".to_string(),
            title: str_field(record, "title"),
            summary: str_field(record, "abstract"),
            doi: doi.clone(),
            score: self.score(doi.as_deref(), scores),
            release_date: record.get("publicationYear").and_then(release_date),
            datasets: None,
            members: None,
            parameters: None,
        };

        let inclusions = get_inclusions(filter);
        if let Some(scope) = inclusions.get("datasets") {
            if depth < MAX_RECIPROCAL_DEPTH {
                document.datasets = Some(self.document_datasets(record, scope, depth)?);
            } else {
                debug!(doi = ?doi, depth, "not resolving reciprocal datasets");
            }
        }
        if let Some(scope) = inclusions.get("members") {
            document.members = Some(members(record, scope));
        }
        if inclusions.contains_key("parameters") {
            document.parameters = Some(Vec::new());
        }
        Ok(document)
    }

    fn document_datasets(&self, record: &Value, scope: &Filter, depth: usize) -> Result<Vec<Dataset>, BridgeError> {
        let mapped = self.filters.dataset(scope)?;
        let pids: Vec<String> = record
            .get("pidArray")
            .and_then(Value::as_array)
            .map(|pids| pids.iter().filter_map(Value::as_str).map(normalize_pid).collect())
            .unwrap_or_default();
        let found = fan_out(pids, self.workers, |pid| {
            let query = mapped.scoped_to("pid", json!(pid));
            let mut datasets = self.catalog.find(CatalogResource::Datasets, &query)?;
            if datasets.is_empty() {
                debug!(%pid, "document dataset not found");
                return Ok(None);
            }
            let dataset = datasets.swap_remove(0);
            self.dataset_at(&dataset, scope, &Scores::new(), depth + 1).map(Some)
        })?;
        Ok(found.into_iter().flatten().collect())
    }
}

fn str_field(record: &Value, key: &str) -> Option<String> {
    record.get(key).and_then(Value::as_str).map(str::to_string)
}

fn present(record: &Value, key: &str) -> Option<Value> {
    record.get(key).filter(|value| !value.is_null()).cloned()
}

/// Drops the repeated prefix of `"a/a/b"` style pids.
pub fn normalize_pid(pid: &str) -> String {
    let mut segments = pid.split('/');
    match (segments.next(), segments.next()) {
        (Some(first), Some(second)) if first == second => {
            pid.split_once('/').map(|(_, rest)| rest.to_string()).unwrap_or_default()
        }
        _ => pid.to_string(),
    }
}

/// January 1st of the publication year, UTC.
pub fn release_date(year: &Value) -> Option<String> {
    let year = match year {
        Value::Number(number) => number.as_i64()?,
        Value::String(text) => text.trim().parse().ok()?,
        _ => return None,
    };
    let year = i32::try_from(year).ok()?;
    Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0)
        .single()
        .map(|date| date.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Flattens datablock file lists, splitting each path at its last `/`.
pub fn files(datablocks: &[Value]) -> Vec<File> {
    datablocks
        .iter()
        .flat_map(|block| {
            let id = match block.get("id") {
                Some(Value::String(id)) => Some(id.clone()),
                Some(Value::Number(id)) => Some(id.to_string()),
                _ => None,
            };
            block
                .get("dataFileList")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .map(move |file| {
                    let full = file.get("path").and_then(Value::as_str).unwrap_or_default();
                    let (path, name) = full.rsplit_once('/').unwrap_or(("", full));
                    File {
                        id: id.clone(),
                        name: name.to_string(),
                        path: path.to_string(),
                        size: present(file, "size"),
                    }
                })
        })
        .collect()
}

pub fn instrument(record: &Value, facility: &str) -> Instrument {
    match (str_field(record, "pid"), str_field(record, "name")) {
        (Some(pid), Some(name)) if !pid.is_empty() && !name.is_empty() => Instrument {
            pid: Some(pid),
            name: Some(name),
            facility: Some(facility.to_string()),
        },
        _ => Instrument::default(),
    }
}

pub fn sample(record: &Value) -> Sample {
    Sample {
        pid: str_field(record, "sampleId"),
        name: str_field(record, "description"),
    }
}

/// Creators then authors, deduplicated by full name. Empty unless the scope
/// includes `person`.
pub fn members(record: &Value, scope: &Filter) -> Vec<Member> {
    if scope.inclusion("person").is_none() {
        return Vec::new();
    }
    let mut seen = HashSet::new();
    ["creator", "authors"]
        .iter()
        .filter_map(|key| record.get(*key).and_then(Value::as_array))
        .flatten()
        .filter_map(Value::as_str)
        .filter(|name| seen.insert(name.to_string()))
        .map(|name| Member {
            person: Person {
                full_name: name.to_string(),
            },
        })
        .collect()
}

/// One parameter per metadata key. Keys the scope asked for in a unit are
/// converted from their SI value, the rest keep their display value.
pub fn parameters(metadata: &Map<String, Value>, scope: &Filter) -> Result<Vec<Parameter>, BridgeError> {
    let requested = scope
        .where_clause
        .as_ref()
        .map(parameter_predicates)
        .unwrap_or_default();
    metadata
        .iter()
        .map(|(name, stored)| parameter(name, stored, requested.get(name)))
        .collect()
}

fn parameter(
    name: &str,
    stored: &Value,
    requested: Option<&ParameterPredicate>,
) -> Result<Parameter, BridgeError> {
    if let Some(unit) = requested.and_then(|predicate| predicate.unit.as_deref()) {
        let value_si = stored.get("valueSI").and_then(Value::as_f64);
        let unit_si = stored.get("unitSI").and_then(Value::as_str);
        let (Some(value_si), Some(unit_si)) = (value_si, unit_si) else {
            return Err(BridgeError::MalformedPayload(format!(
                "parameter {name} has no SI value to convert to {unit}"
            )));
        };
        let converted = units::convert(value_si, unit_si, unit)?;
        return Ok(Parameter {
            name: name.to_string(),
            value: number_value(converted.value),
            unit: converted.unit,
        });
    }

    if !stored.is_object() {
        return Ok(Parameter {
            name: name.to_string(),
            value: stored.clone(),
            unit: String::new(),
        });
    }
    let value = present(stored, "value")
        .or_else(|| present(stored, "v"))
        .unwrap_or(Value::Null);
    let unit = ["unit", "u"]
        .iter()
        .find_map(|key| stored.get(*key).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();
    Ok(Parameter {
        name: name.to_string(),
        value,
        unit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_pid_prefix_is_dropped() {
        assert_eq!(normalize_pid("10.1/10.1/abc"), "10.1/abc");
        assert_eq!(normalize_pid("20.500/abc"), "20.500/abc");
        assert_eq!(normalize_pid("plain"), "plain");
    }

    #[test]
    fn release_date_is_new_year_utc() {
        assert_eq!(
            release_date(&json!(2019)).as_deref(),
            Some("2019-01-01T00:00:00.000Z")
        );
        assert_eq!(release_date(&json!("2020")).as_deref(), Some("2020-01-01T00:00:00.000Z"));
        assert_eq!(release_date(&Value::Null), None);
    }

    #[test]
    fn files_split_at_last_separator() {
        let blocks = vec![json!({
            "id": "b1",
            "dataFileList": [
                {"path": "/data/run1/file.h5", "size": 10},
                {"path": "top.txt", "size": 1}
            ]
        })];
        let mapped = files(&blocks);
        assert_eq!(mapped.len(), 2);
        assert_eq!(mapped[0].name, "file.h5");
        assert_eq!(mapped[0].path, "/data/run1");
        assert_eq!(mapped[1].path, "");
        assert_eq!(mapped[1].id.as_deref(), Some("b1"));
    }

    #[test]
    fn instrument_without_name_is_empty() {
        assert_eq!(instrument(&json!({"pid": "i1"}), "ESS"), Instrument::default());
        assert_eq!(
            instrument(&json!({"pid": "i1", "name": "LoKI"}), "ESS").facility.as_deref(),
            Some("ESS")
        );
    }

    #[test]
    fn members_require_person_scope() {
        let record = json!({"creator": ["A", "B"], "authors": ["B", "C"]});
        let with_person = Filter {
            include: vec![crate::domain::Inclusion::new("person")],
            ..Filter::default()
        };
        let names: Vec<String> = members(&record, &with_person)
            .into_iter()
            .map(|member| member.person.full_name)
            .collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert!(members(&record, &Filter::default()).is_empty());
    }

    #[test]
    fn display_values_fall_back_to_short_keys() {
        let metadata = json!({"energy": {"v": 5, "u": "keV"}, "note": "text"});
        let mapped = parameters(metadata.as_object().unwrap(), &Filter::default()).unwrap();
        assert_eq!(mapped[0].value, json!(5));
        assert_eq!(mapped[0].unit, "keV");
        assert_eq!(mapped[1].value, json!("text"));
        assert_eq!(mapped[1].unit, "");
    }

    #[test]
    fn requested_unit_needs_a_convertible_si_value() {
        let scope = Filter::with_where(json!({"and": [
            {"name": "temperature"},
            {"value": {"lt": 80}},
            {"unit": "celsius"}
        ]}));

        let display_only = json!({"temperature": {"value": 20, "unit": "celsius"}});
        let err = parameters(display_only.as_object().unwrap(), &scope).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedPayload(_)));

        let wrong_dimension = json!({"temperature": {"valueSI": 1, "unitSI": "m"}});
        let err = parameters(wrong_dimension.as_object().unwrap(), &scope).unwrap_err();
        assert!(matches!(err, BridgeError::IncompatibleUnits { .. }));
    }
}
