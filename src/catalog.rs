use std::fmt;

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde_json::Value;
use tracing::debug;

use crate::domain::Count;
use crate::error::BridgeError;
use crate::filter_mapper::CatalogFilter;
use crate::http::{self, DEFAULT_TIMEOUT};

pub const DEFAULT_CATALOG_URL: &str = "http://localhost:3030/api/v3";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogResource {
    Datasets,
    PublishedData,
    Instruments,
    Samples,
}

impl CatalogResource {
    pub fn path(self) -> &'static str {
        match self {
            CatalogResource::Datasets => "datasets",
            CatalogResource::PublishedData => "publisheddata",
            CatalogResource::Instruments => "instruments",
            CatalogResource::Samples => "samples",
        }
    }
}

impl fmt::Display for CatalogResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Query surface of the backend catalog. Records are returned as raw JSON
/// in the catalog's own vocabulary.
pub trait CatalogClient: Send + Sync {
    fn find(&self, resource: CatalogResource, filter: &CatalogFilter) -> Result<Vec<Value>, BridgeError>;

    /// `Ok(None)` when the catalog has no record with that id.
    fn find_by_id(
        &self,
        resource: CatalogResource,
        id: &str,
        filter: &CatalogFilter,
    ) -> Result<Option<Value>, BridgeError>;

    fn count(&self, resource: CatalogResource, where_clause: Option<&Value>) -> Result<Count, BridgeError>;

    fn find_origdatablocks(&self, dataset_pid: &str, filter: &CatalogFilter) -> Result<Vec<Value>, BridgeError>;
}

#[derive(Clone)]
pub struct CatalogHttpClient {
    client: Client,
    base_url: String,
}

impl CatalogHttpClient {
    pub fn new(base_url: &str) -> Result<Self, BridgeError> {
        let client = http::build_client(DEFAULT_TIMEOUT, BridgeError::CatalogHttp)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn send(&self, path: &str, param: Option<(&str, String)>) -> Result<Response, BridgeError> {
        let url = http::join_url(&self.base_url, path);
        debug!(%url, param = ?param, "querying catalog");
        let mut request = self.client.get(&url);
        if let Some(param) = param {
            request = request.query(&[param]);
        }
        request
            .send()
            .map_err(|err| BridgeError::CatalogHttp(err.to_string()))
    }

    fn read_body(response: Response) -> Result<Option<Value>, BridgeError> {
        let response = http::check_status(response)
            .map_err(|(status, message)| BridgeError::CatalogStatus { status, message })?;
        let text = response
            .text()
            .map_err(|err| BridgeError::CatalogHttp(err.to_string()))?;
        parse_body(&text)
    }

    /// A 404 or an empty body means the record does not exist.
    fn get_optional(&self, path: &str, param: Option<(&str, String)>) -> Result<Option<Value>, BridgeError> {
        let response = self.send(path, param)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::read_body(response)
    }

    fn get_required(&self, path: &str, param: Option<(&str, String)>) -> Result<Value, BridgeError> {
        let response = self.send(path, param)?;
        Self::read_body(response)?
            .ok_or_else(|| BridgeError::MalformedPayload(format!("empty response from {path}")))
    }

    fn filter_param(filter: &CatalogFilter) -> Result<Option<(&'static str, String)>, BridgeError> {
        if filter.is_empty() {
            return Ok(None);
        }
        Ok(Some(("filter", filter.to_json()?)))
    }

    fn list(&self, path: &str, filter: &CatalogFilter) -> Result<Vec<Value>, BridgeError> {
        match self.get_required(path, Self::filter_param(filter)?)? {
            Value::Array(items) => Ok(items),
            other => Err(BridgeError::MalformedPayload(format!(
                "expected an array from {path}, got {other}"
            ))),
        }
    }
}

impl CatalogClient for CatalogHttpClient {
    fn find(&self, resource: CatalogResource, filter: &CatalogFilter) -> Result<Vec<Value>, BridgeError> {
        self.list(resource.path(), filter)
    }

    fn find_by_id(
        &self,
        resource: CatalogResource,
        id: &str,
        filter: &CatalogFilter,
    ) -> Result<Option<Value>, BridgeError> {
        let path = format!("{}/{}", resource.path(), urlencoding::encode(id));
        self.get_optional(&path, Self::filter_param(filter)?)
    }

    fn count(&self, resource: CatalogResource, where_clause: Option<&Value>) -> Result<Count, BridgeError> {
        let param = where_clause.map(|where_clause| ("where", where_clause.to_string()));
        let path = format!("{}/count", resource.path());
        let body = self.get_required(&path, param)?;
        serde_json::from_value(body).map_err(|err| BridgeError::MalformedPayload(err.to_string()))
    }

    fn find_origdatablocks(&self, dataset_pid: &str, filter: &CatalogFilter) -> Result<Vec<Value>, BridgeError> {
        let path = format!("datasets/{}/origdatablocks", urlencoding::encode(dataset_pid));
        self.list(&path, filter)
    }
}

fn parse_body(text: &str) -> Result<Option<Value>, BridgeError> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    let body: Value =
        serde_json::from_str(text).map_err(|err| BridgeError::MalformedPayload(err.to_string()))?;
    Ok((!body.is_null()).then_some(body))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn resource_paths() {
        assert_eq!(CatalogResource::PublishedData.path(), "publisheddata");
        assert_eq!(CatalogResource::Datasets.to_string(), "datasets");
    }

    #[test]
    fn base_url_is_trimmed() {
        let client = CatalogHttpClient::new("http://localhost:3030/api/v3/").unwrap();
        assert_eq!(client.base_url(), DEFAULT_CATALOG_URL);
    }

    #[test]
    fn blank_and_null_bodies_are_absent() {
        assert_eq!(parse_body("  ").unwrap(), None);
        assert_eq!(parse_body("null").unwrap(), None);
        assert_eq!(parse_body(r#"{"count": 2}"#).unwrap(), Some(json!({"count": 2})));
        assert!(matches!(parse_body("<html>"), Err(BridgeError::MalformedPayload(_))));
    }
}
