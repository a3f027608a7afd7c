use reqwest::blocking::Client;
use serde_json::Value;
use tracing::debug;

use crate::domain::Filter;
use crate::error::BridgeError;
use crate::http::{self, DEFAULT_TIMEOUT};

/// Expands a technique where clause into an equivalent where clause over
/// technique pids.
pub trait OntologyExpander: Send + Sync {
    fn expand(&self, where_clause: &Value) -> Result<Value, BridgeError>;
}

#[derive(Clone)]
pub struct OntologyHttpClient {
    client: Client,
    url: String,
}

impl OntologyHttpClient {
    pub fn new(base_url: &str) -> Result<Self, BridgeError> {
        let client = http::build_client(DEFAULT_TIMEOUT, BridgeError::OntologyHttp)?;
        Ok(Self {
            client,
            url: http::join_url(base_url, "techniques/pan-ontology"),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl OntologyExpander for OntologyHttpClient {
    fn expand(&self, where_clause: &Value) -> Result<Value, BridgeError> {
        let encoded = serde_json::to_string(where_clause)
            .map_err(|err| BridgeError::OntologyHttp(err.to_string()))?;
        let response = self
            .client
            .get(&self.url)
            .query(&[("where", encoded)])
            .send()
            .map_err(|err| BridgeError::OntologyHttp(err.to_string()))?;
        let response = http::check_status(response)
            .map_err(|(status, message)| BridgeError::OntologyStatus { status, message })?;
        let expanded: Value = response
            .json()
            .map_err(|err| BridgeError::MalformedPayload(err.to_string()))?;
        debug!(%expanded, "expanded technique filter");
        Ok(expanded)
    }
}

/// Identity when no ontology service is configured.
pub enum OntologyService {
    Identity,
    Remote(OntologyHttpClient),
}

impl OntologyService {
    pub fn from_url(base_url: Option<&str>) -> Result<Self, BridgeError> {
        match base_url {
            Some(url) => Ok(OntologyService::Remote(OntologyHttpClient::new(url)?)),
            None => Ok(OntologyService::Identity),
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            OntologyService::Identity => None,
            OntologyService::Remote(client) => Some(client.url()),
        }
    }
}

impl OntologyExpander for OntologyService {
    fn expand(&self, where_clause: &Value) -> Result<Value, BridgeError> {
        match self {
            OntologyService::Identity => Ok(where_clause.clone()),
            OntologyService::Remote(client) => client.expand(where_clause),
        }
    }
}

/// Rewrites `include[datasets].scope.include[techniques].scope.where` of a
/// document filter with the expander.
pub fn expand_techniques_in_filter(
    mut filter: Filter,
    expander: &dyn OntologyExpander,
) -> Result<Filter, BridgeError> {
    let Some(datasets) = filter
        .inclusion_mut("datasets")
        .and_then(|inclusion| inclusion.scope.as_mut())
    else {
        return Ok(filter);
    };
    for inclusion in datasets
        .include
        .iter_mut()
        .filter(|inclusion| inclusion.relation == "techniques")
    {
        if let Some(scope) = inclusion.scope.as_mut() {
            if let Some(where_clause) = scope.where_clause.as_ref() {
                scope.where_clause = Some(expander.expand(where_clause)?);
            }
        }
    }
    Ok(filter)
}
