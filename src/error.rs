use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum BridgeError {
    #[error("{message}")]
    #[diagnostic(code(search_bridge::filter))]
    Filter { message: String },

    #[error("invalid filter JSON: {0}")]
    InvalidFilterJson(String),

    #[error("unknown unit: {0}")]
    UnknownUnit(String),

    #[error("cannot convert {from} to {to}: incompatible dimensions")]
    IncompatibleUnits { from: String, to: String },

    #[error("range bounds use different units: expected {expected}, found {found}")]
    UnitMismatch { expected: String, found: String },

    #[error("failed to encode catalog filter: {0}")]
    EncodeFilter(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("scoring request failed: {0}")]
    ScoringHttp(String),

    #[error("scoring service returned status {status}: {message}")]
    ScoringStatus { status: u16, message: String },

    #[error("ontology request failed: {0}")]
    OntologyHttp(String),

    #[error("ontology service returned status {status}: {message}")]
    OntologyStatus { status: u16, message: String },

    #[error("malformed upstream payload: {0}")]
    MalformedPayload(String),

    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("record store error: {0}")]
    Store(String),

    #[error("worker task panicked: {0}")]
    TaskPanicked(String),
}

impl BridgeError {
    pub fn filter(message: impl Into<String>) -> Self {
        BridgeError::Filter {
            message: message.into(),
        }
    }

    /// HTTP-equivalent status for the API boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            BridgeError::Filter { .. }
            | BridgeError::InvalidFilterJson(_)
            | BridgeError::UnknownUnit(_)
            | BridgeError::IncompatibleUnits { .. }
            | BridgeError::UnitMismatch { .. } => 400,
            BridgeError::NotFound(_) => 404,
            BridgeError::CatalogStatus { status, .. } => *status,
            BridgeError::CatalogHttp(_)
            | BridgeError::ScoringHttp(_)
            | BridgeError::ScoringStatus { .. }
            | BridgeError::OntologyHttp(_)
            | BridgeError::OntologyStatus { .. }
            | BridgeError::MalformedPayload(_) => 502,
            _ => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_errors_are_client_errors() {
        let err = BridgeError::filter("Parameter name was not provided");
        assert_eq!(err.status_code(), 400);
        assert!(err.is_client_error());
        assert_eq!(err.to_string(), "Parameter name was not provided");
    }

    #[test]
    fn catalog_status_is_forwarded() {
        let err = BridgeError::CatalogStatus {
            status: 503,
            message: "down".to_string(),
        };
        assert_eq!(err.status_code(), 503);
        assert!(!err.is_client_error());
    }
}
