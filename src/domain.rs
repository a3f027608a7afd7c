use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Dataset,
    Document,
    Instrument,
    Sample,
    File,
    Technique,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Dataset => write!(f, "dataset"),
            EntityKind::Document => write!(f, "document"),
            EntityKind::Instrument => write!(f, "instrument"),
            EntityKind::Sample => write!(f, "sample"),
            EntityKind::File => write!(f, "file"),
            EntityKind::Technique => write!(f, "technique"),
        }
    }
}

/// A filter in the standardized search dialect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<Inclusion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl Filter {
    pub fn with_where(where_clause: Value) -> Self {
        Self {
            where_clause: Some(where_clause),
            ..Self::default()
        }
    }

    pub fn inclusion(&self, relation: &str) -> Option<&Inclusion> {
        self.include
            .iter()
            .find(|inclusion| inclusion.relation == relation)
    }

    pub fn inclusion_mut(&mut self, relation: &str) -> Option<&mut Inclusion> {
        self.include
            .iter_mut()
            .find(|inclusion| inclusion.relation == relation)
    }

    /// The `where` of a relation's scope, when one was given.
    pub fn scoped_where(&self, relation: &str) -> Option<&Value> {
        self.inclusion(relation)
            .and_then(|inclusion| inclusion.scope.as_ref())
            .and_then(|scope| scope.where_clause.as_ref())
    }
}

impl FromStr for Filter {
    type Err = BridgeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(Filter::default());
        }
        serde_json::from_str(trimmed).map_err(|err| BridgeError::InvalidFilterJson(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inclusion {
    pub relation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Filter>,
}

impl Inclusion {
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            scope: None,
        }
    }

    pub fn scoped(relation: impl Into<String>, scope: Filter) -> Self {
        Self {
            relation: relation.into(),
            scope: Some(scope),
        }
    }
}

/// Serializes as `{}` when the related entity could not be resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Related<T> {
    Found(T),
    Missing(Empty),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Empty {}

impl<T> Related<T> {
    pub fn found(&self) -> Option<&T> {
        match self {
            Related::Found(value) => Some(value),
            Related::Missing(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<Related<Box<Document>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<File>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instrument: Option<Instrument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<Parameter>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples: Option<Vec<Sample>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub techniques: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<String>,
    pub is_public: bool,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datasets: Option<Vec<Dataset>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<Member>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<Parameter>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub person: Person,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub full_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Count {
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_filter_json() {
        let filter: Filter =
            r#"{"where":{"title":"x"},"include":[{"relation":"files"}],"limit":3}"#
                .parse()
                .unwrap();
        assert_eq!(filter.where_clause, Some(json!({"title": "x"})));
        assert_eq!(filter.include[0].relation, "files");
        assert_eq!(filter.limit, Some(3));
    }

    #[test]
    fn missing_document_serializes_as_empty_object() {
        let dataset = Dataset {
            pid: Some("p1".to_string()),
            document: Some(Related::Missing(Empty {})),
            ..Dataset::default()
        };
        let value = serde_json::to_value(&dataset).unwrap();
        assert_eq!(value["document"], json!({}));
        assert_eq!(value["score"], json!(0.0));
    }
}
