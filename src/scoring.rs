use std::collections::HashMap;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::http::{self, DEFAULT_TIMEOUT};

pub const DEFAULT_SCORING_URL: &str = "http://localhost:8000";

/// Item id to relevance score.
pub type Scores = HashMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRequest<'a> {
    pub query: &'a str,
    pub item_ids: Vec<String>,
    pub group: &'a str,
    pub limit: i64,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    scores: Vec<ScoreEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScoreEntry {
    item_id: String,
    score: f64,
}

pub trait ScoringClient: Send + Sync {
    /// Scores `item_ids` in `group` against `query`. An unreachable service
    /// yields an empty map.
    fn score(&self, query: &str, item_ids: &[String], group: &str) -> Result<Scores, BridgeError>;

    /// The service's status document, with `status` defaulting to 1 and set
    /// to 0 when the service cannot be reached.
    fn status(&self) -> Value;
}

#[derive(Clone)]
pub struct ScoringHttpClient {
    client: Client,
    base_url: String,
    pass_ids: bool,
}

impl ScoringHttpClient {
    pub fn new(base_url: &str, pass_ids: bool) -> Result<Self, BridgeError> {
        let client = http::build_client(DEFAULT_TIMEOUT, BridgeError::ScoringHttp)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            pass_ids,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_scores(&self, request: &ScoreRequest<'_>) -> Result<String, BridgeError> {
        let response = self
            .client
            .post(http::join_url(&self.base_url, "score"))
            .json(request)
            .send()
            .map_err(|err| BridgeError::ScoringHttp(err.to_string()))?;
        let response = http::check_status(response)
            .map_err(|(status, message)| BridgeError::ScoringStatus { status, message })?;
        response
            .text()
            .map_err(|err| BridgeError::ScoringHttp(err.to_string()))
    }
}

impl ScoringClient for ScoringHttpClient {
    fn score(&self, query: &str, item_ids: &[String], group: &str) -> Result<Scores, BridgeError> {
        let request = ScoreRequest {
            query,
            item_ids: if self.pass_ids { item_ids.to_vec() } else { Vec::new() },
            group,
            limit: -1,
        };
        debug!(query, group, items = item_ids.len(), pass_ids = self.pass_ids, "requesting scores");
        let body = match self.request_scores(&request) {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "scoring service unavailable, using empty scores");
                return Ok(Scores::new());
            }
        };
        parse_scores(&body)
    }

    fn status(&self) -> Value {
        let body = self
            .client
            .get(&self.base_url)
            .send()
            .and_then(|response| response.json::<Value>());
        match body {
            Ok(body) => with_default_status(body),
            Err(err) => {
                warn!(error = %err, "scoring service unreachable");
                serde_json::json!({ "status": 0 })
            }
        }
    }
}

pub fn parse_scores(body: &str) -> Result<Scores, BridgeError> {
    let response: ScoreResponse =
        serde_json::from_str(body).map_err(|err| BridgeError::MalformedPayload(err.to_string()))?;
    Ok(response
        .scores
        .into_iter()
        .map(|entry| (entry.item_id, entry.score))
        .collect())
}

pub fn with_default_status(body: Value) -> Value {
    match body {
        Value::Object(mut map) => {
            map.entry("status").or_insert(Value::from(1));
            Value::Object(map)
        }
        _ => serde_json::json!({ "status": 1 }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_score_list() {
        let scores = parse_scores(r#"{"scores":[{"itemId":"a","score":0.5},{"itemId":"b","score":1}]}"#)
            .unwrap();
        assert_eq!(scores.get("a"), Some(&0.5));
        assert_eq!(scores.get("b"), Some(&1.0));
    }

    #[test]
    fn malformed_scores_fail() {
        assert!(matches!(
            parse_scores(r#"{"results":[]}"#),
            Err(BridgeError::MalformedPayload(_))
        ));
    }

    #[test]
    fn status_defaults_to_one() {
        assert_eq!(with_default_status(json!({"version": "2"}))["status"], json!(1));
        assert_eq!(with_default_status(json!({"status": 3}))["status"], json!(3));
    }

    #[test]
    fn request_uses_camel_case() {
        let request = ScoreRequest {
            query: "xray",
            item_ids: vec!["p1".to_string()],
            group: "datasets",
            limit: -1,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"query": "xray", "itemIds": ["p1"], "group": "datasets", "limit": -1})
        );
    }
}
