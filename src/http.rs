use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub fn user_agent() -> String {
    format!("search-bridge/{}", env!("CARGO_PKG_VERSION"))
}

/// Blocking client with the crate user agent and a JSON accept header.
/// Failures are reported through `on_error` so each upstream keeps its own
/// error variant.
pub fn build_client<E>(timeout: Duration, on_error: impl Fn(String) -> E) -> Result<Client, E> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&user_agent()).map_err(|err| on_error(err.to_string()))?,
    );
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|err| on_error(err.to_string()))
}

/// Turns a non-2xx response into `(status, body)`.
pub fn check_status(response: Response) -> Result<Response, (u16, String)> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .unwrap_or_else(|_| format!("request failed with status {status}"));
    Err((status, message))
}

pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_without_double_slashes() {
        assert_eq!(
            join_url("http://localhost:3030/api/v3/", "/datasets"),
            "http://localhost:3030/api/v3/datasets"
        );
        assert!(user_agent().starts_with("search-bridge/"));
    }
}
