//! Canned key-set fetcher.

use std::collections::BTreeMap;

use oidc_op_checks::fetch::{FetchError, HttpResponse, KeySetFetcher};
use serde_json::Value;

/// Serves fixed responses by URL; any other URL fails to connect.
#[derive(Debug, Clone, Default)]
pub struct FakeFetcher {
    responses: BTreeMap<String, HttpResponse>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` as a 200 JSON response at `url`
    pub fn with_json(mut self, url: &str, body: Value) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        self.responses.insert(
            url.to_string(),
            HttpResponse {
                status: 200,
                headers,
                body: body.to_string(),
            },
        );
        self
    }

    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.responses.insert(
            url.to_string(),
            HttpResponse {
                status,
                ..HttpResponse::default()
            },
        );
        self
    }
}

impl KeySetFetcher for FakeFetcher {
    fn fetch(&self, url: &str) -> Result<HttpResponse, FetchError> {
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::RequestFailed {
                message: format!("connection refused: {}", url),
            })
    }
}
