//! Etherscan-compatible account history client.
//!
//! One fetch is one `module=account` listing for a node, transaction type
//! and block range. Provider-declared failures come back inside a
//! `200 OK` envelope and are classified by `ttr_core::parse_response`.

use crate::config::CrawlConfig;
use crate::error::CrawlError;
use crate::fetcher::Fetcher;
use crate::request::FetchRequest;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use ttr_core::{parse_response, Edge, FetchError};

/// Whether a response body is worth caching: the provider answered with a
/// list of records rather than an error message.
pub fn is_fresh(body: &str) -> bool {
    serde_json::from_str::<Value>(body)
        .map(|envelope| envelope.get("result").is_some_and(Value::is_array))
        .unwrap_or(false)
}

pub struct EtherscanFetcher {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    cache: Option<Mutex<HashMap<String, String>>>,
}

impl EtherscanFetcher {
    pub fn new(config: &CrawlConfig) -> Result<Self, CrawlError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("ttr/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            cache: config.cache_responses.then(|| Mutex::new(HashMap::new())),
        })
    }

    /// Query parameters for a request, without the API key.
    pub fn query(request: &FetchRequest) -> Vec<(&'static str, String)> {
        vec![
            ("module", "account".to_string()),
            ("action", request.tx_type.action().to_string()),
            ("address", request.node.to_string()),
            ("startblock", request.range.start.to_string()),
            ("endblock", request.range.end.to_string()),
            ("sort", "asc".to_string()),
        ]
    }

    fn cache_key(request: &FetchRequest) -> String {
        format!(
            "{}:{}:{}:{}",
            request.tx_type.action(),
            request.node,
            request.range.start,
            request.range.end
        )
    }

    fn cached(&self, key: &str) -> Option<String> {
        let cache = self.cache.as_ref()?.lock().ok()?;
        cache.get(key).cloned()
    }

    fn remember(&self, key: String, body: String) {
        if let Some(cache) = &self.cache {
            if let Ok(mut cache) = cache.lock() {
                cache.insert(key, body);
            }
        }
    }

    async fn get(&self, request: &FetchRequest) -> Result<String, FetchError> {
        let mut query = Self::query(request);
        if let Some(key) = &self.api_key {
            query.push(("apikey", key.clone()));
        }

        let response = self
            .client
            .get(&self.base_url)
            .query(&query)
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(FetchError::Transient(format!("HTTP {}", status)));
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl Fetcher for EtherscanFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Edge>, FetchError> {
        let key = Self::cache_key(request);
        if let Some(body) = self.cached(&key) {
            debug!("Cache hit for {}", request);
            return parse_response(&body, request.tx_type);
        }

        debug!("Fetching {}", request);
        let body = self.get(request).await?;
        let edges = parse_response(&body, request.tx_type)?;
        if is_fresh(&body) {
            self.remember(key, body);
        }
        Ok(edges)
    }
}
