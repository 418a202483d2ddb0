//! HTTP transport abstraction
//!
//! The gateway is reached through a minimal request/response interface so the
//! adapter can be exercised against stub transports in tests. The production
//! implementation wraps a shared `reqwest::Client`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::config::{ApiSettings, MIN_TIMEOUT_MS};
use crate::error::{LinkError, Result};

/// Response from the gateway
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Generic request/response interface to the gateway
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// POST a JSON body to `endpoint` (path relative to the base URL).
    async fn post(&self, endpoint: &str, body: &str) -> Result<HttpResponse>;

    /// GET `endpoint` (path relative to the base URL).
    async fn get(&self, endpoint: &str) -> Result<HttpResponse>;
}

/// `reqwest`-backed transport carrying the pre-shared API key
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ReqwestTransport {
    /// Build a transport from the API settings and a per-request timeout.
    ///
    /// The timeout is clamped up to the configured minimum.
    pub fn new(api: &ApiSettings, timeout: Duration) -> Result<Self> {
        let timeout = timeout.max(Duration::from_millis(MIN_TIMEOUT_MS));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LinkError::transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            api_key: api.api_key.clone(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{endpoint}", self.base_url)
    }

    async fn into_response(response: reqwest::Response) -> Result<HttpResponse> {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;

        Ok(HttpResponse {
            status,
            body,
            headers,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post(&self, endpoint: &str, body: &str) -> Result<HttpResponse> {
        let url = self.url(endpoint);
        trace!("POST {url}: {body}");

        let response = self
            .client
            .post(&url)
            .header("Authorization", &self.api_key)
            .header("Content-Type", "application/json")
            .header("Accept", "*/*")
            .body(body.to_string())
            .send()
            .await?;

        Self::into_response(response).await
    }

    async fn get(&self, endpoint: &str) -> Result<HttpResponse> {
        let url = self.url(endpoint);
        trace!("GET {url}");

        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.api_key)
            .header("Accept", "*/*")
            .send()
            .await?;

        Self::into_response(response).await
    }
}
