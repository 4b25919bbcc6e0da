//! Transport client
//!
//! One HTTP request/response exchange per call. `HttpTransport` never blocks
//! past the request's timeout: reqwest enforces a connect timeout so
//! unreachable hosts fail fast, and the whole exchange is wrapped in
//! `tokio::time::timeout`.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use serde::{Serialize, Deserialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::TransportError;
use crate::util::sanitize_for_logging;

/// Default per-attempt timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on establishing a connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_USER_AGENT: &str = concat!("request-orchestrator/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl Default for HttpMethod {
    fn default() -> Self {
        HttpMethod::Post
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
            HttpMethod::Delete => write!(f, "DELETE"),
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A single outbound exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportRequest {
    pub url: String,
    pub method: HttpMethod,
    pub body: Option<String>,
    pub headers: HashMap<String, String>,
    /// Per-attempt bound on the whole exchange
    pub timeout: Duration,
}

impl TransportRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            body: None,
            headers: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// POST with a JSON body and `Content-Type: application/json`
    pub fn post_json(url: impl Into<String>, body: &serde_json::Value) -> Self {
        Self::new(HttpMethod::Post, url)
            .with_header("Content-Type", "application/json")
            .with_body(body.to_string())
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A complete response, whatever its status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Executes one request/response exchange
#[async_trait]
pub trait Transport: Send + Sync {
    /// Non-2xx statuses are returned as responses, not errors
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(connect_timeout)
            .gzip(true)
            .build()
            .map_err(|e| TransportError::invalid_request(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Uses a preconfigured client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn build(&self, request: &TransportRequest) -> Result<reqwest::RequestBuilder, TransportError> {
        let url = Url::parse(&request.url)
            .map_err(|e| TransportError::invalid_request(format!("Invalid URL {}: {}", request.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransportError::invalid_request(format!(
                "Unsupported URL scheme: {}",
                url.scheme()
            )));
        }

        let mut headers = HeaderMap::new();
        for (key, value) in &request.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| TransportError::invalid_request(format!("Invalid header name {}: {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::invalid_request(format!("Invalid value for header {}: {}", key, e)))?;
            headers.insert(name, value);
        }
        if request.body.is_some() && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        let mut builder = self
            .client
            .request(request.method.into(), url)
            .headers(headers)
            .timeout(request.timeout);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        Ok(builder)
    }

    async fn exchange(&self, builder: reqwest::RequestBuilder, timeout: Duration) -> Result<TransportResponse, TransportError> {
        let response = builder.send().await.map_err(|e| map_reqwest_error(e, timeout))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(timeout)
            } else {
                TransportError::malformed(format!("Failed to read response body: {}", e))
            }
        })?;

        Ok(TransportResponse { status, headers, body })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let builder = self.build(&request)?;
        debug!(method = %request.method, url = %sanitize_for_logging(&request.url), "Sending request");

        let response = tokio::time::timeout(request.timeout, self.exchange(builder, request.timeout))
            .await
            .map_err(|_| TransportError::Timeout(request.timeout))?;

        match &response {
            Ok(resp) => debug!(status = resp.status, bytes = resp.body.len(), "Response received"),
            Err(e) => warn!(url = %sanitize_for_logging(&request.url), error = %e, "Request failed"),
        }
        response
    }
}

fn map_reqwest_error(error: reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(timeout)
    } else if error.is_connect() {
        TransportError::connection_refused(error.to_string())
    } else if error.is_builder() {
        TransportError::invalid_request(error.to_string())
    } else if error.is_decode() || error.is_body() {
        TransportError::malformed(error.to_string())
    } else {
        TransportError::network(error.to_string())
    }
}
