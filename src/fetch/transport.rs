//! Network transport used by the cached fetch wrapper

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Client, Method};

use crate::error::FetchError;

/// A request as the transport sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// HTTP method, upper case
    pub method: String,
    /// Absolute URL
    pub url: String,
    /// Request headers
    pub headers: BTreeMap<String, String>,
    /// Request body, if any
    pub body: Option<String>,
}

/// Status and body of a completed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// HTTP status code
    pub status: u16,
    /// Raw response body
    pub body: String,
}

impl FetchResponse {
    /// Whether the status is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends requests on behalf of [`CachedFetcher`](super::CachedFetcher)
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs the request and returns whatever status the server answered with
    async fn send(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// Transport backed by a `reqwest::Client`
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a new transport with default client settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new transport with a custom HTTP client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| FetchError::Transport(format!("invalid method '{}': {e}", request.method)))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(FetchResponse { status, body })
    }
}
