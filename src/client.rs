//! HTTP clients for the text-generation endpoint.
//!
//! A fixed-size pool of independent handles, selected round-robin, keeps
//! one connection from becoming a serialization point and spreads
//! connection/credential overhead across handles.

use crate::config::EndpointConfig;
use crate::error::{LensError, Result};
use reqwest::{header, Client};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::trace;

/// A single handle to the text-generation endpoint.
#[derive(Debug, Clone)]
pub struct ModelClient {
    client: Client,
    config: EndpointConfig,
}

impl ModelClient {
    /// Create a new client from endpoint configuration.
    pub fn new(config: EndpointConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(config.timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .default_headers(headers)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(LensError::HttpRequest)?;

        Ok(Self { client, config })
    }

    /// Send a prompt and return the raw completion text.
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt,
            "max_gen_len": self.config.max_gen_len,
            "temperature": self.config.temperature,
        });

        let mut request = self.client.post(&self.config.url).json(&body);
        if let Some(api_key) = &self.config.api_key {
            request = request.header(header::AUTHORIZATION, format!("Bearer {api_key}"));
        }

        trace!(url = %self.config.url, "sending model request");

        let response = request.send().await.map_err(|e| LensError::Upstream {
            status: e.status().map(|s| s.as_u16()),
            message: format!("request failed: {e}"),
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(LensError::Upstream {
                status: Some(status.as_u16()),
                message: truncate_body(&error_body, 500),
            });
        }

        let text = response.text().await.map_err(|e| LensError::Upstream {
            status: Some(status.as_u16()),
            message: format!("failed to read response body: {e}"),
        })?;

        Ok(extract_completion(&text))
    }
}

/// Truncate an error body to at most `max` bytes, never splitting a
/// multi-byte character.
fn truncate_body(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// Pull the completion out of the endpoint's JSON envelope.
///
/// Different serving stacks name the field differently; fall back to the
/// raw body when none of the known fields is present or the body is not
/// JSON at all.
fn extract_completion(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["generation", "completion", "text"] {
            if let Some(s) = value.get(field).and_then(|v| v.as_str()) {
                return s.to_string();
            }
        }
    }
    body.to_string()
}

/// Round-robin pool of model clients.
#[derive(Debug)]
pub struct ClientPool {
    clients: Vec<ModelClient>,
    next: AtomicUsize,
}

impl ClientPool {
    /// Build a pool of `config.pool_size` independent handles.
    pub fn new(config: &EndpointConfig) -> Result<Self> {
        if config.pool_size == 0 {
            return Err(LensError::InvalidConfig(
                "pool_size must be greater than 0".to_string(),
            ));
        }

        let clients = (0..config.pool_size)
            .map(|_| ModelClient::new(config.clone()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            clients,
            next: AtomicUsize::new(0),
        })
    }

    /// Select the next handle round-robin.
    pub fn next(&self) -> &ModelClient {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        &self.clients[index]
    }

    /// Number of pooled handles.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the pool is empty (never true for a constructed pool).
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
