//! Custom error types for the classification pipeline.
//!
//! This module defines all error types used throughout the application,
//! following Rust best practices with `thiserror` for library errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Errors that can occur during review classification.
#[derive(Error, Debug)]
pub enum LensError {
    /// Request input was missing or malformed.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The requested streaming job does not exist (or was already consumed).
    #[error("invalid or missing jobId")]
    JobNotFound,

    /// The upstream model endpoint signalled throttling.
    #[error("upstream throttled: {message}")]
    UpstreamThrottled {
        /// Message reported by the endpoint.
        message: String,
    },

    /// The upstream model endpoint failed for a non-throttle reason.
    #[error("upstream error: {message}")]
    Upstream {
        /// HTTP status code, when the endpoint responded at all.
        status: Option<u16>,
        /// Response body or transport error, truncated.
        message: String,
    },

    /// HTTP transport failed before a response was received.
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// Failed to serialize or deserialize JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The subscriber went away; abandon in-flight work.
    #[error("request cancelled by client")]
    Cancelled,

    /// No model endpoints configured.
    #[error("no endpoints configured - at least one endpoint is required")]
    NoEndpoints,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Server socket or I/O failure.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LensError {
    /// Whether this failure is worth retrying with backoff.
    ///
    /// Matches the throttle vocabulary upstream endpoints use; anything
    /// else is treated as fatal for the current batch.
    pub fn is_throttle(&self) -> bool {
        match self {
            Self::UpstreamThrottled { .. } => true,
            Self::Upstream { status, message } => {
                *status == Some(429) || message_is_throttle(message)
            }
            Self::HttpRequest(e) => {
                e.status().map(|s| s.as_u16()) == Some(429)
                    || message_is_throttle(&e.to_string())
            }
            _ => false,
        }
    }

    /// HTTP status this error maps to when surfaced at the request level.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::JobNotFound => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn message_is_throttle(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("throttl")
        || lower.contains("rate")
        || lower.contains("too many requests")
        || lower.contains("429")
}

impl IntoResponse for LensError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, LensError>;
