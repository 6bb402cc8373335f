//! # Reviewlens
//!
//! Batch review-classification service backed by an external
//! text-generation endpoint.
//!
//! Callers submit free-text reviews and receive, for each one, a
//! genuine/fake classification, a confidence score, and an explanation.
//! The model is an opaque, unreliable oracle: its output is parsed
//! defensively through a tiered fallback cascade, throttle failures are
//! retried with bounded backoff, and failures that survive retries become
//! visible `Error` records instead of aborting sibling batches.
//!
//! ## Pipeline shape
//!
//! - [`batcher`] splits reviews into a short-text bypass and fixed-size
//!   batches.
//! - [`limiter`] gates every model call behind a rolling-window budget.
//! - [`client`] pools endpoint handles round-robin.
//! - [`classifier`] prompts, parses (via [`parser`]), and retries.
//! - [`pipeline`] dispatches batches in bounded-width waves and either
//!   returns id-sorted records or streams each wave as it completes.
//! - [`jobs`] + [`server`] expose the HTTP/SSE surface.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use reviewlens::{Config, server};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(Config {
//!         mock: true,
//!         ..Default::default()
//!     });
//!     server::serve(config, 5000).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod batcher;
pub mod classifier;
pub mod client;
pub mod config;
pub mod error;
pub mod jobs;
pub mod limiter;
pub mod parser;
pub mod pipeline;
pub mod review;
pub mod server;

// Re-exports for convenience
pub use batcher::{partition, Partition};
pub use classifier::{BatchClassifier, CancelProbe, FailurePolicy};
pub use client::{ClientPool, ModelClient};
pub use config::{Args, Config, EndpointConfig, LimiterConfig, PipelineConfig, RetryConfig};
pub use error::{LensError, Result};
pub use jobs::JobStore;
pub use limiter::RequestGate;
pub use parser::{parse_batch_response, ParseOutcome};
pub use pipeline::{Pipeline, StreamEvent};
pub use review::{Classification, ClassificationRecord, ReviewInput, ReviewItem};
pub use server::AppState;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
