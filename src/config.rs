//! Configuration management for the classification service.
//!
//! Supports configuration via CLI arguments, environment variables,
//! and configuration files with sensible defaults.

use crate::error::{LensError, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments for the reviewlens server.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "reviewlens",
    version,
    about = "Batch review-classification service backed by an LLM endpoint",
    long_about = "Reviewlens classifies free-text reviews as genuine or fake by batching\n\
                  them into throttled, pooled calls to a text-generation endpoint, and\n\
                  streams results back incrementally over SSE."
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5000", env = "REVIEWLENS_PORT")]
    pub port: u16,

    /// Model endpoint URL
    #[arg(short, long, env = "REVIEWLENS_ENDPOINT_URL")]
    pub endpoint: Option<String>,

    /// API key for the model endpoint
    #[arg(long, env = "REVIEWLENS_API_KEY")]
    pub api_key: Option<String>,

    /// Model identifier sent with each invocation
    #[arg(short, long, env = "REVIEWLENS_MODEL")]
    pub model: Option<String>,

    /// Path to a JSON configuration file
    #[arg(short, long, env = "REVIEWLENS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Reviews per model invocation
    #[arg(short, long, env = "REVIEWLENS_BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Batches dispatched concurrently per wave
    #[arg(short = 'w', long, env = "REVIEWLENS_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Maximum model calls per rate window
    #[arg(short = 'r', long, env = "REVIEWLENS_RATE")]
    pub rate: Option<u32>,

    /// Maximum attempts per batch before giving up
    #[arg(short = 'a', long, env = "REVIEWLENS_MAX_ATTEMPTS")]
    pub max_attempts: Option<u32>,

    /// Answer with pseudo-random labels instead of calling the endpoint
    #[arg(long, env = "REVIEWLENS_MOCK")]
    pub mock: bool,

    /// Enable verbose logging
    #[arg(short, long, env = "REVIEWLENS_VERBOSE")]
    pub verbose: bool,

    /// Output logs as JSON
    #[arg(long, env = "REVIEWLENS_JSON_LOGS")]
    pub json_logs: bool,
}

impl Args {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Configuration for the model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// The endpoint URL.
    pub url: String,

    /// API key for authentication.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model identifier sent in the request body.
    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum tokens to generate per invocation.
    #[serde(default = "default_max_gen_len")]
    pub max_gen_len: u32,

    /// Sampling temperature. Low values keep the output template stable.
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Request timeout.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,

    /// Number of pooled client handles.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: None,
            model: default_model(),
            max_gen_len: default_max_gen_len(),
            temperature: default_temperature(),
            timeout: default_timeout(),
            pool_size: default_pool_size(),
        }
    }
}

fn default_model() -> String {
    "meta.llama3-70b-instruct-v1:0".to_string()
}

fn default_max_gen_len() -> u32 {
    1500
}

fn default_temperature() -> f64 {
    0.05
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_pool_size() -> usize {
    3
}

/// Batching and wave-concurrency settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Reviews per model invocation.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Batches dispatched concurrently per wave.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Pause between waves, smoothing the call rate.
    #[serde(with = "humantime_serde", default = "default_inter_wave_delay")]
    pub inter_wave_delay: Duration,

    /// Reviews shorter than this (after trimming) skip the model entirely.
    #[serde(default = "default_min_text_len")]
    pub min_text_len: usize,

    /// Default page size for the paged analysis route.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            inter_wave_delay: default_inter_wave_delay(),
            min_text_len: default_min_text_len(),
            page_size: default_page_size(),
        }
    }
}

fn default_batch_size() -> usize {
    12
}

fn default_concurrency() -> usize {
    3
}

fn default_inter_wave_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_min_text_len() -> usize {
    3
}

fn default_page_size() -> usize {
    8
}

/// Rolling-window admission-gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Maximum model calls admitted per window.
    #[serde(default = "default_max_per_window")]
    pub max_per_window: u32,

    /// Window length.
    #[serde(with = "humantime_serde", default = "default_window")]
    pub window: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_per_window: default_max_per_window(),
            window: default_window(),
        }
    }
}

fn default_max_per_window() -> u32 {
    100
}

fn default_window() -> Duration {
    Duration::from_secs(60)
}

/// Retry configuration for throttled batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per batch, first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff duration; attempt n waits `base_delay * n`.
    #[serde(with = "humantime_serde", default = "default_base_delay")]
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> Duration {
    Duration::from_secs(2)
}

/// Job-store lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// How long a registered-but-never-opened job survives before eviction.
    #[serde(with = "humantime_serde", default = "default_job_ttl")]
    pub ttl: Duration,

    /// Interval between eviction sweeps.
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub sweep_interval: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            ttl: default_job_ttl(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

fn default_job_ttl() -> Duration {
    Duration::from_secs(600)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

/// Full application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Model endpoint settings.
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Batching and wave settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Admission-gate settings.
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Retry settings.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Job-store settings.
    #[serde(default)]
    pub jobs: JobConfig,

    /// Skip the real endpoint and produce deterministic mock records.
    #[serde(default)]
    pub mock: bool,
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LensError::InvalidConfig(format!("cannot read '{}': {e}", path.display()))
        })?;

        serde_json::from_str(&content).map_err(LensError::Json)
    }

    /// Create configuration from CLI arguments.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = if let Some(config_path) = &args.config {
            Self::from_file(config_path)?
        } else {
            Self::default()
        };

        // CLI / env override file values
        if let Some(url) = &args.endpoint {
            config.endpoint.url = url.clone();
        }
        if let Some(key) = &args.api_key {
            config.endpoint.api_key = Some(key.clone());
        }
        if let Some(model) = &args.model {
            config.endpoint.model = model.clone();
        }
        if let Some(batch_size) = args.batch_size {
            config.pipeline.batch_size = batch_size;
        }
        if let Some(concurrency) = args.concurrency {
            config.pipeline.concurrency = concurrency;
        }
        if let Some(rate) = args.rate {
            config.limiter.max_per_window = rate;
        }
        if let Some(max_attempts) = args.max_attempts {
            config.retry.max_attempts = max_attempts;
        }
        config.mock = config.mock || args.mock;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.mock && self.endpoint.url.is_empty() {
            return Err(LensError::NoEndpoints);
        }
        if self.endpoint.pool_size == 0 {
            return Err(LensError::InvalidConfig(
                "pool_size must be greater than 0".to_string(),
            ));
        }
        if self.pipeline.batch_size == 0 {
            return Err(LensError::InvalidConfig(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        if self.pipeline.concurrency == 0 {
            return Err(LensError::InvalidConfig(
                "concurrency must be greater than 0".to_string(),
            ));
        }
        if self.limiter.max_per_window == 0 {
            return Err(LensError::InvalidConfig(
                "max_per_window must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(LensError::InvalidConfig(
                "max_attempts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Custom serde module for humantime Duration parsing.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() != 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        // Simple parsing: support "30s", "100ms", or just seconds as number
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
