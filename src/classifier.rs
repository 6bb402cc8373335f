//! Batch classification against the model endpoint, with retry/backoff.
//!
//! One prompt per batch, one labeled output block per item. Throttle
//! errors are retried with linear-growth backoff up to a bounded attempt
//! count; exhaustion degrades into per-item `Error` records instead of
//! failing the whole request.

use crate::client::ClientPool;
use crate::config::Config;
use crate::error::{LensError, Result};
use crate::limiter::RequestGate;
use crate::parser::parse_batch_response;
use crate::review::{Classification, ClassificationRecord, ReviewItem};
use rand::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// What to do with a batch whose failure is not retryable (or whose
/// retries are exhausted by a non-throttle error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Degrade into per-item `Error` records; siblings are unaffected.
    Contain,
    /// Surface the error to the caller as a request-level failure.
    Propagate,
}

/// Probe for client disconnection, threaded down into the retry loop so
/// an abandoned stream stops consuming rate budget.
#[derive(Clone)]
pub struct CancelProbe(Arc<dyn Fn() -> bool + Send + Sync>);

impl CancelProbe {
    /// A probe that never fires (synchronous request paths).
    pub fn never() -> Self {
        Self(Arc::new(|| false))
    }

    /// Build a probe from a closure reporting disconnection.
    pub fn from_fn(f: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Whether the subscriber has gone away.
    pub fn is_cancelled(&self) -> bool {
        (self.0)()
    }
}

impl std::fmt::Debug for CancelProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelProbe")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Classifies one batch per model invocation.
#[derive(Debug)]
pub struct BatchClassifier {
    config: Arc<Config>,
    gate: RequestGate,
    pool: ClientPool,
}

impl BatchClassifier {
    /// Create a classifier sharing one admission gate and client pool
    /// across all requests.
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let gate = RequestGate::new(config.limiter.max_per_window, config.limiter.window);
        let pool = ClientPool::new(&config.endpoint)?;
        Ok(Self { config, gate, pool })
    }

    /// Classify a batch, retrying throttle failures.
    ///
    /// Always returns exactly one record per input item on the `Ok` path.
    /// With [`FailurePolicy::Contain`] the error path is unreachable
    /// except for cancellation.
    pub async fn classify(
        &self,
        batch: &[ReviewItem],
        policy: FailurePolicy,
        cancel: &CancelProbe,
    ) -> Result<Vec<ClassificationRecord>> {
        if self.config.mock {
            return Ok(self.classify_mock(batch).await);
        }

        let max_attempts = self.config.retry.max_attempts;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(LensError::Cancelled);
            }

            match self.classify_once(batch).await {
                Ok(records) => return Ok(records),
                Err(err) if err.is_throttle() && attempt < max_attempts => {
                    let backoff = self.config.retry.base_delay * attempt;
                    debug!(
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "batch throttled, retrying"
                    );
                    sleep(backoff).await;
                }
                Err(err) if err.is_throttle() => {
                    warn!(attempts = attempt, error = %err, "batch failed after retries");
                    return Ok(batch
                        .iter()
                        .map(|item| {
                            ClassificationRecord::failed(
                                item,
                                format!("Analysis failed after {attempt} attempts: {err}"),
                            )
                        })
                        .collect());
                }
                Err(err) => {
                    warn!(error = %err, "batch failed with non-retryable error");
                    return match policy {
                        FailurePolicy::Contain => Ok(batch
                            .iter()
                            .map(|item| {
                                ClassificationRecord::failed(
                                    item,
                                    format!("Analysis failed: {err}"),
                                )
                            })
                            .collect()),
                        FailurePolicy::Propagate => Err(err),
                    };
                }
            }
        }
    }

    /// One gated invocation: prompt, call, parse.
    async fn classify_once(&self, batch: &[ReviewItem]) -> Result<Vec<ClassificationRecord>> {
        self.gate.admit().await;
        let prompt = build_prompt(batch);
        let completion = self.pool.next().generate(&prompt).await?;
        Ok(parse_batch_response(&completion, batch))
    }

    /// Mock path: deterministic confidence, pseudo-random label, no
    /// endpoint call and no rate budget spent.
    async fn classify_mock(&self, batch: &[ReviewItem]) -> Vec<ClassificationRecord> {
        sleep(Duration::from_millis(50)).await;
        let mut rng = rand::rng();
        batch
            .iter()
            .map(|item| {
                let confidence = item.text.len().clamp(50, 95) as u8;
                let classification = *Classification::MODEL_LABELS
                    .choose(&mut rng)
                    .unwrap_or(&Classification::GenuinePositive);
                ClassificationRecord::new(
                    item,
                    classification,
                    confidence,
                    "Mocked analysis based on length",
                    format!(
                        "Classification: {classification}\nConfidence: {confidence}\nExplanation: Mocked"
                    ),
                )
            })
            .collect()
    }

    /// Calls admitted in the current rate window.
    pub fn admitted(&self) -> u32 {
        self.gate.admitted()
    }
}

/// Build one structured prompt enumerating all batch items.
fn build_prompt(batch: &[ReviewItem]) -> String {
    let reviews_list = batch
        .iter()
        .enumerate()
        .map(|(index, item)| format!("{}. \"{}\"", index + 1, item.text))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\
         Classify each review as: Genuine-Positive, Genuine-Negative, Fake-Malicious, or Fake-Promotional. \
         Provide confidence (0-100) and brief explanation.\n\n\
         Format: Review N: Classification|Confidence|Explanation\n\
         <|eot_id|>\n\
         <|start_header_id|>user<|end_header_id|>\n\
         {reviews_list}\n\
         <|eot_id|>\n\
         <|start_header_id|>assistant<|end_header_id|>\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LimiterConfig, RetryConfig};
    use serde_json::Map;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn item(id: u64, text: &str) -> ReviewItem {
        ReviewItem {
            id,
            text: text.to_string(),
            original: Map::new(),
        }
    }

    fn test_config(url: String) -> Config {
        let mut config = Config {
            limiter: LimiterConfig {
                max_per_window: 1000,
                window: Duration::from_secs(60),
            },
            retry: RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(5),
            },
            ..Default::default()
        };
        config.endpoint.url = url;
        config
    }

    #[test]
    fn test_prompt_enumerates_items() {
        let batch = vec![item(0, "great meal"), item(1, "awful place")];
        let prompt = build_prompt(&batch);
        assert!(prompt.contains("1. \"great meal\""));
        assert!(prompt.contains("2. \"awful place\""));
        assert!(prompt.contains("Review N: Classification|Confidence|Explanation"));
    }

    #[tokio::test]
    async fn test_classify_parses_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "generation": "Review 1: Genuine-Negative|72|Specific complaints\nReview 2: Fake-Promotional|90|Pure marketing"
            })))
            .mount(&server)
            .await;

        let classifier = BatchClassifier::new(Arc::new(test_config(server.uri()))).unwrap();
        let batch = vec![item(0, "the soup was cold"), item(1, "best deal ever, visit now")];
        let records = classifier
            .classify(&batch, FailurePolicy::Contain, &CancelProbe::never())
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].classification, Classification::GenuineNegative);
        assert_eq!(records[0].confidence, 72);
        assert_eq!(records[1].classification, Classification::FakePromotional);
    }

    #[tokio::test]
    async fn test_throttle_exhaustion_becomes_error_records() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("Too many requests"))
            .expect(3) // max_attempts, no more
            .mount(&server)
            .await;

        let classifier = BatchClassifier::new(Arc::new(test_config(server.uri()))).unwrap();
        let batch = vec![item(0, "a review"), item(1, "another review")];
        let records = classifier
            .classify(&batch, FailurePolicy::Contain, &CancelProbe::never())
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        for record in &records {
            assert_eq!(record.classification, Classification::Error);
            assert_eq!(record.confidence, 0);
            assert!(record.explanation.contains("after 3 attempts"));
        }
    }

    #[tokio::test]
    async fn test_fatal_error_policy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model exploded"))
            .mount(&server)
            .await;

        let classifier = BatchClassifier::new(Arc::new(test_config(server.uri()))).unwrap();
        let batch = vec![item(0, "a review")];

        // contained: one Error record, no request-level failure
        let records = classifier
            .classify(&batch, FailurePolicy::Contain, &CancelProbe::never())
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].classification, Classification::Error);
        assert!(records[0].explanation.contains("Analysis failed:"));

        // propagated: surfaced to the caller
        let err = classifier
            .classify(&batch, FailurePolicy::Propagate, &CancelProbe::never())
            .await
            .unwrap_err();
        assert!(matches!(err, LensError::Upstream { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_batch_stops_early() {
        let classifier =
            BatchClassifier::new(Arc::new(test_config("http://localhost:9".into()))).unwrap();
        let batch = vec![item(0, "a review")];
        let cancel = CancelProbe::from_fn(|| true);

        let err = classifier
            .classify(&batch, FailurePolicy::Contain, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LensError::Cancelled));
    }

    #[tokio::test]
    async fn test_mock_mode_bounds() {
        let config = Config {
            mock: true,
            ..Default::default()
        };
        let classifier = BatchClassifier::new(Arc::new(config)).unwrap();
        let batch = vec![item(0, "a great meal")];

        let records = classifier
            .classify(&batch, FailurePolicy::Contain, &CancelProbe::never())
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        // "a great meal" is 12 chars: clamp(12, 50, 95) == 50
        assert_eq!(records[0].confidence, 50);
        assert!(Classification::MODEL_LABELS.contains(&records[0].classification));
        assert_eq!(records[0].explanation, "Mocked analysis based on length");
        // mock mode spends no rate budget
        assert_eq!(classifier.admitted(), 0);
    }
}
