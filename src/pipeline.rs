//! Wave-based orchestration of batch classification.
//!
//! Batches are dispatched in waves of configurable width. A wave is a
//! synchronization barrier, not a race: every batch in it completes
//! (successfully or as contained `Error` records) before the next wave
//! starts. The synchronous contract returns records id-sorted; the
//! streaming contract trades global ordering for latency and emits each
//! wave as soon as it finishes.

use crate::batcher::partition;
use crate::classifier::{BatchClassifier, CancelProbe, FailurePolicy};
use crate::config::Config;
use crate::error::{LensError, Result};
use crate::review::{ClassificationRecord, ReviewItem};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Incremental output of a streaming run.
#[derive(Debug)]
pub enum StreamEvent {
    /// Records for one completed wave (or the short-text bypass).
    Batch(Vec<ClassificationRecord>),
    /// A wave failed in a way containment could not absorb.
    Error(String),
    /// Terminal event; no further events follow.
    Done,
}

/// Orchestrates partitioning, waves, and result assembly.
#[derive(Debug)]
pub struct Pipeline {
    config: Arc<Config>,
    classifier: BatchClassifier,
}

impl Pipeline {
    /// Create a pipeline with a shared classifier (gate + client pool).
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let classifier = BatchClassifier::new(Arc::clone(&config))?;
        Ok(Self { config, classifier })
    }

    /// Classify one review, surfacing upstream failures to the caller.
    pub async fn classify_single(&self, item: ReviewItem) -> Result<ClassificationRecord> {
        if item.trimmed().len() < self.config.pipeline.min_text_len {
            return Ok(ClassificationRecord::insufficient_text(&item));
        }

        let batch = vec![item];
        let mut records = self
            .classifier
            .classify(&batch, FailurePolicy::Propagate, &CancelProbe::never())
            .await?;
        records
            .pop()
            .ok_or_else(|| LensError::Upstream {
                status: None,
                message: "classifier produced no record".to_string(),
            })
    }

    /// Classify all items and return records sorted by id ascending.
    pub async fn run_sorted(&self, items: Vec<ReviewItem>) -> Result<Vec<ClassificationRecord>> {
        let total = items.len();
        let split = partition(
            items,
            self.config.pipeline.min_text_len,
            self.config.pipeline.batch_size,
        );
        info!(
            total,
            short = split.short.len(),
            batches = split.batches.len(),
            "starting batch analysis"
        );

        let mut records: Vec<ClassificationRecord> = split
            .short
            .iter()
            .map(ClassificationRecord::insufficient_text)
            .collect();

        let never = CancelProbe::never();
        let waves: Vec<&[Vec<ReviewItem>]> =
            split.batches.chunks(self.config.pipeline.concurrency).collect();
        let wave_count = waves.len();

        for (wave_index, wave) in waves.into_iter().enumerate() {
            debug!(wave = wave_index + 1, batches = wave.len(), "dispatching wave");
            let results = join_all(wave.iter().map(|batch| {
                self.classifier
                    .classify(batch, FailurePolicy::Contain, &never)
            }))
            .await;

            for result in results {
                records.extend(result?);
            }

            if wave_index + 1 < wave_count {
                tokio::time::sleep(self.config.pipeline.inter_wave_delay).await;
            }
        }

        records.sort_by_key(|r| r.id);
        debug_assert_eq!(records.len(), total);
        Ok(records)
    }

    /// Classify all items, pushing each completed wave to `tx`.
    ///
    /// Emits the short-text bypass first (if any), then one `Batch` event
    /// per wave (id-sorted within the wave), then `Done`. An error past
    /// containment emits `Error` and terminates the stream without `Done`.
    /// A dropped receiver cancels remaining work: no new waves are
    /// dispatched and in-flight retries abort at their next check.
    pub async fn run_streaming(&self, items: Vec<ReviewItem>, tx: mpsc::Sender<StreamEvent>) {
        let split = partition(
            items,
            self.config.pipeline.min_text_len,
            self.config.pipeline.batch_size,
        );

        if !split.short.is_empty() {
            let short_records: Vec<ClassificationRecord> = split
                .short
                .iter()
                .map(ClassificationRecord::insufficient_text)
                .collect();
            if tx.send(StreamEvent::Batch(short_records)).await.is_err() {
                debug!("stream subscriber gone before first event");
                return;
            }
        }

        let cancel = {
            let tx = tx.clone();
            CancelProbe::from_fn(move || tx.is_closed())
        };

        let waves: Vec<&[Vec<ReviewItem>]> =
            split.batches.chunks(self.config.pipeline.concurrency).collect();
        let wave_count = waves.len();

        for (wave_index, wave) in waves.into_iter().enumerate() {
            if cancel.is_cancelled() {
                info!("stream disconnected, abandoning remaining waves");
                return;
            }

            let results = join_all(wave.iter().map(|batch| {
                self.classifier
                    .classify(batch, FailurePolicy::Contain, &cancel)
            }))
            .await;

            let mut merged = Vec::new();
            for result in results {
                match result {
                    Ok(records) => merged.extend(records),
                    Err(LensError::Cancelled) => {
                        info!("stream disconnected mid-wave, abandoning");
                        return;
                    }
                    Err(err) => {
                        warn!(error = %err, "wave failed past containment");
                        let _ = tx.send(StreamEvent::Error(err.to_string())).await;
                        return;
                    }
                }
            }

            merged.sort_by_key(|r| r.id);
            if tx.send(StreamEvent::Batch(merged)).await.is_err() {
                return;
            }

            if wave_index + 1 < wave_count {
                tokio::time::sleep(self.config.pipeline.inter_wave_delay).await;
            }
        }

        let _ = tx.send(StreamEvent::Done).await;
    }
}
