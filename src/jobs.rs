//! In-memory registry of streaming jobs.
//!
//! A job is registered by `POST /analyze-all-stream/start`, claimed once
//! when its stream is opened, and removed after the terminal event. Jobs
//! are single-consumer and single-use. A periodic sweep evicts jobs that
//! were registered but never (or never successfully) streamed, so an
//! abandoned job does not leak memory indefinitely.

use crate::error::{LensError, Result};
use crate::review::ReviewInput;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Registered, stream not yet opened.
    Pending,
    /// Stream opened; reviews handed to the pipeline.
    Processing,
}

#[derive(Debug)]
struct Job {
    reviews: Vec<ReviewInput>,
    status: JobStatus,
    created_at: Instant,
}

/// Registry of jobs awaiting or undergoing streamed processing.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: Mutex<HashMap<String, Job>>,
}

impl JobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a review set under a fresh opaque id. No processing yet.
    pub fn register(&self, reviews: Vec<ReviewInput>) -> String {
        let job_id = format!("job_{}", Uuid::new_v4());
        self.jobs.lock().insert(
            job_id.clone(),
            Job {
                reviews,
                status: JobStatus::Pending,
                created_at: Instant::now(),
            },
        );
        debug!(job_id, "registered streaming job");
        job_id
    }

    /// Claim a pending job's reviews, moving it to `Processing`.
    ///
    /// Fails with `JobNotFound` for unknown ids and for jobs already
    /// claimed: a job feeds exactly one stream.
    pub fn claim(&self, job_id: &str) -> Result<Vec<ReviewInput>> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(job_id).ok_or(LensError::JobNotFound)?;
        if job.status != JobStatus::Pending {
            return Err(LensError::JobNotFound);
        }
        job.status = JobStatus::Processing;
        Ok(std::mem::take(&mut job.reviews))
    }

    /// Delete a job after its terminal stream event.
    pub fn remove(&self, job_id: &str) {
        self.jobs.lock().remove(job_id);
    }

    /// Evict jobs older than `ttl`, returning how many were removed.
    pub fn evict_stale(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|_, job| now.duration_since(job.created_at) < ttl);
        before - jobs.len()
    }

    /// Number of live jobs.
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Whether the store holds no jobs.
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Spawn the background eviction sweep.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        ttl: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let store = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let evicted = store.evict_stale(ttl);
                if evicted > 0 {
                    info!(evicted, "evicted stale streaming jobs");
                }
            }
        })
    }
}
