//! Rolling-window admission gate for model calls.
//!
//! Every real model invocation must pass [`RequestGate::admit`] before
//! dispatch. The gate is a blocking throttle, not a best-effort hint: a
//! caller over budget suspends until the window rolls over, then retries
//! in a bounded loop. State is shared by all concurrent batches, so
//! increments happen under a mutex to prevent over-admission.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct GateState {
    count: u32,
    window_start: Instant,
}

/// Shared admission gate bounding calls per rolling time window.
#[derive(Debug)]
pub struct RequestGate {
    max_per_window: u32,
    window: Duration,
    state: Mutex<GateState>,
}

impl RequestGate {
    /// Create a gate admitting `max_per_window` calls per `window`.
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            state: Mutex::new(GateState {
                count: 0,
                window_start: Instant::now(),
            }),
        }
    }

    /// Wait until the current window has budget, then take one slot.
    pub async fn admit(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();

                if now.duration_since(state.window_start) >= self.window {
                    state.count = 0;
                    state.window_start = now;
                }

                if state.count < self.max_per_window {
                    state.count += 1;
                    return;
                }

                // lock released before sleeping
                self.window - now.duration_since(state.window_start)
            };

            debug!(wait_ms = wait.as_millis() as u64, "rate window exhausted, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Calls admitted in the current window.
    pub fn admitted(&self) -> u32 {
        self.state.lock().count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_admits_up_to_budget_immediately() {
        let gate = RequestGate::new(3, Duration::from_secs(60));
        let start = tokio::time::Instant::now();
        gate.admit().await;
        gate.admit().await;
        gate.admit().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(gate.admitted(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_caller_waits_for_rollover() {
        let gate = Arc::new(RequestGate::new(2, Duration::from_secs(60)));

        let start = tokio::time::Instant::now();
        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move {
                    gate.admit().await;
                    tokio::time::Instant::now()
                })
            })
            .collect();

        let mut finished = Vec::new();
        for task in tasks {
            finished.push(task.await.unwrap());
        }
        finished.sort();

        // two admitted instantly, the third only after the window rolled
        assert_eq!(finished[0], start);
        assert_eq!(finished[1], start);
        assert!(finished[2] >= start + Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_count() {
        let gate = RequestGate::new(1, Duration::from_secs(5));
        gate.admit().await;
        assert_eq!(gate.admitted(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        gate.admit().await;
        assert_eq!(gate.admitted(), 1);
    }
}
