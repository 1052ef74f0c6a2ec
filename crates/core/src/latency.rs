use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LatencySnapshot {
    pub budget: Duration,
    pub searches: u64,
    pub over_budget: u64,
    pub p95: Option<Duration>,
    pub max: Option<Duration>,
}

/// Rolling window of index-search latencies.
pub struct LatencyTracker {
    budget: Duration,
    window: usize,
    samples: Mutex<VecDeque<Duration>>,
    searches: AtomicU64,
    over_budget: AtomicU64,
}

impl LatencyTracker {
    pub fn new(budget: Duration, window: usize) -> Self {
        let window = window.max(1);
        Self {
            budget,
            window,
            samples: Mutex::new(VecDeque::with_capacity(window)),
            searches: AtomicU64::new(0),
            over_budget: AtomicU64::new(0),
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn record(&self, collection: &str, elapsed: Duration) {
        self.searches.fetch_add(1, Ordering::Relaxed);
        let elapsed_ms = elapsed.as_secs_f64() * 1_000.0;
        if elapsed > self.budget {
            self.over_budget.fetch_add(1, Ordering::Relaxed);
            warn!(
                collection,
                elapsed_ms,
                budget_ms = self.budget.as_millis() as u64,
                "index search exceeded latency budget"
            );
        } else {
            debug!(collection, elapsed_ms, "index search");
        }

        let mut samples = self.samples.lock();
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(elapsed);
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let mut sorted: Vec<Duration> = self.samples.lock().iter().copied().collect();
        sorted.sort_unstable();

        let p95 = if sorted.is_empty() {
            None
        } else {
            let rank = (sorted.len() * 95).div_ceil(100).max(1);
            Some(sorted[rank - 1])
        };

        LatencySnapshot {
            budget: self.budget,
            searches: self.searches.load(Ordering::Relaxed),
            over_budget: self.over_budget.load(Ordering::Relaxed),
            p95,
            max: sorted.last().copied(),
        }
    }
}
