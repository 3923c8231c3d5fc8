//! Engine metrics.
//!
//! Tracks recommendation volume, similarity score and latency averages,
//! and image processing success rates. Counters are atomic; the two
//! running averages are mutex-guarded accumulators. Recording never
//! fails and never blocks for long — collectors are safe to share
//! across the worker pool and query threads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Running sum/count pair for an average.
#[derive(Debug, Default)]
struct Accumulator {
    sum: f64,
    count: u64,
}

impl Accumulator {
    fn record(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }
}

/// Point-in-time view of the collected metrics.
#[derive(Clone, Debug, Serialize)]
pub struct MetricsSnapshot {
    /// Recommendation requests served.
    pub recommendations: u64,

    /// Mean of every similarity score returned to callers.
    pub avg_score: f64,

    /// Mean recommendation latency in milliseconds.
    pub avg_latency_ms: f64,

    /// Images that produced an embedding.
    pub images_successful: u64,

    /// Images that failed download, validation, or encoding.
    pub images_failed: u64,

    /// `successful / (successful + failed)`, or 0.0 before any ingestion.
    pub processing_success_rate: f64,

    /// Seconds since the collector was created.
    pub uptime_s: u64,
}

/// Statistics exposed to the façade by `Recommender::stats()`.
#[derive(Clone, Debug, Serialize)]
pub struct ServiceStats {
    /// Artists currently queryable.
    pub artists_indexed: usize,

    /// Embedding cache hit rate over the process lifetime.
    pub cache_hit_rate: f64,

    /// Mean of every similarity score returned to callers.
    pub avg_score: f64,

    /// Mean recommendation latency in milliseconds.
    pub avg_latency_ms: f64,

    /// Share of processed images that produced an embedding.
    pub processing_success_rate: f64,

    /// Seconds since the engine was constructed.
    pub uptime_s: u64,
}

/// Thread-safe metrics collection for the matching engine.
#[derive(Debug)]
pub struct MetricsCollector {
    started: Instant,
    recommendations: AtomicU64,
    images_successful: AtomicU64,
    images_failed: AtomicU64,
    scores: Mutex<Accumulator>,
    latencies: Mutex<Accumulator>,
}

impl MetricsCollector {
    /// Creates a collector; uptime counts from this moment.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            recommendations: AtomicU64::new(0),
            images_successful: AtomicU64::new(0),
            images_failed: AtomicU64::new(0),
            scores: Mutex::new(Accumulator::default()),
            latencies: Mutex::new(Accumulator::default()),
        }
    }

    /// Records one served recommendation: the scores returned to the
    /// caller and the end-to-end latency.
    pub fn record_recommendation(&self, scores: &[f32], latency: Duration) {
        self.recommendations.fetch_add(1, Ordering::Relaxed);

        {
            let mut acc = self.scores.lock().expect("metrics lock poisoned");
            for score in scores {
                acc.record(*score as f64);
            }
        }
        self.latencies
            .lock()
            .expect("metrics lock poisoned")
            .record(latency.as_secs_f64() * 1000.0);
    }

    /// Records an ingestion round's image outcomes.
    pub fn record_image_processing(&self, successful: u64, failed: u64) {
        self.images_successful.fetch_add(successful, Ordering::Relaxed);
        self.images_failed.fetch_add(failed, Ordering::Relaxed);
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let successful = self.images_successful.load(Ordering::Relaxed);
        let failed = self.images_failed.load(Ordering::Relaxed);
        let processed = successful + failed;

        MetricsSnapshot {
            recommendations: self.recommendations.load(Ordering::Relaxed),
            avg_score: self.scores.lock().expect("metrics lock poisoned").average(),
            avg_latency_ms: self
                .latencies
                .lock()
                .expect("metrics lock poisoned")
                .average(),
            images_successful: successful,
            images_failed: failed,
            processing_success_rate: if processed > 0 {
                successful as f64 / processed as f64
            } else {
                0.0
            },
            uptime_s: self.started.elapsed().as_secs(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
