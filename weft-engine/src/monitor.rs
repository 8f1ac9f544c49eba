//! Rolling counters, a ring-buffered latency histogram and threshold events.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};
use weft_futures_util::stream::variable::{Observer, Variable};

/// Shared, approximate accounting of bytes held in live windows. The joiners
/// update it as events are admitted and windows retire; the engine's sampler
/// reads it against the configured budget.
#[derive(Debug, Clone, Default)]
pub struct MemoryTracker {
    bytes: std::sync::Arc<AtomicU64>,
}

impl MemoryTracker {
    pub fn add(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn sub(&self, bytes: u64) {
        let mut current = self.bytes.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(bytes);
            match self
                .bytes
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(seen) => current = seen,
            }
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

const LATENCY_SAMPLES: usize = 1_000;
// smoothing factor of the throughput EMA
const EMA_ALPHA: f64 = 0.3;

/// Threshold marks; crossing one emits a [`PerfEvent`] on the observer hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Thresholds {
    pub max_mean_latency: Duration,
    pub min_throughput: f64,
    pub max_memory_bytes: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_mean_latency: Duration::from_millis(50),
            min_throughput: 10.0,
            max_memory_bytes: 512 * 1024 * 1024,
        }
    }
}

/// Point-in-time view of the monitor, published on the engine's
/// `performance_metrics` hook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfSnapshot {
    pub events_processed: u64,
    pub correlations_found: u64,
    pub errors: u64,
    /// Events per second, smoothed over the sampling interval.
    pub throughput: f64,
    pub mean_latency_ms: f64,
    pub p50_latency_ms: u64,
    pub p90_latency_ms: u64,
    pub p99_latency_ms: u64,
    pub memory_bytes: u64,
}

/// Threshold crossing notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum PerfEvent {
    HighLatency { mean_ms: f64 },
    LowThroughput { events_per_sec: f64 },
    HighMemory { bytes: u64 },
}

#[derive(Debug)]
struct LatencyRing {
    samples: Vec<u64>,
    next: usize,
}

impl LatencyRing {
    fn new() -> Self {
        Self {
            samples: Vec::with_capacity(LATENCY_SAMPLES),
            next: 0,
        }
    }

    fn push(&mut self, micros: u64) {
        if self.samples.len() < LATENCY_SAMPLES {
            self.samples.push(micros);
        } else {
            self.samples[self.next] = micros;
        }
        self.next = (self.next + 1) % LATENCY_SAMPLES;
    }

    fn percentile(&self, p: f64) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let rank = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted[rank]
    }

    fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<u64>() as f64 / self.samples.len() as f64
    }
}

#[derive(Debug)]
struct Rates {
    throughput_ema: f64,
    last_events: u64,
    last_sample: Instant,
}

/// The engine's performance bookkeeping. Cheap to record into from the hot
/// path; sampling work happens in [`PerformanceMonitor::sample`].
#[derive(Debug)]
pub struct PerformanceMonitor {
    events: AtomicU64,
    correlations: AtomicU64,
    errors: AtomicU64,
    memory_bytes: AtomicU64,
    latencies: Mutex<LatencyRing>,
    rates: Mutex<Rates>,
    thresholds: Thresholds,
    threshold_events: Variable<Option<PerfEvent>>,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}

impl PerformanceMonitor {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            events: AtomicU64::new(0),
            correlations: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            memory_bytes: AtomicU64::new(0),
            latencies: Mutex::new(LatencyRing::new()),
            rates: Mutex::new(Rates {
                throughput_ema: 0.0,
                last_events: 0,
                last_sample: Instant::now(),
            }),
            thresholds,
            threshold_events: Variable::new(None),
        }
    }

    pub fn record_event(&self, processing_latency: Duration) {
        self.events.fetch_add(1, Ordering::Relaxed);
        self.latencies.lock().push(processing_latency.as_micros() as u64);
    }

    pub fn record_correlation(&self) {
        self.correlations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memory(&self, bytes: u64) {
        self.memory_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Observer stream of threshold crossings.
    pub fn threshold_events(&self) -> Observer<Option<PerfEvent>> {
        self.threshold_events.observer()
    }

    /// Update the throughput EMA, check thresholds and produce a snapshot.
    /// Called by the engine on its sampling interval.
    pub fn sample(&self) -> PerfSnapshot {
        let events = self.events.load(Ordering::Relaxed);
        let mut rates = self.rates.lock();
        let elapsed = rates.last_sample.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            let rate = (events - rates.last_events) as f64 / elapsed;
            rates.throughput_ema = if rates.last_events == 0 && rates.throughput_ema == 0.0 {
                rate
            } else {
                EMA_ALPHA * rate + (1.0 - EMA_ALPHA) * rates.throughput_ema
            };
            rates.last_events = events;
            rates.last_sample = Instant::now();
        }
        let throughput = rates.throughput_ema;
        drop(rates);

        let snapshot = {
            let latencies = self.latencies.lock();
            PerfSnapshot {
                events_processed: events,
                correlations_found: self.correlations.load(Ordering::Relaxed),
                errors: self.errors.load(Ordering::Relaxed),
                throughput,
                mean_latency_ms: latencies.mean() / 1_000.0,
                p50_latency_ms: latencies.percentile(0.50) / 1_000,
                p90_latency_ms: latencies.percentile(0.90) / 1_000,
                p99_latency_ms: latencies.percentile(0.99) / 1_000,
                memory_bytes: self.memory_bytes.load(Ordering::Relaxed),
            }
        };

        if snapshot.mean_latency_ms > self.thresholds.max_mean_latency.as_millis() as f64 {
            self.threshold_events.set(Some(PerfEvent::HighLatency {
                mean_ms: snapshot.mean_latency_ms,
            }));
        } else if snapshot.events_processed > 0 && snapshot.throughput < self.thresholds.min_throughput {
            self.threshold_events.set(Some(PerfEvent::LowThroughput {
                events_per_sec: snapshot.throughput,
            }));
        }
        if snapshot.memory_bytes > self.thresholds.max_memory_bytes {
            self.threshold_events
                .set(Some(PerfEvent::HighMemory { bytes: snapshot.memory_bytes }));
        }
        snapshot
    }
}
