//! The per-window indexed event store backing the joiners.
//!
//! Events are packed into an append-only slab and referenced by index from a
//! join-value bucket map and a time-ordered secondary index. Byte budgeting
//! evicts whole least-recently-touched buckets, never the one currently
//! receiving writes.

use fnv::FnvHashMap;
use std::{sync::Arc, time::Duration};
use weft_types::{LogEvent, Timestamp};

/// Bounds and budgets of a single [`TimeWindow`].
#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub start: Timestamp,
    pub end: Timestamp,
    /// Events older than `start - late_tolerance` are rejected; the window is
    /// expired once wall-clock time passes `end + late_tolerance`.
    pub late_tolerance: Duration,
    pub max_events: usize,
    pub max_bytes: usize,
}

impl WindowConfig {
    pub fn starting_at(start: Timestamp, length: Duration) -> Self {
        Self {
            start,
            end: start + length,
            late_tolerance: Duration::from_secs(30),
            max_events: 10_000,
            max_bytes: 16 * 1024 * 1024,
        }
    }

    pub fn with_late_tolerance(mut self, late_tolerance: Duration) -> Self {
        self.late_tolerance = late_tolerance;
        self
    }

    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

/// Outcome of [`TimeWindow::add_event`]. Everything but `Admitted` means the
/// event is not in the window; the caller decides whether that is
/// backpressure (`AtCapacity`) or data outside the window bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Timestamp before `start - late_tolerance`.
    TooOld,
    /// Timestamp after `end`; belongs to a later window.
    AheadOfWindow,
    /// The per-window event cap is reached.
    AtCapacity,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

#[derive(Debug, Default)]
struct Bucket {
    // slab indexes in arrival order
    idxs: Vec<u32>,
    last_touch: u64,
}

/// One bounded time interval with its admitted events and indices.
#[derive(Debug)]
pub struct TimeWindow {
    config: WindowConfig,
    // slab; evicted slots become None but keep their index
    events: Vec<Option<Arc<LogEvent>>>,
    buckets: FnvHashMap<String, Bucket>,
    by_time: Vec<u32>,
    time_sorted: bool,
    touch_clock: u64,
    event_count: usize,
    bytes_used: usize,
}

impl TimeWindow {
    pub fn new(config: WindowConfig) -> Self {
        Self {
            config,
            events: Vec::new(),
            buckets: FnvHashMap::default(),
            by_time: Vec::new(),
            time_sorted: true,
            touch_clock: 0,
            event_count: 0,
            bytes_used: 0,
        }
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    pub fn event_count(&self) -> usize {
        self.event_count
    }

    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    /// Whether `ts` falls into this window's admission range.
    pub fn covers(&self, ts: Timestamp) -> bool {
        ts >= self.config.start - self.config.late_tolerance && ts <= self.config.end
    }

    /// A window is expired (ready for retirement) once `now` has passed its
    /// end plus the late tolerance.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now > self.config.end + self.config.late_tolerance
    }

    /// Admit an event under the given join value.
    pub fn add_event(&mut self, event: Arc<LogEvent>, join_value: &str) -> Admission {
        let ts = event.timestamp;
        if !self.covers(ts) {
            return if ts > self.config.end {
                Admission::AheadOfWindow
            } else {
                Admission::TooOld
            };
        }
        if self.event_count >= self.config.max_events {
            return Admission::AtCapacity;
        }

        let idx = self.events.len() as u32;
        if let Some(last) = self.by_time.last() {
            // near-ordered input keeps the secondary index sorted for free;
            // anything else marks it dirty for the next range query
            if let Some(Some(prev)) = self.events.get(*last as usize) {
                if prev.timestamp > ts {
                    self.time_sorted = false;
                }
            }
        }
        self.bytes_used += event.approx_size();
        self.events.push(Some(event));
        self.by_time.push(idx);
        self.event_count += 1;
        self.touch_clock += 1;
        let touch = self.touch_clock;
        let bucket = self.buckets.entry(join_value.to_owned()).or_default();
        bucket.idxs.push(idx);
        bucket.last_touch = touch;

        if self.bytes_used > self.config.max_bytes {
            self.evict_lru(join_value);
        }
        Admission::Admitted
    }

    /// All live events under a join value, in arrival order.
    pub fn events_by_join_value(&self, join_value: &str) -> Vec<Arc<LogEvent>> {
        match self.buckets.get(join_value) {
            Some(bucket) => bucket
                .idxs
                .iter()
                .filter_map(|i| self.events[*i as usize].clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Live events with `lo <= timestamp <= hi`, time-ascending. Sorts the
    /// secondary index first if out-of-order arrivals dirtied it.
    pub fn events_by_time_range(&mut self, lo: Timestamp, hi: Timestamp) -> Vec<Arc<LogEvent>> {
        self.ensure_time_sorted();
        let ts_of = |i: &u32| self.events[*i as usize].as_ref().map(|e| e.timestamp);
        let start = self.by_time.partition_point(|i| match ts_of(i) {
            Some(ts) => ts < lo,
            None => true,
        });
        self.by_time[start..]
            .iter()
            .map_while(|i| match self.events[*i as usize].as_ref() {
                Some(e) if e.timestamp <= hi => Some(Some(e.clone())),
                Some(_) => None,
                // evicted slot inside the range, skip it
                None => Some(None),
            })
            .flatten()
            .collect()
    }

    /// Join values with at least one live event.
    pub fn join_values(&self) -> impl Iterator<Item = &str> {
        self.buckets
            .iter()
            .filter(|(_, b)| b.idxs.iter().any(|i| self.events[*i as usize].is_some()))
            .map(|(v, _)| v.as_str())
    }

    fn ensure_time_sorted(&mut self) {
        if !self.time_sorted {
            let events = &self.events;
            self.by_time.sort_by_key(|i| {
                events[*i as usize]
                    .as_ref()
                    .map(|e| e.timestamp)
                    .unwrap_or(Timestamp::new(0))
            });
            self.time_sorted = true;
        }
    }

    // evict least-recently-touched buckets until the byte budget holds,
    // sparing the bucket currently receiving writes
    fn evict_lru(&mut self, current: &str) {
        while self.bytes_used > self.config.max_bytes {
            let victim = self
                .buckets
                .iter()
                .filter(|(value, _)| value.as_str() != current)
                .min_by_key(|(_, b)| b.last_touch)
                .map(|(value, _)| value.clone());
            let Some(victim) = victim else { break };
            if let Some(bucket) = self.buckets.remove(&victim) {
                let mut freed = 0usize;
                let mut dropped = 0usize;
                for idx in bucket.idxs {
                    if let Some(event) = self.events[idx as usize].take() {
                        freed += event.approx_size();
                        dropped += 1;
                    }
                }
                self.bytes_used = self.bytes_used.saturating_sub(freed);
                self.event_count = self.event_count.saturating_sub(dropped);
                let events = &self.events;
                self.by_time.retain(|i| events[*i as usize].is_some());
                tracing::warn!(
                    join_value = %victim,
                    events = dropped,
                    bytes = freed,
                    "window over byte budget, evicted bucket"
                );
            }
        }
    }
}
