//! Time-bounded equi-joins: the shared plan machinery plus the two-stream
//! and multi-stream joiners.

mod multi;
mod pair;

pub use multi::join_multi;
pub use pair::join_pair;

use fnv::FnvHashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, sync::Arc, time::Duration};
use weft_types::{
    fresh_correlation_id, Completeness, CorrelatedEvent, CorrelationMetadata, LogEvent, TimeSpan, Timestamp,
};
use weft_wql::{GroupSide, MatchOp, Matcher, Query};

/// Emission timing of a joiner. Externally observable results agree for
/// finite inputs; realtime emits as soon as a match becomes observable while
/// batch drains all inputs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinMode {
    Batch,
    Realtime,
}

/// Everything the joiners need, precompiled from a parsed query: side-aware
/// key extraction, the compiled post-filter, and the window budgets.
#[derive(Debug)]
pub struct JoinPlan {
    pub(crate) query: Query,
    pub(crate) mode: JoinMode,
    pub(crate) window_length: Duration,
    pub(crate) late_tolerance: Duration,
    pub(crate) max_events: usize,
    pub(crate) max_window_bytes: usize,
    pub(crate) tracker: crate::monitor::MemoryTracker,
    pub(crate) monitor: Option<Arc<crate::monitor::PerformanceMonitor>>,
    extractor: KeyExtractor,
    filter: CompiledFilter,
}

impl JoinPlan {
    pub fn new(query: Query, mode: JoinMode) -> Self {
        let window_length = query.time_window;
        let extractor = KeyExtractor::from_query(&query);
        let filter = CompiledFilter::compile(&query.filter);
        Self {
            query,
            mode,
            window_length,
            late_tolerance: Duration::from_secs(30),
            max_events: 10_000,
            max_window_bytes: 16 * 1024 * 1024,
            tracker: crate::monitor::MemoryTracker::default(),
            monitor: None,
            extractor,
            filter,
        }
    }

    pub fn with_tracker(mut self, tracker: crate::monitor::MemoryTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<crate::monitor::PerformanceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_window_length(mut self, window_length: Duration) -> Self {
        self.window_length = window_length;
        self
    }

    pub fn with_late_tolerance(mut self, late_tolerance: Duration) -> Self {
        self.late_tolerance = late_tolerance;
        self
    }

    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events;
        self
    }

    pub fn with_max_window_bytes(mut self, max_window_bytes: usize) -> Self {
        self.max_window_bytes = max_window_bytes;
        self
    }

    /// Join value of an event on the given stream (0 = left). `None` means
    /// the event carries no usable join value and is discarded.
    pub(crate) fn join_value(&self, stream_index: usize, event: &LogEvent) -> Option<String> {
        self.extractor.extract(stream_index, event)
    }

    /// Stream labels in query order (alias or source name).
    pub(crate) fn stream_labels(&self) -> Vec<String> {
        self.query.streams().map(|s| s.label().to_owned()).collect()
    }

    /// Assemble a correlation from per-stream candidate events, applying the
    /// temporal sub-window and the post-filter. `None` means suppressed.
    ///
    /// `required`: stream indexes that must still be represented after the
    /// temporal trim (all streams for an inner join, the left stream for a
    /// left join).
    pub(crate) fn build_correlation(
        &self,
        per_stream: &[Vec<Arc<LogEvent>>],
        labels: &[String],
        required: &[usize],
        join_value: &str,
    ) -> Option<CorrelatedEvent> {
        // flatten to (stream index, event), time-ascending
        let mut tagged: Vec<(usize, Arc<LogEvent>)> = per_stream
            .iter()
            .enumerate()
            .flat_map(|(i, events)| events.iter().map(move |e| (i, e.clone())))
            .collect();
        if tagged.is_empty() {
            return None;
        }
        tagged.sort_by_key(|(_, e)| e.timestamp);

        if let Some(temporal) = self.query.temporal {
            let origin = tagged[0].1.timestamp;
            let horizon = origin + temporal;
            tagged.retain(|(_, e)| e.timestamp <= horizon);
        }
        let present: BTreeSet<usize> = tagged.iter().map(|(i, _)| *i).collect();
        if required.iter().any(|i| !present.contains(i)) {
            return None;
        }

        let events: Vec<Arc<LogEvent>> = tagged.iter().map(|(_, e)| e.clone()).collect();
        if !self.filter.admits(&events) {
            return None;
        }

        let start = events.first().map(|e| e.timestamp).unwrap_or(Timestamp::new(0));
        let end = events.last().map(|e| e.timestamp).unwrap_or(start);
        let matched_streams: BTreeSet<String> = present.iter().map(|i| labels[*i].clone()).collect();
        let total_streams = labels.len();
        let completeness = if matched_streams.len() == total_streams {
            Completeness::Complete
        } else {
            Completeness::Partial
        };
        Some(CorrelatedEvent {
            correlation_id: fresh_correlation_id(),
            timestamp: start,
            time_window: TimeSpan { start, end },
            join_key: self.query.primary_join_key().to_owned(),
            join_value: join_value.to_owned(),
            events,
            metadata: CorrelationMetadata {
                completeness,
                matched_streams,
                total_streams,
            },
        })
    }

    /// Grouping side of the query, when `group_left`/`group_right` is set:
    /// one correlation per event on the grouping side, paired with all events
    /// of the other side.
    pub(crate) fn grouping_side(&self) -> Option<GroupSide> {
        self.query.grouping.as_ref().map(|g| g.side)
    }
}

// Side-aware join-value extraction: the left stream resolves a key under its
// query name, every other stream under the mapped right-hand name (when a
// mapping exists). With `ignoring` and no keys, the value is the composite of
// all labels outside the ignore set.
#[derive(Debug)]
struct KeyExtractor {
    keys: Vec<String>,
    right_names: FnvHashMap<String, String>,
    ignoring: BTreeSet<String>,
}

impl KeyExtractor {
    fn from_query(query: &Query) -> Self {
        Self {
            keys: query.join_keys.clone(),
            right_names: query
                .mappings
                .iter()
                .map(|m| (m.left.clone(), m.right.clone()))
                .collect(),
            ignoring: query.ignoring.iter().cloned().collect(),
        }
    }

    fn extract(&self, stream_index: usize, event: &LogEvent) -> Option<String> {
        if self.keys.is_empty() {
            return self.composite(event);
        }
        for key in &self.keys {
            let name = if stream_index == 0 {
                key.as_str()
            } else {
                self.right_names.get(key).map(|s| s.as_str()).unwrap_or(key.as_str())
            };
            if let Some(value) = event.join_value(name) {
                return Some(value.to_owned());
            }
        }
        None
    }

    fn composite(&self, event: &LogEvent) -> Option<String> {
        let parts: Vec<String> = event
            .labels
            .iter()
            .filter(|(name, _)| !self.ignoring.contains(name.as_str()))
            .map(|(name, value)| format!("{}:{}", name, value))
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(","))
        }
    }
}

// Post-filter with the regex operators compiled once. An unparsable pattern
// makes its matcher unsatisfiable rather than failing the query.
#[derive(Debug)]
struct CompiledFilter {
    matchers: Vec<CompiledMatcher>,
}

#[derive(Debug)]
struct CompiledMatcher {
    label: String,
    op: MatchOp,
    value: String,
    regex: Option<Regex>,
}

impl CompiledFilter {
    fn compile(matchers: &[Matcher]) -> Self {
        let matchers = matchers
            .iter()
            .map(|m| {
                let regex = match m.op {
                    MatchOp::Re | MatchOp::NotRe => match Regex::new(&m.value) {
                        Ok(re) => Some(re),
                        Err(e) => {
                            tracing::warn!(pattern = %m.value, error = %e, "unparsable filter pattern");
                            None
                        }
                    },
                    _ => None,
                };
                CompiledMatcher {
                    label: m.label.clone(),
                    op: m.op,
                    value: m.value.clone(),
                    regex,
                }
            })
            .collect();
        Self { matchers }
    }

    /// At least one event must satisfy every matcher.
    fn admits(&self, events: &[Arc<LogEvent>]) -> bool {
        if self.matchers.is_empty() {
            return true;
        }
        events.iter().any(|e| self.matchers.iter().all(|m| m.matches(e)))
    }
}

impl CompiledMatcher {
    fn matches(&self, event: &LogEvent) -> bool {
        let value = event.labels.get(&self.label).map(|v| v.as_str()).unwrap_or("");
        match self.op {
            MatchOp::Eq => value == self.value,
            MatchOp::Ne => value != self.value,
            MatchOp::Re => self.regex.as_ref().map(|re| re.is_match(value)).unwrap_or(false),
            MatchOp::NotRe => self.regex.as_ref().map(|re| !re.is_match(value)).unwrap_or(false),
        }
    }
}
