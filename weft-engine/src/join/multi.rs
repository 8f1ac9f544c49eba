//! Generalization of the join to N ≥ 3 streams.
//!
//! Per join value, let M be the number of streams that contributed at least
//! one event: `and` emits iff M = N (eagerly in realtime mode), `or` emits
//! iff M ≥ 1 and `unless` emits iff M = 1, the latter two at window
//! retirement. Grouping modifiers do not apply to multi-stream joins.

use super::{JoinMode, JoinPlan};
use crate::{
    error::EngineError,
    util::GenStream,
    window::{Admission, TimeWindow, WindowConfig},
};
use fnv::{FnvHashMap, FnvHashSet};
use futures::{future::ready, stream, stream::BoxStream, StreamExt};
use std::{sync::Arc, time::Instant};
use weft_types::{CorrelatedEvent, EventStream, LogEvent, SourceError, Timestamp};
use weft_wql::JoinType;

enum Input {
    Event(usize, Arc<LogEvent>),
    Failed(SourceError),
    Tick,
    // all event streams are exhausted; the tick stream never ends, so end
    // of input must travel in-band
    Eof,
}

/// Join N streams according to the plan; `streams` must match the query's
/// stream order and count.
pub fn join_multi(
    plan: Arc<JoinPlan>,
    streams: Vec<EventStream>,
    ticks: Option<BoxStream<'static, ()>>,
) -> BoxStream<'static, Result<CorrelatedEvent, EngineError>> {
    GenStream::new(move |co| async move {
        let tagged = streams.into_iter().enumerate().map(|(index, stream)| {
            stream
                .map(move |r| match r {
                    Ok(event) => Input::Event(index, Arc::new(event)),
                    Err(e) => Input::Failed(e),
                })
                .boxed()
        });
        let events = stream::select_all(tagged).chain(stream::iter([Input::Eof]));
        let mut input = match ticks {
            Some(t) => stream::select(events, t.map(|_| Input::Tick)).boxed(),
            None => events.boxed(),
        };

        let mut state = MultiState::new(plan);
        while let Some(msg) = input.next().await {
            match msg {
                Input::Eof => break,
                Input::Event(index, event) => {
                    let started = Instant::now();
                    let out = state.process(index, event);
                    if let Some(monitor) = &state.plan.monitor {
                        monitor.record_event(started.elapsed());
                    }
                    for c in out {
                        co.yield_(Ok(Some(c))).await;
                    }
                }
                Input::Tick => {
                    for c in state.on_tick(Timestamp::now()) {
                        co.yield_(Ok(Some(c))).await;
                    }
                }
                Input::Failed(e) => {
                    if let Some(monitor) = &state.plan.monitor {
                        monitor.record_error();
                    }
                    if matches!(state.plan.query.join_type, JoinType::Or | JoinType::Unless) {
                        for c in state.flush() {
                            co.yield_(Ok(Some(c))).await;
                        }
                    }
                    return Err(EngineError::Source(e));
                }
            }
        }
        for c in state.flush() {
            co.yield_(Ok(Some(c))).await;
        }
        Ok(None)
    })
    .filter_map(|x| ready(x.transpose()))
    .boxed()
}

struct MultiState {
    plan: Arc<JoinPlan>,
    labels: Vec<String>,
    current: Option<WindowSet>,
    tracked_bytes: u64,
}

impl MultiState {
    fn new(plan: Arc<JoinPlan>) -> Self {
        let labels = plan.stream_labels();
        Self {
            plan,
            labels,
            current: None,
            tracked_bytes: 0,
        }
    }

    fn process(&mut self, index: usize, event: Arc<LogEvent>) -> Vec<CorrelatedEvent> {
        let mut out = Vec::new();
        let Some(value) = self.plan.join_value(index, &event) else {
            return out;
        };
        let ts = event.timestamp;
        let rollover = self.current.as_ref().map(|set| ts > set.end()).unwrap_or(false);
        if rollover {
            let mut retired = self.current.take().expect("checked above");
            out.extend(retired.retire_emit(&self.plan, &self.labels));
        }
        let n = self.labels.len();
        let plan = &self.plan;
        let set = self
            .current
            .get_or_insert_with(|| WindowSet::starting_at(ts, plan, n));

        match set.first_arrival.get(&value) {
            Some(first) if first.elapsed() > self.plan.late_tolerance => {
                tracing::debug!(value = %value, "straggler past late tolerance, dropped");
                return out;
            }
            Some(_) => {}
            None => {
                set.first_arrival.insert(value.clone(), Instant::now());
            }
        }

        match set.windows[index].add_event(event, &value) {
            Admission::Admitted => {}
            Admission::AtCapacity => {
                tracing::warn!(value = %value, "window at event capacity, rejecting");
                return out;
            }
            _ => {
                tracing::debug!(value = %value, "event outside window bounds, dropped");
                return out;
            }
        }
        if set.value_seen.insert(value.clone()) {
            set.value_order.push(value.clone());
        }

        // eager emission for inner joins once every stream is represented
        if self.plan.mode == JoinMode::Realtime
            && self.plan.query.join_type == JoinType::And
            && !set.emitted.contains(&value)
        {
            let per_stream: Vec<Vec<Arc<LogEvent>>> =
                set.windows.iter().map(|w| w.events_by_join_value(&value)).collect();
            if per_stream.iter().all(|events| !events.is_empty()) {
                let required: Vec<usize> = (0..set.windows.len()).collect();
                if let Some(c) = self.plan.build_correlation(&per_stream, &self.labels, &required, &value) {
                    set.emitted.insert(value.clone());
                    out.push(c);
                }
            }
        }
        self.sync_tracker();
        out
    }

    fn on_tick(&mut self, now: Timestamp) -> Vec<CorrelatedEvent> {
        // wall-clock retirement; the arrival-age guard keeps replays of
        // historical timestamps from retiring a window that is still filling
        let expired = self
            .current
            .as_ref()
            .map(|set| set.windows[0].is_expired(now) && set.opened.elapsed() >= self.plan.late_tolerance)
            .unwrap_or(false);
        if !expired {
            return Vec::new();
        }
        let mut retired = self.current.take().expect("checked above");
        let out = retired.retire_emit(&self.plan, &self.labels);
        self.sync_tracker();
        out
    }

    fn flush(&mut self) -> Vec<CorrelatedEvent> {
        let out = match self.current.take() {
            Some(mut set) => set.retire_emit(&self.plan, &self.labels),
            None => Vec::new(),
        };
        self.sync_tracker();
        out
    }

    fn sync_tracker(&mut self) {
        let now = self
            .current
            .as_ref()
            .map(|set| set.windows.iter().map(|w| w.bytes_used() as u64).sum())
            .unwrap_or(0);
        if now >= self.tracked_bytes {
            self.plan.tracker.add(now - self.tracked_bytes);
        } else {
            self.plan.tracker.sub(self.tracked_bytes - now);
        }
        self.tracked_bytes = now;
    }
}

struct WindowSet {
    windows: Vec<TimeWindow>,
    opened: Instant,
    value_order: Vec<String>,
    value_seen: FnvHashSet<String>,
    emitted: FnvHashSet<String>,
    first_arrival: FnvHashMap<String, Instant>,
}

impl WindowSet {
    fn starting_at(start: Timestamp, plan: &JoinPlan, n: usize) -> Self {
        let config = WindowConfig::starting_at(start, plan.window_length)
            .with_late_tolerance(plan.late_tolerance)
            .with_max_events(plan.max_events)
            .with_max_bytes(plan.max_window_bytes);
        tracing::debug!(start = %start, end = %config.end, streams = n, "opening correlation window");
        Self {
            windows: (0..n).map(|_| TimeWindow::new(config.clone())).collect(),
            opened: Instant::now(),
            value_order: Vec::new(),
            value_seen: FnvHashSet::default(),
            emitted: FnvHashSet::default(),
            first_arrival: FnvHashMap::default(),
        }
    }

    fn end(&self) -> Timestamp {
        self.windows[0].config().end
    }

    fn retire_emit(&mut self, plan: &JoinPlan, labels: &[String]) -> Vec<CorrelatedEvent> {
        let mut out = Vec::new();
        let values = std::mem::take(&mut self.value_order);
        let n = self.windows.len();
        tracing::debug!(end = %self.end(), values = values.len(), "retiring correlation window");
        for value in values {
            if self.emitted.contains(&value) {
                continue;
            }
            let per_stream: Vec<Vec<Arc<LogEvent>>> =
                self.windows.iter().map(|w| w.events_by_join_value(&value)).collect();
            let m = per_stream.iter().filter(|events| !events.is_empty()).count();
            let emit = match plan.query.join_type {
                JoinType::And => m == n,
                JoinType::Or => m >= 1,
                JoinType::Unless => m == 1,
            };
            if !emit {
                continue;
            }
            let required: Vec<usize> = match plan.query.join_type {
                JoinType::And => (0..n).collect(),
                _ => Vec::new(),
            };
            out.extend(plan.build_correlation(&per_stream, labels, &required, &value));
        }
        out
    }
}
