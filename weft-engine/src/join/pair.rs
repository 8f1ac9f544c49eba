//! The time-bounded join of exactly two streams.
//!
//! Both input streams feed a single-reader state machine (the generator
//! below); per-stream event order is preserved, interleaving between the
//! streams is whatever the select produces. Events are admitted into a pair
//! of equally-bounded [`TimeWindow`]s; emission timing depends on
//! [`JoinMode`], retirement on event-time rollover, the tick stream, or end
//! of input.

use super::{JoinMode, JoinPlan};
use crate::{
    error::EngineError,
    util::GenStream,
    window::{Admission, TimeWindow, WindowConfig},
};
use fnv::{FnvHashMap, FnvHashSet};
use futures::{future::ready, stream, stream::BoxStream, StreamExt};
use std::{
    sync::Arc,
    time::Instant,
};
use weft_types::{CorrelatedEvent, EventStream, LogEvent, SourceError, Timestamp};
use weft_wql::{GroupSide, JoinType};

enum Input {
    Event(usize, Arc<LogEvent>),
    Failed(SourceError),
    Tick,
    // both event streams are exhausted; the tick stream never ends, so end
    // of input must travel in-band
    Eof,
}

/// Join two event streams according to the plan. `ticks` drives wall-clock
/// window retirement; without it windows retire on event-time rollover and at
/// end of input only.
pub fn join_pair(
    plan: Arc<JoinPlan>,
    left: EventStream,
    right: EventStream,
    ticks: Option<BoxStream<'static, ()>>,
) -> BoxStream<'static, Result<CorrelatedEvent, EngineError>> {
    GenStream::new(move |co| async move {
        let tag = |index: usize| {
            move |r: Result<LogEvent, SourceError>| match r {
                Ok(event) => Input::Event(index, Arc::new(event)),
                Err(e) => Input::Failed(e),
            }
        };
        let events = stream::select(left.map(tag(0)), right.map(tag(1))).chain(stream::iter([Input::Eof]));
        let mut input = match ticks {
            Some(t) => stream::select(events, t.map(|_| Input::Tick)).boxed(),
            None => events.boxed(),
        };

        let mut state = PairState::new(plan);
        while let Some(msg) = input.next().await {
            match msg {
                Input::Eof => break,
                Input::Event(side, event) => {
                    let started = Instant::now();
                    let out = state.process(side, event);
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
                    // a failed stream terminates the join; outer joins get to
                    // emit their pending partials first
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

struct PairState {
    plan: Arc<JoinPlan>,
    labels: Vec<String>,
    current: Option<WindowPair>,
    tracked_bytes: u64,
}

impl PairState {
    fn new(plan: Arc<JoinPlan>) -> Self {
        let labels = plan.stream_labels();
        Self {
            plan,
            labels,
            current: None,
            tracked_bytes: 0,
        }
    }

    fn process(&mut self, side: usize, event: Arc<LogEvent>) -> Vec<CorrelatedEvent> {
        let mut out = Vec::new();
        let Some(value) = self.plan.join_value(side, &event) else {
            return out;
        };
        let ts = event.timestamp;
        // event beyond the current window retires it and opens the next one
        let rollover = self.current.as_ref().map(|pair| ts > pair.end()).unwrap_or(false);
        if rollover {
            let mut retired = self.current.take().expect("checked above");
            out.extend(retired.retire_emit(&self.plan, &self.labels));
        }
        let pair = self
            .current
            .get_or_insert_with(|| WindowPair::starting_at(ts, &self.plan));

        // arrival-based late check: once a join value has been seen, stragglers
        // for it are only accepted within the late tolerance
        match pair.first_arrival.get(&value) {
            Some(first) if first.elapsed() > self.plan.late_tolerance => {
                tracing::debug!(value = %value, "straggler past late tolerance, dropped");
                return out;
            }
            Some(_) => {}
            None => {
                pair.first_arrival.insert(value.clone(), Instant::now());
            }
        }

        let window = if side == 0 { &mut pair.left } else { &mut pair.right };
        match window.add_event(event, &value) {
            Admission::Admitted => {}
            Admission::TooOld => {
                tracing::debug!(value = %value, "event older than window minus tolerance, dropped");
                return out;
            }
            Admission::AheadOfWindow => {
                // cannot happen: rollover above guarantees ts <= end
                tracing::debug!(value = %value, "event ahead of window, dropped");
                return out;
            }
            Admission::AtCapacity => {
                tracing::warn!(value = %value, "window at event capacity, rejecting");
                return out;
            }
        }
        if pair.value_seen.insert(value.clone()) {
            pair.value_order.push(value.clone());
        }

        if self.plan.mode == JoinMode::Realtime && self.plan.grouping_side().is_none() {
            out.extend(pair.realtime_emit(&self.plan, &self.labels, side, &value));
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
            .map(|pair| pair.left.is_expired(now) && pair.opened.elapsed() >= self.plan.late_tolerance)
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
            Some(mut pair) => pair.retire_emit(&self.plan, &self.labels),
            None => Vec::new(),
        };
        self.sync_tracker();
        out
    }

    // keep the engine-wide memory accounting in step with the window bytes
    fn sync_tracker(&mut self) {
        let now = self
            .current
            .as_ref()
            .map(|pair| (pair.left.bytes_used() + pair.right.bytes_used()) as u64)
            .unwrap_or(0);
        if now >= self.tracked_bytes {
            self.plan.tracker.add(now - self.tracked_bytes);
        } else {
            self.plan.tracker.sub(self.tracked_bytes - now);
        }
        self.tracked_bytes = now;
    }
}

struct WindowPair {
    left: TimeWindow,
    right: TimeWindow,
    opened: Instant,
    value_order: Vec<String>,
    value_seen: FnvHashSet<String>,
    emitted: FnvHashSet<String>,
    partial_emitted: FnvHashSet<String>,
    first_arrival: FnvHashMap<String, Instant>,
}

impl WindowPair {
    fn starting_at(start: Timestamp, plan: &JoinPlan) -> Self {
        let config = WindowConfig::starting_at(start, plan.window_length)
            .with_late_tolerance(plan.late_tolerance)
            .with_max_events(plan.max_events)
            .with_max_bytes(plan.max_window_bytes);
        tracing::debug!(start = %start, end = %config.end, "opening correlation window");
        Self {
            left: TimeWindow::new(config.clone()),
            right: TimeWindow::new(config),
            opened: Instant::now(),
            value_order: Vec::new(),
            value_seen: FnvHashSet::default(),
            emitted: FnvHashSet::default(),
            partial_emitted: FnvHashSet::default(),
            first_arrival: FnvHashMap::default(),
        }
    }

    fn end(&self) -> Timestamp {
        self.left.config().end
    }

    // emit as soon as a match becomes observable; at most one complete
    // correlation per join value
    fn realtime_emit(&mut self, plan: &JoinPlan, labels: &[String], side: usize, value: &str) -> Vec<CorrelatedEvent> {
        let mut out = Vec::new();
        if self.emitted.contains(value) {
            return out;
        }
        let left = self.left.events_by_join_value(value);
        let right = self.right.events_by_join_value(value);
        match plan.query.join_type {
            JoinType::And => {
                if !left.is_empty() && !right.is_empty() {
                    if let Some(c) = plan.build_correlation(&[left, right], labels, &[0, 1], value) {
                        self.emitted.insert(value.to_owned());
                        out.push(c);
                    }
                }
            }
            JoinType::Or => {
                if !left.is_empty() && !right.is_empty() {
                    // upgrade: a fresh complete correlation supersedes an
                    // earlier partial for this value
                    if let Some(c) = plan.build_correlation(&[left.clone(), right], labels, &[0, 1], value) {
                        self.emitted.insert(value.to_owned());
                        out.push(c);
                        return out;
                    }
                }
                if side == 0 && !left.is_empty() && !self.partial_emitted.contains(value) && self.right.events_by_join_value(value).is_empty() {
                    if let Some(c) = plan.build_correlation(&[left, Vec::new()], labels, &[0], value) {
                        self.partial_emitted.insert(value.to_owned());
                        out.push(c);
                    }
                }
            }
            // anti joins only emit at retirement
            JoinType::Unless => {}
        }
        out
    }

    fn retire_emit(&mut self, plan: &JoinPlan, labels: &[String]) -> Vec<CorrelatedEvent> {
        let mut out = Vec::new();
        let values = std::mem::take(&mut self.value_order);
        tracing::debug!(end = %self.end(), values = values.len(), "retiring correlation window");
        for value in values {
            if self.emitted.contains(&value) {
                continue;
            }
            let left = self.left.events_by_join_value(&value);
            let right = self.right.events_by_join_value(&value);
            match plan.query.join_type {
                JoinType::And => {
                    if !left.is_empty() && !right.is_empty() {
                        out.extend(self.grouped(plan, labels, left, right, &[0, 1], &value));
                    }
                }
                JoinType::Or => {
                    if left.is_empty() {
                        continue;
                    }
                    if !right.is_empty() {
                        let complete = self.grouped(plan, labels, left.clone(), right, &[0, 1], &value);
                        if !complete.is_empty() {
                            out.extend(complete);
                            continue;
                        }
                    }
                    if !self.partial_emitted.contains(&value) {
                        out.extend(plan.build_correlation(&[left, Vec::new()], labels, &[0], &value));
                    }
                }
                JoinType::Unless => {
                    if !left.is_empty() && right.is_empty() {
                        out.extend(plan.build_correlation(&[left, Vec::new()], labels, &[0], &value));
                    }
                }
            }
        }
        out
    }

    // cardinality control: one correlation per event on the grouping side
    fn grouped(
        &self,
        plan: &JoinPlan,
        labels: &[String],
        left: Vec<Arc<LogEvent>>,
        right: Vec<Arc<LogEvent>>,
        required: &[usize],
        value: &str,
    ) -> Vec<CorrelatedEvent> {
        match plan.grouping_side() {
            Some(GroupSide::Left) => left
                .iter()
                .filter_map(|e| plan.build_correlation(&[vec![e.clone()], right.clone()], labels, required, value))
                .collect(),
            Some(GroupSide::Right) => right
                .iter()
                .filter_map(|e| plan.build_correlation(&[left.clone(), vec![e.clone()]], labels, required, value))
                .collect(),
            None => plan
                .build_correlation(&[left, right], labels, required, value)
                .into_iter()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use weft_types::Completeness;
    use weft_wql::Query;

    // 2025-01-01T00:00:00Z
    const T0: u64 = 1_735_689_600_000;

    fn ev(source: &str, ts: u64, value: &str) -> Result<LogEvent, SourceError> {
        Ok(LogEvent::new(source, Timestamp::new(ts), format!("request_id={}", value))
            .with_join_key("request_id", value))
    }

    fn plan(query: &str, mode: JoinMode) -> Arc<JoinPlan> {
        Arc::new(JoinPlan::new(Query::parse(query).unwrap(), mode))
    }

    async fn run(
        plan: Arc<JoinPlan>,
        left: Vec<Result<LogEvent, SourceError>>,
        right: Vec<Result<LogEvent, SourceError>>,
    ) -> Vec<Result<CorrelatedEvent, EngineError>> {
        join_pair(plan, stream::iter(left).boxed(), stream::iter(right).boxed(), None)
            .collect::<Vec<_>>()
            .await
    }

    fn ok(results: Vec<Result<CorrelatedEvent, EngineError>>) -> Vec<CorrelatedEvent> {
        results.into_iter().map(|r| r.unwrap()).collect()
    }

    #[tokio::test]
    async fn inner_join_batch_mode() {
        let p = plan("loki(a)[5m] and on(request_id) loki(b)[5m]", JoinMode::Batch);
        let out = ok(run(
            p,
            vec![ev("loki", T0, "r1")],
            vec![ev("loki", T0 + 1_000, "r1")],
        )
        .await);
        assert_eq!(out.len(), 1);
        let c = &out[0];
        assert_eq!(c.join_key, "request_id");
        assert_eq!(c.join_value, "r1");
        assert_eq!(c.events.len(), 2);
        assert_eq!(c.time_window.start, Timestamp::new(T0));
        assert_eq!(c.time_window.end, Timestamp::new(T0 + 1_000));
        assert_eq!(c.metadata.completeness, Completeness::Complete);
        assert_eq!(c.metadata.total_streams, 2);
        let matched: Vec<&str> = c.metadata.matched_streams.iter().map(|s| s.as_str()).collect();
        assert_eq!(matched, vec!["loki", "loki_2"]);
    }

    #[tokio::test]
    async fn inner_join_without_match_emits_nothing() {
        let p = plan("loki(a)[5m] and on(request_id) loki(b)[5m]", JoinMode::Batch);
        let out = ok(run(p, vec![ev("loki", T0, "r1")], vec![ev("loki", T0 + 1, "r2")]).await);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn empty_streams_yield_zero_correlations() {
        let p = plan("loki(a)[5m] and on(request_id) loki(b)[5m]", JoinMode::Batch);
        assert!(ok(run(p, vec![], vec![]).await).is_empty());
        let p = plan("loki(a)[5m] unless on(request_id) loki(b)[5m]", JoinMode::Batch);
        assert!(ok(run(p, vec![], vec![ev("loki", T0, "r1")]).await).is_empty());
    }

    #[tokio::test]
    async fn realtime_emits_at_most_one_complete_per_value() {
        let p = plan("loki(a)[5m] and on(request_id) loki(b)[5m]", JoinMode::Realtime);
        let out = ok(run(
            p,
            vec![ev("loki", T0, "r1"), ev("loki", T0 + 10, "r1")],
            vec![ev("loki", T0 + 5, "r1")],
        )
        .await);
        assert_eq!(out.len(), 1);
        // the match fired when left and right both held one event
        assert_eq!(out[0].events.len(), 2);
    }

    #[tokio::test]
    async fn batch_mode_collects_every_event_of_a_value() {
        let p = plan("loki(a)[5m] and on(request_id) loki(b)[5m]", JoinMode::Batch);
        let out = ok(run(
            p,
            vec![ev("loki", T0, "r1"), ev("loki", T0 + 10, "r1")],
            vec![ev("loki", T0 + 5, "r1")],
        )
        .await);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].events.len(), 3);
    }

    #[tokio::test]
    async fn left_join_emits_partial_then_upgrades() {
        let p = plan("loki(a)[5m] or on(request_id) loki(b)[5m]", JoinMode::Realtime);
        let out = ok(run(
            p,
            vec![ev("loki", T0, "r2")],
            vec![ev("loki", T0 + 1_000, "r2")],
        )
        .await);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].metadata.completeness, Completeness::Partial);
        assert_eq!(out[0].events.len(), 1);
        assert_eq!(out[1].metadata.completeness, Completeness::Complete);
        assert_eq!(out[1].events.len(), 2);
        // the upgrade is a distinct emission
        assert_ne!(out[0].correlation_id, out[1].correlation_id);
    }

    #[tokio::test]
    async fn left_join_without_match_stays_partial() {
        let p = plan("loki(a)[5m] or on(request_id) loki(b)[5m]", JoinMode::Realtime);
        let out = ok(run(p, vec![ev("loki", T0, "r2")], vec![]).await);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].metadata.completeness, Completeness::Partial);
        assert_eq!(out[0].join_value, "r2");
        // right-only values do not correlate in a left join
        let p = plan("loki(a)[5m] or on(request_id) loki(b)[5m]", JoinMode::Batch);
        let out = ok(run(p, vec![], vec![ev("loki", T0, "r9")]).await);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn anti_join_emits_unmatched_left_values_at_retirement() {
        let p = plan("loki(a)[5m] unless on(request_id) loki(b)[5m]", JoinMode::Realtime);
        let out = ok(run(
            p,
            vec![ev("loki", T0, "r3"), ev("loki", T0 + 10, "r4")],
            vec![ev("loki", T0 + 1_000, "r4")],
        )
        .await);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].join_value, "r3");
        assert_eq!(out[0].metadata.completeness, Completeness::Partial);
        assert_eq!(out[0].events.len(), 1);
    }

    #[tokio::test]
    async fn group_left_pairs_each_left_event_with_all_right_events() {
        let p = plan(
            "loki(a)[5m] and on(request_id) group_left loki(b)[5m]",
            JoinMode::Realtime,
        );
        let out = ok(run(
            p,
            vec![ev("loki", T0, "r5"), ev("loki", T0 + 10, "r5")],
            vec![ev("loki", T0 + 5, "r5")],
        )
        .await);
        assert_eq!(out.len(), 2);
        for c in &out {
            assert_eq!(c.events.len(), 2);
            assert_eq!(c.metadata.completeness, Completeness::Complete);
        }
    }

    #[tokio::test]
    async fn events_without_join_value_are_discarded() {
        let p = plan("loki(a)[5m] and on(request_id) loki(b)[5m]", JoinMode::Batch);
        let no_value = Ok(LogEvent::new("loki", Timestamp::new(T0), "nothing to see"));
        let out = ok(run(p, vec![no_value, ev("loki", T0, "r1")], vec![ev("loki", T0 + 1, "r1")]).await);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].events.len(), 2);
    }

    #[tokio::test]
    async fn window_rollover_emits_per_window() {
        let p = plan("loki(a)[5m] and on(request_id) loki(b)[5m]", JoinMode::Batch);
        let out = ok(run(
            p,
            vec![ev("loki", T0, "r9"), ev("loki", T0 + 400_000, "r9")],
            vec![ev("loki", T0 + 1_000, "r9"), ev("loki", T0 + 401_000, "r9")],
        )
        .await);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].events.len(), 2);
        assert_eq!(out[1].events.len(), 2);
        assert!(out[1].time_window.start >= Timestamp::new(T0 + 400_000));
    }

    #[tokio::test]
    async fn source_error_terminates_an_inner_join() {
        let p = plan("loki(a)[5m] and on(request_id) loki(b)[5m]", JoinMode::Realtime);
        let failure = Err(SourceError::Remote {
            source_name: "loki".into(),
            message: "boom".into(),
        });
        let mut out = run(
            p,
            vec![ev("loki", T0, "r1"), failure],
            vec![ev("loki", T0 + 1, "r1")],
        )
        .await;
        let last = out.pop().unwrap();
        assert!(matches!(last, Err(EngineError::Source(_))));
        // the correlation observed before the failure is still valid
        assert_eq!(out.len(), 1);
        assert!(out[0].is_ok());
    }

    #[tokio::test]
    async fn left_join_flushes_partials_before_failing() {
        let p = plan("loki(a)[5m] or on(request_id) loki(b)[5m]", JoinMode::Batch);
        let failure = Err(SourceError::Timeout {
            source_name: "loki".into(),
            elapsed: std::time::Duration::from_secs(5),
        });
        let out = run(p, vec![ev("loki", T0, "r7")], vec![failure]).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap().join_value, "r7");
        assert!(matches!(out[1], Err(EngineError::Source(SourceError::Timeout { .. }))));
    }
}
