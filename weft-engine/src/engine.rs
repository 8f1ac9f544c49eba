//! The top-level coordinator: adapter registry, query planning, pipeline
//! wiring and lifecycle.

use crate::{
    config::EngineConfig,
    dedup::event_digest,
    error::EngineError,
    join::{join_multi, join_pair, JoinPlan},
    monitor::{MemoryTracker, PerfSnapshot, PerformanceMonitor, Thresholds},
};
use futures::{future::ready, stream, stream::BoxStream, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use weft_futures_util::{
    future::Trigger,
    prelude::*,
    stream::variable::{Observer, Variable, VariableGuard},
    stream::{interval, BackpressureConfig},
};
use weft_types::{CorrelatedEvent, EventSource, LogEvent, SourceError, StreamOptions};
use weft_wql::{ParseError, Query, QueryBuilder, Validation};

/// Payload of the `memory_warning` hook: the sampler found the approximate
/// engine memory above the configured budget. Informational; the engine never
/// kills a query on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryWarning {
    pub used_bytes: u64,
    pub budget_bytes: u64,
}

struct Hooks {
    correlation_found: Variable<Option<CorrelatedEvent>>,
    performance: Variable<PerfSnapshot>,
    memory_warning: Variable<Option<MemoryWarning>>,
    adapter_added: Variable<Option<String>>,
}

// writer-side guards; dropping them ends all observer streams
struct HookGuards {
    _correlation: VariableGuard<Option<CorrelatedEvent>>,
    _performance: VariableGuard<PerfSnapshot>,
    _memory: VariableGuard<Option<MemoryWarning>>,
    _adapter: VariableGuard<Option<String>>,
}

/// The correlation engine. Owns the adapter registry and all cross-query
/// state; individual queries run as independent pipelines that share the
/// engine's monitor, memory accounting and cancellation.
pub struct CorrelationEngine {
    config: EngineConfig,
    adapters: RwLock<BTreeMap<String, Arc<dyn EventSource>>>,
    monitor: Arc<PerformanceMonitor>,
    tracker: MemoryTracker,
    hooks: Hooks,
    guards: Mutex<Option<HookGuards>>,
    cancel: Trigger,
    destroyed: AtomicBool,
    sampler: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CorrelationEngine {
    pub fn new(config: EngineConfig) -> Self {
        let hooks = Hooks {
            correlation_found: Variable::new(None),
            performance: Variable::new(PerfSnapshot::default()),
            memory_warning: Variable::new(None),
            adapter_added: Variable::new(None),
        };
        let guards = HookGuards {
            _correlation: VariableGuard::new(hooks.correlation_found.clone()),
            _performance: VariableGuard::new(hooks.performance.clone()),
            _memory: VariableGuard::new(hooks.memory_warning.clone()),
            _adapter: VariableGuard::new(hooks.adapter_added.clone()),
        };
        Self {
            config,
            adapters: RwLock::new(BTreeMap::new()),
            monitor: Arc::new(PerformanceMonitor::new(Thresholds::default())),
            tracker: MemoryTracker::default(),
            hooks,
            guards: Mutex::new(Some(guards)),
            cancel: Trigger::new(),
            destroyed: AtomicBool::new(false),
            sampler: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    /// Register a source adapter under its own name. Names are unique.
    pub fn register_adapter(&self, adapter: Arc<dyn EventSource>) -> Result<(), EngineError> {
        let name = adapter.name().to_owned();
        let mut adapters = self.adapters.write();
        if adapters.contains_key(&name) {
            return Err(EngineError::AdapterExists(name));
        }
        tracing::info!(adapter = %name, "adapter registered");
        adapters.insert(name.clone(), adapter);
        drop(adapters);
        self.hooks.adapter_added.set(Some(name));
        Ok(())
    }

    pub fn adapter(&self, name: &str) -> Option<Arc<dyn EventSource>> {
        self.adapters.read().get(name).cloned()
    }

    pub fn adapter_names(&self) -> Vec<String> {
        self.adapters.read().keys().cloned().collect()
    }

    /// A [`QueryBuilder`] seeded with the engine's default join type.
    pub fn query_builder(&self) -> QueryBuilder {
        QueryBuilder::new().join(self.config.default_join_type)
    }

    /// Validate a query against grammar, semantics and the adapter registry.
    pub fn validate(&self, input: &str) -> Validation {
        let verdict = weft_wql::validate(input);
        if !verdict.ok {
            return verdict;
        }
        let query = match Query::parse(input) {
            Ok(q) => q,
            Err(e) => {
                let suggestions = e.suggestions();
                return Validation {
                    ok: false,
                    error: Some(e),
                    suggestions,
                };
            }
        };
        let adapters = self.adapters.read();
        for stream in query.streams() {
            if !adapters.contains_key(&stream.source) {
                return Validation {
                    ok: false,
                    error: Some(ParseError::Semantic {
                        message: format!("no adapter registered for source `{}`", stream.source),
                    }),
                    suggestions: adapters.keys().cloned().collect(),
                };
            }
        }
        verdict
    }

    /// Subscribe to every correlation any running query emits.
    pub fn on_correlation(&self) -> impl Stream<Item = CorrelatedEvent> {
        self.hooks.correlation_found.observer().filter_map(ready)
    }

    /// Subscribe to periodic performance snapshots.
    pub fn on_performance_metrics(&self) -> Observer<PerfSnapshot> {
        self.hooks.performance.observer()
    }

    /// Subscribe to memory budget warnings.
    pub fn on_memory_warning(&self) -> impl Stream<Item = MemoryWarning> {
        self.hooks.memory_warning.observer().filter_map(ready)
    }

    /// Subscribe to adapter registrations.
    pub fn on_adapter_added(&self) -> impl Stream<Item = String> {
        self.hooks.adapter_added.observer().filter_map(ready)
    }

    /// Parse and execute a correlation query; results arrive lazily on the
    /// returned stream, in the joiner's emission order.
    ///
    /// Dropping the stream cancels the pipeline and releases its adapter
    /// streams; [`CorrelationEngine::destroy`] cancels all pipelines at once,
    /// ending each stream with [`EngineError::Cancelled`].
    pub async fn correlate(&self, input: &str) -> Result<BoxStream<'static, Result<CorrelatedEvent, EngineError>>, EngineError> {
        let query = Query::parse(input)?;
        self.correlate_query(query).await
    }

    /// Execute an already-parsed query (e.g. from [`CorrelationEngine::query_builder`]).
    pub async fn correlate_query(&self, query: Query) -> Result<BoxStream<'static, Result<CorrelatedEvent, EngineError>>, EngineError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(EngineError::Cancelled);
        }
        self.ensure_sampler();

        let mut inputs = Vec::with_capacity(query.total_streams());
        for stream_query in query.streams() {
            let adapter = self
                .adapter(&stream_query.source)
                .ok_or_else(|| EngineError::AdapterNotFound(stream_query.source.clone()))?;
            if !adapter.validate_selector(&stream_query.selector) {
                tracing::warn!(
                    adapter = %stream_query.source,
                    selector = %stream_query.selector,
                    "adapter rejected selector, continuing anyway"
                );
            }
            let options = StreamOptions::with_time_range(stream_query.time_range);
            let raw = adapter.create_stream(&stream_query.selector, options).await?;
            inputs.push(self.pipeline(raw));
        }

        let mut window_length = self.config.time_window.unwrap_or(query.time_window);
        if window_length.is_zero() {
            window_length = self.config.default_time_window;
        }
        let plan = Arc::new(
            JoinPlan::new(query, self.config.join_mode)
                .with_window_length(window_length)
                .with_late_tolerance(self.config.late_tolerance)
                .with_max_events(self.config.max_events)
                .with_max_window_bytes(self.config.max_window_bytes)
                .with_tracker(self.tracker.clone())
                .with_monitor(self.monitor.clone()),
        );
        let ticks = Some(interval(self.config.processing_interval).map(|_| ()).boxed());
        let joined = if inputs.len() == 2 {
            let mut it = inputs.into_iter();
            let left = it.next().expect("two streams");
            let right = it.next().expect("two streams");
            join_pair(plan, left, right, ticks)
        } else {
            join_multi(plan, inputs, ticks)
        };

        let monitor = self.monitor.clone();
        let found = self.hooks.correlation_found.clone();
        let cancel = self.cancel.clone();
        let cancelled_tail = {
            let cancel = self.cancel.clone();
            stream::once(ready(())).filter_map(move |_| ready(cancel.is_fired().then(|| Err(EngineError::Cancelled))))
        };
        let out = joined
            .inspect(move |result| match result {
                Ok(correlation) => {
                    monitor.record_correlation();
                    found.set(Some(correlation.clone()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "correlation stream failed");
                    monitor.record_error();
                }
            })
            .take_until_signaled(cancel.listen())
            .chain(cancelled_tail)
            .boxed();
        Ok(out)
    }

    // dedup (optional) and backpressure stages between an adapter stream and
    // the joiner
    fn pipeline(
        &self,
        raw: BoxStream<'static, Result<LogEvent, SourceError>>,
    ) -> BoxStream<'static, Result<LogEvent, SourceError>> {
        let staged = match &self.config.dedup {
            Some(dedup) => {
                let include_labels = dedup.include_labels;
                let mut error_seq = 0u64;
                raw.dedup_window(
                    dedup.window,
                    dedup.max_entries,
                    move |result| match result {
                        Ok(event) => DedupKey::Content(event_digest(event, include_labels)),
                        // errors are never duplicates of anything
                        Err(_) => {
                            error_seq += 1;
                            DedupKey::Passthrough(error_seq)
                        }
                    },
                    |result| match result {
                        Ok(event) => event.timestamp.millis(),
                        Err(_) => 0,
                    },
                )
                .boxed()
            }
            None => raw,
        };
        staged
            .backpressure(BackpressureConfig::for_buffer(self.config.buffer_size))
            .boxed()
    }

    fn ensure_sampler(&self) {
        let mut sampler = self.sampler.lock();
        if sampler.is_some() {
            return;
        }
        let monitor = self.monitor.clone();
        let tracker = self.tracker.clone();
        let performance = self.hooks.performance.clone();
        let memory_warning = self.hooks.memory_warning.clone();
        let budget_bytes = self.config.max_memory_mb * 1024 * 1024;
        let gc_interval = self.config.gc_interval;
        let cancel = self.cancel.clone();
        *sampler = Some(tokio::spawn(async move {
            let mut ticks = interval(gc_interval).take_until_signaled(cancel.listen());
            while ticks.next().await.is_some() {
                let used = tracker.bytes();
                monitor.record_memory(used);
                performance.set(monitor.sample());
                if used > budget_bytes {
                    tracing::warn!(used, budget_bytes, "engine memory over budget");
                    memory_warning.set(Some(MemoryWarning {
                        used_bytes: used,
                        budget_bytes,
                    }));
                }
            }
        }));
    }

    /// Cancel all running queries, destroy all adapters and release the hook
    /// subscriptions. Idempotent.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("engine shutting down");
        self.cancel.fire();
        if let Some(handle) = self.sampler.lock().take() {
            handle.abort();
        }
        let adapters: Vec<Arc<dyn EventSource>> = {
            let mut map = self.adapters.write();
            let drained: Vec<_> = std::mem::take(&mut *map).into_values().collect();
            drained
        };
        for adapter in adapters {
            adapter.destroy().await;
        }
        // ends all hook observer streams after their final value
        self.guards.lock().take();
    }
}

// key type of the dedup stage: content digests for events, unique markers for
// errors so they pass through untouched
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DedupKey {
    Content([u8; 32]),
    Passthrough(u64),
}
