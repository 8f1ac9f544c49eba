use crate::{dedup::DedupConfig, join::JoinMode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use weft_wql::JoinType;

/// Engine construction parameters. Every field has a workable default, so
/// `EngineConfig::default()` is a reasonable starting point for tests and
/// small deployments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Correlation window when the query carries a zero-length one.
    pub default_time_window: Duration,
    /// Override of the correlation window, taking precedence over the window
    /// inherited from the query's left stream.
    pub time_window: Option<Duration>,
    /// Hard per-window event cap; events beyond it are rejected, which is the
    /// backpressure signal towards the adapter.
    pub max_events: usize,
    /// Grace period for out-of-order events, both at window admission and in
    /// the joiner's arrival check.
    pub late_tolerance: Duration,
    /// Join type seeded into [`CorrelationEngine::query_builder`](crate::CorrelationEngine::query_builder).
    pub default_join_type: JoinType,
    /// Batch or realtime emission, see [`JoinMode`].
    pub join_mode: JoinMode,
    /// Per-stream buffer between adapter and joiner; water marks derive from
    /// it (pause at 80 %, resume at 20 %).
    pub buffer_size: usize,
    /// Cadence of the joiner's retirement sweep.
    pub processing_interval: Duration,
    /// Approximate engine-wide memory budget; crossing it emits
    /// `memory_warning` hooks but never kills a query.
    pub max_memory_mb: u64,
    /// Cadence of the memory sampler.
    pub gc_interval: Duration,
    /// Byte budget of a single window before least-recently-used join-value
    /// buckets are evicted.
    pub max_window_bytes: usize,
    /// Duplicate suppression ahead of the joiner; `None` disables the stage.
    pub dedup: Option<DedupConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_time_window: Duration::from_secs(300),
            time_window: None,
            max_events: 10_000,
            late_tolerance: Duration::from_secs(30),
            default_join_type: JoinType::And,
            join_mode: JoinMode::Realtime,
            buffer_size: 1_000,
            processing_interval: Duration::from_millis(100),
            max_memory_mb: 100,
            gc_interval: Duration::from_secs(30),
            max_window_bytes: 16 * 1024 * 1024,
            dedup: Some(DedupConfig::default()),
        }
    }
}
