//! The weft correlation engine: time-windowed, multi-stream equi-joins over
//! live log event streams.
//!
//! The engine owns a registry of [`weft_types::EventSource`] adapters, parses
//! [`weft_wql`] queries into plans, wires each stream through dedup and
//! backpressure stages, and joins them inside bounded time windows. Results
//! surface as a lazy stream of [`weft_types::CorrelatedEvent`]s plus typed
//! subscription hooks for metrics and memory warnings.

mod config;
mod dedup;
mod engine;
mod error;
pub mod join;
mod monitor;
mod util;
mod window;

pub use config::EngineConfig;
pub use dedup::{event_digest, DedupConfig};
pub use engine::{CorrelationEngine, MemoryWarning};
pub use error::EngineError;
pub use join::{JoinMode, JoinPlan};
pub use monitor::{MemoryTracker, PerfEvent, PerfSnapshot, PerformanceMonitor, Thresholds};
pub use window::{Admission, TimeWindow, WindowConfig};
