//! The contract between the correlation engine and concrete log back-ends.
//!
//! A source adapter turns a back-end specific selector into a lazy pull
//! sequence of [`LogEvent`]s. Transport code (HTTP polling, WebSocket push,
//! authentication) lives entirely behind this trait; the engine only sees the
//! stream and the typed error taxonomy below.

use crate::LogEvent;
use async_trait::async_trait;
use futures::stream::BoxStream;
use rand::Rng;
use std::{collections::BTreeSet, time::Duration};
use thiserror::Error;

/// Events or a terminal error, pulled lazily by the consumer.
pub type EventStream = BoxStream<'static, Result<LogEvent, SourceError>>;

/// Transport/protocol failures surfaced by an adapter.
///
/// Transient errors are retried inside the adapter (see [`RetryPolicy`]);
/// whatever reaches the engine through this type is final for the stream.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("source `{0}` requires authentication")]
    AuthRequired(String),
    #[error("source `{source_name}` timed out after {elapsed:?}")]
    Timeout { source_name: String, elapsed: Duration },
    #[error("source `{source_name}` still failing after {attempts} attempts: {last}")]
    MaxRetries {
        source_name: String,
        attempts: u32,
        last: String,
    },
    #[error("source `{source_name}` reported: {message}")]
    Remote { source_name: String, message: String },
    #[error("stream cancelled")]
    Cancelled,
}

/// Options for [`EventSource::create_stream`].
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// How far back the stream should reach; adapters fall back to
    /// [`StreamOptions::DEFAULT_TIME_RANGE`] when unset.
    pub time_range: Option<Duration>,
    /// Upper bound on the number of events the stream will yield.
    pub limit: Option<usize>,
}

impl StreamOptions {
    pub const DEFAULT_TIME_RANGE: Duration = Duration::from_secs(300);

    pub fn with_time_range(time_range: Duration) -> Self {
        Self {
            time_range: Some(time_range),
            limit: None,
        }
    }

    pub fn effective_time_range(&self) -> Duration {
        self.time_range.unwrap_or(Self::DEFAULT_TIME_RANGE)
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            time_range: None,
            limit: None,
        }
    }
}

/// Exponential backoff with full jitter, used by adapters for reconnection.
///
/// Attempt `n` (zero-based) sleeps a uniformly random duration in
/// `[0, min(base · 2ⁿ, max_delay)]`; after `max_retries` exhausted attempts
/// the adapter must fail its stream with [`SourceError::MaxRetries`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempt` failures.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Jittered delay before retry number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        rand::thread_rng().gen_range(Duration::ZERO..=exp)
    }
}

/// A source of log events, registered with the engine under a stable name.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Stable identifier used in query syntax, e.g. `"loki"`.
    fn name(&self) -> &str;

    /// Open a lazy event stream for the given (opaque) selector.
    ///
    /// Contract: the adapter must stop issuing network work within a bounded
    /// delay once the consumer stops pulling, resume from the last
    /// acknowledged timestamp when pulling resumes, and never duplicate
    /// events across connection flaps (the engine's dedup stage is a safety
    /// net, not the primary mechanism). Out-of-order emission is allowed
    /// within the engine's late tolerance.
    async fn create_stream(&self, selector: &str, options: StreamOptions) -> Result<EventStream, SourceError>;

    /// Cheap syntactic validation of a selector, used at plan time.
    fn validate_selector(&self, selector: &str) -> bool {
        !selector.trim().is_empty()
    }

    /// Best-effort enumeration of logical streams this source can serve.
    async fn available_streams(&self) -> Result<BTreeSet<String>, SourceError> {
        Ok(BTreeSet::new())
    }

    /// Release all resources. Idempotent; must drain in-flight work.
    async fn destroy(&self) {}
}
