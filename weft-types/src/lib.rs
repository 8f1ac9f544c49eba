#![allow(clippy::unreadable_literal)]

mod duration;
mod event;
mod ids;
mod scan;
pub mod source;
mod timestamp;

pub use duration::{format_duration, parse_duration, DurationError};
pub use event::{Completeness, CorrelatedEvent, CorrelationMetadata, LogEvent, TimeSpan};
pub use ids::fresh_correlation_id;
pub use scan::scan_join_keys;
pub use source::{EventSource, EventStream, RetryPolicy, SourceError, StreamOptions};
pub use timestamp::Timestamp;
