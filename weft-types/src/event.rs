use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

/// A single log line flowing through the system.
///
/// Adapters construct these from whatever their back-end emits; from there on
/// events are immutable and shared by reference, so a correlation holding an
/// event does not copy its message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub timestamp: Timestamp,
    /// Adapter name, e.g. `"loki"` or `"graylog"`.
    pub source: String,
    /// Optional logical stream label (e.g. the service name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    /// The raw log line.
    pub message: String,
    /// Open label set; keys are unique by construction.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Join-key candidates extracted by the adapter from labels or message
    /// content. Empty values count as "no join value".
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub join_keys: BTreeMap<String, String>,
}

impl LogEvent {
    pub fn new(source: impl Into<String>, timestamp: Timestamp, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            source: source.into(),
            stream: None,
            message: message.into(),
            labels: BTreeMap::new(),
            join_keys: BTreeMap::new(),
        }
    }

    pub fn with_stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = Some(stream.into());
        self
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    pub fn with_join_key(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.join_keys.insert(name.into(), value.into());
        self
    }

    /// Look up a join value by key name: labels win over extracted join keys,
    /// and empty strings are treated as absent.
    pub fn join_value(&self, key: &str) -> Option<&str> {
        self.labels
            .get(key)
            .or_else(|| self.join_keys.get(key))
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Approximate heap footprint, used for window byte budgeting. This counts
    /// string payloads plus a fixed per-event overhead; it deliberately stays
    /// cheap rather than exact.
    pub fn approx_size(&self) -> usize {
        const OVERHEAD: usize = 128;
        let strings = self.source.len()
            + self.stream.as_ref().map(|s| s.len()).unwrap_or(0)
            + self.message.len()
            + self.labels.iter().map(|(k, v)| k.len() + v.len() + 16).sum::<usize>()
            + self.join_keys.iter().map(|(k, v)| k.len() + v.len() + 16).sum::<usize>();
        OVERHEAD + strings
    }
}

/// Whether every stream named in the query contributed to a correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Completeness {
    Complete,
    Partial,
}

/// Earliest and latest event timestamp of a correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSpan {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeSpan {
    pub fn millis(&self) -> u64 {
        self.end.elapsed_since(self.start)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationMetadata {
    pub completeness: Completeness,
    /// Source/alias names that contributed at least one event.
    pub matched_streams: BTreeSet<String>,
    /// Number of streams named in the query.
    pub total_streams: usize,
}

/// A correlated event set: events from different streams sharing one join value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelatedEvent {
    /// Unique per emission.
    pub correlation_id: String,
    /// Earliest event timestamp in the set.
    pub timestamp: Timestamp,
    pub time_window: TimeSpan,
    /// The primary join-key name used.
    pub join_key: String,
    /// The value shared by every event in `events`.
    pub join_value: String,
    /// Participating events, ascending by timestamp.
    pub events: Vec<Arc<LogEvent>>,
    pub metadata: CorrelationMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev() -> LogEvent {
        LogEvent::new("loki", Timestamp::new(1000), "GET /healthz 200")
            .with_stream("api")
            .with_label("service", "api")
            .with_join_key("request_id", "r1")
    }

    #[test]
    fn join_value_prefers_labels() {
        let e = ev().with_label("request_id", "from-label");
        assert_eq!(e.join_value("request_id"), Some("from-label"));
        assert_eq!(ev().join_value("request_id"), Some("r1"));
        assert_eq!(ev().join_value("trace_id"), None);
    }

    #[test]
    fn empty_join_value_is_absent() {
        let e = ev().with_join_key("trace_id", "");
        assert_eq!(e.join_value("trace_id"), None);
    }

    #[test]
    fn serde_shape() {
        let json = serde_json::to_value(ev()).unwrap();
        assert_eq!(json["source"], "loki");
        assert_eq!(json["joinKeys"]["request_id"], "r1");
        let back: LogEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, ev());
    }

    #[test]
    fn correlation_wire_shape() {
        let e = Arc::new(ev());
        let c = CorrelatedEvent {
            correlation_id: "corr-0-deadbeef".into(),
            timestamp: e.timestamp,
            time_window: TimeSpan {
                start: e.timestamp,
                end: Timestamp::new(2000),
            },
            join_key: "request_id".into(),
            join_value: "r1".into(),
            events: vec![e],
            metadata: CorrelationMetadata {
                completeness: Completeness::Complete,
                matched_streams: ["loki".to_owned()].into_iter().collect(),
                total_streams: 1,
            },
        };
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["correlationId"], "corr-0-deadbeef");
        assert_eq!(json["joinKey"], "request_id");
        assert_eq!(json["timeWindow"]["start"], 1000);
        assert_eq!(json["metadata"]["completeness"], "complete");
        assert_eq!(json["metadata"]["matchedStreams"][0], "loki");
        assert_eq!(json["metadata"]["totalStreams"], 1);
        let back: CorrelatedEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn approx_size_grows_with_payload() {
        let small = ev().approx_size();
        let big = ev().with_label("k", "v".repeat(1000)).approx_size();
        assert!(big > small + 900);
    }
}
