use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use weft_types::LogEvent;

/// Configuration of the duplicate-suppression stage in front of the joiner.
///
/// Two events are duplicates when their [`event_digest`] matches and they lie
/// within `window` of each other on the event time axis. This is a safety net
/// against reconnect replays; adapters are expected not to duplicate events
/// in the first place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DedupConfig {
    pub window: Duration,
    /// Hard cache-size cap; the oldest entries are evicted beyond it.
    pub max_entries: usize,
    /// Whether the label set participates in the content hash.
    pub include_labels: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_entries: 10_000,
            include_labels: false,
        }
    }
}

/// SHA-256 over a stable serialization of the identifying fields: timestamp,
/// message and source, plus the (sorted) labels when requested. Field values
/// are length-prefixed so concatenation cannot alias.
pub fn event_digest(event: &LogEvent, include_labels: bool) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(event.timestamp.millis().to_be_bytes());
    let field = |bytes: &[u8]| {
        let mut h = Sha256::new();
        h.update((bytes.len() as u64).to_be_bytes());
        h.update(bytes);
        h.finalize()
    };
    hasher.update(field(event.message.as_bytes()));
    hasher.update(field(event.source.as_bytes()));
    if include_labels {
        for (name, value) in &event.labels {
            hasher.update(field(name.as_bytes()));
            hasher.update(field(value.as_bytes()));
        }
    }
    hasher.finalize().into()
}
