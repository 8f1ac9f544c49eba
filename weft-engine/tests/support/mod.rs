//! Shared test plumbing: a scripted source adapter that replays canned
//! events per selector.

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use weft_types::{EventSource, EventStream, LogEvent, SourceError, StreamOptions, Timestamp};

// 2025-01-01T00:00:00Z
pub const T0: u64 = 1_735_689_600_000;

pub fn ts(offset_ms: u64) -> Timestamp {
    Timestamp::new(T0 + offset_ms)
}

pub fn event(source: &str, offset_ms: u64, request_id: &str) -> LogEvent {
    LogEvent::new(source, ts(offset_ms), format!("request_id={}", request_id))
        .with_join_key("request_id", request_id)
}

pub struct ScriptedSource {
    name: String,
    scripts: Mutex<HashMap<String, Vec<Result<LogEvent, SourceError>>>>,
    pub destroyed: AtomicBool,
}

impl ScriptedSource {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            scripts: Mutex::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn script(&self, selector: &str, events: Vec<LogEvent>) {
        self.scripts
            .lock()
            .insert(selector.to_owned(), events.into_iter().map(Ok).collect());
    }

    pub fn script_results(&self, selector: &str, events: Vec<Result<LogEvent, SourceError>>) {
        self.scripts.lock().insert(selector.to_owned(), events);
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_stream(&self, selector: &str, _options: StreamOptions) -> Result<EventStream, SourceError> {
        let events = self.scripts.lock().get(selector).cloned().unwrap_or_default();
        Ok(stream::iter(events).boxed())
    }

    async fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}
