use thiserror::Error;
use weft_types::SourceError;
use weft_wql::ParseError;

/// Everything that can go wrong between `correlate()` and the end of its
/// result stream. Parse and registry problems surface synchronously; source
/// failures arrive through the stream and end it. Memory budget crossings
/// are not errors: they travel on the `memory_warning` hook and never
/// terminate a query.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Query(#[from] ParseError),
    #[error("no adapter registered for source `{0}`")]
    AdapterNotFound(String),
    #[error("adapter `{0}` is already registered")]
    AdapterExists(String),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("cancelled")]
    Cancelled,
}
