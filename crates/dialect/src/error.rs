//! Error types for dialect conversions

/// Errors from one-shot response conversion. Streaming reassembly never
/// errors; malformed events are logged and skipped so the stream closes
/// cleanly.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("response transform failed: {0}")]
    Transform(String),
}

/// Result alias for dialect conversions.
pub type Result<T> = std::result::Result<T, Error>;
