//! Error types for the call recording pipeline.

/// Top-level error type for the recording pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    /// Audio format, normalization, or device-facing error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Configuration error (malformed file; out-of-range values are coerced,
    /// not surfaced here).
    #[error("config error: {0}")]
    Config(String),

    /// I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Durable writer error: segment recovery itself failed.
    #[error("writer error: {0}")]
    Writer(String),

    /// Pipeline session misuse (e.g. operating on a disposed session).
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// Cross-thread channel send/receive failure.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, RecorderError>;
