//! Structured error types for the synchronization engine.
//!
//! Every component boundary (watermark store, source reader, sink writer,
//! schema provisioner) returns a `Result<T, SyncError>`. Errors are only
//! converted into log events at the top of the pipeline loop; nothing in
//! this crate uses exceptions-as-control-flow.

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors produced by the synchronization engine's components.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A required environment variable was missing or malformed at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// The source reader's query failed (connection loss, syntax error, etc).
    #[error("source read failed: {0}")]
    Source(#[source] anyhow::Error),

    /// The sink writer's bulk request failed at the transport level.
    #[error("sink write failed: {0}")]
    Sink(#[source] anyhow::Error),

    /// A watermark store `get`/`set` failed.
    #[error("watermark store error: {0}")]
    Watermark(#[source] anyhow::Error),

    /// Index provisioning (create/compare/recreate) failed.
    #[error("schema provisioning failed: {0}")]
    Schema(#[source] anyhow::Error),

    /// A retryable operation exhausted its retry budget.
    #[error("operation exhausted retries: {0}")]
    RetriesExhausted(#[source] anyhow::Error),

    /// Any other error, preserved with context.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
