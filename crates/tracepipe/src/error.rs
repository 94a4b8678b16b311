//! Initialization errors.
//!
//! Tracing is best-effort, observational infrastructure: the only errors this
//! crate ever surfaces are startup configuration failures. Per-span operations
//! against absent or finished spans are silent no-ops, and export failures are
//! logged and contained inside the pipeline.

use thiserror::Error;

/// Fatal-at-startup configuration failures.
#[derive(Debug, Error)]
pub enum InitError {
    /// The config collaborator handed over an unparsable log level.
    #[error("invalid log level {0:?}")]
    InvalidLogLevel(String),
    /// The process-wide tracer was initialized twice. Re-initialization has
    /// undefined sink duplication and is disallowed by contract.
    #[error("tracer already initialized")]
    AlreadyInitialized,
    /// A global log subscriber is already installed.
    #[error("log subscriber already installed")]
    SubscriberInstalled,
}
