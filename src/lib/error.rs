//! # Error Kinds
//!
//! Every failure in a benchmark run is terminal: nothing here is retried or
//! recovered locally. Errors travel up to the run boundary as values so the
//! binaries can map them to a non-zero exit code and tests can assert on them.

use thiserror::Error;

use crate::gate::GateError;

/// Errors produced while configuring, executing, or validating a run.
#[derive(Error, Debug)]
pub enum CoprocError {
    /// Invalid thread count, cpu share, element count, or sub-range.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A run buffer could not be allocated.
    #[error("Failed to allocate buffer '{buffer}' ({elements} elements)")]
    Allocation {
        buffer: &'static str,
        elements: usize,
    },

    /// Device unavailable, submission rejected, or an asynchronous fault.
    #[error("Device error: {0}")]
    Device(String),

    /// The concurrently produced sum differs from the sequential baseline.
    #[error("Validation failed at index {index}: expected {expected}, got {actual}")]
    Validation {
        index: usize,
        expected: i32,
        actual: i32,
    },

    /// Cross-process start handshake failed.
    #[error(transparent)]
    Gate(#[from] GateError),

    /// A host worker panicked before joining.
    #[error("Host worker panicked")]
    WorkerPanicked,

    /// The host worker pool could not be built.
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// Writing a result sink failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Serializing a run summary failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used throughout the library.
pub type Result<T, E = CoprocError> = std::result::Result<T, E>;
