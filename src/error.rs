//! Error types for the provider boundary and persistence layer.
//!
//! Orchestration code (CLI, scan driver) uses `anyhow` for context-rich
//! propagation; everything that crosses the provider boundary is parsed
//! into [`Error`] immediately so no untyped failure travels further.

use std::time::Duration;
use thiserror::Error;

/// Engine error kinds.
///
/// The retry combinator consults [`Error::is_retryable`] to decide whether
/// an attempt is worth repeating: timeouts, network failures, and
/// rate-limit/server HTTP statuses are transient; everything else fails
/// the call immediately.
#[derive(Debug, Error)]
pub enum Error {
    /// A provider call exceeded its per-attempt deadline.
    #[error("provider timed out after {0:?}")]
    Timeout(Duration),

    /// The provider could not be reached (connection, DNS, TLS).
    #[error("provider network error: {0}")]
    Network(String),

    /// The provider answered with a non-success HTTP status.
    #[error("provider HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The provider answered, but the payload was not in the expected shape.
    #[error("failed to parse provider response: {0}")]
    Parse(String),

    /// Persistence read/write failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// No embedding or document exists for the requested path.
    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::Network(_) => true,
            Error::Http { status, .. } => *status == 429 || *status >= 500,
            // Malformed output from an LLM is usually nondeterministic,
            // so a second attempt is worth its cost.
            Error::Parse(_) => true,
            Error::Io(_) | Error::NotFound(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
