// src/core/error.rs

use std::time::Duration;
use thiserror::Error;

/// Errors that can surface from the scanning framework.
///
/// Module-level failures are always caught by the engine and turned into an
/// `error` status on the module's result; only `ScannerNotFound` reaches the
/// caller of `ScanEngine::run_one`.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("HTTP request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("{url} responded with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Invalid JSON from {url}: {message}")]
    Json { url: String, message: String },

    #[error("DNS lookup for {name} ({record_type}) failed: {message}")]
    Lookup {
        name: String,
        record_type: String,
        message: String,
    },

    #[error("{label} timed out after {}ms", .elapsed.as_millis())]
    Timeout { label: String, elapsed: Duration },

    #[error("Rate limit exceeded for {label}, retry in {retry_after}s")]
    RateLimited { label: String, retry_after: u64 },

    #[error("Scanner not found: {0}")]
    ScannerNotFound(String),

    #[error("{0}")]
    Analysis(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
