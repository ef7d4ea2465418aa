//! Error types for quake-unify.
//!
//! Uses `thiserror` for library-style error definitions, the same choice
//! the teacher repo made for its own `SeismotailError`.

use thiserror::Error;

/// Errors that can occur in quake-unify operations.
#[derive(Error, Debug)]
pub enum SeismotailError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// XML parsing failed
    #[error("Failed to parse XML: {0}")]
    Xml(#[from] quick_xml::Error),

    /// API returned an error status
    #[error("source API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid response structure
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Event validation failed
    #[error("Invalid event data: {0}")]
    Validation(String),

    /// Unknown or unconfigured source name
    #[error("unknown source: {0}")]
    UnknownSource(String),

    /// A fetch exhausted all configured retry attempts
    #[error("[{source}] all {attempts} attempt(s) failed: {last_error}")]
    SourceExhausted {
        source: String,
        attempts: u32,
        last_error: String,
    },

    /// A store adapter (raw/dead-letter/audit/unified) failed
    #[error("store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, SeismotailError>;
