//! Shared async HTTP client construction.
//!
//! Every source is fetched through the same `reqwest::Client` (connection
//! pooling across sources, one User-Agent, rustls TLS); per-source retry,
//! backoff, and query parameters live in `pipeline.rs` since they depend on
//! `SourceConfig`, not on the client itself.

use crate::errors::{Result, SeismotailError};
use reqwest::Client;
use std::time::Duration;

/// User agent string for API requests.
const USER_AGENT: &str = concat!("quake-unify/", env!("CARGO_PKG_VERSION"));

/// Fallback connect timeout; per-request timeouts come from `SourceConfig`.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Build the shared `reqwest::Client` used by every source pipeline.
///
/// # Errors
///
/// Returns an error if the underlying TLS backend cannot be initialized.
pub fn build_http_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .build()
        .map_err(SeismotailError::Http)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_client() {
        assert!(build_http_client().is_ok());
    }
}
