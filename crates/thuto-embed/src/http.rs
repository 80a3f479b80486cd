//! Shared HTTP client construction for embedding backends.

use std::time::Duration;

/// Create the HTTP client used by remote embedding backends.
///
/// Config: 10s connect timeout, 60s request timeout, rustls TLS,
/// `thuto/{version}` user-agent, redirect limit 10.
///
/// # Errors
///
/// Returns `ModelUnavailable` if the TLS backend cannot be initialized.
pub fn default_client() -> crate::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60))
        .user_agent(concat!("thuto/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| crate::EmbedError::ModelUnavailable(format!("HTTP client: {e}")))
}
