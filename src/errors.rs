//! Error-handling utilities.

use thiserror::Error;

/// Display an error, plus all the underlying "causes" (ie, wrapped errors), plus a
/// backtrace. Used only for startup failures, which we report with `anyhow`.
pub(crate) fn display_causes_and_backtrace(err: &anyhow::Error) {
    eprintln!("Error: {}", err);
    for cause in err.chain().skip(1) {
        eprintln!("  caused by: {}", cause);
    }
    eprintln!("{}", err.backtrace());
}

/// Errors recognized by the detection loop and its components.
///
/// Only [`TedError::ConfigError`] is fatal. Everything else is caught by the
/// detection loop, logged, and converted into a degraded result.
#[derive(Debug, Error)]
pub enum TedError {
    /// A required configuration section or key was missing or empty.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// The relational store could not be reached or a query failed.
    #[error("store error: {0}")]
    StoreError(anyhow::Error),

    /// The geocoder's OAuth2 token could not be obtained.
    #[error("geocoder authentication unavailable: {0}")]
    AuthUnavailable(String),

    /// A geocode HTTP call failed transiently (network error, timeout, 5xx)
    /// and retries were exhausted.
    #[error("geocoding request failed after retries: {0}")]
    GeocodeTransient(String),

    /// The geocoder responded, but with no usable match (`Status=U` or a
    /// missing country).
    #[error("geocoder returned no match")]
    GeocodeUnmatched,

    /// The mail dispatcher subprocess failed or timed out.
    #[error("mail dispatch failed: {0}")]
    DispatchError(String),
}

impl TedError {
    /// True if this error should abort the whole process. Only configuration
    /// errors are fatal; everything else degrades gracefully.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TedError::ConfigError(_))
    }
}
