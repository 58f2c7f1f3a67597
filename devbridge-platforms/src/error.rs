use thiserror::Error;

/// Failure to construct a platform client. Runtime call failures are
/// [`devbridge_sync::PlatformError`]s instead.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("environment variable {var} is not set or empty")]
    MissingToken { var: String },

    #[error("invalid API URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}
