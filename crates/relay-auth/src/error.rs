//! Error types for credential and token operations

/// Errors from token refresh and credential resolution.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no refresh token available")]
    NoRefreshToken,

    /// The identity provider rejected the refresh grant. Never retried
    /// internally; the caller decides how to surface it.
    #[error("token refresh failed with status {status}: {body}")]
    RefreshFailed { status: u16, body: String },

    #[error("token refresh transport error: {0}")]
    Http(String),

    #[error("invalid identity-provider response: {0}")]
    InvalidResponse(String),
}

/// Result alias for credential and token operations.
pub type Result<T> = std::result::Result<T, Error>;
