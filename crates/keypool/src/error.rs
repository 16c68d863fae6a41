//! Error types for pool operations

/// Errors from pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no active credentials available - all credentials have been deprecated")]
    NoActiveCredentials,
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
