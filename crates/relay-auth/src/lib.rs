//! Outbound credential resolution and refresh-token lifecycle
//!
//! Two concerns live here:
//! - [`source`]: the startup priority chain that decides where the gateway's
//!   outbound credentials come from (multi-key env/file, refresh token
//!   env/file, or per-request client headers)
//! - [`token`]: the refresh-token state machine that keeps a short-lived
//!   access token valid, with single-flight refresh and merge-preserving
//!   persistence

pub mod constants;
pub mod error;
pub mod source;
pub mod token;

pub use error::{Error, Result};
pub use source::{CredentialSource, SourcePaths};
pub use token::{TokenConfig, TokenLifecycle};
