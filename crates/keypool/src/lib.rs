//! Health-aware credential pool for outbound API keys
//!
//! Manages a fixed set of backend secrets with per-credential success/fail
//! history, round-robin or health-weighted selection, and one-way
//! deprecation on quota-exceeded (402) responses. Deprecated secrets are
//! appended to a durable audit file so operators can recover them.
//!
//! Credential lifecycle:
//! 1. Pool constructed once at startup from the resolved key list
//! 2. Each request selects a credential (`select_credential`)
//! 3. The outcome is recorded against it (`record_result`)
//! 4. A 402 response deprecates the credential permanently when
//!    remove-on-quota is enabled
//! 5. Selection fails with `NoActiveCredentials` once every credential is
//!    deprecated

pub mod audit;
pub mod error;
pub mod pool;
pub mod stats;

pub use audit::AuditLog;
pub use error::{Error, Result};
pub use pool::{Algorithm, KeyPool, QUOTA_EXCEEDED_STATUS};
pub use stats::{mask_secret, PoolStats};
