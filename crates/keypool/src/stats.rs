//! Masked pool statistics snapshots
//!
//! Everything here is safe to serialize into an operator-facing status
//! endpoint: secrets are masked and rates are pre-formatted strings.

use serde::Serialize;

/// Mask a secret for display.
///
/// Secrets longer than 12 characters keep their first and last six
/// characters around a fixed six-asterisk filler. Secrets of 12
/// characters or fewer are too short to mask meaningfully and come back
/// unchanged.
pub fn mask_secret(secret: &str) -> String {
    if secret.len() > 12 {
        let head = &secret[..6];
        let tail = &secret[secret.len() - 6..];
        format!("{head}******{tail}")
    } else {
        secret.to_string()
    }
}

/// Format a success rate as a percentage string, or "N/A" with no history.
pub(crate) fn format_rate(success: u64, fail: u64) -> String {
    let total = success + fail;
    if total == 0 {
        "N/A".to_string()
    } else {
        format!("{:.2}%", success as f64 / total as f64 * 100.0)
    }
}

/// Per-credential counters for an active credential.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStats {
    pub key: String,
    pub success: u64,
    pub fail: u64,
    pub total: u64,
    pub success_rate: String,
}

/// Counters for a deprecated credential, frozen at deprecation time.
#[derive(Debug, Clone, Serialize)]
pub struct DeprecatedStats {
    pub key: String,
    pub success: u64,
    pub fail: u64,
    pub total: u64,
    pub success_rate: String,
    pub deprecated_at: String,
}

/// Aggregated counters for one upstream endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStats {
    pub endpoint: String,
    pub success: u64,
    pub fail: u64,
    pub total: u64,
    pub success_rate: String,
}

/// Full masked snapshot of the pool, suitable for a status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub algorithm: String,
    pub remove_on_quota: bool,
    pub active: Vec<CredentialStats>,
    pub deprecated: Vec<DeprecatedStats>,
    pub endpoints: Vec<EndpointStats>,
}
