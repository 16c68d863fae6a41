//! Credential selection and health accounting
//!
//! All shared state lives behind one `std::sync::Mutex`. The lock is held
//! only across in-memory reads and updates; the audit write that follows a
//! deprecation happens after the lock is released.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde::Deserialize;

use crate::audit::AuditLog;
use crate::error::{Error, Result};
use crate::stats::{
    format_rate, mask_secret, CredentialStats, DeprecatedStats, EndpointStats, PoolStats,
};

/// Upstream status that permanently deprecates the credential that sent it.
pub const QUOTA_EXCEEDED_STATUS: u16 = 402;

/// Weight added to every scored credential so imperfect keys keep a
/// non-zero chance of selection.
const WEIGHT_FLOOR: f64 = 0.1;

/// Credential selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Success-rate-weighted random selection. Untried credentials get
    /// full weight so they are exercised early.
    Weighted,
    /// Plain round-robin over the active credentials.
    Simple,
}

impl Default for Algorithm {
    fn default() -> Self {
        Self::Weighted
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Weighted => write!(f, "weighted"),
            Self::Simple => write!(f, "simple"),
        }
    }
}

struct CredentialState {
    secret: String,
    success: u64,
    fail: u64,
    deprecated: bool,
}

impl CredentialState {
    fn weight(&self) -> f64 {
        let total = self.success + self.fail;
        if total == 0 {
            1.0
        } else {
            self.success as f64 / total as f64 + WEIGHT_FLOOR
        }
    }
}

#[derive(Default)]
struct EndpointCounters {
    success: u64,
    fail: u64,
}

struct DeprecatedRecord {
    secret: String,
    success: u64,
    fail: u64,
    deprecated_at: String,
}

#[derive(Default)]
struct PoolInner {
    credentials: Vec<CredentialState>,
    cursor: usize,
    endpoints: HashMap<String, EndpointCounters>,
    deprecated: Vec<DeprecatedRecord>,
}

/// Pool of backend credentials with health-aware selection.
pub struct KeyPool {
    inner: Mutex<PoolInner>,
    algorithm: Algorithm,
    remove_on_quota: bool,
    audit: AuditLog,
}

impl KeyPool {
    pub fn new(
        secrets: Vec<String>,
        algorithm: Algorithm,
        remove_on_quota: bool,
        audit: AuditLog,
    ) -> Self {
        let credentials = secrets
            .into_iter()
            .map(|secret| CredentialState {
                secret,
                success: 0,
                fail: 0,
                deprecated: false,
            })
            .collect();
        Self {
            inner: Mutex::new(PoolInner {
                credentials,
                ..PoolInner::default()
            }),
            algorithm,
            remove_on_quota,
            audit,
        }
    }

    /// Pick a credential for the next outbound request.
    ///
    /// Fails with [`Error::NoActiveCredentials`] once every credential has
    /// been deprecated.
    pub fn select_credential(&self) -> Result<String> {
        let mut inner = self.inner.lock().expect("pool lock poisoned");
        let active: Vec<usize> = inner
            .credentials
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.deprecated)
            .map(|(i, _)| i)
            .collect();

        if active.is_empty() {
            return Err(Error::NoActiveCredentials);
        }
        if active.len() == 1 {
            return Ok(inner.credentials[active[0]].secret.clone());
        }

        let chosen = match self.algorithm {
            Algorithm::Simple => {
                // The cursor wraps modulo the current active count, so the
                // rotation phase shifts when a credential is deprecated.
                let idx = active[inner.cursor % active.len()];
                inner.cursor = (inner.cursor + 1) % active.len();
                idx
            }
            Algorithm::Weighted => {
                let weights: Vec<f64> = active
                    .iter()
                    .map(|&i| inner.credentials[i].weight())
                    .collect();
                let total: f64 = weights.iter().sum();
                let mut draw = rand::thread_rng().gen_range(0.0..total);
                let mut chosen = *active.last().expect("active is non-empty");
                for (&idx, &weight) in active.iter().zip(&weights) {
                    if draw < weight {
                        chosen = idx;
                        break;
                    }
                    draw -= weight;
                }
                chosen
            }
        };
        Ok(inner.credentials[chosen].secret.clone())
    }

    /// Record the outcome of a request made with `secret` against `endpoint`.
    ///
    /// A quota-exceeded status deprecates the credential when the pool was
    /// configured to remove on quota.
    pub fn record_result(&self, secret: &str, endpoint: &str, success: bool, status: Option<u16>) {
        let audit_entry = {
            let mut inner = self.inner.lock().expect("pool lock poisoned");

            let counters = inner.endpoints.entry(endpoint.to_string()).or_default();
            if success {
                counters.success += 1;
            } else {
                counters.fail += 1;
            }

            let Some(idx) = inner
                .credentials
                .iter()
                .position(|c| c.secret == secret && !c.deprecated)
            else {
                return;
            };
            if success {
                inner.credentials[idx].success += 1;
                None
            } else {
                inner.credentials[idx].fail += 1;
                if status == Some(QUOTA_EXCEEDED_STATUS) && self.remove_on_quota {
                    Some(Self::deprecate_locked(&mut inner, idx))
                } else {
                    None
                }
            }
        };
        if let Some(entry) = audit_entry {
            self.finish_deprecation(entry);
        }
    }

    /// Permanently deprecate a credential. Idempotent: a second call for the
    /// same secret does nothing.
    pub fn deprecate(&self, secret: &str) {
        let audit_entry = {
            let mut inner = self.inner.lock().expect("pool lock poisoned");
            inner
                .credentials
                .iter()
                .position(|c| c.secret == secret && !c.deprecated)
                .map(|idx| Self::deprecate_locked(&mut inner, idx))
        };
        if let Some(entry) = audit_entry {
            self.finish_deprecation(entry);
        }
    }

    fn deprecate_locked(inner: &mut PoolInner, idx: usize) -> (String, String, usize) {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let cred = &mut inner.credentials[idx];
        cred.deprecated = true;
        let secret = cred.secret.clone();
        inner.deprecated.push(DeprecatedRecord {
            secret: secret.clone(),
            success: cred.success,
            fail: cred.fail,
            deprecated_at: timestamp.clone(),
        });
        let remaining = inner.credentials.iter().filter(|c| !c.deprecated).count();
        (secret, timestamp, remaining)
    }

    fn finish_deprecation(&self, (secret, timestamp, remaining): (String, String, usize)) {
        tracing::warn!(
            credential = %mask_secret(&secret),
            remaining,
            "credential deprecated"
        );
        if remaining == 0 {
            tracing::error!("all credentials deprecated, pool is exhausted");
        }
        if let Err(error) = self.audit.append(&secret, &timestamp) {
            tracing::warn!(
                path = %self.audit.path().display(),
                %error,
                "failed to append deprecation audit record"
            );
        }
    }

    pub fn active_count(&self) -> usize {
        let inner = self.inner.lock().expect("pool lock poisoned");
        inner.credentials.iter().filter(|c| !c.deprecated).count()
    }

    pub fn deprecated_count(&self) -> usize {
        let inner = self.inner.lock().expect("pool lock poisoned");
        inner.deprecated.len()
    }

    /// Masked snapshot for the status endpoint.
    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().expect("pool lock poisoned");
        let active = inner
            .credentials
            .iter()
            .filter(|c| !c.deprecated)
            .map(|c| CredentialStats {
                key: mask_secret(&c.secret),
                success: c.success,
                fail: c.fail,
                total: c.success + c.fail,
                success_rate: format_rate(c.success, c.fail),
            })
            .collect();
        let deprecated = inner
            .deprecated
            .iter()
            .map(|d| DeprecatedStats {
                key: mask_secret(&d.secret),
                success: d.success,
                fail: d.fail,
                total: d.success + d.fail,
                success_rate: format_rate(d.success, d.fail),
                deprecated_at: d.deprecated_at.clone(),
            })
            .collect();
        let mut endpoints: Vec<EndpointStats> = inner
            .endpoints
            .iter()
            .map(|(endpoint, counters)| EndpointStats {
                endpoint: endpoint.clone(),
                success: counters.success,
                fail: counters.fail,
                total: counters.success + counters.fail,
                success_rate: format_rate(counters.success, counters.fail),
            })
            .collect();
        endpoints.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        PoolStats {
            algorithm: self.algorithm.to_string(),
            remove_on_quota: self.remove_on_quota,
            active,
            deprecated,
            endpoints,
        }
    }
}
