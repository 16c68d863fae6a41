//! Refresh-token lifecycle
//!
//! Holds the process-wide token state and keeps the access token valid via
//! lazy TTL-based refresh. All state lives behind one tokio Mutex that is
//! held across the refresh network call: the first caller to observe a
//! stale token performs the refresh, concurrent callers queue on the lock
//! and find fresh state when they acquire it, so exactly one outbound call
//! is made per stale window.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use common::Secret;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::constants::{FALLBACK_CLIENT_ID, REFRESH_ENDPOINT, REFRESH_INTERVAL};
use crate::error::{Error, Result};

/// Response from the identity provider for a refresh grant.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    refresh_token: String,
    user: Option<UserInfo>,
    organization_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    id: Option<String>,
    email: Option<String>,
}

struct TokenState {
    access_token: Option<Secret<String>>,
    refresh_token: Secret<String>,
    last_refresh: Option<Instant>,
}

/// Construction parameters for [`TokenLifecycle`].
pub struct TokenConfig {
    pub refresh_token: String,
    /// Access token seeded from the auth file, if any. The first
    /// `ensure_valid` call still refreshes; the seed only fills the state
    /// until then.
    pub access_token: Option<String>,
    /// Where refreshed tokens are written.
    pub persist_path: PathBuf,
    /// Merge into existing JSON at the persist path instead of overwriting,
    /// preserving unrelated fields.
    pub merge_on_persist: bool,
    /// Client ID issued with the refresh token; the well-known public
    /// fallback is used when absent.
    pub client_id: Option<String>,
}

/// Lazily-refreshing access-token manager.
pub struct TokenLifecycle {
    client: reqwest::Client,
    endpoint: String,
    client_id: String,
    refresh_interval: Duration,
    persist_path: PathBuf,
    merge_on_persist: bool,
    state: tokio::sync::Mutex<TokenState>,
}

impl TokenLifecycle {
    pub fn new(config: TokenConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: REFRESH_ENDPOINT.to_string(),
            client_id: config.client_id.unwrap_or_else(|| FALLBACK_CLIENT_ID.to_string()),
            refresh_interval: REFRESH_INTERVAL,
            persist_path: config.persist_path,
            merge_on_persist: config.merge_on_persist,
            state: tokio::sync::Mutex::new(TokenState {
                access_token: config.access_token.map(Secret::new),
                refresh_token: Secret::new(config.refresh_token),
                last_refresh: None,
            }),
        }
    }

    /// Point the refresh grant at a different endpoint (tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Override the refresh interval (tests).
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Return a valid access token, refreshing first when none has ever
    /// been fetched or the last refresh is older than the interval.
    pub async fn ensure_valid(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        let fresh = state
            .last_refresh
            .is_some_and(|at| at.elapsed() < self.refresh_interval);
        if fresh {
            if let Some(token) = &state.access_token {
                return Ok(token.expose().clone());
            }
        }
        self.refresh_locked(&mut state).await
    }

    /// Force a refresh regardless of token age.
    pub async fn refresh(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await
    }

    async fn refresh_locked(&self, state: &mut TokenState) -> Result<String> {
        if state.refresh_token.expose().is_empty() {
            return Err(Error::NoRefreshToken);
        }

        info!("refreshing access token");
        let response = self
            .client
            .post(&self.endpoint)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", state.refresh_token.expose().as_str()),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Http(format!("refresh request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::RefreshFailed {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("refresh response: {e}")))?;

        if let Some(user) = &parsed.user {
            info!(
                user_id = user.id.as_deref().unwrap_or("unknown"),
                email = user.email.as_deref().unwrap_or("unknown"),
                organization_id = parsed.organization_id.as_deref().unwrap_or("unknown"),
                "authenticated"
            );
        }

        state.access_token = Some(Secret::new(parsed.access_token.clone()));
        state.refresh_token = Secret::new(parsed.refresh_token.clone());
        state.last_refresh = Some(Instant::now());

        // Persistence failures never fail the refresh itself.
        if let Err(error) = self
            .persist(&parsed.access_token, &parsed.refresh_token)
            .await
        {
            warn!(path = %self.persist_path.display(), %error, "failed to persist tokens");
        }

        info!("access token refreshed");
        Ok(parsed.access_token)
    }

    /// Write the new tokens to the persist path, creating parent
    /// directories and, for the per-user auth file, preserving any
    /// unrelated fields already in it.
    async fn persist(&self, access_token: &str, refresh_token: &str) -> std::io::Result<()> {
        if let Some(parent) = self.persist_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut data = if self.merge_on_persist && self.persist_path.exists() {
            match tokio::fs::read_to_string(&self.persist_path).await {
                Ok(contents) => match serde_json::from_str::<Value>(&contents) {
                    Ok(Value::Object(map)) => map,
                    _ => {
                        warn!(
                            path = %self.persist_path.display(),
                            "existing auth file is not a JSON object, overwriting"
                        );
                        serde_json::Map::new()
                    }
                },
                Err(error) => {
                    warn!(
                        path = %self.persist_path.display(),
                        %error,
                        "failed to read existing auth file, overwriting"
                    );
                    serde_json::Map::new()
                }
            }
        } else {
            serde_json::Map::new()
        };

        data.insert("access_token".into(), json!(access_token));
        data.insert("refresh_token".into(), json!(refresh_token));
        data.insert(
            "last_updated".into(),
            json!(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );

        let body = serde_json::to_string_pretty(&Value::Object(data))
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        tokio::fs::write(&self.persist_path, body).await?;
        debug!(path = %self.persist_path.display(), "persisted tokens");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use tempfile::TempDir;

    #[derive(Clone)]
    struct MockIdp {
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    /// Spawn a mock identity provider that counts refresh calls and
    /// returns fixed rotated tokens.
    async fn spawn_idp(delay: Duration) -> (String, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let state = MockIdp {
            calls: calls.clone(),
            delay,
        };
        let app = Router::new()
            .route(
                "/authenticate",
                post(|State(idp): State<MockIdp>| async move {
                    idp.calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(idp.delay).await;
                    Json(serde_json::json!({
                        "access_token": "A2",
                        "refresh_token": "R2",
                        "user": {"id": "user_1", "email": "dev@example.com"},
                        "organization_id": "org_1"
                    }))
                }),
            )
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/authenticate"), calls)
    }

    fn lifecycle(endpoint: &str, dir: &TempDir) -> TokenLifecycle {
        TokenLifecycle::new(TokenConfig {
            refresh_token: "R1".into(),
            access_token: None,
            persist_path: dir.path().join("auth.json"),
            merge_on_persist: false,
            client_id: None,
        })
        .with_endpoint(endpoint)
    }

    #[tokio::test]
    async fn ensure_valid_refreshes_once_then_reuses_token() {
        let dir = tempfile::tempdir().unwrap();
        let (endpoint, calls) = spawn_idp(Duration::ZERO).await;
        let lifecycle = lifecycle(&endpoint, &dir);

        assert_eq!(lifecycle.ensure_valid().await.unwrap(), "A2");
        assert_eq!(lifecycle.ensure_valid().await.unwrap(), "A2");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn elapsed_interval_triggers_exactly_one_more_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let (endpoint, calls) = spawn_idp(Duration::ZERO).await;
        let lifecycle = lifecycle(&endpoint, &dir).with_refresh_interval(Duration::from_millis(50));

        lifecycle.ensure_valid().await.unwrap();
        lifecycle.ensure_valid().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        lifecycle.ensure_valid().await.unwrap();
        lifecycle.ensure_valid().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let (endpoint, calls) = spawn_idp(Duration::from_millis(50)).await;
        let lifecycle = Arc::new(lifecycle(&endpoint, &dir));

        let mut handles = vec![];
        for _ in 0..10 {
            let lifecycle = lifecycle.clone();
            handles.push(tokio::spawn(
                async move { lifecycle.ensure_valid().await },
            ));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "A2");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_rotates_the_stored_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let (endpoint, _calls) = spawn_idp(Duration::ZERO).await;
        let lifecycle = lifecycle(&endpoint, &dir);

        lifecycle.ensure_valid().await.unwrap();

        let persisted: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("auth.json")).unwrap())
                .unwrap();
        assert_eq!(persisted["access_token"], "A2");
        assert_eq!(persisted["refresh_token"], "R2");
        assert!(persisted["last_updated"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn empty_refresh_token_fails_without_network_call() {
        let dir = tempfile::tempdir().unwrap();
        let (endpoint, calls) = spawn_idp(Duration::ZERO).await;
        let lifecycle = TokenLifecycle::new(TokenConfig {
            refresh_token: String::new(),
            access_token: None,
            persist_path: dir.path().join("auth.json"),
            merge_on_persist: false,
            client_id: None,
        })
        .with_endpoint(&endpoint);

        assert!(matches!(
            lifecycle.ensure_valid().await,
            Err(Error::NoRefreshToken)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provider_rejection_surfaces_status_and_body() {
        let app = Router::new().route(
            "/authenticate",
            post(|| async {
                (
                    axum::http::StatusCode::UNAUTHORIZED,
                    "invalid refresh token",
                )
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let lifecycle = lifecycle(&format!("http://{addr}/authenticate"), &dir);

        match lifecycle.ensure_valid().await {
            Err(Error::RefreshFailed { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "invalid refresh token");
            }
            other => panic!("expected RefreshFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn merge_persistence_preserves_unrelated_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(
            &path,
            r#"{"refresh_token":"R1","custom_field":"kept","email":"dev@example.com"}"#,
        )
        .unwrap();

        let (endpoint, _calls) = spawn_idp(Duration::ZERO).await;
        let lifecycle = TokenLifecycle::new(TokenConfig {
            refresh_token: "R1".into(),
            access_token: None,
            persist_path: path.clone(),
            merge_on_persist: true,
            client_id: None,
        })
        .with_endpoint(&endpoint);

        lifecycle.ensure_valid().await.unwrap();

        let persisted: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(persisted["custom_field"], "kept");
        assert_eq!(persisted["email"], "dev@example.com");
        assert_eq!(persisted["access_token"], "A2");
        assert_eq!(persisted["refresh_token"], "R2");
    }

    #[tokio::test]
    async fn persistence_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/auth.json");

        let (endpoint, _calls) = spawn_idp(Duration::ZERO).await;
        let lifecycle = TokenLifecycle::new(TokenConfig {
            refresh_token: "R1".into(),
            access_token: None,
            persist_path: path.clone(),
            merge_on_persist: false,
            client_id: None,
        })
        .with_endpoint(&endpoint);

        lifecycle.ensure_valid().await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn seeded_access_token_does_not_skip_the_first_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let (endpoint, calls) = spawn_idp(Duration::ZERO).await;
        let lifecycle = TokenLifecycle::new(TokenConfig {
            refresh_token: "R1".into(),
            access_token: Some("A-seed".into()),
            persist_path: dir.path().join("auth.json"),
            merge_on_persist: false,
            client_id: None,
        })
        .with_endpoint(&endpoint);

        // No refresh has ever succeeded, so the seed alone is not trusted.
        assert_eq!(lifecycle.ensure_valid().await.unwrap(), "A2");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
