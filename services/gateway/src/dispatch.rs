//! Request dispatch: model resolution, credential resolution, the
//! upstream call, and streaming body assembly.
//!
//! The dispatcher is route-agnostic. Handlers resolve a model and a
//! credential through it, send the (already converted) body, and hand
//! the upstream response back to it for streaming reassembly. Pool
//! bookkeeping happens here so every route records outcomes the same
//! way.

use std::sync::Arc;

use axum::body::Body;
use axum::http::HeaderMap;
use bytes::{Bytes, BytesMut};
use dialect::{AnthropicStreamTransformer, BackendFamily, ResponsesStreamTransformer};
use futures_util::StreamExt;
use keypool::KeyPool;
use relay_auth::TokenLifecycle;
use tracing::warn;

use crate::config::{Config, ModelConfig};
use crate::error::GatewayError;
use crate::metrics;

/// Outbound credential mode, fixed at startup from the source chain.
pub enum AuthMode {
    MultiKey(Arc<KeyPool>),
    Refresh(Arc<TokenLifecycle>),
    Client,
}

impl AuthMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MultiKey(_) => "multi-key",
            Self::Refresh(_) => "refresh-token",
            Self::Client => "client-supplied",
        }
    }
}

/// A resolved credential for one request. `pool_secret` is set only in
/// multi-key mode and ties the outcome back to the selected credential.
#[derive(Debug)]
pub struct AuthContext {
    pub header_value: String,
    pub pool_secret: Option<String>,
}

pub struct Dispatcher {
    client: reqwest::Client,
    config: Arc<Config>,
    auth: AuthMode,
}

impl Dispatcher {
    pub fn new(config: Arc<Config>, auth: AuthMode) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            auth,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn auth_mode(&self) -> &AuthMode {
        &self.auth
    }

    pub fn pool(&self) -> Option<&Arc<KeyPool>> {
        match &self.auth {
            AuthMode::MultiKey(pool) => Some(pool),
            _ => None,
        }
    }

    /// Look up the request's model and the URL its family is served on.
    pub fn resolve_model(
        &self,
        body: &serde_json::Value,
    ) -> Result<(&ModelConfig, &str), GatewayError> {
        let model_id = body
            .get("model")
            .and_then(serde_json::Value::as_str)
            .ok_or(GatewayError::MissingModel)?;
        let model = self
            .config
            .model(model_id)
            .ok_or_else(|| GatewayError::ModelNotFound(model_id.to_string()))?;
        let url = self
            .config
            .endpoints
            .url(model.family)
            .ok_or(GatewayError::EndpointNotConfigured(model.family))?;
        Ok((model, url))
    }

    /// Resolve the outbound authorization value. In client-supplied mode
    /// the client's `Authorization` header is forwarded verbatim; direct
    /// routes additionally accept `x-api-key` and wrap it as a bearer.
    pub async fn resolve_auth(
        &self,
        headers: &HeaderMap,
        allow_x_api_key: bool,
    ) -> Result<AuthContext, GatewayError> {
        match &self.auth {
            AuthMode::MultiKey(pool) => {
                let secret = pool.select_credential()?;
                Ok(AuthContext {
                    header_value: format!("Bearer {secret}"),
                    pool_secret: Some(secret),
                })
            }
            AuthMode::Refresh(lifecycle) => {
                let token = lifecycle
                    .ensure_valid()
                    .await
                    .map_err(|error| GatewayError::AuthUnavailable(error.to_string()))?;
                Ok(AuthContext {
                    header_value: format!("Bearer {token}"),
                    pool_secret: None,
                })
            }
            AuthMode::Client => {
                if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
                    return Ok(AuthContext {
                        header_value: value.to_string(),
                        pool_secret: None,
                    });
                }
                if allow_x_api_key {
                    if let Some(value) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
                        return Ok(AuthContext {
                            header_value: format!("Bearer {value}"),
                            pool_secret: None,
                        });
                    }
                }
                Err(GatewayError::NoAuthorization)
            }
        }
    }

    /// POST the body upstream. Transport failures never reach the pool
    /// bookkeeping; only responses do.
    pub async fn send(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, GatewayError> {
        self.client
            .post(url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|error| {
                metrics::record_upstream_error("transport");
                GatewayError::Upstream(error.to_string())
            })
    }

    /// Record a response outcome against the pool. A 402 counts as a
    /// quota failure and may deprecate the credential.
    pub fn record_outcome(&self, auth: &AuthContext, url: &str, status: u16) {
        if let (AuthMode::MultiKey(pool), Some(secret)) = (&self.auth, &auth.pool_secret) {
            let success = (200..300).contains(&status);
            pool.record_result(secret, url, success, Some(status));
            metrics::set_active_credentials(pool.active_count());
        }
    }
}

/// Streaming reassembler for one upstream response, chosen by family.
/// Passthrough streams skip this entirely.
pub enum StreamTransformer {
    Anthropic(AnthropicStreamTransformer),
    Responses(ResponsesStreamTransformer),
}

impl StreamTransformer {
    /// Pick the transformer for a family, or `None` for passthrough.
    pub fn for_family(family: BackendFamily, model: &str, id: &str) -> Option<Self> {
        match family {
            BackendFamily::Anthropic => {
                Some(Self::Anthropic(AnthropicStreamTransformer::new(model, id)))
            }
            BackendFamily::OpenAi => {
                Some(Self::Responses(ResponsesStreamTransformer::new(model, id)))
            }
            BackendFamily::Passthrough => None,
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        match self {
            Self::Anthropic(t) => t.push(chunk),
            Self::Responses(t) => t.push(chunk),
        }
    }

    fn finish(&mut self) -> Vec<Bytes> {
        match self {
            Self::Anthropic(t) => t.finish(),
            Self::Responses(t) => t.finish(),
        }
    }
}

fn concat_frames(mut frames: Vec<Bytes>) -> Bytes {
    if frames.len() == 1 {
        return frames.remove(0);
    }
    let mut out = BytesMut::new();
    for frame in frames {
        out.extend_from_slice(&frame);
    }
    out.freeze()
}

/// Wrap an upstream SSE response in a transforming body. Each upstream
/// chunk yields the frames it completes; the transformer's trailing
/// frames flush when the upstream stream ends. An upstream failure
/// mid-body terminates the client stream after the flush rather than
/// erroring, matching how SSE consumers handle truncation.
pub fn transformed_body(upstream: reqwest::Response, transformer: StreamTransformer) -> Body {
    let stream = futures_util::stream::unfold(
        Some((upstream.bytes_stream(), transformer)),
        |state| async move {
            let (mut upstream, mut transformer) = state?;
            loop {
                match upstream.next().await {
                    Some(Ok(chunk)) => {
                        let frames = transformer.push(&chunk);
                        if frames.is_empty() {
                            continue;
                        }
                        return Some((
                            Ok::<_, std::convert::Infallible>(concat_frames(frames)),
                            Some((upstream, transformer)),
                        ));
                    }
                    Some(Err(error)) => {
                        warn!(%error, "upstream stream failed mid-body");
                        metrics::record_upstream_error("stream");
                        let frames = transformer.finish();
                        if frames.is_empty() {
                            return None;
                        }
                        return Some((Ok(concat_frames(frames)), None));
                    }
                    None => {
                        let frames = transformer.finish();
                        if frames.is_empty() {
                            return None;
                        }
                        return Some((Ok(concat_frames(frames)), None));
                    }
                }
            }
        },
    );
    Body::from_stream(stream)
}

/// Relay an upstream body verbatim, chunk by chunk.
pub fn passthrough_body(upstream: reqwest::Response) -> Body {
    Body::from_stream(
        upstream
            .bytes_stream()
            .map(|result| result.map_err(std::io::Error::other)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use keypool::{Algorithm, AuditLog};
    use serde_json::json;

    fn test_config(anthropic_url: Option<&str>) -> Arc<Config> {
        let endpoints = match anthropic_url {
            Some(url) => format!("[endpoints]\nanthropic = \"{url}\"\n"),
            None => String::new(),
        };
        let toml = format!(
            r#"
[server]
listen_addr = "127.0.0.1:0"

{endpoints}
[[models]]
id = "claude-x"
family = "anthropic"
"#
        );
        Arc::new(toml::from_str(&toml).unwrap())
    }

    fn pool_dispatcher(secrets: &[&str], dir: &std::path::Path) -> Dispatcher {
        let pool = KeyPool::new(
            secrets.iter().map(|s| s.to_string()).collect(),
            Algorithm::Simple,
            true,
            AuditLog::new(dir.join("deprecated_keys.txt")),
        );
        Dispatcher::new(
            test_config(Some("http://unused.invalid")),
            AuthMode::MultiKey(Arc::new(pool)),
        )
    }

    #[test]
    fn resolve_model_requires_a_model_field() {
        let dispatcher = Dispatcher::new(test_config(None), AuthMode::Client);
        let error = dispatcher.resolve_model(&json!({})).unwrap_err();
        assert!(matches!(error, GatewayError::MissingModel));
    }

    #[test]
    fn resolve_model_rejects_unknown_ids() {
        let dispatcher = Dispatcher::new(test_config(None), AuthMode::Client);
        let error = dispatcher
            .resolve_model(&json!({"model": "nope"}))
            .unwrap_err();
        assert!(matches!(error, GatewayError::ModelNotFound(id) if id == "nope"));
    }

    #[test]
    fn resolve_model_requires_a_configured_endpoint() {
        let dispatcher = Dispatcher::new(test_config(None), AuthMode::Client);
        let error = dispatcher
            .resolve_model(&json!({"model": "claude-x"}))
            .unwrap_err();
        assert!(matches!(
            error,
            GatewayError::EndpointNotConfigured(BackendFamily::Anthropic)
        ));
    }

    #[tokio::test]
    async fn multi_key_auth_wraps_the_selected_secret() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = pool_dispatcher(&["key-1"], dir.path());
        let auth = dispatcher.resolve_auth(&HeaderMap::new(), false).await.unwrap();
        assert_eq!(auth.header_value, "Bearer key-1");
        assert_eq!(auth.pool_secret.as_deref(), Some("key-1"));
    }

    #[tokio::test]
    async fn client_mode_forwards_authorization_verbatim() {
        let dispatcher = Dispatcher::new(test_config(None), AuthMode::Client);
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer client-token".parse().unwrap());
        let auth = dispatcher.resolve_auth(&headers, false).await.unwrap();
        assert_eq!(auth.header_value, "Bearer client-token");
        assert!(auth.pool_secret.is_none());
    }

    #[tokio::test]
    async fn x_api_key_fallback_only_when_allowed() {
        let dispatcher = Dispatcher::new(test_config(None), AuthMode::Client);
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "sk-direct".parse().unwrap());

        let auth = dispatcher.resolve_auth(&headers, true).await.unwrap();
        assert_eq!(auth.header_value, "Bearer sk-direct");

        let error = dispatcher.resolve_auth(&headers, false).await.unwrap_err();
        assert!(matches!(error, GatewayError::NoAuthorization));
    }

    #[tokio::test]
    async fn quota_status_deprecates_through_record_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = pool_dispatcher(&["key-1", "key-2"], dir.path());
        let auth = dispatcher.resolve_auth(&HeaderMap::new(), false).await.unwrap();

        dispatcher.record_outcome(&auth, "http://unused.invalid", 402);
        assert_eq!(dispatcher.pool().unwrap().active_count(), 1);
        assert_eq!(dispatcher.pool().unwrap().deprecated_count(), 1);
    }

    #[test]
    fn concat_frames_joins_in_order() {
        let joined = concat_frames(vec![
            Bytes::from_static(b"data: a\n\n"),
            Bytes::from_static(b"data: b\n\n"),
        ]);
        assert_eq!(&joined[..], b"data: a\n\ndata: b\n\n");
    }

    #[test]
    fn passthrough_family_has_no_transformer() {
        assert!(StreamTransformer::for_family(BackendFamily::Passthrough, "m", "id").is_none());
        assert!(StreamTransformer::for_family(BackendFamily::Anthropic, "m", "id").is_some());
    }

    #[test]
    fn pool_dispatcher_audit_path_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = pool_dispatcher(&["key-1"], dir.path());
        let auth = AuthContext {
            header_value: "Bearer key-1".into(),
            pool_secret: Some("key-1".into()),
        };
        dispatcher.record_outcome(&auth, "u", 402);

        let audit = std::fs::read_to_string(dir.path().join("deprecated_keys.txt")).unwrap();
        assert!(audit.starts_with("key-1 # Deprecated at "));
    }
}
