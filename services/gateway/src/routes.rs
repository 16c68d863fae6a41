//! HTTP routes
//!
//! Three forwarding routes plus introspection. `/v1/chat/completions`
//! aggregates every configured model behind the chat-completions
//! protocol, converting requests and responses per backend family. The
//! direct routes (`/v1/responses`, `/v1/messages`) forward a single
//! family's native protocol with config-driven edits only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dialect::headers::backend_headers;
use dialect::{convert_response_to_chat_completion, to_backend, BackendFamily};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use tower::limit::ConcurrencyLimitLayer;
use tracing::{debug, info, warn};

use crate::dispatch::{passthrough_body, transformed_body, Dispatcher, StreamTransformer};
use crate::error::GatewayError;
use crate::metrics;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
    pub counters: Arc<RequestCounters>,
}

/// Cheap request/error totals for the health endpoint. Prometheus keeps
/// the real series; these survive without a scrape pipeline.
#[derive(Default)]
pub struct RequestCounters {
    pub requests: AtomicU64,
    pub errors: AtomicU64,
}

impl RequestCounters {
    fn record(&self, status: u16) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if status >= 400 {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/responses", post(direct_responses))
        .route("/v1/messages", post(direct_messages))
        .route("/v1/models", get(list_models))
        .route("/status", get(service_status))
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .layer(ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let start = Instant::now();
    let response = handle_chat(&state, &headers, body)
        .await
        .unwrap_or_else(IntoResponse::into_response);
    state.counters.record(response.status().as_u16());
    metrics::record_request(
        "/v1/chat/completions",
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

async fn direct_responses(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let start = Instant::now();
    let response = handle_direct(&state, &headers, body, BackendFamily::OpenAi)
        .await
        .unwrap_or_else(IntoResponse::into_response);
    state.counters.record(response.status().as_u16());
    metrics::record_request(
        "/v1/responses",
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

async fn direct_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let start = Instant::now();
    let response = handle_direct(&state, &headers, body, BackendFamily::Anthropic)
        .await
        .unwrap_or_else(IntoResponse::into_response);
    state.counters.record(response.status().as_u16());
    metrics::record_request(
        "/v1/messages",
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

/// The aggregating route: chat completions in, any family out.
async fn handle_chat(
    state: &AppState,
    headers: &HeaderMap,
    body: Value,
) -> Result<Response, GatewayError> {
    let dispatcher = &state.dispatcher;
    let (model, url) = dispatcher.resolve_model(&body)?;
    let family = model.family;
    let model_id = model.id.clone();
    let url = url.to_string();

    let (converted, streaming) = to_backend(family, &body);
    let auth = dispatcher.resolve_auth(headers, false).await?;
    let out_headers = backend_headers(family, &auth.header_value, headers, streaming);

    debug!(model = %model_id, %family, streaming, "forwarding chat completion");
    let upstream = dispatcher.send(&url, out_headers, &converted).await?;
    let status = upstream.status().as_u16();
    dispatcher.record_outcome(&auth, &url, status);

    if !(200..300).contains(&status) {
        warn!(%status, model = %model_id, "backend rejected request");
        return Ok(relay_upstream(upstream).await);
    }

    if streaming {
        let id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
        let body = match StreamTransformer::for_family(family, &model_id, &id) {
            Some(transformer) => transformed_body(upstream, transformer),
            None => passthrough_body(upstream),
        };
        return Ok(sse_response(body));
    }

    let payload = upstream
        .bytes()
        .await
        .map_err(|error| GatewayError::Upstream(error.to_string()))?;
    let out = match family {
        BackendFamily::OpenAi => match serde_json::from_slice::<Value>(&payload) {
            Ok(resp) => match convert_response_to_chat_completion(&resp) {
                Ok(chat) => chat.to_string().into_bytes(),
                Err(error) => {
                    warn!(%error, "response conversion failed, relaying raw payload");
                    payload.to_vec()
                }
            },
            Err(_) => payload.to_vec(),
        },
        // Messages and passthrough payloads are relayed as-is.
        _ => payload.to_vec(),
    };
    Ok(json_response(StatusCode::OK, out))
}

/// A direct route: one family's native protocol, forwarded with the
/// configured system prompt and reasoning directive applied.
async fn handle_direct(
    state: &AppState,
    headers: &HeaderMap,
    mut body: Value,
    expected: BackendFamily,
) -> Result<Response, GatewayError> {
    let dispatcher = &state.dispatcher;
    let (model, url) = dispatcher.resolve_model(&body)?;
    if model.family != expected {
        return Err(GatewayError::WrongRoute {
            model: model.id.clone(),
            expected,
        });
    }
    let reasoning = model.reasoning;
    let url = url.to_string();
    let streaming = body["stream"].as_bool().unwrap_or(false);

    if let Some(prompt) = &dispatcher.config().server.system_prompt {
        match expected {
            BackendFamily::OpenAi => dialect::direct::inject_instructions(&mut body, prompt),
            BackendFamily::Anthropic => dialect::direct::inject_system_prompt(&mut body, prompt),
            BackendFamily::Passthrough => {}
        }
    }
    match expected {
        BackendFamily::OpenAi => dialect::direct::apply_reasoning_effort(&mut body, reasoning),
        BackendFamily::Anthropic => dialect::direct::apply_thinking_budget(&mut body, reasoning),
        BackendFamily::Passthrough => {}
    }

    let auth = dispatcher.resolve_auth(headers, true).await?;
    let out_headers = backend_headers(expected, &auth.header_value, headers, streaming);

    let upstream = dispatcher.send(&url, out_headers, &body).await?;
    let status = upstream.status().as_u16();
    dispatcher.record_outcome(&auth, &url, status);

    if streaming && (200..300).contains(&status) {
        return Ok(sse_response(passthrough_body(upstream)));
    }
    Ok(relay_upstream(upstream).await)
}

/// Relay an upstream response verbatim: status, content type, body.
async fn relay_upstream(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let content_type = upstream.headers().get(CONTENT_TYPE).cloned();
    let payload = upstream.bytes().await.unwrap_or_default();

    let mut response = Response::new(Body::from(payload));
    *response.status_mut() = status;
    if let Some(content_type) = content_type {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}

fn sse_response(body: Body) -> Response {
    let mut response = Response::new(body);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

fn json_response(status: StatusCode, payload: Vec<u8>) -> Response {
    let mut response = Response::new(Body::from(payload));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

async fn list_models(State(state): State<AppState>) -> Json<Value> {
    let created = chrono::Utc::now().timestamp();
    let data: Vec<Value> = state
        .dispatcher
        .config()
        .models
        .iter()
        .map(|model| {
            json!({
                "id": model.id,
                "object": "model",
                "created": created,
                "owned_by": model.family.to_string(),
            })
        })
        .collect();
    Json(json!({"object": "list", "data": data}))
}

async fn service_status(State(state): State<AppState>) -> Json<Value> {
    let mut body = json!({
        "service": "relay-gateway",
        "auth_mode": state.dispatcher.auth_mode().name(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    });
    if let Some(pool) = state.dispatcher.pool() {
        match serde_json::to_value(pool.stats()) {
            Ok(stats) => body["pool"] = stats,
            Err(error) => warn!(%error, "failed to serialize pool statistics"),
        }
    }
    Json(body)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let mut body = json!({
        "status": "healthy",
        "service": "relay-gateway",
        "auth_mode": state.dispatcher.auth_mode().name(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "requests_total": state.counters.requests.load(Ordering::Relaxed),
        "errors_total": state.counters.errors.load(Ordering::Relaxed),
    });
    if let Some(pool) = state.dispatcher.pool() {
        body["credentials"] = json!({
            "active": pool.active_count(),
            "deprecated": pool.deprecated_count(),
        });
    }
    Json(body)
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    let mut response = Response::new(Body::from(state.prometheus.render()));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}

/// Log the routing table once at startup.
pub fn log_routes(config: &crate::config::Config) {
    for model in &config.models {
        info!(
            model = %model.id,
            family = %model.family,
            configured = config.endpoints.url(model.family).is_some(),
            "registered model"
        );
    }
}
