//! Loopback HTTP API for the local agent.
//!
//! This module contains the axum router, guard middleware, and endpoint
//! handlers the agent uses to send messages, reply into threads, add
//! reactions, and inspect health and recent logs. The listener is bound to
//! 127.0.0.1 by the caller; the guard middleware additionally rejects any
//! connection whose peer address is not loopback.

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::{
    error::BridgeError,
    health::HealthRecorder,
    logbuf::LogBuffer,
    outbound::OutboundClient,
};

const DEFAULT_LOG_TAIL: usize = 100;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct LocalApiState {
    outbound: OutboundClient,
    health: Arc<HealthRecorder>,
    logs: LogBuffer,
    rate: Arc<ApiRateGate>,
}

/// Fixed-window request gate over the whole local API surface.
pub struct ApiRateGate {
    window: Duration,
    max: u32,
    state: Mutex<(Instant, u32)>,
}

impl ApiRateGate {
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            window: Duration::from_secs(60),
            max: max_per_minute,
            state: Mutex::new((Instant::now(), 0)),
        }
    }

    pub fn admit(&self) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        if now.duration_since(state.0) >= self.window {
            *state = (now, 0);
        }
        if state.1 >= self.max {
            return false;
        }
        state.1 += 1;
        true
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn local_api_router(
    outbound: OutboundClient,
    health: Arc<HealthRecorder>,
    logs: LogBuffer,
    rate_max_per_minute: u32,
) -> axum::Router {
    use axum::{middleware, routing, Router};

    let state = LocalApiState {
        outbound,
        health,
        logs,
        rate: Arc::new(ApiRateGate::new(rate_max_per_minute)),
    };

    Router::new()
        .route("/api/send", routing::post(api_send))
        .route("/api/reply", routing::post(api_reply))
        .route("/api/react", routing::post(api_react))
        .route("/api/health", routing::get(api_health))
        .route("/api/logs", routing::get(api_logs))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(state, guard_middleware))
}

fn error_envelope(code: &str, message: &str) -> Value {
    json!({ "error": { "code": code, "message": message } })
}

/// Reject non-loopback peers and apply the request gate before any handler
/// runs.
async fn guard_middleware(
    axum::extract::State(state): axum::extract::State<LocalApiState>,
    axum::extract::ConnectInfo(peer): axum::extract::ConnectInfo<SocketAddr>,
    request: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<axum::response::Response, (axum::http::StatusCode, axum::Json<Value>)> {
    if !peer.ip().is_loopback() {
        tracing::warn!(%peer, "rejected non-loopback local API connection");
        return Err((
            axum::http::StatusCode::FORBIDDEN,
            axum::Json(error_envelope("forbidden", "local API is loopback-only")),
        ));
    }
    if !state.rate.admit() {
        return Err((
            axum::http::StatusCode::TOO_MANY_REQUESTS,
            axum::Json(error_envelope("rate_limited", "local API rate limit exceeded")),
        ));
    }
    Ok(next.run(request).await)
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

async fn api_send(
    axum::extract::State(state): axum::extract::State<LocalApiState>,
    axum::Json(body): axum::Json<Value>,
) -> (axum::http::StatusCode, axum::Json<Value>) {
    let channel = body
        .get("channel")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let text = body
        .get("text")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let thread_ts = body
        .get("thread_ts")
        .and_then(Value::as_str)
        .map(String::from);

    if channel.is_empty() || text.is_empty() {
        return (
            axum::http::StatusCode::BAD_REQUEST,
            axum::Json(error_envelope(
                "bad_request",
                "Missing required fields: channel, text",
            )),
        );
    }

    match state
        .outbound
        .post_message(&channel, thread_ts.as_deref(), &text)
        .await
    {
        Ok(ts) => (
            axum::http::StatusCode::OK,
            axum::Json(json!({ "ok": true, "ts": ts })),
        ),
        Err(error) => delivery_error(error),
    }
}

async fn api_reply(
    axum::extract::State(state): axum::extract::State<LocalApiState>,
    axum::Json(body): axum::Json<Value>,
) -> (axum::http::StatusCode, axum::Json<Value>) {
    let thread_id = body
        .get("thread_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let text = body
        .get("text")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if thread_id.is_empty() || text.is_empty() {
        return (
            axum::http::StatusCode::BAD_REQUEST,
            axum::Json(error_envelope(
                "bad_request",
                "Missing required fields: thread_id, text",
            )),
        );
    }

    match state.outbound.reply(&thread_id, &text).await {
        Ok(ts) => (
            axum::http::StatusCode::OK,
            axum::Json(json!({ "ok": true, "ts": ts })),
        ),
        Err(error) => delivery_error(error),
    }
}

async fn api_react(
    axum::extract::State(state): axum::extract::State<LocalApiState>,
    axum::Json(body): axum::Json<Value>,
) -> (axum::http::StatusCode, axum::Json<Value>) {
    let channel = body
        .get("channel")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let ts = body
        .get("ts")
        .or_else(|| body.get("timestamp"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let name = body
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    if channel.is_empty() || ts.is_empty() || name.is_empty() {
        return (
            axum::http::StatusCode::BAD_REQUEST,
            axum::Json(error_envelope(
                "bad_request",
                "Missing required fields: channel, ts, name",
            )),
        );
    }

    match state.outbound.add_reaction(&channel, &ts, &name).await {
        Ok(()) => (
            axum::http::StatusCode::OK,
            axum::Json(json!({ "ok": true })),
        ),
        Err(error) => delivery_error(error),
    }
}

async fn api_health(
    axum::extract::State(state): axum::extract::State<LocalApiState>,
) -> axum::Json<Value> {
    let snapshot = state.health.snapshot();
    axum::Json(json!({
        "service": "agent-relay-bridge",
        "version": env!("CARGO_PKG_VERSION"),
        "stages": snapshot,
    }))
}

#[derive(Debug, Default, serde::Deserialize)]
struct LogsQuery {
    n: Option<usize>,
    filter: Option<String>,
}

async fn api_logs(
    axum::extract::State(state): axum::extract::State<LocalApiState>,
    axum::extract::Query(query): axum::extract::Query<LogsQuery>,
) -> axum::Json<Value> {
    let n = query.n.unwrap_or(DEFAULT_LOG_TAIL);
    let lines = state.logs.tail(n, query.filter.as_deref());
    axum::Json(json!({ "lines": lines }))
}

fn delivery_error(error: BridgeError) -> (axum::http::StatusCode, axum::Json<Value>) {
    let status = match &error {
        BridgeError::UnknownThread(_) => axum::http::StatusCode::NOT_FOUND,
        _ => axum::http::StatusCode::BAD_GATEWAY,
    };
    let code = match &error {
        BridgeError::UnknownThread(_) => "unknown_thread",
        _ => "delivery_failed",
    };
    (status, axum::Json(error_envelope(code, &error.to_string())))
}
