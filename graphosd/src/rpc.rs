use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use subtle::ConstantTimeEq;

use graphos_actions::{RunnerSupervisor, SupervisorStats};
use graphos_core::rpc::{JSON_RPC_GENERIC_SERVER_ERROR, JsonRpcResponse};
use graphos_mcp::{McpMethod, SessionServer};

pub const SESSION_HEADER: &str = "mcp-session-id";
pub const AUTH_HEADER: &str = "x-graphos-auth";

/// Shared state for the HTTP transport.
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<SessionServer>,
    pub supervisor: Arc<RunnerSupervisor>,
    pub start_time: Instant,
    pub instance_id: String,
    pub rpc_secret: Option<String>,
}

pub fn rpc_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/jsonrpc", post(jsonrpc).delete(close_session))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    instance_id: String,
    uptime_secs: u64,
    sessions: usize,
    runners: SupervisorStats,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let runners = state.supervisor.stats();
    Json(HealthResponse {
        status: if runners.degraded { "degraded" } else { "ok" },
        version: env!("CARGO_PKG_VERSION"),
        instance_id: state.instance_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        sessions: state.server.session_count().await,
        runners,
    })
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(secret) = state.rpc_secret.as_deref() else {
        return true;
    };
    headers
        .get(AUTH_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| bool::from(token.as_bytes().ct_eq(secret.as_bytes())))
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn is_initialize(body: &str) -> bool {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("method").and_then(Value::as_str).map(str::to_string))
        .is_some_and(|method| method == McpMethod::Initialize.as_str())
}

fn rpc_failure(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(JsonRpcResponse::error(None, JSON_RPC_GENERIC_SERVER_ERROR, message)),
    )
        .into_response()
}

/// One JSON-RPC frame per POST. Without a session header only `initialize`
/// is accepted; it opens a session and returns its id in the response header.
async fn jsonrpc(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    if !authorized(&state, &headers) {
        tracing::warn!("rpc_unauthorized");
        return rpc_failure(StatusCode::UNAUTHORIZED, "unauthorized");
    }

    let (session_id, opened) = match session_id(&headers) {
        Some(id) => (id, false),
        None if is_initialize(&body) => (state.server.start_new().await, true),
        None => {
            return rpc_failure(StatusCode::BAD_REQUEST, "missing Mcp-Session-Id header");
        }
    };

    let Some(response) = state.server.handle_raw(&session_id, &body).await else {
        return StatusCode::ACCEPTED.into_response();
    };

    if opened && response.error.is_some() {
        state.server.stop(&session_id).await;
        return Json(response).into_response();
    }

    let mut http_response = Json(response).into_response();
    if opened {
        match HeaderValue::from_str(&session_id) {
            Ok(value) => {
                http_response.headers_mut().insert(SESSION_HEADER, value);
            }
            Err(err) => {
                tracing::error!(session_id = %session_id, error = %err, "session_header_invalid");
            }
        }
    }
    http_response
}

async fn close_session(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED;
    }
    let Some(session_id) = session_id(&headers) else {
        return StatusCode::BAD_REQUEST;
    };
    if state.server.stop(&session_id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::GraphosRuntime;
    use graphos_core::config::GraphosConfig;

    async fn test_state(secret: Option<&str>) -> AppState {
        let config: GraphosConfig = toml::from_str(
            r#"
[global]
instance_id = "graphos-test"

[[grants]]
actor = "c1"
scopes = ["graph:query"]
"#,
        )
        .expect("config should parse");
        let runtime = GraphosRuntime::build(&config).await.expect("runtime");
        AppState {
            server: runtime.server,
            supervisor: runtime.supervisor,
            start_time: Instant::now(),
            instance_id: config.global.instance_id,
            rpc_secret: secret.map(str::to_string),
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    const INITIALIZE: &str = r#"{"jsonrpc":"2.0","method":"initialize","params":{"protocolVersion":"2025-03-26","clientInfo":{"name":"c1","version":"1"}},"id":1}"#;

    async fn open_session(state: &AppState) -> String {
        let response = jsonrpc(State(state.clone()), HeaderMap::new(), INITIALIZE.into()).await;
        assert_eq!(response.status(), StatusCode::OK);
        response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .expect("session header")
            .to_string()
    }

    fn with_session(session_id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, HeaderValue::from_str(session_id).expect("header"));
        headers
    }

    #[tokio::test]
    async fn health_reports_sessions_and_runners() {
        let state = test_state(None).await;
        open_session(&state).await;
        let Json(health) = health(State(state)).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.sessions, 1);
        assert_eq!(health.runners.running, 0);
    }

    #[tokio::test]
    async fn initialize_opens_session_and_call_uses_it() {
        let state = test_state(None).await;
        let session_id = open_session(&state).await;

        let response = jsonrpc(
            State(state.clone()),
            with_session(&session_id),
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#.into(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = jsonrpc(
            State(state),
            with_session(&session_id),
            r#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"graph.query","arguments":{"node_properties":{"name":"none"}}},"id":2}"#.into(),
        )
        .await;
        let body = body_json(response).await;
        assert_eq!(body["result"]["count"], 0);
    }

    #[tokio::test]
    async fn request_without_session_is_rejected() {
        let state = test_state(None).await;
        let response = jsonrpc(
            State(state.clone()),
            HeaderMap::new(),
            r#"{"jsonrpc":"2.0","method":"tools/list","id":1}"#.into(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.server.session_count().await, 0);
    }

    #[tokio::test]
    async fn failed_initialize_does_not_leak_session() {
        let state = test_state(None).await;
        let response = jsonrpc(
            State(state.clone()),
            HeaderMap::new(),
            r#"{"jsonrpc":"2.0","method":"initialize","params":"bogus","id":1}"#.into(),
        )
        .await;
        assert!(response.headers().get(SESSION_HEADER).is_none());
        let body = body_json(response).await;
        assert!(body["error"].is_object());
        assert_eq!(state.server.session_count().await, 0);
    }

    #[tokio::test]
    async fn secret_is_required_when_configured() {
        let state = test_state(Some("s3cret")).await;
        let response = jsonrpc(State(state.clone()), HeaderMap::new(), INITIALIZE.into()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let mut headers = HeaderMap::new();
        headers.insert(AUTH_HEADER, HeaderValue::from_static("Bearer s3cret"));
        let response = jsonrpc(State(state), headers, INITIALIZE.into()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(SESSION_HEADER));
    }

    #[tokio::test]
    async fn wrong_or_malformed_secret_is_rejected() {
        let state = test_state(Some("s3cret")).await;
        for value in ["Bearer s3cre", "Bearer s3cret2", "s3cret", "Basic s3cret", "Bearer "] {
            let mut headers = HeaderMap::new();
            headers.insert(AUTH_HEADER, HeaderValue::from_static(value));
            assert!(!authorized(&state, &headers), "{value}");
        }
        let mut headers = HeaderMap::new();
        headers.insert(AUTH_HEADER, HeaderValue::from_static("Bearer s3cret"));
        assert!(authorized(&state, &headers));
    }

    #[tokio::test]
    async fn delete_closes_session() {
        let state = test_state(None).await;
        let session_id = open_session(&state).await;

        let status = close_session(State(state.clone()), with_session(&session_id)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let status = close_session(State(state.clone()), with_session(&session_id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let response = jsonrpc(
            State(state),
            with_session(&session_id),
            r#"{"jsonrpc":"2.0","method":"tools/list","id":3}"#.into(),
        )
        .await;
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32000);
    }
}
