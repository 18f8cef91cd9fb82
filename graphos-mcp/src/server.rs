use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use graphos_actions::ActionDispatcher;
use graphos_core::rpc::{
    JSON_RPC_INVALID_REQUEST, JSON_RPC_PARSE_ERROR, JSON_RPC_VERSION, JsonRpcId, JsonRpcRequest,
    JsonRpcResponse,
};
use serde_json::{Value, json};
use tokio::sync::RwLock;

use crate::ProtocolError;
use crate::protocol::{
    InitializeParams, InitializeResult, McpMethod, ServerInfo, ToolCallParams,
    negotiate_protocol_version,
};
use crate::session::{Session, SessionState};
use crate::tools::{build_invocation, tool_definitions};

#[derive(Debug, Clone)]
pub struct SessionServerConfig {
    pub server_name: String,
    pub server_version: String,
}

impl Default for SessionServerConfig {
    fn default() -> Self {
        Self {
            server_name: "graphos".into(),
            server_version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// JSON-RPC session server. Each session is gated by `initialize`; calls run
/// through the action dispatcher under the session's actor id.
pub struct SessionServer {
    config: SessionServerConfig,
    dispatcher: Arc<ActionDispatcher>,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionServer {
    pub fn new(config: SessionServerConfig, dispatcher: Arc<ActionDispatcher>) -> Self {
        Self {
            config,
            dispatcher,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn dispatcher(&self) -> &Arc<ActionDispatcher> {
        &self.dispatcher
    }

    /// Create an `Uninitialized` session under `session_id`.
    pub async fn start(&self, session_id: &str) -> Result<(), ProtocolError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(session_id) {
            return Err(ProtocolError::SessionExists(session_id.to_string()));
        }
        sessions.insert(session_id.to_string(), Session::new(session_id));
        tracing::debug!(session_id = %session_id, "session_started");
        Ok(())
    }

    /// Create a session under a fresh id and return the id.
    pub async fn start_new(&self) -> String {
        let session_id = format!("session-{}", uuid::Uuid::new_v4());
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), Session::new(&session_id));
        tracing::debug!(session_id = %session_id, "session_started");
        session_id
    }

    /// Close and drop a session. Returns whether it existed.
    pub async fn stop(&self, session_id: &str) -> bool {
        let Some(mut session) = self.sessions.write().await.remove(session_id) else {
            return false;
        };
        session.state = SessionState::Closed;
        tracing::info!(
            session_id = %session_id,
            actor_id = %session.actor_id(),
            "session_closed"
        );
        true
    }

    pub async fn session_state(&self, session_id: &str) -> Option<SessionState> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|session| session.state)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Close every session idle for longer than `max_idle`.
    pub async fn sweep_idle(&self, max_idle: Duration) -> usize {
        let expired: Vec<String> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|session| session.idle_for() > max_idle)
            .map(|session| session.id.clone())
            .collect();
        for session_id in &expired {
            self.stop(session_id).await;
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "idle_sessions_reaped");
        }
        expired.len()
    }

    /// Close every session.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for session_id in ids {
            self.stop(&session_id).await;
        }
    }

    /// Handle one raw frame. Malformed JSON yields `-32700` with a null id.
    pub async fn handle_raw(&self, session_id: &str, frame: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(frame) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(session_id = %session_id, error = %err, "rpc_parse_error");
                return Some(JsonRpcResponse::error(
                    None,
                    JSON_RPC_PARSE_ERROR,
                    format!("parse error: {err}"),
                ));
            }
        };
        self.handle_value(session_id, value).await
    }

    /// Handle one decoded frame, validating the envelope first.
    pub async fn handle_value(&self, session_id: &str, value: Value) -> Option<JsonRpcResponse> {
        let id = value
            .get("id")
            .cloned()
            .and_then(|id| serde_json::from_value::<JsonRpcId>(id).ok());
        let request = match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) if request.jsonrpc == JSON_RPC_VERSION => request,
            Ok(request) => {
                return Some(JsonRpcResponse::error(
                    id,
                    JSON_RPC_INVALID_REQUEST,
                    format!("unsupported jsonrpc version: {}", request.jsonrpc),
                ));
            }
            Err(err) => {
                return Some(JsonRpcResponse::error(
                    id,
                    JSON_RPC_INVALID_REQUEST,
                    format!("invalid request: {err}"),
                ));
            }
        };
        self.handle_message(session_id, request).await
    }

    /// Handle one request. Notifications never produce a response.
    pub async fn handle_message(
        &self,
        session_id: &str,
        request: JsonRpcRequest,
    ) -> Option<JsonRpcResponse> {
        let result = self.dispatch(session_id, &request).await;
        let id = request.id?;
        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(err) => {
                tracing::debug!(
                    session_id = %session_id,
                    method = %request.method,
                    code = err.rpc_code(),
                    error = %err,
                    "rpc_request_failed"
                );
                JsonRpcResponse::from_error(Some(id), err.to_rpc_error())
            }
        })
    }

    async fn dispatch(&self, session_id: &str, request: &JsonRpcRequest) -> Result<Value, ProtocolError> {
        let (state, actor_id) = self.touch(session_id).await?;
        let method = McpMethod::try_from(request.method.as_str())
            .map_err(|()| ProtocolError::MethodNotFound(request.method.clone()))?;
        if method.requires_initialized() && state != SessionState::Initialized {
            return Err(ProtocolError::NotInitialized);
        }

        match method {
            McpMethod::Initialize => self.initialize(session_id, request.params.clone()).await,
            McpMethod::Initialized | McpMethod::Ping => Ok(json!({})),
            McpMethod::ToolsList => {
                let tools = tool_definitions(self.dispatcher.supervisor().registry()).await;
                Ok(json!({ "tools": tools }))
            }
            McpMethod::ToolsCall => self.call_tool(session_id, &actor_id, request.params.clone()).await,
        }
    }

    /// Refresh the session's idle clock and return its state and actor.
    async fn touch(&self, session_id: &str) -> Result<(SessionState, String), ProtocolError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| ProtocolError::UnknownSession(session_id.to_string()))?;
        if session.state == SessionState::Closed {
            return Err(ProtocolError::SessionClosed(session_id.to_string()));
        }
        session.touch();
        Ok((session.state, session.actor_id().to_string()))
    }

    async fn initialize(&self, session_id: &str, params: Option<Value>) -> Result<Value, ProtocolError> {
        let params: InitializeParams = match params {
            Some(params) => serde_json::from_value(params)
                .map_err(|err| ProtocolError::InvalidParams(format!("initialize: {err}")))?,
            None => InitializeParams::default(),
        };
        let protocol_version = negotiate_protocol_version(params.protocol_version.as_deref());

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| ProtocolError::UnknownSession(session_id.to_string()))?;
        if session.state != SessionState::Uninitialized {
            return Err(ProtocolError::AlreadyInitialized);
        }
        session.state = SessionState::Initialized;
        session.protocol_version = Some(protocol_version.to_string());
        session.client_info = params.client_info;
        session.client_capabilities = params.capabilities;
        tracing::info!(
            session_id = %session_id,
            actor_id = %session.actor_id(),
            protocol_version = %protocol_version,
            "session_initialized"
        );

        let result = InitializeResult {
            protocol_version: protocol_version.to_string(),
            capabilities: json!({ "tools": {} }),
            server_info: ServerInfo {
                name: self.config.server_name.clone(),
                version: self.config.server_version.clone(),
            },
        };
        serde_json::to_value(result)
            .map_err(|err| ProtocolError::InvalidRequest(format!("initialize result: {err}")))
    }

    async fn call_tool(
        &self,
        session_id: &str,
        actor_id: &str,
        params: Option<Value>,
    ) -> Result<Value, ProtocolError> {
        let params: ToolCallParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|err| ProtocolError::InvalidParams(format!("tools/call: {err}")))?;
        let invocation = build_invocation(actor_id, &params.name, params.arguments)?;
        tracing::debug!(
            session_id = %session_id,
            actor_id = %actor_id,
            tool = %params.name,
            "tool_call_received"
        );
        Ok(self.dispatcher.execute(invocation).await?)
    }
}
