mod protocol;
mod server;
mod session;
pub mod stdio;
mod tools;

pub use protocol::{
    ClientInfo, InitializeParams, InitializeResult, LATEST_PROTOCOL_VERSION, McpMethod,
    McpToolDefinition, SUPPORTED_PROTOCOL_VERSIONS, ServerInfo, ToolCallParams,
    negotiate_protocol_version,
};
pub use server::{SessionServer, SessionServerConfig};
pub use session::{Session, SessionState};
pub use tools::EXPOSED_COMPONENT;

use graphos_core::error::ActionError;
use graphos_core::rpc::{
    JSON_RPC_GENERIC_SERVER_ERROR, JSON_RPC_INVALID_PARAMS, JSON_RPC_INVALID_REQUEST,
    JSON_RPC_METHOD_NOT_FOUND, JSON_RPC_NOT_INITIALIZED, JsonRpcError,
};

/// Session and method failures, plus action failures surfaced through a call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("session {0} is closed")]
    SessionClosed(String),

    #[error("session {0} already exists")]
    SessionExists(String),

    #[error("session not initialized")]
    NotInitialized,

    #[error("session already initialized")]
    AlreadyInitialized,

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Action(#[from] ActionError),
}

impl ProtocolError {
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::UnknownSession(_) | Self::SessionClosed(_) | Self::SessionExists(_) => {
                JSON_RPC_GENERIC_SERVER_ERROR
            }
            Self::NotInitialized => JSON_RPC_NOT_INITIALIZED,
            Self::AlreadyInitialized | Self::InvalidRequest(_) => JSON_RPC_INVALID_REQUEST,
            Self::MethodNotFound(_) => JSON_RPC_METHOD_NOT_FOUND,
            Self::InvalidParams(_) => JSON_RPC_INVALID_PARAMS,
            Self::Action(err) => err.rpc_code(),
        }
    }

    pub fn to_rpc_error(&self) -> JsonRpcError {
        match self {
            Self::Action(err) => err.to_rpc_error(),
            other => JsonRpcError {
                code: other.rpc_code(),
                message: other.to_string(),
                data: None,
            },
        }
    }
}

/// Transport failures of the stdio server.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
