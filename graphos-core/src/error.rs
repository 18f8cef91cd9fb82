use std::time::Duration;

use crate::rpc::{
    JSON_RPC_INTERNAL_ERROR, JSON_RPC_INVALID_PARAMS, JSON_RPC_METHOD_NOT_FOUND,
    JSON_RPC_PERMISSION_DENIED, JSON_RPC_RESOURCE_NOT_FOUND, JSON_RPC_TIMEOUT, JsonRpcError,
};

/// Failure taxonomy of the action-dispatch core.
///
/// Only `UnexpectedFailure` denotes a bug; every other variant is an expected
/// outcome that is reported back to the caller as data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionError {
    #[error("invalid metadata for action {key}: {reason}")]
    InvalidMetadata { key: String, reason: String },

    #[error("invalid payload format: {0}")]
    InvalidPayloadFormat(String),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("permission denied")]
    PermissionDenied { actor_id: String, scope_id: String },

    #[error("operation failed: {0}")]
    OperationError(String),

    #[error("execution {execution_id} timed out after {elapsed:?}")]
    Timeout {
        execution_id: String,
        elapsed: Duration,
    },

    #[error("unexpected failure: {0}")]
    UnexpectedFailure(String),
}

impl ActionError {
    pub fn operation(reason: impl Into<String>) -> Self {
        Self::OperationError(reason.into())
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::ValidationError(reason.into())
    }

    pub fn payload(reason: impl Into<String>) -> Self {
        Self::InvalidPayloadFormat(reason.into())
    }

    /// Stable snake_case identifier of the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidMetadata { .. } => "invalid_metadata",
            Self::InvalidPayloadFormat(_) => "invalid_payload_format",
            Self::UnknownOperation(_) => "unknown_operation",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::OperationError(_) => "operation_error",
            Self::Timeout { .. } => "timeout",
            Self::UnexpectedFailure(_) => "unexpected_failure",
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }

    /// JSON-RPC error code for this error. These values are wire contract.
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::PermissionDenied { .. } => JSON_RPC_PERMISSION_DENIED,
            Self::InvalidPayloadFormat(_) | Self::ValidationError(_) => JSON_RPC_INVALID_PARAMS,
            Self::UnknownOperation(_) => JSON_RPC_METHOD_NOT_FOUND,
            Self::NotFound(_) => JSON_RPC_RESOURCE_NOT_FOUND,
            Self::Timeout { .. } => JSON_RPC_TIMEOUT,
            Self::InvalidMetadata { .. } | Self::OperationError(_) | Self::UnexpectedFailure(_) => {
                JSON_RPC_INTERNAL_ERROR
            }
        }
    }

    pub fn to_rpc_error(&self) -> JsonRpcError {
        let data = match self {
            Self::PermissionDenied { .. } => None,
            Self::OperationError(reason) | Self::UnexpectedFailure(reason) => {
                Some(serde_json::json!({ "kind": self.kind(), "reason": reason }))
            }
            _ => Some(serde_json::json!({ "kind": self.kind() })),
        };
        JsonRpcError {
            code: self.rpc_code(),
            message: self.to_string(),
            data,
        }
    }
}

/// Failures reported by a Graph Store implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("no node at path: {0}")]
    PathNotFound(String),

    #[error("node already exists: {0}")]
    Conflict(String),

    #[error("invalid edge: {0}")]
    InvalidEdge(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<GraphError> for ActionError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::NodeNotFound(_) | GraphError::PathNotFound(_) => {
                ActionError::NotFound(err.to_string())
            }
            GraphError::Conflict(_) | GraphError::InvalidEdge(_) => {
                ActionError::InvalidPayloadFormat(err.to_string())
            }
            GraphError::Storage(_) => ActionError::OperationError(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_maps_to_wire_code_without_leaking_scope() {
        let err = ActionError::PermissionDenied {
            actor_id: "c1".into(),
            scope_id: "restricted:node".into(),
        };
        let rpc = err.to_rpc_error();
        assert_eq!(rpc.code, -32003);
        assert_eq!(rpc.message, "permission denied");
        assert!(rpc.data.is_none());
    }

    #[test]
    fn client_errors_share_invalid_params_code() {
        assert_eq!(ActionError::validation("missing node_id").rpc_code(), -32602);
        assert_eq!(ActionError::payload("not an object").rpc_code(), -32602);
        assert_eq!(ActionError::UnknownOperation("graph.nope".into()).rpc_code(), -32601);
    }

    #[test]
    fn operation_error_preserves_reason_in_data() {
        let rpc = ActionError::operation("disk full").to_rpc_error();
        assert_eq!(rpc.code, -32603);
        let data = rpc.data.expect("operation errors carry data");
        assert_eq!(data["kind"], "operation_error");
        assert_eq!(data["reason"], "disk full");
    }

    #[test]
    fn timeout_is_distinct_from_failure_codes() {
        let err = ActionError::Timeout {
            execution_id: "exec-1".into(),
            elapsed: Duration::from_millis(50),
        };
        assert_eq!(err.rpc_code(), -32001);
        assert_ne!(err.rpc_code(), ActionError::operation("x").rpc_code());
    }

    #[test]
    fn graph_errors_convert_by_category() {
        let not_found: ActionError = GraphError::NodeNotFound("a".into()).into();
        assert!(matches!(not_found, ActionError::NotFound(_)));
        let conflict: ActionError = GraphError::Conflict("a".into()).into();
        assert!(matches!(conflict, ActionError::InvalidPayloadFormat(_)));
        let storage: ActionError = GraphError::Storage("io".into()).into();
        assert!(matches!(storage, ActionError::OperationError(_)));
    }
}
