use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const FILE_SCOPE_PREFIX: &str = "file-scope-";

/// Outcome of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthDecision {
    Allow,
    Deny { reason: String },
}

impl AuthDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Decides whether an actor may act within a scope.
#[async_trait]
pub trait ScopeService: Send + Sync {
    async fn authorize(&self, caller_actor_id: &str, scope_id: &str) -> AuthDecision;
}

/// How an invocation names its target, which in turn fixes its scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeTarget {
    /// Caller supplied the scope alongside the node; used verbatim.
    Explicit { node_id: String, scope_id: String },
    /// Bare node id: the node is its own scope.
    Node(String),
    /// Filesystem-style path: scope derived from the sanitized basename.
    Path(String),
}

impl ScopeTarget {
    pub fn scope_id(&self) -> String {
        match self {
            Self::Explicit { scope_id, .. } => scope_id.clone(),
            // NOTE: conflates resource identity with the permission boundary;
            // nodes sharing an id namespace across tenants share a scope.
            Self::Node(node_id) => node_id.clone(),
            Self::Path(path) => file_scope(path),
        }
    }
}

/// `"file-scope-" + sanitize(basename(path))`. Grants are keyed by this value,
/// so it must stay stable for a given path.
pub fn file_scope(path: &str) -> String {
    let basename = Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{FILE_SCOPE_PREFIX}{}", sanitize_scope_component(&basename))
}

/// Replace every character outside `[a-zA-Z0-9]` with `-`.
pub fn sanitize_scope_component(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}
