use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use graphos_core::config::GrantConfig;
use graphos_core::scope::{AuthDecision, ScopeService};

/// One scope pattern from a grant: `*`, `prefix*`, or an exact scope id.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ScopePattern {
    Any,
    Prefix(String),
    Exact(String),
}

impl ScopePattern {
    fn parse(raw: &str) -> Self {
        if raw == "*" {
            Self::Any
        } else if let Some(prefix) = raw.strip_suffix('*') {
            Self::Prefix(prefix.to_string())
        } else {
            Self::Exact(raw.to_string())
        }
    }

    fn matches(&self, scope_id: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Prefix(prefix) => scope_id.starts_with(prefix.as_str()),
            Self::Exact(exact) => scope_id == exact,
        }
    }
}

type Grants = HashMap<String, Vec<ScopePattern>>;

/// Config-driven scope service. Actor `*` applies to every caller.
/// The table is swapped atomically on config reload.
pub struct GrantTable {
    grants: ArcSwap<Grants>,
}

impl GrantTable {
    pub fn from_config(grants: &[GrantConfig]) -> Self {
        Self {
            grants: ArcSwap::from_pointee(build(grants)),
        }
    }

    pub fn replace(&self, grants: &[GrantConfig]) {
        self.grants.store(Arc::new(build(grants)));
        tracing::info!(actors = grants.len(), "grant_table_reloaded");
    }

    pub fn allows(&self, actor_id: &str, scope_id: &str) -> bool {
        let grants = self.grants.load();
        [actor_id, "*"]
            .iter()
            .filter_map(|actor| grants.get(*actor))
            .flatten()
            .any(|pattern| pattern.matches(scope_id))
    }
}

fn build(grants: &[GrantConfig]) -> Grants {
    let mut table: Grants = HashMap::new();
    for grant in grants {
        table
            .entry(grant.actor.clone())
            .or_default()
            .extend(grant.scopes.iter().map(|scope| ScopePattern::parse(scope)));
    }
    table
}

#[async_trait]
impl ScopeService for GrantTable {
    async fn authorize(&self, caller_actor_id: &str, scope_id: &str) -> AuthDecision {
        if self.allows(caller_actor_id, scope_id) {
            AuthDecision::Allow
        } else {
            AuthDecision::Deny {
                reason: format!("actor {caller_actor_id} holds no grant for scope {scope_id}"),
            }
        }
    }
}
