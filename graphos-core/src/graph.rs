use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GraphError;

pub type Properties = serde_json::Map<String, serde_json::Value>;

/// A vertex in the graph. Identity is stable across actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            path: None,
            properties: Properties::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|value| value.as_str())
    }

    /// Compact representation returned by queries.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "path": self.path,
            "properties": self.properties,
            "version": self.version,
        })
    }
}

/// A directed, labelled edge between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub from: String,
    pub to: String,
    pub label: String,
    #[serde(default)]
    pub properties: Properties,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: format!("edge-{}", uuid::Uuid::new_v4()),
            from: from.into(),
            to: to.into(),
            label: label.into(),
            properties: Properties::new(),
        }
    }
}

/// Property-match predicate: every listed property must be equal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeQuery {
    #[serde(default)]
    pub node_properties: Properties,
}

impl NodeQuery {
    pub fn matches(&self, node: &Node) -> bool {
        self.node_properties
            .iter()
            .all(|(key, expected)| node.properties.get(key) == Some(expected))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default = "default_query_limit")]
    pub limit: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            limit: default_query_limit(),
        }
    }
}

fn default_query_limit() -> usize {
    100
}

/// Key/value store of nodes and edges. Implementations own per-node
/// consistency: concurrent writers to one node must be serialized.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Node, GraphError>;

    async fn get_by_path(&self, path: &str) -> Result<Node, GraphError>;

    /// Insert or replace a node, bumping its version. Returns the stored node.
    async fn put_node(&self, node: Node) -> Result<Node, GraphError>;

    /// Insert a node that must not exist yet.
    async fn create_node(&self, node: Node) -> Result<Node, GraphError>;

    async fn put_edge(&self, edge: Edge) -> Result<Edge, GraphError>;

    async fn query(&self, query: &NodeQuery, options: &QueryOptions)
    -> Result<Vec<Node>, GraphError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_matches_all_listed_properties() {
        let node = Node::new("test:node")
            .with_property("executable_type", serde_json::json!("elixir_code"))
            .with_property("name", serde_json::json!("adder"));

        let mut query = NodeQuery::default();
        query
            .node_properties
            .insert("executable_type".into(), serde_json::json!("elixir_code"));
        assert!(query.matches(&node));

        query
            .node_properties
            .insert("name".into(), serde_json::json!("other"));
        assert!(!query.matches(&node));
    }

    #[test]
    fn empty_query_matches_everything() {
        assert!(NodeQuery::default().matches(&Node::new("any")));
    }

    #[test]
    fn query_options_default_limit() {
        let options: QueryOptions = serde_json::from_str("{}").expect("options should parse");
        assert_eq!(options.limit, 100);
    }
}
