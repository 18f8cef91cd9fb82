use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use graphos_core::error::GraphError;
use graphos_core::graph::{Edge, GraphStore, Node, NodeQuery, QueryOptions};

/// In-memory graph store. A single writer lock serializes mutations, which
/// gives every node single-writer semantics; reads proceed concurrently.
#[derive(Default)]
pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
}

#[derive(Default)]
struct GraphState {
    nodes: HashMap<String, Node>,
    /// path -> node id
    paths: HashMap<String, String>,
    edges: HashMap<String, Edge>,
}

impl GraphState {
    fn store(&mut self, mut node: Node) -> Node {
        let now = Utc::now();
        match self.nodes.get(&node.id) {
            Some(existing) => {
                node.version = existing.version + 1;
                node.created_at = existing.created_at;
                if existing.path != node.path
                    && let Some(old_path) = &existing.path
                {
                    self.paths.remove(old_path);
                }
            }
            None => {
                node.version = 1;
            }
        }
        node.updated_at = now;
        if let Some(path) = &node.path {
            self.paths.insert(path.clone(), node.id.clone());
        }
        self.nodes.insert(node.id.clone(), node.clone());
        node
    }
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn node_count(&self) -> usize {
        self.state.read().await.nodes.len()
    }

    pub async fn edges_from(&self, node_id: &str) -> Vec<Edge> {
        let state = self.state.read().await;
        let mut edges: Vec<Edge> = state
            .edges
            .values()
            .filter(|edge| edge.from == node_id)
            .cloned()
            .collect();
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        edges
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn get(&self, id: &str) -> Result<Node, GraphError> {
        let state = self.state.read().await;
        state
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))
    }

    async fn get_by_path(&self, path: &str) -> Result<Node, GraphError> {
        let state = self.state.read().await;
        state
            .paths
            .get(path)
            .and_then(|id| state.nodes.get(id))
            .cloned()
            .ok_or_else(|| GraphError::PathNotFound(path.to_string()))
    }

    #[instrument(skip(self, node), fields(node_id = %node.id))]
    async fn put_node(&self, node: Node) -> Result<Node, GraphError> {
        let mut state = self.state.write().await;
        if let Some(path) = &node.path
            && let Some(owner) = state.paths.get(path)
            && owner != &node.id
        {
            return Err(GraphError::Conflict(format!(
                "path '{path}' already belongs to node '{owner}'"
            )));
        }
        let stored = state.store(node);
        debug!(version = stored.version, "node_stored");
        Ok(stored)
    }

    #[instrument(skip(self, node), fields(node_id = %node.id))]
    async fn create_node(&self, node: Node) -> Result<Node, GraphError> {
        let mut state = self.state.write().await;
        if state.nodes.contains_key(&node.id) {
            return Err(GraphError::Conflict(node.id));
        }
        if let Some(path) = &node.path
            && state.paths.contains_key(path)
        {
            return Err(GraphError::Conflict(format!("path '{path}'")));
        }
        let stored = state.store(node);
        debug!("node_created");
        Ok(stored)
    }

    #[instrument(skip(self, edge), fields(edge_id = %edge.id, from = %edge.from, to = %edge.to))]
    async fn put_edge(&self, edge: Edge) -> Result<Edge, GraphError> {
        let mut state = self.state.write().await;
        for endpoint in [&edge.from, &edge.to] {
            if !state.nodes.contains_key(endpoint) {
                return Err(GraphError::InvalidEdge(format!(
                    "endpoint '{endpoint}' does not exist"
                )));
            }
        }
        state.edges.insert(edge.id.clone(), edge.clone());
        Ok(edge)
    }

    async fn query(
        &self,
        query: &NodeQuery,
        options: &QueryOptions,
    ) -> Result<Vec<Node>, GraphError> {
        let state = self.state.read().await;
        let mut matches: Vec<Node> = state
            .nodes
            .values()
            .filter(|node| query.matches(node))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        matches.truncate(options.limit);
        Ok(matches)
    }
}
