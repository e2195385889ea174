//! Query graph structure

use crate::config::ExecutionConfig;
use crate::join::JoinContext;
use crate::log::ExecutionLog;
use crate::node::{NodeId, NodeStatus, QueryNode};
use querygraph_core::{Error, Frame, JoinKind, Result};
use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use tracing::{debug, info};

/// A tree of query nodes joined child-to-parent
pub struct QueryGraph {
    /// Node arena; a [`NodeId`] indexes into it
    pub(crate) nodes: Vec<QueryNode>,

    /// Node names to arena ids
    index: HashMap<String, NodeId>,

    pub(crate) config: ExecutionConfig,

    pub(crate) log: ExecutionLog,
}

impl Default for QueryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryGraph {
    pub fn new() -> Self {
        Self::with_config(ExecutionConfig::default())
    }

    pub fn with_config(config: ExecutionConfig) -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            config,
            log: ExecutionLog::new(),
        }
    }

    /// Builder: share an existing execution log
    pub fn with_log(mut self, log: ExecutionLog) -> Self {
        self.log = log;
        self
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: ExecutionConfig) {
        self.config = config;
    }

    /// Handle to this graph's execution log
    pub fn log(&self) -> &ExecutionLog {
        &self.log
    }

    // ========== Node Operations ==========

    /// Register a node under its name
    pub fn add_node(&mut self, node: QueryNode) -> Result<NodeId> {
        if self.index.contains_key(node.name()) {
            return Err(Error::DuplicateNode(node.name().to_string()));
        }
        let id = NodeId(self.nodes.len());
        debug!("Added node {} as {}", node.name(), id);
        self.index.insert(node.name().to_string(), id);
        self.nodes.push(node);
        Ok(id)
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    pub fn node(&self, name: &str) -> Option<&QueryNode> {
        self.node_id(name).map(|id| &self.nodes[id.0])
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut QueryNode> {
        let id = self.node_id(name)?;
        Some(&mut self.nodes[id.0])
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &QueryNode> {
        self.nodes.iter()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_edges(&self) -> usize {
        self.nodes.iter().filter(|n| n.parent.is_some()).count()
    }

    fn require(&self, name: &str) -> Result<NodeId> {
        self.node_id(name)
            .ok_or_else(|| Error::NodeNotFound(name.to_string()))
    }

    // ========== Join Operations ==========

    /// Attach `child` under `parent`; on error the graph is unchanged
    pub fn join<I, P, C>(&mut self, child: &str, parent: &str, kind: JoinKind, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        let child_id = self.require(child)?;
        let parent_id = self.require(parent)?;

        if let Some(existing) = self.nodes[child_id.0].parent {
            return Err(Error::DuplicateParent {
                child: child.to_string(),
                parent: self.nodes[existing.0].name().to_string(),
            });
        }

        // Walk up from the parent; meeting the child means the edge closes a loop
        let mut cursor = Some(parent_id);
        while let Some(id) = cursor {
            if id == child_id {
                return Err(Error::Cycle {
                    child: child.to_string(),
                    parent: parent.to_string(),
                });
            }
            cursor = self.nodes[id.0].parent;
        }

        let context = JoinContext::new(kind, pairs)?;
        info!("Joined {} under {}: {}", child, parent, context);

        let node = &mut self.nodes[child_id.0];
        node.parent = Some(parent_id);
        node.join = Some(context);
        self.nodes[parent_id.0].children.push(child_id);
        Ok(())
    }

    pub fn inner_join<I, P, C>(&mut self, child: &str, parent: &str, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        self.join(child, parent, JoinKind::Inner, pairs)
    }

    pub fn left_join<I, P, C>(&mut self, child: &str, parent: &str, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        self.join(child, parent, JoinKind::Left, pairs)
    }

    pub fn right_join<I, P, C>(&mut self, child: &str, parent: &str, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        self.join(child, parent, JoinKind::Right, pairs)
    }

    pub fn outer_join<I, P, C>(&mut self, child: &str, parent: &str, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        self.join(child, parent, JoinKind::Outer, pairs)
    }

    // ========== Topology ==========

    /// Returns true if every node is connected through exactly `n - 1` edges
    pub fn is_spanning_tree(&self) -> bool {
        let n = self.num_nodes();
        n > 0 && self.num_edges() + 1 == n
    }

    pub(crate) fn root_id(&self) -> Result<NodeId> {
        if !self.is_spanning_tree() {
            return Err(Error::DisconnectedGraph {
                nodes: self.num_nodes(),
                edges: self.num_edges(),
            });
        }
        self.nodes
            .iter()
            .position(QueryNode::is_root)
            .map(NodeId)
            .ok_or(Error::DisconnectedGraph {
                nodes: self.num_nodes(),
                edges: self.num_edges(),
            })
    }

    /// The only node without a parent
    pub fn root(&self) -> Result<&QueryNode> {
        self.root_id().map(|id| &self.nodes[id.0])
    }

    pub(crate) fn generation_ids(&self, root: NodeId) -> Vec<Vec<NodeId>> {
        let mut generations = Vec::new();
        let mut current = vec![root];
        while !current.is_empty() {
            let next: Vec<NodeId> = current
                .iter()
                .flat_map(|id| self.nodes[id.0].children.iter().copied())
                .collect();
            generations.push(current);
            current = next;
        }
        generations
    }

    /// Node names layered breadth-first from the root
    pub fn generations(&self) -> Result<Vec<Vec<String>>> {
        let root = self.root_id()?;
        Ok(self.names(&self.generation_ids(root)))
    }

    /// Node names with every parent before its children
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let root = self.root_id()?;
        let mut order = Vec::with_capacity(self.num_nodes());
        let mut queue = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            let node = &self.nodes[id.0];
            order.push(node.name().to_string());
            queue.extend(node.children.iter().copied());
        }
        Ok(order)
    }

    pub(crate) fn names(&self, generations: &[Vec<NodeId>]) -> Vec<Vec<String>> {
        generations
            .iter()
            .map(|ids| ids.iter().map(|id| self.nodes[id.0].name().to_string()).collect())
            .collect()
    }

    // ========== Results ==========

    /// A node's frame from the latest execution
    pub fn result(&self, name: &str) -> Option<&Frame> {
        self.node(name).and_then(QueryNode::result)
    }

    pub fn status(&self, name: &str) -> Option<NodeStatus> {
        self.node(name).map(QueryNode::status)
    }

    pub fn error(&self, name: &str) -> Option<&Error> {
        self.node(name).and_then(QueryNode::error)
    }

    /// Indented outline of the tree with each join
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let roots: Vec<NodeId> = (0..self.nodes.len())
            .map(NodeId)
            .filter(|id| self.nodes[id.0].is_root())
            .collect();
        for root in roots {
            self.describe_node(root, 0, &mut out);
        }
        out
    }

    fn describe_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = &self.nodes[id.0];
        let _ = write!(out, "{}{} ({})", "  ".repeat(depth), node.name(), node.db().dialect());
        if let Some(join) = node.join_context() {
            let _ = write!(out, " {}", join);
        }
        out.push('\n');
        for &child in &node.children {
            self.describe_node(child, depth + 1, out);
        }
    }
}

impl std::fmt::Debug for QueryGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryGraph")
            .field("nodes", &self.nodes)
            .field("config", &self.config)
            .finish()
    }
}
