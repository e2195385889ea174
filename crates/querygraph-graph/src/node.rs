//! Query nodes

use crate::connector::{DbInterface, InsertPayload};
use crate::join::JoinContext;
use crate::manipulation::ManipulationSet;
use querygraph_core::{Error, Frame, Result, Value};
use querygraph_template::{QueryTemplate, RenderedQuery};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::debug;

/// Arena index of a node within its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a node within one execution pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    Pending,
    Rendering,
    Running,
    Manipulating,
    Done,
    Failed,
}

impl NodeStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => NodeStatus::Rendering,
            2 => NodeStatus::Running,
            3 => NodeStatus::Manipulating,
            4 => NodeStatus::Done,
            5 => NodeStatus::Failed,
            _ => NodeStatus::Pending,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            NodeStatus::Pending => 0,
            NodeStatus::Rendering => 1,
            NodeStatus::Running => 2,
            NodeStatus::Manipulating => 3,
            NodeStatus::Done => 4,
            NodeStatus::Failed => 5,
        }
    }

    /// Done or Failed
    pub fn is_settled(&self) -> bool {
        matches!(self, NodeStatus::Done | NodeStatus::Failed)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Rendering => "rendering",
            NodeStatus::Running => "running",
            NodeStatus::Manipulating => "manipulating",
            NodeStatus::Done => "done",
            NodeStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Status readable and writable through a shared reference
#[derive(Debug, Default)]
pub(crate) struct StatusCell(AtomicU8);

impl StatusCell {
    pub(crate) fn get(&self) -> NodeStatus {
        NodeStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, status: NodeStatus) {
        self.0.store(status.as_u8(), Ordering::Release);
    }
}

/// A named query against one data source
pub struct QueryNode {
    name: String,
    template: QueryTemplate,
    db: Box<dyn DbInterface>,
    fields: Option<Vec<String>>,
    manipulations: ManipulationSet,

    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) join: Option<JoinContext>,

    pub(crate) status: StatusCell,
    pub(crate) result: Option<Frame>,
    pub(crate) error: Option<Error>,
    pub(crate) skipped: bool,
}

impl QueryNode {
    /// Create a node, rendering its query in the interface's dialect
    pub fn new(name: impl Into<String>, query: impl Into<String>, db: Box<dyn DbInterface>) -> Result<Self> {
        let template = QueryTemplate::new(query, db.dialect())?;
        Ok(Self::from_template(name, template, db))
    }

    /// Create a node from an already-built template
    pub fn from_template(name: impl Into<String>, template: QueryTemplate, db: Box<dyn DbInterface>) -> Self {
        Self {
            name: name.into(),
            template,
            db,
            fields: None,
            manipulations: ManipulationSet::default(),
            parent: None,
            children: Vec::new(),
            join: None,
            status: StatusCell::default(),
            result: None,
            error: None,
            skipped: false,
        }
    }

    /// Builder: keep only these fields of the query result
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Builder: reshape the result after retrieval
    pub fn with_manipulations(mut self, manipulations: ManipulationSet) -> Self {
        self.manipulations = manipulations;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &QueryTemplate {
        &self.template
    }

    pub fn db(&self) -> &dyn DbInterface {
        self.db.as_ref()
    }

    pub fn fields(&self) -> Option<&[String]> {
        self.fields.as_deref()
    }

    pub fn manipulations(&self) -> &ManipulationSet {
        &self.manipulations
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn join_context(&self) -> Option<&JoinContext> {
        self.join.as_ref()
    }

    pub fn status(&self) -> NodeStatus {
        self.status.get()
    }

    /// This pass's result; after folding, a parent's result includes its children
    pub fn result(&self) -> Option<&Frame> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Returns true if the node did not run because an ancestor failed
    pub fn was_skipped(&self) -> bool {
        self.skipped
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub(crate) fn reset(&mut self) {
        self.status.set(NodeStatus::Pending);
        self.result = None;
        self.error = None;
        self.skipped = false;
    }

    /// Render the query against the parent's frame and caller values
    pub fn render(
        &self,
        parent: Option<&Frame>,
        values: Option<&HashMap<String, Value>>,
    ) -> Result<RenderedQuery> {
        self.template.render(parent, values)
    }

    /// Render, dispatch and manipulate; status advances as each step starts
    pub async fn execute(
        &self,
        parent: Option<&Frame>,
        values: Option<&HashMap<String, Value>>,
    ) -> Result<Frame> {
        self.status.set(NodeStatus::Rendering);
        let query = self.render(parent, values)?;

        self.status.set(NodeStatus::Running);
        debug!(node = %self.name, "Dispatching query");
        let frame = self
            .db
            .execute_query(&query, self.fields())
            .await
            .map_err(Error::into_driver)?;

        self.status.set(NodeStatus::Manipulating);
        let frame = self.manipulations.apply(frame, values)?;
        debug!(node = %self.name, rows = frame.num_rows(), "Node retrieved rows");
        Ok(frame)
    }

    /// Write through this node's interface
    pub async fn insert(&self, payload: &InsertPayload) -> Result<()> {
        debug!(node = %self.name, "Dispatching insert");
        self.db.execute_insert(payload).await.map_err(Error::into_driver)
    }
}

impl fmt::Debug for QueryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryNode")
            .field("name", &self.name)
            .field("dialect", &self.template.dialect())
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::MemoryInterface;
    use crate::manipulation::Manipulation;
    use querygraph_template::Dialect;

    fn albums() -> Frame {
        Frame::builder()
            .column("AlbumId", [1i64, 2])
            .column("Title", ["A", "B"])
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_execute_runs_every_step() {
        let db = MemoryInterface::fixed(Dialect::Sqlite, albums());
        let recorder = db.recorder();
        let node = QueryNode::new("albums", "SELECT * FROM albums WHERE id > {% min -> int %}", db.boxed())
            .unwrap()
            .with_fields(["AlbumId"])
            .with_manipulations(
                ManipulationSet::new().with(Manipulation::Rename(vec![("AlbumId".into(), "id".into())])),
            );

        let mut values = HashMap::new();
        values.insert("min".to_string(), Value::Int(0));
        let frame = node.execute(None, Some(&values)).await.unwrap();

        assert_eq!(frame.columns(), &["id".to_string()]);
        assert_eq!(node.status(), NodeStatus::Manipulating);
        assert_eq!(
            recorder.queries(),
            vec![RenderedQuery::Text("SELECT * FROM albums WHERE id > 0".into())]
        );
    }

    #[tokio::test]
    async fn test_render_failure_stops_before_dispatch() {
        let db = MemoryInterface::fixed(Dialect::Sqlite, albums());
        let recorder = db.recorder();
        let node = QueryNode::new("tracks", "SELECT {{ id -> int }}", db.boxed()).unwrap();

        let err = node.execute(None, None).await.unwrap_err();
        assert!(matches!(err, Error::MissingData(_)));
        assert_eq!(node.status(), NodeStatus::Rendering);
        assert_eq!(recorder.query_count(), 0);
    }

    /// Driver that fails with whatever error it was given
    struct Broken(Error);

    #[async_trait::async_trait]
    impl DbInterface for Broken {
        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }

        async fn execute_query(&self, _: &RenderedQuery, _: Option<&[String]>) -> Result<Frame> {
            Err(self.0.clone())
        }

        async fn execute_insert(&self, _: &InsertPayload) -> Result<()> {
            Err(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_driver_errors_are_wrapped() {
        let node = QueryNode::new("a", "SELECT 1", Box::new(Broken(Error::MissingData("socket closed".into()))))
            .unwrap();
        let err = node.execute(None, None).await.unwrap_err();
        assert!(matches!(err, Error::Execution(m) if m.contains("socket closed")));

        let err = node.insert(&InsertPayload::Records(albums())).await.unwrap_err();
        assert!(err.is_driver());

        let node = QueryNode::new("b", "SELECT 1", Box::new(Broken(Error::Connection("refused".into()))))
            .unwrap();
        assert_eq!(node.execute(None, None).await.unwrap_err(), Error::Connection("refused".into()));
    }

    #[tokio::test]
    async fn test_insert_reaches_interface() {
        let db = MemoryInterface::fixed(Dialect::Sqlite, albums());
        let recorder = db.recorder();
        let node = QueryNode::new("albums", "SELECT 1", db.boxed()).unwrap();
        node.insert(&InsertPayload::Records(albums())).await.unwrap();
        assert_eq!(recorder.inserts(), vec![InsertPayload::Records(albums())]);
    }

    #[test]
    fn test_template_uses_interface_dialect() {
        let db = MemoryInterface::fixed(Dialect::MongoDb, Frame::new());
        let node = QueryNode::new("docs", "{}", db.boxed()).unwrap();
        assert_eq!(node.template().dialect(), Dialect::MongoDb);
        assert!(node.is_root());
    }

    #[test]
    fn test_status_cell() {
        let cell = StatusCell::default();
        assert_eq!(cell.get(), NodeStatus::Pending);
        cell.set(NodeStatus::Failed);
        assert_eq!(cell.get(), NodeStatus::Failed);
        assert!(cell.get().is_settled());
    }
}
