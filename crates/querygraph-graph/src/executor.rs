//! Two-phase execution
//!
//! The execute phase walks the tree one generation at a time. Every node of a
//! generation renders against its parent's own frame and runs against its own
//! interface; the next generation starts only once all of them have settled.
//! The fold phase then joins each result into its parent's, deepest nodes
//! first, leaving the combined frame on the root.

use crate::config::{ExecutionMode, JoinErrorPolicy};
use crate::graph::QueryGraph;
use crate::log::LogLevel;
use crate::node::{NodeId, NodeStatus};
use crate::report::{ExecutionOutcome, ExecutionReport, JoinFailure, NodeFailure};
use futures::FutureExt;
use futures::stream::{self, StreamExt};
use querygraph_core::{Error, Frame, Result, Value};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

impl QueryGraph {
    /// Execute in the configured mode
    pub async fn execute(&mut self, values: Option<&HashMap<String, Value>>) -> Result<ExecutionOutcome> {
        let mode = self.config.mode;
        self.execute_with_mode(mode, values).await
    }

    /// Execute one node at a time
    pub async fn execute_sequential(
        &mut self,
        values: Option<&HashMap<String, Value>>,
    ) -> Result<ExecutionOutcome> {
        self.execute_with_mode(ExecutionMode::Sequential, values).await
    }

    pub async fn execute_with_mode(
        &mut self,
        mode: ExecutionMode,
        values: Option<&HashMap<String, Value>>,
    ) -> Result<ExecutionOutcome> {
        let root = self.root_id()?;
        let generations = self.generation_ids(root);
        let run_id = Uuid::new_v4();
        let mut report = ExecutionReport::start(run_id, self.names(&generations));

        for node in &mut self.nodes {
            node.reset();
        }
        self.emit(
            run_id,
            None,
            LogLevel::Info,
            format!(
                "Executing {} nodes in {} generations ({:?})",
                self.nodes.len(),
                generations.len(),
                mode
            ),
        );

        for (depth, generation) in generations.iter().enumerate() {
            let ready = self.skip_orphans(run_id, generation, &mut report);
            let outcomes = self.run_generation(&ready, mode, values).await;
            self.settle(run_id, outcomes, &mut report);
            self.emit(
                run_id,
                None,
                LogLevel::Debug,
                format!("Generation {} settled", depth),
            );
        }

        if let Some(error) = self.nodes[root.0].error.as_ref() {
            let error = Error::RootFailed {
                node: self.nodes[root.0].name().to_string(),
                message: error.to_string(),
            };
            report.finish();
            self.emit(run_id, None, LogLevel::Error, error.to_string());
            return Err(error);
        }

        let order: Vec<NodeId> = generations.iter().flatten().rev().copied().collect();
        if let Err(error) = self.fold(run_id, &order, &mut report) {
            report.finish();
            return Err(error);
        }
        report.finish();

        if self.config.fail_on_any_node {
            let first = report
                .failures
                .iter()
                .find(|f| !f.skipped)
                .and_then(|f| self.error(&f.node));
            if let Some(error) = first {
                return Err(error.clone());
            }
        }

        let frame = self.nodes[root.0].result.clone().unwrap_or_default();
        self.emit(
            run_id,
            None,
            LogLevel::Info,
            format!(
                "Execution finished: {} rows, {} completed, {} failed",
                frame.num_rows(),
                report.completed.len(),
                report.failures.len()
            ),
        );
        Ok(ExecutionOutcome { frame, report })
    }

    /// Mark nodes whose parent did not finish; return the rest
    fn skip_orphans(
        &mut self,
        run_id: Uuid,
        generation: &[NodeId],
        report: &mut ExecutionReport,
    ) -> Vec<NodeId> {
        let mut ready = Vec::with_capacity(generation.len());
        for &id in generation {
            let parent = match self.nodes[id.0].parent {
                Some(parent) if self.nodes[parent.0].status() != NodeStatus::Done => parent,
                _ => {
                    ready.push(id);
                    continue;
                }
            };

            let error = Error::Execution(format!(
                "parent '{}' did not complete",
                self.nodes[parent.0].name()
            ));
            let node = &mut self.nodes[id.0];
            node.status.set(NodeStatus::Failed);
            node.skipped = true;
            report
                .failures
                .push(NodeFailure::from_error(node.name(), &error, true));
            node.error = Some(error);

            let name = node.name().to_string();
            self.emit(run_id, Some(&name), LogLevel::Warn, "Skipped");
        }
        ready
    }

    /// Dispatch one generation; every task settles before this returns
    async fn run_generation(
        &self,
        ready: &[NodeId],
        mode: ExecutionMode,
        values: Option<&HashMap<String, Value>>,
    ) -> Vec<(NodeId, Result<Frame>)> {
        let nodes = &self.nodes;
        let tasks = ready.iter().map(move |&id| {
            let node = &nodes[id.0];
            let parent = node.parent.and_then(|p| nodes[p.0].result.as_ref());
            async move {
                let outcome = AssertUnwindSafe(node.execute(parent, values))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(Error::Execution(panic_message(panic.as_ref()))));
                (id, outcome)
            }
        });

        match mode {
            ExecutionMode::Parallel => {
                stream::iter(tasks)
                    .buffer_unordered(self.config.max_concurrency.max(1))
                    .collect::<Vec<_>>()
                    .await
            }
            ExecutionMode::Sequential => {
                let mut outcomes = Vec::with_capacity(ready.len());
                for task in tasks {
                    outcomes.push(task.await);
                }
                outcomes
            }
        }
    }

    /// Store each node's outcome
    fn settle(
        &mut self,
        run_id: Uuid,
        outcomes: Vec<(NodeId, Result<Frame>)>,
        report: &mut ExecutionReport,
    ) {
        for (id, outcome) in outcomes {
            let name = self.nodes[id.0].name().to_string();
            let node = &mut self.nodes[id.0];
            match outcome {
                Ok(frame) => {
                    let rows = frame.num_rows();
                    node.status.set(NodeStatus::Done);
                    node.result = Some(frame);
                    report.completed.push(name.clone());
                    self.emit(run_id, Some(&name), LogLevel::Info, format!("Done with {} rows", rows));
                }
                Err(err) => {
                    node.status.set(NodeStatus::Failed);
                    report.failures.push(NodeFailure::from_error(&name, &err, false));
                    let message = err.to_string();
                    node.error = Some(err);
                    self.emit(run_id, Some(&name), LogLevel::Error, message);
                }
            }
        }
    }

    /// Join children into parents, deepest first
    fn fold(&mut self, run_id: Uuid, order: &[NodeId], report: &mut ExecutionReport) -> Result<()> {
        for &id in order {
            let Some(parent_id) = self.nodes[id.0].parent else {
                continue;
            };
            let child = &self.nodes[id.0];
            let (Some(join), Some(child_frame)) = (child.join.as_ref(), child.result.as_ref()) else {
                continue;
            };
            let Some(parent_frame) = self.nodes[parent_id.0].result.as_ref() else {
                continue;
            };

            let merged = join.apply(parent_frame, child_frame);
            let child_name = child.name().to_string();
            let parent_name = self.nodes[parent_id.0].name().to_string();

            match merged {
                Ok(frame) => {
                    self.emit(
                        run_id,
                        Some(&child_name),
                        LogLevel::Debug,
                        format!("Joined into {} ({} rows)", parent_name, frame.num_rows()),
                    );
                    self.nodes[parent_id.0].result = Some(frame);
                }
                Err(err) => match self.config.join_error_policy {
                    JoinErrorPolicy::Abort => {
                        self.emit(run_id, Some(&child_name), LogLevel::Error, err.to_string());
                        return Err(err);
                    }
                    JoinErrorPolicy::KeepParent => {
                        self.emit(run_id, Some(&child_name), LogLevel::Warn, err.to_string());
                        report.join_failures.push(JoinFailure {
                            child: child_name,
                            parent: parent_name,
                            message: err.to_string(),
                        });
                    }
                },
            }
        }
        Ok(())
    }

    fn emit(&self, run_id: Uuid, node: Option<&str>, level: LogLevel, message: impl Into<String>) {
        let entry = self.log.record(Some(run_id), node, level, message);
        if !self.config.echo_log {
            return;
        }
        let node = node.unwrap_or("-");
        match level {
            LogLevel::Debug => debug!(run = %run_id, node, "{}", entry.message),
            LogLevel::Info => info!(run = %run_id, node, "{}", entry.message),
            LogLevel::Warn => warn!(run = %run_id, node, "{}", entry.message),
            LogLevel::Error => error!(run = %run_id, node, "{}", entry.message),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause");
    format!("driver panicked: {}", detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::connector::MemoryInterface;
    use crate::node::QueryNode;
    use querygraph_core::ErrorKind;
    use querygraph_template::{Dialect, RenderedQuery};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn albums() -> Frame {
        Frame::builder()
            .column("id", [1i64, 2, 3])
            .column("title", ["A", "B", "C"])
            .build()
            .unwrap()
    }

    fn tracks() -> Frame {
        Frame::builder()
            .column("album_id", [1i64, 1, 2])
            .column("track", ["t1", "t2", "t3"])
            .build()
            .unwrap()
    }

    fn fixed(name: &str, query: &str, frame: Frame) -> QueryNode {
        QueryNode::new(name, query, MemoryInterface::fixed(Dialect::Sqlite, frame).boxed()).unwrap()
    }

    fn failing(name: &str) -> QueryNode {
        QueryNode::new(name, "SELECT 1", MemoryInterface::failing(Dialect::Sqlite, "boom").boxed()).unwrap()
    }

    /// Node that appends its name to `order` when its query arrives
    fn traced(name: &str, order: &Arc<Mutex<Vec<String>>>, latency_ms: u64) -> QueryNode {
        let order = Arc::clone(order);
        let label = name.to_string();
        let db = MemoryInterface::new(Dialect::Sqlite, move |_| {
            order.lock().unwrap().push(label.clone());
            Ok(Frame::builder().column("id", [1i64]).build().unwrap())
        })
        .with_latency(Duration::from_millis(latency_ms));
        QueryNode::new(name, "SELECT id", db.boxed()).unwrap()
    }

    #[tokio::test]
    async fn test_dependent_parameters_render_from_parent() {
        let db = MemoryInterface::fixed(Dialect::Sqlite, tracks());
        let recorder = db.recorder();
        let mut graph = QueryGraph::new();
        graph.add_node(fixed("albums", "SELECT * FROM albums", albums())).unwrap();
        graph
            .add_node(
                QueryNode::new(
                    "tracks",
                    "SELECT * FROM tracks WHERE album_id IN {{ id -> list:int }}",
                    db.boxed(),
                )
                .unwrap(),
            )
            .unwrap();
        graph.left_join("tracks", "albums", [("id", "album_id")]).unwrap();

        let outcome = graph.execute(None).await.unwrap();
        assert_eq!(
            recorder.queries(),
            vec![RenderedQuery::Text(
                "SELECT * FROM tracks WHERE album_id IN (1, 2, 3)".into()
            )]
        );
        assert_eq!(outcome.frame.num_rows(), 4);
        assert_eq!(
            outcome.frame.columns(),
            &["id", "title", "album_id", "track"].map(String::from)
        );
        assert!(outcome.report.is_success());
        assert_eq!(graph.status("tracks"), Some(NodeStatus::Done));
        assert_eq!(graph.result("tracks").unwrap().num_rows(), 3);
    }

    #[tokio::test]
    async fn test_inner_join_restricts_rows() {
        let mut graph = QueryGraph::new();
        graph.add_node(fixed("albums", "SELECT 1", albums())).unwrap();
        graph.add_node(fixed("tracks", "SELECT 2", tracks())).unwrap();
        graph.inner_join("tracks", "albums", [("id", "album_id")]).unwrap();

        let frame = graph.execute_sequential(None).await.unwrap().into_frame();
        let ids: Vec<_> = frame.column("id").unwrap().to_vec();
        assert_eq!(
            ids,
            vec![Some(Value::Int(1)), Some(Value::Int(1)), Some(Value::Int(2))]
        );
    }

    #[tokio::test]
    async fn test_generation_barrier() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut graph = QueryGraph::new();
        graph.add_node(traced("root", &order, 0)).unwrap();
        graph.add_node(traced("slow", &order, 40)).unwrap();
        graph.add_node(traced("fast", &order, 0)).unwrap();
        graph.add_node(traced("grandchild", &order, 0)).unwrap();
        graph.left_join("slow", "root", [("id", "id")]).unwrap();
        graph.left_join("fast", "root", [("id", "id")]).unwrap();
        graph.left_join("grandchild", "fast", [("id", "id")]).unwrap();

        graph.execute(None).await.unwrap();

        let order = order.lock().unwrap().clone();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], "root");
        assert_eq!(order[3], "grandchild");
    }

    #[tokio::test]
    async fn test_sibling_failure_is_isolated() {
        let mut graph = QueryGraph::new();
        graph.add_node(fixed("root", "SELECT 1", albums())).unwrap();
        graph.add_node(failing("a")).unwrap();
        graph.add_node(fixed("a_child", "SELECT 2", tracks())).unwrap();
        graph.add_node(fixed("b", "SELECT 3", tracks())).unwrap();
        graph.left_join("a", "root", [("id", "album_id")]).unwrap();
        graph.left_join("a_child", "a", [("album_id", "album_id")]).unwrap();
        graph.left_join("b", "root", [("id", "album_id")]).unwrap();

        let outcome = graph.execute(None).await.unwrap();
        let report = &outcome.report;
        assert_eq!(report.failed_nodes(), vec!["a"]);
        assert_eq!(report.skipped_nodes(), vec!["a_child"]);
        assert_eq!(report.failure("a").unwrap().kind, ErrorKind::Execution);
        assert!(report.completed.contains(&"b".to_string()));

        assert!(outcome.frame.has_column("track"));
        assert_eq!(outcome.frame.num_rows(), 4);
        assert_eq!(graph.status("a_child"), Some(NodeStatus::Failed));
        assert!(graph.node("a_child").unwrap().was_skipped());
        assert!(graph.log().for_node("a_child").iter().any(|e| e.message == "Skipped"));
    }

    #[tokio::test]
    async fn test_driver_errors_are_reported_as_execution() {
        let db = MemoryInterface::new(Dialect::Sqlite, |_| Err(Error::MissingData("socket closed".into())));
        let mut graph = QueryGraph::new();
        graph.add_node(fixed("root", "SELECT 1", albums())).unwrap();
        graph.add_node(QueryNode::new("a", "SELECT 2", db.boxed()).unwrap()).unwrap();
        graph.left_join("a", "root", [("id", "album_id")]).unwrap();

        let outcome = graph.execute(None).await.unwrap();
        let failure = outcome.report.failure("a").unwrap();
        assert_eq!(failure.kind, ErrorKind::Execution);
        assert!(failure.message.contains("socket closed"));
        assert!(matches!(graph.error("a"), Some(Error::Execution(_))));
    }

    #[tokio::test]
    async fn test_driver_panic_fails_only_its_node() {
        for mode in [ExecutionMode::Parallel, ExecutionMode::Sequential] {
            let db = MemoryInterface::new(Dialect::Sqlite, |_| panic!("connection pool gone"));
            let mut graph = QueryGraph::new();
            graph.add_node(fixed("root", "SELECT 1", albums())).unwrap();
            graph.add_node(QueryNode::new("a", "SELECT 2", db.boxed()).unwrap()).unwrap();
            graph.add_node(fixed("b", "SELECT 3", tracks())).unwrap();
            graph.left_join("a", "root", [("id", "album_id")]).unwrap();
            graph.left_join("b", "root", [("id", "album_id")]).unwrap();

            let outcome = graph.execute_with_mode(mode, None).await.unwrap();
            assert_eq!(outcome.report.failed_nodes(), vec!["a"]);
            assert!(outcome.report.failure("a").unwrap().message.contains("connection pool gone"));
            assert_eq!(graph.status("b"), Some(NodeStatus::Done));
            assert!(outcome.frame.has_column("track"));
        }
    }

    #[tokio::test]
    async fn test_fail_on_any_node() {
        let mut graph = QueryGraph::with_config(ExecutionConfig::strict());
        graph.add_node(fixed("root", "SELECT 1", albums())).unwrap();
        graph.add_node(failing("a")).unwrap();
        graph.left_join("a", "root", [("id", "album_id")]).unwrap();

        let err = graph.execute(None).await.unwrap_err();
        assert_eq!(err, Error::Execution("boom".into()));
    }

    #[tokio::test]
    async fn test_root_failure_is_fatal() {
        let mut graph = QueryGraph::new();
        graph.add_node(failing("root")).unwrap();
        graph.add_node(fixed("a", "SELECT 1", tracks())).unwrap();
        graph.left_join("a", "root", [("id", "album_id")]).unwrap();

        let err = graph.execute(None).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, Error::RootFailed { ref node, .. } if node == "root"));
        assert!(graph.node("a").unwrap().was_skipped());
    }

    #[tokio::test]
    async fn test_disconnected_graph_does_not_run() {
        let db = MemoryInterface::fixed(Dialect::Sqlite, albums());
        let recorder = db.recorder();
        let mut graph = QueryGraph::new();
        graph.add_node(QueryNode::new("a", "SELECT 1", db.boxed()).unwrap()).unwrap();
        graph.add_node(fixed("b", "SELECT 2", tracks())).unwrap();

        let err = graph.execute(None).await.unwrap_err();
        assert_eq!(err, Error::DisconnectedGraph { nodes: 2, edges: 0 });
        assert_eq!(recorder.query_count(), 0);
    }

    #[tokio::test]
    async fn test_join_error_policy() {
        let build = |config: ExecutionConfig| {
            let mut graph = QueryGraph::with_config(config);
            graph.add_node(fixed("root", "SELECT 1", albums())).unwrap();
            graph.add_node(fixed("a", "SELECT 2", tracks())).unwrap();
            graph.left_join("a", "root", [("id", "missing")]).unwrap();
            graph
        };

        let err = build(ExecutionConfig::default()).execute(None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::JoinColumn);

        let outcome = build(ExecutionConfig::lenient()).execute(None).await.unwrap();
        assert_eq!(outcome.frame, albums());
        assert_eq!(outcome.report.join_failures.len(), 1);
        assert_eq!(outcome.report.join_failures[0].child, "a");
    }

    #[tokio::test]
    async fn test_independent_values_and_rerun() {
        let db = MemoryInterface::fixed(Dialect::Postgres, albums());
        let recorder = db.recorder();
        let mut graph = QueryGraph::with_config(ExecutionConfig::sequential());
        graph
            .add_node(
                QueryNode::new("albums", "SELECT * FROM albums WHERE title = {% title -> str %}", db.boxed())
                    .unwrap(),
            )
            .unwrap();

        let mut values = HashMap::new();
        values.insert("title".to_string(), Value::from("it's"));
        let first = graph.execute(Some(&values)).await.unwrap();
        let second = graph.execute(Some(&values)).await.unwrap();

        assert_ne!(first.report.run_id, second.report.run_id);
        assert_eq!(recorder.query_count(), 2);
        assert_eq!(
            recorder.queries()[0],
            RenderedQuery::Text("SELECT * FROM albums WHERE title = 'it''s'".into())
        );
        assert_eq!(graph.log().for_run(second.report.run_id).len(), 4);
    }
}
