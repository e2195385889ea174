//! Execution reports

use chrono::{DateTime, Utc};
use querygraph_core::{Error, ErrorKind, Frame};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A node that did not produce a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub node: String,
    pub kind: ErrorKind,
    pub message: String,
    /// Never ran because an ancestor failed
    pub skipped: bool,
}

impl NodeFailure {
    pub fn from_error(node: impl Into<String>, error: &Error, skipped: bool) -> Self {
        Self {
            node: node.into(),
            kind: error.kind(),
            message: error.to_string(),
            skipped,
        }
    }
}

/// A join that could not be applied during folding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinFailure {
    pub child: String,
    pub parent: String,
    pub message: String,
}

/// Summary of one execution pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Node names per generation, root first
    pub generations: Vec<Vec<String>>,
    /// Nodes that finished, in completion order
    pub completed: Vec<String>,
    pub failures: Vec<NodeFailure>,
    pub join_failures: Vec<JoinFailure>,
}

impl ExecutionReport {
    pub(crate) fn start(run_id: Uuid, generations: Vec<Vec<String>>) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            started_at: now,
            finished_at: now,
            generations,
            completed: Vec::new(),
            failures: Vec::new(),
            join_failures: Vec::new(),
        }
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Utc::now();
    }

    /// Returns true if every node ran and every join applied
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.join_failures.is_empty()
    }

    /// Nodes that ran and failed
    pub fn failed_nodes(&self) -> Vec<&str> {
        self.failures
            .iter()
            .filter(|f| !f.skipped)
            .map(|f| f.node.as_str())
            .collect()
    }

    /// Nodes that never ran
    pub fn skipped_nodes(&self) -> Vec<&str> {
        self.failures
            .iter()
            .filter(|f| f.skipped)
            .map(|f| f.node.as_str())
            .collect()
    }

    pub fn failure(&self, node: &str) -> Option<&NodeFailure> {
        self.failures.iter().find(|f| f.node == node)
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "run {}: {} completed, {} failed, {} skipped",
            self.run_id,
            self.completed.len(),
            self.failed_nodes().len(),
            self.skipped_nodes().len()
        )?;
        for failure in &self.failures {
            let tag = if failure.skipped { "skipped" } else { "failed" };
            writeln!(f, "  {} {} ({}): {}", tag, failure.node, failure.kind, failure.message)?;
        }
        for failure in &self.join_failures {
            writeln!(f, "  join {} -> {}: {}", failure.child, failure.parent, failure.message)?;
        }
        Ok(())
    }
}

/// Result frame of an execution plus its report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub frame: Frame,
    pub report: ExecutionReport,
}

impl ExecutionOutcome {
    pub fn into_frame(self) -> Frame {
        self.frame
    }
}
