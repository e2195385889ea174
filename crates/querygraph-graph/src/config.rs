//! Execution configuration

use serde::{Deserialize, Serialize};

/// How a generation's nodes are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Concurrently, bounded by `max_concurrency`
    Parallel,
    /// One node at a time
    Sequential,
}

/// What the fold phase does when a join column is missing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinErrorPolicy {
    /// Fail the whole execution
    Abort,
    /// Record the failure and keep the parent's frame unjoined
    KeepParent,
}

/// Execution configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Dispatch mode for each generation
    pub mode: ExecutionMode,

    /// Maximum nodes in flight within a generation
    pub max_concurrency: usize,

    /// Fold-phase behavior on a missing join column
    pub join_error_policy: JoinErrorPolicy,

    /// Treat any node failure as fatal, not only the root's
    pub fail_on_any_node: bool,

    /// Mirror execution log entries to tracing
    pub echo_log: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Parallel,
            max_concurrency: 16,
            join_error_policy: JoinErrorPolicy::Abort,
            fail_on_any_node: false,
            echo_log: true,
        }
    }
}

impl ExecutionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// One node at a time, for deterministic debugging
    pub fn sequential() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            max_concurrency: 1,
            ..Default::default()
        }
    }

    /// Any failure aborts the run
    pub fn strict() -> Self {
        Self {
            fail_on_any_node: true,
            join_error_policy: JoinErrorPolicy::Abort,
            ..Default::default()
        }
    }

    /// Return whatever could be joined
    pub fn lenient() -> Self {
        Self {
            fail_on_any_node: false,
            join_error_policy: JoinErrorPolicy::KeepParent,
            ..Default::default()
        }
    }

    /// Builder: set dispatch mode
    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Builder: set the concurrency bound (at least 1)
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Builder: set the join error policy
    pub fn join_error_policy(mut self, policy: JoinErrorPolicy) -> Self {
        self.join_error_policy = policy;
        self
    }

    /// Builder: fail on any node failure
    pub fn fail_on_any_node(mut self, fail: bool) -> Self {
        self.fail_on_any_node = fail;
        self
    }

    /// Builder: mirror log entries to tracing
    pub fn echo_log(mut self, echo: bool) -> Self {
        self.echo_log = echo;
        self
    }
}
