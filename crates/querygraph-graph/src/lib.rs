//! QueryGraph Graph Engine
//!
//! Builds trees of query nodes over heterogeneous data sources and executes
//! them generation by generation.
//!
//! # Overview
//!
//! The graph engine provides:
//! - Database connector contract and registry, with an in-memory driver
//! - Query nodes with field projection and post-query manipulations
//! - Join relationships and the spanning-tree graph structure
//! - The two-phase (execute, then fold) scheduler with reports and logs

pub mod config;
pub mod connector;
pub mod executor;
pub mod graph;
pub mod join;
pub mod log;
pub mod manipulation;
pub mod node;
pub mod report;

pub use config::{ExecutionConfig, ExecutionMode, JoinErrorPolicy};
pub use connector::{
    ConnectorFactory, ConnectorRegistry, ConnectorSpec, DbInterface, InsertPayload,
    MemoryInterface, MemoryRecorder, Responder,
};
pub use graph::QueryGraph;
pub use join::JoinContext;
pub use log::{ExecutionLog, LogEntry, LogLevel};
pub use manipulation::{Manipulation, ManipulationSet};
pub use node::{NodeId, NodeStatus, QueryNode};
pub use report::{ExecutionOutcome, ExecutionReport, JoinFailure, NodeFailure};
