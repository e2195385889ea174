//! QueryGraph - join parameterized queries across heterogeneous data sources
//!
//! This is the main library crate that re-exports all QueryGraph components.

pub use querygraph_core as core;
pub use querygraph_graph as graph;
pub use querygraph_lang as lang;
pub use querygraph_template as template;

// Re-export commonly used types
pub use querygraph_core::{Cell, Error, ErrorKind, Frame, JoinKind, Result, Value};

pub use querygraph_graph::{
    ConnectorRegistry, ConnectorSpec, DbInterface, ExecutionConfig, ExecutionLog,
    ExecutionMode, ExecutionOutcome, ExecutionReport, JoinErrorPolicy, Manipulation,
    ManipulationSet, MemoryInterface, NodeStatus, QueryGraph, QueryNode,
};
pub use querygraph_lang::{compile, compile_with_config};
pub use querygraph_template::{Dialect, Expression, QueryTemplate, RenderedQuery, TypeConverter};
