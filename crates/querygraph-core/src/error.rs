//! Error types for QueryGraph
//!
//! Every fallible operation in the workspace returns [`Result`], and every
//! failure is classified by an [`ErrorKind`] so execution reports can
//! enumerate failures without carrying the errors themselves.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The main error type for QueryGraph operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // ========== Compile Errors ==========
    #[error("Syntax error at line {line}, column {column}: {message}")]
    DslSyntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Parameter parse error in '{parameter}': {message}")]
    ParameterParse { parameter: String, message: String },

    // ========== Structural Errors ==========
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Duplicate node name: {0}")]
    DuplicateNode(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Node '{child}' already has parent '{parent}'")]
    DuplicateParent { child: String, parent: String },

    #[error("Joining '{child}' under '{parent}' would create a cycle")]
    Cycle { child: String, parent: String },

    #[error("Graph is not a spanning tree: {nodes} nodes and {edges} edges")]
    DisconnectedGraph { nodes: usize, edges: usize },

    // ========== Driver Errors ==========
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Execution error: {0}")]
    Execution(String),

    // ========== Rendering Errors ==========
    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    // ========== Join Errors ==========
    #[error("Join column '{column}' not found in {side} frame")]
    JoinColumn { column: String, side: JoinSide },

    // ========== Execution Outcome ==========
    #[error("Root node '{node}' failed: {message}")]
    RootFailed { node: String, message: String },
}

/// Result type alias for QueryGraph operations
pub type Result<T> = std::result::Result<T, Error>;

/// Which side of a join a missing column was looked up on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinSide {
    Parent,
    Child,
}

impl fmt::Display for JoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinSide::Parent => f.write_str("parent"),
            JoinSide::Child => f.write_str("child"),
        }
    }
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    DslSyntax,
    ParameterParse,
    Configuration,
    Cycle,
    DisconnectedGraph,
    Connection,
    Execution,
    MissingData,
    TypeConversion,
    Evaluation,
    JoinColumn,
    RootFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::DslSyntax => "DslSyntaxError",
            ErrorKind::ParameterParse => "ParameterParseError",
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::Cycle => "CycleError",
            ErrorKind::DisconnectedGraph => "DisconnectedGraphError",
            ErrorKind::Connection => "ConnectionError",
            ErrorKind::Execution => "ExecutionError",
            ErrorKind::MissingData => "MissingDataError",
            ErrorKind::TypeConversion => "TypeConversionError",
            ErrorKind::Evaluation => "EvaluationError",
            ErrorKind::JoinColumn => "JoinColumnError",
            ErrorKind::RootFailed => "RootFailedError",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DslSyntax { .. } => ErrorKind::DslSyntax,
            Error::ParameterParse { .. } => ErrorKind::ParameterParse,
            Error::Configuration(_)
            | Error::DuplicateNode(_)
            | Error::NodeNotFound(_)
            | Error::DuplicateParent { .. } => ErrorKind::Configuration,
            Error::Cycle { .. } => ErrorKind::Cycle,
            Error::DisconnectedGraph { .. } => ErrorKind::DisconnectedGraph,
            Error::Connection(_) => ErrorKind::Connection,
            Error::Execution(_) => ErrorKind::Execution,
            Error::MissingData(_) => ErrorKind::MissingData,
            Error::TypeConversion(_) => ErrorKind::TypeConversion,
            Error::Evaluation(_) => ErrorKind::Evaluation,
            Error::JoinColumn { .. } => ErrorKind::JoinColumn,
            Error::RootFailed { .. } => ErrorKind::RootFailed,
        }
    }

    /// Returns true for structural errors raised while building a graph.
    ///
    /// A cycle is a configuration error too.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Configuration | ErrorKind::Cycle
        )
    }

    /// Returns true if this error was raised by a database driver
    pub fn is_driver(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Execution(_))
    }

    /// Keep `Connection`/`Execution` as they are and fold anything else a
    /// driver returned into `Execution`
    pub fn into_driver(self) -> Self {
        if self.is_driver() {
            self
        } else {
            Error::Execution(self.to_string())
        }
    }

    /// Returns true if this error aborts a whole execution pass
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::RootFailed { .. } | Error::DisconnectedGraph { .. }
        )
    }

    /// Returns true if compilation produced this error
    pub fn is_compile(&self) -> bool {
        matches!(self, Error::DslSyntax { .. } | Error::ParameterParse { .. })
    }

    pub fn syntax(line: usize, column: usize, message: impl Into<String>) -> Self {
        Error::DslSyntax {
            line,
            column,
            message: message.into(),
        }
    }

    pub fn parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ParameterParse {
            parameter: parameter.into(),
            message: message.into(),
        }
    }
}
