//! Abstract syntax tree for QueryGraph programs

use crate::lexer::Position;
use querygraph_core::JoinKind;
use querygraph_graph::Manipulation;
use serde::{Deserialize, Serialize};

/// A parsed program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub connectors: Vec<ConnectorDecl>,
    pub nodes: Vec<NodeDecl>,
    pub joins: Vec<JoinDecl>,
}

/// `name <- DbType(key='value', ...)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorDecl {
    pub name: String,
    pub db_type: String,
    pub options: Vec<(String, String)>,
    pub position: Position,
}

/// One `QUERY ... AS name` block of the RETRIEVE section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDecl {
    pub name: String,
    /// Template text between `QUERY |` and its `;`
    pub query: String,
    pub fields: Option<Vec<String>>,
    pub connector: String,
    pub manipulations: Vec<Manipulation>,
    pub position: Position,
}

/// `KIND (child[cols] ==> parent[cols])`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinDecl {
    pub kind: JoinKind,
    pub child: String,
    pub child_columns: Vec<String>,
    pub parent: String,
    pub parent_columns: Vec<String>,
    pub position: Position,
}

impl JoinDecl {
    /// `(parent column, child column)` pairs
    pub fn pairs(&self) -> Vec<(String, String)> {
        self.parent_columns
            .iter()
            .cloned()
            .zip(self.child_columns.iter().cloned())
            .collect()
    }
}
