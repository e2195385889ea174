//! Join relationships between a node and its parent

use querygraph_core::{Error, Frame, JoinKind, JoinSide, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a child's result merges into its parent's
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinContext {
    kind: JoinKind,
    /// `(parent column, child column)` pairs
    pairs: Vec<(String, String)>,
}

impl JoinContext {
    pub fn new<I, P, C>(kind: JoinKind, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        let pairs: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(p, c)| (p.into(), c.into()))
            .collect();
        if pairs.is_empty() {
            return Err(Error::Configuration(
                "a join needs at least one column pair".to_string(),
            ));
        }
        Ok(Self { kind, pairs })
    }

    pub fn kind(&self) -> JoinKind {
        self.kind
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn parent_columns(&self) -> Vec<&str> {
        self.pairs.iter().map(|(p, _)| p.as_str()).collect()
    }

    pub fn child_columns(&self) -> Vec<&str> {
        self.pairs.iter().map(|(_, c)| c.as_str()).collect()
    }

    /// Merge a child's frame into its parent's
    pub fn apply(&self, parent: &Frame, child: &Frame) -> Result<Frame> {
        for (parent_col, child_col) in &self.pairs {
            if !parent.has_column(parent_col) {
                return Err(Error::JoinColumn {
                    column: parent_col.clone(),
                    side: JoinSide::Parent,
                });
            }
            if !child.has_column(child_col) {
                return Err(Error::JoinColumn {
                    column: child_col.clone(),
                    side: JoinSide::Child,
                });
            }
        }
        parent.merge(
            child,
            self.kind,
            &self.parent_columns(),
            &self.child_columns(),
        )
    }
}

impl fmt::Display for JoinContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parents = self.parent_columns().join(", ");
        let children = self.child_columns().join(", ");
        write!(f, "{} [{}] = [{}]", self.kind.as_str().to_uppercase(), parents, children)
    }
}
