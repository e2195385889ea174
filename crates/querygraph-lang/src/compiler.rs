//! Compile parsed programs into query graphs

use crate::ast::Program;
use crate::parser::parse;
use querygraph_core::{Error, Result};
use querygraph_graph::{
    ConnectorRegistry, ConnectorSpec, ExecutionConfig, ManipulationSet, QueryGraph, QueryNode,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Parse and compile a program with the default execution config
pub fn compile(source: &str, registry: &ConnectorRegistry) -> Result<QueryGraph> {
    compile_with_config(source, registry, ExecutionConfig::default())
}

/// Parse and compile a program
///
/// Nothing is returned unless every connector, node and join is valid.
pub fn compile_with_config(
    source: &str,
    registry: &ConnectorRegistry,
    config: ExecutionConfig,
) -> Result<QueryGraph> {
    let program = parse(source)?;
    Compiler::new(registry).build(&program, config)
}

/// Builds a [`QueryGraph`] from a [`Program`]
pub struct Compiler<'r> {
    registry: &'r ConnectorRegistry,
}

impl<'r> Compiler<'r> {
    pub fn new(registry: &'r ConnectorRegistry) -> Self {
        Self { registry }
    }

    pub fn build(&self, program: &Program, config: ExecutionConfig) -> Result<QueryGraph> {
        let mut connectors: HashMap<&str, ConnectorSpec> = HashMap::new();
        for decl in &program.connectors {
            if connectors.contains_key(decl.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "connector '{}' declared twice (line {})",
                    decl.name, decl.position.line
                )));
            }
            if !self.registry.contains(&decl.db_type) {
                return Err(Error::Configuration(format!(
                    "unknown database type '{}' for connector '{}' (line {})",
                    decl.db_type, decl.name, decl.position.line
                )));
            }
            let spec = decl
                .options
                .iter()
                .fold(ConnectorSpec::new(&decl.name, &decl.db_type), |spec, (k, v)| {
                    spec.with_option(k, v)
                });
            connectors.insert(&decl.name, spec);
        }

        let mut graph = QueryGraph::with_config(config);
        for decl in &program.nodes {
            let spec = connectors.get(decl.connector.as_str()).ok_or_else(|| {
                Error::Configuration(format!(
                    "node '{}' uses undeclared connector '{}' (line {})",
                    decl.name, decl.connector, decl.position.line
                ))
            })?;

            // One interface per node; siblings never share a connection
            let db = self.registry.connect(spec)?;
            let mut node = QueryNode::new(&decl.name, &decl.query, db)?
                .with_manipulations(decl.manipulations.iter().cloned().collect::<ManipulationSet>());
            if let Some(fields) = &decl.fields {
                node = node.with_fields(fields.iter().cloned());
            }
            graph.add_node(node)?;
            debug!("Compiled node {} using {}", decl.name, decl.connector);
        }

        for decl in &program.joins {
            graph.join(&decl.child, &decl.parent, decl.kind, decl.pairs())?;
        }

        if graph.is_spanning_tree() {
            info!(
                "Compiled graph with {} nodes and {} joins",
                graph.num_nodes(),
                graph.num_edges()
            );
        } else {
            warn!(
                "Compiled graph is not connected: {} nodes and {} joins",
                graph.num_nodes(),
                graph.num_edges()
            );
        }
        Ok(graph)
    }
}
