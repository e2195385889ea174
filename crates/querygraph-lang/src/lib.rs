//! QueryGraph Language
//!
//! Compiles CONNECT/RETRIEVE/JOIN programs into executable query graphs.
//!
//! # Modules
//!
//! - `lexer` - logos tokens, source positions and raw block scanning
//! - `ast` - parsed program structure
//! - `parser` - recursive descent parser
//! - `compiler` - connector resolution and graph construction

pub mod ast;
pub mod compiler;
pub mod lexer;
pub mod parser;

pub use ast::{ConnectorDecl, JoinDecl, NodeDecl, Program};
pub use compiler::{Compiler, compile, compile_with_config};
pub use lexer::{Position, Token};
pub use parser::parse;
