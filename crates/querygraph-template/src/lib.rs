//! QueryGraph Template Engine
//!
//! Parameterized query templates, per-dialect literal conversion and the
//! expression language used inside parameters and manipulations.
//!
//! # Modules
//!
//! - `convert` - Render types and the value to literal converter
//! - `dialect` - Dialect syntax and rendered query shapes
//! - `lexer` - Expression tokenizer
//! - `expression` - Shunting-yard compilation to postfix
//! - `evaluator` - Postfix evaluation over scalars and columns
//! - `functions` - Builtin `str`, `math`, `datetime` and `as_type` functions
//! - `parameter` - `{{ }}` / `{% %}` parameter parsing and rendering
//! - `template` - Template scanning and rendering

pub mod convert;
pub mod dialect;
pub mod evaluator;
pub mod expression;
pub mod functions;
pub mod lexer;
pub mod parameter;
pub mod template;

pub use convert::{Container, Literal, RenderSpec, RenderType, TypeConverter};
pub use dialect::{Dialect, RenderedQuery};
pub use evaluator::{Datum, Scope};
pub use expression::{BinaryOp, Expression, Instruction};
pub use functions::{Args, Builtin, FunctionRegistry};
pub use parameter::{ParameterKind, ParameterSource, TemplateParameter};
pub use template::{QueryTemplate, TemplateToken};
