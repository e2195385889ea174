//! QueryGraph Core Library
//!
//! This crate provides the fundamental types and error handling shared by
//! every QueryGraph crate.
//!
//! # Modules
//!
//! - `error` - Error types, error kinds and result aliases
//! - `value` - Runtime values used by parameters, expressions and frames
//! - `frame` - Tabular results and relational merges

pub mod error;
pub mod frame;
pub mod value;

pub use error::{Error, ErrorKind, JoinSide, Result};
pub use frame::{Cell, Frame, FrameBuilder, JoinKind};
pub use value::{DATE_FORMAT, DATETIME_FORMAT, TIME_FORMAT, Value, ValueKind, distinct};
