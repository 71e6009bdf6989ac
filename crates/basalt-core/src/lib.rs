//! Core intermediate representation, pass traits, and compile options for Basalt.
//!
//! This crate provides the foundational abstractions the compiler crate
//! builds on:
//! - Module/function dataflow IR (`Module`, `Function`, `OpNode`, `ValueDef`)
//! - `ModulePass` / `FunctionPass` traits for pipeline stages
//! - `CompileOptions`, the per-compilation policy record

pub mod broadcast;
pub mod ir;
pub mod options;
pub mod pass;
pub mod types;

// Re-export commonly used types
pub use broadcast::broadcast_shape;
pub use ir::{Function, GlobalBuffer, GlobalId, Module, OpId, OpNode, ValueData, ValueDef, ValueId};
pub use options::{CompileOptions, TpuTarget, SUPPORTED_DATA_FORMATS};
pub use pass::{FunctionPass, ModulePass};
pub use types::{AttributeValue, ConstValue, DataType, Shape, ValueType};

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for compilation.
///
/// All pipeline failures are fatal: the pass manager aborts the whole
/// compilation at the first error, with no partial output and no retry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A stage's required invariant does not hold on entry.
    #[error("precondition violated for stage '{stage}': {detail}")]
    Precondition { stage: String, detail: String },

    /// A transformation could not find a valid rewrite for an op.
    #[error("stage '{stage}' failed on op '{op}': {detail}")]
    PassFailed {
        stage: String,
        op: String,
        detail: String,
    },

    /// Inconsistent compile options, rejected before any stage runs.
    #[error("invalid compile options: {0}")]
    Config(String),

    #[error("invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("shape error: {0}")]
    Shape(String),
}
