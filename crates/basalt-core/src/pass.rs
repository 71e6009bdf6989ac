//! Pass traits and scoping.
//!
//! A pass is a named, in-place rewrite over the module being compiled. It
//! declares a precondition (an invariant the graph must satisfy on entry)
//! and is scoped either to the whole module or to a single function:
//!
//! - `ModulePass`: sees the entire module. Module-scoped stages act as
//!   synchronization barriers in the pipeline.
//! - `FunctionPass`: sees one function at a time. Each function's rewrite
//!   is independent of every other function's, so the pass manager may run
//!   them in parallel within a stage.
//!
//! Every pass must preserve the function's external contract (input/output
//! lists); it may otherwise add, delete, or replace ops freely.

use crate::Result;
use crate::ir::{Function, Module};

/// A pass scoped to the whole module.
///
/// # Return value
///
/// `run()` returns `Ok(true)` if the pass changed the module, `Ok(false)`
/// otherwise. The pass manager logs the flag; it does not retry or skip
/// stages based on it.
pub trait ModulePass: Send + Sync {
    /// Pass name (used for logging, tracing, and error reporting).
    fn name(&self) -> &str;

    /// Invariant the module must satisfy before the pass runs.
    ///
    /// The pass manager calls this before `run()` and aborts the whole
    /// compilation with a precondition error if it fails.
    fn precondition(&self, _module: &Module) -> Result<()> {
        Ok(())
    }

    /// Run the pass.
    fn run(&self, module: &mut Module) -> Result<bool>;
}

/// A pass scoped to a single function.
pub trait FunctionPass: Send + Sync {
    /// Pass name (used for logging, tracing, and error reporting).
    fn name(&self) -> &str;

    /// Invariant each function must satisfy before the pass runs on it.
    fn precondition(&self, _function: &Function) -> Result<()> {
        Ok(())
    }

    /// Run the pass on one function.
    fn run(&self, function: &mut Function) -> Result<bool>;
}
