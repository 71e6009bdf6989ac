//! Lowering compiler for Basalt.
//!
//! This crate lowers a high-level tensor-computation module into
//! buffer-level, tiled, vectorized form through a fixed, ordered sequence
//! of in-place rewrite stages:
//!
//! 1. **Fission** - composite ops become primitives
//! 2. **Shape inference** - every value gets a static shape (after the
//!    bootstrap stage satisfies its version precondition)
//! 3. **Legalization** - the high-level dialect becomes the intermediate
//!    dialect
//! 4. **Fusion rewrites** - broadcast propagation, elementwise fusion,
//!    with CSE + canonicalization after each rewrite stage
//! 5. **Bufferization** - tensors become explicit buffers, constants
//!    become globals
//! 6. **Buffer lifetime** - deallocation, forwarding, copy removal
//! 7. **Specialization, tiling and vectorization** - the final codegen
//!    strategy
//!
//! `CompileOptions` gates the optional stages (grappler, layout
//! assignment, TPU subsets, hoisting, stream optimization) and
//! parameterizes the auto-fusion cost policy; selection happens once, at
//! pipeline-construction time.
//!
//! # Example
//!
//! ```no_run
//! use basalt_compiler::lower_module;
//! use basalt_core::{CompileOptions, Module};
//!
//! # fn main() -> basalt_core::Result<()> {
//! let mut module = Module::new("model");
//! // ... build functions ...
//!
//! let options = CompileOptions::default();
//! lower_module(&mut module, &options)?;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod clustering;
pub mod lowering;
pub mod passes;
pub mod pipeline;

pub use catalog::{StageCatalog, StageFactory};
pub use lowering::{build_pipeline, register_lowering_pipeline, LOWERING_STAGES};
pub use pipeline::{PassManager, PipelineStage, StageTrace, TraceEvent};

use basalt_core::{CompileOptions, Module, Result};

/// Convenience entry point: assemble the pipeline for the given options and
/// run it over the module.
///
/// The module is rewritten in place into its fully lowered form.
///
/// # Errors
///
/// Returns an error if the options are inconsistent, if any stage's
/// precondition is violated, or if any rewrite fails. Failures abort the
/// whole compilation; there is no partial output and no retry.
#[tracing::instrument(skip_all, fields(module = module.name.as_str(), num_functions = module.functions.len()))]
pub fn lower_module(module: &mut Module, options: &CompileOptions) -> Result<()> {
    let pm = build_pipeline(options)?;
    pm.run(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lower_empty_module() {
        let mut module = Module::new("empty");
        lower_module(&mut module, &CompileOptions::default()).unwrap();

        // The bootstrap stage ran: the version attribute is present.
        assert!(module.has_attr(passes::PRODUCER_VERSION_ATTR));
    }

    #[test]
    fn test_invalid_options_never_touch_the_module() {
        let mut module = Module::new("m");
        let options = CompileOptions {
            cost_threshold: 0,
            ..Default::default()
        };
        assert!(lower_module(&mut module, &options).is_err());
        assert!(!module.has_attr(passes::PRODUCER_VERSION_ATTR));
    }
}
