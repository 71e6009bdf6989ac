//! The fixed lowering pipeline and the configuration-gated assembler.
//!
//! `register_lowering_pipeline` appends the configuration-independent
//! portion of the pipeline: the fixed, ordered stage sequence that takes a
//! module from high-level tensor ops to buffer-level, tiled, vectorized
//! form. The order embodies hard dependencies (composite decomposition
//! before shape inference, canonicalization before bufferization,
//! deallocation after all bufferization) and is not reorderable through any
//! public API.
//!
//! `build_pipeline` wraps it with the stages `CompileOptions` gates on:
//! grappler and layout assignment before lowering; device annotation, the
//! TPU subset, fallback marking, invariant hoisting, and stream
//! optimization after it. Stage selection is a deterministic function of
//! the options alone, decided once at construction time.

use crate::catalog::StageCatalog;
use crate::passes::{
    AddProducerVersionPass, BroadcastPropagationPass, BufferDeallocationPass,
    BufferForwardingPass, BufferizePass, CanonicalizePass, ConstantsToGlobalsPass,
    CopyRemovalPass, CsePass, ElementwiseFusionPass, FissionPass, LegalizePass,
    MatmulSpecializationPass, ShapeInferencePass, TileAndVectorizePass,
};
use crate::pipeline::PassManager;
use basalt_core::{CompileOptions, Result, TpuTarget};

/// Names of the fixed lowering stages, in execution order.
pub const LOWERING_STAGES: &[&str] = &[
    "fission",
    "bootstrap-version",
    "shape-inference",
    "legalize",
    "broadcast-propagation",
    "cse",
    "canonicalize",
    "elementwise-fusion",
    "cse",
    "canonicalize",
    "bufferize",
    "constants-to-globals",
    "canonicalize",
    "buffer-deallocation",
    "buffer-forwarding",
    "copy-removal",
    "matmul-specialization",
    "canonicalize",
    "tile-and-vectorize",
    "cse",
    "canonicalize",
];

/// Append the default lowering pipeline to a pass manager.
///
/// This is the configuration-independent portion of compilation; a
/// configuration-aware caller (see [`build_pipeline`]) wraps it with the
/// gated stages.
pub fn register_lowering_pipeline(pm: &mut PassManager) {
    // Break composite operations into primitives before anything looks at
    // shapes.
    pm.add_function_pass(FissionPass);

    // Run shape inference to propagate potentially specialized input
    // shapes. The bootstrap stage satisfies its version precondition.
    pm.add_pass(AddProducerVersionPass);
    pm.add_pass(ShapeInferencePass);

    // Rewrite to the intermediate dialect.
    pm.add_function_pass(LegalizePass);

    // Move up broadcasting operations to allow for more fusion
    // opportunities.
    pm.add_function_pass(BroadcastPropagationPass);
    pm.add_pass(CsePass);
    pm.add_pass(CanonicalizePass);

    // Fuse elementwise operations.
    pm.add_function_pass(ElementwiseFusionPass);

    // Always run canonicalization (which does dead code removal) before
    // bufferizing anything: buffers must not be allocated for dead values.
    pm.add_pass(CsePass);
    pm.add_pass(CanonicalizePass);

    // Bufferize the compute operations and function boundaries.
    pm.add_pass(BufferizePass);

    // Turn tensor constants into global buffers.
    pm.add_pass(ConstantsToGlobalsPass);

    // Dead code removal again before liveness is computed.
    pm.add_pass(CanonicalizePass);

    // Deallocate all temporary buffers.
    pm.add_function_pass(BufferDeallocationPass);

    // Trivial buffer forwarding across the copies bufferization introduced.
    pm.add_function_pass(BufferForwardingPass);

    // Remove trivial copy operations.
    pm.add_function_pass(CopyRemovalPass);

    // Specialize matmul to dot, matvec or vecmat, and immediately
    // canonicalize to clean up not-taken branches.
    pm.add_function_pass(MatmulSpecializationPass);
    pm.add_pass(CanonicalizePass);

    // Tile and vectorize the remaining compute operations.
    pm.add_function_pass(TileAndVectorizePass);
    pm.add_pass(CsePass);
    pm.add_pass(CanonicalizePass);
}

/// Assemble the full pipeline for one compilation request.
///
/// Validates the options eagerly, then selects stages:
/// - `enable_grappler` → graph pre-optimization before lowering,
/// - `force_data_format` → layout assignment before lowering,
/// - the fixed lowering pipeline, always,
/// - device assignment, always (driven by the device fields),
/// - `tpu_target` → exactly one of the TPU stage subsets, or none,
/// - `enable_native_ops == false` → fallback marking,
/// - `hoist_invariant_ops` → invariant hoisting,
/// - `enable_optimizer` → stream optimization.
///
/// # Errors
///
/// Returns a configuration error if the options are inconsistent; no stage
/// runs in that case.
pub fn build_pipeline(options: &CompileOptions) -> Result<PassManager> {
    options.validate()?;

    let catalog = StageCatalog::with_defaults();
    let mut pm = PassManager::new();

    if options.enable_grappler {
        pm.add_stage(catalog.build("grappler", options)?);
    }
    if !options.force_data_format.is_empty() {
        pm.add_stage(catalog.build("layout-assignment", options)?);
    }

    register_lowering_pipeline(&mut pm);

    pm.add_stage(catalog.build("device-assignment", options)?);
    match options.tpu_target {
        TpuTarget::NoTpu => {}
        TpuTarget::Tpurt => {
            pm.add_stage(catalog.build("tpurt-rewrite", options)?);
        }
        TpuTarget::TfFallback => {
            pm.add_stage(catalog.build("tpu-fallback-rewrite", options)?);
        }
    }
    if !options.enable_native_ops {
        pm.add_stage(catalog.build("fallback-marking", options)?);
    }
    if options.hoist_invariant_ops {
        pm.add_stage(catalog.build("hoist-invariants", options)?);
    }
    if options.enable_optimizer {
        pm.add_stage(catalog.build("stream-optimization", options)?);
    }

    Ok(pm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_pipeline_matches_documented_order() {
        let mut pm = PassManager::new();
        register_lowering_pipeline(&mut pm);
        assert_eq!(pm.stage_names(), LOWERING_STAGES);
    }

    #[test]
    fn test_default_options_assembly() {
        let pm = build_pipeline(&CompileOptions::default()).unwrap();
        let names = pm.stage_names();

        // No grappler, no layout, no TPU stages, no fallback marking, no
        // hoisting; device assignment and the optimizer set always ride
        // along.
        assert!(!names.contains(&"grappler"));
        assert!(!names.contains(&"layout-assignment"));
        assert!(!names.contains(&"tpurt-rewrite"));
        assert!(!names.contains(&"tpu-fallback-rewrite"));
        assert!(!names.contains(&"fallback-marking"));
        assert!(!names.contains(&"hoist-invariants"));
        assert!(names.contains(&"device-assignment"));
        assert!(names.contains(&"stream-optimization"));
        assert_eq!(names.len(), LOWERING_STAGES.len() + 2);
    }

    #[test]
    fn test_gated_stages_included_on_demand() {
        let options = CompileOptions {
            enable_grappler: true,
            force_data_format: "NCHW".to_string(),
            tpu_target: TpuTarget::Tpurt,
            enable_native_ops: false,
            hoist_invariant_ops: true,
            enable_optimizer: false,
            ..Default::default()
        };
        let pm = build_pipeline(&options).unwrap();
        let names = pm.stage_names();

        assert_eq!(names[0], "grappler");
        assert_eq!(names[1], "layout-assignment");
        assert!(names.contains(&"tpurt-rewrite"));
        assert!(names.contains(&"fallback-marking"));
        assert!(names.contains(&"hoist-invariants"));
        assert!(!names.contains(&"stream-optimization"));
    }

    #[test]
    fn test_tpu_subsets_mutually_exclusive() {
        let tpurt = build_pipeline(&CompileOptions {
            tpu_target: TpuTarget::Tpurt,
            ..Default::default()
        })
        .unwrap();
        assert!(tpurt.stage_names().contains(&"tpurt-rewrite"));
        assert!(!tpurt.stage_names().contains(&"tpu-fallback-rewrite"));

        let fallback = build_pipeline(&CompileOptions {
            tpu_target: TpuTarget::TfFallback,
            ..Default::default()
        })
        .unwrap();
        assert!(fallback.stage_names().contains(&"tpu-fallback-rewrite"));
        assert!(!fallback.stage_names().contains(&"tpurt-rewrite"));
    }

    #[test]
    fn test_invalid_options_rejected_before_assembly() {
        let options = CompileOptions {
            cost_threshold: 10,
            upper_cost_threshold: 5,
            ..Default::default()
        };
        assert!(build_pipeline(&options).is_err());
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let options = CompileOptions {
            enable_grappler: true,
            tpu_target: TpuTarget::TfFallback,
            ..Default::default()
        };
        let a: Vec<String> = build_pipeline(&options)
            .unwrap()
            .stage_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        let b: Vec<String> = build_pipeline(&options)
            .unwrap()
            .stage_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(a, b);
    }
}
