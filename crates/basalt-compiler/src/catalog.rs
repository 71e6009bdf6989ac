//! Stage catalog: name → stage constructor.
//!
//! Every stage the pipeline can run is registered here under its name, so
//! name-driven tooling (and the configuration-gated assembler) can build
//! stages without knowing their concrete types.

use crate::passes::{
    AddProducerVersionPass, BroadcastPropagationPass, BufferDeallocationPass,
    BufferForwardingPass, BufferizePass, CanonicalizePass, ConstantsToGlobalsPass,
    CopyRemovalPass, CsePass, DeviceAssignmentPass, ElementwiseFusionPass, FallbackMarkingPass,
    FissionPass, GrapplerPass, HoistInvariantOpsPass, LayoutAssignmentPass, LegalizePass,
    MatmulSpecializationPass, ShapeInferencePass, StreamOptimizationPass, TfFallbackTpuPass,
    TileAndVectorizePass, TpurtRewritePass,
};
use crate::pipeline::PipelineStage;
use basalt_core::{CompileOptions, Error, Result};

use std::collections::HashMap;

/// Constructor for one stage. Stages that take no configuration ignore the
/// options argument.
pub type StageFactory = fn(&CompileOptions) -> PipelineStage;

/// Registry of stage constructors, keyed by stage name.
pub struct StageCatalog {
    factories: HashMap<&'static str, StageFactory>,
}

impl StageCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a catalog with every built-in stage registered.
    pub fn with_defaults() -> Self {
        let mut catalog = Self::new();

        catalog.register("fission", |_| {
            PipelineStage::Function(Box::new(FissionPass))
        });
        catalog.register("bootstrap-version", |_| {
            PipelineStage::Module(Box::new(AddProducerVersionPass))
        });
        catalog.register("shape-inference", |_| {
            PipelineStage::Module(Box::new(ShapeInferencePass))
        });
        catalog.register("legalize", |_| {
            PipelineStage::Function(Box::new(LegalizePass))
        });
        catalog.register("broadcast-propagation", |_| {
            PipelineStage::Function(Box::new(BroadcastPropagationPass))
        });
        catalog.register("cse", |_| PipelineStage::Module(Box::new(CsePass)));
        catalog.register("canonicalize", |_| {
            PipelineStage::Module(Box::new(CanonicalizePass))
        });
        catalog.register("elementwise-fusion", |_| {
            PipelineStage::Function(Box::new(ElementwiseFusionPass))
        });
        catalog.register("bufferize", |_| {
            PipelineStage::Module(Box::new(BufferizePass))
        });
        catalog.register("constants-to-globals", |_| {
            PipelineStage::Module(Box::new(ConstantsToGlobalsPass))
        });
        catalog.register("buffer-deallocation", |_| {
            PipelineStage::Function(Box::new(BufferDeallocationPass))
        });
        catalog.register("buffer-forwarding", |_| {
            PipelineStage::Function(Box::new(BufferForwardingPass))
        });
        catalog.register("copy-removal", |_| {
            PipelineStage::Function(Box::new(CopyRemovalPass))
        });
        catalog.register("matmul-specialization", |_| {
            PipelineStage::Function(Box::new(MatmulSpecializationPass))
        });
        catalog.register("tile-and-vectorize", |_| {
            PipelineStage::Function(Box::new(TileAndVectorizePass))
        });
        catalog.register("grappler", |_| {
            PipelineStage::Module(Box::new(GrapplerPass))
        });
        catalog.register("layout-assignment", |options| {
            PipelineStage::Function(Box::new(LayoutAssignmentPass::new(
                options.force_data_format.clone(),
            )))
        });
        catalog.register("device-assignment", |options| {
            PipelineStage::Module(Box::new(DeviceAssignmentPass::new(
                options.variable_device.clone(),
                options.default_device.clone(),
            )))
        });
        catalog.register("fallback-marking", |_| {
            PipelineStage::Module(Box::new(FallbackMarkingPass))
        });
        catalog.register("hoist-invariants", |_| {
            PipelineStage::Function(Box::new(HoistInvariantOpsPass))
        });
        catalog.register("tpurt-rewrite", |_| {
            PipelineStage::Module(Box::new(TpurtRewritePass))
        });
        catalog.register("tpu-fallback-rewrite", |_| {
            PipelineStage::Module(Box::new(TfFallbackTpuPass))
        });
        catalog.register("stream-optimization", |options| {
            PipelineStage::Function(Box::new(StreamOptimizationPass::new(options.clone())))
        });

        catalog
    }

    /// Register a stage constructor under a name.
    pub fn register(&mut self, name: &'static str, factory: StageFactory) -> &mut Self {
        self.factories.insert(name, factory);
        self
    }

    /// Construct the named stage.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no stage is registered under the
    /// name.
    pub fn build(&self, name: &str, options: &CompileOptions) -> Result<PipelineStage> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::Config(format!("unknown stage '{}'", name)))?;
        Ok(factory(options))
    }

    /// Check if a stage is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// All registered stage names, sorted.
    pub fn stage_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for StageCatalog {
    fn default() -> Self {
        Self::new()
    }
}
