//! Transformation passes for the lowering pipeline.
//!
//! Each pass is one named stage in the fixed lowering sequence (or one of
//! the configuration-gated extras). Passes rewrite the module in place and
//! must preserve every function's input/output contract.

mod bootstrap;
mod broadcast_propagation;
mod bufferize;
mod canonicalize;
mod copy_removal;
mod cse;
mod dealloc;
mod device;
mod fallback;
mod fission;
mod forwarding;
mod fusion;
mod globals;
mod grappler;
mod hoist;
mod layout;
mod legalize;
mod shape_inference;
mod specialize;
mod stream;
mod tiling;
mod tpu;

pub use bootstrap::{AddProducerVersionPass, PRODUCER_VERSION_ATTR};
pub use broadcast_propagation::BroadcastPropagationPass;
pub use bufferize::BufferizePass;
pub use canonicalize::CanonicalizePass;
pub use copy_removal::CopyRemovalPass;
pub use cse::CsePass;
pub use dealloc::BufferDeallocationPass;
pub use device::DeviceAssignmentPass;
pub use fallback::FallbackMarkingPass;
pub use fission::FissionPass;
pub use forwarding::BufferForwardingPass;
pub use fusion::ElementwiseFusionPass;
pub use globals::ConstantsToGlobalsPass;
pub use grappler::GrapplerPass;
pub use hoist::HoistInvariantOpsPass;
pub use layout::LayoutAssignmentPass;
pub use legalize::LegalizePass;
pub use shape_inference::ShapeInferencePass;
pub use specialize::MatmulSpecializationPass;
pub use stream::StreamOptimizationPass;
pub use tiling::TileAndVectorizePass;
pub use tpu::{TfFallbackTpuPass, TpurtRewritePass};

use basalt_core::OpNode;

/// Op kind without its dialect prefix.
pub(crate) fn base_kind(kind: &str) -> &str {
    kind.split_once('.').map(|(_, base)| base).unwrap_or(kind)
}

pub(crate) const ELEMENTWISE_BINARY: &[&str] = &["add", "mul", "sub", "div", "max"];
pub(crate) const ELEMENTWISE_UNARY: &[&str] = &["tanh", "exp", "neg"];

pub(crate) fn is_binary_elementwise(base: &str) -> bool {
    ELEMENTWISE_BINARY.contains(&base)
}

pub(crate) fn is_unary_elementwise(base: &str) -> bool {
    ELEMENTWISE_UNARY.contains(&base)
}

pub(crate) fn is_elementwise(base: &str) -> bool {
    is_binary_elementwise(base) || is_unary_elementwise(base)
}

/// Ops that must never be removed by dead-code elimination even when their
/// results are unused. Deallocations exist purely for their effect.
pub(crate) fn has_side_effects(op: &OpNode) -> bool {
    op.kind == "buf.dealloc"
}
