//! Bootstrap stage: producer version annotation.

use basalt_core::{AttributeValue, Module, ModulePass, Result};

/// Module attribute written by the bootstrap stage and required by shape
/// inference.
pub const PRODUCER_VERSION_ATTR: &str = "producer";

/// Adds a producer version to the module to enable shape inference.
///
/// Shape inference is gated on the presence of *some* version metadata, but
/// the actual value does not impact its logic. Set it to 0 (any fixed
/// sentinel would do) to satisfy the attribute check.
///
/// This stage cannot fail and is idempotent: re-running it on an annotated
/// module overwrites the attribute with the same sentinel.
pub struct AddProducerVersionPass;

impl ModulePass for AddProducerVersionPass {
    fn name(&self) -> &str {
        "bootstrap-version"
    }

    fn run(&self, module: &mut Module) -> Result<bool> {
        module.set_attr(PRODUCER_VERSION_ATTR, AttributeValue::Int(0));
        Ok(true)
    }
}
