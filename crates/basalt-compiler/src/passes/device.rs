//! Device assignment.

use crate::passes::base_kind;
use basalt_core::{AttributeValue, Module, ModulePass, Result};

/// Annotates every op with the device it materializes on.
///
/// Stateful ops (variables) go to the configured variable device, every
/// other unannotated op to the default device. Existing annotations on
/// non-variable ops are respected.
pub struct DeviceAssignmentPass {
    variable_device: String,
    default_device: String,
}

impl DeviceAssignmentPass {
    pub fn new(variable_device: impl Into<String>, default_device: impl Into<String>) -> Self {
        Self {
            variable_device: variable_device.into(),
            default_device: default_device.into(),
        }
    }
}

impl ModulePass for DeviceAssignmentPass {
    fn name(&self) -> &str {
        "device-assignment"
    }

    fn run(&self, module: &mut Module) -> Result<bool> {
        let mut changed = false;

        for function in &mut module.functions {
            let op_ids: Vec<_> = function.ops().map(|(id, _)| id).collect();
            for op_id in op_ids {
                let op = function.op_mut(op_id)?;
                if base_kind(&op.kind) == "variable" {
                    op.set_attr(
                        "device",
                        AttributeValue::Str(self.variable_device.clone()),
                    );
                    changed = true;
                } else if op.attr("device").is_none() {
                    op.set_attr("device", AttributeValue::Str(self.default_device.clone()));
                    changed = true;
                }
            }
        }

        Ok(changed)
    }
}
