//! Fallback-path marking.

use basalt_core::{AttributeValue, Module, ModulePass, Result};

/// Marks every op for the fallback execution path.
///
/// Included when `CompileOptions::enable_native_ops` is false: the
/// downstream engine then routes every kernel through the fallback
/// implementation instead of native ones.
pub struct FallbackMarkingPass;

impl ModulePass for FallbackMarkingPass {
    fn name(&self) -> &str {
        "fallback-marking"
    }

    fn run(&self, module: &mut Module) -> Result<bool> {
        let mut changed = false;

        for function in &mut module.functions {
            let op_ids: Vec<_> = function.ops().map(|(id, _)| id).collect();
            for op_id in op_ids {
                let op = function.op_mut(op_id)?;
                if op.attr("fallback").is_none() {
                    op.set_attr("fallback", AttributeValue::Bool(true));
                    changed = true;
                }
            }
        }

        Ok(changed)
    }
}
