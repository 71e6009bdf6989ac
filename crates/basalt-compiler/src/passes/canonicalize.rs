//! Canonicalization: identity elimination and dead-code removal.
//!
//! The lowering pipeline runs this pass after every rewrite stage that can
//! introduce redundant or non-canonical forms, and always immediately
//! before bufferization: dead code must be eliminated before buffers are
//! allocated for it, or the deallocation stage sees spurious liveness.

use crate::passes::{base_kind, has_side_effects};
use basalt_core::{Function, Module, ModulePass, Result};

/// Rewrites functions to a normal form:
/// - `*.identity` ops are folded away (consumers read the input directly),
/// - ops whose results are all unused and that have no side effects are
///   removed, transitively, with any allocation mark on their results
///   cleared.
pub struct CanonicalizePass;

/// Fold away identity ops. Shared with the grappler pre-optimization pass.
pub(crate) fn eliminate_identities(function: &mut Function) -> Result<bool> {
    let mut changed = false;

    for op_id in function.topological_order() {
        let op = function.op(op_id)?;
        if base_kind(&op.kind) != "identity" {
            continue;
        }
        let input = op.inputs[0];
        let output = op.outputs[0];

        // An identity feeding the function boundary must stay: its result
        // is part of the external contract.
        if function.outputs.contains(&output) {
            continue;
        }

        function.replace_uses(output, input)?;
        function.remove_op(op_id)?;
        changed = true;
    }

    Ok(changed)
}

/// Remove unused, effect-free ops until none remain. Shared with the
/// grappler pre-optimization pass.
pub(crate) fn eliminate_dead_ops(function: &mut Function) -> Result<bool> {
    let mut changed = false;

    loop {
        let mut removed_any = false;

        let op_ids: Vec<_> = function.ops().map(|(id, _)| id).collect();
        for op_id in op_ids {
            let op = function.op(op_id)?.clone();

            if has_side_effects(&op) || op.outputs.is_empty() {
                continue;
            }

            let dead = op.outputs.iter().all(|&output| {
                function.value_consumers(output).is_empty()
                    && !function.outputs.contains(&output)
            });
            if !dead {
                continue;
            }

            function.remove_op(op_id)?;
            for &output in &op.outputs {
                function.value_mut(output)?.allocated = false;
            }
            removed_any = true;
        }

        if !removed_any {
            break;
        }
        changed = true;
    }

    Ok(changed)
}

impl ModulePass for CanonicalizePass {
    fn name(&self) -> &str {
        "canonicalize"
    }

    fn run(&self, module: &mut Module) -> Result<bool> {
        let mut changed = false;
        for function in &mut module.functions {
            changed |= eliminate_identities(function)?;
            changed |= eliminate_dead_ops(function)?;
        }
        Ok(changed)
    }
}
