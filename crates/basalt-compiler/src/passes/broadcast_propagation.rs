//! Broadcast propagation.
//!
//! Moves broadcasting operations up towards producers to allow for more
//! fusion opportunities: a unary elementwise op followed by a broadcast of
//! its (sole-use) result commutes, and hoisting the broadcast brings
//! elementwise ops next to each other.

use crate::passes::{base_kind, is_unary_elementwise};
use basalt_core::{Function, FunctionPass, Result};

/// Rewrites `broadcast(unary(x))` into `unary(broadcast(x))` until a fixed
/// point is reached.
pub struct BroadcastPropagationPass;

impl BroadcastPropagationPass {
    /// One rewrite sweep. Returns whether anything commuted.
    fn sweep(&self, function: &mut Function) -> Result<bool> {
        for op_id in function.topological_order() {
            let op = function.op(op_id)?;
            if base_kind(&op.kind) != "broadcast" {
                continue;
            }

            let input = op.inputs[0];
            let Some(producer_id) = function.producer(input) else {
                continue;
            };

            let producer = function.op(producer_id)?;
            if !is_unary_elementwise(base_kind(&producer.kind)) {
                continue;
            }
            // The intermediate must have no other readers, or hoisting the
            // broadcast would change what they observe.
            if function.value_consumers(input).len() != 1 {
                continue;
            }
            if function.outputs.contains(&input) {
                continue;
            }

            // Swap the two ops in place: the def-use edges are unchanged,
            // only kinds, attrs, and the intermediate's shape move.
            let broadcast_op = function.op(op_id)?.clone();
            let unary_op = function.op(producer_id)?.clone();
            let output_ty = function.value(broadcast_op.outputs[0])?.ty.clone();

            {
                let upper = function.op_mut(producer_id)?;
                upper.kind = broadcast_op.kind.clone();
                upper.attrs = broadcast_op.attrs.clone();
            }
            {
                let lower = function.op_mut(op_id)?;
                lower.kind = unary_op.kind.clone();
                lower.attrs = unary_op.attrs.clone();
            }
            function.value_mut(input)?.ty = output_ty;

            return Ok(true);
        }

        Ok(false)
    }
}

impl FunctionPass for BroadcastPropagationPass {
    fn name(&self) -> &str {
        "broadcast-propagation"
    }

    fn run(&self, function: &mut Function) -> Result<bool> {
        let mut changed = false;
        while self.sweep(function)? {
            changed = true;
        }
        Ok(changed)
    }
}
