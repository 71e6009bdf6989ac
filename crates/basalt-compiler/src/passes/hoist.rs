//! Invariant-op hoisting.
//!
//! Ops whose operands are all compile-time data (globals, constants) and
//! that have no side effects compute the same result on every invocation.
//! Tagging them for the one-time init phase lets the execution engine run
//! them at load time instead of on every call. The function's input/output
//! contract is untouched: only an attribute moves.

use crate::passes::{base_kind, has_side_effects};
use basalt_core::{AttributeValue, Function, FunctionPass, Result, ValueId};

use std::collections::HashSet;

/// Tags side-effect-free, constant-derived ops with `init = true`.
pub struct HoistInvariantOpsPass;

impl FunctionPass for HoistInvariantOpsPass {
    fn name(&self) -> &str {
        "hoist-invariants"
    }

    fn run(&self, function: &mut Function) -> Result<bool> {
        let mut changed = false;
        let mut invariant_values: HashSet<ValueId> = HashSet::new();

        for value_id in function.value_ids() {
            let value = function.value(value_id)?;
            if value.is_constant() || value.is_global() {
                invariant_values.insert(value_id);
            }
        }

        for op_id in function.topological_order() {
            let op = function.op(op_id)?.clone();

            if has_side_effects(&op) || base_kind(&op.kind) == "variable" {
                continue;
            }
            if op.inputs.is_empty() {
                continue;
            }
            let invariant = op.inputs.iter().all(|input| invariant_values.contains(input));
            if !invariant {
                continue;
            }

            for &output in &op.outputs {
                invariant_values.insert(output);
            }
            if op.attr("init").is_none() {
                function
                    .op_mut(op_id)?
                    .set_attr("init", AttributeValue::Bool(true));
                changed = true;
            }
        }

        Ok(changed)
    }
}
