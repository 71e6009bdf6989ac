//! Common-subexpression elimination.

use crate::passes::{base_kind, has_side_effects};
use basalt_core::{Function, Module, ModulePass, OpNode, Result};

use std::collections::{BTreeMap, HashMap};

/// Removes ops that recompute a value an earlier, identical op already
/// produces, rewiring consumers to the first occurrence.
///
/// Two ops are identical when kind, input values, and attributes all match.
/// Only value-semantic ops are deduplicated: stateful reads, effectful
/// buffer ops, and ops that write into buffers (each write owns its
/// allocation and its deallocation) are left alone. An op whose result is
/// a function output is also kept: the output list is part of the external
/// contract.
pub struct CsePass;

impl CsePass {
    fn run_on_function(&self, function: &mut Function) -> Result<bool> {
        let mut changed = false;
        let mut seen: HashMap<String, Vec<basalt_core::ValueId>> = HashMap::new();

        for op_id in function.topological_order() {
            let op = function.op(op_id)?.clone();

            if has_side_effects(&op) || base_kind(&op.kind) == "variable" {
                continue;
            }
            if op.outputs.is_empty() {
                continue;
            }
            let writes_buffers = op
                .outputs
                .iter()
                .any(|&o| function.value(o).map(|v| v.ty.is_buffer()).unwrap_or(false));
            if writes_buffers {
                continue;
            }

            let key = op_key(&op);
            match seen.get(&key) {
                Some(prior_outputs) => {
                    if op.outputs.iter().any(|o| function.outputs.contains(o)) {
                        continue;
                    }

                    for (&mine, &theirs) in op.outputs.iter().zip(prior_outputs.iter()) {
                        function.replace_uses(mine, theirs)?;
                    }
                    function.remove_op(op_id)?;
                    changed = true;
                }
                None => {
                    seen.insert(key, op.outputs.clone());
                }
            }
        }

        Ok(changed)
    }
}

/// Structural key for an op: kind, inputs, and sorted attributes.
fn op_key(op: &OpNode) -> String {
    let attrs: BTreeMap<_, _> = op.attrs.iter().collect();
    let mut key = format!("{}|{:?}|", op.kind, op.inputs);
    for (name, value) in attrs {
        key.push_str(name);
        key.push('=');
        key.push_str(&value.to_string());
        key.push(';');
    }
    key
}

impl ModulePass for CsePass {
    fn name(&self) -> &str {
        "cse"
    }

    fn run(&self, module: &mut Module) -> Result<bool> {
        let mut changed = false;
        for function in &mut module.functions {
            changed |= self.run_on_function(function)?;
        }
        Ok(changed)
    }
}
