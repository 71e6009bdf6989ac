//! Bufferization: tensor values become explicit memory buffers.
//!
//! Runs only after all tensor-level rewrites are complete and a
//! canonicalization pass has just removed dead code — allocating buffers
//! for dead values wastes memory and produces spurious liveness in the
//! deallocation stage.

use basalt_core::{Error, Function, Module, ModulePass, OpNode, Result, ValueDef};

/// Converts every tensor value in the module to a buffer value.
///
/// Precondition: no `hl.*` op remains (legalization is complete).
///
/// Effects:
/// - every value type flips from tensor to buffer, including function
///   boundaries (the signature's types change representation, not arity),
/// - op-produced values are marked as allocated,
/// - each op result that escapes through the function boundary is
///   materialized via a fresh intermediate and an explicit `buf.copy` into
///   the boundary buffer; the forwarding cleanup later removes the copies
///   that turn out to be trivial.
pub struct BufferizePass;

impl BufferizePass {
    fn bufferize_function(&self, function: &mut Function) -> Result<bool> {
        let mut changed = false;

        // Flip every value to the buffer representation.
        for value_id in function.value_ids().collect::<Vec<_>>() {
            let value = function.value_mut(value_id)?;
            if value.ty.is_tensor() {
                value.ty = value.ty.to_buffer();
                changed = true;
            }
        }

        // Op results need backing allocations.
        for value_id in function.value_ids().collect::<Vec<_>>() {
            if function.producer(value_id).is_some() && !function.value(value_id)?.allocated {
                function.value_mut(value_id)?.allocated = true;
                changed = true;
            }
        }

        // Materialize boundary writes through explicit copies.
        for output in function.outputs.clone() {
            let Some(producer_id) = function.producer(output) else {
                continue;
            };
            if function.op(producer_id)?.kind == "buf.copy" {
                continue;
            }

            let staging_name =
                function.fresh_value_name(&format!("{}_buf", function.value(output)?.name));
            let staging_ty = function.value(output)?.ty.clone();
            let mut staging = ValueDef::new(staging_name, staging_ty);
            staging.allocated = true;
            let staging_id = function.add_value(staging);

            // Readers of the result follow it to the staging buffer; the
            // boundary buffer is written once, by the copy.
            function.replace_uses(output, staging_id)?;
            function.replace_output(producer_id, output, staging_id)?;

            let mut copy = OpNode::new("buf.copy");
            copy.add_input(staging_id).add_output(output);
            function.add_op(copy);
            changed = true;
        }

        Ok(changed)
    }
}

impl ModulePass for BufferizePass {
    fn name(&self) -> &str {
        "bufferize"
    }

    fn precondition(&self, module: &Module) -> Result<()> {
        for function in &module.functions {
            for (_, op) in function.ops() {
                if op.dialect() == "hl" {
                    return Err(Error::InvalidGraph(format!(
                        "op '{}' in @{} was not legalized",
                        op.kind, function.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn run(&self, module: &mut Module) -> Result<bool> {
        let mut changed = false;
        for function in &mut module.functions {
            changed |= self.bufferize_function(function)?;
        }
        Ok(changed)
    }
}
