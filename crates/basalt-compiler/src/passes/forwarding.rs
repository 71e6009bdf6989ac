//! Trivial buffer forwarding.
//!
//! Bufferization materializes boundary results through staging buffers and
//! explicit copies; deallocation then exposes which staging buffers have no
//! remaining readers. This cleanup forwards the producer's write straight
//! into the copy's destination and drops the staging allocation.

use basalt_core::{Function, FunctionPass, Result};

/// Forwards `op -> staging -> buf.copy -> dst` into `op -> dst` when the
/// staging buffer has no readers besides the copy (and its dealloc).
pub struct BufferForwardingPass;

impl FunctionPass for BufferForwardingPass {
    fn name(&self) -> &str {
        "buffer-forwarding"
    }

    fn run(&self, function: &mut Function) -> Result<bool> {
        let mut changed = false;

        let copies: Vec<_> = function
            .ops()
            .filter(|(_, op)| op.kind == "buf.copy")
            .map(|(id, op)| (id, op.inputs[0], op.outputs[0]))
            .collect();

        for (copy_id, src, dst) in copies {
            if src == dst {
                continue;
            }
            let Some(producer_id) = function.producer(src) else {
                continue;
            };
            if !function.value(src)?.allocated {
                continue;
            }

            // Readers of the staging buffer other than the copy itself and
            // its dealloc keep the copy alive.
            let mut deallocs = Vec::new();
            let mut other_readers = false;
            for consumer in function.value_consumers(src) {
                if consumer == copy_id {
                    continue;
                }
                if function.op(consumer)?.kind == "buf.dealloc" {
                    deallocs.push(consumer);
                } else {
                    other_readers = true;
                }
            }
            if other_readers {
                continue;
            }

            function.remove_op(copy_id)?;
            for dealloc in deallocs {
                function.remove_op(dealloc)?;
            }
            function.replace_output(producer_id, src, dst)?;
            function.value_mut(src)?.allocated = false;
            changed = true;
        }

        Ok(changed)
    }
}
