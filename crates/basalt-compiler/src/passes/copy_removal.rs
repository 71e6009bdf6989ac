//! Trivial copy removal.

use basalt_core::{Function, FunctionPass, Result};

/// Removes `buf.copy` ops that do no work: self-copies, and copies whose
/// destination is never read and does not escape through the function
/// boundary.
pub struct CopyRemovalPass;

impl FunctionPass for CopyRemovalPass {
    fn name(&self) -> &str {
        "copy-removal"
    }

    fn run(&self, function: &mut Function) -> Result<bool> {
        let mut changed = false;

        let copies: Vec<_> = function
            .ops()
            .filter(|(_, op)| op.kind == "buf.copy")
            .map(|(id, op)| (id, op.inputs[0], op.outputs[0]))
            .collect();

        for (copy_id, src, dst) in copies {
            let self_copy = src == dst;
            let dead = function.value_consumers(dst).is_empty()
                && !function.outputs.contains(&dst);

            if !self_copy && !dead {
                continue;
            }

            function.remove_op(copy_id)?;
            if dead && !self_copy {
                function.value_mut(dst)?.allocated = false;
            }
            changed = true;
        }

        Ok(changed)
    }
}
