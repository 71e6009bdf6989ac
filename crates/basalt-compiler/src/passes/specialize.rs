//! Matmul specialization.
//!
//! Rewrites generic `lin.matmul` ops into shape-specific forms so the
//! tiling stage can pick degenerate-dimension-free strategies. Runs on the
//! final buffer-level form; canonicalization immediately after cleans up
//! any branches the rewrite made unreachable.

use basalt_core::{Error, Function, FunctionPass, Result};

/// Specializes `lin.matmul` by operand shape:
/// - `[1,k] x [k,1]` → `lin.dot`
/// - `[1,k] x [k,n]` → `lin.vecmat`
/// - `[m,k] x [k,1]` → `lin.matvec`
pub struct MatmulSpecializationPass;

impl FunctionPass for MatmulSpecializationPass {
    fn name(&self) -> &str {
        "matmul-specialization"
    }

    fn run(&self, function: &mut Function) -> Result<bool> {
        let mut changed = false;

        let matmuls: Vec<_> = function
            .ops()
            .filter(|(_, op)| op.kind == "lin.matmul")
            .map(|(id, op)| (id, op.inputs.clone()))
            .collect();

        for (op_id, inputs) in matmuls {
            let a = static_dims(function, inputs[0])?;
            let b = static_dims(function, inputs[1])?;

            let m = a[0];
            let n = b[1];
            let specialized = match (m, n) {
                (1, 1) => "lin.dot",
                (1, _) => "lin.vecmat",
                (_, 1) => "lin.matvec",
                _ => continue,
            };

            function.op_mut(op_id)?.kind = specialized.to_string();
            changed = true;
        }

        Ok(changed)
    }
}

fn static_dims(function: &Function, value: basalt_core::ValueId) -> Result<Vec<usize>> {
    let value = function.value(value)?;
    value
        .ty
        .shape()
        .as_static()
        .map(|d| d.to_vec())
        .ok_or_else(|| {
            Error::Shape(format!(
                "matmul operand %{} has an unresolved shape",
                value.name
            ))
        })
}
