//! Graph-level pre-optimization.

use crate::passes::canonicalize::{eliminate_dead_ops, eliminate_identities};
use basalt_core::{Module, ModulePass, Result};

/// Pre-lowering graph optimization over the high-level dialect.
///
/// Included only when `CompileOptions::enable_grappler` is set. Runs the
/// same identity-elimination and dead-code rewrites as canonicalization,
/// but before lowering begins, so the pipeline never pays for ops the
/// caller's graph construction left dangling.
pub struct GrapplerPass;

impl ModulePass for GrapplerPass {
    fn name(&self) -> &str {
        "grappler"
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

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_core::{DataType, Function, OpNode, Shape, ValueDef, ValueType};

    #[test]
    fn test_removes_dead_high_level_ops() {
        let mut module = Module::new("m");
        let mut func = Function::new("f");

        let x = func.add_value(ValueDef::new(
            "x",
            ValueType::tensor(DataType::F32, Shape::Static(vec![2])),
        ));
        let dead = func.add_value(ValueDef::new(
            "dead",
            ValueType::tensor(DataType::F32, Shape::Static(vec![2])),
        ));

        let mut op = OpNode::new("hl.neg");
        op.add_input(x).add_output(dead);
        func.add_op(op);

        func.inputs.push(x);
        module.add_function(func);

        assert!(GrapplerPass.run(&mut module).unwrap());
        assert_eq!(module.function("f").unwrap().op_count(), 0);
    }
}
