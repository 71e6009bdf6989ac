//! TPU-specific stage subsets.
//!
//! The pipeline assembler includes at most one of these passes, selected by
//! `CompileOptions::tpu_target`. The TPU kernel infrastructure itself lives
//! in the execution engine; these stages rewrite only what the module
//! records — device annotations and fallback marks on the ops the TPU can
//! accelerate.

use crate::passes::base_kind;
use basalt_core::{AttributeValue, Module, ModulePass, Result};

const TPU_DEVICE: &str = "/device:TPU:0";

/// Op kinds with TPU kernel support.
const TPU_ELIGIBLE: &[&str] = &["matmul", "matvec", "vecmat", "dot", "conv2d"];

fn tpu_eligible(kind: &str) -> bool {
    TPU_ELIGIBLE.contains(&base_kind(kind))
}

/// Targets the TPURT dialect: eligible compute ops move to the TPU device.
pub struct TpurtRewritePass;

impl ModulePass for TpurtRewritePass {
    fn name(&self) -> &str {
        "tpurt-rewrite"
    }

    fn run(&self, module: &mut Module) -> Result<bool> {
        module.set_attr("tpu_infra", AttributeValue::Str("tpurt".to_string()));

        for function in &mut module.functions {
            let op_ids: Vec<_> = function.ops().map(|(id, _)| id).collect();
            for op_id in op_ids {
                let op = function.op_mut(op_id)?;
                if tpu_eligible(&op.kind) {
                    op.set_attr("device", AttributeValue::Str(TPU_DEVICE.to_string()));
                }
            }
        }

        Ok(true)
    }
}

/// Targets TPU kernels through the fallback path: eligible ops are marked
/// for fallback execution rather than moved to a TPURT device.
pub struct TfFallbackTpuPass;

impl ModulePass for TfFallbackTpuPass {
    fn name(&self) -> &str {
        "tpu-fallback-rewrite"
    }

    fn run(&self, module: &mut Module) -> Result<bool> {
        module.set_attr("tpu_infra", AttributeValue::Str("fallback".to_string()));

        for function in &mut module.functions {
            let op_ids: Vec<_> = function.ops().map(|(id, _)| id).collect();
            for op_id in op_ids {
                let op = function.op_mut(op_id)?;
                if tpu_eligible(&op.kind) {
                    op.set_attr("fallback", AttributeValue::Bool(true));
                }
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_core::{DataType, Function, OpNode, Shape, ValueDef, ValueType};

    fn matmul_module() -> (Module, basalt_core::OpId, basalt_core::OpId) {
        let mut module = Module::new("m");
        let mut func = Function::new("f");

        let a = func.add_value(ValueDef::new(
            "a",
            ValueType::buffer(DataType::F32, Shape::Static(vec![2, 2])),
        ));
        let b = func.add_value(ValueDef::new(
            "b",
            ValueType::buffer(DataType::F32, Shape::Static(vec![2, 2])),
        ));
        let y = func.add_value(ValueDef::new(
            "y",
            ValueType::buffer(DataType::F32, Shape::Static(vec![2, 2])),
        ));
        let z = func.add_value(ValueDef::new(
            "z",
            ValueType::buffer(DataType::F32, Shape::Static(vec![2, 2])),
        ));

        let mut mm = OpNode::new("lin.matmul");
        mm.add_input(a).add_input(b).add_output(y);
        let mm_id = func.add_op(mm);

        let mut exp = OpNode::new("lin.exp");
        exp.add_input(y).add_output(z);
        let exp_id = func.add_op(exp);

        module.add_function(func);
        (module, mm_id, exp_id)
    }

    #[test]
    fn test_tpurt_moves_eligible_ops() {
        let (mut module, mm_id, exp_id) = matmul_module();
        TpurtRewritePass.run(&mut module).unwrap();

        assert_eq!(
            module.attr("tpu_infra"),
            Some(&AttributeValue::Str("tpurt".to_string()))
        );
        let func = module.function("f").unwrap();
        assert_eq!(
            func.op(mm_id).unwrap().attr("device").and_then(|a| a.as_str()),
            Some(TPU_DEVICE)
        );
        assert!(func.op(exp_id).unwrap().attr("device").is_none());
    }

    #[test]
    fn test_fallback_marks_eligible_ops() {
        let (mut module, mm_id, exp_id) = matmul_module();
        TfFallbackTpuPass.run(&mut module).unwrap();

        assert_eq!(
            module.attr("tpu_infra"),
            Some(&AttributeValue::Str("fallback".to_string()))
        );
        let func = module.function("f").unwrap();
        assert_eq!(
            func.op(mm_id).unwrap().attr("fallback").and_then(|a| a.as_bool()),
            Some(true)
        );
        assert!(func.op(exp_id).unwrap().attr("fallback").is_none());
    }
}
