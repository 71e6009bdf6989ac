//! Fission: split composite high-level ops into primitives.
//!
//! Shape inference must see primitive shapes, not opaque composite ones,
//! so this pass runs first in the lowering pipeline.

use basalt_core::{
    AttributeValue, Error, Function, FunctionPass, OpNode, Result, Shape, ValueDef, ValueType,
};

/// Splits `hl.*` composite operations into primitive `hl.*` operations.
///
/// Supported composites:
/// - `hl.fused_matmul(x, w, b)` → `hl.matmul` + `hl.add`
/// - `hl.softmax(x)` → `hl.exp` + `hl.reduce_sum` + `hl.div`
///
/// Intermediate values are created with unknown shapes; shape inference
/// resolves them later in the pipeline.
pub struct FissionPass;

impl FissionPass {
    fn split_fused_matmul(&self, function: &mut Function, op: &OpNode) -> Result<()> {
        if op.inputs.len() != 3 || op.outputs.len() != 1 {
            return Err(Error::PassFailed {
                stage: "fission".to_string(),
                op: op.kind.clone(),
                detail: format!(
                    "expected 3 inputs and 1 output, got {} and {}",
                    op.inputs.len(),
                    op.outputs.len()
                ),
            });
        }

        let (x, w, b) = (op.inputs[0], op.inputs[1], op.inputs[2]);
        let y = op.outputs[0];
        let dtype = function.value(y)?.ty.dtype();

        function.remove_op(op.index)?;

        let tmp_name = function.fresh_value_name(&format!("{}_mm", function.value(y)?.name));
        let tmp = function.add_value(ValueDef::new(
            tmp_name,
            ValueType::tensor(dtype, Shape::Unknown),
        ));

        let mut matmul = OpNode::new("hl.matmul");
        matmul.add_input(x).add_input(w).add_output(tmp);
        function.add_op(matmul);

        let mut add = OpNode::new("hl.add");
        add.add_input(tmp).add_input(b).add_output(y);
        function.add_op(add);

        Ok(())
    }

    fn split_softmax(&self, function: &mut Function, op: &OpNode) -> Result<()> {
        if op.inputs.len() != 1 || op.outputs.len() != 1 {
            return Err(Error::PassFailed {
                stage: "fission".to_string(),
                op: op.kind.clone(),
                detail: "expected 1 input and 1 output".to_string(),
            });
        }

        let x = op.inputs[0];
        let y = op.outputs[0];
        let dtype = function.value(y)?.ty.dtype();
        let y_name = function.value(y)?.name.clone();

        function.remove_op(op.index)?;

        let exp_name = function.fresh_value_name(&format!("{}_exp", y_name));
        let exp_out = function.add_value(ValueDef::new(
            exp_name,
            ValueType::tensor(dtype, Shape::Unknown),
        ));
        let sum_name = function.fresh_value_name(&format!("{}_sum", y_name));
        let sum_out = function.add_value(ValueDef::new(
            sum_name,
            ValueType::tensor(dtype, Shape::Unknown),
        ));

        let mut exp = OpNode::new("hl.exp");
        exp.add_input(x).add_output(exp_out);
        function.add_op(exp);

        let mut sum = OpNode::new("hl.reduce_sum");
        sum.add_input(exp_out).add_output(sum_out);
        sum.set_attr("axis", AttributeValue::Int(-1));
        sum.set_attr("keepdims", AttributeValue::Bool(true));
        function.add_op(sum);

        let mut div = OpNode::new("hl.div");
        div.add_input(exp_out).add_input(sum_out).add_output(y);
        function.add_op(div);

        Ok(())
    }
}

impl FunctionPass for FissionPass {
    fn name(&self) -> &str {
        "fission"
    }

    fn run(&self, function: &mut Function) -> Result<bool> {
        let composites: Vec<OpNode> = function
            .ops()
            .filter(|(_, op)| matches!(op.kind.as_str(), "hl.fused_matmul" | "hl.softmax"))
            .map(|(_, op)| op.clone())
            .collect();

        for op in &composites {
            match op.kind.as_str() {
                "hl.fused_matmul" => self.split_fused_matmul(function, op)?,
                "hl.softmax" => self.split_softmax(function, op)?,
                _ => unreachable!(),
            }
        }

        Ok(!composites.is_empty())
    }
}
