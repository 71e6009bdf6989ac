//! Legalization from the high-level dialect to the intermediate dialect.

use crate::passes::base_kind;
use basalt_core::{Error, Function, FunctionPass, Result};

/// Primitive op kinds with a legalization rule into `lin.*`.
const LEGAL_BASES: &[&str] = &[
    "add",
    "mul",
    "sub",
    "div",
    "max",
    "tanh",
    "exp",
    "neg",
    "matmul",
    "reduce_sum",
    "transpose",
    "broadcast",
    "identity",
    "conv2d",
    "max_pool",
    "variable",
];

/// Rewrites every `hl.*` op into its `lin.*` counterpart.
///
/// Precondition: every op-produced value has a resolved static shape
/// (legalization patterns may specialize on concrete shapes).
///
/// An op with no rule is a pass failure naming the op; there is no
/// fallback path.
pub struct LegalizePass;

impl FunctionPass for LegalizePass {
    fn name(&self) -> &str {
        "legalize"
    }

    fn precondition(&self, function: &Function) -> Result<()> {
        for (_, op) in function.ops() {
            for &output in &op.outputs {
                let value = function.value(output)?;
                if !value.ty.shape().is_static() {
                    return Err(Error::Shape(format!(
                        "value %{} produced by '{}' has an unresolved shape",
                        value.name, op.kind
                    )));
                }
            }
        }
        Ok(())
    }

    fn run(&self, function: &mut Function) -> Result<bool> {
        let mut changed = false;

        let op_ids: Vec<_> = function.ops().map(|(id, _)| id).collect();
        for op_id in op_ids {
            let op = function.op(op_id)?;
            if op.dialect() != "hl" {
                continue;
            }

            let base = base_kind(&op.kind);
            if !LEGAL_BASES.contains(&base) {
                return Err(Error::PassFailed {
                    stage: "legalize".to_string(),
                    op: op.kind.clone(),
                    detail: "no legalization rule for this op".to_string(),
                });
            }

            let new_kind = format!("lin.{}", base);
            function.op_mut(op_id)?.kind = new_kind;
            changed = true;
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_core::{DataType, OpNode, Shape, ValueDef, ValueType};

    fn tensor(name: &str, shape: Shape) -> ValueDef {
        ValueDef::new(name, ValueType::tensor(DataType::F32, shape))
    }

    #[test]
    fn test_rewrites_dialect_prefix() {
        let mut func = Function::new("f");
        let x = func.add_value(tensor("x", Shape::Static(vec![2])));
        let y = func.add_value(tensor("y", Shape::Static(vec![2])));
        let mut op = OpNode::new("hl.tanh");
        op.add_input(x).add_output(y);
        func.add_op(op);

        let changed = LegalizePass.run(&mut func).unwrap();
        assert!(changed);

        let kinds: Vec<_> = func.ops().map(|(_, op)| op.kind.clone()).collect();
        assert_eq!(kinds, vec!["lin.tanh".to_string()]);
    }

    #[test]
    fn test_missing_rule_names_the_op() {
        let mut func = Function::new("f");
        let x = func.add_value(tensor("x", Shape::Static(vec![2])));
        let y = func.add_value(tensor("y", Shape::Static(vec![2])));
        let mut op = OpNode::new("hl.fft");
        op.add_input(x).add_output(y);
        func.add_op(op);

        let err = LegalizePass.run(&mut func).unwrap_err();
        match err {
            Error::PassFailed { stage, op, .. } => {
                assert_eq!(stage, "legalize");
                assert_eq!(op, "hl.fft");
            }
            other => panic!("expected pass failure, got {other}"),
        }
    }

    #[test]
    fn test_precondition_rejects_unresolved_shapes() {
        let mut func = Function::new("f");
        let x = func.add_value(tensor("x", Shape::Static(vec![2])));
        let y = func.add_value(tensor("y", Shape::Unknown));
        let mut op = OpNode::new("hl.tanh");
        op.add_input(x).add_output(y);
        func.add_op(op);

        assert!(LegalizePass.precondition(&func).is_err());
    }

    #[test]
    fn test_non_hl_ops_untouched() {
        let mut func = Function::new("f");
        let x = func.add_value(tensor("x", Shape::Static(vec![2])));
        let y = func.add_value(tensor("y", Shape::Static(vec![2])));
        let mut op = OpNode::new("lin.tanh");
        op.add_input(x).add_output(y);
        func.add_op(op);

        assert!(!LegalizePass.run(&mut func).unwrap());
    }
}
