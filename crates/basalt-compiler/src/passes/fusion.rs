//! Elementwise fusion.
//!
//! Merges chains of elementwise ops into a single fused op so the
//! intermediate results are never materialized.

use crate::passes::{base_kind, is_elementwise};
use basalt_core::{AttributeValue, Function, FunctionPass, OpId, OpNode, Result, ValueId};

use std::collections::HashSet;

/// Fuses maximal single-use chains of `lin.*` elementwise ops into
/// `lin.fused_elementwise` ops.
///
/// The fused op carries a `body` attribute listing the fused kernels in
/// execution order. Its inputs are the chain's external inputs in first-use
/// order; its output is the last op's output. Chains of length one are left
/// alone.
pub struct ElementwiseFusionPass;

fn fusible(op: &OpNode) -> bool {
    op.dialect() == "lin" && is_elementwise(base_kind(&op.kind)) && op.outputs.len() == 1
}

impl FunctionPass for ElementwiseFusionPass {
    fn name(&self) -> &str {
        "elementwise-fusion"
    }

    fn run(&self, function: &mut Function) -> Result<bool> {
        let order = function.topological_order();
        let mut taken: HashSet<OpId> = HashSet::new();
        let mut chains: Vec<Vec<OpId>> = Vec::new();

        for &start in &order {
            if taken.contains(&start) || !fusible(function.op(start)?) {
                continue;
            }

            let mut chain = vec![start];
            let mut current = start;

            loop {
                let output = function.op(current)?.outputs[0];
                if function.outputs.contains(&output) {
                    break;
                }
                let consumers = function.value_consumers(output);
                if consumers.len() != 1 {
                    break;
                }
                let next = consumers[0];
                if taken.contains(&next) || !fusible(function.op(next)?) {
                    break;
                }
                chain.push(next);
                current = next;
            }

            if chain.len() >= 2 {
                for &op_id in &chain {
                    taken.insert(op_id);
                }
                chains.push(chain);
            }
        }

        for chain in &chains {
            let members: HashSet<ValueId> = chain
                .iter()
                .map(|&id| function.op(id).map(|op| op.outputs[0]))
                .collect::<Result<_>>()?;

            let mut body = Vec::new();
            let mut inputs: Vec<ValueId> = Vec::new();
            for &op_id in chain {
                let op = function.op(op_id)?;
                body.push(base_kind(&op.kind).to_string());
                for &input in &op.inputs {
                    if !members.contains(&input) && !inputs.contains(&input) {
                        inputs.push(input);
                    }
                }
            }
            let output = function.op(*chain.last().unwrap())?.outputs[0];

            for &op_id in chain {
                function.remove_op(op_id)?;
            }

            let mut fused = OpNode::new("lin.fused_elementwise");
            fused.set_attr("body", AttributeValue::Str(body.join(",")));
            for input in inputs {
                fused.add_input(input);
            }
            fused.add_output(output);
            function.add_op(fused);
        }

        Ok(!chains.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_core::{DataType, Shape, ValueDef, ValueType};

    fn tensor(name: &str, dims: Vec<usize>) -> ValueDef {
        ValueDef::new(name, ValueType::tensor(DataType::F32, Shape::Static(dims)))
    }

    #[test]
    fn test_chain_fused_with_external_operand() {
        let mut func = Function::new("f");
        let x = func.add_value(tensor("x", vec![4]));
        let c = func.add_value(tensor("c", vec![4]));
        let a = func.add_value(tensor("a", vec![4]));
        let b = func.add_value(tensor("b", vec![4]));
        let y = func.add_value(tensor("y", vec![4]));

        let mut neg = OpNode::new("lin.neg");
        neg.add_input(x).add_output(a);
        func.add_op(neg);

        let mut tanh = OpNode::new("lin.tanh");
        tanh.add_input(a).add_output(b);
        func.add_op(tanh);

        let mut add = OpNode::new("lin.add");
        add.add_input(b).add_input(c).add_output(y);
        func.add_op(add);

        func.inputs.extend([x, c]);
        func.outputs.push(y);

        let changed = ElementwiseFusionPass.run(&mut func).unwrap();
        assert!(changed);
        assert_eq!(func.op_count(), 1);

        let (_, fused) = func.ops().next().unwrap();
        assert_eq!(fused.kind, "lin.fused_elementwise");
        assert_eq!(
            fused.attr("body").and_then(|a| a.as_str()),
            Some("neg,tanh,add")
        );
        assert_eq!(fused.inputs, vec![x, c]);
        assert_eq!(fused.outputs, vec![y]);
    }

    #[test]
    fn test_multi_use_intermediate_breaks_chain() {
        let mut func = Function::new("f");
        let x = func.add_value(tensor("x", vec![4]));
        let a = func.add_value(tensor("a", vec![4]));
        let y = func.add_value(tensor("y", vec![4]));
        let z = func.add_value(tensor("z", vec![4]));

        let mut neg = OpNode::new("lin.neg");
        neg.add_input(x).add_output(a);
        func.add_op(neg);

        // Two readers of a: chain cannot swallow the neg.
        let mut tanh = OpNode::new("lin.tanh");
        tanh.add_input(a).add_output(y);
        func.add_op(tanh);

        let mut exp = OpNode::new("lin.exp");
        exp.add_input(a).add_output(z);
        func.add_op(exp);

        func.inputs.push(x);
        func.outputs.extend([y, z]);

        assert!(!ElementwiseFusionPass.run(&mut func).unwrap());
        assert_eq!(func.op_count(), 3);
    }

    #[test]
    fn test_matmul_not_fused() {
        let mut func = Function::new("f");
        let x = func.add_value(tensor("x", vec![2, 2]));
        let w = func.add_value(tensor("w", vec![2, 2]));
        let a = func.add_value(tensor("a", vec![2, 2]));
        let y = func.add_value(tensor("y", vec![2, 2]));

        let mut mm = OpNode::new("lin.matmul");
        mm.add_input(x).add_input(w).add_output(a);
        func.add_op(mm);

        let mut tanh = OpNode::new("lin.tanh");
        tanh.add_input(a).add_output(y);
        func.add_op(tanh);

        func.inputs.extend([x, w]);
        func.outputs.push(y);

        assert!(!ElementwiseFusionPass.run(&mut func).unwrap());
    }
}
