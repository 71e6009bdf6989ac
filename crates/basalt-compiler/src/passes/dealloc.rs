//! Buffer deallocation.
//!
//! Computes liveness over allocated buffers and inserts `buf.dealloc` ops
//! after each buffer's last use. Must run strictly after all bufferization
//! and after constant-to-global conversion: liveness over a partially
//! converted function would miss references.

use basalt_core::{Error, Function, FunctionPass, OpNode, Result};

/// Inserts a `buf.dealloc` for every allocated, non-escaping buffer.
///
/// Precondition: every value in the function is buffer-typed.
///
/// Function outputs escape and are never deallocated here; they belong to
/// the caller. Ordering edges pin each dealloc after every reader of the
/// buffer it frees.
pub struct BufferDeallocationPass;

impl FunctionPass for BufferDeallocationPass {
    fn name(&self) -> &str {
        "buffer-deallocation"
    }

    fn precondition(&self, function: &Function) -> Result<()> {
        for value_id in function.value_ids() {
            let value = function.value(value_id)?;
            if value.ty.is_tensor() {
                return Err(Error::InvalidGraph(format!(
                    "value %{} is still tensor-typed after bufferization",
                    value.name
                )));
            }
        }
        Ok(())
    }

    fn run(&self, function: &mut Function) -> Result<bool> {
        let mut changed = false;

        for value_id in function.value_ids().collect::<Vec<_>>() {
            let value = function.value(value_id)?;
            if !value.allocated || function.outputs.contains(&value_id) {
                continue;
            }
            if function.producer(value_id).is_none() {
                continue;
            }

            let consumers = function.value_consumers(value_id);
            if consumers
                .iter()
                .any(|&c| function.op(c).map(|op| op.kind == "buf.dealloc").unwrap_or(false))
            {
                // Already freed (pass re-run).
                continue;
            }

            let mut dealloc = OpNode::new("buf.dealloc");
            dealloc.add_input(value_id);
            let dealloc_id = function.add_op(dealloc);

            // The dealloc is ordered after every reader, not just after the
            // producer; pick up the readers via explicit ordering edges.
            for &consumer in &consumers {
                if consumer != dealloc_id {
                    function.add_ordering_edge(consumer, dealloc_id);
                }
            }

            changed = true;
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_core::{DataType, Shape, ValueDef, ValueType};

    fn buffer(name: &str, dims: Vec<usize>) -> ValueDef {
        ValueDef::new(name, ValueType::buffer(DataType::F32, Shape::Static(dims)))
    }

    fn alloc_buffer(name: &str, dims: Vec<usize>) -> ValueDef {
        let mut v = buffer(name, dims);
        v.allocated = true;
        v
    }

    #[test]
    fn test_precondition_rejects_tensors() {
        let mut func = Function::new("f");
        func.add_value(ValueDef::new(
            "x",
            ValueType::tensor(DataType::F32, Shape::Static(vec![2])),
        ));
        assert!(BufferDeallocationPass.precondition(&func).is_err());
    }

    #[test]
    fn test_intermediate_freed_after_last_use() {
        let mut func = Function::new("f");
        let x = func.add_value(buffer("x", vec![2]));
        let t = func.add_value(alloc_buffer("t", vec![2]));
        let y = func.add_value(alloc_buffer("y", vec![2]));

        let mut exp = OpNode::new("lin.exp");
        exp.add_input(x).add_output(t);
        func.add_op(exp);

        let mut tanh = OpNode::new("lin.tanh");
        tanh.add_input(t).add_output(y);
        let tanh_id = func.add_op(tanh);

        func.inputs.push(x);
        func.outputs.push(y);

        let changed = BufferDeallocationPass.run(&mut func).unwrap();
        assert!(changed);

        // Exactly one dealloc, for t, ordered after its reader.
        let deallocs: Vec<_> = func
            .ops()
            .filter(|(_, op)| op.kind == "buf.dealloc")
            .map(|(id, op)| (id, op.inputs[0]))
            .collect();
        assert_eq!(deallocs.len(), 1);
        assert_eq!(deallocs[0].1, t);

        let order = func.topological_order();
        let reader_pos = order.iter().position(|&i| i == tanh_id).unwrap();
        let dealloc_pos = order.iter().position(|&i| i == deallocs[0].0).unwrap();
        assert!(reader_pos < dealloc_pos);
    }

    #[test]
    fn test_outputs_and_inputs_never_freed() {
        let mut func = Function::new("f");
        let x = func.add_value(buffer("x", vec![2]));
        let y = func.add_value(alloc_buffer("y", vec![2]));

        let mut exp = OpNode::new("lin.exp");
        exp.add_input(x).add_output(y);
        func.add_op(exp);

        func.inputs.push(x);
        func.outputs.push(y);

        assert!(!BufferDeallocationPass.run(&mut func).unwrap());
    }

    #[test]
    fn test_rerun_does_not_double_free() {
        let mut func = Function::new("f");
        let x = func.add_value(buffer("x", vec![2]));
        let t = func.add_value(alloc_buffer("t", vec![2]));
        let y = func.add_value(alloc_buffer("y", vec![2]));

        let mut exp = OpNode::new("lin.exp");
        exp.add_input(x).add_output(t);
        func.add_op(exp);
        let mut tanh = OpNode::new("lin.tanh");
        tanh.add_input(t).add_output(y);
        func.add_op(tanh);
        func.inputs.push(x);
        func.outputs.push(y);

        assert!(BufferDeallocationPass.run(&mut func).unwrap());
        assert!(!BufferDeallocationPass.run(&mut func).unwrap());

        let dealloc_count = func
            .ops()
            .filter(|(_, op)| op.kind == "buf.dealloc")
            .count();
        assert_eq!(dealloc_count, 1);
    }
}
