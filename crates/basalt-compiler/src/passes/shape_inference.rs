//! Shape inference pass.
//!
//! Forward pass in topological order that resolves the output shape of
//! every op from its input shapes. Runs once over the whole module and
//! requires the producer version attribute written by the bootstrap stage.

use crate::passes::{base_kind, is_binary_elementwise, is_unary_elementwise, PRODUCER_VERSION_ATTR};
use basalt_core::{broadcast_shape, Error, Function, Module, ModulePass, OpNode, Result, Shape};

/// Propagates static shapes through every function of the module.
///
/// Precondition: the module carries a producer version attribute. The
/// attribute's value is irrelevant; only its presence is checked (the
/// bootstrap stage exists purely to satisfy this check).
pub struct ShapeInferencePass;

impl ShapeInferencePass {
    fn infer_function(&self, function: &mut Function) -> Result<bool> {
        let mut changed = false;

        for op_id in function.topological_order() {
            let op = function.op(op_id)?.clone();
            if op.outputs.is_empty() {
                continue;
            }

            let shapes = self.infer_op(function, &op)?;
            if shapes.len() != op.outputs.len() {
                return Err(Error::Shape(format!(
                    "op '{}' has {} outputs but {} shapes were inferred",
                    op.kind,
                    op.outputs.len(),
                    shapes.len()
                )));
            }

            for (i, shape) in shapes.into_iter().enumerate() {
                let value_id = op.outputs[i];
                let value = function.value(value_id)?;
                if value.ty.shape() != &shape {
                    let new_ty = value.ty.with_shape(shape);
                    function.value_mut(value_id)?.ty = new_ty;
                    changed = true;
                }
            }
        }

        Ok(changed)
    }

    fn infer_op(&self, function: &Function, op: &OpNode) -> Result<Vec<Shape>> {
        let base = base_kind(&op.kind);

        let dims = match base {
            _ if is_binary_elementwise(base) => {
                let a = input_shape(function, op, 0)?;
                let b = input_shape(function, op, 1)?;
                broadcast_shape(&a, &b)?
            }
            _ if is_unary_elementwise(base) || base == "identity" => input_shape(function, op, 0)?,
            "matmul" => {
                let a = input_shape(function, op, 0)?;
                let b = input_shape(function, op, 1)?;
                if a.len() != 2 || b.len() != 2 {
                    return Err(Error::Shape(format!(
                        "matmul expects rank-2 operands, got {:?} and {:?}",
                        a, b
                    )));
                }
                if a[1] != b[0] {
                    return Err(Error::Shape(format!(
                        "matmul contraction mismatch: {:?} x {:?}",
                        a, b
                    )));
                }
                vec![a[0], b[1]]
            }
            "reduce_sum" => {
                let mut dims = input_shape(function, op, 0)?;
                let rank = dims.len() as i64;
                let mut axis = op.attr("axis").and_then(|a| a.as_int()).unwrap_or(-1);
                if axis < 0 {
                    axis += rank;
                }
                if axis < 0 || axis >= rank {
                    return Err(Error::Shape(format!(
                        "reduce_sum axis {} out of range for rank {}",
                        axis, rank
                    )));
                }
                let keepdims = op
                    .attr("keepdims")
                    .and_then(|a| a.as_bool())
                    .unwrap_or(true);
                if keepdims {
                    dims[axis as usize] = 1;
                } else {
                    dims.remove(axis as usize);
                }
                dims
            }
            "transpose" => {
                let dims = input_shape(function, op, 0)?;
                match op.attr("perm").and_then(|a| a.as_ints()) {
                    Some(perm) => {
                        if perm.len() != dims.len() {
                            return Err(Error::Shape(format!(
                                "transpose perm {:?} does not match rank {}",
                                perm,
                                dims.len()
                            )));
                        }
                        perm.iter().map(|&p| dims[p as usize]).collect()
                    }
                    None => dims.into_iter().rev().collect(),
                }
            }
            "broadcast" => {
                let input = input_shape(function, op, 0)?;
                let target: Vec<usize> = op
                    .attr("shape")
                    .and_then(|a| a.as_ints())
                    .ok_or_else(|| {
                        Error::Shape(format!("broadcast op '{}' lacks a shape attribute", op.kind))
                    })?
                    .iter()
                    .map(|&d| d as usize)
                    .collect();
                let result = broadcast_shape(&input, &target)?;
                if result != target {
                    return Err(Error::Shape(format!(
                        "cannot broadcast {:?} to {:?}",
                        input, target
                    )));
                }
                target
            }
            "conv2d" | "max_pool" => input_shape(function, op, 0)?,
            "variable" => {
                let value = function.value(op.outputs[0])?;
                value.ty.shape().as_static().map(|d| d.to_vec()).ok_or_else(|| {
                    Error::Shape(format!(
                        "variable '%{}' must carry a static shape",
                        value.name
                    ))
                })?
            }
            "fused_matmul" | "softmax" => {
                return Err(Error::Shape(format!(
                    "composite op '{}' must be decomposed before shape inference",
                    op.kind
                )));
            }
            _ => {
                return Err(Error::Shape(format!(
                    "no shape inference rule for op kind '{}'",
                    op.kind
                )));
            }
        };

        Ok(vec![Shape::Static(dims)])
    }
}

fn input_shape(function: &Function, op: &OpNode, index: usize) -> Result<Vec<usize>> {
    let value_id = *op.inputs.get(index).ok_or_else(|| {
        Error::Shape(format!("op '{}' is missing input {}", op.kind, index))
    })?;
    let value = function.value(value_id)?;
    value
        .ty
        .shape()
        .as_static()
        .map(|d| d.to_vec())
        .ok_or_else(|| {
            Error::Shape(format!(
                "input %{} of '{}' has an unresolved shape",
                value.name, op.kind
            ))
        })
}

impl ModulePass for ShapeInferencePass {
    fn name(&self) -> &str {
        "shape-inference"
    }

    fn precondition(&self, module: &Module) -> Result<()> {
        if !module.has_attr(PRODUCER_VERSION_ATTR) {
            return Err(Error::InvalidGraph(
                "module lacks a producer version attribute".to_string(),
            ));
        }
        Ok(())
    }

    fn run(&self, module: &mut Module) -> Result<bool> {
        let mut changed = false;
        for function in &mut module.functions {
            changed |= self.infer_function(function)?;
        }
        Ok(changed)
    }
}
