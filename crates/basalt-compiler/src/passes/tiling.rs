//! Tiling and vectorization.
//!
//! The last stage of the fixed pipeline: annotates the final buffer-level
//! compute ops with a tiling/vectorization strategy for the downstream
//! execution engine. Nothing after this stage may re-bufferize or otherwise
//! perturb the chosen strategy.

use basalt_core::{AttributeValue, Function, FunctionPass, Result};

const TILE: usize = 8;
const VECTOR_WIDTH: i64 = 8;

/// Ops that receive a codegen strategy.
const TILED_KINDS: &[&str] = &[
    "lin.matmul",
    "lin.matvec",
    "lin.vecmat",
    "lin.dot",
    "lin.conv2d",
    "lin.fused_elementwise",
];

/// Attaches `tile_sizes` and `vector_width` attributes to every compute op
/// with a tiling strategy. Tile sizes are clipped to the actual dimensions.
pub struct TileAndVectorizePass;

impl FunctionPass for TileAndVectorizePass {
    fn name(&self) -> &str {
        "tile-and-vectorize"
    }

    fn run(&self, function: &mut Function) -> Result<bool> {
        let mut changed = false;

        let targets: Vec<_> = function
            .ops()
            .filter(|(_, op)| TILED_KINDS.contains(&op.kind.as_str()))
            .filter(|(_, op)| op.attr("tile_sizes").is_none())
            .map(|(id, op)| (id, op.outputs[0]))
            .collect();

        for (op_id, output) in targets {
            let dims = function
                .value(output)?
                .ty
                .shape()
                .as_static()
                .map(|d| d.to_vec())
                .unwrap_or_default();

            let tile_sizes: Vec<i64> = dims.iter().map(|&d| d.min(TILE) as i64).collect();

            let op = function.op_mut(op_id)?;
            op.set_attr("tile_sizes", AttributeValue::Ints(tile_sizes));
            op.set_attr("vector_width", AttributeValue::Int(VECTOR_WIDTH));
            changed = true;
        }

        Ok(changed)
    }
}
