//! Stream formation and merging.

use crate::clustering::{form_streams, merge_dependent_streams};
use basalt_core::{AttributeValue, CompileOptions, Function, FunctionPass, Result};

/// Decomposes each function into execution streams and annotates every op
/// with its stream id.
///
/// Included when `CompileOptions::enable_optimizer` is set. Stream
/// formation is structural; the merging step is driven by the cost policy
/// (`merge_inter_dependent_streams`, `upper_cost_threshold`).
pub struct StreamOptimizationPass {
    options: CompileOptions,
}

impl StreamOptimizationPass {
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }
}

impl FunctionPass for StreamOptimizationPass {
    fn name(&self) -> &str {
        "stream-optimization"
    }

    fn run(&self, function: &mut Function) -> Result<bool> {
        let streams = form_streams(function)?;
        let streams = merge_dependent_streams(function, streams, &self.options)?;

        let mut changed = false;
        for (stream_id, stream) in streams.iter().enumerate() {
            for &op_id in stream {
                let op = function.op_mut(op_id)?;
                let prior = op.attr("stream").and_then(|a| a.as_int());
                if prior != Some(stream_id as i64) {
                    op.set_attr("stream", AttributeValue::Int(stream_id as i64));
                    changed = true;
                }
            }
        }

        Ok(changed)
    }
}
