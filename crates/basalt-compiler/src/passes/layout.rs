//! Layout assignment.
//!
//! When `CompileOptions::force_data_format` is set, every layout-sensitive
//! op is rewritten to the forced format, with transposes inserted around it
//! so the surrounding graph is undisturbed. Runs before shape inference;
//! the inserted transposes start with unknown shapes and are resolved with
//! everything else.

use basalt_core::{
    AttributeValue, Function, FunctionPass, OpNode, Result, Shape, ValueDef, ValueType,
};

/// Op kinds that carry a `data_format` attribute.
const LAYOUT_SENSITIVE: &[&str] = &["hl.conv2d", "hl.max_pool"];

/// Default format assumed for ops without an explicit annotation.
const DEFAULT_FORMAT: &str = "NHWC";

/// Rewrites layout-sensitive ops to a caller-forced data format.
pub struct LayoutAssignmentPass {
    format: String,
}

impl LayoutAssignmentPass {
    /// Create the pass for the given target format (one of the supported
    /// format strings; validated by `CompileOptions::validate`).
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
        }
    }

    /// Permutations taking `from`-formatted dimensions to `to`-formatted,
    /// and back.
    fn permutations(from: &str, to: &str) -> Option<(Vec<i64>, Vec<i64>)> {
        match (from, to) {
            ("NHWC", "NCHW") => Some((vec![0, 3, 1, 2], vec![0, 2, 3, 1])),
            ("NCHW", "NHWC") => Some((vec![0, 2, 3, 1], vec![0, 3, 1, 2])),
            _ => None,
        }
    }
}

impl FunctionPass for LayoutAssignmentPass {
    fn name(&self) -> &str {
        "layout-assignment"
    }

    fn run(&self, function: &mut Function) -> Result<bool> {
        let mut changed = false;

        let targets: Vec<_> = function
            .ops()
            .filter(|(_, op)| LAYOUT_SENSITIVE.contains(&op.kind.as_str()))
            .map(|(id, op)| {
                let current = op
                    .attr("data_format")
                    .and_then(|a| a.as_str())
                    .unwrap_or(DEFAULT_FORMAT)
                    .to_string();
                (id, op.inputs[0], op.outputs[0], current)
            })
            .collect();

        for (op_id, input, output, current) in targets {
            if current == self.format {
                continue;
            }
            let Some((to_forced, from_forced)) = Self::permutations(&current, &self.format) else {
                continue;
            };

            let dtype = function.value(input)?.ty.dtype();

            // Transpose the input into the forced format.
            let in_name =
                function.fresh_value_name(&format!("{}_perm", function.value(input)?.name));
            let in_perm =
                function.add_value(ValueDef::new(in_name, ValueType::tensor(dtype, Shape::Unknown)));

            let mut t_in = OpNode::new("hl.transpose");
            t_in.add_input(input).add_output(in_perm);
            t_in.set_attr("perm", AttributeValue::Ints(to_forced));
            function.add_op(t_in);
            function.replace_input(op_id, input, in_perm)?;

            // The op now produces a forced-format result; transpose it back
            // so downstream consumers see the original layout.
            let out_name =
                function.fresh_value_name(&format!("{}_perm", function.value(output)?.name));
            let out_perm = function
                .add_value(ValueDef::new(out_name, ValueType::tensor(dtype, Shape::Unknown)));
            function.replace_output(op_id, output, out_perm)?;

            let mut t_out = OpNode::new("hl.transpose");
            t_out.add_input(out_perm).add_output(output);
            t_out.set_attr("perm", AttributeValue::Ints(from_forced));
            function.add_op(t_out);

            function
                .op_mut(op_id)?
                .set_attr("data_format", AttributeValue::Str(self.format.clone()));
            changed = true;
        }

        Ok(changed)
    }
}
