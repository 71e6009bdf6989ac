//! End-to-end tests for the full lowering pipeline.

use basalt_compiler::passes::{AddProducerVersionPass, ShapeInferencePass, PRODUCER_VERSION_ATTR};
use basalt_compiler::{build_pipeline, lower_module, PassManager, StageTrace};
use basalt_core::{
    CompileOptions, ConstValue, DataType, Error, Function, Module, OpNode, Shape, TpuTarget,
    ValueDef, ValueType,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .try_init();
}

fn tensor(name: &str, dims: Vec<usize>) -> ValueDef {
    ValueDef::new(name, ValueType::tensor(DataType::F32, Shape::Static(dims)))
}

/// One function with a single fused high-level op over constant weights:
/// `main(x) = fused_matmul(x, w, b)`.
fn fused_matmul_module() -> Module {
    let mut module = Module::new("model");
    let mut func = Function::new("main");

    let x = func.add_value(tensor("x", vec![2, 4]));
    let w = func.add_value(ValueDef::with_constant(
        "w",
        ValueType::tensor(DataType::F32, Shape::Static(vec![4, 8])),
        ConstValue::zeros(DataType::F32, vec![4, 8]),
    ));
    let b = func.add_value(ValueDef::with_constant(
        "b",
        ValueType::tensor(DataType::F32, Shape::Static(vec![8])),
        ConstValue::zeros(DataType::F32, vec![8]),
    ));
    let y = func.add_value(ValueDef::new(
        "y",
        ValueType::tensor(DataType::F32, Shape::Unknown),
    ));

    let mut fused = OpNode::new("hl.fused_matmul");
    fused.add_input(x).add_input(w).add_input(b).add_output(y);
    func.add_op(fused);

    func.inputs.push(x);
    func.outputs.push(y);
    module.add_function(func);
    module
}

/// A module with two independent single-chain functions.
fn two_function_module() -> Module {
    let mut module = Module::new("pair");
    for name in ["f", "g"] {
        let mut func = Function::new(name);
        let x = func.add_value(tensor("x", vec![4]));
        let y = func.add_value(tensor("y", vec![4]));
        let mut op = OpNode::new("hl.exp");
        op.add_input(x).add_output(y);
        func.add_op(op);
        func.inputs.push(x);
        func.outputs.push(y);
        module.add_function(func);
    }
    module
}

#[test]
fn test_end_to_end_fused_op_to_buffers() {
    init_tracing();

    let mut module = fused_matmul_module();
    let options = CompileOptions {
        tpu_target: TpuTarget::NoTpu,
        enable_grappler: false,
        ..Default::default()
    };
    lower_module(&mut module, &options).unwrap();

    let func = module.function("main").unwrap();

    // The fused op is gone, and with it the whole high-level dialect.
    for (_, op) in func.ops() {
        assert_ne!(op.kind, "hl.fused_matmul");
        assert_ne!(op.dialect(), "hl", "unlowered op: {}", op.kind);
    }

    // Every boundary value is buffer-typed.
    for &boundary in func.inputs.iter().chain(func.outputs.iter()) {
        assert!(func.value(boundary).unwrap().ty.is_buffer());
    }

    // The constant weights moved into module globals.
    assert_eq!(module.globals.len(), 2);

    // No unreferenced allocations: every allocated buffer is either read
    // by a real op or escapes through the boundary.
    for value_id in func.value_ids() {
        let value = func.value(value_id).unwrap();
        if !value.allocated {
            continue;
        }
        let escapes = func.outputs.contains(&value_id);
        let read = func.value_consumers(value_id).iter().any(|&c| {
            func.op(c).unwrap().kind != "buf.dealloc"
        });
        assert!(
            escapes || read,
            "allocated buffer %{} has no readers",
            value.name
        );
    }

    // Deallocation never freed a zero-use buffer (dead code was removed
    // before bufferization).
    for (_, op) in func.ops() {
        if op.kind != "buf.dealloc" {
            continue;
        }
        let freed = op.inputs[0];
        let real_readers = func
            .value_consumers(freed)
            .iter()
            .filter(|&&c| func.op(c).unwrap().kind != "buf.dealloc")
            .count();
        assert!(real_readers > 0, "dealloc of a zero-use buffer");
    }

    // The matmul survived in general form and carries a codegen strategy.
    let matmul = func
        .ops()
        .find(|(_, op)| op.kind == "lin.matmul")
        .expect("matmul lowered away");
    assert!(matmul.1.attr("tile_sizes").is_some());
    assert!(matmul.1.attr("vector_width").is_some());

    // Device assignment ran over the final ops.
    for (_, op) in func.ops() {
        assert!(op.attr("device").is_some(), "op {} lacks a device", op.kind);
    }
}

#[test]
fn test_determinism_byte_for_byte() {
    init_tracing();

    let options = CompileOptions::default();

    let mut first = fused_matmul_module();
    lower_module(&mut first, &options).unwrap();

    let mut second = fused_matmul_module();
    lower_module(&mut second, &options).unwrap();

    assert_eq!(first.render(), second.render());
}

#[test]
fn test_bootstrap_satisfies_shape_inference_for_any_sentinel() {
    // Without the bootstrap stage, shape inference refuses to run.
    let mut pm = PassManager::new();
    pm.add_pass(ShapeInferencePass);
    let mut module = two_function_module();
    match pm.run(&mut module).unwrap_err() {
        Error::Precondition { stage, .. } => assert_eq!(stage, "shape-inference"),
        other => panic!("expected precondition error, got {other}"),
    }

    // With it, inference succeeds regardless of any pre-existing sentinel.
    for sentinel in [None, Some(7), Some(-1)] {
        let mut module = two_function_module();
        if let Some(v) = sentinel {
            module.set_attr(PRODUCER_VERSION_ATTR, basalt_core::AttributeValue::Int(v));
        }
        let mut pm = PassManager::new();
        pm.add_pass(AddProducerVersionPass);
        pm.add_pass(ShapeInferencePass);
        pm.run(&mut module).unwrap();
    }
}

#[test]
fn test_barrier_both_functions_legalize_before_bufferization() {
    init_tracing();

    let options = CompileOptions::default();
    let mut pm = build_pipeline(&options).unwrap();
    let trace = StageTrace::new();
    pm.set_trace(trace.clone());

    let mut module = two_function_module();
    pm.run(&mut module).unwrap();

    let events = trace.events();
    let legalize_positions: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.stage == "legalize")
        .map(|(i, _)| i)
        .collect();
    let bufferize_position = events
        .iter()
        .position(|e| e.stage == "bufferize")
        .expect("bufferize stage missing from trace");

    // Both functions were legalized.
    assert_eq!(legalize_positions.len(), 2);
    // ... and both strictly before bufferization began.
    for position in legalize_positions {
        assert!(position < bufferize_position);
    }
}

#[test]
fn test_two_functions_lower_independently() {
    let mut module = two_function_module();
    lower_module(&mut module, &CompileOptions::default()).unwrap();

    for name in ["f", "g"] {
        let func = module.function(name).unwrap();
        for (_, op) in func.ops() {
            assert_ne!(op.dialect(), "hl");
        }
        for &output in &func.outputs {
            assert!(func.value(output).unwrap().ty.is_buffer());
        }
    }
}

#[test]
fn test_gated_stages_observable_in_output() {
    // TPU fallback target plus disabled native ops: the final module
    // records both decisions.
    let mut module = fused_matmul_module();
    let options = CompileOptions {
        tpu_target: TpuTarget::TfFallback,
        enable_native_ops: false,
        hoist_invariant_ops: true,
        ..Default::default()
    };
    lower_module(&mut module, &options).unwrap();

    assert!(module.has_attr("tpu_infra"));
    let func = module.function("main").unwrap();
    for (_, op) in func.ops() {
        assert_eq!(op.attr("fallback").and_then(|a| a.as_bool()), Some(true));
    }
}

#[test]
fn test_inconsistent_options_fail_before_any_stage() {
    let mut module = fused_matmul_module();
    let options = CompileOptions {
        cost_threshold: 100,
        upper_cost_threshold: 10,
        ..Default::default()
    };

    match lower_module(&mut module, &options).unwrap_err() {
        Error::Config(message) => assert!(message.contains("upper_cost_threshold")),
        other => panic!("expected config error, got {other}"),
    }

    // The module was never touched.
    assert!(!module.has_attr(PRODUCER_VERSION_ATTR));
    let func = module.function("main").unwrap();
    assert_eq!(func.op_count(), 1);
}

#[test]
fn test_stream_annotations_when_optimizer_enabled() {
    let mut module = two_function_module();
    lower_module(&mut module, &CompileOptions::default()).unwrap();

    // Every compute op ended up in some stream.
    for function in &module.functions {
        for (_, op) in function.ops() {
            assert!(op.attr("stream").is_some(), "op {} unscheduled", op.kind);
        }
    }

    // With the optimizer gated off, no stream annotations appear.
    let mut module = two_function_module();
    let options = CompileOptions {
        enable_optimizer: false,
        ..Default::default()
    };
    lower_module(&mut module, &options).unwrap();
    for function in &module.functions {
        for (_, op) in function.ops() {
            assert!(op.attr("stream").is_none());
        }
    }
}
