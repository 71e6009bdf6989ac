//! The pipeline orchestrator.
//!
//! A `PassManager` holds an ordered list of stage invocations — some scoped
//! to the whole module, some scoped per function — and runs them strictly
//! in order. There is no rollback: each stage commits its rewrite before
//! the next runs, and the first precondition violation or pass failure
//! aborts the whole compilation with no partial output.
//!
//! Per-function stages fan their function-local work out on a rayon worker
//! pool; the pass manager joins all functions before the next stage starts,
//! so a module-scoped stage (or the next per-function stage) never observes
//! a half-rewritten module.

use basalt_core::{Error, FunctionPass, Module, ModulePass, Result};
use rayon::prelude::*;

use std::sync::{Arc, Mutex};

/// One entry in the pipeline: a boxed pass plus its scope.
pub enum PipelineStage {
    /// Runs once over the whole module. Acts as a barrier.
    Module(Box<dyn ModulePass>),

    /// Runs independently on every function; functions may be processed in
    /// parallel within the stage.
    Function(Box<dyn FunctionPass>),
}

impl PipelineStage {
    /// Name of the underlying pass.
    pub fn name(&self) -> &str {
        match self {
            PipelineStage::Module(p) => p.name(),
            PipelineStage::Function(p) => p.name(),
        }
    }
}

impl std::fmt::Debug for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scope = match self {
            PipelineStage::Module(_) => "Module",
            PipelineStage::Function(_) => "Function",
        };
        f.debug_struct("PipelineStage")
            .field("scope", &scope)
            .field("name", &self.name())
            .finish()
    }
}

/// One recorded stage invocation, for observability and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    /// Stage name.
    pub stage: String,

    /// Function name for per-function work; `None` for module-scoped work.
    pub function: Option<String>,
}

/// Shared recorder of stage invocations.
///
/// Events from the functions of one per-function stage may interleave in
/// any order, but all of them appear before any event of the next stage:
/// the recorder makes the barrier observable.
#[derive(Clone, Default)]
pub struct StageTrace {
    events: Arc<Mutex<Vec<TraceEvent>>>,
}

impl StageTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, stage: &str, function: Option<&str>) {
        self.events.lock().unwrap().push(TraceEvent {
            stage: stage.to_string(),
            function: function.map(|f| f.to_string()),
        });
    }
}

/// Ordered pipeline of lowering stages.
///
/// Stages can only be appended; there is no API to reorder or remove them.
/// The fixed lowering order (see `lowering`) is therefore reproduced by
/// construction.
pub struct PassManager {
    stages: Vec<PipelineStage>,
    trace: Option<StageTrace>,
}

impl PassManager {
    /// Create an empty pass manager.
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            trace: None,
        }
    }

    /// Append a module-scoped pass.
    pub fn add_pass(&mut self, pass: impl ModulePass + 'static) -> &mut Self {
        self.stages.push(PipelineStage::Module(Box::new(pass)));
        self
    }

    /// Append a function-scoped pass.
    pub fn add_function_pass(&mut self, pass: impl FunctionPass + 'static) -> &mut Self {
        self.stages.push(PipelineStage::Function(Box::new(pass)));
        self
    }

    /// Append an already-constructed stage (from the stage catalog).
    pub fn add_stage(&mut self, stage: PipelineStage) -> &mut Self {
        self.stages.push(stage);
        self
    }

    /// Attach a trace recorder.
    pub fn set_trace(&mut self, trace: StageTrace) -> &mut Self {
        self.trace = Some(trace);
        self
    }

    /// Names of the stages, in execution order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Number of stages.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Run every stage to completion, in order.
    ///
    /// # Errors
    ///
    /// Aborts at the first stage whose precondition is violated
    /// (`Error::Precondition` naming the stage) or whose rewrite fails.
    /// The module may be left partially lowered on error; it must not be
    /// reused.
    pub fn run(&self, module: &mut Module) -> Result<()> {
        for stage in &self.stages {
            let _span = tracing::debug_span!("stage", name = stage.name()).entered();

            match stage {
                PipelineStage::Module(pass) => {
                    pass.precondition(module)
                        .map_err(|e| wrap_precondition(pass.name(), e))?;

                    if let Some(trace) = &self.trace {
                        trace.record(pass.name(), None);
                    }

                    let changed = pass.run(module)?;
                    tracing::debug!(changed, "module stage finished");
                }
                PipelineStage::Function(pass) => {
                    // All preconditions are checked before any function is
                    // rewritten, so a violation in the last function cannot
                    // leave the first one half-processed.
                    for function in &module.functions {
                        pass.precondition(function)
                            .map_err(|e| wrap_precondition(pass.name(), e))?;
                    }

                    let trace = self.trace.clone();
                    let name = pass.name();

                    let results: Vec<(String, Result<bool>)> = module
                        .functions
                        .par_iter_mut()
                        .map(|function| {
                            if let Some(trace) = &trace {
                                trace.record(name, Some(function.name.as_str()));
                            }
                            let result = pass.run(function);
                            (function.name.clone(), result)
                        })
                        .collect();

                    // The parallel section is a barrier: every function has
                    // finished before results are inspected.
                    for (function, result) in results {
                        let changed = result?;
                        tracing::debug!(function = function.as_str(), changed, "function done");
                    }
                }
            }
        }

        Ok(())
    }
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

fn wrap_precondition(stage: &str, error: Error) -> Error {
    match error {
        e @ Error::Precondition { .. } => e,
        other => Error::Precondition {
            stage: stage.to_string(),
            detail: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_core::{Function, Module};

    struct CountingPass;

    impl ModulePass for CountingPass {
        fn name(&self) -> &str {
            "counting"
        }

        fn run(&self, module: &mut Module) -> Result<bool> {
            module.set_attr("count", basalt_core::AttributeValue::Int(1));
            Ok(true)
        }
    }

    struct FailingPrecondition;

    impl ModulePass for FailingPrecondition {
        fn name(&self) -> &str {
            "failing"
        }

        fn precondition(&self, _module: &Module) -> Result<()> {
            Err(Error::InvalidGraph("required attribute missing".to_string()))
        }

        fn run(&self, _module: &mut Module) -> Result<bool> {
            unreachable!("precondition always fails")
        }
    }

    struct TouchEveryFunction;

    impl FunctionPass for TouchEveryFunction {
        fn name(&self) -> &str {
            "touch"
        }

        fn run(&self, _function: &mut Function) -> Result<bool> {
            Ok(false)
        }
    }

    #[test]
    fn test_stages_run_in_registration_order() {
        let mut pm = PassManager::new();
        pm.add_pass(CountingPass);
        pm.add_function_pass(TouchEveryFunction);
        pm.add_pass(CountingPass);

        assert_eq!(pm.stage_names(), vec!["counting", "touch", "counting"]);
    }

    #[test]
    fn test_precondition_failure_names_stage() {
        let mut pm = PassManager::new();
        pm.add_pass(FailingPrecondition);

        let mut module = Module::new("m");
        let err = pm.run(&mut module).unwrap_err();

        match err {
            Error::Precondition { stage, detail } => {
                assert_eq!(stage, "failing");
                assert!(detail.contains("required attribute"));
            }
            other => panic!("expected precondition error, got {other}"),
        }
    }

    #[test]
    fn test_trace_records_function_events_per_stage() {
        let mut pm = PassManager::new();
        pm.add_function_pass(TouchEveryFunction);
        pm.add_pass(CountingPass);

        let trace = StageTrace::new();
        pm.set_trace(trace.clone());

        let mut module = Module::new("m");
        module.add_function(Function::new("a"));
        module.add_function(Function::new("b"));
        pm.run(&mut module).unwrap();

        let events = trace.events();
        assert_eq!(events.len(), 3);

        // Both functions finish "touch" before the module stage starts.
        let last = events.last().unwrap();
        assert_eq!(last.stage, "counting");
        assert_eq!(last.function, None);
        assert!(events[..2].iter().all(|e| e.stage == "touch"));
    }
}
