//! Step orchestration: check → run → recheck with fail-stop semantics.

pub mod runner;

pub use runner::{
    PipelineReport, StepObserver, StepOutcome, StepPhase, StepReport, StepRunner, run_pipeline,
};
