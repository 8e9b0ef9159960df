use crate::errors::{ActionError, SetupError};
use crate::state::SetupState;
use crate::step::{Action, StepKind};

/// Where a step currently is in its check → run → recheck cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    Checking,
    Running,
    Rechecking,
}

/// How a step reached completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The first check already passed; nothing was run.
    AlreadyDone,
    /// The resolution ran and the recheck confirmed it.
    Resolved,
}

/// Receives step transitions, e.g. to drive a progress display.
///
/// All methods default to no-ops.
pub trait StepObserver {
    fn phase_changed(&mut self, _action: &dyn Action, _phase: StepPhase) {}

    fn step_completed(&mut self, _action: &dyn Action, _outcome: StepOutcome) {}

    fn step_failed(&mut self, _action: &dyn Action, _error: &SetupError) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub id: String,
    pub kind: StepKind,
    pub outcome: StepOutcome,
}

/// Per-step outcomes of a pipeline that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub steps: Vec<StepReport>,
}

impl PipelineReport {
    /// Number of steps whose resolution had to run.
    pub fn resolved(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.outcome == StepOutcome::Resolved)
            .count()
    }

    pub fn already_done(&self) -> usize {
        self.steps.len() - self.resolved()
    }

    /// Append the steps of a later pipeline.
    pub fn extend(&mut self, other: PipelineReport) {
        self.steps.extend(other.steps);
    }
}

/// Executes actions strictly in order and stops at the first failure.
///
/// The runner performs no I/O of its own; everything user-visible goes
/// through the optional observer.
#[derive(Default)]
pub struct StepRunner<'a> {
    observer: Option<&'a mut dyn StepObserver>,
}

impl<'a> StepRunner<'a> {
    pub fn new() -> Self {
        Self { observer: None }
    }

    pub fn with_observer(observer: &'a mut dyn StepObserver) -> Self {
        Self {
            observer: Some(observer),
        }
    }

    fn notify(&mut self, action: &dyn Action, phase: StepPhase) {
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.phase_changed(action, phase);
        }
    }

    /// Run a single action through check → run → recheck.
    pub fn run_step(
        &mut self,
        action: &dyn Action,
        state: &mut SetupState,
    ) -> Result<StepOutcome, SetupError> {
        let result = self.drive(action, state);
        if let Some(observer) = self.observer.as_deref_mut() {
            match &result {
                Ok(outcome) => observer.step_completed(action, *outcome),
                Err(err) => observer.step_failed(action, err),
            }
        }
        result
    }

    fn drive(
        &mut self,
        action: &dyn Action,
        state: &mut SetupState,
    ) -> Result<StepOutcome, SetupError> {
        self.notify(action, StepPhase::Checking);
        if action
            .check(state)
            .map_err(|err| classify(action.id(), err, StepPhase::Checking))?
        {
            return Ok(StepOutcome::AlreadyDone);
        }

        if !action.has_resolution() {
            return Err(SetupError::Invariant {
                step: action.id().to_string(),
                reason: "check failed but no resolution is defined".to_string(),
            });
        }

        self.notify(action, StepPhase::Running);
        action
            .run(state)
            .map_err(|err| classify(action.id(), err, StepPhase::Running))?;

        self.notify(action, StepPhase::Rechecking);
        let done = action
            .check(state)
            .map_err(|err| classify(action.id(), err, StepPhase::Rechecking))?;
        if done {
            Ok(StepOutcome::Resolved)
        } else {
            Err(SetupError::RecheckDisagreement {
                step: action.id().to_string(),
            })
        }
    }

    /// Run every action in order, halting on the first failure.
    pub fn run_pipeline(
        &mut self,
        actions: &[&dyn Action],
        state: &mut SetupState,
    ) -> Result<PipelineReport, SetupError> {
        let mut report = PipelineReport::default();
        for action in actions {
            let outcome = self.run_step(*action, state)?;
            report.steps.push(StepReport {
                id: action.id().to_string(),
                kind: action.kind(),
                outcome,
            });
        }
        Ok(report)
    }
}

/// Run a pipeline without an observer.
pub fn run_pipeline(
    actions: &[&dyn Action],
    state: &mut SetupState,
) -> Result<PipelineReport, SetupError> {
    StepRunner::new().run_pipeline(actions, state)
}

fn classify(step: &str, err: ActionError, phase: StepPhase) -> SetupError {
    let step = step.to_string();
    match err {
        ActionError::Input(source) => SetupError::Input { step, source },
        ActionError::Invariant(reason) => SetupError::Invariant { step, reason },
        source if phase == StepPhase::Running => SetupError::Run { step, source },
        source => SetupError::Check { step, source },
    }
}
