//! The administrative action contract and the catalog's step type.

use crate::errors::ActionError;
use crate::state::SetupState;

/// Category used only when assembling a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    Baseline,
    LogInsights,
    AutomatedExplain,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::Baseline => write!(f, "baseline"),
            StepKind::LogInsights => write!(f, "log-insights"),
            StepKind::AutomatedExplain => write!(f, "automated-explain"),
        }
    }
}

/// A named unit of work against Postgres or the collector config.
///
/// `check` must not change the target system or the config file; it may
/// record observations in [`SetupState`]. `run` makes `check` pass and is
/// never trusted on its own: the orchestrator always rechecks.
pub trait Action {
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    fn kind(&self) -> StepKind;

    /// `Ok(true)` when the post-condition already holds.
    fn check(&self, state: &mut SetupState) -> Result<bool, ActionError>;

    /// Whether a remediation exists. Check-only actions return `false`.
    fn has_resolution(&self) -> bool;

    fn run(&self, state: &mut SetupState) -> Result<(), ActionError>;
}

pub type CheckFn = fn(&mut SetupState) -> Result<bool, ActionError>;
pub type RunFn = fn(&mut SetupState) -> Result<(), ActionError>;

/// A catalog entry built from plain functions.
#[derive(Debug, Clone, Copy)]
pub struct Step {
    pub id: &'static str,
    pub kind: StepKind,
    pub description: &'static str,
    pub check: CheckFn,
    pub run: Option<RunFn>,
}

impl Step {
    /// A step with a remediation.
    pub const fn new(
        id: &'static str,
        kind: StepKind,
        description: &'static str,
        check: CheckFn,
        run: RunFn,
    ) -> Self {
        Self {
            id,
            kind,
            description,
            check,
            run: Some(run),
        }
    }

    /// A step whose check either passes or halts setup.
    pub const fn check_only(
        id: &'static str,
        kind: StepKind,
        description: &'static str,
        check: CheckFn,
    ) -> Self {
        Self {
            id,
            kind,
            description,
            check,
            run: None,
        }
    }
}

impl Action for Step {
    fn id(&self) -> &str {
        self.id
    }

    fn description(&self) -> &str {
        self.description
    }

    fn kind(&self) -> StepKind {
        self.kind
    }

    fn check(&self, state: &mut SetupState) -> Result<bool, ActionError> {
        (self.check)(state)
    }

    fn has_resolution(&self) -> bool {
        self.run.is_some()
    }

    fn run(&self, state: &mut SetupState) -> Result<(), ActionError> {
        match self.run {
            Some(run) => run(state),
            None => Err(ActionError::Invariant(format!(
                "step {} has no resolution",
                self.id
            ))),
        }
    }
}
