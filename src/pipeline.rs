//! Pipeline assembly: which categories of steps take part in a run.
//!
//! Opt-ins are themselves answered by steps, so the catalog is run one
//! segment at a time and the selection is recomputed before each segment.

use crate::collector_config::Section;
use crate::errors::SetupError;
use crate::orchestrator::{PipelineReport, StepRunner};
use crate::state::SetupState;
use crate::step::{Action, StepKind};

/// Which optional features the run sets up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureSelection {
    pub log_insights: bool,
    pub automated_explain: bool,
}

impl FeatureSelection {
    /// Derive the selection from inputs and the existing config.
    ///
    /// An explicit answer wins. Without one, a feature counts as opted in
    /// when a previous run already configured it.
    pub fn from_state(state: &SetupState) -> Self {
        let inputs = state.inputs();
        let log_insights = inputs
            .confirm_set_up_log_insights
            .unwrap_or_else(|| state.server_key("db_log_location").is_some());
        let automated_explain = log_insights
            && inputs
                .confirm_set_up_automated_explain
                .unwrap_or_else(|| state.server_key("enable_log_explain").is_some());
        Self {
            log_insights,
            automated_explain,
        }
    }

    pub fn includes(&self, kind: StepKind) -> bool {
        match kind {
            StepKind::Baseline => true,
            StepKind::LogInsights => self.log_insights,
            StepKind::AutomatedExplain => self.log_insights && self.automated_explain,
        }
    }
}

/// Filter `steps` down to the ones the selection includes, keeping order.
pub fn assemble<'a, A: Action>(steps: &'a [A], selection: &FeatureSelection) -> Vec<&'a dyn Action> {
    steps
        .iter()
        .filter(|step| selection.includes(step.kind()))
        .map(|step| step as &dyn Action)
        .collect()
}

/// Run segments in order, reassembling each against the current state.
///
/// An open administrative connection must answer a ping again before each
/// segment uses it.
pub fn run_segments<A: Action>(
    runner: &mut StepRunner<'_>,
    segments: &[&[A]],
    state: &mut SetupState,
) -> Result<PipelineReport, SetupError> {
    let mut report = PipelineReport::default();
    for segment in segments {
        if state.has_connection() {
            state.mark_connection_stale();
        }
        let selection = FeatureSelection::from_state(state);
        let actions = assemble(segment, &selection);
        report.extend(runner.run_pipeline(&actions, state)?);
    }
    Ok(report)
}

/// Whether the server section already enables log-based EXPLAIN.
pub fn uses_log_explain(state: &SetupState) -> bool {
    state
        .config()
        .ok()
        .and_then(|c| c.get_bool(Section::Server, "enable_log_explain"))
        .unwrap_or(false)
}
