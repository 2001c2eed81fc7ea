use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::flows::states::{
    TransitionOutcome, WorkflowAction, WorkflowContext, WorkflowEvent, WorkflowState,
};

pub trait WorkflowDefinition {
    fn initial_state(&self) -> WorkflowState;
    fn transition(
        &self,
        current: &WorkflowState,
        event: &WorkflowEvent,
        context: &WorkflowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Fan-out, join, extract, evaluate, decide, persist.
#[derive(Clone, Debug, Default)]
pub struct DecisionWorkflow;

impl WorkflowDefinition for DecisionWorkflow {
    fn initial_state(&self) -> WorkflowState {
        WorkflowState::Start
    }

    fn transition(
        &self,
        current: &WorkflowState,
        event: &WorkflowEvent,
        context: &WorkflowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_decision(current, event, context)
    }
}

pub struct WorkflowEngine<F> {
    flow: F,
}

impl<F> WorkflowEngine<F>
where
    F: WorkflowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> WorkflowState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &WorkflowState,
        event: &WorkflowEvent,
        context: &WorkflowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &WorkflowState,
        event: &WorkflowEvent,
        context: &WorkflowContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                let audit_outcome = match outcome.to {
                    WorkflowState::Degraded => AuditOutcome::Degraded,
                    WorkflowState::Fatal => AuditOutcome::Failed,
                    _ => AuditOutcome::Success,
                };
                sink.emit(
                    audit
                        .event("workflow.transition_applied", AuditCategory::Workflow, audit_outcome)
                        .with_metadata("from", format!("{:?}", outcome.from))
                        .with_metadata("to", format!("{:?}", outcome.to))
                        .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    audit
                        .event("workflow.transition_rejected", AuditCategory::Workflow, AuditOutcome::Rejected)
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for WorkflowEngine<DecisionWorkflow> {
    fn default() -> Self {
        Self::new(DecisionWorkflow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("retrieved rules are structurally invalid in {state:?} ({retrieved} snippets, none well formed)")]
    RulesStructurallyInvalid { state: WorkflowState, retrieved: usize },
    #[error("rules are usable in {state:?}; {event:?} does not apply")]
    RulesUsable { state: WorkflowState, event: WorkflowEvent },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: WorkflowState, event: WorkflowEvent },
}

fn transition_decision(
    current: &WorkflowState,
    event: &WorkflowEvent,
    context: &WorkflowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use WorkflowAction::{
        AbortRequest, CommitMemories, EvaluateCompliance, ExtractThresholds, FanOutReads,
        RecordDegradations, SynthesizeDecision,
    };
    use WorkflowEvent::{
        BranchDegraded, BranchesJoined, ComplianceEvaluated, DecisionSynthesized, Dispatched,
        MemoryPersisted, RulesAccepted, RulesInvalid, ThresholdsExtracted,
    };
    use WorkflowState::{Decide, Degraded, Done, Evaluate, Extract, Fatal, FanOut, Join, Persist, Start};

    let (to, actions) = match (current, event) {
        (Start, Dispatched) => (FanOut, vec![FanOutReads]),
        (FanOut, BranchesJoined) => (Join, Vec::new()),
        (Join, BranchDegraded) => (Degraded, vec![RecordDegradations]),
        (Join, RulesAccepted) | (Degraded, RulesAccepted) => {
            if context.rules_structurally_invalid() {
                return Err(FlowTransitionError::RulesStructurallyInvalid {
                    state: *current,
                    retrieved: context.retrieved_snippets,
                });
            }
            (Extract, vec![ExtractThresholds])
        }
        (Join, RulesInvalid) | (Degraded, RulesInvalid) => {
            if !context.rules_structurally_invalid() {
                return Err(FlowTransitionError::RulesUsable { state: *current, event: *event });
            }
            (Fatal, vec![AbortRequest])
        }
        (Extract, ThresholdsExtracted) => (Evaluate, vec![EvaluateCompliance]),
        (Evaluate, ComplianceEvaluated) => (Decide, vec![SynthesizeDecision]),
        (Decide, DecisionSynthesized) => (Persist, vec![CommitMemories]),
        (Persist, MemoryPersisted) => (Done, Vec::new()),
        _ => {
            return Err(FlowTransitionError::InvalidTransition { state: *current, event: *event });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event, actions })
}
