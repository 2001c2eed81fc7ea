use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowState {
    Start,
    FanOut,
    Join,
    Degraded,
    Extract,
    Evaluate,
    Decide,
    Persist,
    Done,
    Fatal,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Fatal)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowEvent {
    Dispatched,
    BranchesJoined,
    BranchDegraded,
    RulesAccepted,
    RulesInvalid,
    ThresholdsExtracted,
    ComplianceEvaluated,
    DecisionSynthesized,
    MemoryPersisted,
}

/// Facts gathered at the join point that guard the rule-acceptance transitions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WorkflowContext {
    pub retrieved_snippets: usize,
    pub well_formed_snippets: usize,
    pub degradations: usize,
}

impl WorkflowContext {
    /// Retrieval answered, but nothing it returned is structurally usable.
    pub fn rules_structurally_invalid(&self) -> bool {
        self.retrieved_snippets > 0 && self.well_formed_snippets == 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowAction {
    FanOutReads,
    RecordDegradations,
    ExtractThresholds,
    EvaluateCompliance,
    SynthesizeDecision,
    CommitMemories,
    AbortRequest,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub event: WorkflowEvent,
    pub actions: Vec<WorkflowAction>,
}
