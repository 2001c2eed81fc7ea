pub mod engine;
pub mod states;

pub use engine::{DecisionWorkflow, FlowTransitionError, WorkflowDefinition, WorkflowEngine};
pub use states::{
    TransitionOutcome, WorkflowAction, WorkflowContext, WorkflowEvent, WorkflowState,
};
