pub mod audit;
pub mod compliance;
pub mod config;
pub mod decision;
pub mod domain;
pub mod errors;
pub mod extract;
pub mod flows;
pub mod memory;
pub mod sandbox;

pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use compliance::{ComplianceEvaluation, ComplianceEvaluator};
pub use decision::{DecisionInput, DecisionSynthesizer};
pub use domain::{
    Citation, Collaborator, Comparator, ComplianceResult, Degradation, DegradationKind,
    MemoryCandidate, MemoryCategory, MemoryEntry, MemoryScope, Metric, MetricReading, RuleSnippet,
    SafetyDecision, Threshold, UnresolvedThreshold,
};
pub use errors::{CollaboratorError, ParseError, SandboxError, StoreError, WorkflowError};
pub use extract::{Extraction, ThresholdExtractor};
pub use memory::{
    AppendOutcome, CommitOutcome, MemoryJudge, MemoryPolicy, MemoryStore, RejectionReason,
    MIN_CONFIDENCE_FLOOR,
};
