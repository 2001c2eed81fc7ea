use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::citation::Citation;
use crate::domain::memory::{MemoryCandidate, MemoryEntry};
use crate::domain::threshold::{ComplianceResult, UnresolvedThreshold};

/// External input sources fanned out by the coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collaborator {
    Retrieval,
    MemoryRecall,
    Weather,
    Judge,
}

impl Collaborator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retrieval => "retrieval",
            Self::MemoryRecall => "memory recall",
            Self::Weather => "weather",
            Self::Judge => "memory judge",
        }
    }
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationKind {
    TimedOut,
    Failed,
    Disabled,
}

/// A missing input the decision was produced without.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Degradation {
    pub source: Collaborator,
    pub kind: DegradationKind,
    pub detail: String,
}

impl Degradation {
    pub fn new(source: Collaborator, kind: DegradationKind, detail: impl Into<String>) -> Self {
        Self { source, kind, detail: detail.into() }
    }
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DegradationKind::TimedOut => write!(f, "{} timed out ({})", self.source, self.detail),
            DegradationKind::Failed => write!(f, "{} failed ({})", self.source, self.detail),
            DegradationKind::Disabled => write!(f, "{} disabled ({})", self.source, self.detail),
        }
    }
}

/// Terminal output of one decision request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SafetyDecision {
    pub site: String,
    pub operation: String,
    pub can_proceed: bool,
    pub reasoning: String,
    pub recommendations: Vec<String>,
    pub citations: Vec<Citation>,
    pub compliance_results: Vec<ComplianceResult>,
    pub unresolved: Vec<UnresolvedThreshold>,
    pub surfaced_memories: Vec<MemoryEntry>,
    pub new_memories: Vec<MemoryCandidate>,
    pub degradations: Vec<Degradation>,
    pub decided_at: DateTime<Utc>,
}

impl SafetyDecision {
    pub fn violations(&self) -> impl Iterator<Item = &ComplianceResult> {
        self.compliance_results.iter().filter(|result| !result.satisfied)
    }

    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }

    pub fn cites(&self, citation: &Citation) -> bool {
        self.citations.iter().any(|candidate| candidate.source_index == citation.source_index)
    }
}
