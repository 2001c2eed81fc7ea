pub mod citation;
pub mod decision;
pub mod memory;
pub mod metric;
pub mod threshold;

pub use citation::{Citation, RuleSnippet};
pub use decision::{Collaborator, Degradation, DegradationKind, SafetyDecision};
pub use memory::{normalize_key, MemoryCandidate, MemoryCategory, MemoryEntry, MemoryScope};
pub use metric::{canonicalize, CanonicalValue, Comparator, Metric, MetricReading, UnitFamily};
pub use threshold::{ComplianceResult, Threshold, UnresolvedThreshold};
