//! Collaborators and orchestration for a safety check.
//!
//! The coordinator fans out to three reads (rule retrieval, memory recall,
//! weather), joins them under per-branch timeouts and a request deadline,
//! then hands everything to the pure decision pipeline in `siteguard-core`.
//!
//! # Safety Principle
//!
//! The LLM only judges what is worth remembering. It never decides whether
//! operations may proceed; that comes from extracted thresholds and the
//! compliance evaluator.

pub mod coordinator;
pub mod judge;
pub mod llm;
pub mod retrieval;
pub mod weather;

pub use coordinator::{DecisionRequest, WorkflowCoordinator, WorkflowOutcome, WorkflowSettings};
pub use judge::{HeuristicMemoryJudge, LlmMemoryJudge};
pub use llm::{LlmClient, OpenAiCompatibleClient};
pub use retrieval::{KeywordRetriever, Retriever, RuleDocument};
pub use weather::{OpenMeteoClient, WeatherProvider};
