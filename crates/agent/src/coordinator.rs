//! Request orchestration: concurrent reads, join, then the pure decision
//! pipeline, then memory persistence. Every state change goes through the
//! workflow engine and is audited.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use siteguard_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink, TracingAuditSink};
use siteguard_core::config::WorkflowConfig;
use siteguard_core::decision::{DecisionInput, DecisionSynthesizer};
use siteguard_core::domain::{
    Collaborator, Degradation, DegradationKind, MemoryCandidate, MemoryEntry, MetricReading,
    RuleSnippet, SafetyDecision,
};
use siteguard_core::errors::{CollaboratorError, WorkflowError};
use siteguard_core::flows::{
    DecisionWorkflow, TransitionOutcome, WorkflowContext, WorkflowEngine, WorkflowEvent, WorkflowState,
};
use siteguard_core::memory::{CommitOutcome, MemoryJudge, MemoryPolicy, MemoryStore};

use crate::retrieval::Retriever;
use crate::weather::WeatherProvider;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowSettings {
    pub retrieval_k: usize,
    pub retrieval_timeout: Duration,
    pub recall_timeout: Duration,
    pub weather_timeout: Duration,
    pub deadline: Duration,
}

impl From<&WorkflowConfig> for WorkflowSettings {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            retrieval_k: config.retrieval_k,
            retrieval_timeout: Duration::from_millis(config.retrieval_timeout_ms),
            recall_timeout: Duration::from_millis(config.recall_timeout_ms),
            weather_timeout: Duration::from_millis(config.weather_timeout_ms),
            deadline: Duration::from_millis(config.deadline_ms),
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            retrieval_k: 5,
            retrieval_timeout: Duration::from_millis(5_000),
            recall_timeout: Duration::from_millis(2_000),
            weather_timeout: Duration::from_millis(8_000),
            deadline: Duration::from_millis(15_000),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionRequest {
    pub request_id: String,
    pub site: String,
    pub operation: String,
    /// Free text from the operator, offered to the memory judge.
    pub interaction: Option<String>,
    pub actor: String,
}

impl DecisionRequest {
    pub fn new(site: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            site: site.into(),
            operation: operation.into(),
            interaction: None,
            actor: "operator".to_string(),
        }
    }

    pub fn with_interaction(mut self, interaction: impl Into<String>) -> Self {
        self.interaction = Some(interaction.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    fn query(&self) -> String {
        format!(
            "{} safety limits at {}: wind speed, gusts, rain, temperature, visibility",
            self.operation, self.site
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WorkflowOutcome {
    pub decision: SafetyDecision,
    pub trace: Vec<TransitionOutcome>,
    pub commits: Vec<CommitOutcome>,
}

impl WorkflowOutcome {
    pub fn final_state(&self) -> Option<WorkflowState> {
        self.trace.last().map(|transition| transition.to)
    }
}

struct Gathered {
    snippets: Vec<RuleSnippet>,
    memories: Vec<MemoryEntry>,
    readings: Vec<MetricReading>,
    candidates: Vec<MemoryCandidate>,
    degradations: Vec<Degradation>,
}

pub struct WorkflowCoordinator {
    retriever: Arc<dyn Retriever>,
    memory: Arc<dyn MemoryStore>,
    judge: Arc<dyn MemoryJudge>,
    weather: Option<Arc<dyn WeatherProvider>>,
    audit: Arc<dyn AuditSink>,
    policy: MemoryPolicy,
    synthesizer: DecisionSynthesizer,
    settings: WorkflowSettings,
    engine: WorkflowEngine<DecisionWorkflow>,
}

impl WorkflowCoordinator {
    pub fn new(retriever: Arc<dyn Retriever>, memory: Arc<dyn MemoryStore>, judge: Arc<dyn MemoryJudge>) -> Self {
        Self {
            retriever,
            memory,
            judge,
            weather: None,
            audit: Arc::new(TracingAuditSink),
            policy: MemoryPolicy::default(),
            synthesizer: DecisionSynthesizer::new(),
            settings: WorkflowSettings::default(),
            engine: WorkflowEngine::default(),
        }
    }

    pub fn with_weather(mut self, weather: Arc<dyn WeatherProvider>) -> Self {
        self.weather = Some(weather);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_policy(mut self, policy: MemoryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_settings(mut self, settings: WorkflowSettings) -> Self {
        self.settings = settings;
        self
    }

    pub async fn check(&self, request: DecisionRequest) -> Result<WorkflowOutcome, WorkflowError> {
        let audit = AuditContext::new(request.request_id.clone(), Some(request.site.clone()), request.actor.clone());
        let mut state = self.engine.initial_state();
        let mut trace = Vec::new();
        let mut context = WorkflowContext::default();

        self.advance(&mut state, WorkflowEvent::Dispatched, &context, &audit, &mut trace)?;
        let gathered = self.gather(&request).await;

        context.retrieved_snippets = gathered.snippets.len();
        context.well_formed_snippets = gathered.snippets.iter().filter(|snippet| snippet.is_well_formed()).count();
        context.degradations = gathered.degradations.len();
        self.advance(&mut state, WorkflowEvent::BranchesJoined, &context, &audit, &mut trace)?;

        if !gathered.degradations.is_empty() {
            self.advance(&mut state, WorkflowEvent::BranchDegraded, &context, &audit, &mut trace)?;
        }

        if context.rules_structurally_invalid() {
            self.advance(&mut state, WorkflowEvent::RulesInvalid, &context, &audit, &mut trace)?;
            warn!(
                event_name = "workflow.request.fatal",
                request_id = %request.request_id,
                retrieved = context.retrieved_snippets,
                "no retrieved rule snippet is structurally valid"
            );
            return Err(WorkflowError::Fatal(format!(
                "{} rule snippets retrieved, none well formed",
                context.retrieved_snippets
            )));
        }
        if context.well_formed_snippets < context.retrieved_snippets {
            warn!(
                event_name = "workflow.rules.malformed_dropped",
                request_id = %request.request_id,
                dropped = context.retrieved_snippets - context.well_formed_snippets,
                "dropping malformed rule snippets"
            );
        }
        self.advance(&mut state, WorkflowEvent::RulesAccepted, &context, &audit, &mut trace)?;

        let extraction = self.synthesizer.extract(&gathered.snippets);
        for skipped in &extraction.skipped {
            debug!(
                event_name = "extract.clause_skipped",
                request_id = %request.request_id,
                source_index = skipped.source_index,
                reason = %skipped.reason,
                "clause skipped"
            );
        }
        self.advance(&mut state, WorkflowEvent::ThresholdsExtracted, &context, &audit, &mut trace)?;

        let evaluation = self.synthesizer.evaluate(&extraction.thresholds, &gathered.readings);
        self.advance(&mut state, WorkflowEvent::ComplianceEvaluated, &context, &audit, &mut trace)?;

        let input = DecisionInput {
            site: request.site.clone(),
            operation: request.operation.clone(),
            rule_snippets: gathered.snippets,
            memory_context: gathered.memories,
            weather_metrics: gathered.readings,
            new_memories: gathered.candidates,
            degradations: gathered.degradations,
        };
        let decision = self.synthesizer.synthesize(input, &extraction, &evaluation, Utc::now());
        self.advance(&mut state, WorkflowEvent::DecisionSynthesized, &context, &audit, &mut trace)?;

        let commits = self.persist(&request, &decision).await;
        self.advance(&mut state, WorkflowEvent::MemoryPersisted, &context, &audit, &mut trace)?;

        let outcome = if decision.is_degraded() { AuditOutcome::Degraded } else { AuditOutcome::Success };
        self.audit.emit(
            audit
                .event("decision.issued", AuditCategory::Decision, outcome)
                .with_metadata("can_proceed", decision.can_proceed.to_string())
                .with_metadata("violations", decision.violations().count().to_string())
                .with_metadata("citations", decision.citations.len().to_string()),
        );
        info!(
            event_name = "workflow.decision.issued",
            request_id = %request.request_id,
            site = %decision.site,
            can_proceed = decision.can_proceed,
            violations = decision.violations().count(),
            degraded = decision.is_degraded(),
            "safety decision issued"
        );

        Ok(WorkflowOutcome { decision, trace, commits })
    }

    fn advance(
        &self,
        state: &mut WorkflowState,
        event: WorkflowEvent,
        context: &WorkflowContext,
        audit: &AuditContext,
        trace: &mut Vec<TransitionOutcome>,
    ) -> Result<(), WorkflowError> {
        let outcome = self.engine.apply_with_audit(state, &event, context, self.audit.as_ref(), audit)?;
        *state = outcome.to;
        trace.push(outcome);
        Ok(())
    }

    /// Runs the three reads concurrently, each bounded by its own timeout and
    /// the request deadline, then asks the judge with whatever time is left.
    async fn gather(&self, request: &DecisionRequest) -> Gathered {
        let started = Instant::now();
        let settings = &self.settings;
        let bounded = |limit: Duration| limit.min(settings.deadline);
        let query = request.query();

        let retrieval = within(
            Collaborator::Retrieval,
            bounded(settings.retrieval_timeout),
            self.retriever.search(&query, settings.retrieval_k),
        );
        let recall = within(Collaborator::MemoryRecall, bounded(settings.recall_timeout), async {
            self.memory
                .read_all()
                .await
                .map_err(|error| CollaboratorError::failure(Collaborator::MemoryRecall, error.to_string()))
        });
        let weather = async {
            match &self.weather {
                Some(provider) => {
                    Some(within(Collaborator::Weather, bounded(settings.weather_timeout), provider.fetch(&request.site)).await)
                }
                None => None,
            }
        };
        let (retrieval, recall, weather) = tokio::join!(retrieval, recall, weather);

        let mut degradations = Vec::new();
        let snippets = match retrieval {
            Ok(snippets) if snippets.is_empty() => {
                degradations.push(Degradation::new(Collaborator::Retrieval, DegradationKind::Failed, "no rule snippets matched"));
                snippets
            }
            Ok(snippets) => snippets,
            Err(error) => {
                degradations.push(self.degrade(request, &error));
                Vec::new()
            }
        };
        let memories = recall.unwrap_or_else(|error| {
            degradations.push(self.degrade(request, &error));
            Vec::new()
        });
        let readings = match weather {
            Some(Ok(readings)) => readings,
            Some(Err(error)) => {
                degradations.push(self.degrade(request, &error));
                Vec::new()
            }
            None => {
                degradations.push(Degradation::new(Collaborator::Weather, DegradationKind::Disabled, "weather checks are turned off"));
                Vec::new()
            }
        };

        let mut candidates = Vec::new();
        if let Some(interaction) = request.interaction.as_deref() {
            let remaining = settings.deadline.saturating_sub(started.elapsed());
            let judged = within(
                Collaborator::Judge,
                remaining,
                self.policy.evaluate_for_memory(self.judge.as_ref(), interaction, &memories),
            )
            .await;
            match judged {
                Ok(Some(candidate)) => candidates.push(candidate),
                Ok(None) => {}
                Err(error) => degradations.push(self.degrade(request, &error)),
            }
        }

        Gathered { snippets, memories, readings, candidates, degradations }
    }

    fn degrade(&self, request: &DecisionRequest, error: &CollaboratorError) -> Degradation {
        let (kind, detail, event_name) = match error {
            CollaboratorError::Timeout { after_ms, .. } => {
                (DegradationKind::TimedOut, format!("after {after_ms}ms"), "workflow.branch.timed_out")
            }
            CollaboratorError::Failure { message, .. } | CollaboratorError::InvalidResponse { message, .. } => {
                (DegradationKind::Failed, message.clone(), "workflow.branch.failed")
            }
        };
        warn!(
            event_name,
            request_id = %request.request_id,
            collaborator = %error.collaborator(),
            error = %error,
            "collaborator degraded"
        );
        Degradation::new(error.collaborator(), kind, detail)
    }

    async fn persist(&self, request: &DecisionRequest, decision: &SafetyDecision) -> Vec<CommitOutcome> {
        let mut commits = Vec::new();
        for candidate in &decision.new_memories {
            match self.policy.commit(candidate, self.memory.as_ref(), Utc::now()).await {
                Ok(outcome) => commits.push(outcome),
                Err(error) => warn!(
                    event_name = "memory.commit.failed",
                    request_id = %request.request_id,
                    scope = %candidate.scope,
                    error = %error,
                    "memory commit failed; decision unaffected"
                ),
            }
        }
        commits
    }
}

async fn within<T, F>(collaborator: Collaborator, limit: Duration, future: F) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout {
            collaborator,
            after_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

#[cfg(test)]
mod tests {
    use siteguard_core::config::AppConfig;

    use super::{DecisionRequest, WorkflowSettings};

    #[test]
    fn settings_follow_workflow_config() {
        let config = AppConfig::default();
        assert_eq!(WorkflowSettings::from(&config.workflow), WorkflowSettings::default());
    }

    #[test]
    fn retrieval_query_names_operation_and_site() {
        let request = DecisionRequest::new("Site Alpha", "crane lift");
        let query = request.query();
        assert!(query.starts_with("crane lift safety limits at Site Alpha"));
        assert!(query.contains("wind"));
        assert_eq!(request.actor, "operator");
    }
}
