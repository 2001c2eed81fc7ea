use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use siteguard_agent::{
    DecisionRequest, HeuristicMemoryJudge, Retriever, WeatherProvider, WorkflowCoordinator, WorkflowSettings,
};
use siteguard_core::audit::InMemoryAuditSink;
use siteguard_core::domain::{
    Citation, Collaborator, DegradationKind, MemoryCategory, MemoryScope, Metric, MetricReading, RuleSnippet,
};
use siteguard_core::errors::{CollaboratorError, WorkflowError};
use siteguard_core::flows::WorkflowState;
use siteguard_core::memory::{CommitOutcome, MemoryStore};
use siteguard_db::InMemoryMemoryStore;

const CRANE_RULE: &str = "Crane operations must stop when wind speed exceeds 20 mph.";

struct StaticRetriever {
    snippets: Vec<RuleSnippet>,
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn search(&self, _query: &str, k: usize) -> Result<Vec<RuleSnippet>, CollaboratorError> {
        Ok(self.snippets.iter().take(k).cloned().collect())
    }
}

struct SlowRetriever;

#[async_trait]
impl Retriever for SlowRetriever {
    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<RuleSnippet>, CollaboratorError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Vec::new())
    }
}

struct FixedWeather {
    wind_mph: f64,
}

#[async_trait]
impl WeatherProvider for FixedWeather {
    async fn fetch(&self, _location: &str) -> Result<Vec<MetricReading>, CollaboratorError> {
        Ok(vec![MetricReading::new(Metric::WindSpeed, self.wind_mph, "mph", Utc::now())])
    }
}

struct FailingWeather;

#[async_trait]
impl WeatherProvider for FailingWeather {
    async fn fetch(&self, location: &str) -> Result<Vec<MetricReading>, CollaboratorError> {
        Err(CollaboratorError::failure(Collaborator::Weather, format!("could not geocode `{location}`")))
    }
}

fn crane_rules() -> Arc<dyn Retriever> {
    Arc::new(StaticRetriever {
        snippets: vec![RuleSnippet::new(CRANE_RULE, Citation::new(1, "crane-manual.md", CRANE_RULE, 0.9))],
    })
}

fn fast_settings() -> WorkflowSettings {
    WorkflowSettings {
        retrieval_timeout: Duration::from_millis(50),
        recall_timeout: Duration::from_millis(500),
        weather_timeout: Duration::from_millis(500),
        deadline: Duration::from_secs(2),
        ..WorkflowSettings::default()
    }
}

fn coordinator(
    retriever: Arc<dyn Retriever>,
    store: Arc<InMemoryMemoryStore>,
    audit: &InMemoryAuditSink,
) -> WorkflowCoordinator {
    WorkflowCoordinator::new(retriever, store, Arc::new(HeuristicMemoryJudge::new()))
        .with_audit(Arc::new(audit.clone()))
        .with_settings(fast_settings())
}

#[tokio::test]
async fn high_wind_blocks_the_lift_and_logs_the_pause() {
    let store = Arc::new(InMemoryMemoryStore::new());
    let audit = InMemoryAuditSink::default();
    let coordinator =
        coordinator(crane_rules(), Arc::clone(&store), &audit).with_weather(Arc::new(FixedWeather { wind_mph: 25.0 }));

    let outcome = coordinator.check(DecisionRequest::new("Site Alpha", "crane lift")).await.expect("decision");

    let decision = &outcome.decision;
    assert!(!decision.can_proceed);
    assert_eq!(decision.compliance_results.len(), 1);
    assert_eq!(decision.compliance_results[0].margin, 5.0);
    assert!(decision.reasoning.contains("[Source 1]"));
    assert_eq!(decision.citations.len(), 1);
    assert!(decision.degradations.is_empty());
    assert_eq!(outcome.final_state(), Some(WorkflowState::Done));

    let states: Vec<WorkflowState> = outcome.trace.iter().map(|transition| transition.to).collect();
    assert_eq!(
        states,
        vec![
            WorkflowState::FanOut,
            WorkflowState::Join,
            WorkflowState::Extract,
            WorkflowState::Evaluate,
            WorkflowState::Decide,
            WorkflowState::Persist,
            WorkflowState::Done,
        ]
    );

    assert!(matches!(
        outcome.commits.as_slice(),
        [CommitOutcome::Committed(entry)] if entry.category == MemoryCategory::DecisionLog
    ));
    let organization = store.read(MemoryScope::Organization).await.expect("read");
    assert_eq!(organization.len(), 1);
    assert!(organization[0].content.contains("Safety pause at Site Alpha"));

    let types = audit.event_types();
    assert_eq!(types.iter().filter(|event| *event == "workflow.transition_applied").count(), 7);
    assert_eq!(types.last().map(String::as_str), Some("decision.issued"));
}

#[tokio::test]
async fn disabled_weather_is_insufficient_data() {
    let store = Arc::new(InMemoryMemoryStore::new());
    let audit = InMemoryAuditSink::default();

    let outcome = coordinator(crane_rules(), store, &audit)
        .check(DecisionRequest::new("Site Alpha", "crane lift"))
        .await
        .expect("decision");

    let decision = &outcome.decision;
    assert!(!decision.can_proceed);
    assert!(decision.reasoning.contains("Insufficient data"));
    assert_eq!(decision.degradations.len(), 1);
    assert_eq!(decision.degradations[0].source, Collaborator::Weather);
    assert_eq!(decision.degradations[0].kind, DegradationKind::Disabled);
    assert!(outcome.trace.iter().any(|transition| transition.to == WorkflowState::Degraded));
    assert_eq!(outcome.final_state(), Some(WorkflowState::Done));
}

#[tokio::test]
async fn weather_failure_degrades_without_aborting() {
    let store = Arc::new(InMemoryMemoryStore::new());
    let audit = InMemoryAuditSink::default();

    let outcome = coordinator(crane_rules(), store, &audit)
        .with_weather(Arc::new(FailingWeather))
        .check(DecisionRequest::new("Site Alpha", "crane lift"))
        .await
        .expect("decision");

    let degradation = &outcome.decision.degradations[0];
    assert_eq!(degradation.kind, DegradationKind::Failed);
    assert!(degradation.detail.contains("could not geocode"));
    assert!(!outcome.decision.can_proceed);
}

#[tokio::test]
async fn slow_retrieval_times_out_and_fails_closed() {
    let store = Arc::new(InMemoryMemoryStore::new());
    let audit = InMemoryAuditSink::default();

    let outcome = coordinator(Arc::new(SlowRetriever), store, &audit)
        .with_weather(Arc::new(FixedWeather { wind_mph: 5.0 }))
        .check(DecisionRequest::new("Site Alpha", "crane lift"))
        .await
        .expect("decision");

    let decision = &outcome.decision;
    assert!(!decision.can_proceed);
    assert!(decision.reasoning.contains("No numeric safety thresholds"));
    let retrieval = decision
        .degradations
        .iter()
        .find(|degradation| degradation.source == Collaborator::Retrieval)
        .expect("retrieval degradation");
    assert_eq!(retrieval.kind, DegradationKind::TimedOut);
    assert_eq!(retrieval.detail, "after 50ms");
}

#[tokio::test]
async fn structurally_invalid_rules_abort_the_request() {
    let store = Arc::new(InMemoryMemoryStore::new());
    let audit = InMemoryAuditSink::default();
    let retriever = Arc::new(StaticRetriever {
        snippets: vec![
            RuleSnippet::new("", Citation::new(1, "empty.md", "", 0.8)),
            RuleSnippet::new(CRANE_RULE, Citation::new(2, "crane-manual.md", CRANE_RULE, f64::NAN)),
        ],
    });

    let result = coordinator(retriever, Arc::clone(&store), &audit)
        .with_weather(Arc::new(FixedWeather { wind_mph: 5.0 }))
        .check(DecisionRequest::new("Site Alpha", "crane lift").with_interaction("The hoist cable is damaged."))
        .await;

    assert!(matches!(result, Err(WorkflowError::Fatal(_))));
    assert!(store.read_all().await.expect("read").is_empty(), "nothing persisted on a fatal request");
    let fatal = audit
        .events()
        .into_iter()
        .any(|event| event.metadata.get("to").map(String::as_str) == Some("Fatal"));
    assert!(fatal);
    assert!(!audit.event_types().contains(&"decision.issued".to_string()));
}

#[tokio::test]
async fn reported_site_issue_is_surfaced_on_the_next_check() {
    let store = Arc::new(InMemoryMemoryStore::new());
    let audit = InMemoryAuditSink::default();
    let coordinator =
        coordinator(crane_rules(), Arc::clone(&store), &audit).with_weather(Arc::new(FixedWeather { wind_mph: 12.0 }));

    let first = coordinator
        .check(
            DecisionRequest::new("Site Alpha", "crane lift")
                .with_interaction("Heads up. The north crane has a hydraulic leak."),
        )
        .await
        .expect("first decision");
    assert!(first.decision.can_proceed);
    assert!(matches!(
        first.commits.as_slice(),
        [CommitOutcome::Committed(entry)] if entry.category == MemoryCategory::SiteIssue
    ));

    let second = coordinator.check(DecisionRequest::new("Site Alpha", "crane lift")).await.expect("second decision");
    assert!(second
        .decision
        .surfaced_memories
        .iter()
        .any(|entry| entry.content == "The north crane has a hydraulic leak"));
    assert!(second
        .decision
        .recommendations
        .iter()
        .any(|recommendation| recommendation.starts_with("Address known site issue")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_checks_commit_a_reported_fact_once() {
    let store = Arc::new(InMemoryMemoryStore::new());
    let audit = InMemoryAuditSink::default();
    let coordinator = Arc::new(
        coordinator(crane_rules(), Arc::clone(&store), &audit).with_weather(Arc::new(FixedWeather { wind_mph: 12.0 })),
    );

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                coordinator
                    .check(
                        DecisionRequest::new("Site Alpha", "crane lift")
                            .with_interaction("Gate 4 scaffolding is unstable."),
                    )
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.expect("check task").expect("decision");
    }

    let organization = store.read(MemoryScope::Organization).await.expect("read");
    let issues: Vec<_> =
        organization.iter().filter(|entry| entry.category == MemoryCategory::SiteIssue).collect();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].content, "Gate 4 scaffolding is unstable");
}
