use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditCategory {
    Workflow,
    Retrieval,
    Memory,
    Weather,
    Decision,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Degraded,
    Rejected,
    Failed,
}

/// Identifies the decision request an audit event belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub request_id: String,
    pub site: Option<String>,
    pub actor: String,
}

impl AuditContext {
    pub fn new(request_id: impl Into<String>, site: Option<String>, actor: impl Into<String>) -> Self {
        Self { request_id: request_id.into(), site, actor: actor.into() }
    }

    pub fn event(
        &self,
        event_type: impl Into<String>,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> AuditEvent {
        AuditEvent::new(
            self.request_id.clone(),
            self.site.clone(),
            event_type,
            category,
            self.actor.clone(),
            outcome,
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub request_id: String,
    pub site: Option<String>,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        request_id: impl Into<String>,
        site: Option<String>,
        event_type: impl Into<String>,
        category: AuditCategory,
        actor: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            request_id: request_id.into(),
            site,
            event_type: event_type.into(),
            category,
            actor: actor.into(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events().into_iter().map(|event| event.event_type).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Forwards audit events to the `tracing` subscriber as structured events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
        match event.outcome {
            AuditOutcome::Success => tracing::info!(
                event_name = %event.event_type,
                request_id = %event.request_id,
                site = event.site.as_deref().unwrap_or(""),
                category = ?event.category,
                actor = %event.actor,
                metadata = %metadata,
                "audit event"
            ),
            AuditOutcome::Degraded | AuditOutcome::Rejected | AuditOutcome::Failed => tracing::warn!(
                event_name = %event.event_type,
                request_id = %event.request_id,
                site = event.site.as_deref().unwrap_or(""),
                category = ?event.category,
                actor = %event.actor,
                outcome = ?event.outcome,
                metadata = %metadata,
                "audit event"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::{
        AuditCategory, AuditContext, AuditOutcome, AuditSink, InMemoryAuditSink, TracingAuditSink,
    };

    #[test]
    fn in_memory_sink_records_events_with_request_fields() {
        let sink = InMemoryAuditSink::default();
        let context = AuditContext::new("req-123", Some("Site Alpha".to_owned()), "coordinator");
        sink.emit(
            context
                .event("workflow.transition_applied", AuditCategory::Workflow, AuditOutcome::Success)
                .with_metadata("from", "Start")
                .with_metadata("to", "FanOut"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].request_id, "req-123");
        assert_eq!(events[0].site.as_deref(), Some("Site Alpha"));
        assert_eq!(events[0].actor, "coordinator");
        assert!(events[0].metadata.contains_key("from"));
        assert_eq!(sink.event_types(), vec!["workflow.transition_applied".to_owned()]);
    }

    #[test]
    fn tracing_sink_accepts_every_outcome() {
        let context = AuditContext::new("req-9", None, "coordinator");
        for outcome in
            [AuditOutcome::Success, AuditOutcome::Degraded, AuditOutcome::Rejected, AuditOutcome::Failed]
        {
            TracingAuditSink.emit(context.event("weather.fetch", AuditCategory::Weather, outcome));
        }
    }
}
