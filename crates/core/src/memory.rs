//! Durable-memory policy: which judged facts are worth remembering and how
//! they are committed.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{normalize_key, MemoryCandidate, MemoryEntry, MemoryScope};
use crate::errors::{CollaboratorError, StoreError};

/// Lowest confidence a candidate may have and still be committed.
pub const MIN_CONFIDENCE_FLOOR: f64 = 0.70;

const SMALL_TALK: &[&str] = &[
    "hi", "hello", "hey", "thanks", "thank", "you", "ok", "okay", "bye", "goodbye", "yes", "no",
    "sure", "cool", "great", "good", "morning", "afternoon", "evening", "please", "cheers", "yep",
    "nope", "fine", "thx",
];

const SENSITIVE_PHRASES: &[&str] = &[
    "password", "passwd", "passcode", "api key", "api_key", "apikey", "secret", "token",
    "private key", "ssn", "social security", "credit card", "card number",
];

const SECRET_PREFIXES: &[&str] = &["sk-", "xoxb-", "xoxp-", "xapp-", "nvapi-", "ghp_", "akia"];

/// Append-only memory persistence. `append_unique` performs the duplicate
/// check and the append as one atomic step per scope.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn read(&self, scope: MemoryScope) -> Result<Vec<MemoryEntry>, StoreError>;
    async fn append_unique(&self, entry: MemoryEntry) -> Result<AppendOutcome, StoreError>;

    async fn read_all(&self) -> Result<Vec<MemoryEntry>, StoreError> {
        let mut entries = Vec::new();
        for scope in MemoryScope::ALL {
            entries.extend(self.read(scope).await?);
        }
        Ok(entries)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    Duplicate,
}

/// Decides whether an interaction contains a reusable fact.
#[async_trait]
pub trait MemoryJudge: Send + Sync {
    async fn judge(
        &self,
        interaction: &str,
        existing: &[MemoryEntry],
    ) -> Result<Option<MemoryCandidate>, CollaboratorError>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    LowConfidence { confidence: f64, floor: f64 },
    InvalidConfidence,
    Duplicate,
    SensitiveContent,
    EmptyContent,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowConfidence { confidence, floor } => {
                write!(f, "confidence {confidence:.2} is below the {floor:.2} floor")
            }
            Self::InvalidConfidence => f.write_str("confidence is not a finite number"),
            Self::Duplicate => f.write_str("an equivalent memory already exists"),
            Self::SensitiveContent => f.write_str("content looks like a secret or personal identifier"),
            Self::EmptyContent => f.write_str("content is empty"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum CommitOutcome {
    Committed(MemoryEntry),
    Rejected(RejectionReason),
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MemoryPolicy {
    min_confidence: f64,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self { min_confidence: MIN_CONFIDENCE_FLOOR }
    }
}

impl MemoryPolicy {
    /// Floors below [`MIN_CONFIDENCE_FLOOR`] are raised to it.
    pub fn new(min_confidence: f64) -> Self {
        let min_confidence = if min_confidence.is_finite() {
            min_confidence.clamp(MIN_CONFIDENCE_FLOOR, 1.0)
        } else {
            MIN_CONFIDENCE_FLOOR
        };
        Self { min_confidence }
    }

    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    pub fn is_small_talk(interaction: &str) -> bool {
        let words: Vec<String> = interaction
            .split(|ch: char| !ch.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .map(str::to_lowercase)
            .collect();
        words.len() < 3 || words.iter().all(|word| SMALL_TALK.contains(&word.as_str()))
    }

    /// Asks the judge for a candidate and validates what it returns.
    ///
    /// Empty and small-talk interactions never reach the judge. A candidate
    /// with a non-finite confidence is dropped; finite confidences outside
    /// `[0, 1]` are clamped.
    pub async fn evaluate_for_memory<J>(
        &self,
        judge: &J,
        interaction: &str,
        existing: &[MemoryEntry],
    ) -> Result<Option<MemoryCandidate>, CollaboratorError>
    where
        J: MemoryJudge + ?Sized,
    {
        let interaction = interaction.trim();
        if interaction.is_empty() || Self::is_small_talk(interaction) {
            debug!(event_name = "memory.judge.skipped", "interaction is small talk");
            return Ok(None);
        }

        let Some(mut candidate) = judge.judge(interaction, existing).await? else {
            return Ok(None);
        };

        if !candidate.confidence.is_finite() {
            debug!(
                event_name = "memory.judge.discarded",
                reason = "non-finite confidence",
                "discarding judged candidate"
            );
            return Ok(None);
        }
        candidate.confidence = candidate.confidence.clamp(0.0, 1.0);
        candidate.content = candidate.content.trim().to_string();
        if candidate.content.is_empty() {
            return Ok(None);
        }

        Ok(Some(candidate))
    }

    /// Checks that do not need the store.
    pub fn screen(&self, candidate: &MemoryCandidate) -> Option<RejectionReason> {
        // Punctuation-only content would share the empty dedup key.
        if normalize_key(&candidate.content).is_empty() {
            return Some(RejectionReason::EmptyContent);
        }
        if !candidate.confidence.is_finite() {
            return Some(RejectionReason::InvalidConfidence);
        }
        if candidate.confidence < self.min_confidence {
            return Some(RejectionReason::LowConfidence {
                confidence: candidate.confidence,
                floor: self.min_confidence,
            });
        }
        if looks_sensitive(&candidate.content) {
            return Some(RejectionReason::SensitiveContent);
        }
        None
    }

    pub async fn commit<S>(
        &self,
        candidate: &MemoryCandidate,
        store: &S,
        now: DateTime<Utc>,
    ) -> Result<CommitOutcome, StoreError>
    where
        S: MemoryStore + ?Sized,
    {
        if let Some(reason) = self.screen(candidate) {
            debug!(
                event_name = "memory.commit.rejected",
                scope = %candidate.scope,
                category = %candidate.category,
                reason = %reason,
                "memory candidate rejected"
            );
            return Ok(CommitOutcome::Rejected(reason));
        }

        let entry = MemoryEntry::from_candidate(candidate, now);
        match store.append_unique(entry.clone()).await? {
            AppendOutcome::Appended => {
                info!(
                    event_name = "memory.commit.accepted",
                    scope = %entry.scope,
                    category = %entry.category,
                    "memory committed"
                );
                Ok(CommitOutcome::Committed(entry))
            }
            AppendOutcome::Duplicate => {
                debug!(
                    event_name = "memory.commit.duplicate",
                    scope = %entry.scope,
                    key = %entry.normalized_key,
                    "memory already present"
                );
                Ok(CommitOutcome::Rejected(RejectionReason::Duplicate))
            }
        }
    }
}

pub async fn evaluate_for_memory<J>(
    judge: &J,
    interaction: &str,
    existing: &[MemoryEntry],
) -> Result<Option<MemoryCandidate>, CollaboratorError>
where
    J: MemoryJudge + ?Sized,
{
    MemoryPolicy::default().evaluate_for_memory(judge, interaction, existing).await
}

pub async fn commit<S>(candidate: &MemoryCandidate, store: &S) -> Result<CommitOutcome, StoreError>
where
    S: MemoryStore + ?Sized,
{
    MemoryPolicy::default().commit(candidate, store, Utc::now()).await
}

pub fn looks_sensitive(content: &str) -> bool {
    let lowered = content.to_lowercase();
    if SENSITIVE_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
        return true;
    }

    lowered.split_whitespace().any(|word| {
        let word = word.trim_matches(|ch: char| !ch.is_alphanumeric() && ch != '-' && ch != '_');
        let prefixed = word.len() >= 12 && SECRET_PREFIXES.iter().any(|prefix| word.starts_with(prefix));
        prefixed || is_ssn_shape(word)
    })
}

fn is_ssn_shape(word: &str) -> bool {
    let groups: Vec<&str> = word.split('-').collect();
    groups.len() == 3
        && groups.iter().map(|group| group.len()).eq([3, 2, 4])
        && groups.iter().all(|group| group.chars().all(|ch| ch.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::Mutex;

    use super::{
        looks_sensitive, AppendOutcome, CommitOutcome, MemoryJudge, MemoryPolicy, MemoryStore,
        RejectionReason, MIN_CONFIDENCE_FLOOR,
    };
    use crate::domain::{MemoryCandidate, MemoryCategory, MemoryEntry, MemoryScope};
    use crate::errors::{CollaboratorError, StoreError};

    #[derive(Default)]
    struct VecStore {
        entries: Mutex<Vec<MemoryEntry>>,
    }

    #[async_trait]
    impl MemoryStore for VecStore {
        async fn read(&self, scope: MemoryScope) -> Result<Vec<MemoryEntry>, StoreError> {
            let entries = self.entries.lock().await;
            Ok(entries.iter().filter(|entry| entry.scope == scope).cloned().collect())
        }

        async fn append_unique(&self, entry: MemoryEntry) -> Result<AppendOutcome, StoreError> {
            let mut entries = self.entries.lock().await;
            let duplicate = entries.iter().any(|existing| {
                existing.scope == entry.scope && existing.normalized_key == entry.normalized_key
            });
            if duplicate {
                return Ok(AppendOutcome::Duplicate);
            }
            entries.push(entry);
            Ok(AppendOutcome::Appended)
        }
    }

    struct FixedJudge {
        candidate: Option<MemoryCandidate>,
        calls: AtomicUsize,
    }

    impl FixedJudge {
        fn new(candidate: Option<MemoryCandidate>) -> Self {
            Self { candidate, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl MemoryJudge for FixedJudge {
        async fn judge(
            &self,
            _interaction: &str,
            _existing: &[MemoryEntry],
        ) -> Result<Option<MemoryCandidate>, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.candidate.clone())
        }
    }

    fn candidate(content: &str, confidence: f64) -> MemoryCandidate {
        MemoryCandidate {
            content: content.to_string(),
            category: MemoryCategory::SiteIssue,
            confidence,
            reasoning: "recurring site condition".to_string(),
            scope: MemoryScope::Organization,
        }
    }

    #[tokio::test]
    async fn commit_is_idempotent_per_normalized_key() {
        let store = VecStore::default();
        let policy = MemoryPolicy::default();

        let first = policy
            .commit(&candidate("Site Alpha has a roof leak.", 0.9), &store, Utc::now())
            .await
            .expect("store available");
        let second = policy
            .commit(&candidate("site alpha has a ROOF leak", 0.95), &store, Utc::now())
            .await
            .expect("store available");

        assert!(first.is_committed());
        assert_eq!(second, CommitOutcome::Rejected(RejectionReason::Duplicate));
        assert_eq!(store.read(MemoryScope::Organization).await.expect("read").len(), 1);
    }

    #[tokio::test]
    async fn same_fact_in_other_scope_is_not_a_duplicate() {
        let store = VecStore::default();
        let policy = MemoryPolicy::default();
        let mut user_fact = candidate("Prefers morning inspections", 0.9);
        user_fact.scope = MemoryScope::User;
        let org_fact = candidate("Prefers morning inspections", 0.9);

        assert!(policy.commit(&user_fact, &store, Utc::now()).await.expect("commit").is_committed());
        assert!(policy.commit(&org_fact, &store, Utc::now()).await.expect("commit").is_committed());
        assert_eq!(store.read_all().await.expect("read").len(), 2);
    }

    #[tokio::test]
    async fn confidence_gate_rejects_below_the_floor() {
        let store = VecStore::default();
        let outcome = MemoryPolicy::default()
            .commit(&candidate("Site Beta floods after storms", 0.69), &store, Utc::now())
            .await
            .expect("store available");

        assert!(matches!(outcome, CommitOutcome::Rejected(RejectionReason::LowConfidence { .. })));
        assert!(store.read_all().await.expect("read").is_empty());

        let at_floor = MemoryPolicy::default()
            .commit(&candidate("Site Beta floods after storms", 0.70), &store, Utc::now())
            .await
            .expect("store available");
        assert!(at_floor.is_committed());
    }

    #[test]
    fn configured_floor_never_drops_below_seventy_percent() {
        assert_eq!(MemoryPolicy::new(0.4).min_confidence(), MIN_CONFIDENCE_FLOOR);
        assert_eq!(MemoryPolicy::new(f64::NAN).min_confidence(), MIN_CONFIDENCE_FLOOR);
        assert_eq!(MemoryPolicy::new(0.85).min_confidence(), 0.85);
    }

    #[tokio::test]
    async fn sensitive_and_empty_content_is_rejected() {
        let store = VecStore::default();
        let policy = MemoryPolicy::default();

        let secret = policy
            .commit(&candidate("Gate password is hunter2", 0.99), &store, Utc::now())
            .await
            .expect("store available");
        assert_eq!(secret, CommitOutcome::Rejected(RejectionReason::SensitiveContent));

        let empty = policy.commit(&candidate("   ", 0.99), &store, Utc::now()).await.expect("store available");
        assert_eq!(empty, CommitOutcome::Rejected(RejectionReason::EmptyContent));

        let punctuation = policy.commit(&candidate("!!!", 0.99), &store, Utc::now()).await.expect("store available");
        assert_eq!(punctuation, CommitOutcome::Rejected(RejectionReason::EmptyContent));
        assert_eq!(policy.screen(&candidate("-- ... --", 0.99)), Some(RejectionReason::EmptyContent));
    }

    #[test]
    fn sensitive_detection_catches_keys_and_identifiers() {
        assert!(looks_sensitive("use sk-abcdefghijklmnop for the weather feed"));
        assert!(looks_sensitive("His SSN is 123-45-6789"));
        assert!(looks_sensitive("employee 123-45-6789 on site"));
        assert!(!looks_sensitive("Site Alpha has a roof leak near bay 3"));
    }

    #[tokio::test]
    async fn small_talk_never_reaches_the_judge() {
        let judge = FixedJudge::new(Some(candidate("anything", 0.9)));
        for text in ["", "   ", "thanks!", "ok cool", "hello, thank you"] {
            let result = MemoryPolicy::default()
                .evaluate_for_memory(&judge, text, &[])
                .await
                .expect("judge not called");
            assert_eq!(result, None, "`{text}` should short-circuit");
        }
        assert_eq!(judge.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn judge_confidence_is_validated_and_clamped() {
        let interaction = "Site Alpha has a roof leak over the east stairwell";

        let inflated = FixedJudge::new(Some(candidate("Site Alpha has a roof leak", 1.4)));
        let clamped = MemoryPolicy::default()
            .evaluate_for_memory(&inflated, interaction, &[])
            .await
            .expect("judge succeeds")
            .expect("candidate kept");
        assert_eq!(clamped.confidence, 1.0);

        let broken = FixedJudge::new(Some(candidate("Site Alpha has a roof leak", f64::NAN)));
        let dropped = MemoryPolicy::default()
            .evaluate_for_memory(&broken, interaction, &[])
            .await
            .expect("judge succeeds");
        assert_eq!(dropped, None);
    }
}
