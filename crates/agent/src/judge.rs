//! `MemoryJudge` implementations: a model-backed judge and an offline
//! keyword judge. Both only propose candidates; the memory policy decides.

use async_trait::async_trait;
use serde::Deserialize;

use siteguard_core::domain::{Collaborator, MemoryCandidate, MemoryCategory, MemoryEntry, MemoryScope};
use siteguard_core::errors::CollaboratorError;
use siteguard_core::memory::MemoryJudge;

use crate::llm::LlmClient;

const MAX_EXISTING_IN_PROMPT: usize = 20;

const ISSUE_CUES: &[&str] = &[
    "leak", "leaking", "broken", "damaged", "crack", "cracked", "flooded", "flooding", "unstable",
    "hazard", "collapsed", "out of service", "blocked", "exposed wiring", "unsecured", "missing guardrail",
    "faulty", "malfunction",
];
const LOCATION_CUES: &[&str] = &[
    "i manage", "i oversee", "i supervise", "i run", "i'm responsible for", "i am responsible for",
    "i work at", "i'm based at", "i am based at", "my site is",
];
const PREFERENCE_CUES: &[&str] = &[
    "i prefer", "please always", "always send", "remind me", "notify me", "i like to", "i'd like",
];

const ISSUE_CONFIDENCE: f64 = 0.85;
const LOCATION_CONFIDENCE: f64 = 0.8;
const PREFERENCE_CONFIDENCE: f64 = 0.75;

/// Keyword judge used when no model is configured.
#[derive(Clone, Debug, Default)]
pub struct HeuristicMemoryJudge;

impl HeuristicMemoryJudge {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, interaction: &str) -> Option<MemoryCandidate> {
        for sentence in sentences(interaction) {
            let lowered = sentence.to_lowercase();
            let matched = if ISSUE_CUES.iter().any(|cue| contains_phrase(&lowered, cue)) {
                Some((MemoryCategory::SiteIssue, MemoryScope::Organization, ISSUE_CONFIDENCE, "reported site condition"))
            } else if LOCATION_CUES.iter().any(|cue| lowered.contains(cue)) {
                Some((MemoryCategory::Location, MemoryScope::User, LOCATION_CONFIDENCE, "site the user is responsible for"))
            } else if PREFERENCE_CUES.iter().any(|cue| lowered.contains(cue)) {
                Some((MemoryCategory::Preference, MemoryScope::User, PREFERENCE_CONFIDENCE, "stated working preference"))
            } else {
                None
            };

            if let Some((category, scope, confidence, reasoning)) = matched {
                return Some(MemoryCandidate {
                    content: sentence.to_string(),
                    category,
                    confidence,
                    reasoning: reasoning.to_string(),
                    scope,
                });
            }
        }
        None
    }
}

#[async_trait]
impl MemoryJudge for HeuristicMemoryJudge {
    async fn judge(
        &self,
        interaction: &str,
        existing: &[MemoryEntry],
    ) -> Result<Option<MemoryCandidate>, CollaboratorError> {
        let candidate = self.classify(interaction).filter(|candidate| {
            let key = candidate.normalized_key();
            !existing.iter().any(|entry| entry.normalized_key == key)
        });
        Ok(candidate)
    }
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split(['.', '!', '?', '\n']).map(str::trim).filter(|sentence| !sentence.is_empty())
}

fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    haystack.match_indices(phrase).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + phrase.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Asks a model whether the interaction holds a durable fact.
pub struct LlmMemoryJudge<C> {
    client: C,
}

impl<C> LlmMemoryJudge<C>
where
    C: LlmClient,
{
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C> MemoryJudge for LlmMemoryJudge<C>
where
    C: LlmClient,
{
    async fn judge(
        &self,
        interaction: &str,
        existing: &[MemoryEntry],
    ) -> Result<Option<MemoryCandidate>, CollaboratorError> {
        let prompt = judge_prompt(interaction, existing);
        let raw = self
            .client
            .complete(&prompt)
            .await
            .map_err(|error| CollaboratorError::failure(Collaborator::Judge, format!("{error:#}")))?;
        parse_judgement(&raw)
    }
}

pub fn judge_prompt(interaction: &str, existing: &[MemoryEntry]) -> String {
    let mut prompt = String::from(
        "You maintain durable memory for a construction site safety assistant.\n\
         Decide whether the interaction below contains one high-signal, reusable fact.\n\
         User memory holds the user's sites, role and working preferences.\n\
         Organization memory holds site issues, recurring operational problems and decision logs.\n\
         Never store credentials, API keys or personal identifiers. Do not repeat known facts.\n\
         Do not transcribe the conversation; write one short statement.\n\n\
         Respond with JSON only:\n\
         {\"should_write\": true|false, \"content\": \"...\", \
         \"category\": \"location|preference|site_issue|decision_log|other\", \
         \"scope\": \"user|organization\", \"confidence\": 0.0-1.0, \"reasoning\": \"...\"}\n\n",
    );

    if !existing.is_empty() {
        prompt.push_str("Known facts:\n");
        for entry in existing.iter().take(MAX_EXISTING_IN_PROMPT) {
            prompt.push_str(&format!("- [{}] {}\n", entry.category, entry.content));
        }
        prompt.push('\n');
    }

    prompt.push_str("Interaction:\n");
    prompt.push_str(interaction.trim());
    prompt
}

#[derive(Debug, Deserialize)]
struct Judgement {
    #[serde(default)]
    should_write: bool,
    #[serde(default)]
    content: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

/// Reads the judge's JSON reply, tolerating surrounding prose or code fences.
pub fn parse_judgement(raw: &str) -> Result<Option<MemoryCandidate>, CollaboratorError> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let body = match (start, end) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => {
            return Err(CollaboratorError::invalid_response(
                Collaborator::Judge,
                "reply does not contain a JSON object",
            ))
        }
    };

    let judgement: Judgement = serde_json::from_str(body)
        .map_err(|error| CollaboratorError::invalid_response(Collaborator::Judge, error.to_string()))?;
    if !judgement.should_write {
        return Ok(None);
    }

    let category = MemoryCategory::parse(&judgement.category);
    let scope = judgement
        .scope
        .as_deref()
        .and_then(MemoryScope::parse)
        .unwrap_or(match category {
            MemoryCategory::SiteIssue | MemoryCategory::DecisionLog => MemoryScope::Organization,
            _ => MemoryScope::User,
        });

    Ok(Some(MemoryCandidate {
        content: judgement.content,
        category,
        confidence: judgement.confidence,
        reasoning: judgement.reasoning,
        scope,
    }))
}
