use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    Location,
    Preference,
    SiteIssue,
    DecisionLog,
    Other,
}

impl MemoryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Location => "location",
            Self::Preference => "preference",
            Self::SiteIssue => "site_issue",
            Self::DecisionLog => "decision_log",
            Self::Other => "other",
        }
    }

    /// Lenient parse used for judge output and stored records. Unknown labels map to `Other`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "location" => Self::Location,
            "preference" | "workflow" => Self::Preference,
            "site_issue" | "issue" | "safety" => Self::SiteIssue,
            "decision_log" | "decision" => Self::DecisionLog,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    User,
    Organization,
}

impl MemoryScope {
    pub const ALL: [MemoryScope; 2] = [MemoryScope::User, MemoryScope::Organization];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Organization => "organization",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "organization" | "organisation" | "org" | "company" => Some(Self::Organization),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A judged fact, produced once per interaction and consumed by the memory policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryCandidate {
    pub content: String,
    pub category: MemoryCategory,
    pub confidence: f64,
    pub reasoning: String,
    pub scope: MemoryScope,
}

impl MemoryCandidate {
    pub fn normalized_key(&self) -> String {
        normalize_key(&self.content)
    }
}

/// A committed fact. Entries are append-only and unique per `(scope, normalized_key)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub content: String,
    pub category: MemoryCategory,
    pub scope: MemoryScope,
    pub created_at: DateTime<Utc>,
    pub normalized_key: String,
}

impl MemoryEntry {
    pub fn new(
        content: impl Into<String>,
        category: MemoryCategory,
        scope: MemoryScope,
        created_at: DateTime<Utc>,
    ) -> Self {
        let content = content.into().trim().to_string();
        let normalized_key = normalize_key(&content);
        Self { content, category, scope, created_at, normalized_key }
    }

    pub fn from_candidate(candidate: &MemoryCandidate, created_at: DateTime<Utc>) -> Self {
        Self::new(candidate.content.clone(), candidate.category, candidate.scope, created_at)
    }
}

/// Lower-cases, strips punctuation, and collapses whitespace.
pub fn normalize_key(content: &str) -> String {
    let stripped: String = content
        .chars()
        .map(|ch| if ch.is_alphanumeric() || ch.is_whitespace() { ch } else { ' ' })
        .collect();
    stripped.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{normalize_key, MemoryCategory, MemoryEntry, MemoryScope};

    #[test]
    fn normalization_ignores_case_spacing_and_punctuation() {
        assert_eq!(normalize_key("  Site Alpha has a ROOF   leak! "), "site alpha has a roof leak");
        assert_eq!(
            normalize_key("Site Alpha, has a roof-leak."),
            normalize_key("site alpha has a roof leak")
        );
    }

    #[test]
    fn entry_derives_key_from_trimmed_content() {
        let entry = MemoryEntry::new(
            "  Manages operations at Site Alpha ",
            MemoryCategory::Location,
            MemoryScope::User,
            Utc::now(),
        );
        assert_eq!(entry.content, "Manages operations at Site Alpha");
        assert_eq!(entry.normalized_key, "manages operations at site alpha");
    }

    #[test]
    fn category_and_scope_parsing_is_lenient() {
        assert_eq!(MemoryCategory::parse("Site Issue"), MemoryCategory::SiteIssue);
        assert_eq!(MemoryCategory::parse("issue"), MemoryCategory::SiteIssue);
        assert_eq!(MemoryCategory::parse("weird"), MemoryCategory::Other);
        assert_eq!(MemoryScope::parse("company"), Some(MemoryScope::Organization));
        assert_eq!(MemoryScope::parse("team"), None);
    }
}
