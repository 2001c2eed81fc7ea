use std::fmt;

use serde::{Deserialize, Serialize};

/// Provenance for a retrieved rule snippet. Numbering follows retrieval rank.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub source_index: usize,
    pub document_id: String,
    pub excerpt: String,
    pub relevance: f64,
}

impl Citation {
    pub fn new(
        source_index: usize,
        document_id: impl Into<String>,
        excerpt: impl Into<String>,
        relevance: f64,
    ) -> Self {
        Self { source_index, document_id: document_id.into(), excerpt: excerpt.into(), relevance }
    }

    pub fn marker(&self) -> String {
        format!("[Source {}]", self.source_index)
    }

    pub fn has_valid_relevance(&self) -> bool {
        self.relevance.is_finite() && (0.0..=1.0).contains(&self.relevance)
    }
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.marker(), self.document_id)
    }
}

/// One ranked rule snippet as returned by retrieval.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleSnippet {
    pub text: String,
    pub citation: Citation,
}

impl RuleSnippet {
    pub fn new(text: impl Into<String>, citation: Citation) -> Self {
        Self { text: text.into(), citation }
    }

    /// A snippet is usable when it has text and a relevance inside `[0, 1]`.
    pub fn is_well_formed(&self) -> bool {
        !self.text.trim().is_empty() && self.citation.has_valid_relevance()
    }
}

#[cfg(test)]
mod tests {
    use super::{Citation, RuleSnippet};

    #[test]
    fn marker_uses_retrieval_rank() {
        let citation = Citation::new(3, "crane-manual.md", "wind speed exceeds 20 mph", 0.82);
        assert_eq!(citation.marker(), "[Source 3]");
        assert_eq!(citation.to_string(), "[Source 3] crane-manual.md");
    }

    #[test]
    fn snippet_with_blank_text_or_bad_relevance_is_malformed() {
        let good = RuleSnippet::new("rain > 5mm", Citation::new(1, "doc", "rain > 5mm", 0.5));
        let blank = RuleSnippet::new("   ", Citation::new(1, "doc", "", 0.5));
        let nan = RuleSnippet::new("rain > 5mm", Citation::new(1, "doc", "", f64::NAN));
        let above_one = RuleSnippet::new("rain > 5mm", Citation::new(1, "doc", "", 1.2));

        assert!(good.is_well_formed());
        assert!(!blank.is_well_formed());
        assert!(!nan.is_well_formed());
        assert!(!above_one.is_well_formed());
    }
}
