//! Merges extracted thresholds, compliance results, remembered context and
//! citation provenance into one [`SafetyDecision`].

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::compliance::{ComplianceEvaluation, ComplianceEvaluator};
use crate::domain::threshold::format_quantity;
use crate::domain::{
    Citation, Comparator, ComplianceResult, Degradation, MemoryCandidate, MemoryCategory,
    MemoryEntry, MemoryScope, Metric, MetricReading, RuleSnippet, SafetyDecision, Threshold,
};
use crate::extract::{Extraction, ThresholdExtractor};

const DEFAULT_MAX_SURFACED: usize = 5;
const DECISION_LOG_CONFIDENCE: f64 = 0.9;

const RELEVANCE_STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "site", "from", "into", "onto", "at", "of", "on", "in", "to",
];

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecisionInput {
    pub site: String,
    pub operation: String,
    pub rule_snippets: Vec<RuleSnippet>,
    pub memory_context: Vec<MemoryEntry>,
    pub weather_metrics: Vec<MetricReading>,
    pub new_memories: Vec<MemoryCandidate>,
    pub degradations: Vec<Degradation>,
}

#[derive(Clone, Debug)]
pub struct DecisionSynthesizer {
    extractor: ThresholdExtractor,
    evaluator: ComplianceEvaluator,
    max_surfaced: usize,
}

impl Default for DecisionSynthesizer {
    fn default() -> Self {
        Self {
            extractor: ThresholdExtractor::new(),
            evaluator: ComplianceEvaluator::new(),
            max_surfaced: DEFAULT_MAX_SURFACED,
        }
    }
}

impl DecisionSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_surfaced(mut self, max_surfaced: usize) -> Self {
        self.max_surfaced = max_surfaced;
        self
    }

    /// Extracts thresholds from the well-formed snippets only.
    pub fn extract(&self, snippets: &[RuleSnippet]) -> Extraction {
        let usable: Vec<RuleSnippet> =
            snippets.iter().filter(|snippet| snippet.is_well_formed()).cloned().collect();
        self.extractor.extract_with_diagnostics(&usable)
    }

    pub fn evaluate(&self, thresholds: &[Threshold], readings: &[MetricReading]) -> ComplianceEvaluation {
        self.evaluator.evaluate(thresholds, readings)
    }

    pub fn decide(&self, input: DecisionInput) -> SafetyDecision {
        self.decide_at(input, Utc::now())
    }

    pub fn decide_at(&self, input: DecisionInput, now: DateTime<Utc>) -> SafetyDecision {
        let extraction = self.extract(&input.rule_snippets);
        let evaluation = self.evaluate(&extraction.thresholds, &input.weather_metrics);
        self.synthesize(input, &extraction, &evaluation, now)
    }

    /// Builds the decision from already computed extraction and evaluation.
    pub fn synthesize(
        &self,
        input: DecisionInput,
        extraction: &Extraction,
        evaluation: &ComplianceEvaluation,
        now: DateTime<Utc>,
    ) -> SafetyDecision {
        let violations: Vec<&ComplianceResult> = evaluation.violations().collect();
        let can_proceed = violations.is_empty() && evaluation.has_resolved();
        let insufficient = violations.is_empty() && !evaluation.has_resolved();
        let missing_metrics = evaluation.missing_metrics();
        let surfaced = self.surface_memories(&input);

        let reasoning = render_reasoning(&input, extraction, evaluation, &missing_metrics, &surfaced, insufficient);
        let recommendations =
            recommend(&violations, &surfaced, &missing_metrics, insufficient);
        let citations = collect_citations(&input.rule_snippets, evaluation);
        let new_memories = select_new_memories(&input, &violations);

        SafetyDecision {
            site: input.site,
            operation: input.operation,
            can_proceed,
            reasoning,
            recommendations,
            citations,
            compliance_results: evaluation.results.clone(),
            unresolved: evaluation.unresolved.clone(),
            surfaced_memories: surfaced,
            new_memories,
            degradations: input.degradations,
            decided_at: now,
        }
    }

    /// Entries sharing a keyword with the site or operation, plus every site issue.
    pub fn surface_memories(&self, input: &DecisionInput) -> Vec<MemoryEntry> {
        let query = keywords(&format!("{} {}", input.site, input.operation));
        let mut relevant = 0;
        input
            .memory_context
            .iter()
            .filter(|entry| {
                if entry.category == MemoryCategory::SiteIssue {
                    return true;
                }
                let matches = !keywords(&entry.content).is_disjoint(&query);
                if matches && relevant < self.max_surfaced {
                    relevant += 1;
                    return true;
                }
                false
            })
            .cloned()
            .collect()
    }
}

fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|word| word.len() > 1 && !RELEVANCE_STOPWORDS.contains(&word.as_str()))
        .collect()
}

fn render_reasoning(
    input: &DecisionInput,
    extraction: &Extraction,
    evaluation: &ComplianceEvaluation,
    missing_metrics: &[Metric],
    surfaced: &[MemoryEntry],
    insufficient: bool,
) -> String {
    let violation_count = evaluation.violations().count();
    let mut lines = Vec::new();

    lines.push(if violation_count > 0 {
        format!(
            "Operations must not proceed: {violation_count} safety threshold(s) violated for {} at {}.",
            input.operation, input.site
        )
    } else if insufficient {
        format!(
            "Insufficient data to verify that {} at {} is safe; operations must not proceed.",
            input.operation, input.site
        )
    } else {
        format!(
            "Operations may proceed: {} checked threshold(s) satisfied for {} at {}.",
            evaluation.results.len(),
            input.operation,
            input.site
        )
    });

    for result in &evaluation.results {
        let threshold = &result.threshold;
        let observed = format_quantity(threshold.value + result.margin, &threshold.unit);
        if result.satisfied {
            lines.push(format!(
                "- {} at {observed} is within the limit ({}) {}",
                capitalize(&threshold.metric.label()),
                threshold.describe(),
                threshold.source_citation.marker()
            ));
        } else {
            lines.push(format!(
                "- {} at {observed} violates the limit ({}) by {}: \"{}\" {}",
                capitalize(&threshold.metric.label()),
                threshold.describe(),
                format_quantity(result.margin.abs(), &threshold.unit),
                threshold.clause,
                threshold.source_citation.marker()
            ));
        }
    }

    for unresolved in &evaluation.unresolved {
        lines.push(format!(
            "- Could not verify \"{}\" {}: {}",
            unresolved.threshold.clause,
            unresolved.threshold.source_citation.marker(),
            unresolved.reason
        ));
    }

    if extraction.thresholds.is_empty() {
        lines.push("- No numeric safety thresholds were found in the retrieved rules.".to_string());
    }

    for metric in missing_metrics {
        lines.push(format!("- Weather data unavailable for {}.", metric.label()));
    }

    for degradation in &input.degradations {
        lines.push(format!("- Degraded input: {degradation}."));
    }

    for entry in surfaced {
        if entry.category == MemoryCategory::SiteIssue {
            lines.push(format!("- Known site issue: {}", entry.content));
        } else {
            lines.push(format!("- Remembered ({}, {}): {}", entry.category, entry.scope, entry.content));
        }
    }

    lines.join("\n")
}

fn recommend(
    violations: &[&ComplianceResult],
    surfaced: &[MemoryEntry],
    missing_metrics: &[Metric],
    insufficient: bool,
) -> Vec<String> {
    let mut recommendations = Vec::new();

    let mut metrics: Vec<&Metric> = Vec::new();
    for violation in violations {
        if !metrics.contains(&&violation.threshold.metric) {
            metrics.push(&violation.threshold.metric);
        }
    }
    for metric in metrics {
        let most_severe = violations
            .iter()
            .copied()
            .filter(|violation| &violation.threshold.metric == metric)
            .reduce(|worst, candidate| if candidate.severity() > worst.severity() { candidate } else { worst });
        if let Some(violation) = most_severe {
            recommendations.push(postpone(violation));
        }
    }

    for entry in surfaced.iter().filter(|entry| entry.category == MemoryCategory::SiteIssue) {
        recommendations.push(format!("Address known site issue before proceeding: {}", entry.content));
    }

    if insufficient {
        for metric in missing_metrics {
            recommendations.push(format!("Obtain current {} readings before proceeding", metric.label()));
        }
    }

    recommendations
}

fn postpone(violation: &ComplianceResult) -> String {
    let threshold = &violation.threshold;
    let limit = format_quantity(threshold.value, &threshold.unit);
    let label = threshold.metric.label();
    match threshold.operator {
        Comparator::Gt | Comparator::Ge => format!("Postpone operations until {label} drops below {limit}"),
        Comparator::Lt | Comparator::Le => format!("Postpone operations until {label} rises above {limit}"),
        Comparator::Eq => format!("Postpone operations until {label} moves away from {limit}"),
    }
}

fn collect_citations(snippets: &[RuleSnippet], evaluation: &ComplianceEvaluation) -> Vec<Citation> {
    let mut citations: Vec<Citation> = Vec::new();
    let referenced = evaluation
        .results
        .iter()
        .map(|result| &result.threshold.source_citation)
        .chain(evaluation.unresolved.iter().map(|unresolved| &unresolved.threshold.source_citation));
    for citation in referenced {
        if !citations.iter().any(|known| known.source_index == citation.source_index) {
            citations.push(citation.clone());
        }
    }

    let rank = |citation: &Citation| {
        snippets
            .iter()
            .position(|snippet| snippet.citation.source_index == citation.source_index)
            .unwrap_or(usize::MAX)
    };
    citations.sort_by_key(|citation| (rank(citation), citation.source_index));
    citations
}

fn select_new_memories(input: &DecisionInput, violations: &[&ComplianceResult]) -> Vec<MemoryCandidate> {
    let mut selected: Vec<MemoryCandidate> = Vec::new();
    for candidate in &input.new_memories {
        if !selected.iter().any(|kept| kept.category == candidate.category) {
            selected.push(candidate.clone());
        }
    }

    let has_log = selected.iter().any(|kept| kept.category == MemoryCategory::DecisionLog);
    if !violations.is_empty() && !has_log {
        let mut labels: Vec<String> = Vec::new();
        for violation in violations {
            let label = violation.threshold.metric.label();
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
        selected.push(MemoryCandidate {
            content: format!(
                "Safety pause at {} for {} due to {}",
                input.site,
                input.operation,
                labels.join(", ")
            ),
            category: MemoryCategory::DecisionLog,
            confidence: DECISION_LOG_CONFIDENCE,
            reasoning: "operation blocked by threshold violations".to_string(),
            scope: MemoryScope::Organization,
        });
    }

    selected
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
