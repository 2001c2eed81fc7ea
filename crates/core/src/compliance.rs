//! Checks extracted thresholds against live readings through the sandbox.

use crate::domain::{
    canonicalize, ComplianceResult, Metric, MetricReading, Threshold, UnresolvedThreshold,
};
use crate::sandbox::{evaluate_condition, Bindings};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ComplianceEvaluation {
    pub results: Vec<ComplianceResult>,
    pub unresolved: Vec<UnresolvedThreshold>,
    /// Thresholds with no reading for their metric. Not a violation.
    pub unmatched: Vec<Threshold>,
}

impl ComplianceEvaluation {
    pub fn violations(&self) -> impl Iterator<Item = &ComplianceResult> {
        self.results.iter().filter(|result| !result.satisfied)
    }

    pub fn has_resolved(&self) -> bool {
        !self.results.is_empty()
    }

    /// Metrics referenced by unmatched thresholds, first appearance first.
    pub fn missing_metrics(&self) -> Vec<Metric> {
        let mut metrics: Vec<Metric> = Vec::new();
        for threshold in &self.unmatched {
            if !metrics.contains(&threshold.metric) {
                metrics.push(threshold.metric.clone());
            }
        }
        metrics
    }
}

#[derive(Clone, Debug, Default)]
pub struct ComplianceEvaluator;

impl ComplianceEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, thresholds: &[Threshold], readings: &[MetricReading]) -> ComplianceEvaluation {
        let mut evaluation = ComplianceEvaluation::default();

        for threshold in thresholds {
            let matching: Vec<&MetricReading> =
                readings.iter().filter(|reading| reading.metric == threshold.metric).collect();
            if matching.is_empty() {
                evaluation.unmatched.push(threshold.clone());
                continue;
            }

            let mut unresolved_reason: Option<String> = None;
            for reading in matching {
                match check_pair(threshold, reading) {
                    Ok(result) => evaluation.results.push(result),
                    Err(reason) => {
                        unresolved_reason.get_or_insert(reason);
                    }
                }
            }
            if let Some(reason) = unresolved_reason {
                evaluation
                    .unresolved
                    .push(UnresolvedThreshold { threshold: threshold.clone(), reason });
            }
        }

        evaluation
    }
}

pub fn evaluate(thresholds: &[Threshold], readings: &[MetricReading]) -> ComplianceEvaluation {
    ComplianceEvaluator::new().evaluate(thresholds, readings)
}

fn check_pair(threshold: &Threshold, reading: &MetricReading) -> Result<ComplianceResult, String> {
    if !reading.value.is_finite() {
        return Err(format!("{} reading is not a finite number", threshold.metric));
    }

    let value = comparable_value(threshold, reading)?;
    let mut bindings = Bindings::new();
    bindings.insert("reading".to_string(), value);
    bindings.insert("limit".to_string(), threshold.value);
    bindings.insert(threshold.metric.identifier(), value);

    let violated = evaluate_condition(&threshold.violation_expression(), &bindings)
        .map_err(|error| format!("rule could not be verified: {error}"))?;

    Ok(ComplianceResult {
        threshold: threshold.clone(),
        reading: reading.clone(),
        satisfied: !violated,
        margin: value - threshold.value,
    })
}

/// Reading value expressed in the threshold's unit, or why it cannot be.
fn comparable_value(threshold: &Threshold, reading: &MetricReading) -> Result<f64, String> {
    let reading_unit = reading.unit.trim();

    if !threshold.unit_verified {
        return if reading_unit.eq_ignore_ascii_case(threshold.unit.trim()) {
            Ok(reading.value)
        } else {
            Err(format!(
                "threshold unit `{}` is unverified and the reading is in `{reading_unit}`",
                threshold.unit
            ))
        };
    }

    let canonical = canonicalize(&threshold.metric, reading.value, reading_unit);
    if canonical.verified && canonical.unit == threshold.unit {
        Ok(canonical.value)
    } else {
        Err(format!(
            "reading unit `{reading_unit}` is incompatible with threshold unit `{}`",
            threshold.unit
        ))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::ComplianceEvaluator;
    use crate::domain::{Citation, Comparator, Metric, MetricReading, RuleSnippet, Threshold};
    use crate::extract::ThresholdExtractor;

    fn threshold(metric: Metric, operator: Comparator, value: f64, unit: &str) -> Threshold {
        Threshold {
            metric,
            operator,
            value,
            unit: unit.to_string(),
            unit_verified: true,
            source_citation: Citation::new(1, "crane.md", "wind speed exceeds 20 mph", 0.9),
            clause: "wind speed exceeds 20 mph".to_string(),
            condition: None,
        }
    }

    fn reading(metric: Metric, value: f64, unit: &str) -> MetricReading {
        MetricReading::new(metric, value, unit, Utc::now())
    }

    #[test]
    fn reading_above_gt_threshold_is_a_violation_with_positive_margin() {
        let evaluation = ComplianceEvaluator::new().evaluate(
            &[threshold(Metric::WindSpeed, Comparator::Gt, 20.0, "mph")],
            &[reading(Metric::WindSpeed, 25.0, "mph")],
        );

        assert_eq!(evaluation.results.len(), 1);
        let result = &evaluation.results[0];
        assert!(!result.satisfied);
        assert_eq!(result.margin, 5.0);
        assert!(evaluation.unresolved.is_empty());
        assert!(evaluation.has_resolved());
    }

    #[test]
    fn reading_on_the_limit_satisfies_a_strict_threshold() {
        let evaluation = ComplianceEvaluator::new().evaluate(
            &[
                threshold(Metric::WindSpeed, Comparator::Gt, 20.0, "mph"),
                threshold(Metric::WindSpeed, Comparator::Ge, 20.0, "mph"),
            ],
            &[reading(Metric::WindSpeed, 20.0, "mph")],
        );
        assert!(evaluation.results[0].satisfied);
        assert!(!evaluation.results[1].satisfied);
    }

    #[test]
    fn lower_bound_thresholds_flag_low_readings() {
        let evaluation = ComplianceEvaluator::new().evaluate(
            &[threshold(Metric::Temperature, Comparator::Lt, 14.0, "°F")],
            &[reading(Metric::Temperature, -15.0, "°C")],
        );
        let result = &evaluation.results[0];
        assert!(!result.satisfied, "-15°C is 5°F, below the 14°F limit");
        assert!((result.margin - (5.0 - 14.0)).abs() < 1e-9);
    }

    #[test]
    fn readings_are_converted_to_the_threshold_unit() {
        let evaluation = ComplianceEvaluator::new().evaluate(
            &[threshold(Metric::WindSpeed, Comparator::Gt, 20.0, "mph")],
            &[reading(Metric::WindSpeed, 40.0, "km/h")],
        );
        let result = &evaluation.results[0];
        assert!(!result.satisfied);
        assert!((result.margin - (40.0 * 0.621_371 - 20.0)).abs() < 1e-9);
    }

    #[test]
    fn thresholds_without_readings_are_unmatched_not_violated() {
        let evaluation = ComplianceEvaluator::new().evaluate(
            &[threshold(Metric::Visibility, Comparator::Lt, 0.5, "mi")],
            &[reading(Metric::WindSpeed, 10.0, "mph")],
        );
        assert!(evaluation.results.is_empty());
        assert_eq!(evaluation.unmatched.len(), 1);
        assert_eq!(evaluation.missing_metrics(), vec![Metric::Visibility]);
        assert!(!evaluation.has_resolved());
    }

    #[test]
    fn incompatible_or_unverified_units_leave_the_threshold_unresolved() {
        let mut assumed = threshold(Metric::WindSpeed, Comparator::Gt, 25.0, "mph");
        assumed.unit_verified = false;

        let evaluation = ComplianceEvaluator::new().evaluate(
            &[assumed.clone(), threshold(Metric::WindSpeed, Comparator::Gt, 20.0, "mph")],
            &[reading(Metric::WindSpeed, 10.0, "furlongs")],
        );
        assert!(evaluation.results.is_empty());
        assert_eq!(evaluation.unresolved.len(), 2);

        let same_unit = ComplianceEvaluator::new()
            .evaluate(&[assumed], &[reading(Metric::WindSpeed, 30.0, "mph")]);
        assert_eq!(same_unit.results.len(), 1, "assumed unit matches the reading unit");
        assert!(!same_unit.results[0].satisfied);
    }

    #[test]
    fn rejected_condition_makes_the_threshold_unresolved() {
        let guarded = threshold(Metric::WindSpeed, Comparator::Gt, 20.0, "mph")
            .with_condition("__import__('os').system('true')");
        let evaluation = ComplianceEvaluator::new()
            .evaluate(&[guarded], &[reading(Metric::WindSpeed, 25.0, "mph")]);

        assert!(evaluation.results.is_empty());
        assert_eq!(evaluation.unresolved.len(), 1);
        assert!(evaluation.unresolved[0].reason.starts_with("rule could not be verified"));
    }

    #[test]
    fn condition_override_can_use_the_metric_identifier() {
        let gust_factor = threshold(Metric::WindSpeed, Comparator::Gt, 20.0, "mph")
            .with_condition("wind_speed * 1.5 > limit");
        let evaluation = ComplianceEvaluator::new()
            .evaluate(&[gust_factor], &[reading(Metric::WindSpeed, 15.0, "mph")]);
        assert!(!evaluation.results[0].satisfied, "15 mph * 1.5 exceeds 20 mph");
    }

    #[test]
    fn non_finite_readings_are_unresolved() {
        let evaluation = ComplianceEvaluator::new().evaluate(
            &[threshold(Metric::WindSpeed, Comparator::Gt, 20.0, "mph")],
            &[reading(Metric::WindSpeed, f64::NAN, "mph")],
        );
        assert!(evaluation.results.is_empty());
        assert_eq!(evaluation.unresolved.len(), 1);
    }

    #[test]
    fn rule_text_conditions_run_through_the_sandbox() {
        let rules = [
            RuleSnippet::new(
                "Lifts stop when wind speed exceeds 20 mph [condition: wind_speed * 1.5 > limit].",
                Citation::new(1, "crane.md", "", 0.9),
            ),
            RuleSnippet::new(
                "Pouring stops when rain exceeds 5 mm [condition: open('/etc/passwd')].",
                Citation::new(2, "concrete.md", "", 0.8),
            ),
        ];
        let thresholds = ThresholdExtractor::new().extract(&rules);
        let evaluation = ComplianceEvaluator::new().evaluate(
            &thresholds,
            &[reading(Metric::WindSpeed, 15.0, "mph"), reading(Metric::Precipitation, 1.0, "mm")],
        );

        assert_eq!(evaluation.results.len(), 1);
        assert!(!evaluation.results[0].satisfied, "15 mph * 1.5 exceeds the 20 mph limit");
        assert_eq!(evaluation.unresolved.len(), 1);
        assert_eq!(evaluation.unresolved[0].threshold.source_citation.source_index, 2);
        assert!(evaluation.unresolved[0].reason.starts_with("rule could not be verified"));
    }
}
