//! Threshold extraction from free-text rule snippets.
//!
//! The extractor recognises clauses shaped like
//! `<metric keyword> … <comparator> <number> <unit>` ("wind speed exceeds
//! 20 mph", "rain > 5mm") and turns each into a [`Threshold`] describing the
//! prohibited condition. It is a pure text-to-struct mapping: no logging, no
//! deduplication, no I/O.
//!
//! Comparator polarity when no comparator word or symbol is present follows
//! [`DEFAULT_COMPARATOR`]: a bare limit ("wind speed limit of 25 mph") reads
//! as "prohibited above", unless the clause carries a lower-bound cue such as
//! "minimum" or "below", in which case it reads as "prohibited below".
//!
//! A clause may be followed by an inline override such as
//! `[condition: wind_speed * 1.5 > limit]`. The bracketed text is masked out
//! before tokenizing and carried verbatim onto the threshold; it is only ever
//! run through the sandbox.

use crate::domain::{canonicalize, Comparator, Metric, RuleSnippet, Threshold};
use crate::domain::metric::unit_family;
use crate::errors::ParseError;

/// Polarity used for a bare limit with no comparator and no lower-bound cue.
pub const DEFAULT_COMPARATOR: Comparator = Comparator::Gt;

/// Polarity used for a bare limit carrying a lower-bound cue.
pub const DEFAULT_LOWER_BOUND_COMPARATOR: Comparator = Comparator::Lt;

const CONDITION_TAG: &str = "[condition:";

/// Maximum number of tokens between a metric keyword and its number.
const MAX_GAP: usize = 8;

/// Words looked at before the metric keyword when inferring default polarity.
const LOOKBACK: usize = 6;

const COMPARATOR_PHRASES: &[(&str, Comparator)] = &[
    (" greater than or equal ", Comparator::Ge),
    (" more than or equal ", Comparator::Ge),
    (" at or above ", Comparator::Ge),
    (" less than or equal ", Comparator::Le),
    (" at or below ", Comparator::Le),
    (" no more than ", Comparator::Gt),
    (" not more than ", Comparator::Gt),
    (" no greater than ", Comparator::Gt),
    (" at most ", Comparator::Gt),
    (" up to ", Comparator::Gt),
    (" no less than ", Comparator::Lt),
    (" not less than ", Comparator::Lt),
    (" at least ", Comparator::Lt),
    (" greater than ", Comparator::Gt),
    (" more than ", Comparator::Gt),
    (" higher than ", Comparator::Gt),
    (" exceeds ", Comparator::Gt),
    (" exceed ", Comparator::Gt),
    (" exceeding ", Comparator::Gt),
    (" exceeded ", Comparator::Gt),
    (" above ", Comparator::Gt),
    (" over ", Comparator::Gt),
    (" beyond ", Comparator::Gt),
    (" less than ", Comparator::Lt),
    (" lower than ", Comparator::Lt),
    (" below ", Comparator::Lt),
    (" under ", Comparator::Lt),
    (" beneath ", Comparator::Lt),
    (" equals ", Comparator::Eq),
    (" equal to ", Comparator::Eq),
    (" exactly ", Comparator::Eq),
];

const LOWER_BOUND_CUES: &[&str] = &["minimum", "min", "below", "under", "least", "lower", "less"];

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "during", "for", "from", "hour", "hours",
    "if", "in", "is", "must", "not", "of", "on", "or", "per", "shall", "should", "than", "the",
    "then", "to", "until", "when", "while", "with", "within",
];

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extraction {
    pub thresholds: Vec<Threshold>,
    pub skipped: Vec<ParseError>,
}

#[derive(Clone, Debug, Default)]
pub struct ThresholdExtractor;

impl ThresholdExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, snippets: &[RuleSnippet]) -> Vec<Threshold> {
        self.extract_with_diagnostics(snippets).thresholds
    }

    pub fn extract_with_diagnostics(&self, snippets: &[RuleSnippet]) -> Extraction {
        let mut extraction = Extraction::default();
        for snippet in snippets {
            extract_snippet(snippet, &mut extraction);
        }
        extraction
    }
}

#[derive(Clone, Debug, PartialEq)]
enum TokenKind {
    Word(String),
    Number(f64),
    Symbol(Comparator),
    Boundary,
}

#[derive(Clone, Debug, PartialEq)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
}

impl Token {
    fn word(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Word(word) => Some(word),
            _ => None,
        }
    }
}

struct ClauseMatch {
    operator: Comparator,
    value: f64,
    unit: String,
    end: usize,
}

enum ClauseOutcome {
    Matched(ClauseMatch),
    Incomplete(&'static str),
    NotAThreshold,
}

struct InlineCondition {
    start: usize,
    end: usize,
    expression: String,
}

fn extract_snippet(snippet: &RuleSnippet, extraction: &mut Extraction) {
    let text = snippet.text.as_str();
    let (masked, conditions) = inline_conditions(text);
    let tokens = tokenize(&masked);
    let mut index = 0;

    while index < tokens.len() {
        let Some((metric, keyword_len)) = metric_at(&tokens, index) else {
            index += 1;
            continue;
        };

        match parse_clause(&tokens, index, index + keyword_len) {
            ClauseOutcome::Matched(clause) => {
                let canonical = canonicalize(&metric, clause.value, &clause.unit);
                let clause_end = tokens[clause.end - 1].end;
                let excerpt = text[tokens[index].start..clause_end].trim();
                let next_start = tokens.get(clause.end).map_or(text.len(), |token| token.start);
                let condition = conditions
                    .iter()
                    .find(|condition| condition.start >= clause_end && condition.end <= next_start)
                    .map(|condition| condition.expression.clone())
                    .filter(|expression| !expression.is_empty());
                extraction.thresholds.push(Threshold {
                    metric,
                    operator: clause.operator,
                    value: canonical.value,
                    unit: canonical.unit,
                    unit_verified: canonical.verified,
                    source_citation: snippet.citation.clone(),
                    clause: excerpt.to_string(),
                    condition,
                });
                index = clause.end;
            }
            ClauseOutcome::Incomplete(reason) => {
                extraction.skipped.push(ParseError {
                    clause: clause_excerpt(text, &tokens, index),
                    source_index: snippet.citation.source_index,
                    reason: reason.to_string(),
                });
                index += keyword_len;
            }
            ClauseOutcome::NotAThreshold => index += keyword_len,
        }
    }
}

/// Finds `[condition: …]` spans and returns the text with each span blanked
/// out byte for byte, so token offsets still index the original text.
fn inline_conditions(text: &str) -> (String, Vec<InlineCondition>) {
    let lowered = text.to_ascii_lowercase();
    let mut conditions = Vec::new();
    let mut from = 0;
    while let Some(found) = lowered[from..].find(CONDITION_TAG) {
        let start = from + found;
        let body = start + CONDITION_TAG.len();
        let Some(close) = text[body..].find(']') else {
            break;
        };
        let end = body + close + 1;
        conditions.push(InlineCondition { start, end, expression: text[body..body + close].trim().to_string() });
        from = end;
    }

    if conditions.is_empty() {
        return (text.to_string(), conditions);
    }
    let masked = text
        .char_indices()
        .map(|(offset, ch)| {
            if conditions.iter().any(|condition| (condition.start..condition.end).contains(&offset)) {
                " ".repeat(ch.len_utf8())
            } else {
                ch.to_string()
            }
        })
        .collect();
    (masked, conditions)
}

fn parse_clause(tokens: &[Token], metric_start: usize, after_metric: usize) -> ClauseOutcome {
    let mut words: Vec<&str> = Vec::new();
    let mut symbol: Option<Comparator> = None;
    let limit = (after_metric + MAX_GAP).min(tokens.len());
    let mut cursor = after_metric;

    while cursor < limit {
        match &tokens[cursor].kind {
            TokenKind::Boundary => break,
            TokenKind::Word(_) if metric_at(tokens, cursor).is_some() => break,
            TokenKind::Word(word) => words.push(word),
            TokenKind::Symbol(comparator) => {
                symbol.get_or_insert(*comparator);
            }
            TokenKind::Number(value) => {
                let (unit, after_unit) = read_unit(tokens, cursor + 1);
                let (trailing, end) = trailing_comparator(tokens, after_unit);
                let operator = symbol
                    .or_else(|| comparator_from_words(&words))
                    .or(trailing)
                    .unwrap_or_else(|| default_polarity(tokens, metric_start, &words));
                return ClauseOutcome::Matched(ClauseMatch { operator, value: *value, unit, end });
            }
        }
        cursor += 1;
    }

    if symbol.is_some() || comparator_from_words(&words).is_some() {
        ClauseOutcome::Incomplete("no numeric limit follows the comparator")
    } else {
        ClauseOutcome::NotAThreshold
    }
}

fn metric_at(tokens: &[Token], index: usize) -> Option<(Metric, usize)> {
    let first = tokens.get(index)?.word()?;
    let second = tokens.get(index + 1).and_then(Token::word);
    let gust = || Metric::Custom("wind_gust".to_string());

    let matched = match (first, second) {
        ("wind", Some("speed" | "speeds")) => (Metric::WindSpeed, 2),
        ("wind", Some("gust" | "gusts")) => (gust(), 2),
        ("wind" | "winds" | "windspeed" | "windspeeds", _) => (Metric::WindSpeed, 1),
        ("gust" | "gusts", _) => (gust(), 1),
        ("rain" | "rainfall" | "precipitation", _) => (Metric::Precipitation, 1),
        ("temperature" | "temperatures" | "temp", _) => (Metric::Temperature, 1),
        ("visibility", _) => (Metric::Visibility, 1),
        _ => return None,
    };
    Some(matched)
}

fn comparator_from_words(words: &[&str]) -> Option<Comparator> {
    if words.is_empty() {
        return None;
    }
    let phrase = format!(" {} ", words.join(" "));
    COMPARATOR_PHRASES
        .iter()
        .find(|(needle, _)| phrase.contains(needle))
        .map(|(_, comparator)| *comparator)
}

fn default_polarity(tokens: &[Token], metric_start: usize, gap_words: &[&str]) -> Comparator {
    let lookback = tokens[..metric_start]
        .iter()
        .rev()
        .take(LOOKBACK)
        .take_while(|token| token.kind != TokenKind::Boundary)
        .filter_map(Token::word);

    let lower_bound = lookback
        .chain(gap_words.iter().copied())
        .any(|word| LOWER_BOUND_CUES.contains(&word));

    if lower_bound {
        DEFAULT_LOWER_BOUND_COMPARATOR
    } else {
        DEFAULT_COMPARATOR
    }
}

fn read_unit(tokens: &[Token], index: usize) -> (String, usize) {
    let word_at = |offset: usize| tokens.get(index + offset).and_then(Token::word);
    let Some(word) = word_at(0) else {
        return (String::new(), index);
    };

    let spelled = match (word, word_at(1), word_at(2)) {
        ("miles" | "mile" | "mi", Some("per"), Some("hour")) => Some(("mph", 3)),
        ("kilometers" | "kilometres" | "km", Some("per"), Some("hour")) => Some(("km/h", 3)),
        ("meters" | "metres" | "m", Some("per"), Some("second")) => Some(("m/s", 3)),
        ("degrees" | "degree" | "deg", Some("f" | "fahrenheit"), _) => Some(("°f", 2)),
        ("degrees" | "degree" | "deg", Some("c" | "celsius"), _) => Some(("°c", 2)),
        _ => None,
    };
    if let Some((unit, consumed)) = spelled {
        return (unit.to_string(), index + consumed);
    }

    if unit_family(word).is_some() || is_unit_like(word) {
        (word.to_string(), index + 1)
    } else {
        (String::new(), index)
    }
}

fn is_unit_like(word: &str) -> bool {
    !STOPWORDS.contains(&word)
        && comparator_from_words(&[word]).is_none()
        && !LOWER_BOUND_CUES.contains(&word)
        && word.chars().all(|ch| ch.is_alphabetic() || matches!(ch, '/' | '°'))
}

fn trailing_comparator(tokens: &[Token], index: usize) -> (Option<Comparator>, usize) {
    let word_at = |offset: usize| tokens.get(index + offset).and_then(Token::word);
    match (word_at(0), word_at(1)) {
        (Some("or"), Some("more" | "greater" | "higher" | "above")) => (Some(Comparator::Ge), index + 2),
        (Some("or"), Some("less" | "lower" | "below" | "fewer")) => (Some(Comparator::Le), index + 2),
        _ => (None, index),
    }
}

fn clause_excerpt(text: &str, tokens: &[Token], start: usize) -> String {
    let end = tokens[start..]
        .iter()
        .take(MAX_GAP + 2)
        .take_while(|token| token.kind != TokenKind::Boundary)
        .last()
        .map_or(tokens[start].end, |token| token.end);
    text[tokens[start].start..end].trim().to_string()
}

fn tokenize(text: &str) -> Vec<Token> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let offset_at = |index: usize| chars.get(index).map_or(text.len(), |(offset, _)| *offset);
    let char_at = |index: usize| chars.get(index).map(|(_, ch)| *ch);
    let mut tokens = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let (offset, ch) = chars[index];
        let next = char_at(index + 1);
        let previous = index.checked_sub(1).and_then(char_at);

        let signed = ch == '-'
            && next.is_some_and(|c| c.is_ascii_digit())
            && previous.map_or(true, |c| c.is_whitespace() || matches!(c, '>' | '<' | '=' | '('));

        if ch.is_ascii_digit() || signed {
            let mut literal = String::new();
            if signed {
                literal.push('-');
                index += 1;
            }
            while let Some(current) = char_at(index) {
                if current.is_ascii_digit() {
                    literal.push(current);
                    index += 1;
                } else if current == '.'
                    && !literal.contains('.')
                    && char_at(index + 1).is_some_and(|c| c.is_ascii_digit())
                {
                    literal.push('.');
                    index += 1;
                } else if current == ',' && is_thousands_group(&chars, index + 1) {
                    index += 1;
                } else {
                    break;
                }
            }
            if let Ok(value) = literal.parse::<f64>() {
                tokens.push(Token { kind: TokenKind::Number(value), start: offset, end: offset_at(index) });
            }
            continue;
        }

        if ch.is_alphabetic() || ch == '°' {
            let mut word = String::new();
            while let Some(current) = char_at(index) {
                let inner_slash = current == '/'
                    && !word.is_empty()
                    && char_at(index + 1).is_some_and(char::is_alphabetic);
                if current.is_alphabetic() || current == '°' || current == '\'' || inner_slash {
                    word.extend(current.to_lowercase());
                    index += 1;
                } else {
                    break;
                }
            }
            tokens.push(Token { kind: TokenKind::Word(word), start: offset, end: offset_at(index) });
            continue;
        }

        let symbol = match (ch, next) {
            ('>', Some('=')) | ('=', Some('>')) => Some((Comparator::Ge, 2)),
            ('<', Some('=')) | ('=', Some('<')) => Some((Comparator::Le, 2)),
            ('=', Some('=')) => Some((Comparator::Eq, 2)),
            ('>', _) => Some((Comparator::Gt, 1)),
            ('<', _) => Some((Comparator::Lt, 1)),
            ('=', _) => Some((Comparator::Eq, 1)),
            ('≥', _) => Some((Comparator::Ge, 1)),
            ('≤', _) => Some((Comparator::Le, 1)),
            _ => None,
        };
        if let Some((comparator, width)) = symbol {
            index += width;
            tokens.push(Token { kind: TokenKind::Symbol(comparator), start: offset, end: offset_at(index) });
            continue;
        }

        if matches!(ch, '.' | ';' | ',' | ':' | '!' | '?' | '\n' | '\r') {
            tokens.push(Token { kind: TokenKind::Boundary, start: offset, end: offset_at(index + 1) });
        }
        index += 1;
    }

    tokens
}

fn is_thousands_group(chars: &[(usize, char)], start: usize) -> bool {
    let group_is_digits =
        (start..start + 3).all(|index| chars.get(index).is_some_and(|(_, ch)| ch.is_ascii_digit()));
    let terminated = chars.get(start + 3).map_or(true, |(_, ch)| !ch.is_ascii_digit());
    group_is_digits && terminated
}

#[cfg(test)]
mod tests {
    use super::{ThresholdExtractor, DEFAULT_COMPARATOR};
    use crate::domain::{Citation, Comparator, Metric, RuleSnippet};

    fn snippet(index: usize, text: &str) -> RuleSnippet {
        RuleSnippet::new(text, Citation::new(index, format!("manual-{index}.md"), text, 0.9))
    }

    fn close(lhs: f64, rhs: f64) -> bool {
        (lhs - rhs).abs() < 1e-3
    }

    #[test]
    fn extracts_wind_clause_with_comparator_word() {
        let thresholds = ThresholdExtractor::new().extract(&[snippet(
            1,
            "Crane operations must stop when wind speed exceeds 20 mph.",
        )]);

        assert_eq!(thresholds.len(), 1);
        let threshold = &thresholds[0];
        assert_eq!(threshold.metric, Metric::WindSpeed);
        assert_eq!(threshold.operator, Comparator::Gt);
        assert_eq!(threshold.value, 20.0);
        assert_eq!(threshold.unit, "mph");
        assert!(threshold.unit_verified);
        assert_eq!(threshold.clause, "wind speed exceeds 20 mph");
        assert_eq!(threshold.source_citation.source_index, 1);
    }

    #[test]
    fn extracts_symbol_comparator_with_attached_unit() {
        let thresholds = ThresholdExtractor::new().extract(&[snippet(2, "rain > 5mm")]);
        assert_eq!(thresholds.len(), 1);
        assert_eq!(thresholds[0].metric, Metric::Precipitation);
        assert_eq!(thresholds[0].operator, Comparator::Gt);
        assert_eq!(thresholds[0].value, 5.0);
        assert_eq!(thresholds[0].unit, "mm");
    }

    #[test]
    fn independent_clauses_yield_separate_thresholds_in_canonical_units() {
        let thresholds = ThresholdExtractor::new().extract(&[snippet(
            1,
            "Suspend lifts if wind speed exceeds 32 km/h or rainfall above 1 inch in a day.",
        )]);

        assert_eq!(thresholds.len(), 2);
        assert_eq!(thresholds[0].metric, Metric::WindSpeed);
        assert!(close(thresholds[0].value, 32.0 * 0.621_371));
        assert_eq!(thresholds[0].unit, "mph");
        assert_eq!(thresholds[1].metric, Metric::Precipitation);
        assert!(close(thresholds[1].value, 25.4));
        assert_eq!(thresholds[1].unit, "mm");
    }

    #[test]
    fn negative_celsius_limit_converts_to_fahrenheit() {
        let thresholds = ThresholdExtractor::new()
            .extract(&[snippet(1, "No concrete pours when temperature is below -10°C.")]);
        assert_eq!(thresholds.len(), 1);
        assert_eq!(thresholds[0].operator, Comparator::Lt);
        assert!(close(thresholds[0].value, 14.0));
        assert_eq!(thresholds[0].unit, "°F");
    }

    #[test]
    fn bare_limit_defaults_to_prohibited_above() {
        let thresholds =
            ThresholdExtractor::new().extract(&[snippet(1, "Wind speed limit of 25 for aerial lifts")]);
        assert_eq!(thresholds.len(), 1);
        assert_eq!(thresholds[0].operator, DEFAULT_COMPARATOR);
        assert_eq!(thresholds[0].unit, "mph");
        assert!(!thresholds[0].unit_verified, "missing unit is assumed, not verified");
    }

    #[test]
    fn minimum_cue_defaults_to_prohibited_below() {
        let thresholds =
            ThresholdExtractor::new().extract(&[snippet(1, "Minimum visibility 0.5 miles for crane work.")]);
        assert_eq!(thresholds.len(), 1);
        assert_eq!(thresholds[0].metric, Metric::Visibility);
        assert_eq!(thresholds[0].operator, Comparator::Lt);
        assert_eq!(thresholds[0].value, 0.5);
        assert_eq!(thresholds[0].unit, "mi");
    }

    #[test]
    fn inclusive_phrasing_maps_to_inclusive_comparators() {
        let extractor = ThresholdExtractor::new();
        let ge = extractor.extract(&[snippet(1, "Stop when wind speeds of 25 mph or more are forecast")]);
        assert_eq!(ge[0].operator, Comparator::Ge);

        let symbol = extractor.extract(&[snippet(1, "gusts ≥ 35 mph")]);
        assert_eq!(symbol[0].operator, Comparator::Ge);
        assert_eq!(symbol[0].metric, Metric::Custom("wind_gust".to_string()));

        let le = extractor.extract(&[snippet(1, "visibility at or below 1000 ft")]);
        assert_eq!(le[0].operator, Comparator::Le);
        assert!(close(le[0].value, 1000.0 / 5280.0));
    }

    #[test]
    fn spelled_out_units_are_recognised() {
        let thresholds = ThresholdExtractor::new()
            .extract(&[snippet(1, "wind speed greater than 9 meters per second")]);
        assert_eq!(thresholds[0].unit, "mph");
        assert!(close(thresholds[0].value, 9.0 * 2.236_936));
    }

    #[test]
    fn unknown_unit_is_kept_but_unverified() {
        let thresholds = ThresholdExtractor::new().extract(&[snippet(1, "rain exceeds 3 buckets")]);
        assert_eq!(thresholds[0].unit, "buckets");
        assert!(!thresholds[0].unit_verified);
    }

    #[test]
    fn metric_without_number_is_discarded_and_reported() {
        let extraction = ThresholdExtractor::new().extract_with_diagnostics(&[
            snippet(1, "Wind gusts exceed safe levels."),
            snippet(2, "Strong winds are dangerous."),
            snippet(3, "Maximum load 20 tons."),
        ]);

        assert!(extraction.thresholds.is_empty());
        assert_eq!(extraction.skipped.len(), 1, "only the comparator clause is a parse error");
        assert_eq!(extraction.skipped[0].source_index, 1);
        assert!(extraction.skipped[0].clause.starts_with("Wind gusts exceed"));
    }

    #[test]
    fn identical_thresholds_are_not_merged() {
        let thresholds = ThresholdExtractor::new().extract(&[
            snippet(1, "wind speed exceeds 20 mph"),
            snippet(2, "wind speed exceeds 20 mph"),
        ]);
        assert_eq!(thresholds.len(), 2);
        assert_eq!(thresholds[0].source_citation.source_index, 1);
        assert_eq!(thresholds[1].source_citation.source_index, 2);
    }

    #[test]
    fn clause_stops_at_sentence_boundary() {
        let thresholds = ThresholdExtractor::new()
            .extract(&[snippet(1, "Monitor wind. Cranes may lift 20 tons above grade.")]);
        assert!(thresholds.is_empty());
    }

    #[test]
    fn inline_condition_is_carried_onto_its_threshold() {
        let thresholds = ThresholdExtractor::new().extract(&[snippet(
            1,
            "Lifts stop when wind speed exceeds 20 mph [condition: wind_speed * 1.5 > limit]. \
             Pouring stops when rain exceeds 5 mm.",
        )]);

        assert_eq!(thresholds.len(), 2, "the bracketed expression is not read as another clause");
        assert_eq!(thresholds[0].condition.as_deref(), Some("wind_speed * 1.5 > limit"));
        assert_eq!(thresholds[0].clause, "wind speed exceeds 20 mph");
        assert_eq!(thresholds[1].metric, Metric::Precipitation);
        assert_eq!(thresholds[1].condition, None);
    }

    #[test]
    fn empty_or_detached_conditions_are_ignored() {
        let thresholds = ThresholdExtractor::new().extract(&[
            snippet(1, "wind speed exceeds 20 mph [Condition: ]"),
            snippet(2, "rain exceeds 5 mm. Note [condition: reading > 1]"),
        ]);
        assert_eq!(thresholds.len(), 2);
        assert!(thresholds.iter().all(|threshold| threshold.condition.is_none()));
    }
}
