//! Construction guardrail for measurement answers.
//!
//! A question is a measurement query when it mentions a size, length,
//! width, height, dimension, or measuring. For those, every retrieved source
//! is scanned with the [`DetectionRule`] set and the answer is trusted only
//! when the evidence can support a measurement:
//!
//! 1. any Not-To-Scale marker on any source: unsafe, abstain, confidence low;
//! 2. otherwise no scale notation and no explicit dimension anywhere:
//!    unsafe, ask for calibration, confidence low;
//! 3. otherwise safe, with informational notes when the evidence came from
//!    OCR or only a scale was found. Confidence is medium with notes and
//!    high without.
//!
//! Other questions pass through with no confidence override.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::document::{Confidence, RetrievedMatch};
use crate::error::{RagError, Result};

const MEASUREMENT_KEYWORDS: [&str; 8] =
    ["dimension", "size", "length", "width", "height", "measure", "how big", "how long"];

const ABSTAIN: &str = "ABSTAIN - Drawings marked N.T.S. cannot be used for measurements";
const REQUEST_CALIBRATION: &str = "Request scale calibration or look for explicit dimensions";
const NO_EVIDENCE: &str =
    "No scale information or explicit dimensions found - measurements may be unreliable";

/// What a [`DetectionRule`] recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// "N.T.S." and its spellings. Disqualifies measurement answers.
    NotToScale,
    /// Scale notations such as `1/4" = 1'-0"` or `SCALE: 1:100`.
    Scale,
    /// Explicit measurements such as `12'-6"` or `300mm`.
    Dimension,
}

/// A named pattern classified by [`RuleKind`].
#[derive(Debug, Clone)]
pub struct DetectionRule {
    name: String,
    kind: RuleKind,
    pattern: Regex,
}

impl DetectionRule {
    /// Compile a rule.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if `pattern` is not a valid regex.
    pub fn new(name: impl Into<String>, kind: RuleKind, pattern: &str) -> Result<Self> {
        let name = name.into();
        let pattern = Regex::new(pattern)
            .map_err(|e| RagError::Config(format!("invalid pattern for rule '{name}': {e}")))?;
        Ok(Self { name, kind, pattern })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    /// Every non-overlapping match in `text`.
    pub fn find_all(&self, text: &str) -> Vec<String> {
        self.pattern.find_iter(text).map(|m| m.as_str().to_string()).collect()
    }
}

fn builtin(name: &str, kind: RuleKind, pattern: &str) -> DetectionRule {
    DetectionRule::new(name, kind, pattern)
        .expect("unreachable error: built-in detection rule must compile")
}

static BUILTIN_RULES: LazyLock<Vec<DetectionRule>> = LazyLock::new(|| {
    use RuleKind::*;
    vec![
        builtin("nts_dotted", NotToScale, r"(?i)\bN\.T\.S\b\.?"),
        builtin("nts", NotToScale, r"(?i)\bNTS\b"),
        builtin("not_to_scale", NotToScale, r"(?i)\bnot\s+to\s+scale\b"),
        builtin("no_scale", NotToScale, r"(?i)\bno\s+scale\b"),
        builtin("fractional_scale", Scale, r#"(\d+/\d+)"\s*=\s*(\d+)'?-?(\d+)"?"#),
        builtin("inch_scale", Scale, r#"(\d+)"\s*=\s*(\d+)'?-?(\d+)"?"#),
        builtin("scale_label", Scale, r"(?i)\bscale\s*[:=]\s*([^,\n]+)"),
        builtin("feet_inches", Dimension, r#"(\d+)'?\s*-?\s*(\d+)""#),
        builtin("feet", Dimension, r"(\d+)'"),
        builtin("inches", Dimension, r#"(\d+)""#),
        builtin("decimal_feet", Dimension, r"(\d+\.\d+)'"),
        builtin("millimetres", Dimension, r"(?i)\d+(?:\.\d+)?\s*mm\b"),
        builtin("centimetres", Dimension, r"(?i)\d+(?:\.\d+)?\s*cm\b"),
        builtin("metres", Dimension, r"(?i)\d+\.\d+\s*m\b"),
    ]
});

/// Verdict for one answer. An advisory result, never an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub safe: bool,
    pub warnings: Vec<String>,
    pub recommendation: Option<String>,
    /// Takes precedence over the score heuristic when set.
    pub confidence_override: Option<Confidence>,
    pub measurement_query: bool,
    pub scales_found: Vec<String>,
    pub dimensions_found: Vec<String>,
}

/// An answer after the guardrail has been applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedAnswer {
    pub answer: String,
    /// `None` when the validator has no opinion.
    pub confidence: Option<Confidence>,
}

/// Rule-driven construction safety checks.
///
/// ```rust,ignore
/// let validator = ConstructionValidator::default();
/// let result = validator.validate("what is the length of the beam?", &matches);
/// let enhanced = validator.enhance(&raw_answer, &result);
/// ```
#[derive(Debug, Clone)]
pub struct ConstructionValidator {
    rules: Vec<DetectionRule>,
}

impl Default for ConstructionValidator {
    fn default() -> Self {
        Self { rules: BUILTIN_RULES.clone() }
    }
}

impl ConstructionValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule after the built-in ones.
    pub fn with_rule(mut self, rule: DetectionRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[DetectionRule] {
        &self.rules
    }

    /// Whether `query` asks for a measurement (case-insensitive keyword match).
    pub fn is_measurement_query(query: &str) -> bool {
        let query = query.to_lowercase();
        MEASUREMENT_KEYWORDS.iter().any(|keyword| query.contains(keyword))
    }

    fn scan(&self, kind: RuleKind, text: &str) -> Vec<String> {
        self.rules.iter().filter(|r| r.kind == kind).flat_map(|r| r.find_all(text)).collect()
    }

    /// Judge whether `sources` can support an answer to `query`.
    pub fn validate(&self, query: &str, sources: &[RetrievedMatch]) -> ValidationResult {
        if !Self::is_measurement_query(query) {
            return ValidationResult { safe: true, ..Default::default() };
        }

        let mut result = ValidationResult { measurement_query: true, ..Default::default() };
        let mut not_to_scale = false;
        let mut ocr_evidence = Vec::new();

        for source in sources {
            let markings = self.scan(RuleKind::NotToScale, &source.text);
            if !markings.is_empty() {
                not_to_scale = true;
                result.warnings.push(format!(
                    "Drawing {} contains N.T.S. markings: {markings:?}",
                    source.metadata.source
                ));
            }

            let scales = self.scan(RuleKind::Scale, &source.text);
            let dimensions = self.scan(RuleKind::Dimension, &source.text);
            if source.metadata.ocr && !(scales.is_empty() && dimensions.is_empty()) {
                ocr_evidence.push(format!(
                    "{} page {}",
                    source.metadata.source,
                    source.metadata.page + 1
                ));
            }
            result.scales_found.extend(scales);
            result.dimensions_found.extend(dimensions);
        }

        if not_to_scale {
            warn!(warnings = result.warnings.len(), "measurement query answered from N.T.S. drawings");
            result.recommendation = Some(ABSTAIN.to_string());
            result.confidence_override = Some(Confidence::Low);
            return result;
        }

        if result.scales_found.is_empty() && result.dimensions_found.is_empty() {
            warn!(source_count = sources.len(), "no scale or dimension evidence for measurement query");
            result.warnings.push(NO_EVIDENCE.to_string());
            result.recommendation = Some(REQUEST_CALIBRATION.to_string());
            result.confidence_override = Some(Confidence::Low);
            return result;
        }

        if !ocr_evidence.is_empty() {
            result.warnings.push(format!(
                "Measurement evidence was read by OCR ({}) - verify values against the drawing",
                ocr_evidence.join(", ")
            ));
        }
        if result.dimensions_found.is_empty() {
            result.warnings.push(
                "Scale notation found but no explicit dimensions - scaled measurements should be field-verified"
                    .to_string(),
            );
        }

        result.safe = true;
        result.confidence_override =
            Some(if result.warnings.is_empty() { Confidence::High } else { Confidence::Medium });
        debug!(
            scales = result.scales_found.len(),
            dimensions = result.dimensions_found.len(),
            notes = result.warnings.len(),
            "measurement evidence accepted"
        );
        result
    }

    /// Apply `validation` to the model's answer.
    ///
    /// Unsafe answers get a warning block in front of the original text.
    /// Safe answers with notes get a notes block appended. Anything else is
    /// returned unchanged.
    pub fn enhance(&self, answer: &str, validation: &ValidationResult) -> EnhancedAnswer {
        if !validation.safe {
            let mut lines = vec!["⚠️ **CONSTRUCTION SAFETY WARNING:**".to_string()];
            lines.extend(validation.warnings.iter().map(|w| format!("• {w}")));
            if let Some(recommendation) = &validation.recommendation {
                lines.push(format!("• **Recommendation:** {recommendation}"));
            }
            lines.push(String::new());
            lines.push("**Original Response:**".to_string());
            return EnhancedAnswer {
                answer: format!("{}\n{answer}", lines.join("\n")),
                confidence: Some(validation.confidence_override.unwrap_or(Confidence::Low)),
            };
        }

        if !validation.warnings.is_empty() {
            let mut notes = String::from("\n📋 **Construction Notes:**");
            for warning in &validation.warnings {
                notes.push_str("\n• ");
                notes.push_str(warning);
            }
            return EnhancedAnswer {
                answer: format!("{answer}{notes}"),
                confidence: Some(Confidence::Medium),
            };
        }

        EnhancedAnswer { answer: answer.to_string(), confidence: validation.confidence_override }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{BoundingBox, Fragment, SourceDocument};

    fn source(name: &str, text: &str) -> RetrievedMatch {
        let doc = SourceDocument::from_path(format!("/drawings/{name}"));
        let f = Fragment::native(&doc, 0, BoundingBox::new(0.0, 0.0, 1.0, 1.0), text);
        RetrievedMatch { id: name.to_string(), score: 0.8, text: f.text, metadata: f.metadata }
    }

    fn scanned(name: &str, page: u32, text: &str) -> RetrievedMatch {
        let doc = SourceDocument::from_path(format!("/drawings/{name}"));
        let f = Fragment::ocr(&doc, page, None, text);
        RetrievedMatch { id: name.to_string(), score: 0.8, text: f.text, metadata: f.metadata }
    }

    #[test]
    fn measurement_keywords_are_case_insensitive() {
        assert!(ConstructionValidator::is_measurement_query("What is the wall WIDTH?"));
        assert!(ConstructionValidator::is_measurement_query("How long is the ramp"));
        assert!(ConstructionValidator::is_measurement_query("what size is the footing"));
        assert!(!ConstructionValidator::is_measurement_query("what material is the roof?"));
    }

    #[test]
    fn non_measurement_query_is_always_safe() {
        let validator = ConstructionValidator::new();
        let result = validator.validate("what material is the roof?", &[source("A-1.pdf", "N.T.S.")]);
        assert!(result.safe);
        assert!(result.warnings.is_empty());
        assert_eq!(result.confidence_override, None);
        assert!(!result.measurement_query);
    }

    #[test]
    fn nts_disqualifies_regardless_of_other_evidence() {
        let validator = ConstructionValidator::new();
        let result = validator.validate(
            "what is the length of the beam?",
            &[
                source("S-201.pdf", "BEAM SPAN 24'-6\" SCALE: 1/4\" = 1'-0\""),
                source("S-501.pdf", "DETAIL A - N.T.S."),
            ],
        );
        assert!(!result.safe);
        assert_eq!(result.confidence_override, Some(Confidence::Low));
        assert_eq!(result.recommendation.as_deref(), Some(ABSTAIN));
        assert_eq!(result.warnings, vec![r#"Drawing S-501.pdf contains N.T.S. markings: ["N.T.S."]"#]);
    }

    #[test]
    fn nts_spellings_are_detected() {
        let validator = ConstructionValidator::new();
        for text in ["TYPICAL SECTION NTS", "Not To Scale", "NOT TO SCALE", "no scale", "n.t.s"] {
            let result = validator.validate("height of the parapet", &[source("A.pdf", text)]);
            assert!(!result.safe, "{text} should be flagged");
            assert_eq!(result.recommendation.as_deref(), Some(ABSTAIN));
        }
    }

    #[test]
    fn words_containing_nts_are_not_markings() {
        let validator = ConstructionValidator::new();
        let result = validator.validate(
            "how big is the opening",
            &[source("A.pdf", "CONTENTS: OPENING 36\" WIDE, SEE AMENDMENTS")],
        );
        assert!(result.safe);
    }

    #[test]
    fn missing_scale_and_dimensions_requests_calibration() {
        let validator = ConstructionValidator::new();
        let result = validator.validate(
            "what are the dimensions of room 101?",
            &[source("A-101.pdf", "ROOM 101 OFFICE. FINISH: PAINT TYPE P-1")],
        );
        assert!(!result.safe);
        assert_eq!(result.confidence_override, Some(Confidence::Low));
        assert_eq!(result.recommendation.as_deref(), Some(REQUEST_CALIBRATION));
        assert_eq!(result.warnings, vec![NO_EVIDENCE]);
    }

    #[test]
    fn scale_and_dimension_is_fully_safe() {
        let validator = ConstructionValidator::new();
        let result = validator.validate(
            "what is the wall width?",
            &[source("A-101.pdf", "Wall thickness: 300mm, Scale: 1/4\" = 1'-0\"")],
        );
        assert!(result.safe);
        assert!(result.warnings.is_empty());
        assert_eq!(result.confidence_override, Some(Confidence::High));
        assert!(result.dimensions_found.contains(&"300mm".to_string()));
        assert!(!result.scales_found.is_empty());
    }

    #[test]
    fn metric_and_imperial_dimensions_are_found() {
        let validator = ConstructionValidator::new();
        let result = validator.validate(
            "size of the slab",
            &[source("S.pdf", "SLAB 150 mm THK, 3.5m BAY, 30cm UPSTAND, 12.5' RUN, 12'-6\" CLR")],
        );
        for expected in ["150 mm", "3.5m", "30cm", "12.5'", "12'-6\""] {
            assert!(result.dimensions_found.iter().any(|d| d == expected), "missing {expected}");
        }
    }

    #[test]
    fn uppercase_metres_count_as_dimensions() {
        let validator = ConstructionValidator::new();
        let result =
            validator.validate("what is the span length?", &[source("S-201.pdf", "BEAM B2 SPAN 3.5M CLEAR")]);
        assert_eq!(result.dimensions_found, vec!["3.5M"]);
        assert!(result.safe);
        assert_eq!(result.confidence_override, Some(Confidence::High));
        assert_eq!(result.recommendation, None);
    }

    #[test]
    fn ocr_evidence_adds_a_note() {
        let validator = ConstructionValidator::new();
        let result =
            validator.validate("how long is the ramp", &[scanned("C-101.pdf", 2, "RAMP 24'-0\" LONG")]);
        assert!(result.safe);
        assert_eq!(result.confidence_override, Some(Confidence::Medium));
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("C-101.pdf page 3"));
    }

    #[test]
    fn scale_without_dimensions_adds_a_note() {
        let validator = ConstructionValidator::new();
        let result =
            validator.validate("measure the corridor", &[source("A.pdf", "FLOOR PLAN SCALE: 1:100")]);
        assert!(result.safe);
        assert_eq!(result.confidence_override, Some(Confidence::Medium));
        assert!(result.warnings[0].starts_with("Scale notation found"));
    }

    #[test]
    fn custom_rules_extend_the_builtin_set() {
        let validator = ConstructionValidator::new()
            .with_rule(DetectionRule::new("diagrammatic", RuleKind::NotToScale, r"(?i)\bdiagrammatic\b").unwrap());
        let result = validator.validate(
            "length of duct run",
            &[source("M-101.pdf", "DUCT LAYOUT IS DIAGRAMMATIC. 12\" x 8\" DUCT")],
        );
        assert!(!result.safe);
    }

    #[test]
    fn invalid_rule_pattern_is_a_config_error() {
        let err = DetectionRule::new("broken", RuleKind::Scale, "(").unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[test]
    fn unsafe_answer_is_prefixed_with_warning_block() {
        let validator = ConstructionValidator::new();
        let result = validator.validate("length of the beam", &[source("S-501.pdf", "DETAIL A - N.T.S.")]);
        let enhanced = validator.enhance("The beam is 20 feet.", &result);
        assert_eq!(enhanced.confidence, Some(Confidence::Low));
        assert_eq!(
            enhanced.answer,
            format!(
                "⚠️ **CONSTRUCTION SAFETY WARNING:**\n\
                 • Drawing S-501.pdf contains N.T.S. markings: [\"N.T.S.\"]\n\
                 • **Recommendation:** {ABSTAIN}\n\
                 \n\
                 **Original Response:**\n\
                 The beam is 20 feet."
            )
        );
    }

    #[test]
    fn safe_answer_with_notes_gets_notes_appended() {
        let validator = ConstructionValidator::new();
        let result = ValidationResult {
            safe: true,
            warnings: vec!["check it".to_string()],
            measurement_query: true,
            ..Default::default()
        };
        let enhanced = validator.enhance("12'-6\"", &result);
        assert_eq!(enhanced.answer, "12'-6\"\n📋 **Construction Notes:**\n• check it");
        assert_eq!(enhanced.confidence, Some(Confidence::Medium));
    }

    #[test]
    fn fully_safe_answer_passes_through() {
        let validator = ConstructionValidator::new();
        let result = validator.validate("what is the wall width?", &[source("A.pdf", "WALL 300mm")]);
        let enhanced = validator.enhance("300mm", &result);
        assert_eq!(enhanced.answer, "300mm");
        assert_eq!(enhanced.confidence, Some(Confidence::High));

        let general = validator.validate("who is the architect?", &[]);
        assert_eq!(validator.enhance("Unknown", &general).confidence, None);
    }
}
