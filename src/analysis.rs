/*!
 * Analysis request and result types
 *
 * A request is identified by its fingerprint: a SHA-256 digest over the
 * trimmed text and every parameter that changes the outcome. Results carry
 * the four rubric scores plus an opaque payload that is passed through
 * untouched.
 */

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Rubric dimensions every result must score
pub const SCORE_KEYS: [&str; 4] = ["ideas", "organization", "style", "grammar"];

/// Score substituted for missing or out-of-range values
pub const DEFAULT_SCORE: f64 = 75.0;

/// Appended to inputs that were cut before analysis
pub const TRUNCATION_NOTE: &str = "...\n\n[Note: Essay was truncated for analysis due to length]";

/// Separates fingerprint fields so distinct tuples never concatenate alike
const FIELD_SEPARATOR: char = '\u{1f}';

/// Leading 16 characters of a fingerprint, for log lines
pub fn short_fingerprint(fingerprint: &str) -> &str {
    fingerprint.get(..16).unwrap_or(fingerprint)
}

/// Kind of essay being analyzed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EssayMode {
    /// Let the analyzer decide
    #[default]
    Auto,
    Argumentative,
    Narrative,
    LiteraryAnalysis,
    /// Mixed or unrecognized forms
    Hybrid,
}

impl EssayMode {
    /// Map a free-form label onto a mode; unknown labels become `Hybrid`
    pub fn normalize(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "auto" => EssayMode::Auto,
            "argumentative" | "persuasive" => EssayMode::Argumentative,
            "narrative" => EssayMode::Narrative,
            "literary" | "literary_analysis" | "analytical" => EssayMode::LiteraryAnalysis,
            _ => EssayMode::Hybrid,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EssayMode::Auto => "auto",
            EssayMode::Argumentative => "argumentative",
            EssayMode::Narrative => "narrative",
            EssayMode::LiteraryAnalysis => "literary_analysis",
            EssayMode::Hybrid => "hybrid",
        }
    }
}

impl FromStr for EssayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EssayMode::normalize(s))
    }
}

impl fmt::Display for EssayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much explanation accompanies each suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CoachingLevel {
    Light,
    #[default]
    Medium,
    Intensive,
}

impl CoachingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoachingLevel::Light => "light",
            CoachingLevel::Medium => "medium",
            CoachingLevel::Intensive => "intensive",
        }
    }
}

impl FromStr for CoachingLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "light" => Ok(CoachingLevel::Light),
            "medium" => Ok(CoachingLevel::Medium),
            "intensive" => Ok(CoachingLevel::Intensive),
            other => Err(format!(
                "unknown coaching level '{}' (expected light, medium or intensive)",
                other
            )),
        }
    }
}

impl fmt::Display for CoachingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many suggestions the analyzer should make
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Aggressiveness {
    Low,
    #[default]
    Medium,
    High,
}

impl Aggressiveness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggressiveness::Low => "low",
            Aggressiveness::Medium => "medium",
            Aggressiveness::High => "high",
        }
    }
}

impl FromStr for Aggressiveness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Aggressiveness::Low),
            "medium" => Ok(Aggressiveness::Medium),
            "high" => Ok(Aggressiveness::High),
            other => Err(format!(
                "unknown aggressiveness '{}' (expected low, medium or high)",
                other
            )),
        }
    }
}

impl fmt::Display for Aggressiveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One essay to analyze, with every parameter that affects the outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub text: String,
    #[serde(default)]
    pub mode: EssayMode,
    #[serde(default)]
    pub coaching: CoachingLevel,
    #[serde(default)]
    pub aggressiveness: Aggressiveness,
}

impl AnalysisRequest {
    /// Request with default parameters
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mode: EssayMode::default(),
            coaching: CoachingLevel::default(),
            aggressiveness: Aggressiveness::default(),
        }
    }

    pub fn with_mode(mut self, mode: EssayMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_coaching(mut self, coaching: CoachingLevel) -> Self {
        self.coaching = coaching;
        self
    }

    pub fn with_aggressiveness(mut self, aggressiveness: Aggressiveness) -> Self {
        self.aggressiveness = aggressiveness;
        self
    }

    /// Deterministic cache key (64 lowercase hex characters)
    ///
    /// Surrounding whitespace in the text does not change the fingerprint;
    /// every parameter does.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.text.trim().as_bytes());
        for field in [
            self.mode.as_str(),
            self.coaching.as_str(),
            self.aggressiveness.as_str(),
        ] {
            let mut sep = [0u8; 4];
            hasher.update(FIELD_SEPARATOR.encode_utf8(&mut sep).as_bytes());
            hasher.update(field.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// The text actually sent for analysis
    ///
    /// Texts longer than `max_chars` characters are cut on a character
    /// boundary and tagged with [`TRUNCATION_NOTE`].
    pub fn prepared_text(&self, max_chars: usize) -> Cow<'_, str> {
        match self.text.char_indices().nth(max_chars) {
            Some((cut, _)) => Cow::Owned(format!("{}{}", &self.text[..cut], TRUNCATION_NOTE)),
            None => Cow::Borrowed(&self.text),
        }
    }
}

/// Outcome of an analysis, genuine or fallback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Rubric scores keyed by dimension
    pub scores: BTreeMap<String, f64>,

    /// Set when the scores were computed locally instead of by the analyzer
    pub is_fallback: bool,

    /// Classification of the failure that forced a fallback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<String>,

    /// Everything else the analyzer returned, passed through unmodified
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl AnalysisResult {
    /// A genuine result, with its scores sanitized
    pub fn genuine(scores: BTreeMap<String, f64>, payload: serde_json::Value) -> Self {
        let mut result = Self {
            scores,
            is_fallback: false,
            error_class: None,
            payload,
        };
        result.sanitize_scores();
        result
    }

    pub fn score(&self, key: &str) -> Option<f64> {
        self.scores.get(key).copied()
    }

    /// Replace missing, non-finite or out-of-range rubric scores with [`DEFAULT_SCORE`]
    ///
    /// Returns how many scores were replaced.
    pub fn sanitize_scores(&mut self) -> usize {
        let mut replaced = 0;
        for key in SCORE_KEYS {
            let value = self.scores.entry(key.to_string()).or_insert(f64::NAN);
            if !value.is_finite() || !(0.0..=100.0).contains(value) {
                *value = DEFAULT_SCORE;
                replaced += 1;
            }
        }
        replaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_shape_and_determinism() {
        let request = AnalysisRequest::new("An essay.");
        let fp = request.fingerprint();
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(fp, AnalysisRequest::new("An essay.").fingerprint());
    }

    #[test]
    fn test_fingerprint_ignores_surrounding_whitespace() {
        let a = AnalysisRequest::new("An essay.");
        let b = AnalysisRequest::new("  An essay.\n\n");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_covers_every_parameter() {
        let base = AnalysisRequest::new("An essay.");
        let variants = [
            base.clone().with_mode(EssayMode::Narrative),
            base.clone().with_coaching(CoachingLevel::Intensive),
            base.clone().with_aggressiveness(Aggressiveness::High),
            AnalysisRequest::new("Another essay."),
        ];
        for variant in &variants {
            assert_ne!(variant.fingerprint(), base.fingerprint(), "{:?}", variant);
        }
    }

    #[test]
    fn test_fingerprint_fields_do_not_run_together() {
        // "hybrid" appended to the text must not look like the mode field
        let a = AnalysisRequest::new("text").with_mode(EssayMode::Hybrid);
        let b = AnalysisRequest::new("texthybrid").with_mode(EssayMode::Auto);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_essay_mode_normalization() {
        assert_eq!(EssayMode::normalize("Persuasive"), EssayMode::Argumentative);
        assert_eq!(EssayMode::normalize("analytical"), EssayMode::LiteraryAnalysis);
        assert_eq!(EssayMode::normalize(" literary "), EssayMode::LiteraryAnalysis);
        assert_eq!(EssayMode::normalize("narrative"), EssayMode::Narrative);
        assert_eq!(EssayMode::normalize("auto"), EssayMode::Auto);
        assert_eq!(EssayMode::normalize("expository"), EssayMode::Hybrid);
        assert_eq!(EssayMode::normalize(""), EssayMode::Hybrid);
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("Light".parse::<CoachingLevel>(), Ok(CoachingLevel::Light));
        assert!("extreme".parse::<CoachingLevel>().is_err());
        assert_eq!("high".parse::<Aggressiveness>(), Ok(Aggressiveness::High));
        assert!("".parse::<Aggressiveness>().is_err());
    }

    #[test]
    fn test_prepared_text_truncates_on_char_boundary() {
        let request = AnalysisRequest::new("héllo wörld");
        assert_eq!(request.prepared_text(100), "héllo wörld");

        let cut = request.prepared_text(2);
        assert!(cut.starts_with("hé..."));
        assert!(cut.ends_with("due to length]"));
    }

    #[test]
    fn test_prepared_text_at_exact_limit_is_untouched() {
        let request = AnalysisRequest::new("abcd");
        assert!(matches!(request.prepared_text(4), Cow::Borrowed("abcd")));
    }

    #[test]
    fn test_score_sanitation() {
        let scores = BTreeMap::from([
            ("ideas".to_string(), 88.0),
            ("organization".to_string(), 140.0),
            ("style".to_string(), f64::NAN),
        ]);
        let mut result = AnalysisResult::genuine(scores, serde_json::Value::Null);

        assert_eq!(result.score("ideas"), Some(88.0));
        assert_eq!(result.score("organization"), Some(DEFAULT_SCORE));
        assert_eq!(result.score("style"), Some(DEFAULT_SCORE));
        assert_eq!(result.score("grammar"), Some(DEFAULT_SCORE));
        assert!(!result.is_fallback);
        assert_eq!(result.sanitize_scores(), 0);
    }

    #[test]
    fn test_result_serialization_skips_missing_error_class() {
        let result = AnalysisResult::genuine(BTreeMap::new(), serde_json::json!({"k": 1}));
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("error_class").is_none());
        assert_eq!(json["payload"]["k"], 1);
        assert_eq!(json["is_fallback"], false);
    }
}
