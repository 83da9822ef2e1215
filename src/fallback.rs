/*!
 * Heuristic fallback analysis
 *
 * Used when the external analyzer cannot produce a result. Scores are
 * derived purely from text statistics, so identical input always yields
 * identical output.
 */

use quill_core_resilience::ErrorClass;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::info;

use crate::analysis::{AnalysisRequest, AnalysisResult, SCORE_KEYS};

const BASE_SCORE: i64 = 70;
const MIN_SCORE: i64 = 50;
const MAX_SCORE: i64 = 95;
const ISSUE_PENALTY: i64 = 10;

/// Counts the fallback scores are derived from
#[derive(Debug, Clone, PartialEq)]
pub struct TextStatistics {
    pub words: usize,
    /// Non-empty `.`-separated segments
    pub sentences: usize,
    /// Non-empty blank-line-separated blocks
    pub paragraphs: usize,
    /// Words per sentence (words when no sentence was found)
    pub avg_sentence_length: f64,
}

impl TextStatistics {
    pub fn from_text(text: &str) -> Self {
        let words = text.split_whitespace().count();
        let sentences = text.split('.').filter(|s| !s.trim().is_empty()).count();
        let paragraphs = text.split("\n\n").filter(|p| !p.trim().is_empty()).count();
        Self {
            words,
            sentences,
            paragraphs,
            avg_sentence_length: words as f64 / sentences.max(1) as f64,
        }
    }
}

/// A structural weakness spotted by the heuristics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Issue {
    FewParagraphs,
    TooShort,
    LongSentences,
}

impl Issue {
    fn detect(stats: &TextStatistics) -> Vec<Issue> {
        let mut issues = Vec::new();
        if stats.paragraphs < 3 {
            issues.push(Issue::FewParagraphs);
        }
        if stats.words < 300 {
            issues.push(Issue::TooShort);
        }
        if stats.avg_sentence_length > 25.0 {
            issues.push(Issue::LongSentences);
        }
        issues
    }

    fn suggestion(&self) -> Value {
        let (kind, text, reason) = match self {
            Issue::FewParagraphs => (
                "structure",
                "Consider adding more paragraphs",
                "Essays typically benefit from introduction, body paragraphs, and conclusion",
            ),
            Issue::TooShort => (
                "length",
                "Consider expanding your essay",
                "Essays under 300 words may not fully develop ideas",
            ),
            Issue::LongSentences => (
                "sentence_length",
                "Consider breaking long sentences",
                "Sentences over 25 words can be hard to follow",
            ),
        };
        json!({ "type": kind, "text": text, "reason": reason })
    }
}

fn service_notice() -> Value {
    json!({
        "type": "service_notice",
        "text": "AI analysis service temporarily unavailable",
        "reason": "Please try again in a few minutes for detailed AI-powered feedback and suggestions",
    })
}

/// Builds fallback results for requests the analyzer could not serve
#[derive(Debug, Clone, Copy)]
pub struct FallbackGenerator {
    heuristics_enabled: bool,
}

impl Default for FallbackGenerator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl FallbackGenerator {
    /// With `heuristics_enabled = false` every fallback carries neutral zero scores
    pub fn new(heuristics_enabled: bool) -> Self {
        Self { heuristics_enabled }
    }

    /// Produce a tagged fallback result for `request`
    pub fn generate(&self, request: &AnalysisRequest, class: ErrorClass) -> AnalysisResult {
        let mut result = if self.heuristics_enabled {
            self.heuristic(request)
        } else {
            self.neutral(request)
        };
        result.error_class = Some(class.as_str().to_string());
        result
    }

    /// Scores alone, for callers that only need the numbers
    pub fn heuristic_scores(stats: &TextStatistics) -> BTreeMap<String, f64> {
        let length_modifier = if stats.words < 200 {
            -20
        } else if stats.words < 300 {
            -10
        } else if stats.words > 500 {
            5
        } else {
            0
        };
        let structure_modifier = (stats.paragraphs as i64 * 3).min(10);

        let mut scores = [
            BASE_SCORE + length_modifier,
            BASE_SCORE + structure_modifier,
            BASE_SCORE - 5,
            BASE_SCORE,
        ]
        .map(|score| score.clamp(MIN_SCORE, MAX_SCORE));

        if Issue::detect(stats).len() > 2 {
            scores = scores.map(|score| (score - ISSUE_PENALTY).max(MIN_SCORE));
        }

        SCORE_KEYS
            .iter()
            .zip(scores)
            .map(|(key, score)| (key.to_string(), score as f64))
            .collect()
    }

    fn heuristic(&self, request: &AnalysisRequest) -> AnalysisResult {
        let stats = TextStatistics::from_text(&request.text);
        let issues = Issue::detect(&stats);
        let scores = Self::heuristic_scores(&stats);

        let structure = if stats.paragraphs >= 3 { "adequate" } else { "minimal" };
        let mut suggestions: Vec<Value> = issues.iter().map(Issue::suggestion).collect();
        suggestions.push(service_notice());

        let payload = json!({
            "essay_type": request.mode.as_str(),
            "score_reasons": {
                "ideas": format!(
                    "Basic analysis shows {} words. AI analysis unavailable - full feedback requires service connection.",
                    stats.words
                ),
                "organization": format!(
                    "Essay has {} paragraphs. Structure appears {}. Full analysis requires AI service.",
                    stats.paragraphs, structure
                ),
                "style": format!(
                    "Average sentence length: {:.1} words. Style analysis unavailable without AI service.",
                    stats.avg_sentence_length
                ),
                "grammar": "Basic grammar analysis unavailable - AI service required for detailed feedback.",
            },
            "suggestions": suggestions,
            "examples": {
                "ideas": [
                    format!("Essay contains {} words", stats.words),
                    if stats.words < 300 { "May need more development" } else { "Adequate length for idea development" },
                ],
                "organization": [
                    format!("{} paragraphs detected", stats.paragraphs),
                    if stats.paragraphs < 3 { "Consider adding more paragraphs" } else { "Basic structure present" },
                ],
                "style": [
                    format!("Average sentence length: {:.1} words", stats.avg_sentence_length),
                    if stats.avg_sentence_length > 25.0 { "May need sentence variety" } else { "Sentence length appears reasonable" },
                ],
                "grammar": ["Grammar analysis requires AI service", "Please try again when service is available"],
            },
            "word_suggestions": [],
            "analysis_notes": format!(
                "Basic analysis completed. Word count: {}, Paragraphs: {}, Issues found: {}",
                stats.words, stats.paragraphs, issues.len()
            ),
        });

        info!(
            "Fallback analysis generated: {} words, {} paragraphs, {} issues identified",
            stats.words,
            stats.paragraphs,
            issues.len()
        );

        AnalysisResult {
            scores,
            is_fallback: true,
            error_class: None,
            payload,
        }
    }

    fn neutral(&self, request: &AnalysisRequest) -> AnalysisResult {
        let scores = SCORE_KEYS.iter().map(|key| (key.to_string(), 0.0)).collect();
        AnalysisResult {
            scores,
            is_fallback: true,
            error_class: None,
            payload: json!({
                "essay_type": request.mode.as_str(),
                "suggestions": [service_notice()],
                "analysis_notes": "Analysis unavailable and heuristic fallback scoring is disabled.",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn essay(paragraphs: usize, sentences_per_paragraph: usize, words_per_sentence: usize) -> String {
        let sentence = vec!["word"; words_per_sentence].join(" ");
        let paragraph = vec![sentence; sentences_per_paragraph].join(". ") + ".";
        vec![paragraph; paragraphs].join("\n\n")
    }

    #[test]
    fn test_statistics() {
        let stats = TextStatistics::from_text("One two. Three four five.\n\nSix.");
        assert_eq!(stats.words, 6);
        assert_eq!(stats.sentences, 3);
        assert_eq!(stats.paragraphs, 2);
        assert!((stats.avg_sentence_length - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_statistics_of_empty_text() {
        let stats = TextStatistics::from_text("   ");
        assert_eq!(stats.words, 0);
        assert_eq!(stats.sentences, 0);
        assert_eq!(stats.paragraphs, 0);
        assert_eq!(stats.avg_sentence_length, 0.0);
    }

    #[test]
    fn test_short_single_paragraph_scores() {
        // 1 paragraph, 50 words: two issues, so no blanket penalty
        let stats = TextStatistics::from_text(&essay(1, 5, 10));
        let scores = FallbackGenerator::heuristic_scores(&stats);
        assert_eq!(scores["ideas"], 50.0);
        assert_eq!(scores["organization"], 73.0);
        assert_eq!(scores["style"], 65.0);
        assert_eq!(scores["grammar"], 70.0);
    }

    #[test]
    fn test_three_issues_apply_penalty() {
        // 1 paragraph, 2 sentences of 30 words: all three issues
        let stats = TextStatistics::from_text(&essay(1, 2, 30));
        assert_eq!(Issue::detect(&stats).len(), 3);
        let scores = FallbackGenerator::heuristic_scores(&stats);
        assert_eq!(scores["ideas"], 50.0);
        assert_eq!(scores["organization"], 63.0);
        assert_eq!(scores["style"], 55.0);
        assert_eq!(scores["grammar"], 60.0);
    }

    #[test]
    fn test_long_well_structured_essay() {
        // 5 paragraphs x 8 sentences x 15 words = 600 words
        let stats = TextStatistics::from_text(&essay(5, 8, 15));
        assert!(Issue::detect(&stats).is_empty());
        let scores = FallbackGenerator::heuristic_scores(&stats);
        assert_eq!(scores["ideas"], 75.0);
        assert_eq!(scores["organization"], 80.0);
        assert_eq!(scores["style"], 65.0);
        assert_eq!(scores["grammar"], 70.0);
    }

    #[test]
    fn test_generate_is_deterministic_and_tagged() {
        let generator = FallbackGenerator::default();
        let request = AnalysisRequest::new(essay(2, 4, 12));

        let a = generator.generate(&request, ErrorClass::RateLimit);
        let b = generator.generate(&request, ErrorClass::RateLimit);
        assert_eq!(a, b);
        assert!(a.is_fallback);
        assert_eq!(a.error_class.as_deref(), Some("transient-rateLimit"));

        let suggestions = a.payload["suggestions"].as_array().unwrap();
        assert_eq!(suggestions.last().unwrap()["type"], "service_notice");
    }

    #[test]
    fn test_disabled_heuristics_give_neutral_scores() {
        let generator = FallbackGenerator::new(false);
        let result = generator.generate(&AnalysisRequest::new("Some text."), ErrorClass::Auth);
        assert!(result.is_fallback);
        assert_eq!(result.scores.len(), 4);
        assert!(result.scores.values().all(|score| *score == 0.0));
        assert_eq!(result.error_class.as_deref(), Some("permanent-auth"));
    }
}
