//! Casual-vs-domain query classification.
//!
//! This module implements the `QueryClassifier`, which decides whether a
//! message is small talk (greeting, thanks, "who are you") or a health
//! question. The result picks the prompt template: casual replies skip
//! citations and memory retrieval entirely.
//!
//! Classification is a pure function of the text. Anything that matches no
//! casual pattern is a domain query, so ambiguous input errs toward the
//! fuller, cited answer.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Outcome of classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Casual,
    Domain,
}

impl QueryKind {
    pub fn is_casual(&self) -> bool {
        matches!(self, QueryKind::Casual)
    }
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryKind::Casual => f.write_str("casual"),
            QueryKind::Domain => f.write_str("domain"),
        }
    }
}

/// Which casual pattern family matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CasualCategory {
    Greeting,
    WellbeingCheck,
    SelfIdentification,
    IdentityQuery,
    MetaQuery,
    Gratitude,
    Farewell,
    Pleasantry,
    Apology,
    Acknowledgement,
}

/// Result of classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub kind: QueryKind,

    /// Set for casual results
    pub category: Option<CasualCategory>,

    /// The prefix or acknowledgement that matched
    pub matched_pattern: Option<String>,

    /// Explanation of why this kind was chosen
    pub reason: String,
}

/// A family of casual openers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CasualPattern {
    pub category: CasualCategory,

    /// Lowercase openers, matched at the start of the text on a word boundary
    pub prefixes: Vec<String>,
}

impl CasualPattern {
    fn new(category: CasualCategory, prefixes: &[&str]) -> Self {
        Self {
            category,
            prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Configuration for query classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub casual_patterns: Vec<CasualPattern>,

    /// Single-word replies that are casual only when they are the whole text
    pub acknowledgements: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        use CasualCategory::*;

        Self {
            casual_patterns: vec![
                CasualPattern::new(
                    Greeting,
                    &[
                        "hi",
                        "hello",
                        "hey",
                        "good morning",
                        "good afternoon",
                        "good evening",
                        "greetings",
                    ],
                ),
                CasualPattern::new(
                    WellbeingCheck,
                    &[
                        "how are you",
                        "how're you",
                        "how r u",
                        "what's up",
                        "wassup",
                        "sup",
                        "how is it going",
                        "how's it going",
                        "how are things",
                    ],
                ),
                CasualPattern::new(
                    SelfIdentification,
                    &[
                        "my name is",
                        "i am",
                        "i'm",
                        "this is",
                        "i'm called",
                        "they call me",
                        "people call me",
                    ],
                ),
                CasualPattern::new(
                    IdentityQuery,
                    &[
                        "who are you",
                        "what are you",
                        "what is your name",
                        "your name",
                        "do you know me",
                        "do you know my name",
                        "do you know who i am",
                        "do you know where i",
                    ],
                ),
                CasualPattern::new(MetaQuery, &["tell me about yourself", "what do you do"]),
                CasualPattern::new(
                    Gratitude,
                    &["thank you", "thanks", "thx", "ty", "appreciate"],
                ),
                CasualPattern::new(
                    Farewell,
                    &["bye", "goodbye", "see you", "talk later", "gotta go"],
                ),
                CasualPattern::new(Pleasantry, &["nice to meet you", "pleasure", "good to"]),
                CasualPattern::new(Apology, &["sorry", "my bad", "excuse me", "pardon"]),
            ],
            acknowledgements: [
                "ok", "okay", "yes", "no", "yeah", "yep", "nope", "sure", "alright", "cool",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Deterministic casual/domain classifier.
#[derive(Debug, Clone, Default)]
pub struct QueryClassifier {
    config: ClassifierConfig,
}

impl QueryClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Classify a message.
    pub fn classify(&self, text: &str) -> ClassificationResult {
        let normalized = normalize(text);

        let ack = normalized.trim_end_matches(['.', '!', '?']);
        if let Some(word) = self.config.acknowledgements.iter().find(|a| a.as_str() == ack) {
            return casual(CasualCategory::Acknowledgement, word);
        }

        for pattern in &self.config.casual_patterns {
            if let Some(prefix) = pattern
                .prefixes
                .iter()
                .find(|p| starts_with_word(&normalized, p))
            {
                debug!(category = ?pattern.category, prefix = %prefix, "Casual query");
                return casual(pattern.category, prefix);
            }
        }

        ClassificationResult {
            kind: QueryKind::Domain,
            category: None,
            matched_pattern: None,
            reason: "No casual pattern matched; defaulting to domain".to_string(),
        }
    }

    /// Shorthand for `classify(text).kind`.
    pub fn kind(&self, text: &str) -> QueryKind {
        self.classify(text).kind
    }
}

fn casual(category: CasualCategory, pattern: &str) -> ClassificationResult {
    ClassificationResult {
        kind: QueryKind::Casual,
        category: Some(category),
        matched_pattern: Some(pattern.to_string()),
        reason: format!("Casual {:?}: matched '{}'", category, pattern),
    }
}

/// Trim, lowercase and fold typographic apostrophes.
fn normalize(text: &str) -> String {
    text.trim().to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

/// `text` starts with `prefix` and the prefix ends on a word boundary,
/// so "hi" matches "hi there" but not "hiv".
fn starts_with_word(text: &str, prefix: &str) -> bool {
    match text.strip_prefix(prefix) {
        Some(rest) => rest.chars().next().map_or(true, |c| !c.is_alphanumeric()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(text: &str) -> QueryKind {
        QueryClassifier::new().kind(text)
    }

    #[test]
    fn test_greeting_is_casual() {
        assert_eq!(kind("hi there"), QueryKind::Casual);
        assert_eq!(kind("  Good Morning!"), QueryKind::Casual);
    }

    #[test]
    fn test_symptom_report_is_domain() {
        assert_eq!(
            kind("I have had a fever and cough for three days"),
            QueryKind::Domain
        );
    }

    #[test]
    fn test_categories() {
        let classifier = QueryClassifier::new();
        let cases = [
            ("how's it going?", CasualCategory::WellbeingCheck),
            ("My name is Priya", CasualCategory::SelfIdentification),
            ("I\u{2019}m called Ana", CasualCategory::SelfIdentification),
            ("who are you", CasualCategory::IdentityQuery),
            ("do you know my name?", CasualCategory::IdentityQuery),
            ("tell me about yourself", CasualCategory::MetaQuery),
            ("Thanks a lot", CasualCategory::Gratitude),
            ("bye for now", CasualCategory::Farewell),
            ("nice to meet you", CasualCategory::Pleasantry),
            ("sorry, typo", CasualCategory::Apology),
            ("ok", CasualCategory::Acknowledgement),
            ("Yes.", CasualCategory::Acknowledgement),
        ];
        for (text, expected) in cases {
            let result = classifier.classify(text);
            assert_eq!(result.kind, QueryKind::Casual, "{}", text);
            assert_eq!(result.category, Some(expected), "{}", text);
        }
    }

    #[test]
    fn test_prefix_needs_word_boundary() {
        assert_eq!(kind("hiv transmission risks"), QueryKind::Domain);
        assert_eq!(kind("history of heart disease in my family"), QueryKind::Domain);
        assert_eq!(kind("typhoid vaccine schedule"), QueryKind::Domain);
        assert_eq!(kind("supplements for iron deficiency"), QueryKind::Domain);
    }

    #[test]
    fn test_acknowledgement_must_be_whole_text() {
        assert_eq!(kind("no appetite since monday"), QueryKind::Domain);
        assert_eq!(kind("sure"), QueryKind::Casual);
    }

    #[test]
    fn test_empty_defaults_to_domain() {
        let result = QueryClassifier::new().classify("   ");
        assert_eq!(result.kind, QueryKind::Domain);
        assert!(result.category.is_none());
    }

    #[test]
    fn test_deterministic() {
        let classifier = QueryClassifier::new();
        let a = classifier.classify("hello again");
        let b = classifier.classify("hello again");
        assert_eq!(a.kind, b.kind);
        assert_eq!(a.matched_pattern, b.matched_pattern);
    }

    #[test]
    fn test_custom_config() {
        let classifier = QueryClassifier::with_config(ClassifierConfig {
            casual_patterns: vec![CasualPattern::new(CasualCategory::Greeting, &["ola"])],
            acknowledgements: vec![],
        });
        assert_eq!(classifier.kind("ola amigo"), QueryKind::Casual);
        assert_eq!(classifier.kind("hello"), QueryKind::Domain);
    }
}
