//! Partition classifier for incoming memory content
//!
//! Resolution order is fixed: a valid caller hint wins, then the ordered
//! lexical rules, then the User partition with category `general`. The
//! classifier is pure and never fails once constructed.

use super::item::{Category, Partition};
use crate::config::ClassificationRule;
use crate::error::{Error, Result};
use regex::Regex;

/// Why a partition was chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationSource {
    /// Caller supplied a valid partition hint
    Hint,
    /// A lexical rule matched
    Rule(String),
    /// Nothing matched
    Default,
}

/// Classification result for a piece of content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub partition: Partition,
    pub category: Category,
    pub source: ClassificationSource,
}

/// Rule-based partition classifier
pub struct Classifier {
    rules: Vec<CompiledRule>,
}

struct CompiledRule {
    name: String,
    pattern: Regex,
    partition: Partition,
    category: Category,
}

impl Classifier {
    /// Compile the given rules, in order
    pub fn new(rules: Vec<ClassificationRule>) -> Result<Self> {
        let compiled_rules = rules
            .into_iter()
            .map(|rule| {
                let source = match &rule {
                    ClassificationRule::Vocabulary { words, .. } => vocabulary_pattern(words)
                        .ok_or_else(|| {
                            Error::Config(format!("Rule '{}' has no words", rule.name()))
                        })?,
                    ClassificationRule::Pattern { pattern, .. } => pattern.clone(),
                };
                let pattern = Regex::new(&source).map_err(|e| {
                    Error::Config(format!(
                        "Invalid regex pattern for rule '{}': {}",
                        rule.name(),
                        e
                    ))
                })?;

                Ok(CompiledRule {
                    name: rule.name().to_string(),
                    pattern,
                    partition: rule.partition(),
                    category: rule.category(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rules: compiled_rules,
        })
    }

    /// Classify `text`, honouring `hint` when it names a partition
    pub fn classify(&self, text: &str, hint: Option<&str>) -> Classification {
        if let Some(hint) = hint {
            match hint.parse::<Partition>() {
                Ok(partition) => {
                    let category = self
                        .rules
                        .iter()
                        .find(|r| r.partition == partition && r.pattern.is_match(text))
                        .map(|r| r.category)
                        .unwrap_or_else(|| Category::default_for(partition));
                    return Classification {
                        partition,
                        category,
                        source: ClassificationSource::Hint,
                    };
                }
                Err(_) => {
                    tracing::debug!(hint, "Ignoring invalid partition hint");
                }
            }
        }

        if let Some(rule) = self.rules.iter().find(|r| r.pattern.is_match(text)) {
            return Classification {
                partition: rule.partition,
                category: rule.category,
                source: ClassificationSource::Rule(rule.name.clone()),
            };
        }

        Classification {
            partition: Partition::User,
            category: Category::General,
            source: ClassificationSource::Default,
        }
    }

    /// Number of compiled rules
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

/// `(?i)\b(?:w1|w2)\b` with each word escaped and inner spaces relaxed
fn vocabulary_pattern(words: &[String]) -> Option<String> {
    let alternatives: Vec<String> = words
        .iter()
        .map(|w| w.trim())
        .filter(|w| !w.is_empty())
        .map(|w| {
            w.split_whitespace()
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"\s+")
        })
        .collect();
    if alternatives.is_empty() {
        return None;
    }
    Some(format!(r"(?i)\b(?:{})\b", alternatives.join("|")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_classification_rules;

    fn create_test_classifier() -> Classifier {
        Classifier::new(default_classification_rules()).unwrap()
    }

    #[test]
    fn test_self_reflection_vocabulary() {
        let classifier = create_test_classifier();
        let result = classifier.classify("I realized my reasoning skipped a step", None);
        assert_eq!(result.partition, Partition::SelfKnowledge);
        assert_eq!(result.category, Category::SelfReflection);
        assert_eq!(
            result.source,
            ClassificationSource::Rule("self_reflection".to_string())
        );
    }

    #[test]
    fn test_learning_vocabulary() {
        let classifier = create_test_classifier();
        let result = classifier.classify("Lesson learned: verify the path first", None);
        assert_eq!(result.partition, Partition::SelfKnowledge);
        assert_eq!(result.category, Category::LearnedBehavior);
    }

    #[test]
    fn test_environment_vocabulary() {
        let classifier = create_test_classifier();

        let sensor = classifier.classify("Kitchen sensor: temperature 21.5C", None);
        assert_eq!(sensor.partition, Partition::Environment);
        assert_eq!(sensor.category, Category::SensorReading);

        let hook = classifier.classify("Received webhook from GitHub", None);
        assert_eq!(hook.partition, Partition::Environment);
        assert_eq!(hook.category, Category::WebhookEvent);

        let api = classifier.classify("Weather API returned HTTP 503", None);
        assert_eq!(api.partition, Partition::Environment);
        assert_eq!(api.category, Category::ApiResponse);
    }

    #[test]
    fn test_user_subtypes() {
        let classifier = create_test_classifier();
        let pref = classifier.classify("I prefer short answers", None);
        assert_eq!(pref.partition, Partition::User);
        assert_eq!(pref.category, Category::UserPreference);

        let fact = classifier.classify("My name is Dana", None);
        assert_eq!(fact.category, Category::UserFact);
    }

    #[test]
    fn test_default_is_user_general() {
        let classifier = create_test_classifier();
        let result = classifier.classify("What's on the menu tonight?", None);
        assert_eq!(result.partition, Partition::User);
        assert_eq!(result.category, Category::General);
        assert_eq!(result.source, ClassificationSource::Default);
    }

    #[test]
    fn test_whole_word_matching() {
        let classifier = create_test_classifier();
        // "rapid" contains "api" but is not the word
        let result = classifier.classify("rapid progress on the garden", None);
        assert_eq!(result.partition, Partition::User);
    }

    #[test]
    fn test_everyday_reading_is_not_telemetry() {
        let classifier = create_test_classifier();
        let result = classifier.classify("I'm reading Dune this week", None);
        assert_eq!(result.partition, Partition::User);

        let meter = classifier.classify("Water meter reading at 1042 litres", None);
        assert_eq!(meter.category, Category::SensorReading);
    }

    #[test]
    fn test_valid_hint_wins() {
        let classifier = create_test_classifier();
        let result = classifier.classify("sensor temperature 20C", Some("self_knowledge"));
        assert_eq!(result.partition, Partition::SelfKnowledge);
        assert_eq!(result.category, Category::SelfReflection);
        assert_eq!(result.source, ClassificationSource::Hint);

        let result = classifier.classify("sensor temperature 20C", Some("environment"));
        assert_eq!(result.category, Category::SensorReading);
    }

    #[test]
    fn test_invalid_hint_falls_through() {
        let classifier = create_test_classifier();
        let result = classifier.classify("webhook fired", Some("archive"));
        assert_eq!(result.partition, Partition::Environment);
        assert!(matches!(result.source, ClassificationSource::Rule(_)));
    }

    #[test]
    fn test_deterministic() {
        let classifier = create_test_classifier();
        let text = "I learned the telemetry feed lags";
        assert_eq!(classifier.classify(text, None), classifier.classify(text, None));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let rules = vec![ClassificationRule::Pattern {
            name: "broken".to_string(),
            partition: Partition::User,
            category: Category::General,
            pattern: "(unclosed".to_string(),
        }];
        assert!(matches!(Classifier::new(rules), Err(Error::Config(_))));
    }

    #[test]
    fn test_empty_vocabulary_rejected() {
        let rules = vec![ClassificationRule::Vocabulary {
            name: "empty".to_string(),
            partition: Partition::User,
            category: Category::General,
            words: vec!["  ".to_string()],
        }];
        assert!(Classifier::new(rules).is_err());
    }

    #[test]
    fn test_vocabulary_pattern_escapes() {
        let pattern = vocabulary_pattern(&["c++".to_string(), "battery  level".to_string()]).unwrap();
        assert_eq!(pattern, r"(?i)\b(?:c\+\+|battery\s+level)\b");
    }
}
