//! Generic inference levels
//!
//! Task-specific levels (NER, emotion) live next to their task modules;
//! the levels here are reusable building blocks for label classification.

use ahash::AHashSet;
use async_trait::async_trait;
use std::sync::Arc;

use crate::inference::{InferenceLevel, InferenceResult, InferenceValue, LevelKind};
use crate::traits::{FastClassifier, UpstreamError};

/// Confidence reported by a rule level when at least one keyword matched
const RULE_MATCH_CONFIDENCE: f32 = 0.85;

/// Dictionary keyword matching level
///
/// Maps labels to keyword sets and classifies by match count. Zero matches
/// yield confidence 0, forcing escalation to the next level.
pub struct KeywordRuleLevel {
    name: String,
    dictionary: Vec<(String, AHashSet<String>)>,
}

impl KeywordRuleLevel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dictionary: Vec::new(),
        }
    }

    /// Register keywords for a label (chainable)
    pub fn with_label<I, S>(mut self, label: impl Into<String>, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set = keywords
            .into_iter()
            .map(|k| k.into().to_lowercase())
            .collect();
        self.dictionary.push((label.into(), set));
        self
    }

    /// Count keyword occurrences per label in lowercase text
    fn match_counts(&self, text: &str) -> Vec<(usize, usize)> {
        self.dictionary
            .iter()
            .enumerate()
            .map(|(index, (_, keywords))| {
                let count = keywords.iter().filter(|k| text.contains(k.as_str())).count();
                (index, count)
            })
            .collect()
    }
}

#[async_trait]
impl InferenceLevel for KeywordRuleLevel {
    async fn infer(&self, input: &str) -> Result<InferenceResult, UpstreamError> {
        let lowered = input.to_lowercase();
        let counts = self.match_counts(&lowered);

        let best = counts
            .iter()
            .filter(|(_, count)| *count > 0)
            .max_by_key(|(_, count)| *count);

        match best {
            Some((index, count)) => {
                let label = self.dictionary[*index].0.clone();
                Ok(
                    InferenceResult::new(
                        InferenceValue::Label(label),
                        RULE_MATCH_CONFIDENCE,
                        &self.name,
                        LevelKind::Rule,
                    )
                    .with_metadata("keyword_matches", serde_json::json!(count)),
                )
            }
            // No match: zero confidence forces escalation
            None => Ok(InferenceResult::empty(&self.name, LevelKind::Rule)),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Local lightweight classifier level
///
/// Confidence is the model probability with a floor applied, so an uncertain
/// model can still satisfy a low threshold instead of always escalating.
pub struct FastModelLevel {
    name: String,
    classifier: Arc<dyn FastClassifier>,
    confidence_floor: f32,
}

impl FastModelLevel {
    pub fn new(
        name: impl Into<String>,
        classifier: Arc<dyn FastClassifier>,
        confidence_floor: f32,
    ) -> Self {
        Self {
            name: name.into(),
            classifier,
            confidence_floor: confidence_floor.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl InferenceLevel for FastModelLevel {
    async fn infer(&self, input: &str) -> Result<InferenceResult, UpstreamError> {
        let classification = self.classifier.classify(input).await?;

        let confidence = classification.probability.max(self.confidence_floor);

        Ok(InferenceResult::new(
            InferenceValue::Label(classification.label),
            confidence,
            &self.name,
            LevelKind::FastModel,
        )
        .with_metadata(
            "model",
            serde_json::json!(self.classifier.model_name()),
        )
        .with_metadata(
            "raw_probability",
            serde_json::json!(classification.probability),
        ))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
