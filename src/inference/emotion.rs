//! Emotion detection on top of the cascade engine
//!
//! Keyword polarity matching handles clearly-worded text; ambiguous text
//! escalates to an LLM level. The detector is used by memory analysis
//! callers to tag stored notes with an emotional reading.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::CascadeConfig;
use crate::inference::{
    extract_json_block, CascadeInferenceEngine, InferenceError, InferenceLevel, InferenceResult,
    InferenceValue, LevelKind,
};
use crate::traits::{ChatMessage, LlmCaller, UpstreamError};

/// Confidence reported by the keyword level when polarity words dominate
const KEYWORD_MATCH_CONFIDENCE: f32 = 0.85;

/// Confidence attached to a neutral reading after an unparseable LLM response
const PARSE_FAILURE_CONFIDENCE: f32 = 0.3;

/// Emotional polarity of a text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Positive,
    Negative,
    Neutral,
}

impl Polarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Polarity::Positive => "positive",
            Polarity::Negative => "negative",
            Polarity::Neutral => "neutral",
        }
    }

    fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "positive" => Polarity::Positive,
            "negative" => Polarity::Negative,
            _ => Polarity::Neutral,
        }
    }
}

/// An emotional reading of a text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Emotion {
    pub polarity: Polarity,
    /// Strength of the emotion (0.0 - 1.0)
    pub intensity: f32,
}

impl Emotion {
    pub fn neutral() -> Self {
        Self {
            polarity: Polarity::Neutral,
            intensity: 0.5,
        }
    }

    fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "polarity": self.polarity.as_str(),
            "intensity": self.intensity,
        })
    }

    fn from_value(value: &serde_json::Value) -> Option<Self> {
        let polarity = value.get("polarity")?.as_str().map(Polarity::from_name)?;
        let intensity = value.get("intensity")?.as_f64()? as f32;
        Some(Self {
            polarity,
            intensity: intensity.clamp(0.0, 1.0),
        })
    }
}

/// Keyword polarity level
///
/// Counts positive and negative markers; a tie (including zero matches)
/// yields a low-confidence neutral reading that forces escalation.
pub struct KeywordEmotionLevel {
    name: String,
    positive: Vec<String>,
    negative: Vec<String>,
}

impl KeywordEmotionLevel {
    /// Create the level with the built-in English marker lists
    pub fn new(name: impl Into<String>) -> Self {
        let positive = [
            "happy", "glad", "great", "wonderful", "love", "loved", "excited", "joy",
            "delighted", "grateful", "proud", "amazing",
        ];
        let negative = [
            "sad", "angry", "hate", "hated", "terrible", "awful", "upset", "worried",
            "anxious", "miserable", "disappointed", "hurt",
        ];

        Self {
            name: name.into(),
            positive: positive.iter().map(|s| s.to_string()).collect(),
            negative: negative.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replace the marker lists
    pub fn with_markers<I, S>(mut self, positive: I, negative: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.positive = positive.into_iter().map(|s| s.into().to_lowercase()).collect();
        self.negative = negative.into_iter().map(|s| s.into().to_lowercase()).collect();
        self
    }
}

#[async_trait]
impl InferenceLevel for KeywordEmotionLevel {
    async fn infer(&self, input: &str) -> Result<InferenceResult, UpstreamError> {
        let lowered = input.to_lowercase();

        let positive_count = self.positive.iter().filter(|w| lowered.contains(w.as_str())).count();
        let negative_count = self.negative.iter().filter(|w| lowered.contains(w.as_str())).count();

        let (emotion, confidence) = if positive_count > negative_count {
            let intensity = 0.5 + 0.1 * (positive_count - negative_count).min(5) as f32;
            (
                Emotion {
                    polarity: Polarity::Positive,
                    intensity,
                },
                KEYWORD_MATCH_CONFIDENCE,
            )
        } else if negative_count > positive_count {
            let intensity = 0.5 + 0.1 * (negative_count - positive_count).min(5) as f32;
            (
                Emotion {
                    polarity: Polarity::Negative,
                    intensity,
                },
                KEYWORD_MATCH_CONFIDENCE,
            )
        } else {
            // Tie or no markers: low confidence, let the cascade escalate
            (Emotion::neutral(), 0.4)
        };

        Ok(InferenceResult::new(
            InferenceValue::Structured(emotion.to_value()),
            confidence,
            &self.name,
            LevelKind::Rule,
        ))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// LLM-backed emotion level with defensive response parsing
pub struct LlmEmotionLevel {
    name: String,
    llm: Arc<dyn LlmCaller>,
    temperature: f32,
}

impl LlmEmotionLevel {
    pub fn new(name: impl Into<String>, llm: Arc<dyn LlmCaller>, temperature: f32) -> Self {
        Self {
            name: name.into(),
            llm,
            temperature,
        }
    }

    fn build_prompt(&self, text: &str) -> String {
        format!(
            r#"Analyze the emotional tone of the text below.

Return a JSON object with:
- "polarity": one of "positive", "negative", "neutral"
- "intensity": a number between 0.0 and 1.0

Text:
{text}

Return only the JSON object, no extra commentary."#
        )
    }
}

#[async_trait]
impl InferenceLevel for LlmEmotionLevel {
    async fn infer(&self, input: &str) -> Result<InferenceResult, UpstreamError> {
        let prompt = self.build_prompt(input);
        let response = self
            .llm
            .generate(&[ChatMessage::user(prompt)], self.temperature)
            .await?;

        let parsed = extract_json_block(&response)
            .and_then(|block| serde_json::from_str::<serde_json::Value>(block).ok())
            .and_then(|value| Emotion::from_value(&value));

        match parsed {
            Some(emotion) => Ok(InferenceResult::new(
                InferenceValue::Structured(emotion.to_value()),
                0.95,
                &self.name,
                LevelKind::Llm,
            )),
            None => {
                tracing::warn!(level = %self.name, "unparseable emotion response, returning neutral");
                Ok(InferenceResult::new(
                    InferenceValue::Structured(Emotion::neutral().to_value()),
                    PARSE_FAILURE_CONFIDENCE,
                    &self.name,
                    LevelKind::Llm,
                )
                .with_metadata("parse_failure", serde_json::json!(true)))
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Cascade-backed emotion detector
pub struct EmotionDetector {
    engine: CascadeInferenceEngine,
}

impl EmotionDetector {
    /// Keyword-only detector; the keyword level is terminal
    pub fn rule_only(config: &CascadeConfig) -> Self {
        let engine = CascadeInferenceEngine::from_config("emotion", config).add_level(
            Box::new(KeywordEmotionLevel::new("keyword_emotion")),
            config.default_threshold,
        );
        Self { engine }
    }

    /// Keyword detector with LLM escalation
    pub fn with_llm(config: &CascadeConfig, llm: Arc<dyn LlmCaller>) -> Self {
        let engine = CascadeInferenceEngine::from_config("emotion", config)
            .add_level(
                Box::new(KeywordEmotionLevel::new("keyword_emotion")),
                config.default_threshold,
            )
            .add_level(
                Box::new(LlmEmotionLevel::new(
                    "llm_emotion",
                    llm,
                    config.llm_temperature,
                )),
                config.default_threshold,
            );
        Self { engine }
    }

    /// Detect the emotional reading of a text
    pub async fn detect(&self, text: &str) -> Result<Emotion, InferenceError> {
        if text.trim().is_empty() {
            return Ok(Emotion::neutral());
        }

        let result = self.engine.infer(text).await?;
        let emotion = match &result.value {
            InferenceValue::Structured(value) => Emotion::from_value(value),
            _ => None,
        };

        Ok(emotion.unwrap_or_else(Emotion::neutral))
    }

    /// Invocation statistics of the underlying engine
    pub fn stats(&self) -> crate::inference::CascadeStats {
        self.engine.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_cache_config() -> CascadeConfig {
        CascadeConfig {
            cache_enabled: false,
            ..CascadeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_positive_text_detected_by_rules() {
        let detector = EmotionDetector::rule_only(&no_cache_config());
        let emotion = detector.detect("I am so happy and excited today!").await.unwrap();
        assert_eq!(emotion.polarity, Polarity::Positive);
        assert!(emotion.intensity > 0.5);
    }

    #[tokio::test]
    async fn test_negative_text_detected_by_rules() {
        let detector = EmotionDetector::rule_only(&no_cache_config());
        let emotion = detector.detect("this was a terrible, awful day").await.unwrap();
        assert_eq!(emotion.polarity, Polarity::Negative);
    }

    #[tokio::test]
    async fn test_neutral_text_stays_neutral_without_llm() {
        let detector = EmotionDetector::rule_only(&no_cache_config());
        let emotion = detector.detect("went to the store and bought milk").await.unwrap();
        assert_eq!(emotion.polarity, Polarity::Neutral);
    }

    struct CannedLlm {
        response: String,
    }

    #[async_trait]
    impl LlmCaller for CannedLlm {
        async fn generate(
            &self,
            _messages: &[ChatMessage],
            _temperature: f32,
        ) -> Result<String, UpstreamError> {
            Ok(self.response.clone())
        }
    }

    #[tokio::test]
    async fn test_ambiguous_text_escalates_to_llm() {
        let llm = Arc::new(CannedLlm {
            response: r#"{"polarity": "negative", "intensity": 0.7}"#.to_string(),
        });
        let detector = EmotionDetector::with_llm(&no_cache_config(), llm);

        // No polarity keywords, so the rule level reports low confidence
        let emotion = detector.detect("I keep thinking about what happened").await.unwrap();
        assert_eq!(emotion.polarity, Polarity::Negative);
        assert!((emotion.intensity - 0.7).abs() < 1e-6);

        let stats = detector.stats();
        assert_eq!(stats.level_invocations[1].1, 1);
    }

    #[tokio::test]
    async fn test_clear_text_skips_llm() {
        let llm = Arc::new(CannedLlm {
            response: r#"{"polarity": "neutral", "intensity": 0.5}"#.to_string(),
        });
        let detector = EmotionDetector::with_llm(&no_cache_config(), llm);

        detector.detect("I love this wonderful amazing day").await.unwrap();

        let stats = detector.stats();
        assert_eq!(stats.level_invocations[0].1, 1);
        assert_eq!(stats.level_invocations[1].1, 0);
    }

    #[tokio::test]
    async fn test_llm_parse_failure_falls_back_to_neutral() {
        let llm = Arc::new(CannedLlm {
            response: "the mood seems complicated".to_string(),
        });
        let detector = EmotionDetector::with_llm(&no_cache_config(), llm);

        let emotion = detector.detect("an unreadable mix of feelings").await.unwrap();
        assert_eq!(emotion.polarity, Polarity::Neutral);
    }
}
