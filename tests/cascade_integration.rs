//! End-to-end cascade inference tests with counting stubs

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use memex::config::CascadeConfig;
use memex::inference::emotion::{EmotionDetector, Polarity};
use memex::inference::ner::{CascadeNer, EntityType};
use memex::inference::{
    CascadeInferenceEngine, FastModelLevel, InferenceError, KeywordRuleLevel,
};
use memex::traits::{
    ChatMessage, Classification, FastClassifier, LlmCaller, NerExtractor, UpstreamError,
};

/// LLM stub that counts invocations and replays a canned response
struct CountingLlm {
    response: String,
    calls: AtomicU64,
}

impl CountingLlm {
    fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            calls: AtomicU64::new(0),
        }
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LlmCaller for CountingLlm {
    async fn generate(
        &self,
        _messages: &[ChatMessage],
        _temperature: f32,
    ) -> Result<String, UpstreamError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.response.clone())
    }
}

struct OfflineLlm;

#[async_trait]
impl LlmCaller for OfflineLlm {
    async fn generate(
        &self,
        _messages: &[ChatMessage],
        _temperature: f32,
    ) -> Result<String, UpstreamError> {
        Err(UpstreamError::new("llm", "provider unreachable"))
    }
}

fn no_cache_config() -> CascadeConfig {
    CascadeConfig {
        cache_enabled: false,
        ..CascadeConfig::default()
    }
}

#[tokio::test]
async fn rule_matched_dates_never_reach_the_llm() {
    let llm = Arc::new(CountingLlm::new("[]"));
    let ner = CascadeNer::with_llm(&no_cache_config(), llm.clone());

    let entities = ner.extract("standup moved to 2026-03-14").await.unwrap();

    assert!(entities
        .iter()
        .any(|e| e.text == "2026-03-14" && e.entity_type == EntityType::Date));
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn unmatched_text_escalates_to_the_llm() {
    let llm = Arc::new(CountingLlm::new(
        r#"[{"text": "quarterly review", "type": "EVENT", "confidence": 0.85}]"#,
    ));
    let ner = CascadeNer::with_llm(&no_cache_config(), llm.clone());

    let entities = ner
        .extract("notes from the quarterly review session")
        .await
        .unwrap();

    assert_eq!(llm.calls(), 1);
    assert!(entities
        .iter()
        .any(|e| e.text == "quarterly review" && e.entity_type == EntityType::Event));
}

#[tokio::test]
async fn unparseable_llm_response_yields_empty_entities_not_an_error() {
    let llm = Arc::new(CountingLlm::new("I could not find anything of note."));
    let ner = CascadeNer::with_llm(&no_cache_config(), llm);

    let entities = ner.extract("nothing recognizable here").await.unwrap();
    assert!(entities.is_empty());
}

#[tokio::test]
async fn terminal_llm_failure_propagates() {
    let ner = CascadeNer::with_llm(&no_cache_config(), Arc::new(OfflineLlm));

    let result = ner.extract("something the rules cannot read").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn cache_short_circuits_repeat_inputs() {
    let llm = Arc::new(CountingLlm::new(
        r#"[{"text": "Berlin", "type": "LOCATION", "confidence": 0.9}]"#,
    ));
    let config = CascadeConfig::default();
    let ner = CascadeNer::with_llm(&config, llm.clone());

    let first = ner.extract("thinking about the berlin trip").await.unwrap();
    let second = ner.extract("thinking about the berlin trip").await.unwrap();

    assert_eq!(llm.calls(), 1);
    assert_eq!(first.len(), second.len());
}

#[tokio::test]
async fn emotion_keyword_tie_escalates_and_llm_wins() {
    let llm = Arc::new(CountingLlm::new(
        r#"{"polarity": "positive", "intensity": 0.8}"#,
    ));
    let detector = EmotionDetector::with_llm(&no_cache_config(), llm.clone());

    // "happy" and "worried" cancel out in the keyword count
    let emotion = detector
        .detect("happy about the offer but worried about the move")
        .await
        .unwrap();

    assert_eq!(llm.calls(), 1);
    assert_eq!(emotion.polarity, Polarity::Positive);
    assert!((emotion.intensity - 0.8).abs() < 1e-6);
}

#[tokio::test]
async fn clear_emotion_resolved_by_rules_alone() {
    let llm = Arc::new(CountingLlm::new(
        r#"{"polarity": "negative", "intensity": 0.9}"#,
    ));
    let detector = EmotionDetector::with_llm(&no_cache_config(), llm.clone());

    let emotion = detector
        .detect("what a wonderful and amazing surprise, I am delighted")
        .await
        .unwrap();

    assert_eq!(llm.calls(), 0);
    assert_eq!(emotion.polarity, Polarity::Positive);
}

/// Classifier stub with a fixed label and probability
struct FixedClassifier {
    label: &'static str,
    probability: f32,
    calls: AtomicU64,
}

#[async_trait]
impl FastClassifier for FixedClassifier {
    async fn classify(&self, _text: &str) -> Result<Classification, UpstreamError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(Classification {
            label: self.label.to_string(),
            probability: self.probability,
        })
    }

    fn model_name(&self) -> &str {
        "fixed-classifier"
    }
}

#[tokio::test]
async fn three_tier_cascade_stops_at_the_first_confident_level() {
    let classifier = Arc::new(FixedClassifier {
        label: "work",
        probability: 0.92,
        calls: AtomicU64::new(0),
    });
    let llm = Arc::new(CountingLlm::new(r#"{"label": "work"}"#));

    let engine = CascadeInferenceEngine::new("topic")
        .add_level(
            Box::new(KeywordRuleLevel::new("keyword_topic").with_label(
                "groceries",
                ["milk", "bread", "eggs"],
            )),
            0.7,
        )
        .add_level(
            Box::new(FastModelLevel::new("fast_topic", classifier.clone(), 0.3)),
            0.7,
        )
        .add_level(
            Box::new(memex::inference::ner::LlmNerLevel::new("llm_topic", llm.clone(), 0.1)),
            0.7,
        );

    let result = engine.infer("drafting the project proposal").await.unwrap();

    // Keywords miss, fast model answers confidently, LLM never runs
    assert_eq!(result.level, "fast_topic");
    assert_eq!(classifier.calls.load(Ordering::Relaxed), 1);
    assert_eq!(llm.calls(), 0);

    let stats = engine.stats();
    assert_eq!(stats.level_invocations[0].1, 1);
    assert_eq!(stats.level_invocations[1].1, 1);
    assert_eq!(stats.level_invocations[2].1, 0);
}

#[tokio::test]
async fn engine_without_levels_reports_no_levels() {
    let engine = CascadeInferenceEngine::new("empty");
    let result = engine.infer("anything").await;
    assert!(matches!(result, Err(InferenceError::NoLevels)));
}
