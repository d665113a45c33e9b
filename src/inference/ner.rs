//! Named-entity extraction on top of the cascade engine
//!
//! A regex rule level handles the common cases cheaply; an LLM level acts as
//! the terminal fallback for text the rules cannot cover. `CascadeNer` wires
//! both into a `NerExtractor` usable by the retrieval stages.

use ahash::AHashMap;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::CascadeConfig;
use crate::inference::{
    extract_json_block, CascadeInferenceEngine, InferenceLevel, InferenceResult, InferenceValue,
    LevelKind,
};
use crate::traits::{ChatMessage, LlmCaller, NerExtractor, UpstreamError};

/// Confidence reported by the rule level when at least one pattern matched
const RULE_NER_CONFIDENCE: f32 = 0.9;

/// Confidence attached to an empty result after an unparseable LLM response
const PARSE_FAILURE_CONFIDENCE: f32 = 0.2;

/// Entity category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Person,
    Location,
    Organization,
    Topic,
    Event,
    Date,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "PERSON",
            EntityType::Location => "LOCATION",
            EntityType::Organization => "ORGANIZATION",
            EntityType::Topic => "TOPIC",
            EntityType::Event => "EVENT",
            EntityType::Date => "DATE",
        }
    }

    /// Parse a type name leniently; unknown names map to `Topic`
    pub fn from_name(name: &str) -> Self {
        match name.to_uppercase().as_str() {
            "PERSON" => EntityType::Person,
            "LOCATION" => EntityType::Location,
            "ORGANIZATION" => EntityType::Organization,
            "EVENT" => EntityType::Event,
            "DATE" => EntityType::Date,
            _ => EntityType::Topic,
        }
    }
}

/// An extracted entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Entity surface text
    pub text: String,

    /// Entity category
    pub entity_type: EntityType,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,

    /// Optional source metadata
    #[serde(default)]
    pub metadata: AHashMap<String, serde_json::Value>,
}

impl Entity {
    pub fn new(text: impl Into<String>, entity_type: EntityType, confidence: f32) -> Self {
        Self {
            text: text.into(),
            entity_type,
            confidence: confidence.clamp(0.0, 1.0),
            metadata: AHashMap::new(),
        }
    }
}

/// Merge entities, deduplicating by `(text, entity_type)`.
///
/// The merged confidence is the arithmetic mean of all contributing
/// confidences; metadata is taken from the first occurrence. Input order of
/// first occurrences is preserved.
pub fn merge_entities(entities: Vec<Entity>) -> Vec<Entity> {
    let mut order: Vec<(String, EntityType)> = Vec::new();
    let mut groups: AHashMap<(String, EntityType), (Entity, f32, usize)> = AHashMap::new();

    for entity in entities {
        let key = (entity.text.clone(), entity.entity_type);
        match groups.get_mut(&key) {
            Some((_, sum, count)) => {
                *sum += entity.confidence;
                *count += 1;
            }
            None => {
                let confidence = entity.confidence;
                order.push(key.clone());
                groups.insert(key, (entity, confidence, 1));
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .map(|(mut entity, sum, count)| {
            entity.confidence = sum / count as f32;
            entity
        })
        .collect()
}

/// Regex pattern bound to an entity type
struct NerPattern {
    entity_type: EntityType,
    regex: Regex,
    confidence: f32,
}

/// Rule-based NER level using a regex pattern table
///
/// Ships with defaults for dates and capitalized name runs; additional
/// patterns can be registered per deployment.
pub struct RuleNerLevel {
    name: String,
    patterns: Vec<NerPattern>,
}

impl RuleNerLevel {
    /// Create a rule level with the built-in pattern table
    pub fn new(name: impl Into<String>) -> Self {
        let mut level = Self {
            name: name.into(),
            patterns: Vec::new(),
        };

        // ISO and written-out dates
        level.add_pattern(EntityType::Date, r"\b\d{4}-\d{2}-\d{2}\b", 0.95);
        level.add_pattern(
            EntityType::Date,
            r"\b(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2}(?:,\s*\d{4})?\b",
            0.9,
        );
        // Runs of capitalized words, the weakest signal in the table
        level.add_pattern(
            EntityType::Person,
            r"\b[A-Z][a-z]+\s+[A-Z][a-z]+\b",
            0.6,
        );
        level
    }

    /// Register an additional pattern; invalid regexes are skipped with a warning
    pub fn add_pattern(&mut self, entity_type: EntityType, pattern: &str, confidence: f32) {
        match Regex::new(pattern) {
            Ok(regex) => self.patterns.push(NerPattern {
                entity_type,
                regex,
                confidence,
            }),
            Err(err) => {
                tracing::warn!(pattern, error = %err, "skipping invalid NER pattern");
            }
        }
    }

    /// Register an additional pattern (chainable)
    pub fn with_pattern(
        mut self,
        entity_type: EntityType,
        pattern: &str,
        confidence: f32,
    ) -> Self {
        self.add_pattern(entity_type, pattern, confidence);
        self
    }
}

#[async_trait]
impl InferenceLevel for RuleNerLevel {
    async fn infer(&self, input: &str) -> Result<InferenceResult, UpstreamError> {
        let mut entities = Vec::new();

        for pattern in &self.patterns {
            for found in pattern.regex.find_iter(input) {
                entities.push(Entity::new(
                    found.as_str(),
                    pattern.entity_type,
                    pattern.confidence,
                ));
            }
        }

        let entities = merge_entities(entities);

        if entities.is_empty() {
            // No pattern matched: force escalation
            return Ok(InferenceResult::empty(&self.name, LevelKind::Rule));
        }

        Ok(InferenceResult::new(
            InferenceValue::Entities(entities),
            RULE_NER_CONFIDENCE,
            &self.name,
            LevelKind::Rule,
        ))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Raw entity shape expected from the LLM
#[derive(Debug, Deserialize)]
struct LlmEntityPayload {
    text: String,
    #[serde(rename = "type", default)]
    entity_type: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

/// LLM-backed NER level
///
/// Sends a JSON-shaped extraction prompt and parses the response
/// defensively. A malformed response yields an empty low-confidence result,
/// never an error; when this level is terminal, that degraded result is what
/// the engine returns.
pub struct LlmNerLevel {
    name: String,
    llm: Arc<dyn LlmCaller>,
    temperature: f32,
    /// Inputs longer than this are truncated before prompting
    max_input_chars: usize,
}

impl LlmNerLevel {
    pub fn new(name: impl Into<String>, llm: Arc<dyn LlmCaller>, temperature: f32) -> Self {
        Self {
            name: name.into(),
            llm,
            temperature,
            max_input_chars: 2000,
        }
    }

    fn build_prompt(&self, text: &str) -> String {
        format!(
            r#"Extract the key entities from the text below.

Rules:
1. Identify persons, locations, organizations, topics, events, and dates.
2. Return a JSON array where each element has "text", "type", and "confidence" (0-1).
3. Valid types: PERSON, LOCATION, ORGANIZATION, TOPIC, EVENT, DATE.
4. Only extract meaningful entities; skip filler words.

Text:
{text}

Example response:
[
  {{"text": "Marie Curie", "type": "PERSON", "confidence": 0.95}},
  {{"text": "Paris", "type": "LOCATION", "confidence": 0.9}}
]

Return only the JSON array, no extra commentary."#
        )
    }

    fn parse_response(&self, response: &str) -> Option<Vec<Entity>> {
        let block = extract_json_block(response)?;
        let payload: Vec<LlmEntityPayload> = serde_json::from_str(block).ok()?;

        let entities = payload
            .into_iter()
            .filter(|item| item.text.trim().len() > 1)
            .map(|item| {
                let entity_type = item
                    .entity_type
                    .as_deref()
                    .map(EntityType::from_name)
                    .unwrap_or(EntityType::Topic);
                Entity::new(item.text.trim(), entity_type, item.confidence.unwrap_or(0.8))
            })
            .collect();

        Some(merge_entities(entities))
    }
}

#[async_trait]
impl InferenceLevel for LlmNerLevel {
    async fn infer(&self, input: &str) -> Result<InferenceResult, UpstreamError> {
        let truncated: String = if input.len() > self.max_input_chars {
            let mut end = self.max_input_chars;
            while !input.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &input[..end])
        } else {
            input.to_string()
        };

        let prompt = self.build_prompt(&truncated);
        let response = self
            .llm
            .generate(&[ChatMessage::user(prompt)], self.temperature)
            .await?;

        match self.parse_response(&response) {
            Some(entities) => {
                let confidence = if entities.is_empty() { 0.5 } else { 0.95 };
                Ok(InferenceResult::new(
                    InferenceValue::Entities(entities),
                    confidence,
                    &self.name,
                    LevelKind::Llm,
                ))
            }
            None => {
                // Malformed output is recovered locally, never raised
                tracing::warn!(level = %self.name, "unparseable NER response, returning empty");
                Ok(InferenceResult::new(
                    InferenceValue::Entities(Vec::new()),
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

/// Cascade-backed `NerExtractor`
///
/// Rule level first, optional LLM terminal fallback. This is the extractor
/// handed to `GraphRetrievalStage` and `IntentAdaptiveStage`.
pub struct CascadeNer {
    engine: CascadeInferenceEngine,
}

impl CascadeNer {
    /// Rule-only extractor; the rule level is terminal
    pub fn rule_only(config: &CascadeConfig) -> Self {
        let engine = CascadeInferenceEngine::from_config("ner", config).add_level(
            Box::new(RuleNerLevel::new("rule_ner")),
            config.default_threshold,
        );
        Self { engine }
    }

    /// Rule extractor with LLM escalation
    pub fn with_llm(config: &CascadeConfig, llm: Arc<dyn LlmCaller>) -> Self {
        let engine = CascadeInferenceEngine::from_config("ner", config)
            .add_level(
                Box::new(RuleNerLevel::new("rule_ner")),
                config.default_threshold,
            )
            .add_level(
                Box::new(LlmNerLevel::new("llm_ner", llm, config.llm_temperature)),
                config.default_threshold,
            );
        Self { engine }
    }

    /// Build from a custom engine (levels already configured)
    pub fn from_engine(engine: CascadeInferenceEngine) -> Self {
        Self { engine }
    }

    /// Invocation statistics of the underlying engine
    pub fn stats(&self) -> crate::inference::CascadeStats {
        self.engine.stats()
    }
}

#[async_trait]
impl NerExtractor for CascadeNer {
    async fn extract(&self, text: &str) -> Result<Vec<Entity>, UpstreamError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let result = self
            .engine
            .infer(text)
            .await
            .map_err(|e| UpstreamError::new("ner", e.to_string()))?;

        Ok(match result.value {
            InferenceValue::Entities(entities) => merge_entities(entities),
            _ => Vec::new(),
        })
    }
}
