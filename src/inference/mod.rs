//! Tiered cascade inference
//!
//! A generic escalation framework that tries cheap inference methods first
//! (keyword rules), then a local fast model, and only falls back to an LLM
//! when every cheaper level reports insufficient confidence. Used for named
//! entity extraction and emotion detection.

pub mod emotion;
mod engine;
mod levels;
pub mod ner;
mod parse;

pub use engine::{CascadeInferenceEngine, CascadeStats, InferenceLevel};
pub use levels::{FastModelLevel, KeywordRuleLevel};
pub use parse::extract_json_block;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inference::ner::Entity;

/// Errors surfaced by the cascade engine
///
/// Non-terminal level failures are absorbed as confidence-0 results and
/// never appear here; only unrecoverable conditions do.
#[derive(Error, Debug)]
pub enum InferenceError {
    /// The terminal level failed and no fallback remains
    #[error("Terminal level '{level}' failed: {message}")]
    TerminalLevel { level: String, message: String },

    /// The engine was invoked with no levels configured
    #[error("No inference levels configured")]
    NoLevels,
}

/// Which tier of the cascade produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelKind {
    /// Dictionary/automaton keyword matching
    Rule,
    /// Local lightweight classifier
    FastModel,
    /// Large language model
    Llm,
}

impl LevelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LevelKind::Rule => "rule",
            LevelKind::FastModel => "fast_model",
            LevelKind::Llm => "llm",
        }
    }
}

/// Payload produced by an inference level
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceValue {
    /// Extracted entities (NER tasks)
    Entities(Vec<Entity>),
    /// A single classification label
    Label(String),
    /// Arbitrary structured payload
    Structured(serde_json::Value),
}

impl InferenceValue {
    /// Entities carried by this value, if any
    pub fn entities(&self) -> Option<&[Entity]> {
        match self {
            InferenceValue::Entities(entities) => Some(entities),
            _ => None,
        }
    }

    /// Label carried by this value, if any
    pub fn label(&self) -> Option<&str> {
        match self {
            InferenceValue::Label(label) => Some(label),
            _ => None,
        }
    }
}

/// Result of one cascade inference call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResult {
    /// Inferred payload
    pub value: InferenceValue,

    /// Confidence in the payload (0.0 - 1.0)
    pub confidence: f32,

    /// Name of the level that produced this result
    pub level: String,

    /// Tier of the producing level
    pub kind: LevelKind,

    /// Cost/latency tags written by the engine
    #[serde(default)]
    pub metadata: AHashMap<String, serde_json::Value>,
}

impl InferenceResult {
    pub fn new(
        value: InferenceValue,
        confidence: f32,
        level: impl Into<String>,
        kind: LevelKind,
    ) -> Self {
        Self {
            value,
            confidence: confidence.clamp(0.0, 1.0),
            level: level.into(),
            kind,
            metadata: AHashMap::new(),
        }
    }

    /// An empty/neutral result used when a level cannot conclude anything
    pub fn empty(level: impl Into<String>, kind: LevelKind) -> Self {
        Self::new(InferenceValue::Entities(Vec::new()), 0.0, level, kind)
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}
