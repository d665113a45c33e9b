//! Hybrid retrieval pipeline
//!
//! Composable stages over a shared per-execution context: vector and graph
//! recall, multi-source fusion, intent-adaptive reweighting, semantic
//! reranking, and MMR diversity filtering. Stages are pure transforms from
//! (query, prior results, context) to a new result list, so presets can
//! reorder and recombine them freely.

mod factory;
mod pipeline;
pub mod stages;

pub use factory::{PipelineFactory, Preset};
pub use pipeline::{PipelineError, RetrievalPipeline, Stage};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Which retrieval channel produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    /// Embedding similarity recall
    Vector,
    /// Entity-graph recall
    Graph,
    /// Produced by merging multiple channels
    Fusion,
}

impl ResultSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultSource::Vector => "vector",
            ResultSource::Graph => "graph",
            ResultSource::Fusion => "fusion",
        }
    }
}

/// A retrieved document with relevance score and provenance metadata
///
/// Result lists are owned per execution and never mutated in place: each
/// stage builds a new list from its input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Document identifier
    pub doc_id: String,

    /// Document content (may be empty when hydration happens downstream)
    pub content: String,

    /// Relevance score, kept within a [0, 1]-comparable range
    pub score: f32,

    /// Channel that produced this result
    pub source: ResultSource,

    /// Provenance tags: always `"stage"`, optionally `"hop_distance"`,
    /// `"matched_entities"`, and per-source fusion contributions
    #[serde(default)]
    pub metadata: AHashMap<String, serde_json::Value>,
}

impl RetrievalResult {
    pub fn new(
        doc_id: impl Into<String>,
        content: impl Into<String>,
        score: f32,
        source: ResultSource,
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            content: content.into(),
            score,
            source,
            metadata: AHashMap::new(),
        }
    }

    /// Tag the result with its producing stage (chainable)
    pub fn with_stage(mut self, stage: &str) -> Self {
        self.metadata
            .insert("stage".to_string(), serde_json::json!(stage));
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Name of the producing stage, if tagged
    pub fn stage(&self) -> Option<&str> {
        self.metadata.get("stage").and_then(|v| v.as_str())
    }

    /// Hop distance for graph-expanded results
    pub fn hop_distance(&self) -> Option<u64> {
        self.metadata.get("hop_distance").and_then(|v| v.as_u64())
    }
}

/// Extension key under which `IntentAdaptiveStage` records the detected intent
pub const INTENT_KEY: &str = "intent";

/// Per-execution context shared by all stages of one pipeline run
///
/// The fixed fields are read-only for stages; the extension map is the open
/// area for inter-stage signaling. It sits behind a mutex so logically
/// concurrent recall stages can share `&PipelineContext`; the lock is only
/// held for map access and never across an await point.
#[derive(Debug)]
pub struct PipelineContext {
    /// Query text for this execution
    pub query: String,

    /// Result count requested by the caller
    pub top_k: usize,

    /// Caller-supplied backend filters, passed through to recall stages
    pub filters: Option<serde_json::Value>,

    extensions: Mutex<AHashMap<String, serde_json::Value>>,
}

impl PipelineContext {
    pub fn new(query: impl Into<String>, top_k: usize, filters: Option<serde_json::Value>) -> Self {
        Self {
            query: query.into(),
            top_k,
            filters,
            extensions: Mutex::new(AHashMap::new()),
        }
    }

    /// Write an extension value
    pub fn set_extension(&self, key: &str, value: serde_json::Value) {
        self.extensions
            .lock()
            .unwrap()
            .insert(key.to_string(), value);
    }

    /// Read an extension value
    pub fn extension(&self, key: &str) -> Option<serde_json::Value> {
        self.extensions.lock().unwrap().get(key).cloned()
    }

    /// Intent recorded by `IntentAdaptiveStage`, if any
    pub fn intent(&self) -> Option<String> {
        self.extension(INTENT_KEY)
            .and_then(|v| v.as_str().map(|s| s.to_string()))
    }
}
