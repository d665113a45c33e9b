//! External collaborator traits
//!
//! The retrieval pipeline and cascade engine consume vector indexes, graph
//! stores, NER services, classifiers, and LLM providers exclusively through
//! these traits. Concrete backends live outside this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inference::ner::Entity;

/// Failure of an external collaborator call
#[derive(Error, Debug)]
#[error("{collaborator} call failed: {message}")]
pub struct UpstreamError {
    /// Name of the collaborator that failed (e.g. "vector_store")
    pub collaborator: &'static str,
    /// Backend-specific failure description
    pub message: String,
}

impl UpstreamError {
    pub fn new(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self {
            collaborator,
            message: message.into(),
        }
    }
}

/// A single document hit from the vector store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub doc_id: String,
    pub content: String,
    /// Similarity score, normalized to [0, 1]
    pub score: f32,
}

/// A document matched through shared entities in the graph store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphHit {
    pub doc_id: String,
    pub content: String,
    /// Relation strength, normalized to [0, 1]
    pub score: f32,
    /// Query entities that matched this document
    pub matched_entities: Vec<String>,
}

/// A document reached through multi-hop graph traversal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedDoc {
    pub doc_id: String,
    pub content: String,
    /// Hop distance from the seed document (1 = direct neighbor)
    pub distance: usize,
    /// Relation strength, normalized to [0, 1]
    pub score: f32,
}

/// A chat message for LLM generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// Output of a lightweight local classifier
#[derive(Debug, Clone)]
pub struct Classification {
    /// Predicted label
    pub label: String,
    /// Model probability for the predicted label (0-1)
    pub probability: f32,
}

/// Trait for embedding providers
///
/// Allows abstraction over different embedding backends; the pipeline only
/// needs query embeddings for vector recall.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, UpstreamError>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// Trait for approximate nearest-neighbor vector stores
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Search for the `top_k` documents closest to `query_embedding`
    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        filters: Option<&serde_json::Value>,
    ) -> Result<Vec<VectorHit>, UpstreamError>;
}

/// Trait for entity-relationship graph stores
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Find documents connected to any of the given entities
    async fn search_by_entities(
        &self,
        entities: &[String],
        top_k: usize,
    ) -> Result<Vec<GraphHit>, UpstreamError>;

    /// Find documents related to `doc_id` within `max_hops` hops
    async fn find_related(
        &self,
        doc_id: &str,
        max_hops: usize,
        limit: usize,
    ) -> Result<Vec<RelatedDoc>, UpstreamError>;
}

/// Trait for named-entity extraction services
#[async_trait]
pub trait NerExtractor: Send + Sync {
    /// Extract entities from text
    async fn extract(&self, text: &str) -> Result<Vec<Entity>, UpstreamError>;
}

/// Trait for LLM providers
#[async_trait]
pub trait LlmCaller: Send + Sync {
    /// Generate a completion for the given messages
    async fn generate(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, UpstreamError>;
}

/// Trait for lightweight local classifiers backing fast-model levels
#[async_trait]
pub trait FastClassifier: Send + Sync {
    /// Classify the input text
    async fn classify(&self, text: &str) -> Result<Classification, UpstreamError>;

    /// Get the model name
    fn model_name(&self) -> &str;
}
