//! Intent-adaptive source reweighting
//!
//! Classifies the query into a coarse intent and scales per-source scores
//! before fusion. Relational queries lean on the entity graph, factual
//! lookups lean on embedding similarity, temporal queries keep both even.

use async_trait::async_trait;
use std::sync::Arc;

use crate::retrieval::stages::{sort_by_score, tokenize};
use crate::retrieval::{
    PipelineContext, PipelineError, RetrievalResult, ResultSource, Stage, INTENT_KEY,
};
use crate::traits::NerExtractor;

const INTENT_STAGE: &str = "intent_adaptive";

/// Entity count at which a keyword-less query is treated as relational
const RELATIONAL_ENTITY_DENSITY: usize = 3;

/// Coarse query intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    /// Direct lookup of a fact or description
    Factual,
    /// Anchored to a time or period
    Temporal,
    /// About connections between people, places, or topics
    Relational,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::Factual => "factual",
            QueryIntent::Temporal => "temporal",
            QueryIntent::Relational => "relational",
        }
    }

    /// Per-source multipliers: (vector, graph)
    pub fn weights(&self) -> (f32, f32) {
        match self {
            QueryIntent::Factual => (1.2, 0.8),
            QueryIntent::Temporal => (1.0, 1.0),
            QueryIntent::Relational => (0.8, 1.2),
        }
    }

    /// Keyword classification with first-match-wins precedence:
    /// factual, then temporal, then relational. `None` when no marker
    /// matches; the caller decides the fallback.
    pub fn from_keywords(query: &str) -> Option<Self> {
        const FACTUAL: &[&str] = &[
            "what is",
            "what are",
            "what was",
            "define",
            "definition",
            "meaning of",
            "explain",
            "describe",
            "tell me about",
        ];
        const TEMPORAL: &[&str] = &[
            "when",
            "yesterday",
            "today",
            "tomorrow",
            "week",
            "month",
            "year",
            "ago",
            "recently",
            "latest",
            "last",
            "before",
            "after",
            "during",
            "date",
        ];
        const RELATIONAL: &[&str] = &[
            "who",
            "whom",
            "whose",
            "related",
            "relationship",
            "connection",
            "connected",
            "between",
            "friend",
            "friends",
            "know",
            "knows",
            "met",
            "together",
        ];

        // Factual markers are phrases, matched on the lowered text
        let lowered = query.to_lowercase();
        if FACTUAL.iter().any(|p| lowered.contains(p)) {
            return Some(QueryIntent::Factual);
        }

        let tokens = tokenize(query);
        if TEMPORAL.iter().any(|w| tokens.contains(*w)) {
            return Some(QueryIntent::Temporal);
        }
        if RELATIONAL.iter().any(|w| tokens.contains(*w)) {
            return Some(QueryIntent::Relational);
        }

        None
    }
}

/// Reweights recall output according to the detected query intent
///
/// Placed between recall and fusion so weighted-sum fusion sees the adjusted
/// scores. Never adds or removes results; only vector and graph scores are
/// scaled, then the list is re-sorted.
///
/// When no keyword rule matches, a registered NER extractor decides the
/// fallback: an entity-dense query reads as relational, anything else as
/// factual.
pub struct IntentAdaptiveStage {
    ner: Option<Arc<dyn NerExtractor>>,
}

impl IntentAdaptiveStage {
    pub fn new() -> Self {
        Self { ner: None }
    }

    /// Register the NER extractor used for the entity-density fallback
    pub fn with_ner(mut self, ner: Arc<dyn NerExtractor>) -> Self {
        self.ner = Some(ner);
        self
    }

    async fn classify(&self, query: &str) -> QueryIntent {
        if let Some(intent) = QueryIntent::from_keywords(query) {
            return intent;
        }

        if let Some(ner) = &self.ner {
            match ner.extract(query).await {
                Ok(entities) if entities.len() >= RELATIONAL_ENTITY_DENSITY => {
                    return QueryIntent::Relational;
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "NER fallback failed, defaulting to factual");
                }
            }
        }

        QueryIntent::Factual
    }
}

impl Default for IntentAdaptiveStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for IntentAdaptiveStage {
    async fn process(
        &self,
        query: &str,
        prior: Option<Vec<RetrievalResult>>,
        ctx: &PipelineContext,
    ) -> Result<Vec<RetrievalResult>, PipelineError> {
        let intent = self.classify(query).await;
        ctx.set_extension(INTENT_KEY, serde_json::json!(intent.as_str()));
        tracing::debug!(intent = intent.as_str(), "query intent classified");

        let (vector_weight, graph_weight) = intent.weights();

        let mut results: Vec<RetrievalResult> = prior
            .unwrap_or_default()
            .into_iter()
            .map(|mut result| {
                match result.source {
                    ResultSource::Vector => result.score *= vector_weight,
                    ResultSource::Graph => result.score *= graph_weight,
                    ResultSource::Fusion => {}
                }
                result.with_metadata("intent", serde_json::json!(intent.as_str()))
            })
            .collect();

        sort_by_score(&mut results);
        Ok(results)
    }

    fn name(&self) -> &'static str {
        INTENT_STAGE
    }
}
