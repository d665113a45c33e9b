//! Recall stages: vector and graph retrieval
//!
//! Both over-fetch `search_multiplier * top_k` candidates to leave headroom
//! for fusion and reranking, tag every result with the producing stage, and
//! scale scores by a per-source weight so relative source importance is
//! tunable independently of fusion logic.

use ahash::AHashMap;
use async_trait::async_trait;
use std::sync::Arc;

use crate::retrieval::stages::{sort_by_score, tokenize};
use crate::retrieval::{PipelineContext, PipelineError, RetrievalResult, ResultSource, Stage};
use crate::traits::{EmbeddingProvider, GraphStore, NerExtractor, UpstreamError, VectorStore};

const VECTOR_STAGE: &str = "vector_retrieval";
const GRAPH_STAGE: &str = "graph_retrieval";

fn upstream(stage: &str, err: UpstreamError) -> PipelineError {
    PipelineError::Upstream {
        stage: stage.to_string(),
        collaborator: err.collaborator.to_string(),
        message: err.message,
    }
}

/// Embedding-similarity recall
pub struct VectorRetrievalStage {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    weight: f32,
    search_multiplier: usize,
    optional: bool,
}

impl VectorRetrievalStage {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            weight: 1.0,
            search_multiplier: 2,
            optional: false,
        }
    }

    /// Multiplicative score weight for this source
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_search_multiplier(mut self, multiplier: usize) -> Self {
        self.search_multiplier = multiplier.max(1);
        self
    }

    /// Mark this source optional: upstream failures degrade to zero results
    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    async fn recall(
        &self,
        query: &str,
        ctx: &PipelineContext,
    ) -> Result<Vec<RetrievalResult>, PipelineError> {
        let embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| upstream(VECTOR_STAGE, e))?;

        let fetch = ctx.top_k.saturating_mul(self.search_multiplier).max(1);
        let hits = self
            .store
            .search(&embedding, fetch, ctx.filters.as_ref())
            .await
            .map_err(|e| upstream(VECTOR_STAGE, e))?;

        let mut results: Vec<RetrievalResult> = hits
            .into_iter()
            .map(|hit| {
                RetrievalResult::new(
                    hit.doc_id,
                    hit.content,
                    hit.score * self.weight,
                    ResultSource::Vector,
                )
                .with_stage(VECTOR_STAGE)
            })
            .collect();

        sort_by_score(&mut results);
        Ok(results)
    }
}

#[async_trait]
impl Stage for VectorRetrievalStage {
    async fn process(
        &self,
        query: &str,
        prior: Option<Vec<RetrievalResult>>,
        ctx: &PipelineContext,
    ) -> Result<Vec<RetrievalResult>, PipelineError> {
        let mut results = match self.recall(query, ctx).await {
            Ok(results) => results,
            Err(err) if self.optional => {
                tracing::warn!(stage = VECTOR_STAGE, error = %err, "optional source degraded");
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        // Recall stages append to upstream output rather than replacing it,
        // so several sources can feed one fusion stage.
        let mut combined = prior.unwrap_or_default();
        combined.append(&mut results);
        Ok(combined)
    }

    fn name(&self) -> &'static str {
        VECTOR_STAGE
    }
}

/// Entity-graph recall with optional bounded multi-hop expansion
///
/// Extracts entities from the query, looks up directly connected documents,
/// then expands from the strongest seeds. Documents reached only through an
/// intermediate hop get a geometric `hop_decay^distance` score multiplier so
/// they never outrank a directly matched document with equal base score.
pub struct GraphRetrievalStage {
    store: Arc<dyn GraphStore>,
    ner: Arc<dyn NerExtractor>,
    weight: f32,
    search_multiplier: usize,
    enable_multi_hop: bool,
    max_hops: usize,
    hop_decay: f32,
    expand_seed_limit: usize,
    expand_limit: usize,
    optional: bool,
}

impl GraphRetrievalStage {
    pub fn new(store: Arc<dyn GraphStore>, ner: Arc<dyn NerExtractor>) -> Self {
        Self {
            store,
            ner,
            weight: 1.0,
            search_multiplier: 2,
            enable_multi_hop: false,
            max_hops: 2,
            hop_decay: 0.7,
            expand_seed_limit: 5,
            expand_limit: 10,
            optional: false,
        }
    }

    /// Multiplicative score weight for this source
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_search_multiplier(mut self, multiplier: usize) -> Self {
        self.search_multiplier = multiplier.max(1);
        self
    }

    /// Enable multi-hop expansion with the given hop cap and decay factor
    pub fn with_multi_hop(mut self, max_hops: usize, hop_decay: f32) -> Self {
        self.enable_multi_hop = true;
        self.max_hops = max_hops;
        self.hop_decay = hop_decay.clamp(0.0, 1.0);
        self
    }

    /// Fan-out caps: seeds expanded per query and neighbors per seed
    pub fn with_expansion_limits(mut self, seed_limit: usize, per_seed_limit: usize) -> Self {
        self.expand_seed_limit = seed_limit;
        self.expand_limit = per_seed_limit;
        self
    }

    /// Mark this source optional: upstream failures degrade to zero results
    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// Query entities via NER, degrading to naive tokens when NER fails
    async fn query_entities(&self, query: &str) -> Vec<String> {
        match self.ner.extract(query).await {
            Ok(entities) => entities.into_iter().map(|e| e.text).collect(),
            Err(err) => {
                tracing::warn!(error = %err, "NER failed, using naive token extraction");
                let mut tokens: Vec<String> = tokenize(query)
                    .into_iter()
                    .filter(|t| t.len() > 2)
                    .collect();
                tokens.sort();
                tokens
            }
        }
    }

    async fn recall(
        &self,
        query: &str,
        ctx: &PipelineContext,
    ) -> Result<Vec<RetrievalResult>, PipelineError> {
        let entities = self.query_entities(query).await;
        if entities.is_empty() {
            tracing::debug!("no entities in query, graph recall yields nothing");
            return Ok(Vec::new());
        }

        let fetch = ctx.top_k.saturating_mul(self.search_multiplier).max(1);
        let hits = self
            .store
            .search_by_entities(&entities, fetch)
            .await
            .map_err(|e| upstream(GRAPH_STAGE, e))?;

        let mut by_doc: AHashMap<String, RetrievalResult> = AHashMap::new();
        for hit in hits {
            let result = RetrievalResult::new(
                hit.doc_id.clone(),
                hit.content,
                hit.score * self.weight,
                ResultSource::Graph,
            )
            .with_stage(GRAPH_STAGE)
            .with_metadata(
                "matched_entities",
                serde_json::json!(hit.matched_entities),
            );

            // Keep the strongest entry per document
            let keep = by_doc
                .get(&hit.doc_id)
                .map_or(true, |existing| existing.score < result.score);
            if keep {
                by_doc.insert(hit.doc_id, result);
            }
        }

        if self.enable_multi_hop {
            self.expand_multi_hop(&mut by_doc).await;
        }

        let mut results: Vec<RetrievalResult> = by_doc.into_values().collect();
        sort_by_score(&mut results);
        results.truncate(fetch);
        Ok(results)
    }

    /// Expand from the strongest seeds, adding decayed indirect documents.
    ///
    /// Expansion failures for a single seed are logged and skipped; partial
    /// expansion still produces a valid (merely smaller) candidate set.
    async fn expand_multi_hop(&self, by_doc: &mut AHashMap<String, RetrievalResult>) {
        let mut seeds: Vec<(String, f32)> = by_doc
            .values()
            .map(|r| (r.doc_id.clone(), r.score))
            .collect();
        seeds.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        seeds.truncate(self.expand_seed_limit);

        for (seed_id, seed_score) in seeds {
            let related = match self
                .store
                .find_related(&seed_id, self.max_hops, self.expand_limit)
                .await
            {
                Ok(related) => related,
                Err(err) => {
                    tracing::warn!(seed = %seed_id, error = %err, "multi-hop expansion failed");
                    continue;
                }
            };

            for doc in related {
                if by_doc.contains_key(&doc.doc_id) || doc.distance > self.max_hops {
                    continue;
                }

                let decay = self.hop_decay.powi(doc.distance as i32);
                let result = RetrievalResult::new(
                    doc.doc_id.clone(),
                    doc.content,
                    seed_score * decay,
                    ResultSource::Graph,
                )
                .with_stage(GRAPH_STAGE)
                .with_metadata("hop_distance", serde_json::json!(doc.distance))
                .with_metadata("seed_doc_id", serde_json::json!(seed_id));

                by_doc.insert(doc.doc_id, result);
            }
        }
    }
}

#[async_trait]
impl Stage for GraphRetrievalStage {
    async fn process(
        &self,
        query: &str,
        prior: Option<Vec<RetrievalResult>>,
        ctx: &PipelineContext,
    ) -> Result<Vec<RetrievalResult>, PipelineError> {
        let mut results = match self.recall(query, ctx).await {
            Ok(results) => results,
            Err(err) if self.optional => {
                tracing::warn!(stage = GRAPH_STAGE, error = %err, "optional source degraded");
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        let mut combined = prior.unwrap_or_default();
        combined.append(&mut results);
        Ok(combined)
    }

    fn name(&self) -> &'static str {
        GRAPH_STAGE
    }
}

/// Runs two recall stages concurrently and concatenates their outputs
///
/// Vector and graph recall are independent network round-trips; issuing
/// them together keeps the sequential stage-chain contract while avoiding
/// serialized latency.
pub struct ConcurrentRecallStage {
    left: Arc<dyn Stage>,
    right: Arc<dyn Stage>,
}

impl ConcurrentRecallStage {
    pub fn new(left: Arc<dyn Stage>, right: Arc<dyn Stage>) -> Self {
        Self { left, right }
    }
}

#[async_trait]
impl Stage for ConcurrentRecallStage {
    async fn process(
        &self,
        query: &str,
        prior: Option<Vec<RetrievalResult>>,
        ctx: &PipelineContext,
    ) -> Result<Vec<RetrievalResult>, PipelineError> {
        let (left, right) = tokio::join!(
            self.left.process(query, None, ctx),
            self.right.process(query, None, ctx)
        );

        let mut combined = prior.unwrap_or_default();
        combined.extend(left?);
        combined.extend(right?);
        Ok(combined)
    }

    fn name(&self) -> &'static str {
        "concurrent_recall"
    }
}
