//! Preset pipeline assembly
//!
//! The factory owns the external collaborators and wires them into stage
//! chains. Missing collaborators are reported at build time as
//! [`PipelineError::Configuration`] instead of surfacing mid-query.

use std::str::FromStr;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::retrieval::stages::{
    ConcurrentRecallStage, DiversityFilterStage, FusionPolicy, FusionStage, GraphRetrievalStage,
    IntentAdaptiveStage, RerankMode, SemanticRerankStage, VectorRetrievalStage,
};
use crate::retrieval::{PipelineError, RetrievalPipeline};
use crate::traits::{EmbeddingProvider, GraphStore, LlmCaller, NerExtractor, VectorStore};

/// Named pipeline configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// Vector recall only
    Basic,
    /// Hybrid recall with intent reweighting and fusion
    Advanced,
    /// Advanced plus semantic rerank and MMR diversity
    Semantic,
}

impl Preset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Basic => "basic",
            Preset::Advanced => "advanced",
            Preset::Semantic => "semantic",
        }
    }
}

impl FromStr for Preset {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "basic" => Ok(Preset::Basic),
            "advanced" => Ok(Preset::Advanced),
            "semantic" => Ok(Preset::Semantic),
            other => Err(PipelineError::Configuration(format!(
                "unknown pipeline preset '{other}'"
            ))),
        }
    }
}

/// Builds retrieval pipelines from registered collaborators
///
/// All setters are chainable; `build` validates that the chosen preset's
/// required collaborators are present.
pub struct PipelineFactory {
    config: RetrievalConfig,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    graph_store: Option<Arc<dyn GraphStore>>,
    ner: Option<Arc<dyn NerExtractor>>,
    llm: Option<Arc<dyn LlmCaller>>,
}

impl PipelineFactory {
    pub fn new(config: RetrievalConfig) -> Self {
        Self {
            config,
            embedder: None,
            vector_store: None,
            graph_store: None,
            ner: None,
            llm: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    pub fn with_graph_store(mut self, store: Arc<dyn GraphStore>) -> Self {
        self.graph_store = Some(store);
        self
    }

    pub fn with_ner(mut self, ner: Arc<dyn NerExtractor>) -> Self {
        self.ner = Some(ner);
        self
    }

    /// LLM used for semantic reranking; without it the semantic preset
    /// falls back to rule-based reranking.
    pub fn with_llm(mut self, llm: Arc<dyn LlmCaller>) -> Self {
        self.llm = Some(llm);
        self
    }

    fn require<T: Clone>(
        slot: &Option<T>,
        name: &str,
        preset: Preset,
    ) -> Result<T, PipelineError> {
        slot.clone().ok_or_else(|| {
            PipelineError::Configuration(format!(
                "preset '{}' requires a {name}",
                preset.as_str()
            ))
        })
    }

    fn fusion_policy(&self) -> Result<FusionPolicy, PipelineError> {
        match self.config.fusion_policy.to_lowercase().as_str() {
            "rrf" => Ok(FusionPolicy::ReciprocalRank {
                k: self.config.rrf_k,
            }),
            "weighted_sum" => Ok(FusionPolicy::WeightedSum),
            other => Err(PipelineError::Configuration(format!(
                "unknown fusion policy '{other}'"
            ))),
        }
    }

    fn vector_stage(&self, preset: Preset) -> Result<VectorRetrievalStage, PipelineError> {
        let embedder = Self::require(&self.embedder, "embedding provider", preset)?;
        let store = Self::require(&self.vector_store, "vector store", preset)?;

        Ok(VectorRetrievalStage::new(embedder, store)
            .with_weight(self.config.vector_weight)
            .with_search_multiplier(self.config.search_multiplier))
    }

    fn graph_stage(&self, preset: Preset) -> Result<GraphRetrievalStage, PipelineError> {
        let store = Self::require(&self.graph_store, "graph store", preset)?;
        let ner = Self::require(&self.ner, "NER extractor", preset)?;

        let mut stage = GraphRetrievalStage::new(store, ner)
            .with_weight(self.config.graph_weight)
            .with_search_multiplier(self.config.search_multiplier)
            .with_expansion_limits(self.config.expand_seed_limit, self.config.expand_limit)
            .optional(true);

        if self.config.enable_multi_hop {
            stage = stage.with_multi_hop(self.config.max_hops, self.config.hop_decay);
        }

        Ok(stage)
    }

    /// Build the pipeline for a preset
    pub fn build(&self, preset: Preset) -> Result<RetrievalPipeline, PipelineError> {
        match preset {
            Preset::Basic => {
                let vector = self.vector_stage(preset)?;
                Ok(RetrievalPipeline::new(preset.as_str()).add_stage(Arc::new(vector)))
            }
            Preset::Advanced => {
                let recall = ConcurrentRecallStage::new(
                    Arc::new(self.vector_stage(preset)?),
                    Arc::new(self.graph_stage(preset)?),
                );
                let intent = IntentAdaptiveStage::new()
                    .with_ner(Self::require(&self.ner, "NER extractor", preset)?);
                let fusion = FusionStage::new(self.fusion_policy()?);

                Ok(RetrievalPipeline::new(preset.as_str())
                    .add_stage(Arc::new(recall))
                    .add_stage(Arc::new(intent))
                    .add_stage(Arc::new(fusion)))
            }
            Preset::Semantic => {
                let recall = ConcurrentRecallStage::new(
                    Arc::new(self.vector_stage(preset)?),
                    Arc::new(self.graph_stage(preset)?),
                );
                let intent = IntentAdaptiveStage::new()
                    .with_ner(Self::require(&self.ner, "NER extractor", preset)?);
                let fusion = FusionStage::new(self.fusion_policy()?);

                let mode = match &self.llm {
                    Some(llm) => RerankMode::Llm {
                        llm: llm.clone(),
                        temperature: 0.0,
                    },
                    None => RerankMode::Rule,
                };
                let rerank = SemanticRerankStage::new(mode)
                    .with_boost(self.config.rerank_boost)
                    .with_candidate_limit(self.config.rerank_candidate_limit);

                Ok(RetrievalPipeline::new(preset.as_str())
                    .add_stage(Arc::new(recall))
                    .add_stage(Arc::new(intent))
                    .add_stage(Arc::new(fusion))
                    .add_stage(Arc::new(rerank))
                    .add_stage(Arc::new(DiversityFilterStage::new(
                        self.config.mmr_lambda,
                    ))))
            }
        }
    }

    /// Build a preset chosen by name
    pub fn build_named(&self, name: &str) -> Result<RetrievalPipeline, PipelineError> {
        self.build(name.parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::ner::{Entity, EntityType};
    use crate::traits::{GraphHit, UpstreamError, VectorHit};
    use async_trait::async_trait;

    struct StubEmbedder;

    #[async_trait]
    impl EmbeddingProvider for StubEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, UpstreamError> {
            Ok(vec![0.0; 4])
        }

        fn dimension(&self) -> usize {
            4
        }
    }

    struct StubVectorStore;

    #[async_trait]
    impl VectorStore for StubVectorStore {
        async fn search(
            &self,
            _query_embedding: &[f32],
            _top_k: usize,
            _filters: Option<&serde_json::Value>,
        ) -> Result<Vec<VectorHit>, UpstreamError> {
            Ok(Vec::new())
        }
    }

    struct StubGraphStore;

    #[async_trait]
    impl GraphStore for StubGraphStore {
        async fn search_by_entities(
            &self,
            _entities: &[String],
            _top_k: usize,
        ) -> Result<Vec<GraphHit>, UpstreamError> {
            Ok(Vec::new())
        }

        async fn find_related(
            &self,
            _doc_id: &str,
            _max_hops: usize,
            _limit: usize,
        ) -> Result<Vec<crate::traits::RelatedDoc>, UpstreamError> {
            Ok(Vec::new())
        }
    }

    struct StubNer;

    #[async_trait]
    impl NerExtractor for StubNer {
        async fn extract(&self, _text: &str) -> Result<Vec<Entity>, UpstreamError> {
            Ok(vec![Entity::new("thing", EntityType::Topic, 0.9)])
        }
    }

    fn full_factory() -> PipelineFactory {
        PipelineFactory::new(RetrievalConfig::default())
            .with_embedder(Arc::new(StubEmbedder))
            .with_vector_store(Arc::new(StubVectorStore))
            .with_graph_store(Arc::new(StubGraphStore))
            .with_ner(Arc::new(StubNer))
    }

    #[test]
    fn test_preset_parsing() {
        assert_eq!("basic".parse::<Preset>().unwrap(), Preset::Basic);
        assert_eq!("Advanced".parse::<Preset>().unwrap(), Preset::Advanced);
        assert_eq!("SEMANTIC".parse::<Preset>().unwrap(), Preset::Semantic);
        assert!("fancy".parse::<Preset>().is_err());
    }

    #[test]
    fn test_basic_preset_builds() {
        let pipeline = full_factory().build(Preset::Basic).unwrap();
        assert_eq!(pipeline.stage_count(), 1);
    }

    #[test]
    fn test_advanced_preset_builds() {
        let pipeline = full_factory().build(Preset::Advanced).unwrap();
        assert_eq!(pipeline.stage_count(), 3);
    }

    #[test]
    fn test_semantic_preset_builds() {
        let pipeline = full_factory().build(Preset::Semantic).unwrap();
        assert_eq!(pipeline.stage_count(), 5);
    }

    #[test]
    fn test_missing_collaborator_is_configuration_error() {
        let factory = PipelineFactory::new(RetrievalConfig::default())
            .with_embedder(Arc::new(StubEmbedder))
            .with_vector_store(Arc::new(StubVectorStore));

        let err = factory.build(Preset::Advanced).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_unknown_fusion_policy_rejected() {
        let config = RetrievalConfig {
            fusion_policy: "median".to_string(),
            ..RetrievalConfig::default()
        };
        let factory = full_factory();
        let factory = PipelineFactory { config, ..factory };

        let err = factory.build(Preset::Advanced).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }
}
