//! End-to-end retrieval pipeline tests with in-memory backends

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use memex::config::RetrievalConfig;
use memex::inference::ner::{Entity, EntityType};
use memex::retrieval::{PipelineError, PipelineFactory, Preset};
use memex::traits::{
    EmbeddingProvider, GraphHit, GraphStore, NerExtractor, RelatedDoc, UpstreamError, VectorHit,
    VectorStore,
};

struct FixedEmbedder;

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, UpstreamError> {
        Ok(vec![0.5; 8])
    }

    fn dimension(&self) -> usize {
        8
    }
}

struct CannedVectorStore {
    hits: Vec<VectorHit>,
}

#[async_trait]
impl VectorStore for CannedVectorStore {
    async fn search(
        &self,
        _query_embedding: &[f32],
        top_k: usize,
        _filters: Option<&serde_json::Value>,
    ) -> Result<Vec<VectorHit>, UpstreamError> {
        Ok(self.hits.iter().take(top_k).cloned().collect())
    }
}

struct CannedGraphStore {
    hits: Vec<GraphHit>,
    related: Vec<RelatedDoc>,
    fail: bool,
}

#[async_trait]
impl GraphStore for CannedGraphStore {
    async fn search_by_entities(
        &self,
        _entities: &[String],
        top_k: usize,
    ) -> Result<Vec<GraphHit>, UpstreamError> {
        if self.fail {
            return Err(UpstreamError::new("graph_store", "backend offline"));
        }
        Ok(self.hits.iter().take(top_k).cloned().collect())
    }

    async fn find_related(
        &self,
        _doc_id: &str,
        max_hops: usize,
        limit: usize,
    ) -> Result<Vec<RelatedDoc>, UpstreamError> {
        Ok(self
            .related
            .iter()
            .filter(|d| d.distance <= max_hops)
            .take(limit)
            .cloned()
            .collect())
    }
}

struct TokenNer;

#[async_trait]
impl NerExtractor for TokenNer {
    async fn extract(&self, text: &str) -> Result<Vec<Entity>, UpstreamError> {
        Ok(text
            .split_whitespace()
            .filter(|w| w.chars().next().is_some_and(|c| c.is_uppercase()))
            .map(|w| Entity::new(w, EntityType::Person, 0.9))
            .collect())
    }
}

fn vector_hit(doc_id: &str, content: &str, score: f32) -> VectorHit {
    VectorHit {
        doc_id: doc_id.to_string(),
        content: content.to_string(),
        score,
    }
}

fn graph_hit(doc_id: &str, content: &str, score: f32) -> GraphHit {
    GraphHit {
        doc_id: doc_id.to_string(),
        content: content.to_string(),
        score,
        matched_entities: vec!["Alice".to_string()],
    }
}

fn factory(
    vector_hits: Vec<VectorHit>,
    graph: CannedGraphStore,
    config: RetrievalConfig,
) -> PipelineFactory {
    PipelineFactory::new(config)
        .with_embedder(Arc::new(FixedEmbedder))
        .with_vector_store(Arc::new(CannedVectorStore { hits: vector_hits }))
        .with_graph_store(Arc::new(graph))
        .with_ner(Arc::new(TokenNer))
}

fn no_expansion_graph(hits: Vec<GraphHit>) -> CannedGraphStore {
    CannedGraphStore {
        hits,
        related: Vec::new(),
        fail: false,
    }
}

#[tokio::test]
async fn advanced_rrf_prefers_multi_source_documents() {
    let vector_hits = vec![
        vector_hit("solo-v", "standalone vector match", 0.99),
        vector_hit("shared", "notes mentioning Alice", 0.80),
    ];
    let graph = no_expansion_graph(vec![
        graph_hit("shared", "notes mentioning Alice", 0.85),
        graph_hit("solo-g", "other Alice document", 0.90),
    ]);

    let pipeline = factory(vector_hits, graph, RetrievalConfig::default())
        .build(Preset::Advanced)
        .unwrap();

    let results = pipeline
        .execute("what did Alice say", 5, None)
        .await
        .unwrap();

    assert_eq!(results[0].doc_id, "shared");
}

#[tokio::test]
async fn relational_intent_boosts_graph_under_weighted_sum() {
    // Identical base scores; only the intent multiplier separates them.
    let config = RetrievalConfig {
        fusion_policy: "weighted_sum".to_string(),
        vector_weight: 1.0,
        graph_weight: 1.0,
        ..RetrievalConfig::default()
    };
    let vector_hits = vec![vector_hit("from-vector", "a note", 0.8)];
    let graph = no_expansion_graph(vec![graph_hit("from-graph", "Alice note", 0.8)]);

    let pipeline = factory(vector_hits, graph, config)
        .build(Preset::Advanced)
        .unwrap();

    let results = pipeline.execute("who knows Alice", 5, None).await.unwrap();

    assert_eq!(results[0].doc_id, "from-graph");
    assert_eq!(results[1].doc_id, "from-vector");
    // Relational intent: graph x1.2 vs vector x0.8
    assert!(results[0].score > results[1].score);
}

#[tokio::test]
async fn multi_hop_documents_decay_with_distance() {
    let config = RetrievalConfig {
        fusion_policy: "weighted_sum".to_string(),
        enable_multi_hop: true,
        max_hops: 2,
        hop_decay: 0.7,
        ..RetrievalConfig::default()
    };
    let graph = CannedGraphStore {
        hits: vec![graph_hit("seed", "Alice project journal", 1.0)],
        related: vec![
            RelatedDoc {
                doc_id: "near".to_string(),
                content: "linked note".to_string(),
                distance: 1,
                score: 0.9,
            },
            RelatedDoc {
                doc_id: "far".to_string(),
                content: "twice removed note".to_string(),
                distance: 2,
                score: 0.9,
            },
        ],
        fail: false,
    };

    let pipeline = factory(Vec::new(), graph, config)
        .build(Preset::Advanced)
        .unwrap();

    let results = pipeline
        .execute("notes about Alice", 10, None)
        .await
        .unwrap();

    let near = results.iter().find(|r| r.doc_id == "near").unwrap();
    let far = results.iter().find(|r| r.doc_id == "far").unwrap();
    assert!(far.score < near.score);
    assert_eq!(near.hop_distance(), Some(1));
    assert_eq!(far.hop_distance(), Some(2));
}

#[tokio::test]
async fn graph_failure_degrades_to_vector_only() {
    let vector_hits = vec![vector_hit("v1", "still reachable", 0.9)];
    let graph = CannedGraphStore {
        hits: Vec::new(),
        related: Vec::new(),
        fail: true,
    };

    let pipeline = factory(vector_hits, graph, RetrievalConfig::default())
        .build(Preset::Advanced)
        .unwrap();

    let results = pipeline
        .execute("query about Alice", 5, None)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].doc_id, "v1");
}

#[tokio::test]
async fn semantic_preset_deduplicates_near_copies() {
    let vector_hits = vec![
        vector_hit("a", "weekly sync notes about the migration plan", 0.90),
        vector_hit("b", "weekly sync notes about the migration plan v2", 0.89),
        vector_hit("c", "recipe for sourdough bread", 0.85),
    ];
    let config = RetrievalConfig {
        mmr_lambda: 0.5,
        ..RetrievalConfig::default()
    };

    let pipeline = factory(vector_hits, no_expansion_graph(Vec::new()), config)
        .build(Preset::Semantic)
        .unwrap();

    let results = pipeline.execute("migration plan", 2, None).await.unwrap();

    let ids: Vec<&str> = results.iter().map(|r| r.doc_id.as_str()).collect();
    assert!(ids.contains(&"a"));
    assert!(ids.contains(&"c"));
}

#[tokio::test]
async fn output_respects_top_k_across_presets() {
    let vector_hits: Vec<VectorHit> = (0..30)
        .map(|i| vector_hit(&format!("v{}", i), "filler content", 0.9))
        .collect();

    for preset in [Preset::Basic, Preset::Advanced, Preset::Semantic] {
        let pipeline = factory(
            vector_hits.clone(),
            no_expansion_graph(Vec::new()),
            RetrievalConfig::default(),
        )
        .build(preset)
        .unwrap();

        for top_k in [0usize, 1, 3, 100] {
            let results = pipeline.execute("some query", top_k, None).await.unwrap();
            assert!(
                results.len() <= top_k,
                "preset {:?} top_k {} returned {}",
                preset,
                top_k,
                results.len()
            );
        }
    }
}

#[tokio::test]
async fn deadline_expiry_reports_cancellation() {
    struct StallingVectorStore;

    #[async_trait]
    impl VectorStore for StallingVectorStore {
        async fn search(
            &self,
            _query_embedding: &[f32],
            _top_k: usize,
            _filters: Option<&serde_json::Value>,
        ) -> Result<Vec<VectorHit>, UpstreamError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    let pipeline = PipelineFactory::new(RetrievalConfig::default())
        .with_embedder(Arc::new(FixedEmbedder))
        .with_vector_store(Arc::new(StallingVectorStore))
        .build(Preset::Basic)
        .unwrap();

    let result = pipeline
        .execute_with_deadline("query", 5, None, Duration::from_millis(20))
        .await;

    assert!(matches!(result, Err(PipelineError::Cancelled { .. })));
}

#[tokio::test]
async fn empty_query_is_rejected_before_any_backend_call() {
    let pipeline = factory(
        Vec::new(),
        no_expansion_graph(Vec::new()),
        RetrievalConfig::default(),
    )
    .build(Preset::Advanced)
    .unwrap();

    let result = pipeline.execute("  ", 5, None).await;
    assert!(matches!(result, Err(PipelineError::InvalidQuery(_))));
}

#[test]
fn missing_graph_backend_fails_at_build_time() {
    let factory = PipelineFactory::new(RetrievalConfig::default())
        .with_embedder(Arc::new(FixedEmbedder))
        .with_vector_store(Arc::new(CannedVectorStore { hits: Vec::new() }));

    assert!(factory.build(Preset::Basic).is_ok());
    assert!(matches!(
        factory.build(Preset::Advanced),
        Err(PipelineError::Configuration(_))
    ));
}
