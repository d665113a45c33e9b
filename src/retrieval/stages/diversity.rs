//! MMR diversity filtering
//!
//! Greedy maximal marginal relevance selection over the candidate list.
//! Each step picks the candidate maximizing
//! `lambda * relevance - (1 - lambda) * max_similarity_to_selected`,
//! where similarity is token Jaccard overlap. At `lambda = 1.0` the
//! selection degenerates to plain score order.

use ahash::AHashSet;
use async_trait::async_trait;

use crate::retrieval::stages::{sort_by_score, tokenize};
use crate::retrieval::{PipelineContext, PipelineError, RetrievalResult, Stage};

const DIVERSITY_STAGE: &str = "diversity_filter";

pub struct DiversityFilterStage {
    lambda: f32,
}

impl DiversityFilterStage {
    /// `lambda` trades relevance (1.0) against diversity (0.0)
    pub fn new(lambda: f32) -> Self {
        Self {
            lambda: lambda.clamp(0.0, 1.0),
        }
    }

    fn jaccard(a: &AHashSet<String>, b: &AHashSet<String>) -> f32 {
        if a.is_empty() && b.is_empty() {
            return 0.0;
        }
        let shared = a.intersection(b).count();
        let union = a.len() + b.len() - shared;
        shared as f32 / union as f32
    }
}

#[async_trait]
impl Stage for DiversityFilterStage {
    async fn process(
        &self,
        _query: &str,
        prior: Option<Vec<RetrievalResult>>,
        ctx: &PipelineContext,
    ) -> Result<Vec<RetrievalResult>, PipelineError> {
        let mut candidates = prior.unwrap_or_default();
        if candidates.len() <= 1 {
            return Ok(candidates);
        }

        sort_by_score(&mut candidates);

        let tokens: Vec<AHashSet<String>> =
            candidates.iter().map(|c| tokenize(&c.content)).collect();

        let target = ctx.top_k.min(candidates.len());
        let mut selected: Vec<RetrievalResult> = Vec::with_capacity(target);
        let mut selected_tokens: Vec<AHashSet<String>> = Vec::with_capacity(target);
        let mut remaining: Vec<(RetrievalResult, AHashSet<String>)> =
            candidates.into_iter().zip(tokens).collect();

        while selected.len() < target && !remaining.is_empty() {
            let mut best_index = 0;
            let mut best_value = f32::NEG_INFINITY;

            for (i, (candidate, candidate_tokens)) in remaining.iter().enumerate() {
                let max_similarity = selected_tokens
                    .iter()
                    .map(|s| Self::jaccard(candidate_tokens, s))
                    .fold(0.0_f32, f32::max);

                let value =
                    self.lambda * candidate.score - (1.0 - self.lambda) * max_similarity;

                // Strict comparison keeps the first (highest-scored) candidate
                // on ties, so the selection is deterministic.
                if value > best_value {
                    best_value = value;
                    best_index = i;
                }
            }

            let (candidate, candidate_tokens) = remaining.remove(best_index);
            selected.push(
                candidate.with_metadata("mmr_value", serde_json::json!(best_value)),
            );
            selected_tokens.push(candidate_tokens);
        }

        Ok(selected)
    }

    fn name(&self) -> &'static str {
        DIVERSITY_STAGE
    }
}
