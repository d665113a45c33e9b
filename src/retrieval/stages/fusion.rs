//! Multi-source result fusion
//!
//! Takes the concatenated recall output, groups it by source channel, and
//! merges the per-channel rankings into one list. Two policies: weighted
//! score summation and reciprocal rank fusion. RRF ignores raw score
//! magnitudes entirely, which makes it robust when channels score on
//! incomparable scales.

use ahash::AHashMap;
use async_trait::async_trait;
use std::collections::hash_map::Entry;

use crate::retrieval::stages::sort_by_score;
use crate::retrieval::{PipelineContext, PipelineError, RetrievalResult, ResultSource, Stage};

const FUSION_STAGE: &str = "fusion";

/// How per-channel rankings are merged
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusionPolicy {
    /// Sum the (already source-weighted) scores of each document
    WeightedSum,
    /// Reciprocal rank fusion: each channel contributes `1 / (k + rank + 1)`
    ReciprocalRank { k: f32 },
}

impl FusionPolicy {
    pub fn rrf() -> Self {
        FusionPolicy::ReciprocalRank { k: 60.0 }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FusionPolicy::WeightedSum => "weighted_sum",
            FusionPolicy::ReciprocalRank { .. } => "rrf",
        }
    }
}

/// Merges multi-channel recall output into a single ranking
pub struct FusionStage {
    policy: FusionPolicy,
}

impl FusionStage {
    pub fn new(policy: FusionPolicy) -> Self {
        Self { policy }
    }

    /// Split the concatenated recall output back into per-channel rankings,
    /// preserving each channel's internal order.
    fn partition(results: Vec<RetrievalResult>) -> Vec<(ResultSource, Vec<RetrievalResult>)> {
        let mut channels: Vec<(ResultSource, Vec<RetrievalResult>)> = Vec::new();
        for result in results {
            match channels.iter_mut().find(|(source, _)| *source == result.source) {
                Some((_, list)) => list.push(result),
                None => channels.push((result.source, vec![result])),
            }
        }
        channels
    }

    fn fuse(&self, channels: Vec<(ResultSource, Vec<RetrievalResult>)>) -> Vec<RetrievalResult> {
        // doc_id -> (fused result, per-source contributions)
        let mut fused: AHashMap<String, (RetrievalResult, AHashMap<String, f32>)> =
            AHashMap::new();

        for (source, mut ranking) in channels {
            // Channel output may arrive unsorted when upstream stages
            // concatenate; ranks must reflect per-channel score order.
            sort_by_score(&mut ranking);

            for (rank, result) in ranking.into_iter().enumerate() {
                let contribution = match self.policy {
                    FusionPolicy::WeightedSum => result.score,
                    FusionPolicy::ReciprocalRank { k } => 1.0 / (k + rank as f32 + 1.0),
                };

                match fused.entry(result.doc_id.clone()) {
                    Entry::Occupied(mut occupied) => {
                        let (existing, contributions) = occupied.get_mut();
                        existing.score += contribution;
                        // Keep content from whichever channel carried it
                        if existing.content.is_empty() && !result.content.is_empty() {
                            existing.content = result.content;
                        }
                        contributions.insert(source.as_str().to_string(), contribution);
                    }
                    Entry::Vacant(vacant) => {
                        let mut contributions = AHashMap::new();
                        contributions.insert(source.as_str().to_string(), contribution);

                        let mut merged = result;
                        merged.score = contribution;
                        vacant.insert((merged, contributions));
                    }
                }
            }
        }

        let mut results: Vec<RetrievalResult> = fused
            .into_values()
            .map(|(result, contributions)| {
                let sources: serde_json::Value = serde_json::json!(contributions);
                let mut merged = result;
                merged.source = ResultSource::Fusion;
                merged
                    .with_stage(FUSION_STAGE)
                    .with_metadata("fusion_policy", serde_json::json!(self.policy.as_str()))
                    .with_metadata("source_contributions", sources)
            })
            .collect();

        sort_by_score(&mut results);
        results
    }
}

#[async_trait]
impl Stage for FusionStage {
    async fn process(
        &self,
        _query: &str,
        prior: Option<Vec<RetrievalResult>>,
        _ctx: &PipelineContext,
    ) -> Result<Vec<RetrievalResult>, PipelineError> {
        let input = prior.unwrap_or_default();
        if input.is_empty() {
            return Ok(input);
        }

        let channels = Self::partition(input);
        Ok(self.fuse(channels))
    }

    fn name(&self) -> &'static str {
        FUSION_STAGE
    }
}
