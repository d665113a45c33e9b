//! Semantic reranking of fused candidates
//!
//! Reranking only touches the head of the list: the top candidates are
//! re-judged against the query, the tail keeps its fusion order. Rule mode
//! adds a bounded token-overlap boost and re-sorts. LLM mode asks the model
//! for a relevance ordering of the head; an unusable response fails open to
//! the incoming ordering, and candidates the model omits are appended in
//! their original order so no result is ever dropped.

use ahash::AHashSet;
use async_trait::async_trait;
use std::sync::Arc;

use crate::inference::extract_json_block;
use crate::retrieval::stages::{sort_by_score, tokenize};
use crate::retrieval::{PipelineContext, PipelineError, RetrievalResult, Stage};
use crate::traits::{ChatMessage, LlmCaller};

const RERANK_STAGE: &str = "semantic_rerank";

/// How candidate relevance is judged
pub enum RerankMode {
    /// Token-overlap heuristic, no external calls
    Rule,
    /// LLM relevance ordering, failing open to the incoming order
    Llm {
        llm: Arc<dyn LlmCaller>,
        temperature: f32,
    },
}

/// Reorders the strongest candidates by query relevance
pub struct SemanticRerankStage {
    mode: RerankMode,
    /// Maximum boost added to a candidate's score in rule mode
    boost: f32,
    /// How many head candidates are reranked
    candidate_limit: usize,
}

impl SemanticRerankStage {
    pub fn new(mode: RerankMode) -> Self {
        Self {
            mode,
            boost: 0.1,
            candidate_limit: 10,
        }
    }

    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }

    pub fn with_candidate_limit(mut self, limit: usize) -> Self {
        self.candidate_limit = limit.max(1);
        self
    }

    /// Fraction of query tokens present in the content
    fn overlap_relevance(query: &str, content: &str) -> f32 {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return 0.0;
        }
        let content_tokens = tokenize(content);

        let shared = query_tokens.intersection(&content_tokens).count();
        shared as f32 / query_tokens.len() as f32
    }

    fn rule_rerank(&self, query: &str, mut head: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
        for candidate in head.iter_mut() {
            let relevance = Self::overlap_relevance(query, &candidate.content);
            candidate.score += self.boost * relevance;
            candidate.metadata.insert(
                "rerank_relevance".to_string(),
                serde_json::json!(relevance),
            );
        }
        sort_by_score(&mut head);
        head
    }

    fn build_prompt(query: &str, candidates: &[RetrievalResult]) -> String {
        let mut listing = String::new();
        for (i, candidate) in candidates.iter().enumerate() {
            listing.push_str(&format!("[{}] {}\n", i, candidate.content));
        }

        format!(
            r#"Order the documents below by relevance to the query, most relevant first.

Query: {query}

Documents:
{listing}
Return a JSON array of the document indices in relevance order, e.g. [2, 0, 1].
Return only the JSON array."#
        )
    }

    /// Ask the LLM for a relevance ordering of the head candidates.
    ///
    /// Returns the validated index list (in-range, deduplicated, possibly
    /// partial); `None` means the call or parse failed and the incoming
    /// ordering must be kept.
    async fn llm_ordering(
        llm: &Arc<dyn LlmCaller>,
        temperature: f32,
        query: &str,
        candidates: &[RetrievalResult],
    ) -> Option<Vec<usize>> {
        let prompt = Self::build_prompt(query, candidates);
        let response = match llm.generate(&[ChatMessage::user(prompt)], temperature).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "rerank LLM call failed, keeping incoming order");
                return None;
            }
        };

        let values: Vec<serde_json::Value> = extract_json_block(&response)
            .and_then(|block| serde_json::from_str(block).ok())?;

        let mut seen = AHashSet::new();
        let ordering: Vec<usize> = values
            .iter()
            .filter_map(|v| v.as_u64())
            .map(|v| v as usize)
            .filter(|&index| index < candidates.len() && seen.insert(index))
            .collect();

        if ordering.is_empty() {
            tracing::warn!("rerank response held no usable indices, keeping incoming order");
            return None;
        }

        Some(ordering)
    }

    /// Apply the parsed ordering to the head; omitted candidates follow in
    /// their original order.
    fn apply_ordering(
        head: Vec<RetrievalResult>,
        ordering: &[usize],
    ) -> Vec<RetrievalResult> {
        let mut slots: Vec<Option<RetrievalResult>> = head.into_iter().map(Some).collect();
        let mut reordered = Vec::with_capacity(slots.len());

        for (position, &index) in ordering.iter().enumerate() {
            if let Some(mut candidate) = slots[index].take() {
                candidate.metadata.insert(
                    "rerank_position".to_string(),
                    serde_json::json!(position),
                );
                reordered.push(candidate);
            }
        }
        for slot in slots {
            if let Some(candidate) = slot {
                reordered.push(candidate);
            }
        }

        reordered
    }
}

#[async_trait]
impl Stage for SemanticRerankStage {
    async fn process(
        &self,
        query: &str,
        prior: Option<Vec<RetrievalResult>>,
        _ctx: &PipelineContext,
    ) -> Result<Vec<RetrievalResult>, PipelineError> {
        let mut results = prior.unwrap_or_default();
        if results.len() < 2 {
            return Ok(results);
        }

        let head_len = self.candidate_limit.min(results.len());
        let tail: Vec<RetrievalResult> = results.split_off(head_len);
        let head = results;

        let mut reranked = match &self.mode {
            RerankMode::Rule => self.rule_rerank(query, head),
            RerankMode::Llm { llm, temperature } => {
                match Self::llm_ordering(llm, *temperature, query, &head).await {
                    Some(ordering) => Self::apply_ordering(head, &ordering),
                    // Fail open: incoming ordering, untouched scores
                    None => head,
                }
            }
        };

        reranked.extend(tail);
        Ok(reranked)
    }

    fn name(&self) -> &'static str {
        RERANK_STAGE
    }
}
