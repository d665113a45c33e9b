//! Pipeline stage implementations

mod diversity;
mod fusion;
mod intent;
mod recall;
mod rerank;

pub use diversity::DiversityFilterStage;
pub use fusion::{FusionPolicy, FusionStage};
pub use intent::{IntentAdaptiveStage, QueryIntent};
pub use recall::{ConcurrentRecallStage, GraphRetrievalStage, VectorRetrievalStage};
pub use rerank::{RerankMode, SemanticRerankStage};

use ahash::AHashSet;
use regex::Regex;
use std::sync::OnceLock;

/// Lowercased word tokens of a text
///
/// Shared by the rule reranker, the MMR filter, and the graph stage's
/// degraded entity extraction.
pub(crate) fn tokenize(text: &str) -> AHashSet<String> {
    static WORD: OnceLock<Regex> = OnceLock::new();
    let word = WORD.get_or_init(|| Regex::new(r"\w+").unwrap());

    word.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Sort results by score descending with a stable doc-id tiebreak
pub(crate) fn sort_by_score(results: &mut [crate::retrieval::RetrievalResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
}
