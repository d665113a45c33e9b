//! Pipeline orchestration
//!
//! A pipeline is an ordered list of stages executed over one shared context.
//! Any stage error aborts the execution; there are no per-stage retries.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::retrieval::{PipelineContext, RetrievalResult};

/// Retrieval pipeline errors, categorized per the failure policy:
/// configuration problems surface at build time, upstream failures of
/// mandatory sources abort the execution, and a missed deadline is reported
/// as cancellation rather than a silently truncated result.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A stage requires a collaborator that was not supplied (build time)
    #[error("Pipeline configuration error: {0}")]
    Configuration(String),

    /// A mandatory external call failed
    #[error("Upstream '{collaborator}' failed in stage '{stage}': {message}")]
    Upstream {
        stage: String,
        collaborator: String,
        message: String,
    },

    /// The caller-supplied deadline expired
    #[error("Execution cancelled: deadline of {deadline_ms}ms expired")]
    Cancelled { deadline_ms: u64 },

    /// The query was rejected before any stage ran
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// A single transform in the retrieval pipeline
///
/// `prior` is `None` for the first stage. Implementations must return a new
/// result list instead of mutating the input, and may only write to the
/// context's extension area.
#[async_trait]
pub trait Stage: Send + Sync {
    async fn process(
        &self,
        query: &str,
        prior: Option<Vec<RetrievalResult>>,
        ctx: &PipelineContext,
    ) -> Result<Vec<RetrievalResult>, PipelineError>;

    /// Stage identifier used for result tagging and logs
    fn name(&self) -> &'static str;
}

/// Ordered stage executor
pub struct RetrievalPipeline {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
}

impl RetrievalPipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Append a stage (chainable)
    pub fn add_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Pipeline name as given at construction
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of registered stages
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Execute all stages in registration order.
    ///
    /// The returned list is truncated to `top_k`; stage errors propagate
    /// immediately and the execution is atomic.
    pub async fn execute(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<serde_json::Value>,
    ) -> Result<Vec<RetrievalResult>, PipelineError> {
        if query.trim().is_empty() {
            return Err(PipelineError::InvalidQuery(
                "query text cannot be empty".to_string(),
            ));
        }

        let ctx = PipelineContext::new(query, top_k, filters);
        let mut results: Option<Vec<RetrievalResult>> = None;

        for stage in &self.stages {
            let output = stage.process(query, results.take(), &ctx).await?;
            tracing::debug!(
                pipeline = %self.name,
                stage = stage.name(),
                count = output.len(),
                "stage complete"
            );
            results = Some(output);
        }

        let mut final_results = results.unwrap_or_default();
        final_results.truncate(top_k);
        Ok(final_results)
    }

    /// Execute with a deadline; expiry aborts in-flight work and returns
    /// [`PipelineError::Cancelled`], never a partial result.
    pub async fn execute_with_deadline(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<serde_json::Value>,
        deadline: Duration,
    ) -> Result<Vec<RetrievalResult>, PipelineError> {
        match tokio::time::timeout(deadline, self.execute(query, top_k, filters)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(pipeline = %self.name, ?deadline, "execution cancelled");
                Err(PipelineError::Cancelled {
                    deadline_ms: deadline.as_millis() as u64,
                })
            }
        }
    }
}

impl std::fmt::Debug for RetrievalPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalPipeline")
            .field("name", &self.name)
            .field("stages", &self.stage_count())
            .finish()
    }
}
