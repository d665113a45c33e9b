//! Configuration for the retrieval pipeline and cascade inference engine
//!
//! All tunable weights and limits live here so that presets can be adjusted
//! without touching stage logic. Defaults match the documented behavior of
//! each component; they are a starting point, not fixed constants.

use crate::error::{MemexError, Result, ValidationError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub cascade: CascadeConfig,
}

/// Retrieval pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Score multiplier for vector-sourced results
    pub vector_weight: f32,

    /// Score multiplier for graph-sourced results
    pub graph_weight: f32,

    /// Over-fetch factor for recall stages (fetch `top_k * multiplier`)
    pub search_multiplier: usize,

    /// Fusion policy: "rrf" or "weighted_sum"
    pub fusion_policy: String,

    /// RRF K constant (typically 60)
    pub rrf_k: f32,

    /// Enable multi-hop graph expansion
    pub enable_multi_hop: bool,

    /// Maximum hop distance for graph expansion
    pub max_hops: usize,

    /// Geometric score decay per hop for indirectly reached documents
    pub hop_decay: f32,

    /// Number of top seed documents expanded per query
    pub expand_seed_limit: usize,

    /// Fan-out cap per `find_related` call
    pub expand_limit: usize,

    /// Maximum additive boost applied by rule-based reranking
    pub rerank_boost: f32,

    /// Maximum number of candidates placed in one LLM rerank prompt
    pub rerank_candidate_limit: usize,

    /// MMR relevance/diversity trade-off (1.0 = relevance only)
    pub mmr_lambda: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_weight: 0.6,
            graph_weight: 0.4,
            search_multiplier: 2,
            fusion_policy: "rrf".to_string(),
            rrf_k: 60.0,
            enable_multi_hop: false,
            max_hops: 2,
            hop_decay: 0.7,
            expand_seed_limit: 5,
            expand_limit: 10,
            rerank_boost: 0.1,
            rerank_candidate_limit: 10,
            mmr_lambda: 0.7,
        }
    }
}

/// Cascade inference engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    /// Default confidence threshold for levels added without an explicit one
    pub default_threshold: f32,

    /// Enable the content-hash result cache
    pub cache_enabled: bool,

    /// Maximum number of cached inference results
    pub cache_capacity: usize,

    /// Cache entry time-to-live in seconds
    pub cache_ttl_secs: u64,

    /// Confidence floor for fast-model levels
    pub fast_model_floor: f32,

    /// Temperature for LLM-backed levels
    pub llm_temperature: f32,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            default_threshold: 0.7,
            cache_enabled: true,
            cache_capacity: 1024,
            cache_ttl_secs: 300,
            fast_model_floor: 0.3,
            llm_temperature: 0.1,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MemexError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| MemexError::Io {
            source: e,
            context: format!("reading config file {}", path.display()),
        })?;

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.retrieval.vector_weight <= 0.0 {
            errors.push(ValidationError {
                path: "retrieval.vector_weight".to_string(),
                message: "must be positive".to_string(),
            });
        }

        if self.retrieval.graph_weight <= 0.0 {
            errors.push(ValidationError {
                path: "retrieval.graph_weight".to_string(),
                message: "must be positive".to_string(),
            });
        }

        if self.retrieval.search_multiplier == 0 {
            errors.push(ValidationError {
                path: "retrieval.search_multiplier".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        match self.retrieval.fusion_policy.as_str() {
            "rrf" | "weighted_sum" => {}
            other => errors.push(ValidationError {
                path: "retrieval.fusion_policy".to_string(),
                message: format!("unknown policy '{}', expected rrf or weighted_sum", other),
            }),
        }

        if !(0.0..=1.0).contains(&self.retrieval.hop_decay) {
            errors.push(ValidationError {
                path: "retrieval.hop_decay".to_string(),
                message: "must be within [0.0, 1.0]".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.retrieval.mmr_lambda) {
            errors.push(ValidationError {
                path: "retrieval.mmr_lambda".to_string(),
                message: "must be within [0.0, 1.0]".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.cascade.default_threshold) {
            errors.push(ValidationError {
                path: "cascade.default_threshold".to_string(),
                message: "must be within [0.0, 1.0]".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.cascade.fast_model_floor) {
            errors.push(ValidationError {
                path: "cascade.fast_model_floor".to_string(),
                message: "must be within [0.0, 1.0]".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MemexError::ConfigValidation { errors })
        }
    }
}
