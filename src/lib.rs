//! Memex - Hybrid Memory Retrieval and Tiered Inference
//!
//! A retrieval layer for personal knowledge stores that combines embedding
//! similarity and entity-graph recall through a composable stage pipeline,
//! plus a tiered inference cascade (rules, fast model, LLM) for entity and
//! emotion extraction with confidence-gated escalation.

pub mod config;
pub mod error;
pub mod inference;
pub mod retrieval;
pub mod traits;

pub use error::{MemexError, Result};
