//! Cascade inference engine
//!
//! Runs an ordered list of inference levels, escalating to the next level
//! whenever the current one reports confidence below its threshold. The last
//! level is an unconditional terminal fallback, so the most expensive method
//! is invoked at most once per call and only when every cheaper level was
//! insufficient.

use ahash::AHashMap;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::CascadeConfig;
use crate::inference::{InferenceError, InferenceResult};
use crate::traits::UpstreamError;

/// A single tier in the cascade
#[async_trait]
pub trait InferenceLevel: Send + Sync {
    /// Run inference on the input
    async fn infer(&self, input: &str) -> Result<InferenceResult, UpstreamError>;

    /// Stable level identifier used in logs and result metadata
    fn name(&self) -> &str;
}

struct LevelEntry {
    level: Box<dyn InferenceLevel>,
    threshold: f32,
    invocations: AtomicU64,
}

/// Invocation counters for tuning and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeStats {
    /// (level name, invocation count) in cascade order
    pub level_invocations: Vec<(String, u64)>,
    /// Number of calls answered from the cache
    pub cache_hits: u64,
    /// Number of calls that ran the cascade
    pub cache_misses: u64,
}

struct CacheEntry {
    result: InferenceResult,
    inserted_at: Instant,
}

/// Bounded, TTL-expiring result cache keyed by content hash.
///
/// Entries are write-once: an insert never replaces an existing live entry,
/// so concurrent readers never observe a value changing under them.
struct InferenceCache {
    entries: Mutex<AHashMap<[u8; 32], CacheEntry>>,
    capacity: usize,
    ttl: Duration,
}

impl InferenceCache {
    fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(AHashMap::new()),
            capacity,
            ttl,
        }
    }

    fn get(&self, key: &[u8; 32]) -> Option<InferenceResult> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(key)
            .filter(|entry| entry.inserted_at.elapsed() < self.ttl)
            .map(|entry| entry.result.clone())
    }

    fn insert(&self, key: [u8; 32], result: InferenceResult) {
        let mut entries = self.entries.lock().unwrap();

        if let Some(existing) = entries.get(&key) {
            if existing.inserted_at.elapsed() < self.ttl {
                // Write-once: keep the existing live entry
                return;
            }
        }

        if entries.len() >= self.capacity {
            let ttl = self.ttl;
            entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
        }

        if entries.len() >= self.capacity {
            // Still full after expiry sweep: evict the oldest entry
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(key, _)| *key)
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                result,
                inserted_at: Instant::now(),
            },
        );
    }
}

/// Multi-level escalation engine for inference tasks
pub struct CascadeInferenceEngine {
    /// Task name, namespaces cache keys and shows up in logs
    task: String,
    levels: Vec<LevelEntry>,
    cache: Option<InferenceCache>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl CascadeInferenceEngine {
    /// Create an engine for the given task with no cache
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            levels: Vec::new(),
            cache: None,
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Create an engine configured from `CascadeConfig`
    pub fn from_config(task: impl Into<String>, config: &CascadeConfig) -> Self {
        let mut engine = Self::new(task);
        if config.cache_enabled {
            engine.cache = Some(InferenceCache::new(
                config.cache_capacity,
                Duration::from_secs(config.cache_ttl_secs),
            ));
        }
        engine
    }

    /// Enable the content-hash result cache
    pub fn with_cache(mut self, capacity: usize, ttl: Duration) -> Self {
        self.cache = Some(InferenceCache::new(capacity, ttl));
        self
    }

    /// Append a level with its confidence threshold (chainable)
    ///
    /// The threshold of the last level is irrelevant: it is the terminal
    /// fallback and its result is always accepted.
    pub fn add_level(mut self, level: Box<dyn InferenceLevel>, threshold: f32) -> Self {
        self.levels.push(LevelEntry {
            level,
            threshold,
            invocations: AtomicU64::new(0),
        });
        self
    }

    /// Run the cascade on the given input
    pub async fn infer(&self, input: &str) -> Result<InferenceResult, InferenceError> {
        if self.levels.is_empty() {
            return Err(InferenceError::NoLevels);
        }

        let cache_key = self.cache.as_ref().map(|_| self.cache_key(input));

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(result) = cache.get(key) {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(task = %self.task, "cascade cache hit");
                return Ok(result);
            }
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let start = Instant::now();
        let last = self.levels.len() - 1;
        let mut escalations = 0u32;

        for (index, entry) in self.levels.iter().enumerate() {
            let terminal = index == last;
            entry.invocations.fetch_add(1, Ordering::Relaxed);

            let outcome = entry.level.infer(input).await;

            let mut result = match outcome {
                Ok(result) => result,
                Err(err) if terminal => {
                    return Err(InferenceError::TerminalLevel {
                        level: entry.level.name().to_string(),
                        message: err.to_string(),
                    });
                }
                Err(err) => {
                    // Degrade and escalate: a failed non-terminal level is
                    // treated as zero confidence.
                    tracing::warn!(
                        task = %self.task,
                        level = entry.level.name(),
                        error = %err,
                        "inference level failed, escalating"
                    );
                    escalations += 1;
                    continue;
                }
            };

            if result.confidence >= entry.threshold || terminal {
                result.metadata.insert(
                    "latency_ms".to_string(),
                    serde_json::json!(start.elapsed().as_millis() as u64),
                );
                result
                    .metadata
                    .insert("escalations".to_string(), serde_json::json!(escalations));

                if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
                    cache.insert(key, result.clone());
                }

                tracing::debug!(
                    task = %self.task,
                    level = %result.level,
                    confidence = result.confidence,
                    escalations,
                    "cascade settled"
                );
                return Ok(result);
            }

            tracing::debug!(
                task = %self.task,
                level = entry.level.name(),
                confidence = result.confidence,
                threshold = entry.threshold,
                "confidence below threshold, escalating"
            );
            escalations += 1;
        }

        // Unreachable: the terminal iteration always returns.
        Err(InferenceError::NoLevels)
    }

    /// Snapshot of invocation and cache counters
    pub fn stats(&self) -> CascadeStats {
        CascadeStats {
            level_invocations: self
                .levels
                .iter()
                .map(|entry| {
                    (
                        entry.level.name().to_string(),
                        entry.invocations.load(Ordering::Relaxed),
                    )
                })
                .collect(),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }

    /// Number of configured levels
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn cache_key(&self, input: &str) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.task.as_bytes());
        hasher.update(&[0]);
        hasher.update(input.as_bytes());
        *hasher.finalize().as_bytes()
    }
}
