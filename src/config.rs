//! AURA memory configuration management

use crate::error::{Error, Result};
use crate::memory::budget::EMPTY_COLLECTION_SIZE;
use crate::memory::context::DEFAULT_CONTEXT_CHAR_BUDGET;
use crate::memory::extractor::DEFAULT_MAX_CONTENT_CHARS;
use crate::memory::item::DEFAULT_STORAGE_LIMIT;
use crate::memory::merge::DEFAULT_SIMILARITY_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuraConfig {
    /// Memory pipeline tuning
    pub memory: MemoryConfig,

    /// Reasoning backend used for automatic extraction
    pub reasoning: ReasoningConfig,

    /// Storage configuration
    pub storage: StorageConfig,
}

impl AuraConfig {
    /// Load and validate a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate TOML configuration text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the memory pipeline cannot honour
    pub fn validate(&self) -> Result<()> {
        self.memory.validate()?;
        self.reasoning.validate()
    }
}

/// Memory pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Per-user ceiling on the serialized memory collection, in bytes
    pub storage_limit: usize,

    /// Word-overlap score at or above which two same-category memories
    /// are treated as the same fact
    pub similarity_threshold: f64,

    /// Maximum characters of rendered prompt context
    pub context_char_budget: usize,

    /// Maximum characters of a single memory's content
    pub max_content_chars: usize,

    /// Eviction ordering weights
    pub eviction: EvictionWeights,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            storage_limit: DEFAULT_STORAGE_LIMIT,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            context_char_budget: DEFAULT_CONTEXT_CHAR_BUDGET,
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            eviction: EvictionWeights::default(),
        }
    }
}

impl MemoryConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(Error::Config(format!(
                "memory.similarity_threshold must be within [0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.storage_limit < EMPTY_COLLECTION_SIZE {
            return Err(Error::Config(format!(
                "memory.storage_limit must be at least {} bytes",
                EMPTY_COLLECTION_SIZE
            )));
        }
        if self.context_char_budget == 0 {
            return Err(Error::Config(
                "memory.context_char_budget must be non-zero".to_string(),
            ));
        }
        if self.max_content_chars == 0 {
            return Err(Error::Config(
                "memory.max_content_chars must be non-zero".to_string(),
            ));
        }
        self.eviction.validate()
    }
}

/// Weights of the eviction score `importance + manual_bonus + recency`.
///
/// Importance always dominates: the bonuses together stay below one
/// importance step. Among equal importance a manual item outranks any
/// inferred one, and among equal importance and source the oldest goes
/// first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionWeights {
    /// Added to the score of manual memories
    pub manual_bonus: f64,

    /// Weight of the recency term, which decays from 1 towards 0
    pub recency_weight: f64,

    /// Age in days at which the recency term halves
    pub recency_half_life_days: f64,
}

impl Default for EvictionWeights {
    fn default() -> Self {
        Self {
            manual_bonus: 0.5,
            recency_weight: 0.25,
            recency_half_life_days: 30.0,
        }
    }
}

impl EvictionWeights {
    fn validate(&self) -> Result<()> {
        if self.manual_bonus < 0.0 || self.recency_weight < 0.0 {
            return Err(Error::Config(
                "memory.eviction weights must not be negative".to_string(),
            ));
        }
        if self.recency_half_life_days <= 0.0 {
            return Err(Error::Config(
                "memory.eviction.recency_half_life_days must be positive".to_string(),
            ));
        }
        if self.recency_weight >= self.manual_bonus {
            return Err(Error::Config(
                "memory.eviction.recency_weight must be smaller than manual_bonus".to_string(),
            ));
        }
        if self.manual_bonus + self.recency_weight >= 1.0 {
            return Err(Error::Config(
                "memory.eviction.manual_bonus + recency_weight must stay below 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which reasoning backend performs automatic extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonerKind {
    /// Offline pattern-based extraction
    #[default]
    Heuristic,
    /// Language model over HTTP
    Llm,
    /// No automatic extraction
    Disabled,
}

/// Reasoning backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    /// Backend kind
    pub backend: ReasonerKind,

    /// Upper bound on one extraction call, in seconds
    pub timeout_secs: u64,

    /// Base URL of the `generateContent` API
    pub endpoint: String,

    /// Model identifier
    pub model: String,

    /// Environment variable holding the API key
    /// (e.g. `"gemini_api_key"` → reads `$GEMINI_API_KEY`)
    pub api_key_env: String,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            backend: ReasonerKind::Heuristic,
            timeout_secs: 10,
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-1.5-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
        }
    }
}

impl ReasoningConfig {
    /// Read the API key from the environment.
    ///
    /// Tries the variable as written, then its uppercase form.
    pub fn resolve_api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .or_else(|_| std::env::var(self.api_key_env.to_uppercase()))
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "reasoning.timeout_secs must be non-zero".to_string(),
            ));
        }
        if self.backend == ReasonerKind::Llm && (self.endpoint.is_empty() || self.model.is_empty())
        {
            return Err(Error::Config(
                "reasoning backend 'llm' requires endpoint and model".to_string(),
            ));
        }
        Ok(())
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one JSON document per user
    pub base_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base_dir = dirs_next::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("aura-memory")
            .join("memories");
        Self { base_dir }
    }
}
