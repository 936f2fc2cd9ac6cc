//! Engine configuration.
//!
//! All knobs have compiled-in defaults and can be overridden through
//! `DOCDEX_*` environment variables (read via dotenvy, so a `.env` file
//! works too). Validation runs once at startup: a chunk overlap that is
//! not strictly smaller than the chunk size would turn the chunker's
//! stride zero or negative, so it is rejected here rather than detected
//! mid-index.

use thiserror::Error;

/// Default embedding dimension used when probing the embedder fails.
pub const DEFAULT_DIMENSION_FALLBACK: usize = 768;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({size})")]
    OverlapNotSmallerThanSize { size: usize, overlap: usize },

    #[error("chunk_size must be non-zero")]
    ZeroChunkSize,

    #[error("embedding_dimension_fallback must be non-zero")]
    ZeroFallbackDimension,
}

/// Configuration for the retrieval engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Index per-chunk entities instead of whole documents.
    pub chunking_enabled: bool,
    /// Window length in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive windows. Must be `< chunk_size`.
    pub chunk_overlap: usize,
    /// Apply the weighted re-rank pass after hybrid merge.
    pub reranking_enabled: bool,
    /// Weight applied to the keyword-presence component of the re-rank score.
    pub rerank_keyword_weight: f32,
    /// Flat boost applied to every candidate that reached the re-rank stage.
    pub rerank_semantic_weight: f32,
    /// Dimension assumed when the embedder cannot be probed at startup.
    pub embedding_dimension_fallback: usize,
    /// Base URL of the Ollama-compatible embedding endpoint.
    pub ollama_url: String,
    /// Model name passed to the embedding endpoint.
    pub ollama_model: String,
    /// Upper bound for a single embedding round-trip, in seconds.
    pub embed_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunking_enabled: false,
            chunk_size: 1000,
            chunk_overlap: 200,
            reranking_enabled: true,
            rerank_keyword_weight: 1.0,
            rerank_semantic_weight: 2.0,
            embedding_dimension_fallback: DEFAULT_DIMENSION_FALLBACK,
            ollama_url: "http://127.0.0.1:11434".to_string(),
            ollama_model: "nomic-embed-text".to_string(),
            embed_timeout_secs: 30,
        }
    }
}

impl EngineConfig {
    /// Load config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let mut cfg = Self::default();

        if let Ok(val) = dotenvy::var("DOCDEX_CHUNKING") {
            cfg.chunking_enabled = val != "0" && val.to_lowercase() != "false";
        }

        if let Ok(val) = dotenvy::var("DOCDEX_CHUNK_SIZE") {
            if let Ok(size) = val.parse() {
                cfg.chunk_size = size;
            }
        }

        if let Ok(val) = dotenvy::var("DOCDEX_CHUNK_OVERLAP") {
            if let Ok(overlap) = val.parse() {
                cfg.chunk_overlap = overlap;
            }
        }

        if let Ok(val) = dotenvy::var("DOCDEX_RERANKING") {
            cfg.reranking_enabled = val != "0" && val.to_lowercase() != "false";
        }

        if let Ok(val) = dotenvy::var("DOCDEX_RERANK_KEYWORD_WEIGHT") {
            if let Ok(weight) = val.parse() {
                cfg.rerank_keyword_weight = weight;
            }
        }

        if let Ok(val) = dotenvy::var("DOCDEX_RERANK_SEMANTIC_WEIGHT") {
            if let Ok(weight) = val.parse() {
                cfg.rerank_semantic_weight = weight;
            }
        }

        if let Ok(val) = dotenvy::var("DOCDEX_DIMENSION_FALLBACK") {
            if let Ok(dim) = val.parse() {
                cfg.embedding_dimension_fallback = dim;
            }
        }

        if let Ok(val) = dotenvy::var("DOCDEX_OLLAMA_URL") {
            cfg.ollama_url = val;
        }

        if let Ok(val) = dotenvy::var("DOCDEX_OLLAMA_MODEL") {
            cfg.ollama_model = val;
        }

        if let Ok(val) = dotenvy::var("DOCDEX_EMBED_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                cfg.embed_timeout_secs = secs;
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations that would corrupt indexing later on.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.chunk_size == 0 {
            return Err(ConfigurationError::ZeroChunkSize);
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigurationError::OverlapNotSmallerThanSize {
                size: self.chunk_size,
                overlap: self.chunk_overlap,
            });
        }
        if self.embedding_dimension_fallback == 0 {
            return Err(ConfigurationError::ZeroFallbackDimension);
        }
        Ok(())
    }
}
