//! Embedding providers.
//!
//! The engine treats the embedding model as an opaque function from text to
//! a fixed-dimension vector that may fail or come back empty. Two providers
//! are built in:
//!
//! - [`OllamaEmbedder`]: blocking HTTP calls against an Ollama-compatible
//!   `/api/embeddings` endpoint, with a bounded request timeout.
//! - [`HashEmbedder`]: deterministic bag-of-words feature hashing. Always
//!   available, needs no model files, and doubles as the test stub.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum EmbedderError {
    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("embedder returned an empty vector")]
    Empty,
}

pub type EmbedderResult<T> = Result<T, EmbedderError>;

/// An opaque text-to-vector function.
pub trait Embedder: Send + Sync {
    /// Stable identifier, recorded alongside snapshots for diagnostics.
    fn id(&self) -> &str;

    /// Embed `text`. An `Ok` vector is never empty.
    fn embed(&self, text: &str) -> EmbedderResult<Vec<f32>>;

    /// Discover the output dimension by embedding a sample string.
    fn probe_dimension(&self) -> Option<usize> {
        match self.embed("docdex dimension probe") {
            Ok(v) => Some(v.len()),
            Err(e) => {
                warn!(error = %e, "embedder dimension probe failed");
                None
            }
        }
    }
}

// -------------------------------------------------------------------------
// Ollama HTTP adapter
// -------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

/// Embedder backed by an Ollama-compatible HTTP endpoint.
pub struct OllamaEmbedder {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    id: String,
}

impl OllamaEmbedder {
    /// Build a client for `base_url` with a bounded per-request timeout.
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> EmbedderResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbedderError::Request(e.to_string()))?;
        Ok(Self {
            client,
            url: format!("{}/api/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            id: format!("ollama-{model}"),
        })
    }
}

impl Embedder for OllamaEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn embed(&self, text: &str) -> EmbedderResult<Vec<f32>> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "model": self.model, "prompt": text }))
            .send()
            .map_err(|e| EmbedderError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmbedderError::Request(format!(
                "{} returned {}",
                self.url,
                response.status()
            )));
        }

        let body: EmbeddingsResponse = response
            .json()
            .map_err(|e| EmbedderError::Request(e.to_string()))?;

        if body.embedding.is_empty() {
            return Err(EmbedderError::Empty);
        }
        debug!(
            model = %self.model,
            dimension = body.embedding.len(),
            "embedding generated"
        );
        Ok(body.embedding)
    }
}

// -------------------------------------------------------------------------
// Hash embedder
// -------------------------------------------------------------------------

/// Bag-of-words feature-hashing embedder.
///
/// Tokens are lowercased, hashed with FxHash, and accumulated into
/// `dimension` buckets; the result is L2-normalized. Texts sharing words map
/// to nearby vectors, which gives deterministic lexical topicality without
/// any model files.
pub struct HashEmbedder {
    dimension: usize,
    id: String,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            id: format!("hash-{dimension}"),
        }
    }
}

impl Embedder for HashEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn embed(&self, text: &str) -> EmbedderResult<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        let mut tokens = 0usize;
        for token in text.split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let bucket = fxhash::hash64(&token.to_lowercase()) as usize % self.dimension;
            vector[bucket] += 1.0;
            tokens += 1;
        }
        if tokens == 0 {
            return Err(EmbedderError::Empty);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}
