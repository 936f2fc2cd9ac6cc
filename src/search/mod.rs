//! Search layer facade.
//!
//! This module provides the retrieval infrastructure for docdex:
//!
//! - **[`chunker`]**: fixed-size overlapping text windows for finer-grained indexing.
//! - **[`embedder`]**: Embedder trait plus HTTP (Ollama) and hash implementations.
//! - **[`vector_index`]**: flat brute-force vector store and its DVIX snapshot format.
//! - **[`keyword`]**: escaped-pattern keyword search against the document store.
//! - **[`hybrid`]**: semantic/keyword merge, deduplication, and optional re-ranking.

pub mod chunker;
pub mod embedder;
pub mod hybrid;
pub mod keyword;
pub mod vector_index;
