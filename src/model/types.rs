//! Normalized entity structs.

use serde::{Deserialize, Serialize};

/// A stored document: the authoritative record the index is derived from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Option<i64>,
    pub name: String,
    pub tags: Vec<String>,
    pub summary: String,
    pub extracted_text: String,
    pub created_at: Option<i64>,
}

impl Document {
    pub fn new(name: impl Into<String>, extracted_text: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            tags: Vec::new(),
            summary: String::new(),
            extracted_text: extracted_text.into(),
            created_at: None,
        }
    }
}

/// A bounded window of a document's text, indexed independently when
/// chunking is enabled. Ownership never crosses documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: Option<i64>,
    pub document_id: i64,
    pub chunk_index: i64,
    pub content: String,
    pub created_at: Option<i64>,
}

/// The narrow view of an entity the index layer is allowed to see.
///
/// The engine must stay decoupled from document-schema evolution, so it
/// receives only an opaque id, the text to embed, and the owning document
/// id when the entity is a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntity {
    /// Opaque entity id (document row id, or chunk row id in chunking mode).
    pub id: String,
    /// Text that was (or will be) embedded for this entity.
    pub text: String,
    /// Owning document id when this entity is a chunk.
    pub parent_id: Option<String>,
}

impl IndexEntity {
    /// Id of the document this entity resolves to.
    pub fn document_id(&self) -> &str {
        self.parent_id.as_deref().unwrap_or(&self.id)
    }
}

/// How a hit entered the result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchKind {
    Semantic,
    Keyword,
}

/// A resolved search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Entity id that matched (chunk id in chunking mode).
    pub entity_id: String,
    /// Owning document.
    pub document: Document,
    /// Content of the matched chunk, when the hit came from a chunk.
    pub matched_chunk: Option<String>,
    /// Squared-L2 distance for semantic hits.
    pub distance: Option<f32>,
    pub match_kind: MatchKind,
    /// Re-rank score; populated only when re-ranking ran.
    pub score: Option<f32>,
}
