//! Index manager: identity map, rebuild/add/delete protocol, persistence.
//!
//! The vector store and the identity map live and die together behind one
//! `RwLock`. Searches take the read side and always observe either the
//! fully-old or fully-new index; every mutation (incremental add, rebuild
//! swap, logical delete, clear) plus the snapshot write it implies happens
//! on the write side. Whole mutations additionally serialize on a dedicated
//! mutex, so the store walk a rebuild starts from and the swap it ends with
//! see the same store. Embedding calls are network round-trips and never
//! run under the `RwLock`.
//!
//! Deletion is two-tier: a logical delete removes the entity from the map
//! and the document store now, while the vector slot is reclaimed only by
//! the next full rebuild. The stale-slot counter makes that pending work
//! observable. The identity map itself is not persisted: on startup it is
//! reconstructed by walking the document store in the same stable order a
//! rebuild assigns positions, and any disagreement between the snapshot and
//! the store (count drift after deletes, dimension change, corruption)
//! triggers a rebuild instead of trusting a stale mapping.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::model::types::{DocumentChunk, IndexEntity, MatchKind, SearchHit};
use crate::search::chunker;
use crate::search::embedder::{Embedder, EmbedderError};
use crate::search::hybrid;
use crate::search::keyword;
use crate::search::vector_index::{VectorStore, VectorStoreError};
use crate::storage::sqlite::DocumentStore;

pub const SNAPSHOT_DIR: &str = "vector_index";
pub const SNAPSHOT_FILE: &str = "docdex.dvix";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(#[from] EmbedderError),

    #[error(transparent)]
    DimensionMismatch(#[from] VectorStoreError),

    #[error("index snapshot invalid: {0}")]
    IndexStateInvalid(String),

    #[error("document {0} not found")]
    DocumentNotFound(i64),
}

/// Bidirectional entity-id to vector-position mapping.
///
/// At most one position per entity id; a position with no mapping is a
/// stale slot left behind by a logical delete.
#[derive(Debug, Default, Clone)]
pub struct IdentityMap {
    id_to_position: HashMap<String, usize>,
    position_to_id: HashMap<usize, String>,
}

impl IdentityMap {
    pub fn insert(&mut self, id: String, position: usize) {
        if let Some(old) = self.id_to_position.insert(id.clone(), position) {
            self.position_to_id.remove(&old);
        }
        self.position_to_id.insert(position, id);
    }

    pub fn remove(&mut self, id: &str) -> Option<usize> {
        let position = self.id_to_position.remove(id)?;
        self.position_to_id.remove(&position);
        Some(position)
    }

    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.id_to_position.get(id).copied()
    }

    pub fn id_at(&self, position: usize) -> Option<&str> {
        self.position_to_id.get(&position).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.id_to_position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_position.is_empty()
    }

    /// Pairs in no particular order; used by tests comparing rebuild runs.
    pub fn entries(&self) -> Vec<(String, usize)> {
        let mut pairs: Vec<(String, usize)> = self
            .id_to_position
            .iter()
            .map(|(id, pos)| (id.clone(), *pos))
            .collect();
        pairs.sort();
        pairs
    }
}

/// Everything the lock protects.
struct IndexState {
    vectors: VectorStore,
    id_map: IdentityMap,
    /// Vector slots whose entity was logically deleted since the last
    /// rebuild. Reclaimed only by [`IndexEngine::rebuild`].
    stale_slots: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RebuildReport {
    pub indexed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AddReport {
    pub indexed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DeleteReport {
    pub removed_entities: usize,
    pub stale_slots: usize,
    /// A rebuild is required to reclaim stale vector slots and restore the
    /// dense-position invariant.
    pub needs_rebuild: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub dimension: usize,
    pub vector_count: usize,
    pub mapped_entities: usize,
    pub stale_slots: usize,
    pub needs_rebuild: bool,
    pub documents: usize,
}

/// The retrieval engine: vector store + identity map over a document store.
pub struct IndexEngine {
    store: Arc<DocumentStore>,
    embedder: Arc<dyn Embedder>,
    config: EngineConfig,
    dimension: usize,
    snapshot_path: PathBuf,
    state: RwLock<IndexState>,
    /// Serializes whole mutations, store walk included. The `RwLock` alone
    /// only guards the in-memory swap: a rebuild lists and rechunks the
    /// store long before it takes the write side, and an add or delete
    /// completing in that window would be dropped from (or resurrected in)
    /// the swapped-in index. Always acquired before `state`.
    mutations: Mutex<()>,
}

impl IndexEngine {
    /// Open the engine: probe the embedder dimension, then load the durable
    /// snapshot or rebuild from the document store.
    pub fn open(
        store: Arc<DocumentStore>,
        embedder: Arc<dyn Embedder>,
        config: EngineConfig,
        data_dir: &Path,
    ) -> Result<Self> {
        config.validate()?;

        let dimension = match embedder.probe_dimension() {
            Some(dim) => dim,
            None => {
                warn!(
                    fallback = config.embedding_dimension_fallback,
                    "could not probe embedding dimension, using configured fallback"
                );
                config.embedding_dimension_fallback
            }
        };

        let snapshot_path = data_dir.join(SNAPSHOT_DIR).join(SNAPSHOT_FILE);
        let engine = Self {
            store,
            embedder,
            config,
            dimension,
            snapshot_path,
            state: RwLock::new(IndexState {
                vectors: VectorStore::new(dimension),
                id_map: IdentityMap::default(),
                stale_slots: 0,
            }),
            mutations: Mutex::new(()),
        };
        engine.load_or_rebuild()?;
        Ok(engine)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Load the snapshot and reconstruct the identity map from the document
    /// store's iteration order; fall back to a full rebuild when the
    /// snapshot is missing, unreadable, or disagrees with the store.
    fn load_or_rebuild(&self) -> Result<()> {
        if !self.snapshot_path.exists() {
            info!("no vector snapshot found, building index from document store");
            self.rebuild()?;
            return Ok(());
        }

        match self.try_load_snapshot() {
            Ok(loaded) => {
                info!(vectors = loaded, "vector snapshot loaded");
                Ok(())
            }
            Err(e) => {
                warn!(
                    error = %EngineError::IndexStateInvalid(e.to_string()),
                    "discarding snapshot and rebuilding"
                );
                self.rebuild()?;
                Ok(())
            }
        }
    }

    fn try_load_snapshot(&self) -> Result<usize> {
        let vectors = VectorStore::load(&self.snapshot_path)?;
        if vectors.dimension() != self.dimension {
            anyhow::bail!(
                "snapshot dimension {} does not match embedder dimension {}",
                vectors.dimension(),
                self.dimension
            );
        }

        // Position assignment order = document store iteration order, the
        // same order rebuild() uses. Entities with empty text were skipped
        // at rebuild time, so they are skipped here too; any remaining
        // count drift means deletes happened since the snapshot was
        // written, and the mapping can no longer be trusted.
        let entities: Vec<IndexEntity> = self
            .store
            .list_entities(self.config.chunking_enabled)?
            .into_iter()
            .filter(|e| !e.text.is_empty())
            .collect();
        if entities.len() != vectors.len() {
            anyhow::bail!(
                "snapshot holds {} vectors but the store yields {} indexable entities",
                vectors.len(),
                entities.len()
            );
        }

        let mut id_map = IdentityMap::default();
        for (position, entity) in entities.into_iter().enumerate() {
            id_map.insert(entity.id, position);
        }

        let count = vectors.len();
        let mut state = self.state.write();
        *state = IndexState {
            vectors,
            id_map,
            stale_slots: 0,
        };
        Ok(count)
    }

    /// Full, atomic reconstruction of the index from the document store.
    ///
    /// The replacement state is built in isolation (all embedding happens
    /// before the lock is taken) and swapped in only on success; the
    /// snapshot write happens inside the same write critical section.
    /// Entities with empty text, failed embeddings, or mis-sized vectors
    /// are skipped, tallied, and logged, never fatal.
    pub fn rebuild(&self) -> Result<RebuildReport> {
        let _mutations = self.mutations.lock();
        let entities = if self.config.chunking_enabled {
            self.rechunk_all()?
        } else {
            self.store.list_entities(false)?
        };

        let mut vectors = VectorStore::new(self.dimension);
        let mut id_map = IdentityMap::default();
        let mut report = RebuildReport::default();

        for entity in entities {
            if entity.text.is_empty() {
                debug!(entity = %entity.id, "skipping entity with no text");
                report.skipped += 1;
                continue;
            }
            match self.embedder.embed(&entity.text) {
                Ok(vector) => match vectors.add(&vector) {
                    Ok(position) => {
                        id_map.insert(entity.id, position);
                        report.indexed += 1;
                    }
                    Err(e) => {
                        warn!(entity = %entity.id, error = %e, "skipping entity, bad embedding dimension");
                        report.skipped += 1;
                    }
                },
                Err(e) => {
                    warn!(entity = %entity.id, error = %e, "skipping entity, embedding failed");
                    report.skipped += 1;
                }
            }
        }

        let mut state = self.state.write();
        *state = IndexState {
            vectors,
            id_map,
            stale_slots: 0,
        };
        self.persist_locked(&state)?;
        info!(
            indexed = report.indexed,
            skipped = report.skipped,
            "index rebuilt"
        );
        Ok(report)
    }

    /// Delete all derived chunk rows and re-chunk every document, returning
    /// the fresh chunk entities in position-assignment order.
    fn rechunk_all(&self) -> Result<Vec<IndexEntity>> {
        self.store.delete_all_chunks()?;
        let mut entities = Vec::new();
        for doc in self.store.list_documents()? {
            let Some(doc_id) = doc.id else { continue };
            for (index, window) in
                chunker::chunk(&doc.extracted_text, self.config.chunk_size, self.config.chunk_overlap)
                    .into_iter()
                    .enumerate()
            {
                let chunk_id = self.store.insert_chunk(&DocumentChunk {
                    id: None,
                    document_id: doc_id,
                    chunk_index: index as i64,
                    content: window.clone(),
                    created_at: None,
                })?;
                entities.push(IndexEntity {
                    id: chunk_id.to_string(),
                    text: window,
                    parent_id: Some(doc_id.to_string()),
                });
            }
        }
        Ok(entities)
    }

    /// Incrementally index one document that already exists in the store.
    ///
    /// Embeds outside the lock, then appends vectors, records positions,
    /// and persists the snapshot inside one write critical section. An
    /// embedding failure leaves the document unindexed until the next
    /// rebuild; the entries of any prior version still come out of the map,
    /// since their rows were replaced.
    pub fn add_incremental(&self, document_id: i64) -> Result<AddReport> {
        let _mutations = self.mutations.lock();
        let doc = self
            .store
            .get_document(document_id)?
            .ok_or(EngineError::DocumentNotFound(document_id))?;

        // Re-adding a document replaces its entities; their old map entries
        // become stale slots below.
        let old_entity_ids: Vec<String> = if self.config.chunking_enabled {
            self.store
                .chunks_for_document(document_id)?
                .into_iter()
                .filter_map(|c| c.id.map(|id| id.to_string()))
                .collect()
        } else {
            vec![document_id.to_string()]
        };

        let entities: Vec<IndexEntity> = if self.config.chunking_enabled {
            self.store.delete_chunks_for_document(document_id)?;
            let mut out = Vec::new();
            for (index, window) in
                chunker::chunk(&doc.extracted_text, self.config.chunk_size, self.config.chunk_overlap)
                    .into_iter()
                    .enumerate()
            {
                let chunk_id = self.store.insert_chunk(&DocumentChunk {
                    id: None,
                    document_id,
                    chunk_index: index as i64,
                    content: window.clone(),
                    created_at: None,
                })?;
                out.push(IndexEntity {
                    id: chunk_id.to_string(),
                    text: window,
                    parent_id: Some(document_id.to_string()),
                });
            }
            out
        } else {
            vec![IndexEntity {
                id: document_id.to_string(),
                text: doc.extracted_text.clone(),
                parent_id: None,
            }]
        };

        let mut report = AddReport::default();
        let mut embedded: Vec<(IndexEntity, Vec<f32>)> = Vec::new();
        for entity in entities {
            if entity.text.is_empty() {
                report.skipped += 1;
                continue;
            }
            match self.embedder.embed(&entity.text) {
                Ok(vector) => {
                    if vector.len() != self.dimension {
                        return Err(EngineError::DimensionMismatch(
                            VectorStoreError::DimensionMismatch {
                                expected: self.dimension,
                                got: vector.len(),
                            },
                        )
                        .into());
                    }
                    embedded.push((entity, vector));
                }
                Err(e) => {
                    warn!(
                        document_id,
                        entity = %entity.id,
                        error = %e,
                        "embedding failed, entity stays unindexed until the next rebuild"
                    );
                    report.skipped += 1;
                }
            }
        }

        // The old map entries come out even when nothing was embedded: the
        // chunk rows they pointed at were already replaced above, and a map
        // entry over a deleted row would let a later startup pair fresh row
        // ids with the wrong vector positions.
        let mut state = self.state.write();
        for id in &old_entity_ids {
            if state.id_map.remove(id).is_some() {
                state.stale_slots += 1;
            }
        }

        for (entity, vector) in embedded {
            let position = state.vectors.add(&vector).map_err(EngineError::from)?;
            state.id_map.insert(entity.id, position);
            report.indexed += 1;
        }
        self.persist_locked(&state)?;
        debug!(
            document_id,
            indexed = report.indexed,
            skipped = report.skipped,
            "document indexed incrementally"
        );
        Ok(report)
    }

    /// Logically delete a document: remove its entities from the identity
    /// map and the document store. Vector slots are not reclaimed; the
    /// stale-slot counter and `needs_rebuild` flag record the debt.
    pub fn delete_logical(&self, document_id: i64) -> Result<DeleteReport> {
        let _mutations = self.mutations.lock();
        if self.store.get_document(document_id)?.is_none() {
            return Err(EngineError::DocumentNotFound(document_id).into());
        }

        let entity_ids: Vec<String> = if self.config.chunking_enabled {
            self.store
                .chunks_for_document(document_id)?
                .into_iter()
                .filter_map(|c| c.id.map(|id| id.to_string()))
                .collect()
        } else {
            vec![document_id.to_string()]
        };

        let mut state = self.state.write();
        let mut removed = 0;
        for id in &entity_ids {
            if state.id_map.remove(id).is_some() {
                removed += 1;
            }
        }
        state.stale_slots += removed;

        self.store.delete_chunks_for_document(document_id)?;
        self.store.delete_document(document_id)?;

        let report = DeleteReport {
            removed_entities: removed,
            stale_slots: state.stale_slots,
            needs_rebuild: state.stale_slots > 0,
        };
        info!(
            document_id,
            removed_entities = removed,
            stale_slots = state.stale_slots,
            "document deleted logically, rebuild required to reclaim vector slots"
        );
        Ok(report)
    }

    /// Empty the vector store and identity map, delete the snapshot file
    /// and all derived chunk rows.
    pub fn clear(&self) -> Result<()> {
        let _mutations = self.mutations.lock();
        let mut state = self.state.write();
        *state = IndexState {
            vectors: VectorStore::new(self.dimension),
            id_map: IdentityMap::default(),
            stale_slots: 0,
        };
        match std::fs::remove_file(&self.snapshot_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("remove snapshot {}", self.snapshot_path.display()));
            }
        }
        self.store.delete_all_chunks()?;
        info!("index cleared");
        Ok(())
    }

    /// Embed the query and return the k nearest live entities.
    ///
    /// Embedding failures degrade to an empty result set with a logged
    /// cause; stale positions (deleted entities) are filtered out at the
    /// identity-map stage.
    pub fn semantic_search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_vector = match self.embedder.embed(query) {
            Ok(v) if v.len() == self.dimension => v,
            Ok(v) => {
                warn!(
                    expected = self.dimension,
                    got = v.len(),
                    "query embedding has wrong dimension, returning no results"
                );
                return Ok(Vec::new());
            }
            Err(e) => {
                warn!(
                    error = %EngineError::EmbeddingUnavailable(e),
                    "query embedding failed, returning no results"
                );
                return Ok(Vec::new());
            }
        };

        let resolved: Vec<(String, f32)> = {
            let state = self.state.read();
            let neighbors = state
                .vectors
                .search(&query_vector, k + state.stale_slots)
                .map_err(EngineError::from)?;
            neighbors
                .into_iter()
                .filter_map(|(position, distance)| {
                    state
                        .id_map
                        .id_at(position)
                        .map(|id| (id.to_string(), distance))
                })
                .take(k)
                .collect()
        };

        let mut hits = Vec::with_capacity(resolved.len());
        for (entity_id, distance) in resolved {
            let Some(hit) = self.resolve_entity(&entity_id, distance)? else {
                continue;
            };
            hits.push(hit);
        }
        Ok(hits)
    }

    fn resolve_entity(&self, entity_id: &str, distance: f32) -> Result<Option<SearchHit>> {
        let Ok(row_id) = entity_id.parse::<i64>() else {
            return Ok(None);
        };
        if self.config.chunking_enabled {
            let Some(chunk) = self.store.get_chunk(row_id)? else {
                return Ok(None);
            };
            let Some(document) = self.store.get_document(chunk.document_id)? else {
                return Ok(None);
            };
            Ok(Some(SearchHit {
                entity_id: entity_id.to_string(),
                document,
                matched_chunk: Some(chunk.content),
                distance: Some(distance),
                match_kind: MatchKind::Semantic,
                score: None,
            }))
        } else {
            let Some(document) = self.store.get_document(row_id)? else {
                return Ok(None);
            };
            Ok(Some(SearchHit {
                entity_id: entity_id.to_string(),
                document,
                matched_chunk: None,
                distance: Some(distance),
                match_kind: MatchKind::Semantic,
                score: None,
            }))
        }
    }

    /// Keyword search over the document store (no vector index involved).
    pub fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        keyword::keyword_search(&self.store, query, limit)
    }

    /// Union of semantic and keyword retrieval: semantic first, dedup by
    /// entity, optional re-rank per configuration.
    pub fn hybrid_search(
        &self,
        query: &str,
        semantic_limit: usize,
        keyword_limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let semantic = self.semantic_search(query, semantic_limit)?;
        let keyword_hits = self.keyword_search(query, keyword_limit)?;
        let merged = hybrid::merge_hits(semantic, keyword_hits);
        if self.config.reranking_enabled {
            Ok(hybrid::rerank(merged, query, &self.config))
        } else {
            Ok(merged)
        }
    }

    /// Snapshot of the id→position pairs, sorted by id. For diagnostics
    /// and tests.
    pub fn mapping(&self) -> Vec<(String, usize)> {
        self.state.read().id_map.entries()
    }

    pub fn status(&self) -> Result<IndexStatus> {
        let state = self.state.read();
        Ok(IndexStatus {
            dimension: self.dimension,
            vector_count: state.vectors.len(),
            mapped_entities: state.id_map.len(),
            stale_slots: state.stale_slots,
            needs_rebuild: state.stale_slots > 0,
            documents: self.store.count_documents()?,
        })
    }

    /// Write the snapshot for the state the caller already holds the write
    /// lock over. An empty index removes the file instead, so a later load
    /// does not resurrect vectors for an empty store.
    fn persist_locked(&self, state: &IndexState) -> Result<()> {
        if state.vectors.is_empty() {
            let _ = std::fs::remove_file(&self.snapshot_path);
            Ok(())
        } else {
            state.vectors.save(&self.snapshot_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_map_is_bidirectional() {
        let mut map = IdentityMap::default();
        map.insert("a".into(), 0);
        map.insert("b".into(), 1);

        assert_eq!(map.position_of("a"), Some(0));
        assert_eq!(map.id_at(1), Some("b"));
        assert_eq!(map.len(), 2);

        assert_eq!(map.remove("a"), Some(0));
        assert_eq!(map.id_at(0), None);
        assert_eq!(map.position_of("a"), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn identity_map_reinsert_replaces_position() {
        let mut map = IdentityMap::default();
        map.insert("a".into(), 0);
        map.insert("a".into(), 5);

        assert_eq!(map.position_of("a"), Some(5));
        assert_eq!(map.id_at(0), None);
        assert_eq!(map.id_at(5), Some("a"));
        assert_eq!(map.len(), 1);
    }
}
