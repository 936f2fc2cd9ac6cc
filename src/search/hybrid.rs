//! Hybrid merge and re-ranking.
//!
//! Semantic search finds conceptually related but lexically dissimilar
//! text; keyword search recovers exact-identifier matches that embeddings
//! underweight. Merging the two result lists and then scoring the union
//! avoids inventing a shared scoring space for two different retrieval
//! mechanisms.

use std::collections::HashSet;

use crate::config::EngineConfig;
use crate::model::types::SearchHit;

/// Field weights for the keyword-presence component of the re-rank score.
/// Ascending: a hit in the full text says more than a hit in the name, and
/// a hit in the retrieved chunk itself says the most.
const NAME_WEIGHT: f32 = 1.0;
const SUMMARY_WEIGHT: f32 = 2.0;
const FULL_TEXT_WEIGHT: f32 = 3.0;
const CHUNK_WEIGHT: f32 = 4.0;

/// Merge semantic and keyword hits, semantic first, preserving first-seen
/// order and deduplicating.
///
/// Duplicates are detected by entity id and, across the two mechanisms, by
/// resolved document id: in chunking mode a keyword hit carries the document
/// id while the semantic hit for the same document carries a chunk id, and
/// the document must still appear only once (semantic-first).
pub fn merge_hits(semantic: Vec<SearchHit>, keyword: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut seen_entities: HashSet<String> = HashSet::new();
    let mut seen_documents: HashSet<i64> = HashSet::new();
    let mut merged = Vec::with_capacity(semantic.len() + keyword.len());

    for hit in semantic.into_iter().chain(keyword) {
        if !seen_entities.insert(hit.entity_id.clone()) {
            continue;
        }
        if let Some(doc_id) = hit.document.id {
            if !seen_documents.insert(doc_id) {
                continue;
            }
        }
        merged.push(hit);
    }
    merged
}

/// Score one candidate.
///
/// Weighted sum of a keyword-presence score over the document's fields and a
/// flat semantic boost applied to every candidate (everything reaching this
/// stage already cleared some relevance bar). The formula is deliberately
/// small and isolated so a distance-derived semantic term can replace the
/// flat boost without touching callers.
pub fn rerank_score(hit: &SearchHit, query: &str, config: &EngineConfig) -> f32 {
    let needle = query.to_lowercase();

    let mut keyword_score = 0.0;
    if hit.document.name.to_lowercase().contains(&needle) {
        keyword_score += NAME_WEIGHT;
    }
    if hit.document.summary.to_lowercase().contains(&needle) {
        keyword_score += SUMMARY_WEIGHT;
    }
    if hit.document.extracted_text.to_lowercase().contains(&needle) {
        keyword_score += FULL_TEXT_WEIGHT;
    }
    if let Some(chunk) = &hit.matched_chunk {
        if chunk.to_lowercase().contains(&needle) {
            keyword_score += CHUNK_WEIGHT;
        }
    }

    config.rerank_keyword_weight * keyword_score + config.rerank_semantic_weight
}

/// Re-score and sort merged hits, descending, stable on ties so the merge
/// order (semantic-first) survives.
pub fn rerank(mut hits: Vec<SearchHit>, query: &str, config: &EngineConfig) -> Vec<SearchHit> {
    for hit in &mut hits {
        hit.score = Some(rerank_score(hit, query, config));
    }
    hits.sort_by(|a, b| {
        b.score
            .unwrap_or(0.0)
            .partial_cmp(&a.score.unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::{Document, MatchKind};

    fn hit(entity_id: &str, doc_id: i64, kind: MatchKind) -> SearchHit {
        let mut document = Document::new(format!("doc-{doc_id}"), "");
        document.id = Some(doc_id);
        SearchHit {
            entity_id: entity_id.into(),
            document,
            matched_chunk: None,
            distance: None,
            match_kind: kind,
            score: None,
        }
    }

    #[test]
    fn merge_puts_semantic_first_and_dedups_by_entity() {
        let semantic = vec![hit("1", 1, MatchKind::Semantic)];
        let keyword = vec![hit("1", 1, MatchKind::Keyword), hit("2", 2, MatchKind::Keyword)];
        let merged = merge_hits(semantic, keyword);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].entity_id, "1");
        assert_eq!(merged[0].match_kind, MatchKind::Semantic);
        assert_eq!(merged[1].entity_id, "2");
    }

    #[test]
    fn merge_dedups_chunk_and_document_hits_for_same_document() {
        // Semantic hit is a chunk of document 7; keyword hit is document 7.
        let mut chunk_hit = hit("41", 7, MatchKind::Semantic);
        chunk_hit.matched_chunk = Some("chunk text".into());
        let merged = merge_hits(vec![chunk_hit], vec![hit("7", 7, MatchKind::Keyword)]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].entity_id, "41");
        assert_eq!(merged[0].match_kind, MatchKind::Semantic);
    }

    #[test]
    fn rerank_prefers_full_text_over_name_matches() {
        let config = EngineConfig::default();

        let mut name_only = hit("1", 1, MatchKind::Keyword);
        name_only.document.name = "revenue".into();

        let mut text_only = hit("2", 2, MatchKind::Keyword);
        text_only.document.extracted_text = "quarterly revenue figures".into();

        let ranked = rerank(vec![name_only, text_only], "revenue", &config);
        assert_eq!(ranked[0].entity_id, "2");
        assert!(ranked[0].score.unwrap() > ranked[1].score.unwrap());
    }

    #[test]
    fn rerank_boosts_matching_chunk_content() {
        let config = EngineConfig::default();

        let mut plain = hit("10", 1, MatchKind::Semantic);
        plain.matched_chunk = Some("unrelated window".into());
        let mut chunk_match = hit("11", 2, MatchKind::Semantic);
        chunk_match.matched_chunk = Some("the lease terms are here".into());

        let ranked = rerank(vec![plain, chunk_match], "lease", &config);
        assert_eq!(ranked[0].entity_id, "11");
    }

    #[test]
    fn rerank_is_stable_on_ties() {
        let config = EngineConfig::default();
        // Neither document mentions the query; both get the flat boost only.
        let ranked = rerank(
            vec![hit("1", 1, MatchKind::Semantic), hit("2", 2, MatchKind::Keyword)],
            "nonexistent",
            &config,
        );
        assert_eq!(ranked[0].entity_id, "1");
        assert_eq!(ranked[1].entity_id, "2");
        assert_eq!(ranked[0].score, ranked[1].score);
    }

    #[test]
    fn every_candidate_gets_the_flat_semantic_boost() {
        let config = EngineConfig::default();
        let scored = rerank_score(&hit("1", 1, MatchKind::Keyword), "zzz", &config);
        assert!((scored - config.rerank_semantic_weight).abs() < f32::EPSILON);
    }
}
