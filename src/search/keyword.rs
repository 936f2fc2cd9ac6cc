//! Keyword search against the document store.
//!
//! Queries come from untrusted callers, so the text is escaped before any
//! pattern is built: every regex metacharacter is treated literally, which
//! rules out both pattern-syntax crashes and catastrophic backtracking by
//! construction. Matching is case-insensitive over name, tags, summary, and
//! extracted text; any one field qualifies and results keep store order.

use anyhow::Result;
use regex::{Regex, RegexBuilder};

use crate::model::types::{MatchKind, SearchHit};
use crate::storage::sqlite::DocumentStore;

/// Escape a user-supplied query so it can only match literally.
pub fn sanitize_query(query: &str) -> String {
    regex::escape(query)
}

/// Compile the case-insensitive literal matcher for `query`.
///
/// Escaping guarantees compilation succeeds for any input; the size limit
/// is a backstop for pathologically long queries.
pub fn build_matcher(query: &str) -> Result<Regex> {
    let pattern = sanitize_query(query);
    let matcher = RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .size_limit(1 << 20)
        .build()?;
    Ok(matcher)
}

/// Match documents whose name, tags, summary, or extracted text contain the
/// query, in store (insertion) order, capped at `limit`.
pub fn keyword_search(store: &DocumentStore, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
    if query.trim().is_empty() || limit == 0 {
        return Ok(Vec::new());
    }
    let matcher = build_matcher(query)?;

    let mut hits = Vec::new();
    for doc in store.list_documents()? {
        let matches = matcher.is_match(&doc.name)
            || doc.tags.iter().any(|t| matcher.is_match(t))
            || matcher.is_match(&doc.summary)
            || matcher.is_match(&doc.extracted_text);
        if !matches {
            continue;
        }
        let entity_id = doc.id.map(|id| id.to_string()).unwrap_or_default();
        hits.push(SearchHit {
            entity_id,
            document: doc,
            matched_chunk: None,
            distance: None,
            match_kind: MatchKind::Keyword,
            score: None,
        });
        if hits.len() >= limit {
            break;
        }
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::Document;

    fn store_with(docs: &[(&str, &str)]) -> (tempfile::TempDir, DocumentStore) {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = DocumentStore::open(&tmp.path().join("docs.db")).unwrap();
        for (name, text) in docs {
            store.insert_document(&Document::new(*name, *text)).unwrap();
        }
        (tmp, store)
    }

    #[test]
    fn matches_are_case_insensitive() {
        let (_tmp, store) = store_with(&[("Annual Report", "Revenue grew")]);
        let hits = keyword_search(&store, "revenue", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.name, "Annual Report");
    }

    #[test]
    fn any_field_qualifies() {
        let (_tmp, store) = store_with(&[("passport.pdf", "")]);
        let mut tagged = Document::new("other.pdf", "nothing here");
        tagged.tags = vec!["travel".into()];
        tagged.summary = "itinerary for the trip".into();
        store.insert_document(&tagged).unwrap();

        assert_eq!(keyword_search(&store, "passport", 10).unwrap().len(), 1);
        assert_eq!(keyword_search(&store, "travel", 10).unwrap().len(), 1);
        assert_eq!(keyword_search(&store, "itinerary", 10).unwrap().len(), 1);
    }

    #[test]
    fn results_keep_store_order_and_respect_limit() {
        let (_tmp, store) = store_with(&[("a", "shared"), ("b", "shared"), ("c", "shared")]);
        let hits = keyword_search(&store, "shared", 2).unwrap();
        let names: Vec<&str> = hits.iter().map(|h| h.document.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn metacharacters_are_literal() {
        let (_tmp, store) = store_with(&[("weird", r"price is $5 (net) [draft] a.b c|d")]);
        assert_eq!(keyword_search(&store, "$5 (net)", 10).unwrap().len(), 1);
        assert_eq!(keyword_search(&store, "[draft]", 10).unwrap().len(), 1);
        // "a.b" must not match "axb" semantics; it matches literally.
        assert_eq!(keyword_search(&store, "a.b", 10).unwrap().len(), 1);
        assert_eq!(keyword_search(&store, "a?b", 10).unwrap().len(), 0);
    }

    #[test]
    fn adversarial_input_never_errors() {
        let (_tmp, store) = store_with(&[("doc", "plain text")]);
        let nasty = [
            r"\$*+?()[]{}.|",
            r"(((((((((",
            r"a{1000000}",
            r"(a+)+$",
            r"[z-a]",
            "\\",
        ];
        for q in nasty {
            assert!(keyword_search(&store, q, 10).is_ok(), "query {q:?} errored");
        }
        let long: String = r"\$*+?()[]{}.|".repeat(200);
        assert!(keyword_search(&store, &long, 10).is_ok());
    }

    #[test]
    fn empty_query_returns_nothing() {
        let (_tmp, store) = store_with(&[("doc", "text")]);
        assert!(keyword_search(&store, "   ", 10).unwrap().is_empty());
    }
}
