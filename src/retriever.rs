//! Hybrid retrieval orchestrator: semantic search + graph traversal, merged,
//! entity-filtered, lexically reranked, and topped up by query variations.
//!
//! Grounded on `graph_rag_v2.py::query`'s five numbered stages and
//! `_merge_and_deduplicate`'s id-then-content-hash dedup rule (prefer the semantic-side
//! copy on collision, since it carries the similarity score), plus
//! `graph_rag_enhanced.py::_apply_smart_document_filter`'s filename-then-content entity
//! match with empty-result fallback.

use crate::entity_extractor::EntityExtractor;
use crate::error::Result;
use crate::graph_store::GraphStore;
use crate::lexical_reranker;
use crate::types::{EntityMention, MetadataFilter, RetrievalOrigin, RetrievedChunk};
use crate::vector_index::VectorIndex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::time::Duration;

const SEMANTIC_K: usize = 20;
const GRAPH_MAX_DEPTH: usize = 2;
const GRAPH_MAX_NODES: usize = 15;
const MIN_ENTITY_TOKEN_LEN: usize = 3;

pub struct Retriever<'a> {
    pub vector_index: &'a VectorIndex,
    pub graph_store: &'a GraphStore,
    pub entity_extractor: Option<&'a EntityExtractor>,
    pub graph_timeout: Duration,
}

impl<'a> Retriever<'a> {
    /// Run the full five-stage pipeline plus variation pass for `queries`
    /// (`queries[0]` is the original question; the rest are paraphrases).
    /// `doc_filter` scopes both stages; `top_k` is the caller's requested page size.
    pub fn retrieve(&self, queries: &[String], doc_filter: Option<&MetadataFilter>, top_k: usize) -> Result<Vec<RetrievedChunk>> {
        let Some(primary) = queries.first() else {
            return Ok(Vec::new());
        };

        // Stage 1: semantic.
        let semantic = self.vector_index.search(primary, SEMANTIC_K, doc_filter)?;

        // Stage 2: graph traversal.
        let doc_ids = doc_filter.and_then(|f| f.doc_ids.clone());
        let graph_chunks = self.graph_store.traversal_retrieve(primary, doc_ids.as_deref(), GRAPH_MAX_DEPTH, GRAPH_MAX_NODES);
        let graph_results: Vec<RetrievedChunk> = graph_chunks
            .into_iter()
            .map(|chunk| RetrievedChunk { chunk, score: 0.0, origin: RetrievalOrigin::Graph })
            .collect();

        // Stage 3: merge + dedupe.
        let mut merged = merge_and_dedupe(semantic, graph_results);

        // Stage 4: smart entity filter.
        if let Some(extractor) = self.entity_extractor {
            let query_entities = extractor.extract(primary);
            merged = apply_smart_filter(&query_entities, merged);
        }

        // Stage 5: lexical rerank.
        let rerank_k = top_k.saturating_mul(2).max(1);
        merged = rerank(primary, merged, rerank_k);

        // Variation pass: top up from additional paraphrases if still thin.
        let mut seen_ids: HashSet<String> = merged.iter().map(|r| r.chunk.id.clone()).collect();
        for variation in queries.iter().skip(1) {
            if merged.len() >= top_k.saturating_mul(2) {
                break;
            }
            let exclude = seen_ids.clone();
            let extra = self.graph_store.query_similar_chunks(
                variation,
                doc_ids.as_deref(),
                &exclude,
                GRAPH_MAX_NODES,
                self.graph_timeout,
            );
            for chunk in extra {
                if seen_ids.insert(chunk.id.clone()) {
                    merged.push(RetrievedChunk { chunk, score: 0.0, origin: RetrievalOrigin::Graph });
                }
            }
        }

        merged.truncate(top_k.saturating_mul(2));
        Ok(merged)
    }
}

fn content_hash(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    let prefix: String = text.chars().take(100).collect();
    prefix.hash(&mut hasher);
    hasher.finish()
}

/// Union by chunk id with a content-hash fallback key. The semantic-side copy wins on
/// collision since it carries the similarity score.
fn merge_and_dedupe(semantic: Vec<RetrievedChunk>, graph: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
    let mut seen_ids = HashSet::new();
    let mut seen_hashes = HashSet::new();
    let mut merged = Vec::with_capacity(semantic.len() + graph.len());

    for mut item in semantic {
        if seen_ids.insert(item.chunk.id.clone()) {
            seen_hashes.insert(content_hash(&item.chunk.text));
            item.origin = RetrievalOrigin::Semantic;
            merged.push(item);
        }
    }
    for mut item in graph {
        let hash = content_hash(&item.chunk.text);
        if seen_ids.contains(&item.chunk.id) {
            if let Some(existing) = merged.iter_mut().find(|r| r.chunk.id == item.chunk.id) {
                existing.origin = RetrievalOrigin::Both;
            }
            continue;
        }
        if seen_hashes.contains(&hash) {
            continue;
        }
        seen_ids.insert(item.chunk.id.clone());
        seen_hashes.insert(hash);
        item.origin = RetrievalOrigin::Graph;
        merged.push(item);
    }
    merged
}

/// Filter chunks to those whose source filename contains a ≥3-char token of a query
/// entity name; if no filename matches, fall back to matching chunk content; if both
/// produce nothing, skip filtering and return the input unchanged.
fn apply_smart_filter(query_entities: &[EntityMention], chunks: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
    if query_entities.is_empty() || chunks.is_empty() {
        return chunks;
    }

    let tokens: Vec<String> = query_entities
        .iter()
        .flat_map(|e| e.text.split_whitespace())
        .map(|t| t.to_lowercase())
        .filter(|t| t.chars().count() >= MIN_ENTITY_TOKEN_LEN)
        .collect();
    if tokens.is_empty() {
        return chunks;
    }

    let filename_matched: Vec<RetrievedChunk> = chunks
        .iter()
        .filter(|r| {
            let source_lower = r.chunk.source.to_lowercase();
            tokens.iter().any(|t| source_lower.contains(t.as_str()))
        })
        .cloned()
        .collect();
    if !filename_matched.is_empty() {
        return filename_matched;
    }

    let content_matched: Vec<RetrievedChunk> = chunks
        .iter()
        .filter(|r| {
            let text_lower = r.chunk.text.to_lowercase();
            tokens.iter().any(|t| text_lower.contains(t.as_str()))
        })
        .cloned()
        .collect();
    if !content_matched.is_empty() {
        return content_matched;
    }

    chunks
}

fn rerank(query: &str, chunks: Vec<RetrievedChunk>, k: usize) -> Vec<RetrievedChunk> {
    if chunks.is_empty() {
        return chunks;
    }
    let candidates: Vec<(String, String, f32)> =
        chunks.iter().map(|r| (r.chunk.id.clone(), r.chunk.text.clone(), r.score)).collect();
    let ranked = lexical_reranker::rerank(query, &candidates);

    let mut by_id: std::collections::HashMap<String, RetrievedChunk> =
        chunks.into_iter().map(|r| (r.chunk.id.clone(), r)).collect();

    let mut result = Vec::with_capacity(ranked.len().min(k));
    let mut order: VecDeque<(String, f32)> = ranked.into();
    while let Some((id, score)) = order.pop_front() {
        if let Some(mut chunk) = by_id.remove(&id) {
            chunk.score = score;
            result.push(chunk);
        }
        if result.len() >= k {
            break;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, Citation, EntityType};

    fn chunk(id: &str, doc_id: &str, text: &str, source: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk {
                id: id.to_string(),
                doc_id: doc_id.to_string(),
                chunk_index: 0,
                text: text.to_string(),
                source: source.to_string(),
                citation: Citation::None,
            },
            score: 0.5,
            origin: RetrievalOrigin::Semantic,
        }
    }

    #[test]
    fn merge_prefers_semantic_copy_on_id_collision() {
        let mut graph_copy = chunk("c1", "d1", "text", "d1.pdf");
        graph_copy.score = 0.0;
        let semantic_copy = chunk("c1", "d1", "text", "d1.pdf");

        let merged = merge_and_dedupe(vec![semantic_copy], vec![graph_copy]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].origin, RetrievalOrigin::Both);
    }

    #[test]
    fn merge_dedupes_by_content_hash_fallback() {
        let semantic = chunk("c1", "d1", "shared prefix of content here", "d1.pdf");
        let graph = chunk("c2-different-id", "d1", "shared prefix of content here", "d1.pdf");

        let merged = merge_and_dedupe(vec![semantic], vec![graph]);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn smart_filter_matches_filename_first() {
        let obama_chunk = chunk("c1", "d1", "irrelevant text", "obama_speech.pdf");
        let trump_chunk = chunk("c2", "d2", "irrelevant text", "trump_rally.pdf");
        let entities = vec![EntityMention { text: "Obama".to_string(), entity_type: EntityType::Person, start_char: 0, end_char: 5 }];

        let filtered = apply_smart_filter(&entities, vec![obama_chunk, trump_chunk]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].chunk.source, "obama_speech.pdf");
    }

    #[test]
    fn smart_filter_falls_back_to_content_when_no_filename_matches() {
        let chunk_with_mention = chunk("c1", "d1", "Obama visited the site today", "report.pdf");
        let chunk_without = chunk("c2", "d1", "unrelated content entirely", "report.pdf");
        let entities = vec![EntityMention { text: "Obama".to_string(), entity_type: EntityType::Person, start_char: 0, end_char: 5 }];

        let filtered = apply_smart_filter(&entities, vec![chunk_with_mention, chunk_without]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].chunk.id, "c1");
    }

    #[test]
    fn smart_filter_skips_when_nothing_matches() {
        let c1 = chunk("c1", "d1", "nothing relevant", "report.pdf");
        let entities = vec![EntityMention { text: "Zanzibar".to_string(), entity_type: EntityType::Gpe, start_char: 0, end_char: 8 }];

        let filtered = apply_smart_filter(&entities, vec![c1]);
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn smart_filter_no_entities_returns_unchanged() {
        let c1 = chunk("c1", "d1", "text", "report.pdf");
        let filtered = apply_smart_filter(&[], vec![c1]);
        assert_eq!(filtered.len(), 1);
    }
}
