//! BM25-Okapi reranking pass over an already-assembled candidate set.
//!
//! No full-text index is maintained; this scores the merged vector+graph candidate
//! list directly, the way `faiss_reranker_service.py::rerank` combines a dense score
//! with a freshly-computed BM25 score rather than querying a separate lexical index.

use std::collections::HashMap;

const K1: f32 = 1.5;
const B: f32 = 0.75;
const DENSE_WEIGHT: f32 = 0.6;
const LEXICAL_WEIGHT: f32 = 0.4;

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

struct Bm25Corpus {
    doc_tokens: Vec<Vec<String>>,
    doc_freqs: HashMap<String, usize>,
    avg_doc_len: f32,
}

impl Bm25Corpus {
    fn build(documents: &[&str]) -> Self {
        let doc_tokens: Vec<Vec<String>> = documents.iter().map(|d| tokenize(d)).collect();
        let mut doc_freqs: HashMap<String, usize> = HashMap::new();
        for tokens in &doc_tokens {
            let unique: std::collections::HashSet<&String> = tokens.iter().collect();
            for term in unique {
                *doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }
        }
        let total_len: usize = doc_tokens.iter().map(|t| t.len()).sum();
        let avg_doc_len = if doc_tokens.is_empty() {
            0.0
        } else {
            total_len as f32 / doc_tokens.len() as f32
        };
        Self { doc_tokens, doc_freqs, avg_doc_len }
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.doc_tokens.len() as f32;
        let df = *self.doc_freqs.get(term).unwrap_or(&0) as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn score(&self, query_terms: &[String], doc_index: usize) -> f32 {
        let tokens = &self.doc_tokens[doc_index];
        let doc_len = tokens.len() as f32;
        let mut term_freqs: HashMap<&str, usize> = HashMap::new();
        for t in tokens {
            *term_freqs.entry(t.as_str()).or_insert(0) += 1;
        }

        let mut score = 0.0;
        for term in query_terms {
            let tf = *term_freqs.get(term.as_str()).unwrap_or(&0) as f32;
            if tf == 0.0 {
                continue;
            }
            let idf = self.idf(term);
            let denom = tf + K1 * (1.0 - B + B * doc_len / self.avg_doc_len.max(1.0));
            score += idf * (tf * (K1 + 1.0)) / denom;
        }
        score
    }
}

/// Rerank `candidates` (id, text, dense_score) against `query`, combining BM25 with the
/// existing dense score. Falls back to the original dense-score ordering if BM25
/// computation degenerates (e.g. every candidate text is empty).
pub fn rerank(query: &str, candidates: &[(String, String, f32)]) -> Vec<(String, f32)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let query_terms = tokenize(query);
    let documents: Vec<&str> = candidates.iter().map(|(_, text, _)| text.as_str()).collect();
    let corpus = Bm25Corpus::build(&documents);

    if corpus.avg_doc_len == 0.0 {
        let mut fallback: Vec<(String, f32)> =
            candidates.iter().map(|(id, _, score)| (id.clone(), *score)).collect();
        fallback.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        return fallback;
    }

    let mut scored: Vec<(String, f32)> = candidates
        .iter()
        .enumerate()
        .map(|(i, (id, _, dense_score))| {
            let bm25_raw = corpus.score(&query_terms, i);
            let bm25_normalized = if bm25_raw > 0.0 { bm25_raw / (bm25_raw + 1.0) } else { 0.0 };
            let combined = DENSE_WEIGHT * dense_score + LEXICAL_WEIGHT * bm25_normalized;
            (id.clone(), combined)
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rerank_prefers_lexical_overlap() {
        let candidates = vec![
            ("a".to_string(), "the quick brown fox jumps over the lazy dog".to_string(), 0.5),
            ("b".to_string(), "completely unrelated text about cooking recipes".to_string(), 0.5),
        ];
        let ranked = rerank("quick brown fox", &candidates);
        assert_eq!(ranked[0].0, "a");
    }

    #[test]
    fn rerank_empty_candidates_returns_empty() {
        assert!(rerank("query", &[]).is_empty());
    }

    #[test]
    fn rerank_falls_back_on_degenerate_corpus() {
        let candidates = vec![("a".to_string(), "".to_string(), 0.9), ("b".to_string(), "".to_string(), 0.3)];
        let ranked = rerank("query", &candidates);
        assert_eq!(ranked[0].0, "a");
    }

    #[test]
    fn tokenize_lowercases_and_strips_punctuation() {
        let tokens = tokenize("Hello, World! It's BM25.");
        assert_eq!(tokens, vec!["hello", "world", "it", "s", "bm25"]);
    }
}
