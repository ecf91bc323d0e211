//! Self-contained flat L2 ANN index over chunk embeddings.
//!
//! Generalizes this crate's storage layer the way `lance_store.rs` wrapped a vector
//! database: here the "database" is an in-memory `Vec<Vec<f32>>` guarded by a
//! `parking_lot::RwLock`, brute-force-scored and persisted as two JSON files (matching
//! this crate's existing write-to-temp-then-rename persistence idiom). Point deletion
//! is unsupported by construction, so `delete` rebuilds from retained entries, the same
//! tradeoff the teacher's LanceDB-backed store made explicit in its own `delete_by_*`
//! methods.

use crate::embeddings::EmbeddingModel;
use crate::error::{RagError, Result};
use crate::types::{Chunk, MetadataFilter, RetrievalOrigin, RetrievedChunk};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetadataFile {
    embedding_model_name: String,
    dimension: usize,
    chunks: Vec<Chunk>,
}

struct Inner {
    vectors: Vec<Vec<f32>>,
    chunks: Vec<Chunk>,
}

pub struct VectorIndex {
    embedder: Arc<dyn EmbeddingModel>,
    embedding_model_name: String,
    inner: RwLock<Inner>,
    storage_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorIndexStats {
    pub total_vectors: usize,
    pub dimension: usize,
    pub distinct_documents: usize,
}

impl VectorIndex {
    pub fn new(embedder: Arc<dyn EmbeddingModel>, embedding_model_name: impl Into<String>) -> Self {
        Self {
            embedder,
            embedding_model_name: embedding_model_name.into(),
            inner: RwLock::new(Inner { vectors: Vec::new(), chunks: Vec::new() }),
            storage_root: None,
        }
    }

    /// Load `vector_index.bin` / `vector_metadata.pkl` from `storage_root` if present.
    /// Fails fast if the persisted header names a different embedding model than
    /// `embedding_model_name`.
    pub fn open(
        embedder: Arc<dyn EmbeddingModel>,
        embedding_model_name: impl Into<String>,
        storage_root: &Path,
    ) -> Result<Self> {
        let embedding_model_name = embedding_model_name.into();
        std::fs::create_dir_all(storage_root)
            .map_err(|e| RagError::internal(format!("failed to create storage root: {e}")))?;

        let vectors_path = storage_root.join("vector_index.bin");
        let metadata_path = storage_root.join("vector_metadata.pkl");

        let mut index = Self {
            embedder,
            embedding_model_name: embedding_model_name.clone(),
            inner: RwLock::new(Inner { vectors: Vec::new(), chunks: Vec::new() }),
            storage_root: Some(storage_root.to_path_buf()),
        };

        if !vectors_path.exists() || !metadata_path.exists() {
            return Ok(index);
        }

        let vectors_raw = std::fs::read_to_string(&vectors_path)
            .map_err(|e| RagError::internal(format!("failed to read vector index: {e}")))?;
        let vectors: Vec<Vec<f32>> = serde_json::from_str(&vectors_raw)
            .map_err(|e| RagError::internal(format!("failed to parse vector index: {e}")))?;

        let metadata_raw = std::fs::read_to_string(&metadata_path)
            .map_err(|e| RagError::internal(format!("failed to read vector metadata: {e}")))?;
        let metadata: MetadataFile = serde_json::from_str(&metadata_raw)
            .map_err(|e| RagError::internal(format!("failed to parse vector metadata: {e}")))?;

        if metadata.embedding_model_name != embedding_model_name {
            return Err(RagError::inconsistency(format!(
                "vector index was built with embedding model '{}', but this deployment uses '{}'",
                metadata.embedding_model_name, embedding_model_name
            )));
        }
        if vectors.len() != metadata.chunks.len() {
            return Err(RagError::inconsistency(
                "vector index and metadata have mismatched lengths".to_string(),
            ));
        }

        index.inner = RwLock::new(Inner { vectors, chunks: metadata.chunks });
        Ok(index)
    }

    /// Encode `chunks`' text to embeddings and append them. Append-only; safe with one
    /// writer at a time and many concurrent readers.
    pub fn add(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let embeddings = self
            .embedder
            .embed_documents(&texts)
            .map_err(|e| RagError::unavailable(format!("embedding failed: {e}")))?;

        let mut inner = self.inner.write();
        for (chunk, vector) in chunks.iter().zip(embeddings.into_iter()) {
            inner.vectors.push(vector);
            inner.chunks.push(chunk.clone());
        }
        drop(inner);
        self.persist();
        Ok(())
    }

    /// Encode `query`, retrieve the `k` nearest chunks by L2 distance (oversampling to
    /// `2k` when `doc_filter` is set, to keep filtered recall close to unfiltered).
    /// Distance `d` is converted to a similarity score `1/(1+d)`.
    pub fn search(&self, query: &str, k: usize, doc_filter: Option<&MetadataFilter>) -> Result<Vec<RetrievedChunk>> {
        let query_vec = self
            .embedder
            .embed_query(query)
            .map_err(|e| RagError::unavailable(format!("query embedding failed: {e}")))?;

        let inner = self.inner.read();
        if inner.vectors.is_empty() {
            return Ok(Vec::new());
        }

        let fetch_k = if doc_filter.is_some() { k * 2 } else { k };
        let mut scored: Vec<(usize, f32)> = inner
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, l2_distance(&query_vec, v)))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(fetch_k.max(k));

        let mut results = Vec::with_capacity(k);
        for (idx, dist) in scored {
            let chunk = &inner.chunks[idx];
            if let Some(filter) = doc_filter {
                if !filter.matches(&chunk.doc_id) {
                    continue;
                }
            }
            results.push(RetrievedChunk {
                chunk: chunk.clone(),
                score: 1.0 / (1.0 + dist),
                origin: RetrievalOrigin::Semantic,
            });
            if results.len() >= k {
                break;
            }
        }
        Ok(results)
    }

    /// Rebuild the index from entries not belonging to `doc_id`; point deletion isn't
    /// supported by a flat array, so this is a full rewrite.
    pub fn delete(&self, doc_id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let keep: Vec<usize> = inner
            .chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.doc_id != doc_id)
            .map(|(i, _)| i)
            .collect();
        let vectors = keep.iter().map(|&i| inner.vectors[i].clone()).collect();
        let chunks = keep.iter().map(|&i| inner.chunks[i].clone()).collect();
        inner.vectors = vectors;
        inner.chunks = chunks;
        drop(inner);
        self.persist();
        Ok(())
    }

    pub fn stats(&self) -> VectorIndexStats {
        let inner = self.inner.read();
        let dimension = inner.vectors.first().map(|v| v.len()).unwrap_or_else(|| self.embedder.dimension());
        let distinct_documents = {
            let mut ids: Vec<&str> = inner.chunks.iter().map(|c| c.doc_id.as_str()).collect();
            ids.sort_unstable();
            ids.dedup();
            ids.len()
        };
        VectorIndexStats { total_vectors: inner.vectors.len(), dimension, distinct_documents }
    }

    /// Number of vectors currently stored for `doc_id`, used by the §8 ingestion
    /// invariant check (`|VectorIndex.vectors(doc_id)| == doc.total_chunks`).
    pub fn vector_count_for_document(&self, doc_id: &str) -> usize {
        self.inner.read().chunks.iter().filter(|c| c.doc_id == doc_id).count()
    }

    fn persist(&self) {
        let Some(root) = &self.storage_root else { return };
        let inner = self.inner.read();
        let vectors_json = match serde_json::to_string(&inner.vectors) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!("failed to serialize vector index: {e}");
                return;
            }
        };
        let metadata = MetadataFile {
            embedding_model_name: self.embedding_model_name.clone(),
            dimension: self.embedder.dimension(),
            chunks: inner.chunks.clone(),
        };
        let metadata_json = match serde_json::to_string(&metadata) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!("failed to serialize vector metadata: {e}");
                return;
            }
        };
        drop(inner);

        write_atomic(&root.join("vector_index.bin"), &vectors_json);
        write_atomic(&root.join("vector_metadata.pkl"), &metadata_json);
    }
}

fn write_atomic(path: &Path, content: &str) {
    let tmp = path.with_extension("tmp");
    if let Err(e) = std::fs::write(&tmp, content).and_then(|_| std::fs::rename(&tmp, path)) {
        tracing::warn!("failed to persist {}: {e}", path.display());
    }
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Citation;
    use anyhow::Result as AnyResult;

    struct FakeEmbedder {
        dim: usize,
    }

    impl EmbeddingModel for FakeEmbedder {
        fn embed_query(&self, text: &str) -> AnyResult<Vec<f32>> {
            self.embed_document(text)
        }
        fn embed_document(&self, text: &str) -> AnyResult<Vec<f32>> {
            let mut v = vec![0.0; self.dim];
            for (i, b) in text.bytes().enumerate() {
                v[i % self.dim] += b as f32;
            }
            Ok(v)
        }
        fn dimension(&self) -> usize {
            self.dim
        }
    }

    fn chunk(doc_id: &str, idx: u32, text: &str) -> Chunk {
        Chunk {
            id: Chunk::make_id(doc_id, idx),
            doc_id: doc_id.to_string(),
            chunk_index: idx,
            text: text.to_string(),
            source: format!("{doc_id}.pdf"),
            citation: Citation::None,
        }
    }

    fn index() -> VectorIndex {
        VectorIndex::new(Arc::new(FakeEmbedder { dim: 8 }), "test-model")
    }

    #[test]
    fn add_and_search_returns_nearest() {
        let idx = index();
        idx.add(&[
            chunk("doc1", 0, "apple banana"),
            chunk("doc1", 1, "completely different text about rockets"),
        ])
        .unwrap();

        let results = idx.search("apple banana", 1, None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.id, "doc1_chunk_0");
        assert_eq!(results[0].origin, RetrievalOrigin::Semantic);
    }

    #[test]
    fn search_on_empty_index_returns_empty() {
        let idx = index();
        assert!(idx.search("anything", 5, None).unwrap().is_empty());
    }

    #[test]
    fn doc_filter_excludes_other_documents() {
        let idx = index();
        idx.add(&[chunk("doc1", 0, "alpha"), chunk("doc2", 0, "alpha")]).unwrap();

        let filter = MetadataFilter { doc_ids: Some(vec!["doc2".to_string()]) };
        let results = idx.search("alpha", 5, Some(&filter)).unwrap();
        assert!(results.iter().all(|r| r.chunk.doc_id == "doc2"));
    }

    #[test]
    fn delete_removes_all_vectors_for_document() {
        let idx = index();
        idx.add(&[
            chunk("doc1", 0, "a"),
            chunk("doc1", 1, "b"),
            chunk("doc2", 0, "c"),
        ])
        .unwrap();
        idx.delete("doc1").unwrap();

        let stats = idx.stats();
        assert_eq!(stats.total_vectors, 1);
        assert_eq!(stats.distinct_documents, 1);
    }

    #[test]
    fn vector_count_for_document_tracks_additions() {
        let idx = index();
        idx.add(&[chunk("doc1", 0, "a"), chunk("doc1", 1, "b")]).unwrap();
        assert_eq!(idx.vector_count_for_document("doc1"), 2);
        assert_eq!(idx.vector_count_for_document("doc2"), 0);
    }

    #[test]
    fn stats_report_dimension_from_embedder() {
        let idx = index();
        assert_eq!(idx.stats().dimension, 8);
    }

    #[test]
    fn persists_and_reloads_with_matching_model_name() {
        let tmp = std::env::temp_dir().join(format!("vector_index_test_{}", uuid::Uuid::new_v4()));
        let idx = VectorIndex::open(Arc::new(FakeEmbedder { dim: 8 }), "test-model", &tmp).unwrap();
        idx.add(&[chunk("doc1", 0, "hello world")]).unwrap();
        drop(idx);

        let reopened = VectorIndex::open(Arc::new(FakeEmbedder { dim: 8 }), "test-model", &tmp).unwrap();
        assert_eq!(reopened.stats().total_vectors, 1);

        let mismatched = VectorIndex::open(Arc::new(FakeEmbedder { dim: 8 }), "other-model", &tmp);
        assert!(mismatched.is_err());

        std::fs::remove_dir_all(&tmp).ok();
    }
}
