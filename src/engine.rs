//! Service container: the single entry point wiring config, storage, retrieval,
//! and generation together for a caller (HTTP handler, CLI, or test harness).
//!
//! Grounded on `rag_engine.rs::RAGEngine`'s construction shape (load embeddings,
//! build dependent components, return one `Result`-wrapped struct) but replaces the
//! LanceDB/Tantivy-backed singleton with the explicit container described in
//! SPEC_FULL.md's "Global singletons" design note: constructed once at startup,
//! passed by reference into the pipeline for each request, torn down via `close`.

use crate::config::RAGConfig;
use crate::embeddings::e5::{E5Config, E5Embeddings};
use crate::embeddings::EmbeddingModel;
use crate::entity_extractor::EntityExtractor;
use crate::error::{RagError, Result};
use crate::graph_store::GraphStore;
use crate::llm_client::LLMClient;
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::retriever::Retriever;
use crate::types::{Chunk, Citation, Document, IngestRequest, MetadataFilter, QueryRequest, QueryResponse};
use crate::vector_index::VectorIndex;
use std::sync::Arc;
use std::time::Duration;

/// Everything a request needs, constructed once and shared across requests.
pub struct RagEngine {
    config: RAGConfig,
    vector_index: VectorIndex,
    graph_store: GraphStore,
    entity_extractor: Option<EntityExtractor>,
    llm: LLMClient,
}

impl RagEngine {
    /// Load the embedding model (downloading it on first run if missing), open the
    /// persisted indexes under `config.storage_path`, and build the LLM client.
    /// Entity extraction degrades to disabled rather than failing construction (see
    /// `EntityExtractor::try_new`).
    pub async fn new(config: RAGConfig) -> Result<Self> {
        config.validate().map_err(RagError::input)?;
        std::fs::create_dir_all(&config.storage_path)
            .map_err(|e| RagError::internal(format!("failed to create storage path: {e}")))?;

        if let Err(e) = crate::embeddings::download::ensure_e5_model(&config.embedding.model_dir).await {
            tracing::warn!("embedding model auto-download failed, falling back to whatever is on disk: {e}");
        }

        let e5_config = E5Config::auto_detect(&config.embedding.model_dir).ok_or_else(|| {
            RagError::unavailable(format!(
                "embedding model not found under {}",
                config.embedding.model_dir.display()
            ))
        })?;
        let embedder: Arc<dyn EmbeddingModel> = Arc::new(
            E5Embeddings::new(e5_config).map_err(|e| RagError::unavailable(format!("failed to load embedding model: {e}")))?,
        );

        let vector_index =
            VectorIndex::open(embedder, config.embedding.embedding_model_name.clone(), &config.storage_path)?;
        let graph_store = GraphStore::open(&config.storage_path)?;

        let entity_extractor = EntityExtractor::try_new(&config.embedding.model_dir.join("ner"));

        let llm = LLMClient::new(
            config.llm.llm_base_url.clone(),
            config.llm.llm_model.clone(),
            config.llm.llm_timeout_seconds,
        )?;

        tracing::info!("RagEngine initialized, storage at {}", config.storage_path.display());

        Ok(Self { config, vector_index, graph_store, entity_extractor, llm })
    }

    /// Ingest an already-chunked document: index its chunks for semantic search,
    /// upsert it into the knowledge graph, then extract and link entities per
    /// chunk. Entity extraction failures never fail ingestion (see §4.2).
    pub fn ingest_document(&self, request: IngestRequest) -> Result<Document> {
        if request.chunk_data.is_empty() {
            return Err(RagError::input("ingest request carries no chunks"));
        }

        let chunks: Vec<Chunk> = request
            .chunk_data
            .iter()
            .enumerate()
            .map(|(i, c)| Chunk {
                id: c.chunk_id.clone(),
                doc_id: request.id.clone(),
                chunk_index: i as u32,
                text: c.text.clone(),
                source: request.filename.clone(),
                citation: c.citation.clone().unwrap_or(Citation::None),
            })
            .collect();

        let document = Document {
            id: request.id.clone(),
            filename: request.filename.clone(),
            media_type: request.media_type,
            user_id: request.user_id.clone(),
            ingested_at: chrono::Utc::now(),
            total_chunks: chunks.len(),
        };

        // Chunks are visible to semantic search before the graph observes their
        // entities: a concurrent query may see the chunk without its entity links yet.
        self.vector_index.add(&chunks)?;
        self.graph_store.add_document(&document, &chunks);

        if let Some(extractor) = &self.entity_extractor {
            for chunk in &chunks {
                for mention in extractor.extract(&chunk.text) {
                    let context = context_window(&chunk.text, mention.start_char, mention.end_char);
                    if let Err(e) = self.graph_store.add_entity(&chunk.id, &mention.text, mention.entity_type, &context) {
                        tracing::warn!("failed to link entity {:?} for chunk {}: {e}", mention.text, chunk.id);
                    }
                }
            }
        }

        tracing::info!("ingested document {} ({} chunks)", document.id, document.total_chunks);
        Ok(document)
    }

    /// Answer a question by running it through the full classify/route/retrieve/
    /// evaluate pipeline.
    pub async fn query(&self, request: QueryRequest) -> QueryResponse {
        let doc_filter = request.doc_filter.clone().map(|doc_ids| MetadataFilter { doc_ids: Some(doc_ids) });
        let document_count = self.graph_store.stats().document_count;
        let top_k = request.top_k.unwrap_or(5).max(1);

        let retriever = Retriever {
            vector_index: &self.vector_index,
            graph_store: &self.graph_store,
            entity_extractor: self.entity_extractor.as_ref(),
            graph_timeout: Duration::from_secs(self.config.graph.graph_timeout_seconds),
        };
        let pipeline = Pipeline {
            retriever,
            graph_store: &self.graph_store,
            llm: &self.llm,
            config: PipelineConfig {
                max_retries: self.config.pipeline.max_retries,
                quality_threshold: self.config.pipeline.quality_threshold,
                enable_multi_query: self.config.pipeline.enable_multi_query,
                enable_evaluation: self.config.pipeline.enable_evaluation,
                ..PipelineConfig::default()
            },
        };

        pipeline
            .run(
                &request.question,
                doc_filter.as_ref(),
                request.conversation_history.as_deref(),
                top_k,
                document_count,
            )
            .await
    }

    /// Remove a document from both indexes, cascading to chunks and orphaned entities.
    pub fn delete_document(&self, doc_id: &str) -> Result<()> {
        self.vector_index.delete(doc_id)?;
        self.graph_store.delete_document(doc_id);
        tracing::info!("deleted document {doc_id}");
        Ok(())
    }

    pub fn config(&self) -> &RAGConfig {
        &self.config
    }

    pub fn vector_stats(&self) -> crate::vector_index::VectorIndexStats {
        self.vector_index.stats()
    }

    pub fn graph_stats(&self) -> crate::graph_store::GraphStats {
        self.graph_store.stats()
    }

    /// Shutdown hook. Both indexes persist synchronously after every mutating call,
    /// so there is no buffered state to flush; this exists so callers have a single
    /// lifecycle point to invoke regardless of how the indexes evolve.
    pub fn close(&self) -> Result<()> {
        tracing::info!("RagEngine shutting down");
        Ok(())
    }
}

/// ~100 chars of surrounding text for an entity mention, used as edge context.
fn context_window(text: &str, start: usize, end: usize) -> String {
    const PAD: usize = 50;
    let window_start = start.saturating_sub(PAD);
    let window_end = (end + PAD).min(text.len());
    let window_start = snap_to_char_boundary(text, window_start);
    let window_end = snap_to_char_boundary(text, window_end);
    text[window_start..window_end].to_string()
}

fn snap_to_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut p = pos;
    while p > 0 && !text.is_char_boundary(p) {
        p -= 1;
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IngestChunk, MediaType};
    use anyhow::Result as AnyResult;

    struct FakeEmbedder;

    impl EmbeddingModel for FakeEmbedder {
        fn embed_query(&self, text: &str) -> AnyResult<Vec<f32>> {
            self.embed_document(text)
        }
        fn embed_document(&self, text: &str) -> AnyResult<Vec<f32>> {
            let mut v = vec![0.0; 8];
            for (i, b) in text.bytes().enumerate() {
                v[i % 8] += b as f32;
            }
            Ok(v)
        }
        fn dimension(&self) -> usize {
            8
        }
    }

    /// Builds a `RagEngine` without touching disk or the ONNX model files, bypassing
    /// `new` (which requires a real embedding model). Entity extraction stays
    /// disabled, matching how `EntityExtractor::try_new` degrades when the model
    /// directory is absent.
    fn test_engine() -> RagEngine {
        let config = RAGConfig::default();
        RagEngine {
            vector_index: VectorIndex::new(Arc::new(FakeEmbedder), "test-model"),
            graph_store: GraphStore::new(),
            entity_extractor: None,
            llm: LLMClient::new(config.llm.llm_base_url.clone(), config.llm.llm_model.clone(), config.llm.llm_timeout_seconds).unwrap(),
            config,
        }
    }

    fn ingest_request(id: &str, filename: &str, texts: &[&str]) -> IngestRequest {
        IngestRequest {
            id: id.to_string(),
            filename: filename.to_string(),
            media_type: MediaType::Pdf,
            user_id: None,
            chunk_data: texts
                .iter()
                .enumerate()
                .map(|(i, text)| IngestChunk {
                    chunk_id: Chunk::make_id(id, i as u32),
                    text: text.to_string(),
                    start_idx: 0,
                    end_idx: text.len(),
                    citation: None,
                })
                .collect(),
        }
    }

    #[test]
    fn ingest_document_populates_both_indexes() {
        let engine = test_engine();
        let doc = engine
            .ingest_document(ingest_request("doc1", "obama_speech.pdf", &["Obama spoke about jobs today."]))
            .unwrap();

        assert_eq!(doc.total_chunks, 1);
        assert_eq!(engine.vector_stats().total_vectors, 1);
        assert_eq!(engine.graph_stats().chunk_count, 1);
        assert_eq!(engine.graph_stats().document_count, 1);
    }

    #[test]
    fn ingest_document_rejects_empty_chunk_list() {
        let engine = test_engine();
        let result = engine.ingest_document(ingest_request("doc1", "empty.pdf", &[]));
        assert!(result.is_err());
    }

    #[test]
    fn delete_document_cascades_to_both_indexes() {
        let engine = test_engine();
        engine.ingest_document(ingest_request("doc1", "a.pdf", &["alpha", "beta"])).unwrap();
        engine.delete_document("doc1").unwrap();

        assert_eq!(engine.vector_stats().total_vectors, 0);
        assert_eq!(engine.graph_stats().document_count, 0);
        assert_eq!(engine.graph_stats().chunk_count, 0);
    }

    #[tokio::test]
    async fn greeting_query_skips_retrieval_and_returns_direct_reply() {
        let engine = test_engine();
        let response = engine
            .query(QueryRequest { question: "hi".to_string(), doc_filter: None, conversation_history: None, top_k: None })
            .await;

        assert_eq!(response.strategy, "direct_reply");
        assert!(response.citations.is_empty());
    }

    #[test]
    fn context_window_stays_within_bounds() {
        let text = "The quick brown fox jumps over the lazy dog";
        let window = context_window(text, 4, 9);
        assert!(text.contains(&window) || window.contains("quick"));
    }

    #[test]
    fn context_window_never_panics_near_edges() {
        let text = "short";
        let window = context_window(text, 0, 5);
        assert_eq!(window, "short");
    }
}
