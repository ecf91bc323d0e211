//! In-process labeled-property graph: `Document ─CONTAINS→ Chunk ─MENTIONS→ Entity`.
//!
//! Petgraph-backed, following this crate's `graph/knowledge_graph.rs`, generalized to
//! the full three-tier schema with mention counters and orphan-cleanup deletion.
//! Persists to a flat JSON file after every mutating call; there is no live network
//! dependency here (see SPEC_FULL.md's "Graph wire contract" note).

use crate::error::{RagError, Result};
use crate::types::{Chunk, Document, EntityType};
use parking_lot::Mutex;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum GraphNode {
    Document(Document),
    Chunk(Chunk),
    Entity { name: String, entity_type: EntityType, mention_count: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum GraphEdge {
    Contains,
    Mentions { context: String },
}

#[derive(Default)]
struct Locks {
    per_doc: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

pub struct GraphStore {
    graph: Mutex<DiGraph<GraphNode, GraphEdge>>,
    doc_node: Mutex<HashMap<String, NodeIndex>>,
    chunk_node: Mutex<HashMap<String, NodeIndex>>,
    entity_node: Mutex<HashMap<(String, EntityType), NodeIndex>>,
    locks: Locks,
    persist_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GraphStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub entity_count: usize,
    pub mention_edge_count: usize,
}

/// Aggregated entity with its document-scoped mention count, returned by `document_entities`.
#[derive(Debug, Clone)]
pub struct EntityAggregate {
    pub name: String,
    pub entity_type: EntityType,
    pub mentions: u32,
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            graph: Mutex::new(DiGraph::new()),
            doc_node: Mutex::new(HashMap::new()),
            chunk_node: Mutex::new(HashMap::new()),
            entity_node: Mutex::new(HashMap::new()),
            locks: Locks::default(),
            persist_path: None,
        }
    }

    /// Load from `<storage_root>/graph_store.json` if present, otherwise start empty.
    pub fn open(storage_root: &Path) -> Result<Self> {
        std::fs::create_dir_all(storage_root)
            .map_err(|e| RagError::internal(format!("failed to create storage root: {e}")))?;
        let path = storage_root.join("graph_store.json");
        if !path.exists() {
            let mut store = Self::new();
            store.persist_path = Some(path);
            return Ok(store);
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| RagError::internal(format!("failed to read graph store: {e}")))?;
        let snapshot: Snapshot = serde_json::from_str(&content)
            .map_err(|e| RagError::internal(format!("failed to parse graph store: {e}")))?;
        let mut store = Self::new();
        store.persist_path = Some(path);
        store.restore(snapshot);
        Ok(store)
    }

    fn restore(&mut self, snapshot: Snapshot) {
        let mut graph = self.graph.lock();
        let mut idx_map = HashMap::new();
        for (old_idx, node) in snapshot.nodes {
            let new_idx = graph.add_node(node.clone());
            idx_map.insert(old_idx, new_idx);
            match node {
                GraphNode::Document(doc) => {
                    self.doc_node.lock().insert(doc.id, new_idx);
                }
                GraphNode::Chunk(chunk) => {
                    self.chunk_node.lock().insert(chunk.id, new_idx);
                }
                GraphNode::Entity { name, entity_type, .. } => {
                    self.entity_node.lock().insert((name, entity_type), new_idx);
                }
            }
        }
        for (from, to, edge) in snapshot.edges {
            if let (Some(&f), Some(&t)) = (idx_map.get(&from), idx_map.get(&to)) {
                graph.add_edge(f, t, edge);
            }
        }
    }

    fn persist(&self) {
        let Some(path) = &self.persist_path else { return };
        let graph = self.graph.lock();
        let nodes: Vec<(usize, GraphNode)> =
            graph.node_indices().map(|i| (i.index(), graph[i].clone())).collect();
        let edges: Vec<(usize, usize, GraphEdge)> = graph
            .edge_indices()
            .map(|e| {
                let (s, t) = graph.edge_endpoints(e).unwrap();
                (s.index(), t.index(), graph[e].clone())
            })
            .collect();
        drop(graph);
        let snapshot = Snapshot { nodes, edges };
        match serde_json::to_string(&snapshot) {
            Ok(json) => {
                let tmp = path.with_extension("json.tmp");
                if let Err(e) = std::fs::write(&tmp, &json).and_then(|_| std::fs::rename(&tmp, path)) {
                    tracing::warn!("failed to persist graph store: {e}");
                }
            }
            Err(e) => tracing::warn!("failed to serialize graph store: {e}"),
        }
    }

    /// Serializes writes per document id: two ingestions of the same document must
    /// not race each other.
    fn with_doc_lock<T>(&self, doc_id: &str, f: impl FnOnce() -> T) -> T {
        let doc_mutex = {
            let mut locks = self.locks.per_doc.lock();
            locks.entry(doc_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        let _guard = doc_mutex.lock();
        f()
    }

    /// Upsert a document node and its chunks, linked by `CONTAINS`.
    pub fn add_document(&self, doc: &Document, chunks: &[Chunk]) {
        self.with_doc_lock(&doc.id, || {
            let mut graph = self.graph.lock();
            let doc_idx = {
                let mut doc_node = self.doc_node.lock();
                match doc_node.get(&doc.id) {
                    Some(&idx) => {
                        if let Some(GraphNode::Document(existing)) = graph.node_weight_mut(idx) {
                            *existing = doc.clone();
                        }
                        idx
                    }
                    None => {
                        let idx = graph.add_node(GraphNode::Document(doc.clone()));
                        doc_node.insert(doc.id.clone(), idx);
                        idx
                    }
                }
            };

            for chunk in chunks {
                let chunk_idx = {
                    let mut chunk_node = self.chunk_node.lock();
                    *chunk_node
                        .entry(chunk.id.clone())
                        .or_insert_with(|| graph.add_node(GraphNode::Chunk(chunk.clone())))
                };
                graph.add_edge(doc_idx, chunk_idx, GraphEdge::Contains);
            }
        });
        self.persist();
    }

    /// Upsert `(name, type)` entity and MERGE a `MENTIONS` edge from `chunk_id`,
    /// incrementing the mention counter. `context` is truncated to 500 chars.
    pub fn add_entity(&self, chunk_id: &str, name: &str, entity_type: EntityType, context: &str) -> Result<()> {
        let context: String = context.chars().take(500).collect();
        let mut graph = self.graph.lock();
        let chunk_idx = *self
            .chunk_node
            .lock()
            .get(chunk_id)
            .ok_or_else(|| RagError::inconsistency(format!("chunk {chunk_id} not found for entity add")))?;

        let entity_idx = {
            let mut entity_node = self.entity_node.lock();
            let key = (name.to_string(), entity_type);
            if let Some(&idx) = entity_node.get(&key) {
                idx
            } else {
                let idx = graph.add_node(GraphNode::Entity {
                    name: name.to_string(),
                    entity_type,
                    mention_count: 0,
                });
                entity_node.insert(key, idx);
                idx
            }
        };

        graph.add_edge(chunk_idx, entity_idx, GraphEdge::Mentions { context });
        if let Some(GraphNode::Entity { mention_count, .. }) = graph.node_weight_mut(entity_idx) {
            *mention_count += 1;
        }
        drop(graph);
        self.persist();
        Ok(())
    }

    /// Seed from entities whose name occurs (case-insensitive substring) in
    /// `query_text`, collect their mentioning chunks, then expand by same-document
    /// neighbors up to `max_depth` hops and `max_nodes` total. A text match, not a
    /// semantic one: this store has no embedding capability of its own.
    pub fn traversal_retrieve(
        &self,
        query_text: &str,
        doc_filter: Option<&[String]>,
        max_depth: usize,
        max_nodes: usize,
    ) -> Vec<Chunk> {
        let query_lower = query_text.to_lowercase();
        let seed_chunk_ids = {
            let graph = self.graph.lock();
            let entity_node = self.entity_node.lock();
            let mut seeds = Vec::new();
            for ((name, _), &entity_idx) in entity_node.iter() {
                if name.len() < 3 || !query_lower.contains(&name.to_lowercase()) {
                    continue;
                }
                for edge in graph.edges_directed(entity_idx, Direction::Incoming) {
                    if !matches!(edge.weight(), GraphEdge::Mentions { .. }) {
                        continue;
                    }
                    if let Some(GraphNode::Chunk(chunk)) = graph.node_weight(edge.source()) {
                        seeds.push(chunk.id.clone());
                    }
                }
            }
            seeds
        };
        self.expand_from_chunks(&seed_chunk_ids, doc_filter, max_depth, max_nodes)
    }

    /// BFS expansion from an explicit seed chunk id set along same-document neighbors.
    pub fn expand_from_chunks(
        &self,
        seed_chunk_ids: &[String],
        doc_filter: Option<&[String]>,
        max_depth: usize,
        max_nodes: usize,
    ) -> Vec<Chunk> {
        let graph = self.graph.lock();
        let chunk_node = self.chunk_node.lock();

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut results = Vec::new();

        for id in seed_chunk_ids {
            if let Some(&idx) = chunk_node.get(id) {
                queue.push_back((idx, 0usize));
                visited.insert(idx);
            }
        }

        while let Some((idx, depth)) = queue.pop_front() {
            if results.len() >= max_nodes {
                break;
            }
            let Some(GraphNode::Chunk(chunk)) = graph.node_weight(idx) else {
                continue;
            };
            if let Some(filter) = doc_filter {
                if !filter.is_empty() && !filter.contains(&chunk.doc_id) {
                    continue;
                }
            }
            results.push(chunk.clone());

            if depth >= max_depth {
                continue;
            }
            // same-document neighbors: chunk -> doc (incoming CONTAINS) -> sibling chunks
            for doc_edge in graph.edges_directed(idx, Direction::Incoming) {
                if !matches!(doc_edge.weight(), GraphEdge::Contains) {
                    continue;
                }
                let doc_idx = doc_edge.source();
                for sibling_edge in graph.edges_directed(doc_idx, Direction::Outgoing) {
                    if !matches!(sibling_edge.weight(), GraphEdge::Contains) {
                        continue;
                    }
                    let sibling = sibling_edge.target();
                    if !visited.contains(&sibling) {
                        visited.insert(sibling);
                        queue.push_back((sibling, depth + 1));
                    }
                }
            }
        }

        results
    }

    /// Best-effort, non-semantic complement to vector search: returns up to `limit`
    /// chunks scoped by `doc_filter` (the request's own document scope, per §4.4's
    /// signature — not whatever documents happen to already be in the caller's merged
    /// result set), preferring chunks whose text contains a token of `query_text` over
    /// others. Not a similarity search — see Open Question 3. Time-bounded: retries up
    /// to twice with a halved `limit` if the scan takes longer than `timeout`, then
    /// gives up and returns whatever it has.
    pub fn query_similar_chunks(
        &self,
        query_text: &str,
        doc_filter: Option<&[String]>,
        exclude_ids: &HashSet<String>,
        limit: usize,
        timeout: std::time::Duration,
    ) -> Vec<Chunk> {
        let mut attempt_limit = limit;
        for attempt in 0..3 {
            let start = std::time::Instant::now();
            let results = self.scan_similar(query_text, doc_filter, exclude_ids, attempt_limit);
            if start.elapsed() <= timeout || attempt == 2 {
                return results;
            }
            tracing::warn!("query_similar_chunks exceeded {:?}, retrying with halved limit", timeout);
            attempt_limit = (attempt_limit / 2).max(1);
        }
        Vec::new()
    }

    fn scan_similar(
        &self,
        query_text: &str,
        doc_filter: Option<&[String]>,
        exclude_ids: &HashSet<String>,
        limit: usize,
    ) -> Vec<Chunk> {
        let graph = self.graph.lock();

        let query_tokens: Vec<String> =
            query_text.to_lowercase().split_whitespace().filter(|t| t.len() >= 3).map(String::from).collect();

        let mut matched = Vec::new();
        let mut unmatched = Vec::new();
        for idx in graph.node_indices() {
            let Some(GraphNode::Chunk(chunk)) = graph.node_weight(idx) else { continue };
            if let Some(filter) = doc_filter {
                if !filter.is_empty() && !filter.contains(&chunk.doc_id) {
                    continue;
                }
            }
            if exclude_ids.contains(&chunk.id) {
                continue;
            }
            if !query_tokens.is_empty() {
                let text_lower = chunk.text.to_lowercase();
                if query_tokens.iter().any(|t| text_lower.contains(t.as_str())) {
                    matched.push(chunk.clone());
                    continue;
                }
            }
            unmatched.push(chunk.clone());
        }

        matched.into_iter().chain(unmatched).take(limit).collect()
    }

    /// All entities reachable via `CONTAINS`→`MENTIONS` from `doc_id`, aggregated with
    /// mention counts scoped to this document, ordered by count descending.
    pub fn document_entities(&self, doc_id: &str) -> Vec<EntityAggregate> {
        let graph = self.graph.lock();
        let Some(&doc_idx) = self.doc_node.lock().get(doc_id) else {
            return Vec::new();
        };

        let mut counts: HashMap<(String, EntityType), u32> = HashMap::new();
        for chunk_edge in graph.edges_directed(doc_idx, Direction::Outgoing) {
            if !matches!(chunk_edge.weight(), GraphEdge::Contains) {
                continue;
            }
            let chunk_idx = chunk_edge.target();
            for mention_edge in graph.edges_directed(chunk_idx, Direction::Outgoing) {
                if !matches!(mention_edge.weight(), GraphEdge::Mentions { .. }) {
                    continue;
                }
                if let Some(GraphNode::Entity { name, entity_type, .. }) = graph.node_weight(mention_edge.target()) {
                    *counts.entry((name.clone(), *entity_type)).or_insert(0) += 1;
                }
            }
        }

        let mut aggregates: Vec<EntityAggregate> = counts
            .into_iter()
            .map(|((name, entity_type), mentions)| EntityAggregate { name, entity_type, mentions })
            .collect();
        aggregates.sort_by(|a, b| b.mentions.cmp(&a.mentions));
        aggregates
    }

    /// Identify entities mentioned only by this document's chunks, detach-delete the
    /// document and its chunks, then delete the orphan entities. Idempotent.
    pub fn delete_document(&self, doc_id: &str) {
        self.with_doc_lock(doc_id, || {
            let mut graph = self.graph.lock();
            let mut doc_node = self.doc_node.lock();
            let Some(doc_idx) = doc_node.remove(doc_id) else { return };

            let chunk_idxs: Vec<NodeIndex> = graph
                .edges_directed(doc_idx, Direction::Outgoing)
                .filter(|e| matches!(e.weight(), GraphEdge::Contains))
                .map(|e| e.target())
                .collect();

            // Phase 1: find entities exclusively referenced by this document's chunks.
            let mut candidate_entities: HashSet<NodeIndex> = HashSet::new();
            for &chunk_idx in &chunk_idxs {
                for e in graph.edges_directed(chunk_idx, Direction::Outgoing) {
                    if matches!(e.weight(), GraphEdge::Mentions { .. }) {
                        candidate_entities.insert(e.target());
                    }
                }
            }

            let mut orphans = Vec::new();
            for &entity_idx in &candidate_entities {
                let mentioned_outside = graph
                    .edges_directed(entity_idx, Direction::Incoming)
                    .filter(|e| matches!(e.weight(), GraphEdge::Mentions { .. }))
                    .any(|e| !chunk_idxs.contains(&e.source()));
                if !mentioned_outside {
                    orphans.push(entity_idx);
                }
            }

            // Phase 2: detach-delete document + chunks, then the orphan entities.
            // Decrement mention counters on entities that stay but lose some edges.
            for &chunk_idx in &chunk_idxs {
                let mentioned: Vec<NodeIndex> = graph
                    .edges_directed(chunk_idx, Direction::Outgoing)
                    .filter(|e| matches!(e.weight(), GraphEdge::Mentions { .. }))
                    .map(|e| e.target())
                    .collect();
                for entity_idx in mentioned {
                    if !orphans.contains(&entity_idx) {
                        if let Some(GraphNode::Entity { mention_count, .. }) = graph.node_weight_mut(entity_idx) {
                            *mention_count = mention_count.saturating_sub(1);
                        }
                    }
                }
                if let Some(GraphNode::Chunk(chunk)) = graph.node_weight(chunk_idx) {
                    self.chunk_node.lock().remove(&chunk.id);
                }
                graph.remove_node(chunk_idx);
            }
            graph.remove_node(doc_idx);

            let mut entity_node = self.entity_node.lock();
            for entity_idx in orphans {
                if let Some(GraphNode::Entity { name, entity_type, .. }) = graph.node_weight(entity_idx) {
                    entity_node.remove(&(name.clone(), *entity_type));
                }
                graph.remove_node(entity_idx);
            }
        });
        self.persist();
    }

    pub fn stats(&self) -> GraphStats {
        let graph = self.graph.lock();
        let mut stats = GraphStats::default();
        for idx in graph.node_indices() {
            match graph.node_weight(idx) {
                Some(GraphNode::Document(_)) => stats.document_count += 1,
                Some(GraphNode::Chunk(_)) => stats.chunk_count += 1,
                Some(GraphNode::Entity { .. }) => stats.entity_count += 1,
                None => {}
            }
        }
        stats.mention_edge_count =
            graph.edge_indices().filter(|&e| matches!(graph[e], GraphEdge::Mentions { .. })).count();
        stats
    }

    pub fn chunks_for_document(&self, doc_id: &str) -> Vec<String> {
        let graph = self.graph.lock();
        let Some(&doc_idx) = self.doc_node.lock().get(doc_id) else {
            return Vec::new();
        };
        graph
            .edges_directed(doc_idx, Direction::Outgoing)
            .filter(|e| matches!(e.weight(), GraphEdge::Contains))
            .filter_map(|e| match graph.node_weight(e.target()) {
                Some(GraphNode::Chunk(chunk)) => Some(chunk.id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Look up a chunk by id, for citation-validity checks (§8 invariant 3).
    pub fn get_chunk(&self, chunk_id: &str) -> Option<Chunk> {
        let graph = self.graph.lock();
        let idx = *self.chunk_node.lock().get(chunk_id)?;
        match graph.node_weight(idx) {
            Some(GraphNode::Chunk(chunk)) => Some(chunk.clone()),
            _ => None,
        }
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    nodes: Vec<(usize, GraphNode)>,
    edges: Vec<(usize, usize, GraphEdge)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Citation, MediaType};

    fn sample_doc(id: &str) -> Document {
        Document {
            id: id.to_string(),
            filename: format!("{id}.pdf"),
            media_type: MediaType::Pdf,
            user_id: None,
            ingested_at: chrono::Utc::now(),
            total_chunks: 0,
        }
    }

    fn sample_chunks(doc_id: &str, n: usize) -> Vec<Chunk> {
        (0..n)
            .map(|i| Chunk {
                id: Chunk::make_id(doc_id, i as u32),
                doc_id: doc_id.to_string(),
                chunk_index: i as u32,
                text: format!("text {i}"),
                source: format!("{doc_id}.pdf"),
                citation: Citation::None,
            })
            .collect()
    }

    #[test]
    fn add_document_and_entity_roundtrip() {
        let store = GraphStore::new();
        let chunks = sample_chunks("doc1", 2);
        store.add_document(&sample_doc("doc1"), &chunks);
        store.add_entity("doc1_chunk_0", "Marie Curie", EntityType::Person, "context").unwrap();

        let stats = store.stats();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.chunk_count, 2);
        assert_eq!(stats.entity_count, 1);
        assert_eq!(stats.mention_edge_count, 1);
    }

    #[test]
    fn mention_counter_increments_on_repeat_observation() {
        let store = GraphStore::new();
        store.add_document(&sample_doc("doc1"), &sample_chunks("doc1", 1));
        store.add_entity("doc1_chunk_0", "Paris", EntityType::Gpe, "ctx1").unwrap();
        store.add_entity("doc1_chunk_0", "Paris", EntityType::Gpe, "ctx2").unwrap();

        let ents = store.document_entities("doc1");
        assert_eq!(ents.len(), 1);
        assert_eq!(ents[0].mentions, 2);
    }

    #[test]
    fn delete_document_removes_exclusive_entities_but_keeps_shared() {
        let store = GraphStore::new();
        store.add_document(&sample_doc("doc1"), &sample_chunks("doc1", 1));
        store.add_document(&sample_doc("doc2"), &sample_chunks("doc2", 1));
        store.add_entity("doc1_chunk_0", "ExclusiveOrg", EntityType::Org, "c").unwrap();
        store.add_entity("doc1_chunk_0", "SharedOrg", EntityType::Org, "c").unwrap();
        store.add_entity("doc2_chunk_0", "SharedOrg", EntityType::Org, "c").unwrap();

        store.delete_document("doc1");

        let stats = store.stats();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.chunk_count, 1);
        assert_eq!(stats.entity_count, 1);

        let remaining = store.document_entities("doc2");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "SharedOrg");
        assert_eq!(remaining[0].mentions, 1);
    }

    #[test]
    fn delete_document_is_idempotent() {
        let store = GraphStore::new();
        store.add_document(&sample_doc("doc1"), &sample_chunks("doc1", 1));
        store.delete_document("doc1");
        store.delete_document("doc1");
        assert_eq!(store.stats().document_count, 0);
    }

    #[test]
    fn expand_from_chunks_reaches_sibling_chunks() {
        let store = GraphStore::new();
        store.add_document(&sample_doc("doc1"), &sample_chunks("doc1", 3));

        let results = store.expand_from_chunks(&["doc1_chunk_0".to_string()], None, 1, 15);
        let ids: HashSet<_> = results.iter().map(|c| c.id.clone()).collect();
        assert!(ids.contains("doc1_chunk_0"));
        assert!(ids.contains("doc1_chunk_1"));
        assert!(ids.contains("doc1_chunk_2"));
    }

    #[test]
    fn expand_from_chunks_respects_doc_filter() {
        let store = GraphStore::new();
        store.add_document(&sample_doc("doc1"), &sample_chunks("doc1", 2));
        store.add_document(&sample_doc("doc2"), &sample_chunks("doc2", 2));

        let filter = vec!["doc1".to_string()];
        let results = store.expand_from_chunks(&["doc1_chunk_0".to_string()], Some(&filter), 2, 15);
        assert!(results.iter().all(|c| c.doc_id == "doc1"));
    }

    #[test]
    fn traversal_retrieve_seeds_from_entity_name_match() {
        let store = GraphStore::new();
        store.add_document(&sample_doc("doc1"), &sample_chunks("doc1", 2));
        store.add_entity("doc1_chunk_1", "Marie Curie", EntityType::Person, "ctx").unwrap();

        let results = store.traversal_retrieve("tell me about Marie Curie", None, 1, 15);
        let ids: HashSet<_> = results.iter().map(|c| c.id.clone()).collect();
        assert!(ids.contains("doc1_chunk_1"));
    }

    #[test]
    fn query_similar_chunks_excludes_already_seen() {
        let store = GraphStore::new();
        store.add_document(&sample_doc("doc1"), &sample_chunks("doc1", 3));
        let mut exclude = HashSet::new();
        exclude.insert("doc1_chunk_0".to_string());
        let results = store.query_similar_chunks(
            "Marie Curie",
            None,
            &exclude,
            10,
            std::time::Duration::from_secs(1),
        );
        assert!(results.iter().all(|c| c.id != "doc1_chunk_0"));
    }

    #[test]
    fn query_similar_chunks_reaches_doc_filter_beyond_seen_documents() {
        let store = GraphStore::new();
        store.add_document(&sample_doc("doc1"), &sample_chunks("doc1", 2));
        store.add_document(&sample_doc("doc2"), &sample_chunks("doc2", 2));

        let filter = vec!["doc1".to_string(), "doc2".to_string()];
        let exclude = HashSet::new();
        let results = store.query_similar_chunks("chunk text", Some(&filter), &exclude, 10, std::time::Duration::from_secs(1));
        let doc_ids: HashSet<_> = results.iter().map(|c| c.doc_id.clone()).collect();
        assert!(doc_ids.contains("doc2"), "doc_filter should surface doc2 even though no doc2 chunk was seen yet");
    }

    #[test]
    fn get_chunk_roundtrips() {
        let store = GraphStore::new();
        store.add_document(&sample_doc("doc1"), &sample_chunks("doc1", 1));
        assert!(store.get_chunk("doc1_chunk_0").is_some());
        assert!(store.get_chunk("nonexistent").is_none());
    }
}
