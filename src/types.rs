//! Core data model: `Document`, `Chunk`, `Entity`, and the `Citation` sum type.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Source-position metadata on a chunk. Modeled as a tagged variant rather than an
/// untyped map so downstream code matches exhaustively instead of probing optional
/// fields on a dynamically-shaped record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Citation {
    /// Paginated source (PDF, docx). `pages` is the ordered, deduplicated set of page
    /// numbers the chunk's character interval overlaps.
    Page { pages: Vec<u32> },
    /// Audio/video source. `start`/`end` are seconds; `label` is a pre-formatted
    /// `MM:SS` or `HH:MM:SS` range for display.
    Time { start: f64, end: f64, label: String },
    /// No position metadata available for this source type.
    None,
}

impl Default for Citation {
    fn default() -> Self {
        Citation::None
    }
}

impl Citation {
    pub fn is_none(&self) -> bool {
        matches!(self, Citation::None)
    }

    pub fn page_range_label(&self) -> Option<String> {
        match self {
            Citation::Page { pages } if !pages.is_empty() => {
                let min = pages.iter().min().unwrap();
                let max = pages.iter().max().unwrap();
                if min == max {
                    Some(format!("p. {}", min))
                } else {
                    Some(format!("pp. {}-{}", min, max))
                }
            }
            _ => None,
        }
    }
}

/// Media type tag carried on a `Document`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Pdf,
    Docx,
    Image,
    Audio,
}

impl MediaType {
    pub fn is_paginated(&self) -> bool {
        matches!(self, MediaType::Pdf | MediaType::Docx)
    }
}

/// One ingested document. Owns its chunks; destroyed by explicit deletion, which
/// cascades to all owned chunks in both `VectorIndex` and `GraphStore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub media_type: MediaType,
    pub user_id: Option<String>,
    pub ingested_at: chrono::DateTime<chrono::Utc>,
    pub total_chunks: usize,
}

/// A bounded text segment, the unit of retrieval. Immutable after ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// `<doc-id>_chunk_<ordinal>`
    pub id: String,
    pub doc_id: String,
    pub chunk_index: u32,
    pub text: String,
    pub source: String,
    pub citation: Citation,
}

impl Chunk {
    pub fn make_id(doc_id: &str, ordinal: u32) -> String {
        format!("{}_chunk_{}", doc_id, ordinal)
    }
}

/// Closed NER tagset. Anything the model emits outside this set is mapped to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Person,
    Org,
    Gpe,
    Loc,
    Date,
    Time,
    Money,
    Percent,
    Product,
    Event,
    Law,
    Language,
    WorkOfArt,
    Norp,
    Fac,
    Ordinal,
    Cardinal,
    Other,
}

impl EntityType {
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_uppercase().as_str() {
            "PERSON" | "PER" => EntityType::Person,
            "ORG" => EntityType::Org,
            "GPE" => EntityType::Gpe,
            "LOC" => EntityType::Loc,
            "DATE" => EntityType::Date,
            "TIME" => EntityType::Time,
            "MONEY" => EntityType::Money,
            "PERCENT" => EntityType::Percent,
            "PRODUCT" => EntityType::Product,
            "EVENT" => EntityType::Event,
            "LAW" => EntityType::Law,
            "LANGUAGE" => EntityType::Language,
            "WORK_OF_ART" => EntityType::WorkOfArt,
            "NORP" => EntityType::Norp,
            "FAC" => EntityType::Fac,
            "ORDINAL" => EntityType::Ordinal,
            "CARDINAL" => EntityType::Cardinal,
            _ => EntityType::Other,
        }
    }
}

/// A single NER hit produced by `EntityExtractor`, before it is upserted into the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMention {
    pub text: String,
    pub entity_type: EntityType,
    pub start_char: usize,
    pub end_char: usize,
}

/// A retrieved chunk annotated with provenance and score, produced by the `Retriever`
/// and consumed by the `Pipeline`/`Evaluator`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f32,
    pub origin: RetrievalOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetrievalOrigin {
    Semantic,
    Graph,
    Both,
}

/// One message in a conversation history, used to condition multi-query expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

/// Ingestion input: the already-parsed payload handed to the pipeline by the external
/// parser (PDF/OCR/speech-to-text are out of scope here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub id: String,
    pub filename: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub user_id: Option<String>,
    pub chunk_data: Vec<IngestChunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestChunk {
    pub chunk_id: String,
    pub text: String,
    pub start_idx: usize,
    pub end_idx: usize,
    pub citation: Option<Citation>,
}

/// Query input per §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub doc_filter: Option<Vec<String>>,
    #[serde(default)]
    pub conversation_history: Option<Vec<HistoryTurn>>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// Query output envelope per §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub citations: Vec<CitationEntry>,
    pub sources: Vec<SourceEntry>,
    pub entities: Vec<EntitySummary>,
    pub strategy: String,
    pub query_type: Option<String>,
    pub evaluation: Option<EvaluationSummary>,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationEntry {
    pub text: String,
    pub source: String,
    pub doc_id: String,
    pub chunk_id: String,
    pub citation: Citation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySummary {
    pub name: String,
    pub entity_type: EntityType,
    pub mentions: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub overall_score: f32,
    pub quality_score: f32,
    pub completeness_score: f32,
    pub relevance_score: f32,
    pub attempts: u32,
}

/// Optional document-id / metadata scoping for a query, translated into a storage
/// predicate by `VectorIndex`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub doc_ids: Option<Vec<String>>,
}

impl MetadataFilter {
    /// True if `doc_id` passes this filter. An empty or absent `doc_ids` list matches
    /// everything.
    pub fn matches(&self, doc_id: &str) -> bool {
        match &self.doc_ids {
            Some(ids) if !ids.is_empty() => ids.iter().any(|id| id == doc_id),
            _ => true,
        }
    }
}

/// Flat key-value metadata bag for callers that don't need a typed predicate builder.
pub type MetadataMap = HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn citation_page_range_label() {
        let c = Citation::Page { pages: vec![3, 4] };
        assert_eq!(c.page_range_label(), Some("pp. 3-4".to_string()));

        let c = Citation::Page { pages: vec![5] };
        assert_eq!(c.page_range_label(), Some("p. 5".to_string()));

        assert_eq!(Citation::None.page_range_label(), None);
    }

    #[test]
    fn citation_serializes_as_tagged_variant() {
        let c = Citation::Time { start: 1.0, end: 4.5, label: "00:01-00:04".into() };
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["type"], "time");
        assert_eq!(json["start"], 1.0);
    }

    #[test]
    fn chunk_id_format() {
        assert_eq!(Chunk::make_id("doc123", 7), "doc123_chunk_7");
    }

    #[test]
    fn entity_type_unknown_tag_maps_to_other() {
        assert_eq!(EntityType::from_tag("MISC"), EntityType::Other);
        assert_eq!(EntityType::from_tag("person"), EntityType::Person);
    }

    #[test]
    fn metadata_filter_matches_doc_ids() {
        let f = MetadataFilter { doc_ids: Some(vec!["a".into(), "b".into()]) };
        assert!(f.matches("a"));
        assert!(!f.matches("c"));
        assert!(MetadataFilter::default().matches("anything"));
    }
}
