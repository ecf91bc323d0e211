//! Top-level query state machine: classify → route → (direct reply | clarify | retrieve
//! loop) → respond.
//!
//! Grounded on `graph_rag_v2.py::query`'s top-level control flow and
//! `evaluation_agent.py::get_retry_strategy`'s retry budget, including the
//! "no chunks anywhere" and "LLM unreachable" fallbacks its `except` clauses encode.

use crate::classifier::{self, QueryType, RouteDecision};
use crate::evaluator::{self, EvaluationScores};
use crate::graph_store::GraphStore;
use crate::llm_client::{ChatMessage, LLMClient};
use crate::multi_query;
use crate::retriever::Retriever;
use crate::types::{
    CitationEntry, EntitySummary, EvaluationSummary, HistoryTurn, MetadataFilter, QueryResponse, RetrievedChunk,
    SourceEntry,
};
use std::collections::HashSet;

const DEFAULT_CONTEXT_BUDGET: usize = 12_000;
const TRUNCATION_MARKER: &str = "\n\n[... context truncated ...]";

pub struct PipelineConfig {
    pub max_retries: u32,
    pub quality_threshold: f32,
    pub enable_multi_query: bool,
    pub enable_evaluation: bool,
    pub context_budget: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            quality_threshold: evaluator::DEFAULT_THRESHOLD,
            enable_multi_query: true,
            enable_evaluation: true,
            context_budget: DEFAULT_CONTEXT_BUDGET,
        }
    }
}

pub struct Pipeline<'a> {
    pub retriever: Retriever<'a>,
    pub graph_store: &'a GraphStore,
    pub llm: &'a LLMClient,
    pub config: PipelineConfig,
}

impl<'a> Pipeline<'a> {
    pub async fn run(
        &self,
        question: &str,
        doc_filter: Option<&MetadataFilter>,
        history: Option<&[HistoryTurn]>,
        top_k: usize,
        document_count: usize,
    ) -> QueryResponse {
        let query_type = classifier::classify(question);
        let route = classifier::route(question, document_count);

        match route.decision {
            RouteDecision::DirectReply => direct_reply(question, query_type, document_count),
            RouteDecision::Clarify => clarify(document_count),
            RouteDecision::Retrieve => self.retrieve_loop(question, query_type, doc_filter, history, top_k).await,
        }
    }

    async fn retrieve_loop(
        &self,
        question: &str,
        query_type: QueryType,
        doc_filter: Option<&MetadataFilter>,
        history: Option<&[HistoryTurn]>,
        top_k: usize,
    ) -> QueryResponse {
        let mut current_top_k = top_k.max(1);
        let mut best: Option<(String, Vec<RetrievedChunk>, Option<EvaluationScores>)> = None;
        let mut attempts = 0u32;

        for attempt in 0..=self.config.max_retries {
            attempts += 1;

            let queries = if self.config.enable_multi_query {
                multi_query::generate_queries(self.llm, question, history, 3).await
            } else {
                vec![question.to_string()]
            };

            let chunks = match self.retriever.retrieve(&queries, doc_filter, current_top_k) {
                Ok(chunks) => chunks,
                Err(e) => {
                    tracing::warn!("retrieval failed on attempt {attempt}: {e}");
                    Vec::new()
                }
            };

            if chunks.is_empty() && best.is_none() {
                if attempt == self.config.max_retries {
                    return no_information_response(attempts);
                }
                continue;
            }

            let entities = aggregate_entities(&chunks, self.graph_store);
            let context = assemble_context(&chunks, &entities, query_type, self.config.context_budget);
            let answer = self.generate_answer(question, &context, query_type, &chunks).await;

            let evaluation = if self.config.enable_evaluation {
                Some(evaluator::evaluate(self.llm, question, &answer, &chunks, self.config.quality_threshold).await)
            } else {
                None
            };

            let is_better = match (&best, &evaluation) {
                (None, _) => true,
                (Some((_, _, None)), _) => true,
                (Some((_, _, Some(prev))), Some(cur)) => cur.overall > prev.overall,
                (Some((_, _, Some(_))), None) => false,
            };
            if is_better {
                best = Some((answer, chunks, evaluation.clone()));
            }

            let sufficient = evaluation.as_ref().map(|e| e.is_sufficient).unwrap_or(true);
            if sufficient {
                break;
            }

            if let Some(scores) = &evaluation {
                let prescription = evaluator::retry_prescription(scores);
                current_top_k = current_top_k.max(prescription.increase_top_k);
            }
        }

        let (answer, chunks, evaluation) = best.unwrap_or_else(|| (stock_no_information_answer(), Vec::new(), None));
        shape_response(answer, chunks, query_type, evaluation, attempts, self.graph_store)
    }

    async fn generate_answer(&self, question: &str, context: &str, query_type: QueryType, chunks: &[RetrievedChunk]) -> String {
        let system_prompt = system_prompt_for(query_type);
        let user_prompt = format!("Context:\n{context}\n\nQuestion: {question}\n\nAnswer:");
        let messages = vec![
            ChatMessage { role: "system".to_string(), content: system_prompt },
            ChatMessage { role: "user".to_string(), content: user_prompt },
        ];

        match self.llm.chat(&messages, 0.3, 500).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!("LLM generation failed, using deterministic fallback: {e}");
                let top_text = chunks.first().map(|c| c.chunk.text.as_str()).unwrap_or("");
                LLMClient::fallback_answer(top_text)
            }
        }
    }
}

fn system_prompt_for(query_type: QueryType) -> String {
    match query_type {
        QueryType::Summary => "Summarize the provided document excerpts concisely and accurately.".to_string(),
        QueryType::Entity => "Answer using the entity list and document excerpts provided; name specific people, organizations, and places.".to_string(),
        QueryType::Date => "Answer with specific dates and chronological order using only the provided excerpts.".to_string(),
        _ => "Answer the question using only the provided document excerpts. If the excerpts don't contain the answer, say so.".to_string(),
    }
}

/// Per-chunk `[source]: text` lines, an entity-group summary when entities are
/// available, truncated to `budget` chars with a visible marker.
fn assemble_context(chunks: &[RetrievedChunk], entities: &[EntitySummary], query_type: QueryType, budget: usize) -> String {
    let chunk_lines: Vec<String> = chunks.iter().map(|c| format!("[{}]: {}", c.chunk.source, c.chunk.text)).collect();
    let chunk_context = chunk_lines.join("\n\n");

    let mut context = if query_type == QueryType::Entity && chunks.len() > 3 {
        let preview: Vec<String> = chunk_lines.iter().take(3).cloned().collect();
        preview.join("\n\n")
    } else {
        chunk_context
    };

    if let Some(summary) = entity_summary_line(entities) {
        context.push_str("\n\n");
        context.push_str(&summary);
    }

    if context.len() > budget {
        let boundary = snap_to_char_boundary(&context, budget);
        context.truncate(boundary);
        context.push_str(TRUNCATION_MARKER);
    }
    context
}

/// Aggregates mention counts for every entity attached to any document `chunks`
/// draws from, not just the entities mentioned in the chunk text itself — same
/// rule `shape_response` uses for the response envelope's `entities` field.
fn aggregate_entities(chunks: &[RetrievedChunk], graph_store: &GraphStore) -> Vec<EntitySummary> {
    let mut doc_ids: Vec<&str> = chunks.iter().map(|c| c.chunk.doc_id.as_str()).collect();
    doc_ids.sort_unstable();
    doc_ids.dedup();

    let mut entity_map: std::collections::HashMap<(String, crate::types::EntityType), u32> = std::collections::HashMap::new();
    for doc_id in doc_ids {
        for agg in graph_store.document_entities(doc_id) {
            let entry = entity_map.entry((agg.name, agg.entity_type)).or_insert(0);
            *entry += agg.mentions;
        }
    }
    entity_map
        .into_iter()
        .map(|((name, entity_type), mentions)| EntitySummary { name, entity_type, mentions })
        .collect()
}

/// "Entities mentioned: A (Person, 3), B (Org, 1)" — `None` when nothing was aggregated.
fn entity_summary_line(entities: &[EntitySummary]) -> Option<String> {
    if entities.is_empty() {
        return None;
    }
    let mut sorted: Vec<&EntitySummary> = entities.iter().collect();
    sorted.sort_unstable_by(|a, b| b.mentions.cmp(&a.mentions).then_with(|| a.name.cmp(&b.name)));
    let parts: Vec<String> = sorted.iter().map(|e| format!("{} ({:?}, {} mentions)", e.name, e.entity_type, e.mentions)).collect();
    Some(format!("Entities mentioned: {}", parts.join(", ")))
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

fn direct_reply(question: &str, _query_type: QueryType, document_count: usize) -> QueryResponse {
    let lowered = question.trim().to_lowercase();
    let answer = if ["hi", "hello", "hey", "greetings"].iter().any(|g| lowered.contains(g)) {
        format!("Hello! I'm your document analysis assistant. You have {document_count} document(s) uploaded. How can I help you today?")
    } else if lowered.contains("what can you") || lowered.contains("what do you") {
        "I can help you analyze your uploaded documents: answer questions, list key people and organizations, identify key dates and events, and provide summaries.".to_string()
    } else if lowered.contains("who are you") || lowered.contains("what are you") {
        "I'm an AI assistant that helps you understand and analyze your documents using hybrid retrieval over a knowledge graph.".to_string()
    } else if ["thanks", "thank you", "ok", "okay", "got it", "understood"].contains(&lowered.as_str()) {
        "You're welcome! Feel free to ask me anything else.".to_string()
    } else {
        "I'm here to help! Please ask me a question about your documents.".to_string()
    };

    QueryResponse {
        answer,
        citations: Vec::new(),
        sources: Vec::new(),
        entities: Vec::new(),
        strategy: "direct_reply".to_string(),
        query_type: None,
        evaluation: None,
        attempts: 1,
    }
}

fn clarify(document_count: usize) -> QueryResponse {
    let answer = format!(
        "Your question is a bit vague. To help you better, could you be more specific?\n\nYou have {document_count} document(s) available. You can ask me about:\n- Specific people or organizations\n- Key dates and events\n- Particular topics or concepts\n- Document summaries"
    );
    QueryResponse {
        answer,
        citations: Vec::new(),
        sources: Vec::new(),
        entities: Vec::new(),
        strategy: "clarify".to_string(),
        query_type: None,
        evaluation: None,
        attempts: 1,
    }
}

fn no_information_response(attempts: u32) -> QueryResponse {
    QueryResponse {
        answer: stock_no_information_answer(),
        citations: Vec::new(),
        sources: Vec::new(),
        entities: Vec::new(),
        strategy: "retrieve".to_string(),
        query_type: None,
        evaluation: None,
        attempts,
    }
}

fn stock_no_information_answer() -> String {
    "I couldn't find relevant information in the documents. Try rephrasing your question.".to_string()
}

fn shape_response(
    answer: String,
    chunks: Vec<RetrievedChunk>,
    query_type: QueryType,
    evaluation: Option<EvaluationScores>,
    attempts: u32,
    graph_store: &GraphStore,
) -> QueryResponse {
    let citations: Vec<CitationEntry> = chunks
        .iter()
        .map(|c| CitationEntry {
            text: c.chunk.text.clone(),
            source: c.chunk.source.clone(),
            doc_id: c.chunk.doc_id.clone(),
            chunk_id: c.chunk.id.clone(),
            citation: c.chunk.citation.clone(),
        })
        .collect();

    let mut seen_sources = HashSet::new();
    let sources: Vec<SourceEntry> = chunks
        .iter()
        .filter(|c| seen_sources.insert(c.chunk.source.clone()))
        .map(|c| SourceEntry { filename: c.chunk.source.clone() })
        .collect();

    let entities = aggregate_entities(&chunks, graph_store);

    let evaluation_summary = evaluation.map(|e| EvaluationSummary {
        overall_score: e.overall,
        quality_score: e.quality,
        completeness_score: e.completeness,
        relevance_score: e.relevance,
        attempts,
    });

    QueryResponse {
        answer,
        citations,
        sources,
        entities,
        strategy: "retrieve".to_string(),
        query_type: Some(query_type.as_str().to_string()),
        evaluation: evaluation_summary,
        attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, Citation};

    fn sample_chunk(source: &str, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk {
                id: "c1".to_string(),
                doc_id: "d1".to_string(),
                chunk_index: 0,
                text: text.to_string(),
                source: source.to_string(),
                citation: Citation::None,
            },
            score: 0.9,
            origin: crate::types::RetrievalOrigin::Semantic,
        }
    }

    #[test]
    fn assemble_context_formats_source_lines() {
        let chunks = vec![sample_chunk("doc1.pdf", "hello world")];
        let context = assemble_context(&chunks, &[], QueryType::General, 12_000);
        assert_eq!(context, "[doc1.pdf]: hello world");
    }

    #[test]
    fn assemble_context_truncates_with_marker() {
        let chunks = vec![sample_chunk("doc1.pdf", &"x".repeat(100))];
        let context = assemble_context(&chunks, &[], QueryType::General, 20);
        assert!(context.ends_with(TRUNCATION_MARKER));
        assert!(context.len() < 150);
    }

    #[test]
    fn assemble_context_appends_entity_summary() {
        let chunks = vec![sample_chunk("doc1.pdf", "hello world")];
        let entities = vec![EntitySummary { name: "Marie Curie".to_string(), entity_type: crate::types::EntityType::Person, mentions: 2 }];
        let context = assemble_context(&chunks, &entities, QueryType::General, 12_000);
        assert!(context.contains("Entities mentioned:"));
        assert!(context.contains("Marie Curie"));
    }

    #[test]
    fn direct_reply_greeting_mentions_document_count() {
        let response = direct_reply("hi", QueryType::General, 3);
        assert!(response.answer.contains('3'));
        assert_eq!(response.strategy, "direct_reply");
    }

    #[test]
    fn clarify_lists_document_count() {
        let response = clarify(5);
        assert!(response.answer.contains('5'));
        assert_eq!(response.strategy, "clarify");
    }

    #[test]
    fn no_information_response_has_empty_citations() {
        let response = no_information_response(1);
        assert!(response.citations.is_empty());
        assert_eq!(response.strategy, "retrieve");
    }
}
