//! Rule-based query classification and routing.
//!
//! Grounded on `graph_rag_v2.py::_classify_query`/`_determine_query_strategy`: ordered
//! keyword sets, first match wins, lowercase-and-trim normalization. The ordered,
//! first-match-wins shape also mirrors this crate's retrieval-decision intent
//! classifier.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    DocumentList,
    Summary,
    Fact,
    Entity,
    Date,
    General,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::DocumentList => "document_list",
            QueryType::Summary => "summary",
            QueryType::Fact => "fact",
            QueryType::Entity => "entity",
            QueryType::Date => "date",
            QueryType::General => "general",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    DirectReply,
    Clarify,
    Retrieve,
}

/// A routing or classification result with its matched rule, for diagnostics.
#[derive(Debug, Clone)]
pub struct RouteResult {
    pub decision: RouteDecision,
    pub matched_rule: String,
}

const DOC_LIST_PATTERNS: &[&str] = &[
    "what documents", "what files", "list documents", "list files", "show documents",
    "show files", "which documents", "which files", "document names", "file names",
    "what do i have", "what have i uploaded", "my documents", "my files",
];

const ENTITY_PATTERNS: &[&str] = &[
    "who is", "who are", "who was", "who were", "key people", "people mentioned",
    "main people", "authors", "researchers", "scientists", "organizations", "companies",
    "key players", "stakeholders", "list all people", "list people", "names mentioned",
    "participants",
];

const DATE_PATTERNS: &[&str] = &[
    "key dates", "key events", "timeline", "chronology", "when did", "when was",
    "when were", "what year", "what date", "time period", "milestones",
    "important dates", "significant events", "historical events",
];

const SUMMARY_PATTERNS: &[&str] = &["summary", "summarize", "overview", "main points", "key findings"];

const FACT_PATTERNS: &[&str] = &["what is", "what was", "what are", "how many", "how much", "define"];

const GREETINGS: &[&str] = &["hi", "hello", "hey", "greetings"];
const GREETING_PHRASES: &[&str] = &["hi!", "hello!", "hey!", "hey there", "hi there", "hello there"];
const META_PATTERNS: &[&str] =
    &["what can you", "what do you", "who are you", "what are you", "how do you work", "what is your purpose", "help"];
const ACKNOWLEDGMENTS: &[&str] = &["thanks", "thank you", "ok", "okay", "got it", "understood", "bye", "goodbye"];
const FILLER_WORDS: &[&str] = &["it", "that", "this", "them", "those", "these", "what", "why", "how"];

/// Classify `question` into exactly one `QueryType`, checked in fixed order
/// (document_list, entity, date, summary, fact, else general).
pub fn classify(question: &str) -> QueryType {
    let q = question.trim().to_lowercase();
    if DOC_LIST_PATTERNS.iter().any(|p| q.contains(p)) {
        return QueryType::DocumentList;
    }
    if ENTITY_PATTERNS.iter().any(|p| q.contains(p)) {
        return QueryType::Entity;
    }
    if DATE_PATTERNS.iter().any(|p| q.contains(p)) {
        return QueryType::Date;
    }
    if SUMMARY_PATTERNS.iter().any(|p| q.contains(p)) {
        return QueryType::Summary;
    }
    if FACT_PATTERNS.iter().any(|p| q.contains(p)) {
        return QueryType::Fact;
    }
    QueryType::General
}

/// Decide routing for `question` given how many distinct documents exist.
pub fn route(question: &str, document_count: usize) -> RouteResult {
    let q = question.trim().to_lowercase();
    let words: Vec<&str> = q.split_whitespace().collect();
    let first_word = words.first().copied().unwrap_or("");

    if GREETINGS.contains(&q.as_str()) || (GREETINGS.contains(&first_word) && words.len() == 1) {
        return RouteResult { decision: RouteDecision::DirectReply, matched_rule: "greeting".to_string() };
    }
    if GREETING_PHRASES.contains(&q.as_str()) {
        return RouteResult { decision: RouteDecision::DirectReply, matched_rule: "greeting_phrase".to_string() };
    }
    if let Some(pattern) = META_PATTERNS.iter().find(|p| q.contains(*p)) {
        return RouteResult {
            decision: RouteDecision::DirectReply,
            matched_rule: format!("meta:{pattern}"),
        };
    }
    if ACKNOWLEDGMENTS.contains(&q.as_str()) {
        return RouteResult { decision: RouteDecision::DirectReply, matched_rule: "acknowledgment".to_string() };
    }
    if words.len() == 1 && FILLER_WORDS.contains(&first_word) {
        return RouteResult { decision: RouteDecision::Clarify, matched_rule: "lone_filler".to_string() };
    }
    if words.len() < 3 && document_count > 1 {
        return RouteResult { decision: RouteDecision::Clarify, matched_rule: "short_query_multi_doc".to_string() };
    }
    RouteResult { decision: RouteDecision::Retrieve, matched_rule: "default".to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_document_list_before_entity() {
        assert_eq!(classify("what documents do I have about Obama"), QueryType::DocumentList);
    }

    #[test]
    fn classifies_entity_queries() {
        assert_eq!(classify("who are the key people mentioned"), QueryType::Entity);
    }

    #[test]
    fn classifies_date_queries() {
        assert_eq!(classify("what is the timeline of events"), QueryType::Date);
    }

    #[test]
    fn classifies_summary_queries() {
        assert_eq!(classify("give me a summary of this report"), QueryType::Summary);
    }

    #[test]
    fn classifies_general_fallback() {
        assert_eq!(classify("tell me something interesting"), QueryType::General);
    }

    #[test]
    fn single_word_greeting_routes_direct_reply() {
        let result = route("hi", 3);
        assert_eq!(result.decision, RouteDecision::DirectReply);
    }

    #[test]
    fn greeting_followed_by_question_does_not_short_circuit() {
        let result = route("hi what was discussed in the meeting", 3);
        assert_eq!(result.decision, RouteDecision::Retrieve);
    }

    #[test]
    fn short_query_with_multiple_docs_clarifies() {
        let result = route("the report", 2);
        assert_eq!(result.decision, RouteDecision::Clarify);
    }

    #[test]
    fn short_query_with_single_doc_retrieves() {
        let result = route("the report", 1);
        assert_eq!(result.decision, RouteDecision::Retrieve);
    }

    #[test]
    fn acknowledgment_routes_direct_reply() {
        let result = route("thanks", 1);
        assert_eq!(result.decision, RouteDecision::DirectReply);
    }

    #[test]
    fn meta_question_routes_direct_reply() {
        let result = route("what can you do for me", 1);
        assert_eq!(result.decision, RouteDecision::DirectReply);
    }

    #[test]
    fn normal_question_routes_retrieve() {
        let result = route("What were the main findings of the clinical trial?", 5);
        assert_eq!(result.decision, RouteDecision::Retrieve);
    }
}
