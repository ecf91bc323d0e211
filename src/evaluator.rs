//! Answer-quality evaluation: LLM-judged scores with heuristic fallbacks.
//!
//! Grounded on `evaluation_agent.py`: quality/completeness/relevance each try an LLM
//! rating first and fall back to a heuristic on parse or call failure, the mean of the
//! three is the overall score, and a fixed 0.7 sufficiency threshold gates a four-part
//! retry prescription.

use crate::llm_client::LLMClient;
use crate::types::RetrievedChunk;
use std::collections::HashSet;

/// Used when no threshold override is supplied; `RAGConfig::pipeline::quality_threshold`
/// is the normal source of truth.
pub const DEFAULT_THRESHOLD: f32 = 0.7;
const LOW_SCORE_BAND: f32 = 0.6;

#[derive(Debug, Clone)]
pub struct EvaluationScores {
    pub quality: f32,
    pub completeness: f32,
    pub relevance: f32,
    pub overall: f32,
    pub is_sufficient: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RetryPrescription {
    pub expand_search: bool,
    pub use_entities: bool,
    pub increase_top_k: usize,
    pub refine_query: bool,
}

/// Evaluate `answer` against `query` and the chunks it was grounded in.
/// `threshold` overrides the default 0.7 sufficiency bar (from `RAGConfig`).
pub async fn evaluate(
    llm: &LLMClient,
    query: &str,
    answer: &str,
    chunks: &[RetrievedChunk],
    threshold: f32,
) -> EvaluationScores {
    let quality = evaluate_quality(llm, query, answer).await;
    let completeness = evaluate_completeness(llm, query, answer).await;
    let relevance = evaluate_relevance(answer, chunks);

    let overall = (quality + completeness + relevance) / 3.0;
    let is_sufficient = overall >= threshold;

    EvaluationScores { quality, completeness, relevance, overall, is_sufficient }
}

pub fn retry_prescription(scores: &EvaluationScores) -> RetryPrescription {
    let mut strategy = RetryPrescription { increase_top_k: 5, ..Default::default() };
    if scores.completeness < LOW_SCORE_BAND {
        strategy.expand_search = true;
        strategy.increase_top_k = 10;
    }
    if scores.relevance < LOW_SCORE_BAND {
        strategy.use_entities = true;
    }
    if scores.quality < LOW_SCORE_BAND {
        strategy.refine_query = true;
    }
    strategy
}

async fn evaluate_quality(llm: &LLMClient, query: &str, answer: &str) -> f32 {
    let trimmed = answer.trim();
    if trimmed.len() < 10 {
        return 0.0;
    }
    let lowered = trimmed.to_lowercase();
    if lowered.contains("i don't know") || lowered.contains("cannot answer") {
        return 0.3;
    }
    if lowered.contains("don't have enough information") {
        return 0.4;
    }

    let prompt = format!(
        "Evaluate the quality of this answer on a scale of 0 to 10.\n\nQuestion: {query}\n\nAnswer: {answer}\n\nConsider:\n- Is the answer coherent and well-structured?\n- Is the language clear and professional?\n- Does it seem factually sound?\n- Is it appropriately detailed?\n\nRespond with ONLY a number between 0 and 10."
    );

    match llm.generate(&prompt, 0.0, 10).await {
        Ok(text) => match parse_score(&text) {
            Some(score) => score,
            None => length_banded_fallback(answer),
        },
        Err(_) => length_banded_fallback(answer),
    }
}

fn length_banded_fallback(answer: &str) -> f32 {
    if answer.len() > 100 {
        0.7
    } else if answer.len() > 50 {
        0.5
    } else {
        0.3
    }
}

async fn evaluate_completeness(llm: &LLMClient, query: &str, answer: &str) -> f32 {
    let prompt = format!(
        "Does this answer fully address the question?\n\nQuestion: {query}\n\nAnswer: {answer}\n\nRate completeness on a scale of 0 to 10:\n- 0: Doesn't address the question at all\n- 5: Partially answers but missing key information\n- 10: Completely answers all aspects of the question\n\nRespond with ONLY a number between 0 and 10."
    );

    match llm.generate(&prompt, 0.0, 10).await {
        Ok(text) => match parse_score(&text) {
            Some(score) => score,
            None => jaccard_overlap(query, answer),
        },
        Err(_) => jaccard_overlap(query, answer),
    }
}

fn jaccard_overlap(query: &str, answer: &str) -> f32 {
    let query_words: HashSet<&str> = query.split_whitespace().collect();
    if query_words.is_empty() {
        return 0.5;
    }
    let answer_words: HashSet<&str> = answer.split_whitespace().collect();
    let overlap = query_words.intersection(&answer_words).count();
    (overlap as f32 / query_words.len() as f32).min(1.0)
}

fn evaluate_relevance(answer: &str, chunks: &[RetrievedChunk]) -> f32 {
    if chunks.is_empty() {
        return 0.2;
    }
    let all_chunk_text: String = chunks.iter().map(|c| c.chunk.text.to_lowercase()).collect::<Vec<_>>().join(" ");
    let answer_words: Vec<String> = answer.to_lowercase().split_whitespace().map(String::from).collect();
    if answer_words.is_empty() {
        return 0.0;
    }
    let grounded = answer_words.iter().filter(|w| all_chunk_text.contains(w.as_str())).count();
    (grounded as f32 / answer_words.len() as f32 * 1.5).min(1.0)
}

fn parse_score(text: &str) -> Option<f32> {
    let digits_start = text.find(|c: char| c.is_ascii_digit())?;
    let rest = &text[digits_start..];
    let end = rest
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_digit() || *c == '.')
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    let raw: f32 = rest[..end].parse().ok()?;
    Some((raw / 10.0).min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_score_extracts_leading_number() {
        assert_eq!(parse_score("8"), Some(0.8));
        assert_eq!(parse_score("Score: 7.5 out of 10"), Some(0.75));
        assert_eq!(parse_score("no number here"), None);
    }

    #[test]
    fn length_banded_fallback_bands_correctly() {
        assert_eq!(length_banded_fallback(&"x".repeat(150)), 0.7);
        assert_eq!(length_banded_fallback(&"x".repeat(60)), 0.5);
        assert_eq!(length_banded_fallback("short"), 0.3);
    }

    #[test]
    fn jaccard_overlap_scores_shared_tokens() {
        let score = jaccard_overlap("what is the capital of france", "the capital of france is paris");
        assert!(score > 0.5);
    }

    #[test]
    fn relevance_zero_chunks_returns_low_score() {
        assert_eq!(evaluate_relevance("some answer", &[]), 0.2);
    }

    #[test]
    fn retry_prescription_sets_fields_by_low_scores() {
        let scores = EvaluationScores { quality: 0.5, completeness: 0.5, relevance: 0.5, overall: 0.5, is_sufficient: false };
        let prescription = retry_prescription(&scores);
        assert!(prescription.expand_search);
        assert!(prescription.use_entities);
        assert!(prescription.refine_query);
        assert_eq!(prescription.increase_top_k, 10);
    }

    #[test]
    fn retry_prescription_default_top_k_when_scores_are_fine() {
        let scores = EvaluationScores { quality: 0.9, completeness: 0.9, relevance: 0.9, overall: 0.9, is_sufficient: true };
        let prescription = retry_prescription(&scores);
        assert!(!prescription.expand_search);
        assert_eq!(prescription.increase_top_k, 5);
    }
}
