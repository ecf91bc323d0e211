//! Query expansion: paraphrase the user's question to widen retrieval recall.
//!
//! Grounded on `multi_query_generator.py`: a simple-question short-circuit, an LLM
//! paraphrase prompt, line-by-line parsing that strips numbering/bullets/quotes, and a
//! hard fallback to `[question]` on any failure.

use crate::llm_client::LLMClient;
use crate::types::HistoryTurn;

const SIMPLE_PREFIXES: &[&str] = &["what is", "list", "who is", "how many", "define", "when did", "when is"];
const MIN_VARIATION_LEN: usize = 10;
const BULLET_PREFIXES: &[&str] = &["1.", "2.", "3.", "4.", "5.", "-", "*", "\u{2022}"];

/// True when `question` matches the simple-question heuristic: expansion would add
/// little recall for a lookup-style question.
pub fn is_simple_question(question: &str) -> bool {
    let lowered = question.trim().to_lowercase();
    SIMPLE_PREFIXES.iter().any(|p| lowered.starts_with(p))
}

/// Generate up to `n + 1` queries (original first). Falls back to `[question]` if the
/// question is simple, or if generation fails for any reason.
pub async fn generate_queries(
    llm: &LLMClient,
    question: &str,
    history: Option<&[HistoryTurn]>,
    n: usize,
) -> Vec<String> {
    if is_simple_question(question) {
        return vec![question.to_string()];
    }

    let prompt = build_prompt(question, history, n);
    let generated = match llm.generate(&prompt, 0.7, 300).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("multi-query generation failed, using original query only: {e}");
            return vec![question.to_string()];
        }
    };

    let mut queries = vec![question.to_string()];
    for variation in parse_variations(&generated) {
        if !queries.contains(&variation) {
            queries.push(variation);
        }
    }
    queries.truncate(n + 1);
    queries
}

fn build_prompt(question: &str, history: Option<&[HistoryTurn]>, n: usize) -> String {
    let context = history
        .map(|turns| {
            turns
                .iter()
                .rev()
                .take(3)
                .rev()
                .map(|t| format!("{}: {}", t.role, t.content))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .filter(|s| !s.is_empty());

    match context {
        Some(ctx) => format!(
            "You are an AI assistant that helps generate alternative phrasings of questions to improve document search.\n\nConversation context:\n{ctx}\n\nCurrent question: \"{question}\"\n\nGenerate {n} alternative versions of the current question that capture the same intent with different words, considering the conversation context.\n\nAlternative questions (one per line, no numbering):"
        ),
        None => format!(
            "You are an AI assistant that helps generate alternative phrasings of questions to improve document search.\n\nGiven the user's question, generate {n} alternative versions that capture the same intent but use different words.\n\nOriginal question: \"{question}\"\n\nGenerate {n} alternative questions, one per line. Do not number them or add any other text.\n\nAlternative questions:"
        ),
    }
}

fn parse_variations(generated_text: &str) -> Vec<String> {
    let mut queries = Vec::new();
    for line in generated_text.trim().lines() {
        let mut cleaned = line.trim();
        for prefix in BULLET_PREFIXES {
            if let Some(rest) = cleaned.strip_prefix(prefix) {
                cleaned = rest.trim();
                break;
            }
        }
        let cleaned = strip_matching_quotes(cleaned);
        if cleaned.len() >= MIN_VARIATION_LEN {
            queries.push(cleaned.to_string());
        }
    }
    queries
}

fn strip_matching_quotes(s: &str) -> &str {
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_questions_short_circuit() {
        assert!(is_simple_question("What is the capital of France?"));
        assert!(is_simple_question("List the authors"));
        assert!(!is_simple_question("Explain how the retrieval pipeline handles failures"));
    }

    #[test]
    fn parse_variations_strips_numbering_and_quotes() {
        let text = "1. \"How does the merger affect revenue?\"\n- What was the acquisition price?\ntoo short\n";
        let parsed = parse_variations(text);
        assert_eq!(parsed, vec!["How does the merger affect revenue?", "What was the acquisition price?"]);
    }

    #[test]
    fn parse_variations_filters_short_lines() {
        let text = "ok\nno\nreal question here please";
        let parsed = parse_variations(text);
        assert_eq!(parsed, vec!["real question here please"]);
    }
}
