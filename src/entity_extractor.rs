//! Named-entity recognition over chunk text, used to populate the knowledge graph.
//!
//! Degrades silently: if the model files are missing or inference fails, `extract`
//! returns an empty list rather than failing ingestion. Entity extraction enriches the
//! graph; it is never load-bearing for retrieval correctness.

use crate::types::{EntityMention, EntityType};
use anyhow::{anyhow, Result};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Token-classification NER extractor backed by an ONNX BIO-tagging model.
pub struct EntityExtractor {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<tokenizers::Tokenizer>,
    id_to_label: Vec<String>,
    max_length: usize,
}

/// Chunks longer than this are truncated before extraction; entities are a
/// best-effort enrichment, not worth a second inference pass over a huge document.
const MAX_INPUT_CHARS: usize = 100_000;
const MIN_ENTITY_LEN: usize = 2;

impl EntityExtractor {
    pub fn new(model_dir: &Path) -> Result<Self> {
        let model_path = Self::find_model(model_dir)?;
        let tokenizer_path = model_dir.join("tokenizer.json");
        let labels_path = model_dir.join("labels.json");

        if !tokenizer_path.exists() {
            return Err(anyhow!("Tokenizer not found at: {}", tokenizer_path.display()));
        }

        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer: {:?}", e))?;

        let id_to_label = Self::load_labels(&labels_path)?;

        let model_bytes = std::fs::read(&model_path)?;
        let session = Session::builder()
            .map_err(|e| anyhow!("Session builder: {:?}", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("Opt level: {:?}", e))?
            .commit_from_memory(&model_bytes)
            .map_err(|e| anyhow!("Failed to load NER model: {:?}", e))?;

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            id_to_label,
            max_length: 512,
        })
    }

    /// Attempt to construct the extractor; returns `None` (instead of an error) when
    /// the model directory is absent, so ingestion can proceed without NER.
    pub fn try_new(model_dir: &Path) -> Option<Self> {
        match Self::new(model_dir) {
            Ok(extractor) => Some(extractor),
            Err(e) => {
                tracing::warn!("entity extractor unavailable, continuing without NER: {e}");
                None
            }
        }
    }

    fn find_model(model_dir: &Path) -> Result<PathBuf> {
        let candidates = [model_dir.join("model_O4.onnx"), model_dir.join("model.onnx")];
        for path in &candidates {
            if path.exists() {
                return Ok(path.clone());
            }
        }
        Err(anyhow!("No NER model found in: {}", model_dir.display()))
    }

    fn load_labels(path: &Path) -> Result<Vec<String>> {
        if !path.exists() {
            // Default BIO tagset matching the common CoNLL-style token-classification head.
            return Ok(vec![
                "O", "B-PER", "I-PER", "B-ORG", "I-ORG", "B-LOC", "I-LOC", "B-MISC", "I-MISC",
            ]
            .into_iter()
            .map(String::from)
            .collect());
        }
        let content = std::fs::read_to_string(path)?;
        let labels: Vec<String> = serde_json::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse labels.json: {:?}", e))?;
        Ok(labels)
    }

    /// Extract entities from `text`. Never propagates a model error to the caller;
    /// logs and returns an empty vector on failure.
    pub fn extract(&self, text: &str) -> Vec<EntityMention> {
        match self.extract_inner(text) {
            Ok(mentions) => mentions,
            Err(e) => {
                tracing::warn!("entity extraction failed, skipping: {e}");
                Vec::new()
            }
        }
    }

    fn extract_inner(&self, text: &str) -> Result<Vec<EntityMention>> {
        let truncated: &str = if text.len() > MAX_INPUT_CHARS {
            let boundary = text
                .char_indices()
                .take_while(|(i, _)| *i < MAX_INPUT_CHARS)
                .last()
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(0);
            &text[..boundary]
        } else {
            text
        };

        let encoding = self
            .tokenizer
            .encode(truncated, true)
            .map_err(|e| anyhow!("Tokenization failed: {:?}", e))?;

        let ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let mask: Vec<i64> = encoding.get_attention_mask().iter().map(|&m| m as i64).collect();
        let offsets = encoding.get_offsets().to_vec();

        let len = ids.len().min(self.max_length);
        let ids = &ids[..len];
        let mask = &mask[..len];
        let offsets = &offsets[..len];

        let shape = vec![1, len];
        let input_ids = Value::from_array((shape.clone(), ids.to_vec()))
            .map_err(|e| anyhow!("input_ids: {:?}", e))?;
        let attention_mask = Value::from_array((shape, mask.to_vec()))
            .map_err(|e| anyhow!("attention_mask: {:?}", e))?;

        let inputs = ort::inputs![
            "input_ids" => input_ids,
            "attention_mask" => attention_mask,
        ];

        let mut session = self.session.lock();
        let outputs = session.run(inputs).map_err(|e| anyhow!("NER inference failed: {:?}", e))?;

        let (shape, data) = outputs["logits"]
            .try_extract_tensor::<f32>()
            .map_err(|e| anyhow!("Failed to extract logits: {:?}", e))?;

        let num_labels = self.id_to_label.len();
        if shape.len() != 3 || shape[2] as usize != num_labels {
            return Err(anyhow!("unexpected logits shape {:?}", shape));
        }
        let seq_len = shape[1] as usize;

        let mut tags = Vec::with_capacity(seq_len);
        for t in 0..seq_len {
            let row = &data[t * num_labels..(t + 1) * num_labels];
            let (best_idx, _) = row
                .iter()
                .enumerate()
                .fold((0usize, f32::NEG_INFINITY), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
            tags.push(self.id_to_label.get(best_idx).cloned().unwrap_or_else(|| "O".to_string()));
        }

        Ok(decode_bio(truncated, &tags, offsets))
    }
}

/// Collapse a BIO tag sequence and matching character offsets into entity spans.
/// A `B-x` starts a new entity; `I-x` extends the current one only when its type
/// matches; anything else (including a type mismatch) closes the current span.
fn decode_bio(text: &str, tags: &[String], offsets: &[(usize, usize)]) -> Vec<EntityMention> {
    let mut mentions = Vec::new();
    let mut current: Option<(EntityType, usize, usize)> = None;

    for (tag, &(start, end)) in tags.iter().zip(offsets.iter()) {
        if start == end {
            continue; // special token (CLS/SEP/PAD)
        }
        let (prefix, label) = tag.split_once('-').unwrap_or(("O", ""));
        match prefix {
            "B" => {
                if let Some((etype, s, e)) = current.take() {
                    push_mention(&mut mentions, text, etype, s, e);
                }
                current = Some((EntityType::from_tag(label), start, end));
            }
            "I" => match &mut current {
                Some((etype, _, e)) if EntityType::from_tag(label) == *etype => {
                    *e = end;
                }
                _ => {
                    if let Some((etype, s, e)) = current.take() {
                        push_mention(&mut mentions, text, etype, s, e);
                    }
                    current = Some((EntityType::from_tag(label), start, end));
                }
            },
            _ => {
                if let Some((etype, s, e)) = current.take() {
                    push_mention(&mut mentions, text, etype, s, e);
                }
            }
        }
    }
    if let Some((etype, s, e)) = current {
        push_mention(&mut mentions, text, etype, s, e);
    }
    mentions
}

fn push_mention(mentions: &mut Vec<EntityMention>, text: &str, entity_type: EntityType, start: usize, end: usize) {
    if end <= start || end > text.len() {
        return;
    }
    let span = text[start..end].trim();
    if span.chars().count() < MIN_ENTITY_LEN {
        return;
    }
    mentions.push(EntityMention {
        text: span.to_string(),
        entity_type,
        start_char: start,
        end_char: end,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_bio_merges_contiguous_tags() {
        let text = "Marie Curie won the prize";
        let tags = vec!["B-PER".to_string(), "I-PER".to_string(), "O".to_string(), "O".to_string(), "O".to_string()];
        let offsets = vec![(0, 5), (6, 11), (12, 15), (16, 19), (20, 25)];
        let mentions = decode_bio(text, &tags, &offsets);
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].text, "Marie Curie");
        assert_eq!(mentions[0].entity_type, EntityType::Person);
    }

    #[test]
    fn decode_bio_splits_on_type_mismatch() {
        let text = "Paris France";
        let tags = vec!["B-LOC".to_string(), "B-LOC".to_string()];
        let offsets = vec![(0, 5), (6, 12)];
        let mentions = decode_bio(text, &tags, &offsets);
        assert_eq!(mentions.len(), 2);
    }

    #[test]
    fn decode_bio_drops_short_spans() {
        let text = "A B cat";
        let tags = vec!["B-PER".to_string(), "B-PER".to_string(), "B-ORG".to_string()];
        let offsets = vec![(0, 1), (2, 3), (4, 7)];
        let mentions = decode_bio(text, &tags, &offsets);
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].text, "cat");
    }

    #[test]
    fn decode_bio_ignores_special_token_offsets() {
        let text = "Org";
        let tags = vec!["O".to_string(), "B-ORG".to_string(), "O".to_string()];
        let offsets = vec![(0, 0), (0, 3), (0, 0)];
        let mentions = decode_bio(text, &tags, &offsets);
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].entity_type, EntityType::Org);
    }
}
