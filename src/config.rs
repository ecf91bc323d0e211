//! Environment-driven configuration, validated once at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RAGConfig {
    pub storage_path: PathBuf,
    pub graph: GraphConfig,
    pub llm: LLMConfig,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    pub graph_host: String,
    pub graph_port: u16,
    pub graph_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub embedding_model_name: String,
    pub embedding_dim: usize,
    pub model_dir: PathBuf,
    pub cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub quality_threshold: f32,
    pub max_retries: u32,
    pub enable_multi_query: bool,
    pub enable_evaluation: bool,
}

impl RAGConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.embedding.embedding_dim == 0 {
            return Err("embedding.embedding_dim must be > 0".into());
        }
        if self.chunking.chunk_size < 50 {
            return Err("chunking.chunk_size must be >= 50".into());
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err("chunking.chunk_overlap must be < chunk_size".into());
        }
        if !(0.0..=1.0).contains(&self.pipeline.quality_threshold) {
            return Err("pipeline.quality_threshold must be in [0.0, 1.0]".into());
        }
        if self.graph.graph_timeout_seconds == 0 {
            return Err("graph.graph_timeout_seconds must be > 0".into());
        }
        if self.llm.llm_timeout_seconds == 0 {
            return Err("llm.llm_timeout_seconds must be > 0".into());
        }
        Ok(())
    }

    /// Load config from a JSON file, then apply environment overrides and validate.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let mut config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Construct from `Default`, then apply environment overrides and validate.
    pub fn from_env() -> Result<Self, String> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("STORAGE_PATH") {
            self.storage_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("GRAPH_HOST") {
            self.graph.graph_host = v;
        }
        env_num("GRAPH_PORT", &mut self.graph.graph_port);
        env_num("GRAPH_TIMEOUT_SECONDS", &mut self.graph.graph_timeout_seconds);
        if let Ok(v) = std::env::var("LLM_BASE_URL") {
            self.llm.llm_base_url = v;
        }
        if let Ok(v) = std::env::var("LLM_MODEL") {
            self.llm.llm_model = v;
        }
        env_num("LLM_TIMEOUT_SECONDS", &mut self.llm.llm_timeout_seconds);
        if let Ok(v) = std::env::var("EMBEDDING_MODEL_NAME") {
            self.embedding.embedding_model_name = v;
        }
        env_num("EMBEDDING_DIM", &mut self.embedding.embedding_dim);
        env_num("QUALITY_THRESHOLD", &mut self.pipeline.quality_threshold);
        env_num("MAX_RETRIES", &mut self.pipeline.max_retries);
        env_bool("ENABLE_MULTI_QUERY", &mut self.pipeline.enable_multi_query);
        env_bool("ENABLE_EVALUATION", &mut self.pipeline.enable_evaluation);
    }
}

fn env_num<T: std::str::FromStr>(key: &str, field: &mut T) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(parsed) = v.parse() {
            *field = parsed;
        }
    }
}

fn env_bool(key: &str, field: &mut bool) {
    if let Ok(v) = std::env::var(key) {
        match v.to_lowercase().as_str() {
            "1" | "true" | "yes" => *field = true,
            "0" | "false" | "no" => *field = false,
            _ => {}
        }
    }
}

impl Default for RAGConfig {
    fn default() -> Self {
        let storage_path = PathBuf::from("./storage");

        let model_dir = if Path::new("models").exists() {
            PathBuf::from("models")
        } else if let Ok(env_path) = std::env::var("MODEL_PATH") {
            PathBuf::from(env_path)
        } else {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("shodh-rag")
                .join("models")
        };

        Self {
            storage_path,
            graph: GraphConfig {
                graph_host: "localhost".to_string(),
                graph_port: 7687,
                graph_timeout_seconds: 30,
            },
            llm: LLMConfig {
                llm_base_url: "http://localhost:11434".to_string(),
                llm_model: "llama3".to_string(),
                llm_timeout_seconds: 60,
            },
            embedding: EmbeddingConfig {
                embedding_model_name: "all-MiniLM-L6-v2".to_string(),
                embedding_dim: 384,
                model_dir,
                cache_size: 1000,
            },
            chunking: ChunkingConfig {
                chunk_size: 1750,
                chunk_overlap: 200,
                min_chunk_size: 100,
            },
            pipeline: PipelineConfig {
                quality_threshold: 0.7,
                max_retries: 2,
                enable_multi_query: true,
                enable_evaluation: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(RAGConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_embedding_dim() {
        let mut cfg = RAGConfig::default();
        cfg.embedding.embedding_dim = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_overlap_ge_chunk_size() {
        let mut cfg = RAGConfig::default();
        cfg.chunking.chunk_overlap = cfg.chunking.chunk_size;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_quality_threshold() {
        let mut cfg = RAGConfig::default();
        cfg.pipeline.quality_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_override_applies_and_validates() {
        std::env::set_var("MAX_RETRIES", "5");
        let cfg = RAGConfig::from_env().unwrap();
        assert_eq!(cfg.pipeline.max_retries, 5);
        std::env::remove_var("MAX_RETRIES");
    }
}
