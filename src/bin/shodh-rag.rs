//! Minimal CLI entry point: load config, answer one question, print the response as JSON.
//!
//! Installs a `tracing_subscriber::fmt` subscriber honoring `RUST_LOG`/`EnvFilter`,
//! matching the pattern in this workspace's desktop-app entry point. Exit codes per
//! SPEC_FULL.md §6: `0` success, `2` configuration error, `3` a dependency (LLM or
//! embedding model) stayed unavailable through construction.

use shodh_rag::config::RAGConfig;
use shodh_rag::engine::RagEngine;
use shodh_rag::error::RagError;
use shodh_rag::types::QueryRequest;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let question = match std::env::args().nth(1) {
        Some(q) => q,
        None => {
            eprintln!("usage: shodh-rag <question>");
            std::process::exit(2);
        }
    };

    let config = match RAGConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    let engine = match RagEngine::new(config).await {
        Ok(e) => e,
        Err(RagError::DependencyUnavailable(msg)) | Err(RagError::DependencyTimeout(msg)) => {
            eprintln!("dependency unavailable: {msg}");
            std::process::exit(3);
        }
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    let response = engine
        .query(QueryRequest { question, doc_filter: None, conversation_history: None, top_k: None })
        .await;

    match serde_json::to_string_pretty(&response) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("failed to serialize response: {e}");
            std::process::exit(2);
        }
    }

    if let Err(e) = engine.close() {
        eprintln!("shutdown error: {e}");
        std::process::exit(3);
    }
}
