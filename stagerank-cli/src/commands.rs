//! CLI subcommand handlers.

use crate::{Commands, ConfigAction, QueryArgs, StageArg};
use anyhow::Context;
use stagerank_core::config::{RetrieverConfig, load_config};
use stagerank_core::{
    Document, HashingEmbedder, InMemoryVectorStore, PassthroughReranker, RetrievalRequest,
    Retriever, StageType,
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, config_path: Option<&Path>) -> anyhow::Result<()> {
    match command {
        Commands::Query(args) => handle_query(args, config_path).await,
        Commands::Config { action } => handle_config(action, config_path),
    }
}

fn load(config_path: Option<&Path>) -> anyhow::Result<RetrieverConfig> {
    load_config(config_path, None).map_err(|e| anyhow::anyhow!("Configuration error: {}", e))
}

async fn handle_query(args: QueryArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let documents = load_corpus(&args.corpus)?;

    let store = Arc::new(InMemoryVectorStore::new(HashingEmbedder::default()));
    let retriever = Retriever::new(config, store, Arc::new(PassthroughReranker))?;
    let added = retriever.add_documents(documents).await?;
    info!(documents = added, corpus = %args.corpus.display(), "Corpus loaded");

    for query in &args.queries {
        let request = build_request(query, &args)?;
        let result = retriever.retrieve(request).await;
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    if args.stats {
        retriever.flush_pending_writes().await;
        let stats = retriever.stats().await;
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }

    retriever.close().await?;
    Ok(())
}

fn handle_config(action: ConfigAction, config_path: Option<&Path>) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init { path } => {
            if path.exists() {
                println!("Configuration file already exists at: {}", path.display());
                return Ok(());
            }
            let toml_str = toml::to_string_pretty(&RetrieverConfig::default())?;
            std::fs::write(&path, &toml_str)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(config_path)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        ConfigAction::Check => {
            let config = load(config_path)?;
            config
                .validate()
                .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
            println!("Configuration OK");
            Ok(())
        }
    }
}

/// Read a JSON array of documents.
fn load_corpus(path: &Path) -> anyhow::Result<Vec<Document>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus {}", path.display()))?;
    let documents: Vec<Document> = serde_json::from_str(&raw)
        .with_context(|| format!("Malformed corpus {}", path.display()))?;
    Ok(documents)
}

fn build_request(query: &str, args: &QueryArgs) -> anyhow::Result<RetrievalRequest> {
    let mut request = RetrievalRequest::new(query);
    if let Some(top_k) = args.top_k {
        request = request.with_top_k(top_k);
    }
    for raw in &args.filters {
        let (key, value) = parse_filter(raw)?;
        request = request.with_filter(key, value);
    }
    if args.no_cache {
        request = request.without_cache();
    }
    for stage in &args.disabled {
        request = request.with_stage(stage.stage_type(), false);
    }
    Ok(request)
}

/// Split `key=value`; the value is parsed as JSON when possible.
fn parse_filter(raw: &str) -> anyhow::Result<(String, serde_json::Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Filter '{}' must be key=value", raw))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Filter '{}' has an empty key", raw);
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

impl StageArg {
    fn stage_type(self) -> StageType {
        match self {
            StageArg::Recall => StageType::Recall,
            StageArg::PreRank => StageType::PreRank,
            StageArg::ReRank => StageType::ReRank,
        }
    }
}
