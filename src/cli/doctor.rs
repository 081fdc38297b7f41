use anyhow::{anyhow, bail, Context, Result};
use colored::Colorize;
use serde::Deserialize;
use std::time::Duration;

use crate::config::{Config, EmbeddingBackend};
use crate::fts::KeywordIndex;
use crate::vectordb::TableStore;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Ask an Ollama server for its model list and confirm `model` is pulled.
///
/// `nomic-embed-text` matches `nomic-embed-text:latest`.
pub(crate) async fn check_ollama(host: &str, model: &str) -> Result<()> {
    let client = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?;
    let url = format!("{}/api/tags", host.trim_end_matches('/'));

    let response = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("{} is not reachable", host))?;
    if !response.status().is_success() {
        bail!("{} answered {}", url, response.status());
    }
    let tags: TagsResponse = response
        .json()
        .await
        .with_context(|| format!("{} returned an unexpected body", url))?;

    let latest = format!("{}:latest", model);
    if tags.models.iter().any(|m| m.name == model || m.name == latest) {
        Ok(())
    } else {
        Err(anyhow!("model '{}' is not available on {}", model, host))
    }
}

fn report(label: &str, result: &Result<String>) -> bool {
    match result {
        Ok(detail) => {
            println!("   {} {}: {}", "✅".green(), label, detail);
            true
        }
        Err(e) => {
            println!("   {} {}: {:#}", "❌".red(), label, e);
            false
        }
    }
}

fn check_store(config: &Config) -> Result<String> {
    let data_dir = config.data_dir()?;
    let store = TableStore::open(&config.store_path(), config.embedding.dimensions)?;
    let keywords = KeywordIndex::open(&data_dir)?;
    let stats = store.stats()?;
    let documents = keywords.stats().num_documents;
    store.close()?;
    keywords.close()?;

    if stats.total_tables > 0 && !stats.indexed {
        bail!("{} tables stored but the vector index is not built", stats.total_tables);
    }
    Ok(format!(
        "{} tables, {} keyword documents",
        stats.total_tables, documents
    ))
}

pub async fn run(config: &Config) -> Result<()> {
    println!("{}", "🔍 Checking tablescout installation...".bright_cyan().bold());

    let mut healthy = report(
        "Configuration",
        &config
            .validate()
            .map(|_| format!("data dir {}", config.data_dir.display()))
            .map_err(anyhow::Error::from),
    );
    healthy &= report("Stores", &check_store(config));

    if config.embedding.backend == EmbeddingBackend::Ollama {
        let result = check_ollama(&config.embedding.host, &config.embedding.model)
            .await
            .map(|_| format!("{} on {}", config.embedding.model, config.embedding.host));
        healthy &= report("Embedding model", &result);
    } else {
        report("Embedding model", &Ok(format!("{} (local)", config.embedding.model)));
    }

    let result = check_ollama(&config.llm.host, &config.llm.model)
        .await
        .map(|_| format!("{} on {}", config.llm.model, config.llm.host));
    healthy &= report("Rerank model", &result);

    if !healthy {
        bail!("some checks failed");
    }
    println!("{}", "✅ All checks passed!".bright_green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Json, Router};
    use serde_json::json;

    async fn ollama_with(models: &'static [&'static str]) -> String {
        let router = Router::new().route(
            "/api/tags",
            get(move || async move {
                let models: Vec<_> = models.iter().map(|m| json!({ "name": m })).collect();
                Json(json!({ "models": models }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_model_present() {
        let host = ollama_with(&["gemma3:27b", "nomic-embed-text:latest"]).await;
        assert!(check_ollama(&host, "gemma3:27b").await.is_ok());
        assert!(check_ollama(&format!("{}/", host), "nomic-embed-text").await.is_ok());
    }

    #[tokio::test]
    async fn test_model_missing() {
        let host = ollama_with(&["gemma3:27b"]).await;
        let err = check_ollama(&host, "llama3").await.unwrap_err();
        assert!(err.to_string().contains("llama3"));
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        // Bind and drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(check_ollama(&format!("http://{}", addr), "gemma3:27b").await.is_err());
    }

    #[test]
    fn test_store_check_on_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_path_buf();

        assert_eq!(check_store(&config).unwrap(), "0 tables, 0 keyword documents");
    }
}
