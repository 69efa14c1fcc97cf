//! TOML configuration parsing.
//!
//! Every section is optional and falls back to the defaults the CLI was
//! designed around (arXiv courtesy delay of 3 s, batches of 20 abstracts,
//! 1536-dimensional embeddings, a `gpt-4o` chat deployment). Service
//! credentials are never read from this file; they come from the environment
//! (see [`crate::endpoint`]).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::EMBEDDING_DIMS;

/// Largest page the arXiv API will serve in one request.
pub const ARXIV_MAX_PAGE_SIZE: usize = 2000;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub arxiv: ArxivConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Table holding the paper records.
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            collection: default_collection(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/archie.sqlite")
}
fn default_collection() -> String {
    "arxiv_records".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArxivConfig {
    #[serde(default = "default_arxiv_url")]
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_page_delay_secs")]
    pub page_delay_secs: u64,
}

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            base_url: default_arxiv_url(),
            page_size: default_page_size(),
            page_delay_secs: default_page_delay_secs(),
        }
    }
}

fn default_arxiv_url() -> String {
    "http://export.arxiv.org/api/query".to_string()
}
fn default_page_size() -> usize {
    100
}
fn default_page_delay_secs() -> u64 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model name (`openai`) or deployment name (`azure`).
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            endpoint: None,
            api_version: default_api_version(),
            timeout_secs: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "azure".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    EMBEDDING_DIMS
}
fn default_api_version() -> String {
    "2024-06-01".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model name (`openai`) or deployment name (`azure`).
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_chat_model(),
            endpoint: None,
            api_version: default_api_version(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tool_rounds: default_max_tool_rounds(),
            timeout_secs: None,
        }
    }
}

fn default_chat_model() -> String {
    "gpt-4o".to_string()
}
fn default_max_tokens() -> u32 {
    7000
}
fn default_temperature() -> f32 {
    0.7
}
fn default_top_p() -> f32 {
    0.8
}
fn default_max_tool_rounds() -> usize {
    5
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if !is_sql_identifier(&config.db.collection) {
        anyhow::bail!(
            "db.collection must match [A-Za-z_][A-Za-z0-9_]*, got '{}'",
            config.db.collection
        );
    }

    if config.arxiv.page_size == 0 {
        anyhow::bail!("arxiv.page_size must be > 0");
    }

    if config.ingest.batch_size == 0 {
        anyhow::bail!("ingest.batch_size must be > 0");
    }

    if config.embedding.is_enabled() && config.embedding.dims == 0 {
        anyhow::bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "azure" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or azure.",
            other
        ),
    }

    match config.chat.provider.as_str() {
        "openai" | "azure" => {}
        other => anyhow::bail!(
            "Unknown chat provider: '{}'. Must be openai or azure.",
            other
        ),
    }

    if !(0.0..=2.0).contains(&config.chat.temperature) {
        anyhow::bail!("chat.temperature must be in [0.0, 2.0]");
    }

    if !(0.0..=1.0).contains(&config.chat.top_p) {
        anyhow::bail!("chat.top_p must be in [0.0, 1.0]");
    }

    Ok(())
}

pub(crate) fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.db.collection, "arxiv_records");
        assert_eq!(config.arxiv.page_size, 100);
        assert_eq!(config.arxiv.page_delay_secs, 3);
        assert_eq!(config.ingest.batch_size, 20);
        assert_eq!(config.embedding.dims, 1536);
        assert_eq!(config.chat.model, "gpt-4o");
        assert_eq!(config.chat.max_tokens, 7000);
        assert!((config.chat.temperature - 0.7).abs() < f32::EPSILON);
        assert!((config.chat.top_p - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = parse(
            r#"
            [embedding]
            provider = "openai"
            endpoint = "http://localhost:9999/v1"
            "#,
        )
        .unwrap();
        assert_eq!(config.embedding.provider, "openai");
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert_eq!(
            config.embedding.endpoint.as_deref(),
            Some("http://localhost:9999/v1")
        );
    }

    #[test]
    fn test_rejects_unsafe_collection_name() {
        let err = parse(
            r#"
            [db]
            collection = "papers; DROP TABLE x"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("db.collection"));
    }

    #[test]
    fn test_rejects_unknown_provider() {
        assert!(parse("[embedding]\nprovider = \"cohere\"").is_err());
        assert!(parse("[chat]\nprovider = \"local\"").is_err());
    }

    #[test]
    fn test_rejects_zero_batch() {
        assert!(parse("[ingest]\nbatch_size = 0").is_err());
    }

    #[test]
    fn test_sql_identifier() {
        assert!(is_sql_identifier("arxiv_records"));
        assert!(is_sql_identifier("_t1"));
        assert!(!is_sql_identifier("1abc"));
        assert!(!is_sql_identifier(""));
        assert!(!is_sql_identifier("a-b"));
    }
}
