//! Tools the chat model can call.
//!
//! A tool is a plain value implementing [`Tool`]: a name, a one-line
//! description, a JSON Schema for its parameters, and an async `execute`.
//! Tools live in a [`ToolRegistry`] keyed by name. The conversation loop asks
//! the registry for the definitions to offer the model and routes each tool
//! call back through [`ToolRegistry::invoke`].
//!
//! The only built-in tool is [`SearchPapersTool`] (`search_papers`), which
//! exposes [`PaperSearch`] to the model.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::chat::{ToolCall, ToolDefinition};
use crate::search::{PaperSearch, SearchOptions};

/// Default number of papers the model gets back when it omits `top`.
pub const TOOL_DEFAULT_TOP: usize = 2;

#[async_trait]
pub trait Tool: Send + Sync {
    /// Function name exposed to the model, e.g. `"search_papers"`.
    fn name(&self) -> &str;

    /// One-line description the model uses to decide whether to call it.
    fn description(&self) -> &str;

    /// JSON Schema (`type: "object"`) describing the parameters.
    fn parameters_schema(&self) -> Value;

    /// Run the tool. `params` is the decoded argument object.
    async fn execute(&self, params: Value) -> Result<Value>;
}

/// Name → tool map.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Definitions to offer the model, leaving out any name in `exclude`.
    pub fn definitions(&self, exclude: &[&str]) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .filter(|tool| !exclude.contains(&tool.name()))
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }

    /// Execute a model tool call and render the result for the model.
    ///
    /// Failures (unknown tool, bad arguments, execution errors) come back
    /// as `{"error": "..."}` so the model can recover.
    pub async fn invoke(&self, call: &ToolCall) -> String {
        let outcome = match self.find(&call.name) {
            None => Err(anyhow::anyhow!("Unknown tool: {}", call.name)),
            Some(tool) => match parse_arguments(&call.arguments) {
                Ok(params) => tool.execute(params).await,
                Err(e) => Err(e),
            },
        };

        match outcome {
            Ok(value) => value.to_string(),
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "tool call failed");
                json!({ "error": format!("{:#}", e) }).to_string()
            }
        }
    }
}

fn parse_arguments(arguments: &str) -> Result<Value> {
    if arguments.trim().is_empty() {
        return Ok(json!({}));
    }
    let params: Value =
        serde_json::from_str(arguments).context("Tool arguments are not valid JSON")?;
    if !params.is_object() {
        bail!("Tool arguments must be a JSON object");
    }
    Ok(params)
}

/// `search_papers`: semantic search over the paper collection.
pub struct SearchPapersTool {
    search: PaperSearch,
}

impl SearchPapersTool {
    pub const NAME: &'static str = "search_papers";

    pub fn new(search: PaperSearch) -> Self {
        Self { search }
    }
}

#[async_trait]
impl Tool for SearchPapersTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Searches for ArXiv papers that are related to the query."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to search for." },
                "top": {
                    "type": "integer",
                    "description": "Number of results to return.",
                    "default": TOOL_DEFAULT_TOP
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let query = params["query"].as_str().unwrap_or("");
        if query.trim().is_empty() {
            bail!("query must not be empty");
        }

        let top = match params.get("top") {
            None | Some(Value::Null) => TOOL_DEFAULT_TOP,
            Some(v) => match v.as_u64() {
                Some(n) if n > 0 => n as usize,
                _ => bail!("top must be a positive integer"),
            },
        };

        let results = self
            .search
            .search(
                query,
                SearchOptions {
                    top,
                    include_total_count: false,
                },
            )
            .await?;

        let papers: Vec<Value> = results
            .results
            .map(|hit| {
                let paper = hit.paper;
                json!({
                    "id": paper.id,
                    "title": paper.title,
                    "abstract": paper.abstract_text,
                    "published": paper.published.to_rfc3339(),
                    "authors": paper.authors,
                    "categories": paper.categories,
                    "link": paper.link,
                    "pdf_link": paper.pdf_link,
                    "score": hit.score,
                })
            })
            .collect()
            .await;

        Ok(Value::Array(papers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingProvider;
    use crate::models::Paper;
    use crate::store::{InMemoryCollection, PaperCollection};
    use chrono::Utc;
    use std::sync::Arc;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes its input."
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }
        async fn execute(&self, params: Value) -> Result<Value> {
            if params.get("fail").is_some() {
                bail!("asked to fail");
            }
            Ok(params)
        }
    }

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry
    }

    #[test]
    fn test_definitions_respect_exclusions() {
        let registry = registry();
        assert_eq!(registry.definitions(&[]).len(), 1);
        assert!(registry.definitions(&["echo"]).is_empty());
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let out = registry().invoke(&call("echo", r#"{"x":1}"#)).await;
        assert_eq!(serde_json::from_str::<Value>(&out).unwrap(), json!({ "x": 1 }));
    }

    #[tokio::test]
    async fn test_invoke_errors_are_reported_to_model() {
        let registry = registry();

        let unknown: Value =
            serde_json::from_str(&registry.invoke(&call("nope", "{}")).await).unwrap();
        assert!(unknown["error"].as_str().unwrap().contains("Unknown tool"));

        let bad_json: Value =
            serde_json::from_str(&registry.invoke(&call("echo", "{not json")).await).unwrap();
        assert!(bad_json["error"].is_string());

        let failed: Value =
            serde_json::from_str(&registry.invoke(&call("echo", r#"{"fail":true}"#)).await)
                .unwrap();
        assert_eq!(failed["error"], "asked to fail");
    }

    #[test]
    fn test_empty_arguments_are_an_empty_object() {
        assert_eq!(parse_arguments("").unwrap(), json!({}));
        assert!(parse_arguments("[1,2]").is_err());
    }

    /// Embeds every text as the same unit vector.
    struct FlatEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FlatEmbedder {
        fn model_name(&self) -> &str {
            "flat"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    async fn search_registry() -> ToolRegistry {
        let collection = InMemoryCollection::new("papers");
        collection.create_collection_if_not_exists().await.unwrap();
        let papers: Vec<Paper> = (0..4)
            .map(|i| Paper {
                id: format!("2401.0000{}v1", i),
                title: format!("Paper {}", i),
                abstract_text: format!("abstract {}", i),
                published: Utc::now(),
                authors: Vec::new(),
                categories: Vec::new(),
                link: None,
                pdf_link: None,
                embedding: Some(vec![1.0, i as f32]),
            })
            .collect();
        collection.upsert_batch(&papers).await.unwrap();

        let mut registry = ToolRegistry::new();
        registry.register(Box::new(SearchPapersTool::new(PaperSearch::new(
            Arc::new(collection),
            Arc::new(FlatEmbedder),
        ))));
        registry
    }

    #[tokio::test]
    async fn test_search_papers_defaults_to_two_results() {
        let registry = search_registry().await;
        let out = registry
            .invoke(&call(SearchPapersTool::NAME, r#"{"query":"anything"}"#))
            .await;

        let hits: Value = serde_json::from_str(&out).unwrap();
        let hits = hits.as_array().unwrap();
        assert_eq!(hits.len(), TOOL_DEFAULT_TOP);
        assert_eq!(hits[0]["id"], "2401.00000v1");
        assert!(hits[0].get("embedding").is_none());
    }

    #[tokio::test]
    async fn test_search_papers_rejects_bad_top() {
        let registry = search_registry().await;
        for args in [
            r#"{"query":"anything","top":0}"#,
            r#"{"query":"anything","top":"x"}"#,
            r#"{"query":"anything","top":-1}"#,
            r#"{"query":"anything","top":1.5}"#,
        ] {
            let out: Value =
                serde_json::from_str(&registry.invoke(&call(SearchPapersTool::NAME, args)).await)
                    .unwrap();
            assert_eq!(out["error"], "top must be a positive integer", "args: {}", args);
        }
    }

    #[tokio::test]
    async fn test_search_papers_requires_query() {
        let registry = search_registry().await;
        let out: Value =
            serde_json::from_str(&registry.invoke(&call(SearchPapersTool::NAME, "{}")).await)
                .unwrap();
        assert!(out["error"].as_str().unwrap().contains("query"));
    }
}
