//! OpenAI and Azure OpenAI endpoint resolution.
//!
//! Both the embedding provider and the chat client talk to the same two
//! services, which differ only in URL shape and auth header:
//!
//! | Provider | URL | Auth |
//! |----------|-----|------|
//! | `openai` | `{endpoint}/{operation}` (endpoint defaults to `https://api.openai.com/v1`) | `Authorization: Bearer $OPENAI_API_KEY` |
//! | `azure` | `{endpoint}/openai/deployments/{model}/{operation}?api-version=…` | `api-key: $AZURE_OPENAI_API_KEY` |
//!
//! For Azure the endpoint may also come from `AZURE_OPENAI_ENDPOINT`.

use anyhow::{bail, Context, Result};
use std::time::Duration;

const OPENAI_DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceKind {
    OpenAi,
    Azure { api_version: String },
}

/// A resolved service endpoint with its credentials.
#[derive(Clone)]
pub struct ServiceEndpoint {
    kind: ServiceKind,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for ServiceEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceEndpoint")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ServiceEndpoint {
    pub fn new(kind: ServiceKind, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            kind,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Resolve an endpoint from a provider name, optional configured URL,
    /// and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown providers, or when the API key (or the
    /// Azure endpoint) is missing from both config and environment.
    pub fn from_env(provider: &str, endpoint: Option<&str>, api_version: &str) -> Result<Self> {
        match provider {
            "openai" => {
                let api_key = std::env::var("OPENAI_API_KEY")
                    .context("OPENAI_API_KEY environment variable not set")?;
                let base_url = endpoint.unwrap_or(OPENAI_DEFAULT_ENDPOINT);
                Ok(Self::new(ServiceKind::OpenAi, base_url, api_key))
            }
            "azure" => {
                let api_key = std::env::var("AZURE_OPENAI_API_KEY")
                    .context("AZURE_OPENAI_API_KEY environment variable not set")?;
                let base_url = match endpoint {
                    Some(url) => url.to_string(),
                    None => std::env::var("AZURE_OPENAI_ENDPOINT").context(
                        "Azure endpoint not configured: set `endpoint` in config or AZURE_OPENAI_ENDPOINT",
                    )?,
                };
                Ok(Self::new(
                    ServiceKind::Azure {
                        api_version: api_version.to_string(),
                    },
                    base_url,
                    api_key,
                ))
            }
            other => bail!("Unknown service provider: {}", other),
        }
    }

    /// URL for an operation such as `"embeddings"` or `"chat/completions"`.
    ///
    /// `model` is the Azure deployment name; OpenAI puts the model in the body instead.
    pub fn url(&self, model: &str, operation: &str) -> String {
        match &self.kind {
            ServiceKind::OpenAi => format!("{}/{}", self.base_url, operation),
            ServiceKind::Azure { api_version } => format!(
                "{}/openai/deployments/{}/{}?api-version={}",
                self.base_url, model, operation, api_version
            ),
        }
    }

    /// Attach the provider's auth header to a request.
    pub fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.kind {
            ServiceKind::OpenAi => request.bearer_auth(&self.api_key),
            ServiceKind::Azure { .. } => request.header("api-key", &self.api_key),
        }
    }
}

/// Build an HTTP client, applying a request timeout only when one is configured.
pub fn http_client(timeout_secs: Option<u64>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(secs) = timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    Ok(builder.build()?)
}

/// Read a response body, turning a non-success status into an error that
/// carries the service's message.
pub async fn json_or_error(
    response: reqwest::Response,
    service: &str,
) -> Result<serde_json::Value> {
    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        bail!(
            "{} API error {}: {}",
            service,
            status,
            body_text.chars().take(500).collect::<String>()
        );
    }
    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_url() {
        let ep = ServiceEndpoint::new(ServiceKind::OpenAi, "https://api.openai.com/v1/", "k");
        assert_eq!(
            ep.url("gpt-4o", "chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_azure_url() {
        let ep = ServiceEndpoint::new(
            ServiceKind::Azure {
                api_version: "2024-06-01".to_string(),
            },
            "https://res.openai.azure.com",
            "k",
        );
        assert_eq!(
            ep.url("embed-deploy", "embeddings"),
            "https://res.openai.azure.com/openai/deployments/embed-deploy/embeddings?api-version=2024-06-01"
        );
    }

    #[test]
    fn test_debug_hides_key() {
        let ep = ServiceEndpoint::new(ServiceKind::OpenAi, "http://x", "sk-secret");
        assert!(!format!("{:?}", ep).contains("sk-secret"));
    }
}
