//! OpenAI-compatible chat completion adapter (OpenRouter by default).
//!
//! Cost is computed from the token usage the endpoint reports, at
//! configured per-million-token prices.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{build_client, ensure_success, map_send_error};
use crate::error::{ProviderError, ProviderResult};
use crate::security::SecretString;
use crate::traits::llm::{Completion, LlmProvider};

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1";
const PROVIDER: &str = "openrouter";

/// Default extraction model.
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Default for TokenPricing {
    /// gpt-4o-mini list prices.
    fn default() -> Self {
        Self {
            input_per_million: 0.15,
            output_per_million: 0.60,
        }
    }
}

impl TokenPricing {
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input_per_million
            + (output_tokens as f64 / 1_000_000.0) * self.output_per_million
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Chat-completions LLM adapter.
pub struct OpenRouterLlm {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    pricing: TokenPricing,
    timeout: Duration,
}

impl OpenRouterLlm {
    pub fn new(api_key: impl Into<String>) -> ProviderResult<Self> {
        // Extraction prompts are large; give the model longer than search/scrape calls.
        let timeout = Duration::from_secs(60);
        Ok(Self {
            client: build_client(PROVIDER, timeout)?,
            api_key: SecretString::new(api_key),
            model: DEFAULT_MODEL.to_string(),
            base_url: OPENROUTER_API_URL.to_string(),
            max_tokens: 2000,
            temperature: 0.3,
            pricing: TokenPricing::default(),
            timeout,
        })
    }

    /// Create from environment variable `OPENROUTER_API_KEY`.
    pub fn from_env() -> ProviderResult<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ProviderError::not_configured(PROVIDER, "OPENROUTER_API_KEY not set"))?;
        Self::new(api_key)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Any OpenAI-compatible base URL (`https://api.openai.com/v1`, a local proxy, ...).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_pricing(mut self, pricing: TokenPricing) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> ProviderResult<Self> {
        self.client = build_client(PROVIDER, timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LlmProvider for OpenRouterLlm {
    async fn complete(&self, prompt: &str) -> ProviderResult<Completion> {
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key.expose()))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| map_send_error(PROVIDER, self.timeout, e))?;

        let response = ensure_success(PROVIDER, response).await?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(PROVIDER, e.to_string()))?;

        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::malformed(PROVIDER, "no choices in response"))?;
        let usage = body.usage.unwrap_or_default();

        tracing::debug!(
            model = %self.model,
            input_tokens = usage.prompt_tokens,
            output_tokens = usage.completion_tokens,
            "completion received"
        );

        Ok(Completion {
            text,
            cost_usd: self.pricing.cost(usage.prompt_tokens, usage.completion_tokens),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        })
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_pricing() {
        let pricing = TokenPricing::default();
        // 1M in + 1M out = 0.15 + 0.60
        assert!((pricing.cost(1_000_000, 1_000_000) - 0.75).abs() < 1e-9);
        assert_eq!(pricing.cost(0, 0), 0.0);
    }

    #[test]
    fn test_builder() {
        let llm = OpenRouterLlm::new("key")
            .unwrap()
            .with_model("anthropic/claude-3-haiku")
            .with_base_url("http://localhost:4000/v1");
        assert_eq!(llm.model(), "anthropic/claude-3-haiku");
        assert_eq!(llm.base_url, "http://localhost:4000/v1");
    }

    #[test]
    fn test_response_parsing() {
        let body: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"IGNORAR"}}],"usage":{"prompt_tokens":1200,"completion_tokens":5}}"#,
        )
        .unwrap();
        assert_eq!(body.choices[0].message.content.as_deref(), Some("IGNORAR"));
        assert_eq!(body.usage.unwrap().prompt_tokens, 1200);
    }
}
