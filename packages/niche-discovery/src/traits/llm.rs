//! LLM completion trait used by the extraction stage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;

/// A single completion and its billed cost.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Completion {
    pub fn new(text: impl Into<String>, cost_usd: f64) -> Self {
        Self {
            text: text.into(),
            cost_usd,
            ..Default::default()
        }
    }

    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }
}

/// Single-prompt text completion.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> ProviderResult<Completion>;

    fn name(&self) -> &'static str;
}
