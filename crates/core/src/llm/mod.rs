pub mod anthropic;
pub mod error;
pub mod gemini;
pub mod json;
pub mod prompt;

use crate::config::Settings;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: Option<u32>,
    /// When set, the provider is asked for structured output matching this schema.
    pub json_schema: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub raw: serde_json::Value,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    Gemini,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> Provider;

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<Completion>;
}

/// Builds the client selected by `LLM_PROVIDER`.
pub fn client_from_settings(settings: &Settings) -> anyhow::Result<Arc<dyn LlmClient>> {
    match settings.llm_provider()? {
        Provider::Anthropic => Ok(Arc::new(anthropic::AnthropicClient::from_settings(
            settings,
        )?)),
        Provider::Gemini => Ok(Arc::new(gemini::GeminiClient::from_settings(settings)?)),
    }
}
