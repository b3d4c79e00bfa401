use crate::config::Settings;
use crate::llm::error::{LlmDiagnosticsError, LlmStage};
use crate::llm::{Completion, CompletionRequest, LlmClient, Provider};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const DEFAULT_MAX_TOKENS: u32 = 2048;
const DEFAULT_TIMEOUT_SECS: u64 = 90;

const TOOL_NAME_EMIT_ANALYSIS: &str = "emit_analysis";

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_anthropic_api_key()?.to_string();
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = std::env::var("ANTHROPIC_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let timeout_secs = std::env::var("ANTHROPIC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }

    async fn create_message(
        &self,
        req: &CreateMessageRequest,
    ) -> anyhow::Result<(serde_json::Value, CreateMessageResponse)> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(req)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Anthropic response body")?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str::<serde_json::Value>(&text).ok();
            return Err(
                LlmDiagnosticsError::http_status(Provider::Anthropic, status)
                    .with_raw_output(text)
                    .with_raw_json(raw_response_json)
                    .into(),
            );
        }

        let raw_json = serde_json::from_str::<serde_json::Value>(&text)
            .with_context(|| format!("failed to parse Anthropic response JSON: {text}"))?;
        let parsed = match serde_json::from_value::<CreateMessageResponse>(raw_json.clone()) {
            Ok(parsed) => parsed,
            Err(err) => {
                return Err(LlmDiagnosticsError::new(
                    Provider::Anthropic,
                    LlmStage::Decode,
                    format!("unexpected response shape: {err}"),
                )
                .with_raw_output(text)
                .with_raw_json(Some(raw_json))
                .into())
            }
        };
        Ok((raw_json, parsed))
    }

    fn build_request(&self, req: &CompletionRequest, max_tokens: u32) -> CreateMessageRequest {
        let (tools, tool_choice) = match &req.json_schema {
            Some(schema) => (
                Some(vec![Tool {
                    name: TOOL_NAME_EMIT_ANALYSIS,
                    description: "Emit the dashboard entry as structured JSON",
                    input_schema: schema.clone(),
                }]),
                Some(ToolChoice::Tool {
                    name: TOOL_NAME_EMIT_ANALYSIS,
                }),
            ),
            None => (None, None),
        };

        CreateMessageRequest {
            model: self.model.clone(),
            max_tokens,
            system: Some(req.system.clone()).filter(|s| !s.is_empty()),
            messages: vec![Message {
                role: "user",
                content: req.user.clone(),
            }],
            tools,
            tool_choice,
        }
    }

    /// Tool input wins over text blocks; the caller parses either the same way.
    fn completion_text(res: &CreateMessageResponse) -> String {
        for block in &res.content {
            if let ContentBlock::ToolUse { name, input, .. } = block {
                if name == TOOL_NAME_EMIT_ANALYSIS {
                    return input.to_string();
                }
            }
        }

        let mut out = String::new();
        for block in &res.content {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }
}

/// Ceiling for the single retry after the model stopped at `max_tokens`.
fn bumped_max_tokens(stop_reason: Option<&str>, max_tokens: u32) -> Option<u32> {
    (stop_reason == Some("max_tokens")).then(|| max_tokens.saturating_mul(2).max(4096))
}

#[async_trait::async_trait]
impl LlmClient for AnthropicClient {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<Completion> {
        let max_tokens = req.max_tokens.unwrap_or(self.max_tokens);
        let (mut raw, mut res) = self
            .create_message(&self.build_request(&req, max_tokens))
            .await?;

        if let Some(bumped) = bumped_max_tokens(res.stop_reason.as_deref(), max_tokens) {
            tracing::warn!(
                from = max_tokens,
                to = bumped,
                "Anthropic stop_reason=max_tokens; retrying once with higher max_tokens"
            );
            let (r, m) = self
                .create_message(&self.build_request(&req, bumped))
                .await?;
            raw = r;
            res = m;
        }

        let text = Self::completion_text(&res);
        if text.trim().is_empty() {
            return Err(LlmDiagnosticsError::new(
                Provider::Anthropic,
                LlmStage::Empty,
                "response carried no text or tool output",
            )
            .with_raw_json(Some(raw))
            .into());
        }

        Ok(Completion {
            text,
            truncated: res.stop_reason.as_deref() == Some("max_tokens"),
            raw,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,

    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ToolChoice {
    #[serde(rename = "tool")]
    Tool { name: &'static str },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        #[allow(dead_code)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> AnthropicClient {
        AnthropicClient {
            http: reqwest::Client::new(),
            api_key: "test".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    #[test]
    fn prefers_tool_input_over_text() {
        let res: CreateMessageResponse = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "Here is the entry."},
                {"type": "tool_use", "id": "toolu_1", "name": TOOL_NAME_EMIT_ANALYSIS, "input": {"ticker": "NVDA"}}
            ],
            "stop_reason": "tool_use"
        }))
        .unwrap();

        let text = AnthropicClient::completion_text(&res);
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["ticker"], "NVDA");
    }

    #[test]
    fn joins_text_blocks_and_skips_unknown() {
        let res: CreateMessageResponse = serde_json::from_value(json!({
            "content": [
                {"type": "thinking", "thinking": "hmm", "signature": "x"},
                {"type": "text", "text": "First."},
                {"type": "text", "text": "Second."}
            ]
        }))
        .unwrap();

        assert_eq!(AnthropicClient::completion_text(&res), "First.\nSecond.");
    }

    #[test]
    fn schema_forces_tool_choice() {
        let req = CompletionRequest {
            system: "sys".to_string(),
            user: "notes".to_string(),
            max_tokens: None,
            json_schema: Some(json!({"type": "object"})),
        };
        let body = serde_json::to_value(client().build_request(&req, 1024)).unwrap();
        assert_eq!(body["tool_choice"]["type"], "tool");
        assert_eq!(body["tool_choice"]["name"], TOOL_NAME_EMIT_ANALYSIS);
        assert_eq!(body["max_tokens"], 1024);
    }

    #[test]
    fn plain_requests_omit_tools() {
        let req = CompletionRequest {
            system: String::new(),
            user: "slide".to_string(),
            max_tokens: Some(300),
            json_schema: None,
        };
        let body = serde_json::to_value(client().build_request(&req, 300)).unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("system").is_none());
    }

    #[test]
    fn max_tokens_stop_doubles_the_ceiling_once() {
        assert_eq!(bumped_max_tokens(Some("max_tokens"), 4096), Some(8192));
        assert_eq!(bumped_max_tokens(Some("max_tokens"), 400), Some(4096));
        assert_eq!(bumped_max_tokens(Some("max_tokens"), u32::MAX), Some(u32::MAX));
        assert_eq!(bumped_max_tokens(Some("end_turn"), 4096), None);
        assert_eq!(bumped_max_tokens(Some("tool_use"), 4096), None);
        assert_eq!(bumped_max_tokens(None, 4096), None);
    }
}
