use crate::config::Settings;
use crate::llm::error::{LlmDiagnosticsError, LlmStage};
use crate::llm::{Completion, CompletionRequest, LlmClient, Provider};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_MAX_TOKENS: u32 = 2048;
const DEFAULT_TIMEOUT_SECS: u64 = 90;
const DEFAULT_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    retries: u32,
}

impl GeminiClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_gemini_api_key()?.to_string();
        let base_url =
            std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("GEMINI_MODEL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let timeout_secs = std::env::var("GEMINI_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build gemini http client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            retries: DEFAULT_RETRIES,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    fn build_request(req: &CompletionRequest) -> GenerateContentRequest {
        GenerateContentRequest {
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part {
                    text: req.system.clone(),
                }],
            })
            .filter(|_| !req.system.is_empty()),
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: req.user.clone(),
                }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                temperature: 0.3,
                response_mime_type: req
                    .json_schema
                    .as_ref()
                    .map(|_| "application/json".to_string()),
            },
        }
    }

    async fn generate_once(
        &self,
        body: &GenerateContentRequest,
    ) -> anyhow::Result<(serde_json::Value, GenerateContentResponse)> {
        let res = self
            .http
            .post(self.url())
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            .context("Gemini request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Gemini response body")?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str::<serde_json::Value>(&text).ok();
            return Err(
                LlmDiagnosticsError::http_status(Provider::Gemini, status)
                    .with_raw_output(text)
                    .with_raw_json(raw_response_json)
                    .into(),
            );
        }

        let raw_json = serde_json::from_str::<serde_json::Value>(&text)
            .with_context(|| format!("failed to parse Gemini response JSON: {text}"))?;
        let parsed = match serde_json::from_value::<GenerateContentResponse>(raw_json.clone()) {
            Ok(parsed) => parsed,
            Err(err) => {
                return Err(LlmDiagnosticsError::new(
                    Provider::Gemini,
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

    fn completion_text(res: &GenerateContentResponse) -> Option<(String, bool)> {
        let candidate = res.candidates.first()?;
        let text = candidate
            .content
            .as_ref()?
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        let truncated = candidate.finish_reason.as_deref() == Some("MAX_TOKENS");
        Some((text, truncated))
    }
}

/// Rate limits and upstream 5xx are worth another attempt; everything else is not.
fn is_retryable(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<LlmDiagnosticsError>() {
        Some(diag) => diag.is_transient(),
        None => err.downcast_ref::<reqwest::Error>().is_some(),
    }
}

#[async_trait::async_trait]
impl LlmClient for GeminiClient {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<Completion> {
        let body = Self::build_request(&req);

        let mut attempt: u32 = 0;
        let (raw, res) = loop {
            attempt += 1;
            match self.generate_once(&body).await {
                Ok(ok) => break ok,
                Err(err) => {
                    if attempt >= self.retries || !is_retryable(&err) {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(attempt, ?backoff, error = %err, "Gemini call failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        };

        match Self::completion_text(&res) {
            Some((text, truncated)) if !text.trim().is_empty() => Ok(Completion {
                text,
                raw,
                truncated,
            }),
            _ => Err(LlmDiagnosticsError::new(
                Provider::Gemini,
                LlmStage::Empty,
                "response carried no candidate text",
            )
            .with_raw_json(Some(raw))
            .into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Clone, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_uses_camel_case_and_json_mime_for_schema() {
        let req = CompletionRequest {
            system: "sys".to_string(),
            user: "notes".to_string(),
            max_tokens: Some(4096),
            json_schema: Some(json!({"type": "object"})),
        };
        let body = serde_json::to_value(GeminiClient::build_request(&req)).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 4096);
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn plain_request_has_no_mime_type() {
        let req = CompletionRequest {
            system: String::new(),
            user: "slide".to_string(),
            max_tokens: None,
            json_schema: None,
        };
        let body = serde_json::to_value(GeminiClient::build_request(&req)).unwrap();
        assert!(body.get("systemInstruction").is_none());
        assert!(body["generationConfig"].get("responseMimeType").is_none());
    }

    #[test]
    fn joins_candidate_parts_and_flags_truncation() {
        let res: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "{\"a\":"}, {"text": "1}"}]},
                "finishReason": "MAX_TOKENS"
            }],
            "usageMetadata": {"totalTokenCount": 12}
        }))
        .unwrap();
        let (text, truncated) = GeminiClient::completion_text(&res).unwrap();
        assert_eq!(text, "{\"a\":1}");
        assert!(truncated);
    }

    #[test]
    fn blocked_prompt_has_no_text() {
        let res: GenerateContentResponse = serde_json::from_value(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();
        assert!(GeminiClient::completion_text(&res).is_none());
    }

    #[test]
    fn retries_only_transient_http_failures() {
        let busy: anyhow::Error =
            LlmDiagnosticsError::http_status(Provider::Gemini, reqwest::StatusCode::SERVICE_UNAVAILABLE).into();
        let limited: anyhow::Error =
            LlmDiagnosticsError::http_status(Provider::Gemini, reqwest::StatusCode::TOO_MANY_REQUESTS).into();
        let bad: anyhow::Error =
            LlmDiagnosticsError::http_status(Provider::Gemini, reqwest::StatusCode::BAD_REQUEST).into();
        let empty: anyhow::Error =
            LlmDiagnosticsError::new(Provider::Gemini, LlmStage::Empty, "status=500 in prose").into();
        assert!(is_retryable(&busy));
        assert!(is_retryable(&limited));
        assert!(!is_retryable(&bad));
        assert!(!is_retryable(&empty));
    }
}
