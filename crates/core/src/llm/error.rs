use crate::llm::Provider;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Where in the request lifecycle an LLM call went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmStage {
    Http,
    Decode,
    Empty,
    Parse,
    ParseAfterRepair,
}

impl LlmStage {
    pub fn as_str(self) -> &'static str {
        match self {
            LlmStage::Http => "http",
            LlmStage::Decode => "decode",
            LlmStage::Empty => "empty",
            LlmStage::Parse => "parse",
            LlmStage::ParseAfterRepair => "parse_after_repair",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmDiagnosticsError {
    pub provider: Provider,
    pub stage: LlmStage,
    pub detail: String,
    pub status: Option<StatusCode>,
    pub raw_output: Option<String>,
    pub raw_response_json: Option<Value>,
}

impl LlmDiagnosticsError {
    pub fn new(provider: Provider, stage: LlmStage, detail: impl Into<String>) -> Self {
        Self {
            provider,
            stage,
            detail: detail.into(),
            status: None,
            raw_output: None,
            raw_response_json: None,
        }
    }

    /// Builds an `Http` stage error for a non-success response.
    pub fn http_status(provider: Provider, status: StatusCode) -> Self {
        let mut err = Self::new(provider, LlmStage::Http, format!("status={status}"));
        err.status = Some(status);
        err
    }

    /// Rate limits and upstream 5xx.
    pub fn is_transient(&self) -> bool {
        self.status
            .is_some_and(|s| s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error())
    }

    pub fn with_raw_output(mut self, raw: impl Into<String>) -> Self {
        self.raw_output = Some(raw.into());
        self
    }

    pub fn with_raw_json(mut self, raw: Option<Value>) -> Self {
        self.raw_response_json = raw;
        self
    }
}

impl fmt::Display for LlmDiagnosticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LLM error (provider={}, stage={}): {}",
            self.provider,
            self.stage.as_str(),
            self.detail
        )
    }
}

impl std::error::Error for LlmDiagnosticsError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_provider_and_stage() {
        let err = LlmDiagnosticsError::new(Provider::Gemini, LlmStage::Http, "status=503")
            .with_raw_output("upstream busy");
        assert_eq!(
            err.to_string(),
            "LLM error (provider=gemini, stage=http): status=503"
        );
        assert_eq!(err.raw_output.as_deref(), Some("upstream busy"));
    }

    #[test]
    fn survives_anyhow_downcast() {
        let err: anyhow::Error =
            LlmDiagnosticsError::new(Provider::Anthropic, LlmStage::Parse, "bad json").into();
        let diag = err.downcast_ref::<LlmDiagnosticsError>().unwrap();
        assert_eq!(diag.stage, LlmStage::Parse);
    }

    #[test]
    fn transient_is_decided_by_status_code() {
        let busy = LlmDiagnosticsError::http_status(Provider::Gemini, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(busy.stage, LlmStage::Http);
        assert!(busy.detail.starts_with("status=503"));
        assert!(busy.is_transient());
        assert!(LlmDiagnosticsError::http_status(Provider::Gemini, StatusCode::TOO_MANY_REQUESTS)
            .is_transient());
        assert!(!LlmDiagnosticsError::http_status(Provider::Gemini, StatusCode::BAD_REQUEST)
            .is_transient());
        // A detail string that merely mentions 429 is not a status.
        assert!(!LlmDiagnosticsError::new(Provider::Gemini, LlmStage::Http, "quota 429").is_transient());
    }
}
