use std::sync::atomic::{AtomicUsize, Ordering};

use stockdeck_core::llm::{Completion, CompletionRequest, LlmClient, Provider};

/// Answers every request with the same text.
pub struct ScriptedLlm {
    reply: String,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn text(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn analysis(ticker: &str) -> Self {
        let reply = serde_json::json!({
            "ticker": ticker,
            "name": format!("{ticker} Inc."),
            "price": 100.0,
            "thesis": "Share gains continue.",
            "scenarios": [
                {"case": "base", "cagr": 0.1, "price_target": 133.0, "probability": 1.0}
            ],
            "verdict": {"stance": "hold", "summary": "Fairly valued."}
        });
        Self::text(&reply.to_string())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedLlm {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn complete(&self, _req: CompletionRequest) -> anyhow::Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Completion {
            text: self.reply.clone(),
            raw: serde_json::Value::Null,
            truncated: false,
        })
    }
}
