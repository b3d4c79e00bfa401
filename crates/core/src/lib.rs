pub mod analysis;
pub mod catalog;
pub mod domain;
pub mod insight;
pub mod llm;
pub mod progress;

pub mod config {
    use crate::llm::Provider;
    use anyhow::{bail, Context};
    use std::path::PathBuf;
    use std::time::Duration;

    const DEFAULT_INSIGHT_DEBOUNCE_MS: u64 = 600;
    const DEFAULT_REPAIR_ATTEMPTS: u32 = 2;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub llm_provider: Option<String>,
        pub anthropic_api_key: Option<String>,
        pub gemini_api_key: Option<String>,
        pub sentry_dsn: Option<String>,
        pub catalog_path: Option<PathBuf>,
        pub insight_debounce_ms: Option<u64>,
        pub analysis_repair_attempts: Option<u32>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                llm_provider: std::env::var("LLM_PROVIDER").ok(),
                anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
                gemini_api_key: std::env::var("GEMINI_API_KEY").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                catalog_path: std::env::var("CATALOG_PATH")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .map(PathBuf::from),
                insight_debounce_ms: parse_env("INSIGHT_DEBOUNCE_MS")?,
                analysis_repair_attempts: parse_env("ANALYSIS_REPAIR_ATTEMPTS")?,
            })
        }

        pub fn llm_provider(&self) -> anyhow::Result<Provider> {
            match self
                .llm_provider
                .as_deref()
                .map(|s| s.trim().to_ascii_lowercase())
                .as_deref()
            {
                None | Some("") | Some("anthropic") => Ok(Provider::Anthropic),
                Some("gemini") | Some("google") => Ok(Provider::Gemini),
                Some(other) => bail!("unsupported LLM_PROVIDER: {other}"),
            }
        }

        pub fn require_anthropic_api_key(&self) -> anyhow::Result<&str> {
            self.anthropic_api_key
                .as_deref()
                .context("ANTHROPIC_API_KEY is required")
        }

        pub fn require_gemini_api_key(&self) -> anyhow::Result<&str> {
            self.gemini_api_key
                .as_deref()
                .context("GEMINI_API_KEY is required")
        }

        pub fn insight_debounce(&self) -> Duration {
            Duration::from_millis(
                self.insight_debounce_ms
                    .unwrap_or(DEFAULT_INSIGHT_DEBOUNCE_MS),
            )
        }

        pub fn repair_attempts(&self) -> u32 {
            self.analysis_repair_attempts
                .unwrap_or(DEFAULT_REPAIR_ATTEMPTS)
        }
    }

    fn parse_env<T>(key: &str) -> anyhow::Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match std::env::var(key) {
            Ok(s) if !s.trim().is_empty() => s
                .trim()
                .parse::<T>()
                .map(Some)
                .with_context(|| format!("invalid {key}: {s}")),
            _ => Ok(None),
        }
    }

}
