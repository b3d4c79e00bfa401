use crate::catalog::{Catalog, InsertOutcome};
use crate::domain::equity::{EquityProfile, ProfileOrigin};
use crate::llm::error::{LlmDiagnosticsError, LlmStage};
use crate::llm::{json, prompt, Completion, LlmClient};
use crate::progress::{self, ProgressOptions, ProgressSender, Stage};
use anyhow::ensure;
use chrono::Utc;
use std::sync::Arc;

/// Shown in place of a new entry when analysis fails for any reason.
pub const ANALYSIS_FALLBACK: &str =
    "The analysis could not be generated right now. Check the notes and try again.";

pub const MAX_NOTES_CHARS: usize = 20_000;

#[derive(Debug, Clone)]
pub struct AnalystNotes {
    pub notes: String,
    pub ticker_hint: Option<String>,
}

impl AnalystNotes {
    pub fn new(notes: &str, ticker_hint: Option<&str>) -> anyhow::Result<Self> {
        let notes = notes.trim();
        ensure!(!notes.is_empty(), "notes must be non-empty");
        let len = notes.chars().count();
        ensure!(
            len <= MAX_NOTES_CHARS,
            "notes must be at most {MAX_NOTES_CHARS} characters (got {len})"
        );
        let ticker_hint = ticker_hint
            .map(|t| t.trim().to_ascii_uppercase())
            .filter(|t| !t.is_empty());
        Ok(Self {
            notes: notes.to_string(),
            ticker_hint,
        })
    }
}

/// Turns analyst notes into a dashboard entry via the model and files it in
/// the catalog.
#[derive(Clone)]
pub struct Analyst {
    llm: Arc<dyn LlmClient>,
    catalog: Catalog,
    repair_attempts: u32,
    progress: ProgressOptions,
}

impl Analyst {
    pub fn new(llm: Arc<dyn LlmClient>, catalog: Catalog) -> Self {
        Self {
            llm,
            catalog,
            repair_attempts: 2,
            progress: ProgressOptions::default(),
        }
    }

    pub fn with_repair_attempts(mut self, attempts: u32) -> Self {
        self.repair_attempts = attempts;
        self
    }

    pub fn with_progress_options(mut self, opts: ProgressOptions) -> Self {
        self.progress = opts;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Publishes `done` or `failed` on `progress` before returning.
    pub async fn analyze(
        &self,
        notes: &AnalystNotes,
        progress: &ProgressSender,
    ) -> anyhow::Result<EquityProfile> {
        let res = self.run(notes, progress).await;
        progress::finish(progress, res.is_ok());
        res
    }

    async fn run(
        &self,
        notes: &AnalystNotes,
        progress: &ProgressSender,
    ) -> anyhow::Result<EquityProfile> {
        progress::enter(progress, Stage::Drafting, 0.02);
        let today = Utc::now().date_naive();
        let request = prompt::analysis_request(prompt::analysis_user(
            &notes.notes,
            notes.ticker_hint.as_deref(),
            today,
        ));

        let completion = self.call(request, progress).await?;

        progress::enter(progress, Stage::Parsing, 0.0);
        let origin = ProfileOrigin::Generated {
            provider: self.llm.provider().to_string(),
            generated_at: Utc::now(),
        };

        let profile = match json::parse_profile(&completion.text, today, origin.clone()) {
            Ok(p) => p,
            Err(first_err) => {
                self.repair(completion, first_err, today, origin, progress)
                    .await?
            }
        };

        let outcome = self.catalog.insert(profile.clone()).await?;
        tracing::info!(
            ticker = %profile.ticker,
            provider = %self.llm.provider(),
            replaced = outcome == InsertOutcome::Replaced,
            "analysis added to catalog"
        );
        Ok(profile)
    }

    async fn call(
        &self,
        request: crate::llm::CompletionRequest,
        progress: &ProgressSender,
    ) -> anyhow::Result<Completion> {
        let completion = progress::drive(
            self.llm.complete(request),
            Stage::AwaitingModel,
            self.progress,
            progress,
        )
        .await?;
        if completion.truncated {
            tracing::warn!(
                provider = %self.llm.provider(),
                "model reply was truncated at max tokens"
            );
        }
        Ok(completion)
    }

    async fn repair(
        &self,
        initial: Completion,
        first_err: anyhow::Error,
        today: chrono::NaiveDate,
        origin: ProfileOrigin,
        progress: &ProgressSender,
    ) -> anyhow::Result<EquityProfile> {
        let mut last_err = first_err;
        let mut last = initial;

        for attempt in 1..=self.repair_attempts {
            tracing::warn!(attempt, error = %last_err, "analysis reply invalid; asking for a repair");
            let request = prompt::analysis_request(prompt::analysis_repair(
                &last.text,
                &format!("{last_err:#}"),
            ));
            last = self.call(request, progress).await?;
            progress::enter(progress, Stage::Parsing, 0.0);
            match json::parse_profile(&last.text, today, origin.clone()) {
                Ok(p) => return Ok(p),
                Err(err) => last_err = err,
            }
        }

        let stage = if self.repair_attempts == 0 {
            LlmStage::Parse
        } else {
            LlmStage::ParseAfterRepair
        };
        Err(LlmDiagnosticsError::new(
            self.llm.provider(),
            stage,
            format!("final_error={last_err:#}"),
        )
        .with_raw_output(last.text)
        .with_raw_json(Some(last.raw))
        .into())
    }
}
