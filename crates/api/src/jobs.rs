use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use stockdeck_core::analysis::{Analyst, AnalystNotes, ANALYSIS_FALLBACK};
use stockdeck_core::llm::error::LlmDiagnosticsError;
use stockdeck_core::progress::{self, Progress};

const MAX_RETAINED_JOBS: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Succeeded { ticker: String },
    Failed { message: String, detail: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub job_id: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub progress: Progress,
    #[serde(flatten)]
    pub status: JobStatus,
}

struct JobEntry {
    submitted_at: DateTime<Utc>,
    progress: watch::Receiver<Progress>,
    status: watch::Receiver<JobStatus>,
}

/// Analysis runs submitted over HTTP, tracked until evicted.
#[derive(Clone, Default)]
pub struct AnalysisJobs {
    inner: Arc<RwLock<HashMap<Uuid, JobEntry>>>,
}

impl AnalysisJobs {
    pub async fn submit(&self, analyst: Analyst, notes: AnalystNotes) -> Uuid {
        let job_id = Uuid::new_v4();
        let (progress_tx, progress_rx) = progress::channel();
        let (status_tx, status_rx) = watch::channel(JobStatus::Running);

        {
            let mut jobs = self.inner.write().await;
            evict_finished(&mut jobs);
            jobs.insert(
                job_id,
                JobEntry {
                    submitted_at: Utc::now(),
                    progress: progress_rx,
                    status: status_rx,
                },
            );
        }

        tokio::spawn(async move {
            let status = match analyst.analyze(&notes, &progress_tx).await {
                Ok(profile) => {
                    tracing::info!(%job_id, ticker = %profile.ticker, "analysis job succeeded");
                    JobStatus::Succeeded {
                        ticker: profile.ticker,
                    }
                }
                Err(err) => {
                    if let Some(diag) = err.downcast_ref::<LlmDiagnosticsError>() {
                        tracing::error!(
                            %job_id,
                            stage = diag.stage.as_str(),
                            raw_output = diag.raw_output.as_deref().unwrap_or_default(),
                            "analysis job failed"
                        );
                    }
                    sentry_anyhow::capture_anyhow(&err);
                    JobStatus::Failed {
                        message: ANALYSIS_FALLBACK.to_string(),
                        detail: format!("{err:#}"),
                    }
                }
            };
            let _ = status_tx.send(status);
        });

        job_id
    }

    pub async fn get(&self, job_id: Uuid) -> Option<JobView> {
        let jobs = self.inner.read().await;
        let entry = jobs.get(&job_id)?;
        let view = JobView {
            job_id,
            submitted_at: entry.submitted_at,
            progress: *entry.progress.borrow(),
            status: entry.status.borrow().clone(),
        };
        Some(view)
    }
}

/// Drops the oldest finished jobs once the table is full. Running jobs stay.
fn evict_finished(jobs: &mut HashMap<Uuid, JobEntry>) {
    if jobs.len() < MAX_RETAINED_JOBS {
        return;
    }
    let mut finished: Vec<(DateTime<Utc>, Uuid)> = jobs
        .iter()
        .filter(|(_, e)| *e.status.borrow() != JobStatus::Running)
        .map(|(id, e)| (e.submitted_at, *id))
        .collect();
    finished.sort();
    let excess = jobs.len() + 1 - MAX_RETAINED_JOBS;
    for (_, id) in finished.into_iter().take(excess) {
        jobs.remove(&id);
    }
}
