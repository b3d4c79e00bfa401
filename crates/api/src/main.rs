use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use stockdeck_core::analysis::{Analyst, AnalystNotes};
use stockdeck_core::catalog::Catalog;
use stockdeck_core::domain::equity::{EquityProfile, EquitySummary};
use stockdeck_core::domain::slide::Slide;
use stockdeck_core::insight::{InsightKey, InsightSource, InsightState};

mod jobs;
mod panels;
#[cfg(test)]
mod testing;

use jobs::{AnalysisJobs, JobView};
use panels::PanelRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = stockdeck_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let catalog = match &settings.catalog_path {
        Some(path) => Catalog::from_path(path)?,
        None => Catalog::builtin()?,
    };
    let entries = catalog.len().await;
    tracing::info!(entries, "catalog loaded");

    let (analyst, panels) = match stockdeck_core::llm::client_from_settings(&settings) {
        Ok(llm) => {
            tracing::info!(provider = %llm.provider(), "llm client ready");
            let analyst = Analyst::new(llm.clone(), catalog.clone())
                .with_repair_attempts(settings.repair_attempts());
            let panels = PanelRegistry::new(
                InsightSource::new(llm, catalog.clone()),
                settings.insight_debounce(),
            );
            (Some(analyst), Some(panels))
        }
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "llm client unavailable; serving catalog only");
            (None, None)
        }
    };

    let state = AppState {
        catalog,
        analyst,
        jobs: AnalysisJobs::default(),
        panels,
    };

    let app = router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/equities", get(list_equities))
        .route("/equities/:ticker", get(get_equity))
        .route("/analyses", post(submit_analysis))
        .route("/analyses/:job_id", get(get_analysis))
        .route("/panels/:panel_id", get(get_panel))
        .route("/panels/:panel_id/select", post(select_panel))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    catalog: Catalog,
    analyst: Option<Analyst>,
    jobs: AnalysisJobs,
    panels: Option<PanelRegistry>,
}

#[derive(Debug, Serialize)]
struct SlideRef {
    id: Slide,
    title: &'static str,
}

#[derive(Debug, Serialize)]
struct ApiEquity {
    #[serde(flatten)]
    profile: EquityProfile,
    weighted_target: Option<f64>,
    slides: Vec<SlideRef>,
}

async fn list_equities(State(state): State<AppState>) -> Json<Vec<EquitySummary>> {
    Json(state.catalog.list().await)
}

async fn get_equity(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<ApiEquity>, StatusCode> {
    let profile = state
        .catalog
        .get(&ticker)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;

    let slides = Slide::ALL
        .iter()
        .map(|s| SlideRef {
            id: *s,
            title: s.title(),
        })
        .collect();

    Ok(Json(ApiEquity {
        weighted_target: profile.weighted_target(),
        profile,
        slides,
    }))
}

#[derive(Debug, Deserialize)]
struct AnalysisRequest {
    notes: String,
    #[serde(default)]
    ticker_hint: Option<String>,
}

#[derive(Debug, Serialize)]
struct SubmittedJob {
    job_id: Uuid,
}

async fn submit_analysis(
    State(state): State<AppState>,
    Json(req): Json<AnalysisRequest>,
) -> Result<(StatusCode, Json<SubmittedJob>), StatusCode> {
    let Some(analyst) = &state.analyst else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let notes = AnalystNotes::new(&req.notes, req.ticker_hint.as_deref()).map_err(|e| {
        tracing::debug!(error = %e, "rejecting analysis request");
        StatusCode::BAD_REQUEST
    })?;

    let job_id = state.jobs.submit(analyst.clone(), notes).await;
    tracing::info!(%job_id, "analysis job submitted");
    Ok((StatusCode::ACCEPTED, Json(SubmittedJob { job_id })))
}

async fn get_analysis(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobView>, StatusCode> {
    let job_id = Uuid::parse_str(&job_id).map_err(|_| StatusCode::BAD_REQUEST)?;
    state
        .jobs
        .get(job_id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Deserialize)]
struct SelectRequest {
    ticker: String,
    slide: String,
}

async fn select_panel(
    State(state): State<AppState>,
    Path(panel_id): Path<String>,
    Json(req): Json<SelectRequest>,
) -> Result<Json<InsightState>, StatusCode> {
    let Some(panels) = &state.panels else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let slide: Slide = req.slide.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    if state.catalog.get(&req.ticker).await.is_none() {
        return Err(StatusCode::NOT_FOUND);
    }

    let panel = panels.get_or_create(&panel_id).await;
    panel.select(InsightKey::new(&req.ticker, slide)).await;
    Ok(Json(panel.current()))
}

async fn get_panel(
    State(state): State<AppState>,
    Path(panel_id): Path<String>,
) -> Result<Json<InsightState>, StatusCode> {
    let Some(panels) = &state.panels else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let panel = panels.get(&panel_id).await.ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(panel.current()))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &stockdeck_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
