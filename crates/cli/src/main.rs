use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stockdeck_core::analysis::{Analyst, AnalystNotes, ANALYSIS_FALLBACK};
use stockdeck_core::catalog::Catalog;
use stockdeck_core::config::Settings;
use stockdeck_core::domain::slide::Slide;
use stockdeck_core::insight::{InsightKey, InsightPanel, InsightSource};
use stockdeck_core::progress::{self, Progress, Stage};

mod browse;
mod render;

#[derive(Debug, Parser)]
#[command(name = "stockdeck", about = "Equity analysis dashboard in the terminal")]
struct Args {
    /// Catalog JSON to load instead of the bundled one (overrides CATALOG_PATH).
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List catalog entries.
    List,

    /// Print every slide of one entry.
    Show {
        ticker: String,
        /// Print the raw entry as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Turn analyst notes into a new entry.
    Analyze {
        #[arg(long, conflicts_with = "notes_file", required_unless_present = "notes_file")]
        notes: Option<String>,

        #[arg(long)]
        notes_file: Option<PathBuf>,

        /// Ticker the notes are about, if the notes don't say.
        #[arg(long)]
        ticker: Option<String>,

        /// Write the updated catalog here.
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// AI commentary for one slide.
    Insight { ticker: String, slide: Slide },

    /// Step through an entry's slides with live commentary.
    Browse { ticker: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let catalog = match args.catalog.as_ref().or(settings.catalog_path.as_ref()) {
        Some(path) => Catalog::from_path(path)?,
        None => Catalog::builtin()?,
    };

    let res = run(args.command, &settings, catalog).await;
    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
    }
    res
}

async fn run(command: Command, settings: &Settings, catalog: Catalog) -> anyhow::Result<()> {
    match command {
        Command::List => {
            print!("{}", render::summary_table(&catalog.list().await));
        }
        Command::Show { ticker, json } => {
            let profile = catalog
                .get(&ticker)
                .await
                .with_context(|| format!("unknown ticker: {ticker}"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&profile)?);
            } else {
                println!("{}", render::deck(&profile));
            }
        }
        Command::Analyze {
            notes,
            notes_file,
            ticker,
            export,
        } => {
            let text = match (notes, notes_file) {
                (Some(n), _) => n,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read notes {}", path.display()))?,
                (None, None) => bail!("either --notes or --notes-file is required"),
            };
            let notes = AnalystNotes::new(&text, ticker.as_deref())?;

            let llm = stockdeck_core::llm::client_from_settings(settings)?;
            let analyst = Analyst::new(llm, catalog.clone())
                .with_repair_attempts(settings.repair_attempts());

            let (tx, rx) = progress::channel();
            let bar = tokio::spawn(draw_progress(rx));
            let res = analyst.analyze(&notes, &tx).await;
            drop(tx);
            let _ = bar.await;

            match res {
                Ok(profile) => {
                    println!("{}", render::deck(&profile));
                    if let Some(path) = export {
                        std::fs::write(&path, catalog.export_json().await?)
                            .with_context(|| format!("failed to write {}", path.display()))?;
                        tracing::info!(path = %path.display(), "catalog exported");
                    }
                }
                Err(err) => {
                    println!("{ANALYSIS_FALLBACK}");
                    return Err(err);
                }
            }
        }
        Command::Insight { ticker, slide } => {
            let profile = catalog
                .get(&ticker)
                .await
                .with_context(|| format!("unknown ticker: {ticker}"))?;
            let llm = stockdeck_core::llm::client_from_settings(settings)?;
            let source = InsightSource::new(llm, catalog);
            println!("{}", render::slide(&profile, slide));
            println!(
                "{}",
                source
                    .commentary(&InsightKey::new(&profile.ticker, slide))
                    .await
            );
        }
        Command::Browse { ticker } => {
            let profile = catalog
                .get(&ticker)
                .await
                .with_context(|| format!("unknown ticker: {ticker}"))?;
            let llm = stockdeck_core::llm::client_from_settings(settings)?;
            let panel = InsightPanel::new(
                InsightSource::new(llm, catalog),
                settings.insight_debounce(),
            );
            browse::run(profile, panel).await?;
        }
    }
    Ok(())
}

async fn draw_progress(mut rx: tokio::sync::watch::Receiver<Progress>) {
    loop {
        if rx.changed().await.is_err() {
            break;
        }
        let p = *rx.borrow_and_update();
        eprint!("\r{}", render::progress_line(&p));
        if matches!(p.stage, Stage::Done | Stage::Failed) {
            break;
        }
    }
    eprintln!();
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn analyze_requires_notes_source() {
        assert!(Args::try_parse_from(["stockdeck", "analyze"]).is_err());
        assert!(Args::try_parse_from([
            "stockdeck",
            "analyze",
            "--notes",
            "x",
            "--notes-file",
            "y"
        ])
        .is_err());
        let args = Args::try_parse_from(["stockdeck", "analyze", "--notes", "x"]).unwrap();
        assert!(matches!(args.command, Command::Analyze { notes: Some(_), .. }));
    }

    #[test]
    fn insight_parses_slide_names() {
        let args = Args::try_parse_from(["stockdeck", "insight", "nvda", "risk-map"]).unwrap();
        match args.command {
            Command::Insight { ticker, slide } => {
                assert_eq!(ticker, "nvda");
                assert_eq!(slide, Slide::RiskMap);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Args::try_parse_from(["stockdeck", "insight", "nvda", "charts"]).is_err());
    }
}
