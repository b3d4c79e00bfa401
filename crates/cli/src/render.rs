use std::fmt::Write as _;

use stockdeck_core::domain::equity::{EquityProfile, EquitySummary, ProfileOrigin};
use stockdeck_core::domain::slide::Slide;
use stockdeck_core::insight::InsightState;
use stockdeck_core::progress::Progress;

const BAR_WIDTH: usize = 30;

pub fn summary_table(rows: &[EquitySummary]) -> String {
    let ticker_w = rows.iter().map(|r| r.ticker.len()).max().unwrap_or(0).max(6);
    let name_w = rows.iter().map(|r| r.name.chars().count()).max().unwrap_or(0).max(4);

    let mut out = format!(
        "{:<ticker_w$}  {:<name_w$}  {:>10}  {:>10}  {:<10}  {}\n",
        "TICKER", "NAME", "PRICE", "TARGET", "STANCE", "ORIGIN"
    );
    for r in rows {
        let target = r
            .weighted_target
            .map(|t| format!("{t:.2}"))
            .unwrap_or_else(|| "-".to_string());
        let origin = match &r.origin {
            ProfileOrigin::Curated => "curated".to_string(),
            ProfileOrigin::Generated { provider, .. } => format!("ai:{provider}"),
        };
        let _ = writeln!(
            out,
            "{:<ticker_w$}  {:<name_w$}  {:>10.2}  {:>10}  {:<10}  {}",
            r.ticker,
            r.name,
            r.price,
            target,
            r.stance.as_str(),
            origin
        );
    }
    out
}

pub fn slide(p: &EquityProfile, slide: Slide) -> String {
    let mut out = format!(
        "── {} · {} ({}) ──\n",
        slide.title(),
        p.name,
        p.ticker
    );

    match slide {
        Slide::Overview => {
            let _ = writeln!(
                out,
                "{} {:.2} {} as of {}",
                p.exchange.as_deref().unwrap_or("-"),
                p.price,
                p.currency,
                p.as_of_date
            );
            let _ = writeln!(out, "Sector: {}", p.sector);
            let _ = writeln!(out, "{}", p.headline);
            let _ = writeln!(out, "\n{}", p.thesis);
        }
        Slide::Scenarios => {
            for s in &p.scenarios {
                let _ = writeln!(
                    out,
                    "{:<5} target {:>9.2}  ({:+6.1}%)  cagr {:+5.1}%  {}y  p={:.0}%",
                    s.case.as_str(),
                    s.price_target,
                    s.upside(p.price) * 100.0,
                    s.cagr * 100.0,
                    s.horizon_years,
                    s.probability * 100.0
                );
                if !s.narrative.is_empty() {
                    let _ = writeln!(out, "      {}", s.narrative);
                }
            }
            if let Some(t) = p.weighted_target() {
                let _ = writeln!(out, "weighted target {t:.2}");
            }
        }
        Slide::RiskMap => {
            for r in p.risk_map() {
                let _ = writeln!(
                    out,
                    "[{:>2}] {:<8} {} ({}) L{} x I{}",
                    r.score(),
                    r.severity().as_str(),
                    r.label,
                    r.category,
                    r.likelihood,
                    r.impact
                );
                if let Some(m) = &r.mitigation {
                    let _ = writeln!(out, "     mitigation: {m}");
                }
            }
        }
        Slide::Acceleration => {
            for a in &p.acceleration {
                let _ = writeln!(
                    out,
                    "{:>3.0}%  {} ({})",
                    a.probability * 100.0,
                    a.driver,
                    a.timeframe
                );
            }
        }
        Slide::Verdict => {
            let _ = writeln!(
                out,
                "{} · conviction {:.0}%",
                p.verdict.stance.as_str().to_uppercase(),
                p.verdict.conviction * 100.0
            );
            let _ = writeln!(out, "{}", p.verdict.summary);
        }
    }
    out
}

pub fn deck(p: &EquityProfile) -> String {
    Slide::ALL
        .iter()
        .map(|s| slide(p, *s))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn progress_line(p: &Progress) -> String {
    let filled = (usize::from(p.percent) * BAR_WIDTH) / 100;
    format!(
        "[{}{}] {:>3}% {}",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        p.percent,
        p.stage.label()
    )
}

/// `None` for states not worth printing.
pub fn insight(state: &InsightState) -> Option<String> {
    match state {
        InsightState::Idle => None,
        InsightState::Loading { key } => Some(format!("… thinking about {}", key.slide.title())),
        InsightState::Ready {
            commentary, cached, ..
        } => Some(if *cached {
            format!("AI (cached): {commentary}")
        } else {
            format!("AI: {commentary}")
        }),
        InsightState::Unavailable { message, .. } => Some(format!("AI: {message}")),
    }
}
