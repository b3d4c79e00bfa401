//! Prompt templates for note analysis and slide commentary.

use crate::domain::equity::EquityProfile;
use crate::domain::slide::Slide;
use crate::llm::CompletionRequest;
use chrono::NaiveDate;
use std::fmt::Write as _;

pub const ANALYSIS_MAX_TOKENS: u32 = 4096;
pub const COMMENTARY_MAX_TOKENS: u32 = 400;

const ANALYSIS_SHAPE: &str = r#"{
  "ticker": "NVDA",
  "name": "NVIDIA Corporation",
  "sector": "Semiconductors",
  "exchange": "NASDAQ",
  "price": 0.0,
  "currency": "USD",
  "as_of_date": "YYYY-MM-DD",
  "headline": "one line",
  "thesis": "short paragraph",
  "scenarios": [
    {"case": "bear|base|bull", "cagr": 0.0, "price_target": 0.0, "horizon_years": 3, "probability": 0.0, "narrative": "..."}
  ],
  "risks": [
    {"label": "...", "category": "...", "likelihood": 1, "impact": 1, "mitigation": null}
  ],
  "acceleration": [
    {"driver": "...", "probability": 0.0, "timeframe": "..."}
  ],
  "verdict": {"stance": "buy|accumulate|hold|trim|avoid", "conviction": 0.0, "summary": "..."}
}"#;

pub fn analysis_system() -> String {
    [
        "You are an equity research analyst producing a dashboard entry.",
        "Return ONLY one JSON object. No markdown, no prose, no comments, no trailing commas.",
        "Output shape:",
        ANALYSIS_SHAPE,
        "Rules:",
        "- scenarios: one to three entries, each case at most once",
        "- cagr is a signed annual fraction (-0.05 for a 5% yearly decline, 0.12 for 12% growth)",
        "- probabilities and conviction are fractions between 0 and 1",
        "- scenario probabilities sum to 1",
        "- likelihood and impact are integers 1..5",
        "- price is the latest price mentioned in the notes",
    ]
    .join("\n")
}

pub fn analysis_user(notes: &str, ticker_hint: Option<&str>, today: NaiveDate) -> String {
    let mut out = format!("Today is {today}.\n");
    if let Some(ticker) = ticker_hint {
        let _ = writeln!(out, "The notes concern ticker {ticker}.");
    }
    let _ = write!(out, "\nAnalyst notes:\n{notes}");
    out
}

pub fn analysis_repair(previous_output: &str, detail: &str) -> String {
    format!(
        "Your previous message could not be used: {detail}\n\n\
Output ONLY a single JSON object matching the shape below. No markdown or code fences.\n\n\
SHAPE:\n{ANALYSIS_SHAPE}\n\n\
INVALID OUTPUT (for reference only; DO NOT copy verbatim):\n{previous_output}"
    )
}

pub fn analysis_request(user: String) -> CompletionRequest {
    CompletionRequest {
        system: analysis_system(),
        user,
        max_tokens: Some(ANALYSIS_MAX_TOKENS),
        json_schema: Some(analysis_schema()),
    }
}

/// JSON schema handed to providers that support structured output.
pub fn analysis_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["ticker", "name", "price", "thesis", "scenarios", "verdict"],
        "properties": {
            "ticker": {"type": "string"},
            "name": {"type": "string"},
            "sector": {"type": "string"},
            "exchange": {"type": "string"},
            "price": {"type": "number"},
            "currency": {"type": "string"},
            "as_of_date": {"type": "string"},
            "headline": {"type": "string"},
            "thesis": {"type": "string"},
            "scenarios": {
                "type": "array",
                "minItems": 1,
                "maxItems": 3,
                "items": {
                    "type": "object",
                    "required": ["case", "cagr", "price_target"],
                    "properties": {
                        "case": {"type": "string", "enum": ["bear", "base", "bull"]},
                        "cagr": {"type": "number"},
                        "price_target": {"type": "number"},
                        "horizon_years": {"type": "integer"},
                        "probability": {"type": "number"},
                        "narrative": {"type": "string"}
                    }
                }
            },
            "risks": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["label", "likelihood", "impact"],
                    "properties": {
                        "label": {"type": "string"},
                        "category": {"type": "string"},
                        "likelihood": {"type": "integer"},
                        "impact": {"type": "integer"},
                        "mitigation": {"type": "string"}
                    }
                }
            },
            "acceleration": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["driver", "probability"],
                    "properties": {
                        "driver": {"type": "string"},
                        "probability": {"type": "number"},
                        "timeframe": {"type": "string"}
                    }
                }
            },
            "verdict": {
                "type": "object",
                "required": ["stance", "summary"],
                "properties": {
                    "stance": {"type": "string", "enum": ["buy", "accumulate", "hold", "trim", "avoid"]},
                    "conviction": {"type": "number"},
                    "summary": {"type": "string"}
                }
            }
        }
    })
}

pub fn commentary_request(profile: &EquityProfile, slide: Slide) -> CompletionRequest {
    CompletionRequest {
        system: [
            "You are a sell-side strategist narrating one slide of an equity dashboard.",
            "Reply with two to four plain sentences. No markdown, no lists, no JSON.",
            "Do not restate every number; say what matters and what would change the view.",
        ]
        .join("\n"),
        user: commentary_user(profile, slide),
        max_tokens: Some(COMMENTARY_MAX_TOKENS),
        json_schema: None,
    }
}

fn commentary_user(p: &EquityProfile, slide: Slide) -> String {
    let mut out = format!(
        "{} ({}) at {:.2} {} as of {}.\nSlide: {}\n\n",
        p.name,
        p.ticker,
        p.price,
        p.currency,
        p.as_of_date,
        slide.title()
    );

    match slide {
        Slide::Overview => {
            let _ = writeln!(out, "Sector: {}", p.sector);
            let _ = writeln!(out, "Headline: {}", p.headline);
            let _ = writeln!(out, "Thesis: {}", p.thesis);
        }
        Slide::Scenarios => {
            for s in &p.scenarios {
                let _ = writeln!(
                    out,
                    "- {}: target {:.2} ({:+.1}%), CAGR {:.1}% over {}y, probability {:.0}%. {}",
                    s.case.as_str(),
                    s.price_target,
                    s.upside(p.price) * 100.0,
                    s.cagr * 100.0,
                    s.horizon_years,
                    s.probability * 100.0,
                    s.narrative
                );
            }
            if let Some(t) = p.weighted_target() {
                let _ = writeln!(out, "Probability-weighted target: {t:.2}");
            }
        }
        Slide::RiskMap => {
            for r in p.risk_map() {
                let _ = writeln!(
                    out,
                    "- {} [{}]: likelihood {}/5, impact {}/5, score {}{}",
                    r.label,
                    r.category,
                    r.likelihood,
                    r.impact,
                    r.score(),
                    r.mitigation
                        .as_deref()
                        .map(|m| format!(", mitigation: {m}"))
                        .unwrap_or_default()
                );
            }
        }
        Slide::Acceleration => {
            for a in &p.acceleration {
                let _ = writeln!(
                    out,
                    "- {}: {:.0}% within {}",
                    a.driver,
                    a.probability * 100.0,
                    a.timeframe
                );
            }
        }
        Slide::Verdict => {
            let _ = writeln!(
                out,
                "Stance: {} (conviction {:.0}%)",
                p.verdict.stance,
                p.verdict.conviction * 100.0
            );
            let _ = writeln!(out, "Summary: {}", p.verdict.summary);
        }
    }

    out
}
