use crate::domain::equity::{
    AccelerationSignal, EquityProfile, ProfileOrigin, RiskFactor, Scenario, ScenarioCase, Stance,
    Verdict,
};
use anyhow::{bail, ensure};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const PROBABILITY_SUM_TOLERANCE: f64 = 0.05;
const MAX_HORIZON_YEARS: u32 = 10;

/// Shape the model is asked to emit. Looser than [`EquityProfile`]: optional
/// fields default and percentages are accepted where fractions are expected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmEquityAnalysis {
    pub ticker: String,
    pub name: String,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub as_of_date: Option<NaiveDate>,
    #[serde(default)]
    pub headline: Option<String>,
    pub thesis: String,
    pub scenarios: Vec<LlmScenario>,
    #[serde(default)]
    pub risks: Vec<LlmRisk>,
    #[serde(default)]
    pub acceleration: Vec<LlmAcceleration>,
    pub verdict: LlmVerdict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmScenario {
    pub case: String,
    pub cagr: f64,
    pub price_target: f64,
    #[serde(default)]
    pub horizon_years: Option<u32>,
    #[serde(default)]
    pub probability: Option<f64>,
    #[serde(default)]
    pub narrative: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRisk {
    pub label: String,
    #[serde(default)]
    pub category: Option<String>,
    pub likelihood: f64,
    pub impact: f64,
    #[serde(default)]
    pub mitigation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmAcceleration {
    pub driver: String,
    pub probability: f64,
    #[serde(default)]
    pub timeframe: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmVerdict {
    pub stance: String,
    #[serde(default)]
    pub conviction: Option<f64>,
    pub summary: String,
}

impl LlmEquityAnalysis {
    pub fn validate_and_into_profile(
        self,
        default_as_of_date: NaiveDate,
        origin: ProfileOrigin,
    ) -> anyhow::Result<EquityProfile> {
        let ticker = normalize_ticker(&self.ticker);
        ensure!(!ticker.is_empty(), "ticker must be non-empty");

        let scenarios = normalize_scenarios(self.scenarios, &ticker)?;

        let mut risks = Vec::with_capacity(self.risks.len());
        for r in self.risks {
            risks.push(RiskFactor {
                label: r.label.trim().to_string(),
                category: non_empty(r.category).unwrap_or_else(|| "general".to_string()),
                likelihood: risk_level("likelihood", r.likelihood)?,
                impact: risk_level("impact", r.impact)?,
                mitigation: non_empty(r.mitigation),
            });
        }

        let mut acceleration = Vec::with_capacity(self.acceleration.len());
        for a in self.acceleration {
            acceleration.push(AccelerationSignal {
                driver: a.driver.trim().to_string(),
                probability: as_fraction(a.probability),
                timeframe: non_empty(a.timeframe).unwrap_or_else(|| "unspecified".to_string()),
            });
        }

        let thesis = self.thesis.trim().to_string();
        let headline = non_empty(self.headline)
            .unwrap_or_else(|| thesis.split('.').next().unwrap_or_default().trim().to_string());

        let profile = EquityProfile {
            ticker,
            name: self.name.trim().to_string(),
            sector: non_empty(self.sector).unwrap_or_else(|| "Unclassified".to_string()),
            exchange: non_empty(self.exchange),
            price: self.price,
            currency: non_empty(self.currency)
                .map(|c| c.to_ascii_uppercase())
                .unwrap_or_else(|| "USD".to_string()),
            as_of_date: self.as_of_date.unwrap_or(default_as_of_date),
            headline,
            thesis,
            scenarios,
            risks,
            acceleration,
            verdict: Verdict {
                stance: parse_stance(&self.verdict.stance)?,
                conviction: self.verdict.conviction.map(as_fraction).unwrap_or(0.5),
                summary: self.verdict.summary.trim().to_string(),
            },
            origin,
        };

        validate_profile(&profile)?;
        Ok(profile)
    }
}

/// Checks every invariant a dashboard entry must hold, whether authored or
/// generated.
pub fn validate_profile(p: &EquityProfile) -> anyhow::Result<()> {
    ensure!(!p.ticker.trim().is_empty(), "ticker must be non-empty");
    ensure!(!p.name.trim().is_empty(), "{}: name must be non-empty", p.ticker);
    ensure!(
        p.price.is_finite() && p.price > 0.0,
        "{}: price must be positive (got {})",
        p.ticker,
        p.price
    );
    ensure!(
        p.currency.len() == 3 && p.currency.chars().all(|c| c.is_ascii_uppercase()),
        "{}: currency must be a 3-letter code (got {})",
        p.ticker,
        p.currency
    );
    ensure!(!p.thesis.trim().is_empty(), "{}: thesis must be non-empty", p.ticker);

    ensure!(
        (1..=3).contains(&p.scenarios.len()),
        "{}: expected 1..=3 scenarios (got {})",
        p.ticker,
        p.scenarios.len()
    );
    let mut seen = BTreeSet::new();
    for s in &p.scenarios {
        ensure!(
            seen.insert(s.case),
            "{}: duplicate scenario case {}",
            p.ticker,
            s.case.as_str()
        );
        ensure!(
            s.cagr.is_finite(),
            "{}: {} cagr must be finite",
            p.ticker,
            s.case.as_str()
        );
        ensure!(
            s.price_target.is_finite() && s.price_target > 0.0,
            "{}: {} price_target must be positive",
            p.ticker,
            s.case.as_str()
        );
        ensure!(
            (1..=MAX_HORIZON_YEARS).contains(&s.horizon_years),
            "{}: {} horizon_years must be 1..={MAX_HORIZON_YEARS} (got {})",
            p.ticker,
            s.case.as_str(),
            s.horizon_years
        );
        ensure!(
            (0.0..=1.0).contains(&s.probability),
            "{}: {} probability must be between 0 and 1 (got {})",
            p.ticker,
            s.case.as_str(),
            s.probability
        );
    }

    for r in &p.risks {
        ensure!(!r.label.is_empty(), "{}: risk label must be non-empty", p.ticker);
        ensure!(
            (1..=5).contains(&r.likelihood) && (1..=5).contains(&r.impact),
            "{}: risk '{}' likelihood/impact must be 1..=5",
            p.ticker,
            r.label
        );
    }

    for a in &p.acceleration {
        ensure!(!a.driver.is_empty(), "{}: acceleration driver must be non-empty", p.ticker);
        ensure!(
            (0.0..=1.0).contains(&a.probability),
            "{}: acceleration '{}' probability must be between 0 and 1 (got {})",
            p.ticker,
            a.driver,
            a.probability
        );
    }

    ensure!(
        (0.0..=1.0).contains(&p.verdict.conviction),
        "{}: conviction must be between 0 and 1 (got {})",
        p.ticker,
        p.verdict.conviction
    );
    ensure!(
        !p.verdict.summary.trim().is_empty(),
        "{}: verdict summary must be non-empty",
        p.ticker
    );

    Ok(())
}

pub fn normalize_ticker(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

fn normalize_scenarios(raw: Vec<LlmScenario>, ticker: &str) -> anyhow::Result<Vec<Scenario>> {
    let mut out = Vec::with_capacity(raw.len());
    let mut missing = 0usize;
    for s in raw {
        let probability = s.probability.map(as_fraction);
        if probability.is_none() {
            missing += 1;
        }
        out.push((
            Scenario {
                case: parse_case(&s.case)?,
                cagr: as_growth_fraction(s.cagr),
                price_target: s.price_target,
                horizon_years: s.horizon_years.unwrap_or(3),
                probability: probability.unwrap_or(0.0),
                narrative: non_empty(s.narrative).unwrap_or_default(),
            },
            probability.is_none(),
        ));
    }

    // Unstated probabilities split whatever mass the stated ones left over.
    if missing > 0 {
        let stated: f64 = out.iter().filter(|(_, m)| !m).map(|(s, _)| s.probability).sum();
        let share = ((1.0 - stated).max(0.0)) / missing as f64;
        for (s, m) in &mut out {
            if *m {
                s.probability = share;
            }
        }
    }

    let mut scenarios: Vec<Scenario> = out.into_iter().map(|(s, _)| s).collect();
    let total: f64 = scenarios.iter().map(|s| s.probability).sum();
    if total > 0.0 && (total - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
        tracing::warn!(ticker, total, "scenario probabilities do not sum to 1; normalizing");
        for s in &mut scenarios {
            s.probability /= total;
        }
    }
    scenarios.sort_by_key(|s| s.case);
    Ok(scenarios)
}

fn parse_case(raw: &str) -> anyhow::Result<ScenarioCase> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "bear" | "bearish" | "downside" => Ok(ScenarioCase::Bear),
        "base" | "neutral" => Ok(ScenarioCase::Base),
        "bull" | "bullish" | "upside" => Ok(ScenarioCase::Bull),
        other => bail!("unknown scenario case: {other}"),
    }
}

fn parse_stance(raw: &str) -> anyhow::Result<Stance> {
    match raw.trim().to_ascii_lowercase().replace('-', " ").as_str() {
        "buy" | "strong buy" => Ok(Stance::Buy),
        "accumulate" | "outperform" | "overweight" => Ok(Stance::Accumulate),
        "hold" | "neutral" => Ok(Stance::Hold),
        "trim" | "underweight" | "reduce" => Ok(Stance::Trim),
        "avoid" | "sell" | "strong sell" => Ok(Stance::Avoid),
        other => bail!("unknown verdict stance: {other}"),
    }
}

/// Probabilities given as percentages (1 < p <= 100) become fractions.
fn as_fraction(v: f64) -> f64 {
    if v > 1.0 && v <= 100.0 {
        v / 100.0
    } else {
        v
    }
}

/// Growth rates above 200% in magnitude are read as percentages.
fn as_growth_fraction(v: f64) -> f64 {
    if v.abs() > 2.0 {
        v / 100.0
    } else {
        v
    }
}

fn risk_level(field: &str, v: f64) -> anyhow::Result<u8> {
    ensure!(v.is_finite(), "risk {field} must be finite");
    let rounded = v.round();
    ensure!(
        (1.0..=5.0).contains(&rounded),
        "risk {field} must be 1..=5 (got {v})"
    );
    Ok(rounded as u8)
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
