use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One dashboard entry: a single equity with its valuation scenarios, risk map,
/// acceleration probabilities and verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityProfile {
    pub ticker: String,
    pub name: String,
    pub sector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    pub price: f64,
    pub currency: String,
    pub as_of_date: NaiveDate,
    pub headline: String,
    pub thesis: String,
    pub scenarios: Vec<Scenario>,
    pub risks: Vec<RiskFactor>,
    pub acceleration: Vec<AccelerationSignal>,
    pub verdict: Verdict,
    #[serde(default)]
    pub origin: ProfileOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioCase {
    Bear,
    Base,
    Bull,
}

impl ScenarioCase {
    pub fn as_str(self) -> &'static str {
        match self {
            ScenarioCase::Bear => "bear",
            ScenarioCase::Base => "base",
            ScenarioCase::Bull => "bull",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub case: ScenarioCase,
    /// Annualized growth as a fraction (0.12 == 12%).
    pub cagr: f64,
    pub price_target: f64,
    pub horizon_years: u32,
    pub probability: f64,
    pub narrative: String,
}

impl Scenario {
    /// Total move from `price` to the scenario target, as a fraction.
    pub fn upside(&self, price: f64) -> f64 {
        if price <= 0.0 {
            return 0.0;
        }
        self.price_target / price - 1.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub label: String,
    pub category: String,
    pub likelihood: u8,
    pub impact: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mitigation: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl RiskFactor {
    pub fn score(&self) -> u8 {
        self.likelihood.saturating_mul(self.impact)
    }

    pub fn severity(&self) -> Severity {
        match self.score() {
            0..=6 => Severity::Low,
            7..=12 => Severity::Medium,
            13..=19 => Severity::High,
            _ => Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccelerationSignal {
    pub driver: String,
    pub probability: f64,
    pub timeframe: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    Buy,
    Accumulate,
    Hold,
    Trim,
    Avoid,
}

impl Stance {
    pub fn as_str(self) -> &'static str {
        match self {
            Stance::Buy => "buy",
            Stance::Accumulate => "accumulate",
            Stance::Hold => "hold",
            Stance::Trim => "trim",
            Stance::Avoid => "avoid",
        }
    }
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub stance: Stance,
    pub conviction: f64,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProfileOrigin {
    #[default]
    Curated,
    Generated {
        provider: String,
        generated_at: DateTime<Utc>,
    },
}

impl EquityProfile {
    /// Probability-weighted price target across scenarios.
    ///
    /// Returns `None` when no scenario carries any probability mass.
    pub fn weighted_target(&self) -> Option<f64> {
        let mass: f64 = self.scenarios.iter().map(|s| s.probability).sum();
        if mass <= 0.0 {
            return None;
        }
        let weighted: f64 = self
            .scenarios
            .iter()
            .map(|s| s.price_target * s.probability)
            .sum();
        Some(weighted / mass)
    }

    pub fn scenario(&self, case: ScenarioCase) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.case == case)
    }

    /// Risks ordered by score, highest first. Ties keep authored order.
    pub fn risk_map(&self) -> Vec<&RiskFactor> {
        let mut out: Vec<&RiskFactor> = self.risks.iter().collect();
        out.sort_by(|a, b| b.score().cmp(&a.score()));
        out
    }

    pub fn summary(&self) -> EquitySummary {
        EquitySummary {
            ticker: self.ticker.clone(),
            name: self.name.clone(),
            sector: self.sector.clone(),
            price: self.price,
            currency: self.currency.clone(),
            stance: self.verdict.stance,
            weighted_target: self.weighted_target(),
            origin: self.origin.clone(),
        }
    }
}

/// Compact catalog row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquitySummary {
    pub ticker: String,
    pub name: String,
    pub sector: String,
    pub price: f64,
    pub currency: String,
    pub stance: Stance,
    pub weighted_target: Option<f64>,
    pub origin: ProfileOrigin,
}
