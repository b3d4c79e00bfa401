use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A view within one equity's deck. Order is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slide {
    Overview,
    Scenarios,
    RiskMap,
    Acceleration,
    Verdict,
}

impl Slide {
    pub const ALL: [Slide; 5] = [
        Slide::Overview,
        Slide::Scenarios,
        Slide::RiskMap,
        Slide::Acceleration,
        Slide::Verdict,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Slide::Overview => "overview",
            Slide::Scenarios => "scenarios",
            Slide::RiskMap => "risk_map",
            Slide::Acceleration => "acceleration",
            Slide::Verdict => "verdict",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Slide::Overview => "Overview",
            Slide::Scenarios => "Valuation scenarios",
            Slide::RiskMap => "Risk map",
            Slide::Acceleration => "Acceleration probabilities",
            Slide::Verdict => "Verdict",
        }
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|s| *s == self).unwrap_or(0)
    }

    pub fn next(self) -> Slide {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    pub fn prev(self) -> Slide {
        Self::ALL[(self.index() + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

impl fmt::Display for Slide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Slide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let norm = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match norm.as_str() {
            "overview" => Ok(Slide::Overview),
            "scenarios" => Ok(Slide::Scenarios),
            "risk_map" | "risks" => Ok(Slide::RiskMap),
            "acceleration" => Ok(Slide::Acceleration),
            "verdict" => Ok(Slide::Verdict),
            _ => bail!("unknown slide: {s}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_wraps_around() {
        assert_eq!(Slide::Verdict.next(), Slide::Overview);
        assert_eq!(Slide::Overview.prev(), Slide::Verdict);
        assert_eq!(Slide::Scenarios.next(), Slide::RiskMap);
    }

    #[test]
    fn parses_loose_names() {
        assert_eq!("risk-map".parse::<Slide>().unwrap(), Slide::RiskMap);
        assert_eq!(" Risk Map ".parse::<Slide>().unwrap(), Slide::RiskMap);
        assert_eq!("VERDICT".parse::<Slide>().unwrap(), Slide::Verdict);
        assert!("charts".parse::<Slide>().is_err());
    }
}
