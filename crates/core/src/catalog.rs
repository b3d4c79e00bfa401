use crate::domain::contract::{normalize_ticker, validate_profile};
use crate::domain::equity::{EquityProfile, EquitySummary};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

const BUILTIN_CATALOG: &str = include_str!("../data/catalog.json");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFile {
    pub equities: Vec<EquityProfile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    Inserted,
    Replaced,
}

/// In-memory dashboard entries in display order. Cheap to clone; clones share
/// the same entries.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Arc<RwLock<Vec<EquityProfile>>>,
}

impl Catalog {
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_json(BUILTIN_CATALOG).context("bundled catalog is invalid")
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid catalog {}", path.display()))
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let file: CatalogFile =
            serde_json::from_str(text).context("catalog JSON does not match the expected shape")?;
        Self::from_entries(file.equities)
    }

    pub fn from_entries(entries: Vec<EquityProfile>) -> anyhow::Result<Self> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(entries.len());
        for mut p in entries {
            p.ticker = normalize_ticker(&p.ticker);
            validate_profile(&p)?;
            anyhow::ensure!(
                seen.insert(p.ticker.clone()),
                "duplicate ticker in catalog: {}",
                p.ticker
            );
            out.push(p);
        }
        Ok(Self {
            entries: Arc::new(RwLock::new(out)),
        })
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn list(&self) -> Vec<EquitySummary> {
        self.entries
            .read()
            .await
            .iter()
            .map(EquityProfile::summary)
            .collect()
    }

    pub async fn get(&self, ticker: &str) -> Option<EquityProfile> {
        let ticker = normalize_ticker(ticker);
        self.entries
            .read()
            .await
            .iter()
            .find(|p| p.ticker == ticker)
            .cloned()
    }

    /// Puts `profile` first in display order, replacing any entry with the same
    /// ticker.
    pub async fn insert(&self, mut profile: EquityProfile) -> anyhow::Result<InsertOutcome> {
        profile.ticker = normalize_ticker(&profile.ticker);
        validate_profile(&profile)?;

        let mut entries = self.entries.write().await;
        let outcome = match entries.iter().position(|p| p.ticker == profile.ticker) {
            Some(idx) => {
                entries.remove(idx);
                InsertOutcome::Replaced
            }
            None => InsertOutcome::Inserted,
        };
        tracing::debug!(ticker = %profile.ticker, ?outcome, "catalog insert");
        entries.insert(0, profile);
        Ok(outcome)
    }

    pub async fn export_json(&self) -> anyhow::Result<String> {
        let file = CatalogFile {
            equities: self.entries.read().await.clone(),
        };
        serde_json::to_string_pretty(&file).context("failed to serialize catalog")
    }
}
