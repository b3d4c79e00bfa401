//! Per-slide AI commentary.
//!
//! A panel follows whatever slide the viewer is on. Rapid navigation is
//! debounced, and only the most recent selection may publish its result; replies
//! to older selections are cached but never shown.

use crate::catalog::Catalog;
use crate::domain::equity::EquityProfile;
use crate::domain::slide::Slide;
use crate::llm::{json, prompt, LlmClient};
use anyhow::Context;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

pub const INSIGHT_FALLBACK: &str = "AI commentary is unavailable for this slide right now.";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct InsightKey {
    pub ticker: String,
    pub slide: Slide,
}

impl InsightKey {
    pub fn new(ticker: &str, slide: Slide) -> Self {
        Self {
            ticker: ticker.trim().to_ascii_uppercase(),
            slide,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InsightState {
    Idle,
    Loading {
        key: InsightKey,
    },
    Ready {
        key: InsightKey,
        commentary: String,
        cached: bool,
    },
    Unavailable {
        key: InsightKey,
        message: String,
    },
}

/// Commentary plus the entry it was written about.
struct CachedCommentary {
    profile: EquityProfile,
    text: String,
}

/// Model access plus the commentary cache. Shared by every panel.
#[derive(Clone)]
pub struct InsightSource {
    llm: Arc<dyn LlmClient>,
    catalog: Catalog,
    cache: Arc<Mutex<HashMap<InsightKey, CachedCommentary>>>,
}

impl InsightSource {
    pub fn new(llm: Arc<dyn LlmClient>, catalog: Catalog) -> Self {
        Self {
            llm,
            catalog,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Cached commentary, as long as the catalog entry is unchanged since it
    /// was written. Outdated entries are dropped.
    pub async fn cached(&self, key: &InsightKey) -> Option<String> {
        let current = self.catalog.get(&key.ticker).await;
        let mut cache = self.cache.lock().await;
        let hit = cache.get(key)?;
        if current.as_ref() == Some(&hit.profile) {
            return Some(hit.text.clone());
        }
        cache.remove(key);
        tracing::debug!(ticker = %key.ticker, slide = %key.slide, "entry changed; dropping cached commentary");
        None
    }

    /// Calls the model and caches a usable reply. Failures are not cached.
    pub async fn fetch(&self, key: &InsightKey) -> anyhow::Result<String> {
        let profile = self
            .catalog
            .get(&key.ticker)
            .await
            .with_context(|| format!("unknown ticker: {}", key.ticker))?;

        let completion = self
            .llm
            .complete(prompt::commentary_request(&profile, key.slide))
            .await?;
        let commentary = json::clean_commentary(&completion.text)
            .context("model returned empty commentary")?;

        self.cache.lock().await.insert(
            key.clone(),
            CachedCommentary {
                profile,
                text: commentary.clone(),
            },
        );
        Ok(commentary)
    }

    /// Cached or fresh commentary, or the fallback text.
    pub async fn commentary(&self, key: &InsightKey) -> String {
        if let Some(hit) = self.cached(key).await {
            return hit;
        }
        match self.fetch(key).await {
            Ok(c) => c,
            Err(err) => {
                tracing::warn!(ticker = %key.ticker, slide = %key.slide, error = %err, "commentary failed");
                INSIGHT_FALLBACK.to_string()
            }
        }
    }
}

/// One viewer's commentary pane.
#[derive(Clone)]
pub struct InsightPanel {
    source: InsightSource,
    debounce: Duration,
    generation: Arc<AtomicU64>,
    state: Arc<watch::Sender<InsightState>>,
}

impl InsightPanel {
    pub fn new(source: InsightSource, debounce: Duration) -> Self {
        let (tx, _rx) = watch::channel(InsightState::Idle);
        Self {
            source,
            debounce,
            generation: Arc::new(AtomicU64::new(0)),
            state: Arc::new(tx),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<InsightState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> InsightState {
        self.state.borrow().clone()
    }

    /// Points the panel at `key`. Returns the generation assigned to this
    /// selection.
    pub async fn select(&self, key: InsightKey) -> u64 {
        let gen = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(commentary) = self.source.cached(&key).await {
            self.publish(
                gen,
                InsightState::Ready {
                    key,
                    commentary,
                    cached: true,
                },
            );
            return gen;
        }

        self.publish(gen, InsightState::Loading { key: key.clone() });

        let panel = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(panel.debounce).await;
            if !panel.is_current(gen) {
                tracing::trace!(gen, "insight request superseded during debounce");
                return;
            }

            let next = match panel.source.fetch(&key).await {
                Ok(commentary) => InsightState::Ready {
                    key,
                    commentary,
                    cached: false,
                },
                Err(err) => {
                    tracing::warn!(
                        ticker = %key.ticker,
                        slide = %key.slide,
                        error = %err,
                        "insight request failed"
                    );
                    InsightState::Unavailable {
                        key,
                        message: INSIGHT_FALLBACK.to_string(),
                    }
                }
            };

            if !panel.publish(gen, next) {
                tracing::debug!(gen, "discarding stale insight reply");
            }
        });

        gen
    }

    fn is_current(&self, gen: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == gen
    }

    /// Publishes only while `gen` is the latest selection. The check runs under
    /// the channel lock so an older reply cannot overwrite a newer state.
    fn publish(&self, gen: u64, next: InsightState) -> bool {
        let generation = &self.generation;
        self.state.send_if_modified(|state| {
            if generation.load(Ordering::SeqCst) != gen {
                return false;
            }
            *state = next;
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::equity::fixtures::profile;
    use crate::llm::testing::FakeLlm;

    const DEBOUNCE: Duration = Duration::from_millis(300);

    fn setup(llm: Arc<FakeLlm>) -> InsightPanel {
        let catalog = Catalog::from_entries(vec![profile("AAA"), profile("BBB")]).unwrap();
        InsightPanel::new(InsightSource::new(llm, catalog), DEBOUNCE)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_secs(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_navigation_makes_one_call() {
        let llm = Arc::new(FakeLlm::default());
        let panel = setup(llm.clone());

        for slide in Slide::ALL {
            panel.select(InsightKey::new("AAA", slide)).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(matches!(panel.current(), InsightState::Loading { .. }));

        settle().await;
        assert_eq!(llm.calls(), 1);
        match panel.current() {
            InsightState::Ready { key, cached, .. } => {
                assert_eq!(key, InsightKey::new("AAA", Slide::Verdict));
                assert!(!cached);
            }
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn latest_request_wins_over_slow_reply() {
        let llm = Arc::new(FakeLlm::with_delay(Duration::from_secs(2)));
        let panel = setup(llm.clone());
        let first = InsightKey::new("AAA", Slide::Overview);
        let second = InsightKey::new("AAA", Slide::Scenarios);

        panel.select(first.clone()).await;
        // First request is now in flight.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(llm.calls(), 1);
        panel.select(second.clone()).await;

        settle().await;
        assert_eq!(llm.calls(), 2);
        assert_eq!(
            panel.current(),
            InsightState::Ready {
                key: second,
                commentary: "reply #2".to_string(),
                cached: false,
            }
        );
        // The superseded reply still lands in the cache.
        assert_eq!(
            panel.source.cached(&first).await.as_deref(),
            Some("reply #1")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn revisiting_a_slide_uses_cache() {
        let llm = Arc::new(FakeLlm::default());
        let panel = setup(llm.clone());
        let a = InsightKey::new("AAA", Slide::RiskMap);
        let b = InsightKey::new("BBB", Slide::RiskMap);

        panel.select(a.clone()).await;
        settle().await;
        panel.select(b).await;
        settle().await;
        panel.select(a.clone()).await;

        assert_eq!(llm.calls(), 2);
        assert_eq!(
            panel.current(),
            InsightState::Ready {
                key: a,
                commentary: "reply #1".to_string(),
                cached: true,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_an_entry_refreshes_its_commentary() {
        let llm = Arc::new(FakeLlm::default());
        let panel = setup(llm.clone());
        let key = InsightKey::new("AAA", Slide::Overview);

        panel.select(key.clone()).await;
        settle().await;
        assert_eq!(llm.calls(), 1);

        let mut revised = profile("AAA");
        revised.price = 999.0;
        panel.source.catalog.insert(revised).await.unwrap();

        panel.select(key.clone()).await;
        assert!(matches!(panel.current(), InsightState::Loading { .. }));
        settle().await;
        assert_eq!(llm.calls(), 2);
        assert_eq!(
            panel.current(),
            InsightState::Ready {
                key: key.clone(),
                commentary: "reply #2".to_string(),
                cached: false,
            }
        );
        assert_eq!(panel.source.cached(&key).await.as_deref(), Some("reply #2"));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_show_fallback_and_are_retried() {
        let llm = Arc::new(FakeLlm::default());
        llm.push_err("status=503");
        let panel = setup(llm.clone());
        let key = InsightKey::new("AAA", Slide::Verdict);

        panel.select(key.clone()).await;
        settle().await;
        assert_eq!(
            panel.current(),
            InsightState::Unavailable {
                key: key.clone(),
                message: INSIGHT_FALLBACK.to_string(),
            }
        );

        panel.select(key).await;
        settle().await;
        assert_eq!(llm.calls(), 2);
        assert!(matches!(panel.current(), InsightState::Ready { cached: false, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn blank_commentary_is_unavailable() {
        let llm = Arc::new(FakeLlm::default());
        llm.push_ok("   ");
        let panel = setup(llm.clone());
        panel.select(InsightKey::new("AAA", Slide::Overview)).await;
        settle().await;
        assert!(matches!(panel.current(), InsightState::Unavailable { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_ticker_never_reaches_model() {
        let llm = Arc::new(FakeLlm::default());
        let panel = setup(llm.clone());
        panel.select(InsightKey::new("ZZZ", Slide::Overview)).await;
        settle().await;
        assert_eq!(llm.calls(), 0);
        assert!(matches!(panel.current(), InsightState::Unavailable { .. }));
    }

    #[tokio::test]
    async fn source_commentary_falls_back_on_error() {
        let llm = Arc::new(FakeLlm::default());
        llm.push_err("status=500");
        let catalog = Catalog::from_entries(vec![profile("AAA")]).unwrap();
        let source = InsightSource::new(llm, catalog);
        let key = InsightKey::new("aaa", Slide::Overview);
        assert_eq!(source.commentary(&key).await, INSIGHT_FALLBACK);
        assert_eq!(source.commentary(&key).await, "reply #2");
        assert_eq!(source.commentary(&key).await, "reply #2");
    }
}
