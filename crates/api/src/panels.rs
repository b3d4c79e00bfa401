use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use stockdeck_core::insight::{InsightPanel, InsightSource, InsightState};

const MAX_PANELS: usize = 1024;

struct PanelSlot {
    panel: InsightPanel,
    last_used: u64,
}

#[derive(Default)]
struct Panels {
    slots: HashMap<String, PanelSlot>,
    clock: u64,
}

impl Panels {
    fn touch(&mut self, panel_id: &str) -> Option<InsightPanel> {
        self.clock += 1;
        let now = self.clock;
        let slot = self.slots.get_mut(panel_id)?;
        slot.last_used = now;
        Some(slot.panel.clone())
    }

    /// Drops the least recently used panel, preferring ones with no request
    /// in flight.
    fn evict_one(&mut self) {
        let victim = self
            .slots
            .iter()
            .min_by_key(|(_, slot)| {
                let loading = matches!(slot.panel.current(), InsightState::Loading { .. });
                (loading, slot.last_used)
            })
            .map(|(id, _)| id.clone());
        if let Some(id) = victim {
            tracing::debug!(panel_id = %id, "evicting insight panel");
            self.slots.remove(&id);
        }
    }
}

/// Viewer panels keyed by a client-chosen id. All panels share one cache.
#[derive(Clone)]
pub struct PanelRegistry {
    source: InsightSource,
    debounce: Duration,
    max_panels: usize,
    panels: Arc<RwLock<Panels>>,
}

impl PanelRegistry {
    pub fn new(source: InsightSource, debounce: Duration) -> Self {
        Self {
            source,
            debounce,
            max_panels: MAX_PANELS,
            panels: Arc::new(RwLock::new(Panels::default())),
        }
    }

    pub async fn get(&self, panel_id: &str) -> Option<InsightPanel> {
        self.panels.write().await.touch(panel_id)
    }

    pub async fn get_or_create(&self, panel_id: &str) -> InsightPanel {
        let mut panels = self.panels.write().await;
        if let Some(panel) = panels.touch(panel_id) {
            return panel;
        }
        while panels.slots.len() >= self.max_panels.max(1) {
            panels.evict_one();
        }

        tracing::debug!(panel_id, "creating insight panel");
        let panel = InsightPanel::new(self.source.clone(), self.debounce);
        let last_used = panels.clock;
        panels.slots.insert(
            panel_id.to_string(),
            PanelSlot {
                panel: panel.clone(),
                last_used,
            },
        );
        panel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedLlm;
    use stockdeck_core::catalog::Catalog;
    use stockdeck_core::domain::slide::Slide;
    use stockdeck_core::insight::{InsightKey, InsightState};

    #[tokio::test(start_paused = true)]
    async fn panels_are_independent_but_share_cache() {
        let llm = Arc::new(ScriptedLlm::text("Margins hold."));
        let catalog = Catalog::builtin().unwrap();
        let registry = PanelRegistry::new(
            InsightSource::new(llm.clone(), catalog),
            Duration::from_millis(100),
        );

        let a = registry.get_or_create("a").await;
        a.select(InsightKey::new("NVDA", Slide::Overview)).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let b = registry.get_or_create("b").await;
        assert_eq!(b.current(), InsightState::Idle);
        b.select(InsightKey::new("NVDA", Slide::Overview)).await;

        assert!(matches!(b.current(), InsightState::Ready { cached: true, .. }));
        assert_eq!(llm.calls(), 1);
        assert!(registry.get("missing").await.is_none());
    }

    fn registry(llm: Arc<ScriptedLlm>, max_panels: usize) -> PanelRegistry {
        let mut registry = PanelRegistry::new(
            InsightSource::new(llm, Catalog::builtin().unwrap()),
            Duration::from_millis(100),
        );
        registry.max_panels = max_panels;
        registry
    }

    #[tokio::test]
    async fn registry_is_capped() {
        let registry = registry(Arc::new(ScriptedLlm::text("Fine.")), 3);
        for i in 0..50 {
            registry.get_or_create(&format!("p{i}")).await;
        }
        assert_eq!(registry.panels.read().await.slots.len(), 3);
        for i in 47..50 {
            assert!(registry.get(&format!("p{i}")).await.is_some(), "p{i} evicted");
        }
        assert!(registry.get("p0").await.is_none());
    }

    #[tokio::test]
    async fn least_recently_used_panel_goes_first() {
        let registry = registry(Arc::new(ScriptedLlm::text("Fine.")), 2);
        registry.get_or_create("a").await;
        registry.get_or_create("b").await;
        registry.get("a").await.unwrap();

        registry.get_or_create("c").await;
        assert!(registry.get("a").await.is_some());
        assert!(registry.get("b").await.is_none());
        assert!(registry.get("c").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_panels_are_evicted_before_loading_ones() {
        let registry = registry(Arc::new(ScriptedLlm::text("Fine.")), 2);
        let a = registry.get_or_create("a").await;
        a.select(InsightKey::new("NVDA", Slide::Verdict)).await;
        assert!(matches!(a.current(), InsightState::Loading { .. }));
        registry.get_or_create("b").await;

        registry.get_or_create("c").await;
        assert!(registry.get("a").await.is_some());
        assert!(registry.get("b").await.is_none());
    }
}
