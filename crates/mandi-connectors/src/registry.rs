//! Connector registry
//!
//! Runtime-mutable set of configured connectors plus a rolling per-connector
//! health window. The fan-out and the purchase executor always work against
//! a point-in-time snapshot; registry changes never affect calls already in
//! flight.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::connector::{Capability, Connector};

const DEFAULT_HEALTH_WINDOW: Duration = Duration::from_secs(300);

#[derive(Debug, Default)]
struct HealthWindow {
    samples: VecDeque<(Instant, bool)>,
}

impl HealthWindow {
    fn record(&mut self, ok: bool, window: Duration) {
        let now = Instant::now();
        self.samples.push_back((now, ok));
        while let Some((at, _)) = self.samples.front() {
            if now.duration_since(*at) > window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn health(&self, window: Duration) -> f64 {
        let now = Instant::now();
        let mut total = 0u32;
        let mut ok = 0u32;
        for (at, success) in &self.samples {
            if now.duration_since(*at) <= window {
                total += 1;
                if *success {
                    ok += 1;
                }
            }
        }
        if total == 0 {
            1.0
        } else {
            f64::from(ok) / f64::from(total)
        }
    }
}

/// Registry of configured connectors.
pub struct ConnectorRegistry {
    connectors: RwLock<HashMap<String, Arc<dyn Connector>>>,
    health: RwLock<HashMap<String, HealthWindow>>,
    window: Duration,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_HEALTH_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            connectors: RwLock::new(HashMap::new()),
            health: RwLock::new(HashMap::new()),
            window,
        }
    }

    pub async fn add(&self, connector: Arc<dyn Connector>) {
        let id = connector.id().to_string();
        self.connectors.write().await.insert(id, connector);
    }

    /// Remove a connector. Missing ids are not an error.
    pub async fn remove(&self, id: &str) -> bool {
        self.connectors.write().await.remove(id).is_some()
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connectors.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.connectors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connectors.read().await.is_empty()
    }

    /// Point-in-time snapshot of connectors with the given capability,
    /// ordered by id for deterministic fan-out.
    pub async fn snapshot(&self, capability: Capability) -> Vec<Arc<dyn Connector>> {
        let guard = self.connectors.read().await;
        let mut selected: Vec<Arc<dyn Connector>> = guard
            .values()
            .filter(|c| c.can(capability))
            .cloned()
            .collect();
        selected.sort_by(|a, b| a.id().cmp(b.id()));
        selected
    }

    pub async fn record_success(&self, id: &str) {
        self.health
            .write()
            .await
            .entry(id.to_string())
            .or_default()
            .record(true, self.window);
    }

    pub async fn record_failure(&self, id: &str) {
        self.health
            .write()
            .await
            .entry(id.to_string())
            .or_default()
            .record(false, self.window);
    }

    /// Health figure in [0, 1] for one connector; unknown ids are healthy.
    pub async fn health(&self, id: &str) -> f64 {
        self.health
            .read()
            .await
            .get(id)
            .map(|w| w.health(self.window))
            .unwrap_or(1.0)
    }

    /// Health for every registered connector.
    pub async fn health_map(&self) -> HashMap<String, f64> {
        let ids = self.list().await;
        let guard = self.health.read().await;
        ids.into_iter()
            .map(|id| {
                let health = guard
                    .get(&id)
                    .map(|w| w.health(self.window))
                    .unwrap_or(1.0);
                (id, health)
            })
            .collect()
    }

    /// Connectors whose rolling health dropped below `threshold`.
    pub async fn unhealthy(&self, threshold: f64) -> BTreeSet<String> {
        self.health_map()
            .await
            .into_iter()
            .filter(|(_, h)| *h < threshold)
            .map(|(id, _)| id)
            .collect()
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalogConnector;

    #[test]
    fn test_registry_add_remove_list() {
        tokio_test::block_on(async {
            let registry = ConnectorRegistry::new();
            assert!(registry.is_empty().await);

            registry
                .add(Arc::new(StaticCatalogConnector::new("zeta", vec![])))
                .await;
            registry
                .add(Arc::new(StaticCatalogConnector::new("alpha", vec![])))
                .await;
            assert_eq!(registry.list().await, vec!["alpha", "zeta"]);

            assert!(registry.remove("zeta").await);
            assert!(!registry.remove("zeta").await);
            assert_eq!(registry.len().await, 1);
        });
    }

    #[test]
    fn test_snapshot_is_ordered_and_capability_filtered() {
        tokio_test::block_on(async {
            let registry = ConnectorRegistry::new();
            registry
                .add(Arc::new(StaticCatalogConnector::new("b", vec![])))
                .await;
            registry
                .add(Arc::new(StaticCatalogConnector::new("a", vec![])))
                .await;

            let snapshot = registry.snapshot(Capability::Search).await;
            let ids: Vec<&str> = snapshot.iter().map(|c| c.id()).collect();
            assert_eq!(ids, vec!["a", "b"]);
        });
    }

    #[test]
    fn test_health_tracks_failures() {
        tokio_test::block_on(async {
            let registry = ConnectorRegistry::new();
            assert_eq!(registry.health("ghost").await, 1.0);

            registry.record_failure("fast").await;
            registry.record_failure("fast").await;
            registry.record_success("fast").await;
            registry.record_failure("fast").await;

            let health = registry.health("fast").await;
            assert!((health - 0.25).abs() < 1e-9);

            registry
                .add(Arc::new(StaticCatalogConnector::new("fast", vec![])))
                .await;
            let unhealthy = registry.unhealthy(0.5).await;
            assert!(unhealthy.contains("fast"));
        });
    }
}
