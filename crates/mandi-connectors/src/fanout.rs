//! Search fan-out
//!
//! Issues one search per capable connector, all concurrently, under a global
//! stage budget. One connector failing never fails the fan-out; only the
//! empty and all-failed cases do. A system-wide semaphore bounds in-flight
//! searches across every run; excess callers wait in a bounded queue and
//! overflow aborts the offending run's search.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use mandi_core::types::{SearchFailure, SearchHits};

use crate::connector::{Capability, ConnectorError, SearchQuery};
use crate::registry::ConnectorRegistry;

/// Fan-out tuning.
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Budget for a single connector call, capped by the remaining stage budget.
    pub per_connector_budget: Duration,
    /// System-wide cap on concurrent connector searches.
    pub max_in_flight: usize,
    /// Callers allowed to wait for a permit before `overloaded` is returned.
    pub max_queued: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            per_connector_budget: Duration::from_secs(8),
            max_in_flight: 16,
            max_queued: 32,
        }
    }
}

/// Fan-out failure modes. Individual connector errors are absorbed into the
/// hit map instead.
#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    #[error("no connectors available: {0}")]
    NoConnectors(String),

    #[error("search overloaded: {0}")]
    Overloaded(String),

    #[error("search cancelled")]
    Cancelled,
}

/// Decrements the queue counter even when the waiting future is dropped by
/// cancellation.
struct QueueSlot<'a>(&'a AtomicUsize);

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded concurrent search dispatcher.
pub struct SearchFanout {
    registry: Arc<ConnectorRegistry>,
    permits: Arc<Semaphore>,
    waiting: AtomicUsize,
    config: FanoutConfig,
}

impl SearchFanout {
    pub fn new(registry: Arc<ConnectorRegistry>, config: FanoutConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            registry,
            permits,
            waiting: AtomicUsize::new(0),
            config,
        }
    }

    /// Fan a query out to every search-capable connector.
    ///
    /// Returns the merged hit map once every connector answered or timed
    /// out. Downstream stages never observe a partial fan-out.
    pub async fn search(
        &self,
        query: &SearchQuery,
        stage_budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<SearchHits, FanoutError> {
        let connectors = self.registry.snapshot(Capability::Search).await;
        if connectors.is_empty() {
            return Err(FanoutError::NoConnectors(
                "no connectors registered with search capability".to_string(),
            ));
        }

        let queued = self.waiting.fetch_add(connectors.len(), Ordering::SeqCst);
        if queued > self.config.max_queued {
            self.waiting.fetch_sub(connectors.len(), Ordering::SeqCst);
            return Err(FanoutError::Overloaded(format!(
                "search queue full ({} waiting)",
                queued
            )));
        }

        let started = Instant::now();
        let mut in_flight = FuturesUnordered::new();
        for connector in connectors {
            let connector_id = connector.id().to_string();
            let permits = self.permits.clone();
            let waiting = &self.waiting;
            let per_connector_budget = self.config.per_connector_budget;
            let query = query.clone();

            in_flight.push(async move {
                let slot = QueueSlot(waiting);
                // Acquire never errors while the semaphore lives on self.
                let permit = permits.acquire_owned().await;
                drop(slot);
                let _permit = match permit {
                    Ok(p) => p,
                    Err(_) => {
                        return (
                            connector_id,
                            Err(ConnectorError::Unavailable("fanout shut down".to_string())),
                        );
                    }
                };

                let elapsed = started.elapsed();
                let remaining = stage_budget.saturating_sub(elapsed);
                if remaining.is_zero() {
                    return (
                        connector_id,
                        Err(ConnectorError::Unavailable("deadline elapsed".to_string())),
                    );
                }
                let budget = per_connector_budget.min(remaining);

                let result =
                    match tokio::time::timeout(budget, connector.search(&query, budget)).await {
                        Ok(inner) => inner,
                        Err(_) => Err(ConnectorError::Unavailable(format!(
                            "search exceeded {:?}",
                            budget
                        ))),
                    };
                (connector_id, result)
            });
        }

        let mut hits = SearchHits::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Returning drops the stream and every pending call;
                    // queue slots release through their drop guards.
                    return Err(FanoutError::Cancelled);
                }
                next = in_flight.next() => {
                    let Some((connector_id, result)) = next else {
                        break;
                    };
                    match result {
                        Ok(products) => {
                            tracing::debug!(
                                connector = %connector_id,
                                count = products.len(),
                                "connector search succeeded"
                            );
                            self.registry.record_success(&connector_id).await;
                            hits.record_ok(connector_id, products);
                        }
                        Err(err) => {
                            tracing::warn!(
                                connector = %connector_id,
                                reason = err.reason(),
                                error = %err,
                                "connector search failed"
                            );
                            self.registry.record_failure(&connector_id).await;
                            hits.record_err(
                                connector_id,
                                SearchFailure::new(err.reason()).with_detail(err.to_string()),
                            );
                        }
                    }
                }
            }
        }

        if hits.all_failed() {
            return Err(FanoutError::NoConnectors(
                "every connector failed the search".to_string(),
            ));
        }
        Ok(hits)
    }
}
