//! Bootstrap - configuration to a running orchestrator
//!
//! Builds the stores, the connector registry, and the orchestrator from a
//! validated `Config`. Startup failures carry the process exit code the
//! server binary reports: 2 for configuration, 3 for an unwritable journal,
//! 4 for an empty connector set.

use std::sync::Arc;
use std::time::Duration;

use mandi_config::{Config, ConfigError};
use mandi_core::pipeline::StageTimeouts;
use mandi_core::types::UserContext;
use mandi_connectors::{
    CatalogItem, ConnectorRegistry, FanoutConfig, SearchFanout, StaticCatalogConnector,
};
use mandi_stores::{
    AuditLog, FileJournal, SessionEventBus, SessionStore, SessionStoreConfig, StoreError,
};

use crate::confirmation::{ConfirmationRouter, OtpRouter, RunWatch};
use crate::orchestrator::Orchestrator;
use crate::services::{RuntimeServices, RuntimeTuning};

/// Startup failure with its process exit code.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("journal unwritable: {0}")]
    Journal(StoreError),

    #[error("no connectors configured")]
    NoConnectors,
}

impl BootstrapError {
    pub fn exit_code(&self) -> i32 {
        match self {
            BootstrapError::Config(_) => 2,
            BootstrapError::Journal(_) => 3,
            BootstrapError::NoConnectors => 4,
        }
    }
}

/// A fully wired runtime.
pub struct RuntimeApp {
    pub orchestrator: Arc<Orchestrator>,
    pub services: Arc<RuntimeServices>,
    pub listen_addr: std::net::SocketAddr,
    pub session_sweep_interval: Duration,
}

impl std::fmt::Debug for RuntimeApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeApp")
            .field("listen_addr", &self.listen_addr)
            .field("session_sweep_interval", &self.session_sweep_interval)
            .finish()
    }
}

/// Build the runtime from a validated configuration.
pub async fn build_runtime(config: Config) -> Result<RuntimeApp, BootstrapError> {
    if config.connectors.is_empty() {
        return Err(BootstrapError::NoConnectors);
    }

    let journal =
        Arc::new(FileJournal::open(&config.journal_path).map_err(BootstrapError::Journal)?);
    let audit = AuditLog::open(&config.audit_log_path).map_err(BootstrapError::Journal)?;

    let registry = Arc::new(ConnectorRegistry::new());
    for (index, id) in config.connectors.iter().enumerate() {
        registry
            .add(Arc::new(builtin_catalog_connector(id, index)))
            .await;
    }

    let fanout = Arc::new(SearchFanout::new(
        registry.clone(),
        FanoutConfig {
            max_in_flight: config.search_max_in_flight,
            ..FanoutConfig::default()
        },
    ));

    let sessions = Arc::new(SessionStore::new(SessionStoreConfig {
        idle_ttl: config.session_idle_ttl,
        ..SessionStoreConfig::default()
    }));

    let tuning = RuntimeTuning {
        dry_run: config.dry_run,
        purchase_max_retries: config.purchase_max_retries,
        risk_critical_threshold: config.risk_critical_threshold,
        confirmation_timeout: config.confirmation_timeout,
        idempotency_window: config.idempotency_window,
        budget_large: config.budget_large,
        rank_weights: config.rank_weights,
        ..RuntimeTuning::default()
    };

    let services = Arc::new(RuntimeServices {
        sessions,
        bus: Arc::new(SessionEventBus::default()),
        journal,
        audit,
        registry,
        fanout,
        confirmations: Arc::new(ConfirmationRouter::new()),
        otp: Arc::new(OtpRouter::new()),
        run_watch: Arc::new(RunWatch::new()),
        user: UserContext::new("default_user", "update-delivery-address"),
        tuning,
    });

    let mut timeouts = StageTimeouts::new();
    for (stage, timeout) in &config.stage_timeouts {
        timeouts = timeouts.with_override(*stage, *timeout);
    }
    let orchestrator = Arc::new(Orchestrator::new(services.clone(), timeouts));

    tracing::info!(
        connectors = ?config.connectors,
        dry_run = config.dry_run,
        listen = %config.listen_addr,
        "runtime assembled"
    );
    Ok(RuntimeApp {
        orchestrator,
        services,
        listen_addr: config.listen_addr,
        session_sweep_interval: Duration::from_secs(60),
    })
}

/// Demo catalog served by the built-in connectors.
///
/// Every configured connector id gets the same pantry staples with slightly
/// different prices and delivery estimates, so ranking and fallback have
/// something real to chew on in development and dry runs.
pub fn builtin_catalog(index: usize) -> Vec<CatalogItem> {
    let price_shift = 1.0 + index as f64 * 0.08;
    let eta_shift = index as u32 * 25;
    let entry = |id: &str, title: &str, price: f64, eta: u32, rating: f64, keywords: &[&str]| {
        CatalogItem {
            external_id: id.to_string(),
            title: title.to_string(),
            unit_price: (price * price_shift * 100.0).round() / 100.0,
            currency: "INR".to_string(),
            delivery_eta_minutes: eta + eta_shift,
            rating: Some(rating),
            stock: Some(20),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    };
    vec![
        entry("milk-1l", "Milk 1 litre", 60.0, 15, 4.5, &["doodh", "milk"]),
        entry("bread-400g", "Bread 400 g", 40.0, 15, 4.2, &["bread", "pav"]),
        entry(
            "chana-1kg",
            "White Chana 1 kg",
            120.0,
            20,
            4.4,
            &["chane", "chana", "chickpeas"],
        ),
        entry("rice-5kg", "Rice 5 kg", 380.0, 30, 4.6, &["rice", "chawal"]),
        entry(
            "haldi-200g",
            "Haldi Powder 200 g",
            55.0,
            20,
            4.3,
            &["haldi", "turmeric"],
        ),
        entry(
            "choc-55g",
            "Dairy Milk Chocolate 55 g",
            45.0,
            15,
            4.7,
            &["chocolate", "cadbury"],
        ),
    ]
}

fn builtin_catalog_connector(id: &str, index: usize) -> StaticCatalogConnector {
    StaticCatalogConnector::new(id, builtin_catalog(index))
        .with_latency(Duration::from_millis(30 + index as u64 * 20))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_config(dir: &std::path::Path, connectors: &str) -> Config {
        let mut vars = HashMap::new();
        vars.insert("CONNECTORS".to_string(), connectors.to_string());
        vars.insert(
            "JOURNAL_PATH".to_string(),
            dir.join("journal.ndjson").display().to_string(),
        );
        vars.insert(
            "AUDIT_LOG_PATH".to_string(),
            dir.join("audit.ndjson").display().to_string(),
        );
        Config::from_map(&vars).unwrap()
    }

    #[test]
    fn test_build_runtime_registers_connectors() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let app = build_runtime(test_config(dir.path(), "zippy,bigbasket"))
                .await
                .unwrap();
            assert_eq!(
                app.services.registry.list().await,
                vec!["bigbasket", "zippy"]
            );
        });
    }

    #[test]
    fn test_empty_connector_set_exits_four() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let err = build_runtime(test_config(dir.path(), ""))
                .await
                .unwrap_err();
            assert_eq!(err.exit_code(), 4);
        });
    }

    #[test]
    fn test_unwritable_journal_exits_three() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let mut config = test_config(dir.path(), "zippy");
            config.journal_path = "/proc/not/a/real/path/journal.ndjson".into();
            let err = build_runtime(config).await.unwrap_err();
            assert_eq!(err.exit_code(), 3);
        });
    }

    #[test]
    fn test_builtin_catalog_prices_shift_by_index() {
        let base = builtin_catalog(0);
        let shifted = builtin_catalog(1);
        assert!(shifted[0].unit_price > base[0].unit_price);
        assert!(shifted[0].delivery_eta_minutes > base[0].delivery_eta_minutes);
    }
}
