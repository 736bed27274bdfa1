//! # Mandi Config
//!
//! Environment-based configuration. Every knob the orchestrator honours is
//! enumerated here; anything else in the environment is ignored. Parsing and
//! validation are separated from `std::env` so tests can feed maps directly.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use mandi_core::ranking::RankWeights;
use mandi_core::types::StageId;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Full orchestrator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Connector ids to enable, in declaration order.
    pub connectors: Vec<String>,
    /// Simulate phase 4 of the purchase executor.
    pub dry_run: bool,
    pub listen_addr: SocketAddr,
    pub journal_path: PathBuf,
    pub audit_log_path: PathBuf,
    /// Per-stage timeout overrides in seconds.
    pub stage_timeouts: HashMap<StageId, Duration>,
    pub purchase_max_retries: u32,
    pub risk_critical_threshold: u32,
    pub confirmation_timeout: Duration,
    pub idempotency_window: Duration,
    pub session_idle_ttl: Duration,
    pub search_max_in_flight: usize,
    /// Order totals at or above this add risk weight.
    pub budget_large: f64,
    pub rank_weights: RankWeights,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connectors: Vec::new(),
            dry_run: false,
            listen_addr: "127.0.0.1:8080".parse().expect("static addr"),
            journal_path: PathBuf::from("data/journal.ndjson"),
            audit_log_path: PathBuf::from("data/audit.ndjson"),
            stage_timeouts: HashMap::new(),
            purchase_max_retries: 3,
            risk_critical_threshold: 80,
            confirmation_timeout: Duration::from_secs(300),
            idempotency_window: Duration::from_secs(300),
            session_idle_ttl: Duration::from_secs(1800),
            search_max_in_flight: 16,
            budget_large: 2000.0,
            rank_weights: RankWeights::default(),
        }
    }
}

const STAGE_TIMEOUT_KEYS: [(&str, StageId); 8] = [
    ("PER_STAGE_TIMEOUT_INTENT_EXTRACTION", StageId::IntentExtraction),
    ("PER_STAGE_TIMEOUT_TASK_PLANNING", StageId::TaskPlanning),
    ("PER_STAGE_TIMEOUT_SEARCH", StageId::Search),
    ("PER_STAGE_TIMEOUT_COMPARISON", StageId::Comparison),
    ("PER_STAGE_TIMEOUT_DECISION", StageId::Decision),
    ("PER_STAGE_TIMEOUT_PURCHASE", StageId::Purchase),
    ("PER_STAGE_TIMEOUT_QUERY_INFO", StageId::QueryInfo),
    ("PER_STAGE_TIMEOUT_NOTIFICATION", StageId::Notification),
];

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_map(&vars)
    }

    /// Load from an explicit key/value map.
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(raw) = vars.get("CONNECTORS") {
            config.connectors = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(raw) = vars.get("DRY_RUN") {
            config.dry_run = parse_bool("DRY_RUN", raw)?;
        }
        if let Some(raw) = vars.get("LISTEN_ADDR") {
            config.listen_addr = raw
                .parse()
                .map_err(|_| ConfigError::invalid("LISTEN_ADDR", "expected host:port"))?;
        }
        if let Some(raw) = vars.get("JOURNAL_PATH") {
            config.journal_path = PathBuf::from(raw);
        }
        if let Some(raw) = vars.get("AUDIT_LOG_PATH") {
            config.audit_log_path = PathBuf::from(raw);
        }
        for (key, stage) in STAGE_TIMEOUT_KEYS {
            if let Some(raw) = vars.get(key) {
                config
                    .stage_timeouts
                    .insert(stage, Duration::from_secs(parse_u64(key, raw)?));
            }
        }
        if let Some(raw) = vars.get("PURCHASE_MAX_RETRIES") {
            config.purchase_max_retries = parse_u64("PURCHASE_MAX_RETRIES", raw)? as u32;
        }
        if let Some(raw) = vars.get("RISK_CRITICAL_THRESHOLD") {
            config.risk_critical_threshold = parse_u64("RISK_CRITICAL_THRESHOLD", raw)? as u32;
        }
        if let Some(raw) = vars.get("CONFIRMATION_TIMEOUT_SEC") {
            config.confirmation_timeout =
                Duration::from_secs(parse_u64("CONFIRMATION_TIMEOUT_SEC", raw)?);
        }
        if let Some(raw) = vars.get("IDEMPOTENCY_WINDOW_SEC") {
            config.idempotency_window =
                Duration::from_secs(parse_u64("IDEMPOTENCY_WINDOW_SEC", raw)?);
        }
        if let Some(raw) = vars.get("SESSION_IDLE_TTL_SEC") {
            config.session_idle_ttl =
                Duration::from_secs(parse_u64("SESSION_IDLE_TTL_SEC", raw)?);
        }
        if let Some(raw) = vars.get("SEARCH_MAX_IN_FLIGHT") {
            config.search_max_in_flight = parse_u64("SEARCH_MAX_IN_FLIGHT", raw)? as usize;
        }
        if let Some(raw) = vars.get("BUDGET_LARGE") {
            config.budget_large = parse_f64("BUDGET_LARGE", raw)?;
        }
        if let Some(raw) = vars.get("RANK_WEIGHT_DELIVERY") {
            config.rank_weights.delivery = parse_f64("RANK_WEIGHT_DELIVERY", raw)?;
        }
        if let Some(raw) = vars.get("RANK_WEIGHT_PRICE") {
            config.rank_weights.price = parse_f64("RANK_WEIGHT_PRICE", raw)?;
        }
        if let Some(raw) = vars.get("RANK_WEIGHT_RELIABILITY") {
            config.rank_weights.reliability = parse_f64("RANK_WEIGHT_RELIABILITY", raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.risk_critical_threshold == 0 || self.risk_critical_threshold > 100 {
            return Err(ConfigError::invalid(
                "RISK_CRITICAL_THRESHOLD",
                "must be in 1..=100",
            ));
        }
        if self.purchase_max_retries > 10 {
            return Err(ConfigError::invalid(
                "PURCHASE_MAX_RETRIES",
                "must be at most 10",
            ));
        }
        if self.search_max_in_flight == 0 {
            return Err(ConfigError::invalid(
                "SEARCH_MAX_IN_FLIGHT",
                "must be greater than 0",
            ));
        }
        if self.confirmation_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "CONFIRMATION_TIMEOUT_SEC",
                "must be greater than 0",
            ));
        }
        if self.budget_large <= 0.0 {
            return Err(ConfigError::invalid(
                "BUDGET_LARGE",
                "must be greater than 0",
            ));
        }
        let weights = &self.rank_weights;
        if weights.delivery < 0.0 || weights.price < 0.0 || weights.reliability < 0.0 {
            return Err(ConfigError::invalid(
                "RANK_WEIGHT_*",
                "weights must be non-negative",
            ));
        }
        if weights.delivery + weights.price + weights.reliability <= 0.0 {
            return Err(ConfigError::invalid(
                "RANK_WEIGHT_*",
                "at least one weight must be positive",
            ));
        }
        Ok(())
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, "expected a boolean")),
    }
}

fn parse_u64(key: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, "expected a non-negative integer"))
}

fn parse_f64(key: &str, raw: &str) -> Result<f64, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, "expected a number"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_with_empty_environment() {
        let config = Config::from_map(&HashMap::new()).unwrap();
        assert!(config.connectors.is_empty());
        assert!(!config.dry_run);
        assert_eq!(config.purchase_max_retries, 3);
        assert_eq!(config.risk_critical_threshold, 80);
        assert_eq!(config.confirmation_timeout, Duration::from_secs(300));
        assert_eq!(config.search_max_in_flight, 16);
    }

    #[test]
    fn test_connector_list_parsing_trims_and_drops_empties() {
        let config =
            Config::from_map(&map(&[("CONNECTORS", " zippy , bigbasket ,, ")])).unwrap();
        assert_eq!(config.connectors, vec!["zippy", "bigbasket"]);
    }

    #[test]
    fn test_stage_timeout_overrides() {
        let config = Config::from_map(&map(&[
            ("PER_STAGE_TIMEOUT_SEARCH", "25"),
            ("PER_STAGE_TIMEOUT_PURCHASE", "90"),
        ]))
        .unwrap();
        assert_eq!(
            config.stage_timeouts.get(&StageId::Search),
            Some(&Duration::from_secs(25))
        );
        assert_eq!(
            config.stage_timeouts.get(&StageId::Purchase),
            Some(&Duration::from_secs(90))
        );
        assert!(config.stage_timeouts.get(&StageId::Decision).is_none());
    }

    #[test]
    fn test_dry_run_accepts_common_spellings() {
        for raw in ["1", "true", "YES", "on"] {
            assert!(Config::from_map(&map(&[("DRY_RUN", raw)])).unwrap().dry_run);
        }
        assert!(Config::from_map(&map(&[("DRY_RUN", "maybe")])).is_err());
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let err = Config::from_map(&map(&[("RISK_CRITICAL_THRESHOLD", "150")])).unwrap_err();
        assert!(err.to_string().contains("RISK_CRITICAL_THRESHOLD"));
    }

    #[test]
    fn test_rank_weights_must_be_non_negative() {
        let err = Config::from_map(&map(&[("RANK_WEIGHT_PRICE", "-0.5")])).unwrap_err();
        assert!(err.to_string().contains("RANK_WEIGHT"));
    }

    #[test]
    fn test_listen_addr_parse() {
        let config = Config::from_map(&map(&[("LISTEN_ADDR", "0.0.0.0:9090")])).unwrap();
        assert_eq!(config.listen_addr.port(), 9090);
        assert!(Config::from_map(&map(&[("LISTEN_ADDR", "not-an-addr")])).is_err());
    }
}
