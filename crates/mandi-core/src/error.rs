//! Error taxonomy shared across the orchestrator.
//!
//! Every failure a client or operator can observe maps onto one of these
//! kinds. Crate-local error enums carry the detail; `ErrorKind` is the
//! stable wire label.

use serde::{Deserialize, Serialize};

/// Stable error kinds surfaced to clients, the event stream, and the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Overloaded,
    StageTimeout,
    StageInternal,
    ConnectorUnavailable,
    NoConnectorsAvailable,
    NoSuitableOption,
    UserCancelled,
    ConfirmationTimeout,
    RiskBlocked,
    DuplicateSuppressed,
    JournalFailure,
}

impl ErrorKind {
    /// Snake-case wire label for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Overloaded => "overloaded",
            ErrorKind::StageTimeout => "stage_timeout",
            ErrorKind::StageInternal => "stage_internal",
            ErrorKind::ConnectorUnavailable => "connector_unavailable",
            ErrorKind::NoConnectorsAvailable => "no_connectors_available",
            ErrorKind::NoSuitableOption => "no_suitable_option",
            ErrorKind::UserCancelled => "user_cancelled",
            ErrorKind::ConfirmationTimeout => "confirmation_timeout",
            ErrorKind::RiskBlocked => "risk_blocked",
            ErrorKind::DuplicateSuppressed => "duplicate_suppressed",
            ErrorKind::JournalFailure => "journal_failure",
        }
    }

    /// Whether this kind is fatal to the whole process, not just the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::JournalFailure)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_labels_are_snake_case() {
        assert_eq!(ErrorKind::NoConnectorsAvailable.as_str(), "no_connectors_available");
        assert_eq!(ErrorKind::StageTimeout.as_str(), "stage_timeout");
        assert_eq!(
            serde_json::to_value(ErrorKind::RiskBlocked).unwrap(),
            serde_json::json!("risk_blocked")
        );
    }

    #[test]
    fn test_only_journal_failure_is_fatal() {
        assert!(ErrorKind::JournalFailure.is_fatal());
        assert!(!ErrorKind::StageInternal.is_fatal());
        assert!(!ErrorKind::UserCancelled.is_fatal());
    }
}
