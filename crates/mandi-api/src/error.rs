use thiserror::Error;

use mandi_runtime::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    InvalidArgument,
    Conflict,
    Internal,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl From<RuntimeError> for ApiError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::BadRequest(detail) => ApiError::InvalidArgument(detail),
            RuntimeError::SessionNotFound(id) => ApiError::NotFound(format!("session {}", id)),
            RuntimeError::NoActiveRun(id) => {
                ApiError::Conflict(format!("no active run for session {}", id))
            }
            RuntimeError::NoConfirmationPending(run) => {
                ApiError::Conflict(format!("no confirmation pending for run {}", run))
            }
            RuntimeError::Store(detail) => ApiError::Internal(detail.to_string()),
            RuntimeError::Internal(detail) => ApiError::Internal(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_error_mapping() {
        let err: ApiError = RuntimeError::BadRequest("empty".to_string()).into();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);

        let err: ApiError = RuntimeError::NoActiveRun("s1".to_string()).into();
        assert_eq!(err.code(), ErrorCode::Conflict);

        let err: ApiError = RuntimeError::SessionNotFound("s1".to_string()).into();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }
}
