use std::fmt;

use sled::transaction::TransactionError;

use super::documents::DocumentKind;
use super::revision::AggregateKind;
use super::status::Status;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Stable, caller-facing classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidState,
    ValidationFailed,
    NotFound,
    ConcurrentModification,
    BundleGenerationFailed,
    Storage,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidState => "INVALID_STATE",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ConcurrentModification => "CONCURRENT_MODIFICATION",
            ErrorCode::BundleGenerationFailed => "BUNDLE_GENERATION_FAILED",
            ErrorCode::Storage => "STORAGE",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{aggregate} {id} cannot {action} while {status}")]
    InvalidState {
        aggregate: AggregateKind,
        id: String,
        status: Status,
        action: &'static str,
    },
    #[error("validation failed: {}", .reasons.join("; "))]
    ValidationFailed { reasons: Vec<String> },
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error(
        "{id} was modified concurrently: expected head {expected}, found {}",
        .found.as_deref().unwrap_or("none")
    )]
    ConcurrentModification {
        id: String,
        expected: String,
        found: Option<String>,
    },
    #[error("bundle generation failed for {revision_id} ({kind}): {reason}")]
    BundleGenerationFailed {
        revision_id: String,
        kind: DocumentKind,
        reason: String,
    },
    #[error("blob store: {0}")]
    Blob(String),
    #[error(transparent)]
    Storage(#[from] sled::Error),
    #[error("failed to encode record: {0}")]
    Encoding(String),
    #[error(transparent)]
    Decoding(#[from] minicbor::decode::Error),
    #[error(transparent)]
    InvalidPrefix(#[from] bech32::primitives::hrp::Error),
    #[error(transparent)]
    Identifier(#[from] bech32::EncodeError),
    #[error(transparent)]
    Config(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Archive(#[from] zip::result::ZipError),
}

impl Error {
    pub fn validation(reason: impl Into<String>) -> Self {
        Error::ValidationFailed {
            reasons: vec![reason.into()],
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidState { .. } => ErrorCode::InvalidState,
            Error::ValidationFailed { .. } => ErrorCode::ValidationFailed,
            Error::NotFound { .. } => ErrorCode::NotFound,
            Error::ConcurrentModification { .. } => ErrorCode::ConcurrentModification,
            Error::BundleGenerationFailed { .. } => ErrorCode::BundleGenerationFailed,
            Error::Storage(_) | Error::Io(_) => ErrorCode::Storage,
            Error::Blob(_)
            | Error::Encoding(_)
            | Error::Decoding(_)
            | Error::InvalidPrefix(_)
            | Error::Identifier(_)
            | Error::Config(_)
            | Error::InvalidConfig(_)
            | Error::Archive(_) => ErrorCode::Internal,
        }
    }

    /// Whether re-reading current state and reapplying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::ConcurrentModification
                | ErrorCode::BundleGenerationFailed
                | ErrorCode::Storage
        )
    }
}

impl<E: fmt::Display> From<minicbor::encode::Error<E>> for Error {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        Error::Encoding(value.to_string())
    }
}

impl From<TransactionError<Error>> for Error {
    fn from(value: TransactionError<Error>) -> Self {
        match value {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => Error::Storage(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_contention_and_bundles_are_retryable() {
        let stale = Error::ConcurrentModification {
            id: "contract_1".into(),
            expected: "crev_a".into(),
            found: Some("crev_b".into()),
        };
        assert!(stale.is_retryable());
        assert_eq!(stale.code().as_str(), "CONCURRENT_MODIFICATION");

        let missing = Error::not_found("contract", "contract_1");
        assert!(!missing.is_retryable());
        assert_eq!(missing.code(), ErrorCode::NotFound);
    }

    #[test]
    fn validation_message_lists_every_reason() {
        let err = Error::ValidationFailed {
            reasons: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "validation failed: a; b");
    }
}
