//! Error taxonomy shared by the ledger, the document store and the report lifecycle
use thiserror::Error;

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    #[error("cannot {action} '{id}': {reason}")]
    InvalidStatus {
        id: String,
        action: &'static str,
        reason: String,
    },
    #[error("'{actor}' is not an approver of '{id}'")]
    Unauthorized { id: String, actor: String },
    #[error("missing required parameter '{name}' for '{context}'")]
    MissingParameter { context: String, name: String },
    #[error("invalid parameter '{name}' for '{context}': {reason}")]
    InvalidParameter {
        context: String,
        name: String,
        reason: String,
    },
    /// A document exists but its chain has no genesis block.
    #[error("document '{document_id}' has no chain of custody")]
    ChainNotFound { document_id: String },
    #[error("signing failed while recording {action} on '{id}': {source}")]
    SigningFailed {
        id: String,
        action: &'static str,
        #[source]
        source: SignerError,
    },
    #[error("storage failed: {reason}")]
    StorageFailed { reason: String },
    #[error("failed to encode or decode a record: {0}")]
    Encoding(String),
    #[error("failed to generate an identifier: {0}")]
    Identifier(String),
}

/// Raised by a [`crate::signer::Signer`] backend.
#[derive(Error, Debug)]
pub enum SignerError {
    #[error("signing key unavailable: {0}")]
    KeyUnavailable(String),
    #[error("signing backend rejected the payload: {0}")]
    Backend(String),
}

/// Raised by a [`crate::content::ContentStore`] backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("content store backend error: {0}")]
    Backend(String),
}

/// Raised by a [`crate::report::TemplateRenderer`].
#[derive(Error, Debug)]
#[error("rendering failed: {0}")]
pub struct RenderError(pub String);

/// Raised by a [`crate::report::Distributor`]. Logged, never propagated.
#[derive(Error, Debug)]
#[error("delivery failed: {0}")]
pub struct DeliveryError(pub String);

impl LedgerError {
    /// Stable taxonomy code for callers that branch on error kind.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::NotFound { .. } => "NOT_FOUND",
            LedgerError::InvalidStatus { .. } => "INVALID_STATUS",
            LedgerError::Unauthorized { .. } => "UNAUTHORIZED",
            LedgerError::MissingParameter { .. } => "MISSING_PARAMETER",
            LedgerError::InvalidParameter { .. } => "INVALID_PARAMETER",
            LedgerError::ChainNotFound { .. } => "CHAIN_NOT_FOUND",
            LedgerError::SigningFailed { .. } => "SIGNING_FAILED",
            LedgerError::StorageFailed { .. } => "STORAGE_FAILED",
            LedgerError::Encoding(_) => "ENCODING_FAILED",
            LedgerError::Identifier(_) => "IDENTIFIER_FAILED",
        }
    }

    /// Infrastructure failures that left no partial state behind.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::SigningFailed { .. } | LedgerError::StorageFailed { .. }
        )
    }

    pub(crate) fn document_not_found(id: &str) -> Self {
        LedgerError::NotFound {
            kind: "document",
            id: id.to_string(),
        }
    }
}

impl From<sled::Error> for LedgerError {
    fn from(value: sled::Error) -> Self {
        LedgerError::StorageFailed {
            reason: value.to_string(),
        }
    }
}

impl From<StorageError> for LedgerError {
    fn from(value: StorageError) -> Self {
        LedgerError::StorageFailed {
            reason: value.to_string(),
        }
    }
}

impl From<sled::Error> for StorageError {
    fn from(value: sled::Error) -> Self {
        StorageError::Backend(value.to_string())
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for LedgerError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        LedgerError::Encoding(value.to_string())
    }
}

impl From<minicbor::decode::Error> for LedgerError {
    fn from(value: minicbor::decode::Error) -> Self {
        LedgerError::Encoding(value.to_string())
    }
}
