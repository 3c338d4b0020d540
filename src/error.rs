//! Error taxonomy for the loyalty core.
//!
//! Adapter failures and business-rule rejections are distinct types so a
//! caller can decide presentation instead of the core swallowing errors
//! into zeroes or alert strings.

use thiserror::Error;

/// Failure talking to the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record or collection path does not exist.
    #[error("record not found: {collection}/{key}")]
    NotFound {
        collection: &'static str,
        key: String,
    },

    /// The request did not complete in time.
    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// The store rejected our credentials or the operation.
    #[error("store denied the request: {0}")]
    Denied(String),

    /// Connectivity or server-side failure worth retrying.
    #[error("transient store failure: {0}")]
    Transient(String),
}

/// Failure of a ledger engine operation.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Bad input shape or range, rejected before any write.
    #[error("invalid {field}: {reason}")]
    Validation {
        field: &'static str,
        reason: String,
    },

    /// Redemption larger than the customer's current balance.
    #[error("insufficient balance: have {available}, need {requested}")]
    InsufficientBalance { requested: i64, available: i64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        LedgerError::Validation {
            field,
            reason: reason.into(),
        }
    }
}
