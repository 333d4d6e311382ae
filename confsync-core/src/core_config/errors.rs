/*
    errors.rs - Error types for the config sync core

    Covers:
    - Precondition failures (missing identity, empty account id)
    - Faults raised by the merge library at the call boundary
    - Persistence and transport failures
    - Downstream handler failures that abort a batch
*/

use crate::core_config::variant::ConfigVariant;
use std::sync::PoisonError;
use thiserror::Error;

/// Errors that can occur in the config sync core
#[derive(Debug, Error)]
pub enum SyncError {
    /// No local identity exists yet for the account
    #[error("User does not exist")]
    UserDoesNotExist,

    /// Empty account public key
    #[error("No thread for an empty public key")]
    NoThread,

    /// Config object not loaded when one was required
    #[error("Config object is nil")]
    NilConfigObject,

    /// Merge library raised while performing `operation`
    #[error("Config library failed during {operation} on {variant}: {reason}")]
    Library {
        variant: ConfigVariant,
        operation: &'static str,
        reason: String,
    },

    /// Downstream domain handler failed; the whole batch is aborted
    #[error("Handler for {variant} failed: {reason}")]
    Handler { variant: ConfigVariant, reason: String },

    /// Persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Network collaborator error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Network call exceeded the configured timeout
    #[error("Transport request timed out")]
    Timeout,

    /// Encryption/decryption error
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Unknown variant tag read back from storage
    #[error("Invalid config variant: {0}")]
    InvalidVariant(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for config sync operations
pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Wrap a backend failure with the variant and operation it happened in
    pub fn library(variant: ConfigVariant, operation: &'static str, err: impl ToString) -> Self {
        SyncError::Library { variant, operation, reason: err.to_string() }
    }
}

/// Helper to convert poison errors into SyncError
pub(crate) fn handle_poison<T>(_err: PoisonError<T>) -> SyncError {
    SyncError::Internal("Lock poisoned: a thread panicked while holding the lock".to_string())
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}

impl From<r2d2::Error> for SyncError {
    fn from(err: r2d2::Error) -> Self {
        SyncError::Storage(format!("Connection pool: {}", err))
    }
}

impl From<bincode::Error> for SyncError {
    fn from(err: bincode::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}
