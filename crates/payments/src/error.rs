//! Payment errors
//!
//! Declines are not errors: they come back as a `PaymentResult`. These
//! variants cover malformed requests and infrastructure failures.

use thiserror::Error;

use bipay_core::CoreError;

/// Errors from account storage and transaction persistence
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account already exists: {0}")]
    AccountExists(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Error publishing an event
#[derive(Error, Debug)]
#[error("Event publish failed: {0}")]
pub struct PublishError(pub String);

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Recipient not found: {0}")]
    RecipientNotFound(String),

    #[error("Sender not found: {0}")]
    SenderNotFound(String),

    #[error("Account store error: {0}")]
    Account(#[source] StoreError),

    #[error("Transaction repository error: {0}")]
    Repository(#[source] StoreError),

    #[error("Invalid transaction: {0}")]
    Core(#[from] CoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}
