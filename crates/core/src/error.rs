//! Core errors

use rust_decimal::Decimal;
use thiserror::Error;

use crate::transaction::TransactionStatus;

/// Errors raised while building or mutating core records
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Amount must be greater than zero: {0}")]
    NonPositiveAmount(Decimal),

    #[error("Field '{0}' cannot be empty")]
    EmptyField(&'static str),

    #[error("Illegal status transition {from} -> {to}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },
}
