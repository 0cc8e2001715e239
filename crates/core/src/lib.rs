//! BiPay Core - Shared domain types
//!
//! - `Amount`: strictly positive decimal for transfer amounts
//! - `Transaction`: the typed record every other crate passes around
//! - `TransactionStatus`: terminal-state lattice owned by the orchestrator

pub mod amount;
pub mod error;
pub mod transaction;

pub use amount::Amount;
pub use error::CoreError;
pub use transaction::{
    generate_transaction_id, Transaction, TransactionStatus, TransactionType, SYSTEM_ACCOUNT,
};
