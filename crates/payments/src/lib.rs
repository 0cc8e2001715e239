//! BiPay Payments - Peer-to-peer payment orchestration
//!
//! `TransactionOrchestrator` runs one payment through authentication,
//! fraud screening, the funds check and the transfer, then records the
//! committed transaction on the ledger and emits an event.
//!
//! # Key Types
//! - `PaymentRequest` / `PaymentResult`: the only request and response shapes
//! - `DeclineReason`: stable decline codes, declines are not errors
//! - `Collaborators`: account store, repository, authenticator, event sink,
//!   scorer and clock, all behind traits so adapters can be swapped
//! - `Miner`: background task that seals pending transactions into blocks

pub mod accounts;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod locks;
pub mod miner;
pub mod orchestrator;
pub mod ports;
pub mod repository;
pub mod result;
pub mod store;

pub use accounts::{Account, FileAccountStore, InMemoryAccountStore};
pub use auth::{build_authenticator, DescriptorAuthenticator, SimulatedAuthenticator};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{
    AppConfig, AuthConfig, AuthenticatorKind, ConfigError, FundsPolicy, LedgerConfig,
    PaymentsConfig, ScoringFailPolicy, StorageBackend, StorageConfig,
};
pub use error::{PaymentError, PublishError, StoreError, StoreResult};
pub use events::{BroadcastEventSink, EventType, FanoutEventSink, PaymentEvent, TracingEventSink};
pub use miner::{Miner, MinerSettings, SharedLedger};
pub use orchestrator::{Collaborators, TransactionOrchestrator};
pub use ports::{AccountStore, AuthOutcome, Authenticator, EventSink, TransactionRepository};
pub use repository::{InMemoryTransactionRepository, JsonlTransactionRepository, TransactionPage};
pub use result::{DeclineReason, PaymentOutcome, PaymentRequest, PaymentResult};
pub use store::{IdempotencyStore, KeyedStore, NonceRejection, NonceStore, TtlStore};
