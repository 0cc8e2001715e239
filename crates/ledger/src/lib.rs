//! BiPay Ledger - Tamper-evident transaction log
//!
//! Committed transfers are batched into blocks, each block linked to its
//! predecessor by hash and sealed by proof-of-work.
//!
//! # Key Types
//! - `Block`: sealed batch of transactions, immutable once appended
//! - `CandidateBlock`: a block being built, not yet sealed
//! - `Blockchain`: the chain plus its pending-transaction buffer
//! - `ChainError`: first integrity violation found by `Blockchain::verify`
//!
//! Block lifecycle: `Building` (`begin_block`) → `Sealed` (`pow::seal`) →
//! `Appended` (`append_sealed`). `Blockchain::mine` runs all three inline.

pub mod block;
pub mod chain;
pub mod error;
pub mod hash;
pub mod pow;
pub mod snapshot;

pub use block::{Block, BlockState, CandidateBlock, GENESIS_PREVIOUS_HASH};
pub use chain::{Blockchain, ChainStats};
pub use error::{ChainError, LedgerError};
pub use hash::{calculate_block_hash, meets_difficulty, verify_chain};
pub use pow::{seal, seal_parallel};
pub use snapshot::{load_snapshot, load_snapshot_or_new, read_blocks, save_snapshot};
