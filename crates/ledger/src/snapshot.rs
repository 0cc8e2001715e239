//! JSON chain snapshots
//!
//! Only sealed blocks are written; the pending buffer is not part of a
//! snapshot. Loading re-verifies the whole chain.

use std::fs;
use std::io::Write;
use std::path::Path;

use rust_decimal::Decimal;

use crate::block::Block;
use crate::chain::Blockchain;
use crate::error::LedgerError;

/// Write all sealed blocks to `path` (temp file + rename)
pub fn save_snapshot(chain: &Blockchain, path: impl AsRef<Path>) -> Result<(), LedgerError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        let json = serde_json::to_string_pretty(chain.blocks())?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;

    tracing::info!(path = %path.display(), blocks = chain.blocks().len(), "Chain snapshot saved");
    Ok(())
}

/// Read raw blocks without verifying them (for audit reporting)
pub fn read_blocks(path: impl AsRef<Path>) -> Result<Vec<Block>, LedgerError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Load and verify a snapshot
pub fn load_snapshot(
    path: impl AsRef<Path>,
    difficulty: usize,
    mining_reward: Decimal,
) -> Result<Blockchain, LedgerError> {
    let blocks = read_blocks(path)?;
    Blockchain::from_blocks(blocks, difficulty, mining_reward)
}

/// Load a snapshot if `path` exists, otherwise start a fresh chain
pub fn load_snapshot_or_new(
    path: impl AsRef<Path>,
    difficulty: usize,
    mining_reward: Decimal,
) -> Result<Blockchain, LedgerError> {
    let path = path.as_ref();
    if path.exists() {
        load_snapshot(path, difficulty, mining_reward)
    } else {
        Ok(Blockchain::new(difficulty, mining_reward))
    }
}
