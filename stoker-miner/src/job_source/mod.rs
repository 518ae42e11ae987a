//! Pool-facing job records.
//!
//! The pool session itself (socket, JSON-RPC framing, subscribe/authorize
//! dance) lives outside this crate. What arrives here is the parsed result:
//! a job notification plus the session extranonce and current difficulty,
//! bundled into a [`PoolSnapshot`] that the pipeline producer samples on
//! every tick. Going the other way, the pipeline emits [`PoolUpdate`]s for
//! the session to act on.

pub mod builder;
pub mod verify;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("invalid hex in job field: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("expected a 32-byte hash, got {0} bytes")]
    HashLength(usize),
}

/// A parsed `mining.notify` record.
///
/// Hashes and coinbase parts stay in the pool's hex encoding until job
/// construction; numeric header fields arrive already parsed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobNotify {
    pub job_id: String,
    /// Previous block hash, display byte order.
    pub prev_hash: String,
    pub coinbase_1: String,
    pub coinbase_2: String,
    /// Merkle branch hashes in fold order, natural byte order.
    pub merkle_branches: Vec<String>,
    pub version: u32,
    pub version_mask: u32,
    /// Compact difficulty target (nbits).
    pub target: u32,
    pub ntime: u32,
}

/// Everything the producer needs to materialize one job, sampled atomically
/// from the pool session.
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub pool_id: u8,
    pub notify: JobNotify,
    /// Session extranonce assigned at subscribe time, hex.
    pub extranonce: String,
    /// Rolling extranonce2 for this job, hex.
    pub extranonce2: String,
    /// Current share difficulty assigned by the pool.
    pub difficulty: u32,
}

/// A fully materialized job, immutable once built.
///
/// The previous hash and merkle root are kept in both byte orders: header
/// order for hashing during share verification, display order for the chip
/// work frame.
#[derive(Debug, Clone, PartialEq)]
pub struct MiningJob {
    pub version: u32,
    pub version_mask: u32,
    pub prev_block_hash: [u8; 32],
    pub prev_block_hash_be: [u8; 32],
    pub merkle_root: [u8; 32],
    pub merkle_root_be: [u8; 32],
    pub ntime: u32,
    pub target: u32,
    pub starting_nonce: u32,
    pub pool_diff: u32,
    pub asic_diff: u32,
    pub pool_id: u8,
    pub job_id: String,
    pub extranonce2: String,
}

/// A share ready for `mining.submit`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Share {
    pub job_id: String,
    pub extranonce2: String,
    pub ntime: u32,
    pub nonce: u32,
    pub version: u32,
}

/// Messages from the pipeline back to the pool session.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolUpdate {
    /// A nonce cleared the pool difficulty; submit it.
    Submit(Share),
    /// A new session-best difficulty was observed.
    BestDifficulty(f64),
}
