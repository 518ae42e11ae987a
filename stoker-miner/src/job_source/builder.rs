//! Turn a pool snapshot into a hashable job.

use sha2::{Digest, Sha256};

use super::{JobError, MiningJob, PoolSnapshot};

pub(crate) fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

fn decode_hash(hex_str: &str) -> Result<[u8; 32], JobError> {
    let bytes = hex::decode(hex_str)?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| JobError::HashLength(b.len()))
}

fn reversed(mut hash: [u8; 32]) -> [u8; 32] {
    hash.reverse();
    hash
}

/// Build the job for one producer tick.
///
/// The coinbase transaction is reassembled from its two pool-supplied parts
/// with the session extranonce and this job's extranonce2 spliced between
/// them. Its double-SHA256 seeds the merkle root, which is then folded with
/// each branch hash in the order the pool listed them.
pub fn build(snapshot: &PoolSnapshot, asic_diff: u32) -> Result<MiningJob, JobError> {
    let notify = &snapshot.notify;

    let mut coinbase = hex::decode(&notify.coinbase_1)?;
    coinbase.extend(hex::decode(&snapshot.extranonce)?);
    coinbase.extend(hex::decode(&snapshot.extranonce2)?);
    coinbase.extend(hex::decode(&notify.coinbase_2)?);

    let mut merkle_root = double_sha256(&coinbase);
    let mut pair = [0u8; 64];
    for branch in &notify.merkle_branches {
        pair[..32].copy_from_slice(&merkle_root);
        pair[32..].copy_from_slice(&decode_hash(branch)?);
        merkle_root = double_sha256(&pair);
    }

    // The pool gives the previous hash in display order; hashing needs it
    // reversed into header order.
    let prev_block_hash_be = decode_hash(&notify.prev_hash)?;

    Ok(MiningJob {
        version: notify.version,
        version_mask: notify.version_mask,
        prev_block_hash: reversed(prev_block_hash_be),
        prev_block_hash_be,
        merkle_root,
        merkle_root_be: reversed(merkle_root),
        ntime: notify.ntime,
        target: notify.target,
        starting_nonce: 0,
        pool_diff: snapshot.difficulty,
        asic_diff,
        pool_id: snapshot.pool_id,
        job_id: notify.job_id.clone(),
        extranonce2: snapshot.extranonce2.clone(),
    })
}
