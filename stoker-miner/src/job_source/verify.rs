//! Share verification: how hard is this nonce, really?
//!
//! The chip's ticket mask filters nonces locally, but the pool judges a
//! share by the actual hash. Before submitting anything the consumer rebuilds
//! the 80-byte block header, double-SHA256s it, and expresses the result as a
//! difficulty so it can be compared against the pool threshold directly.

use super::builder::double_sha256;
use super::MiningJob;

/// Difficulty-1 target expressed as a dividend: the pool-difficulty pdiff
/// constant `0xFFFF * 2^208`, so `TRUE_DIFF_ONE / hash_value` yields the
/// conventional share difficulty.
pub const TRUE_DIFF_ONE: f64 =
    26959535291011309493156476344723991336010898738574164086137773096960.0;

/// Difficulty achieved by `nonce` with `rolled_version` on this job.
///
/// `rolled_version` is the already-shifted fragment from the chip; it is
/// merged into the base version by OR, matching how the chip rolled it.
pub fn verify(job: &MiningJob, nonce: u32, rolled_version: u32) -> f64 {
    let mut header = [0u8; 80];
    header[0..4].copy_from_slice(&(job.version | rolled_version).to_le_bytes());
    header[4..36].copy_from_slice(&job.prev_block_hash);
    header[36..68].copy_from_slice(&job.merkle_root);
    header[68..72].copy_from_slice(&job.ntime.to_le_bytes());
    header[72..76].copy_from_slice(&job.target.to_le_bytes());
    header[76..80].copy_from_slice(&nonce.to_le_bytes());

    let digest = double_sha256(&header);
    TRUE_DIFF_ONE / digest_value(&digest)
}

// The digest is a little-endian 256-bit integer; fold from the most
// significant byte down. f64 precision loss here is far below the precision
// any difficulty comparison cares about.
fn digest_value(digest: &[u8; 32]) -> f64 {
    digest
        .iter()
        .rev()
        .fold(0.0, |acc, &byte| acc * 256.0 + f64::from(byte))
}
