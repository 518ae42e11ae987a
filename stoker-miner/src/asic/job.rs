//! Work-frame construction and result classification.
//!
//! The chips take one fixed-size work item per job: header fields in
//! little-endian plus the merkle root and previous hash in display byte
//! order. With version rolling enabled the chip explores version bits on its
//! own, so every work item carries a single midstate.
//!
//! Replies come back through the same 11-byte frame whether they answer a
//! register read or report a nonce; [`classify`] splits them apart.

use bytes::{BufMut, BytesMut};

use super::frame::AsicResult;
use super::variant::ChipGeneration;
use crate::job_source::MiningJob;

/// Bit position of the version-rolling window in the header version word
/// (BIP320: bits 13 through 28).
pub const VERSION_ROLL_SHIFT: u32 = 13;

/// Chip-native work item, ready for framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkFrame {
    pub wire_job_id: u8,
    pub num_midstates: u8,
    pub starting_nonce: u32,
    pub nbits: u32,
    pub ntime: u32,
    pub merkle_root_be: [u8; 32],
    pub prev_hash_be: [u8; 32],
    pub version: u32,
}

impl WorkFrame {
    /// Build the work item for `sequence`, tagging it with the wire id the
    /// chip will echo back.
    pub fn assemble(generation: ChipGeneration, sequence: u8, job: &MiningJob) -> Self {
        WorkFrame {
            wire_job_id: generation.job_id_encode(sequence),
            num_midstates: 1,
            starting_nonce: job.starting_nonce,
            nbits: job.target,
            ntime: job.ntime,
            merkle_root_be: job.merkle_root_be,
            prev_hash_be: job.prev_block_hash_be,
            version: job.version,
        }
    }

    /// Serialize the 82-byte frame body (everything between the length byte
    /// and the CRC16).
    pub(crate) fn put_body(&self, dst: &mut BytesMut) {
        dst.put_u8(self.wire_job_id);
        dst.put_u8(self.num_midstates);
        dst.put_u32_le(self.starting_nonce);
        dst.put_u32_le(self.nbits);
        dst.put_u32_le(self.ntime);
        dst.put_slice(&self.merkle_root_be);
        dst.put_slice(&self.prev_hash_be);
        dst.put_u32_le(self.version);
    }
}

/// A nonce the chip believes clears its local difficulty mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceCandidate {
    /// Pipeline sequence number recovered from the echoed wire id.
    pub sequence: u8,
    pub chip_index: u8,
    pub nonce: u32,
    /// Full rolled version bits, already shifted into header position; OR
    /// with the job's base version to rebuild the hashed version word.
    pub rolled_version: u32,
}

/// Normalized chip reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskResult {
    RegisterResponse {
        register: u8,
        data: u32,
        chip_index: u8,
    },
    NonceCandidate(NonceCandidate),
}

/// Split a raw reply into a register response or a nonce candidate.
///
/// Register reads and nonce reports share one frame shape; the only
/// distinguishing mark is content. A reply whose low nonce bits and version
/// fragment are both zero is treated as a register response. The test is
/// probabilistic: a real nonce with exactly those bits is misfiled and lost.
/// Chip firmware and pool-side accounting both assume this exact rule, so it
/// stays as-is.
pub fn classify(generation: ChipGeneration, raw: AsicResult) -> TaskResult {
    if raw.nonce & 0x7f == 0 && raw.version_bits == 0 {
        return TaskResult::RegisterResponse {
            register: raw.wire_job_id,
            data: raw.nonce.swap_bytes(),
            chip_index: raw.midstate >> 4,
        };
    }

    TaskResult::NonceCandidate(NonceCandidate {
        sequence: generation.job_id_decode(raw.wire_job_id & 0x7f),
        chip_index: generation.nonce_to_chip_index(raw.nonce),
        nonce: raw.nonce,
        rolled_version: u32::from(raw.version_bits) << VERSION_ROLL_SHIFT,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asic::frame::{Command, FrameCodec};
    use tokio_util::codec::Encoder;

    // The full work frame from the capture in `crc::tests`, reassembled from
    // its component fields.
    #[test]
    fn encoded_work_frame_matches_capture() {
        let frame = WorkFrame {
            wire_job_id: ChipGeneration::Bm1368.job_id_encode(1),
            num_midstates: 1,
            starting_nonce: 0,
            nbits: 0x1701_fa38,
            ntime: 0x68d6_17dc,
            merkle_root_be: [
                0x15, 0x16, 0xab, 0x3d, 0x16, 0x42, 0xbb, 0x1f, 0xe2, 0xe2, 0x37, 0x7f, 0x8a,
                0xc5, 0x83, 0xe5, 0xda, 0x99, 0x6c, 0x6b, 0xc7, 0x05, 0x3e, 0xae, 0x56, 0x4b,
                0x02, 0x03, 0xcc, 0x4e, 0xd2, 0x37,
            ],
            prev_hash_be: [
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xa2, 0x5c, 0x00, 0x00, 0xa1,
                0xe7, 0xab, 0x5e, 0x5f, 0x24, 0x46, 0xa3, 0x5f, 0x9c, 0xbb, 0xea, 0x3f, 0x53,
                0x16, 0xe5, 0x4e, 0x39, 0x93, 0xde,
            ],
            version: 0x2000_0000,
        };
        assert_eq!(frame.wire_job_id, 0x18);

        let mut codec = FrameCodec;
        let mut wire = BytesMut::new();
        codec.encode(Command::Work(frame), &mut wire).unwrap();

        let expect: Vec<u8> = vec![
            0x55, 0xaa, 0x21, 0x56, 0x18, 0x01, 0x00, 0x00, 0x00, 0x00, 0x38, 0xfa, 0x01, 0x17,
            0xdc, 0x17, 0xd6, 0x68, 0x15, 0x16, 0xab, 0x3d, 0x16, 0x42, 0xbb, 0x1f, 0xe2, 0xe2,
            0x37, 0x7f, 0x8a, 0xc5, 0x83, 0xe5, 0xda, 0x99, 0x6c, 0x6b, 0xc7, 0x05, 0x3e, 0xae,
            0x56, 0x4b, 0x02, 0x03, 0xcc, 0x4e, 0xd2, 0x37, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0xa2, 0x5c, 0x00, 0x00, 0xa1, 0xe7, 0xab, 0x5e, 0x5f, 0x24, 0x46, 0xa3,
            0x5f, 0x9c, 0xbb, 0xea, 0x3f, 0x53, 0x16, 0xe5, 0x4e, 0x39, 0x93, 0xde, 0x00, 0x00,
            0x00, 0x20, 0x6b, 0x18,
        ];
        assert_eq!(wire.to_vec(), expect);
    }

    #[test]
    fn classifies_register_response() {
        let raw = AsicResult {
            nonce: 0x0000_7013,
            midstate: 0x00,
            wire_job_id: 0x00,
            version_bits: 0x0000,
        };
        assert_eq!(
            classify(ChipGeneration::Bm1370, raw),
            TaskResult::RegisterResponse {
                register: 0x00,
                data: 0x1370_0000,
                chip_index: 0,
            }
        );
    }

    #[test]
    fn classifies_nonce_candidate() {
        let raw = AsicResult {
            nonce: 0x40a6_0018,
            midstate: 0x02,
            wire_job_id: 0x99,
            version_bits: 0x22f9,
        };
        let TaskResult::NonceCandidate(candidate) = classify(ChipGeneration::Bm1368, raw) else {
            panic!("expected nonce candidate");
        };
        assert_eq!(candidate.sequence, 1, "wire id 0x19 is sequence 1");
        assert_eq!(candidate.chip_index, 0x40 >> 2);
        assert_eq!(candidate.nonce, 0x40a6_0018);
        assert_eq!(candidate.rolled_version, 0x22f9 << 13);
    }

    #[test]
    fn zero_version_alone_is_still_a_nonce() {
        // Only the combination of zero low nonce bits AND zero version marks
        // a register response.
        let raw = AsicResult {
            nonce: 0x1234_5680,
            midstate: 0x00,
            wire_job_id: 0x02,
            version_bits: 0x0000,
        };
        assert!(matches!(
            classify(ChipGeneration::Bm1366, raw),
            TaskResult::NonceCandidate(_)
        ));

        let raw = AsicResult {
            nonce: 0x1234_5600,
            midstate: 0x00,
            wire_job_id: 0x02,
            version_bits: 0x1abc,
        };
        assert!(matches!(
            classify(ChipGeneration::Bm1366, raw),
            TaskResult::NonceCandidate(_)
        ));
    }

    #[test]
    fn nonce_with_register_pattern_is_misfiled() {
        // Pathological but intentional: a genuine nonce with zero low bits
        // and zero rolled version is indistinguishable from a register reply
        // and gets dropped on the register path.
        let raw = AsicResult {
            nonce: 0x0a00_0000,
            midstate: 0x00,
            wire_job_id: 0x30,
            version_bits: 0x0000,
        };
        assert!(matches!(
            classify(ChipGeneration::Bm1370, raw),
            TaskResult::RegisterResponse { .. }
        ));
    }
}
